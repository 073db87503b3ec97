//! `ChartSubscriptions`: shared chart streams with a history cache.
//!
//! Charts asking for the same `(symbol, style, granularity, count, start, end)`
//! share one registry entry and therefore one live stream. The entry exists as
//! long as it has at least one callback; the last callback leaving tears the
//! live stream down. History snapshots are cached per key.
//!
//! Every callback receives the entry's history snapshot exactly once, before
//! any live update. Until then it is "unprimed" and live broadcasts skip it.
//! Priming and broadcasting both run under the entry's delivery lock.
//!
//! Opening a new entry without cached history is asynchronous (fetch, cache,
//! deliver, then open the live stream). An entry torn down while that is in
//! flight still caches the fetched history, and a live stream that opens after
//! the teardown is closed straight away.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};

use super::feed::{ChartFeed, ChartSink, LiveStream};
use super::{ChartKey, ChartMessage, ChartRequest};
use crate::error::{SdkError, StreamError};
use crate::stream::{HandlerId, Spawner};

type ChartCallback = Arc<dyn Fn(&ChartMessage) + Send + Sync>;

// ─── Registry entry ──────────────────────────────────────────────────────────

#[derive(Default)]
struct LiveSlot {
    torn_down: bool,
    stream: Option<Box<dyn LiveStream>>,
}

struct Member {
    id: HandlerId,
    callback: ChartCallback,
    primed: bool,
}

struct Entry {
    members: Mutex<Vec<Member>>,
    /// History delivered to this entry's callbacks so far.
    snapshot: Mutex<Option<ChartMessage>>,
    /// Held while callbacks run. Reentrant so a callback may subscribe.
    delivery: ReentrantMutex<()>,
    live: Mutex<LiveSlot>,
}

impl Entry {
    fn new(id: HandlerId, callback: ChartCallback) -> Self {
        Self {
            members: Mutex::new(vec![Member {
                id,
                callback,
                primed: false,
            }]),
            snapshot: Mutex::new(None),
            delivery: ReentrantMutex::new(()),
            live: Mutex::new(LiveSlot::default()),
        }
    }

    fn join(&self, id: HandlerId, callback: ChartCallback) {
        self.members.lock().push(Member {
            id,
            callback,
            primed: false,
        });
    }

    /// Live update: primed callbacks only.
    fn broadcast(&self, message: &ChartMessage) {
        let _turn = self.delivery.lock();
        let callbacks: Vec<ChartCallback> = self
            .members
            .lock()
            .iter()
            .filter(|m| m.primed)
            .map(|m| Arc::clone(&m.callback))
            .collect();
        for callback in callbacks {
            callback(message);
        }
    }

    /// Record the snapshot and prime every callback still waiting for it.
    fn deliver_history(&self, history: &ChartMessage) {
        let _turn = self.delivery.lock();
        *self.snapshot.lock() = Some(history.clone());
        let callbacks: Vec<ChartCallback> = self
            .members
            .lock()
            .iter_mut()
            .filter(|m| !m.primed)
            .map(|m| {
                m.primed = true;
                Arc::clone(&m.callback)
            })
            .collect();
        for callback in callbacks {
            callback(history);
        }
    }

    /// Prime one joiner from the snapshot. Without a snapshot the pending
    /// history delivery primes it instead.
    fn prime(&self, id: HandlerId) {
        let _turn = self.delivery.lock();
        let Some(history) = self.snapshot.lock().clone() else {
            return;
        };
        let callback = self
            .members
            .lock()
            .iter_mut()
            .find(|m| m.id == id && !m.primed)
            .map(|m| {
                m.primed = true;
                Arc::clone(&m.callback)
            });
        if let Some(callback) = callback {
            callback(&history);
        }
    }

    /// Remove a callback, returning how many are left.
    fn leave(&self, id: HandlerId) -> usize {
        let mut members = self.members.lock();
        members.retain(|m| m.id != id);
        members.len()
    }

    fn len(&self) -> usize {
        self.members.lock().len()
    }

    fn is_torn_down(&self) -> bool {
        self.live.lock().torn_down
    }

    /// Store a freshly opened stream, or close it if the entry is gone.
    fn attach(&self, mut stream: Box<dyn LiveStream>) {
        let mut slot = self.live.lock();
        if slot.torn_down {
            drop(slot);
            stream.close();
        } else {
            slot.stream = Some(stream);
        }
    }

    fn tear_down(&self) {
        let stream = {
            let mut slot = self.live.lock();
            slot.torn_down = true;
            slot.stream.take()
        };
        if let Some(mut stream) = stream {
            stream.close();
        }
    }
}

#[derive(Default)]
struct Registry {
    active: HashMap<ChartKey, Arc<Entry>>,
    history: HashMap<ChartKey, ChartMessage>,
}

// ─── ChartSubscriptions ──────────────────────────────────────────────────────

/// Registry of active chart subscriptions and cached history.
///
/// Clones share the same registry. History fetches run on the runtime
/// captured at construction, so `subscribe` may be called from any thread.
#[derive(Clone)]
pub struct ChartSubscriptions {
    feed: Arc<dyn ChartFeed>,
    registry: Arc<Mutex<Registry>>,
    spawner: Spawner,
}

/// One callback's membership in a chart subscription.
#[must_use = "dropping the handle leaves the callback subscribed; call `unsubscribe`"]
pub struct ChartSubscription {
    key: ChartKey,
    id: HandlerId,
    entry: Arc<Entry>,
    registry: Arc<Mutex<Registry>>,
}

enum Plan {
    /// Joined an existing entry.
    Joined,
    /// New entry with cached history.
    Cached(ChartMessage),
    /// New entry, history must be fetched first.
    Fetch,
}

impl ChartSubscriptions {
    pub fn new(feed: Arc<dyn ChartFeed>) -> Self {
        Self::with_spawner(feed, Spawner::current())
    }

    pub fn with_spawner(feed: Arc<dyn ChartFeed>, spawner: Spawner) -> Self {
        Self {
            feed,
            registry: Arc::new(Mutex::new(Registry::default())),
            spawner,
        }
    }

    /// Register `callback` for `request`.
    ///
    /// The callback first receives the history snapshot (cached or fetched,
    /// or an empty one if the fetch fails), then every live update.
    pub fn subscribe<F>(&self, request: ChartRequest, callback: F) -> ChartSubscription
    where
        F: Fn(&ChartMessage) + Send + Sync + 'static,
    {
        let key = request.key();
        let id = HandlerId::next();
        let callback: ChartCallback = Arc::new(callback);

        let (plan, entry) = {
            let mut registry = self.registry.lock();
            match registry.active.get(&key) {
                Some(entry) => {
                    entry.join(id, callback);
                    (Plan::Joined, Arc::clone(entry))
                }
                None => {
                    let entry = Arc::new(Entry::new(id, callback));
                    registry.active.insert(key.clone(), Arc::clone(&entry));
                    let plan = match registry.history.get(&key) {
                        Some(history) => Plan::Cached(history.clone()),
                        None => Plan::Fetch,
                    };
                    (plan, entry)
                }
            }
        };

        match plan {
            Plan::Joined => {
                tracing::debug!("Chart {} joined existing stream", key);
                entry.prime(id);
            }
            Plan::Cached(history) => {
                tracing::debug!("Chart {} opened from cached history", key);
                entry.deliver_history(&history);
                self.open_live(&request, &entry);
            }
            Plan::Fetch => {
                tracing::debug!("Chart {} fetching history", key);
                self.spawn_fetch(request, Arc::clone(&entry));
            }
        }

        ChartSubscription {
            key,
            id,
            entry,
            registry: Arc::clone(&self.registry),
        }
    }

    fn spawn_fetch(&self, request: ChartRequest, entry: Arc<Entry>) {
        let fetch = self.feed.fetch_history(&request);
        match self.spawner.handle() {
            Some(runtime) => {
                let this = self.clone();
                runtime.spawn(async move {
                    let result = fetch.await;
                    this.finish_fetch(&request, &entry, result);
                });
            }
            None => {
                drop(fetch);
                self.finish_fetch(&request, &entry, Err(StreamError::NoRuntime.into()));
            }
        }
    }

    fn finish_fetch(&self, request: &ChartRequest, entry: &Arc<Entry>, result: Result<ChartMessage, SdkError>) {
        let key = request.key();
        let history = match result {
            Ok(history) => {
                self.registry.lock().history.insert(key.clone(), history.clone());
                history
            }
            Err(e) => {
                tracing::warn!("History fetch for chart {} failed, sending empty: {}", key, e);
                ChartMessage::empty_for(request.style)
            }
        };

        if entry.is_torn_down() {
            tracing::debug!("Chart {} unsubscribed during history fetch", key);
            return;
        }
        entry.deliver_history(&history);
        self.open_live(request, entry);
    }

    fn open_live(&self, request: &ChartRequest, entry: &Arc<Entry>) {
        if entry.is_torn_down() {
            return;
        }

        let weak: Weak<Entry> = Arc::downgrade(entry);
        let sink: ChartSink = Arc::new(move |message: ChartMessage| {
            if let Some(entry) = weak.upgrade() {
                entry.broadcast(&message);
            }
        });
        let stream = self.feed.open_live(request, sink);
        entry.attach(stream);
    }

    /// Cached history for `request`, or fetch and cache it.
    pub async fn fetch_history(&self, request: &ChartRequest) -> Result<ChartMessage, SdkError> {
        let key = request.key();
        if let Some(history) = self.cached_history(&key) {
            return Ok(history);
        }

        let history = self.feed.fetch_history(request).await?;
        self.registry.lock().history.insert(key, history.clone());
        Ok(history)
    }

    // ── Introspection ────────────────────────────────────────────────────

    pub fn active_keys(&self) -> Vec<ChartKey> {
        let mut keys: Vec<ChartKey> = self.registry.lock().active.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn subscriber_count(&self, key: &ChartKey) -> usize {
        self.registry
            .lock()
            .active
            .get(key)
            .map_or(0, |entry| entry.len())
    }

    pub fn cached_history(&self, key: &ChartKey) -> Option<ChartMessage> {
        self.registry.lock().history.get(key).cloned()
    }

    /// Drop every cached history snapshot. Active subscriptions are untouched.
    pub fn clear_history(&self) {
        self.registry.lock().history.clear();
    }
}

impl ChartSubscription {
    pub fn key(&self) -> &ChartKey {
        &self.key
    }

    /// Remove this callback. The last callback of a key tears its stream down.
    pub fn unsubscribe(self) {
        let emptied = {
            let mut registry = self.registry.lock();
            let current = match registry.active.get(&self.key) {
                Some(entry) if Arc::ptr_eq(entry, &self.entry) => Arc::clone(entry),
                _ => return,
            };

            if current.leave(self.id) == 0 {
                registry.active.remove(&self.key);
                Some(current)
            } else {
                None
            }
        };

        if let Some(entry) = emptied {
            tracing::debug!("Chart {} has no subscribers, closing stream", self.key);
            entry.tear_down();
        }
    }
}
