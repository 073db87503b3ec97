//! `Spawner`: the Tokio runtime background work runs on.
//!
//! Transport I/O, reconnect timers and chart history fetches are spawned from
//! synchronous calls. A `Spawner` captured while a runtime is current (or built
//! from an explicit handle) lets those calls come from any thread. Without a
//! captured handle the runtime of the calling context is used, and if there is
//! none the spawn fails with [`StreamError::NoRuntime`].

use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::StreamError;

#[derive(Debug, Clone, Default)]
pub struct Spawner {
    handle: Option<Handle>,
}

impl Spawner {
    /// Capture the runtime of the calling context, if there is one.
    pub fn current() -> Self {
        Self {
            handle: Handle::try_current().ok(),
        }
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self { handle: Some(handle) }
    }

    /// The captured handle, else the calling context's runtime.
    pub fn handle(&self) -> Option<Handle> {
        self.handle.clone().or_else(|| Handle::try_current().ok())
    }

    pub fn is_available(&self) -> bool {
        self.handle().is_some()
    }

    pub fn spawn<F>(&self, future: F) -> Result<JoinHandle<F::Output>, StreamError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = self.handle().ok_or(StreamError::NoRuntime)?;
        Ok(handle.spawn(future))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_runtime_is_an_error() {
        let spawner = Spawner::current();
        assert!(!spawner.is_available());
        assert!(matches!(spawner.spawn(async {}), Err(StreamError::NoRuntime)));
    }

    #[test]
    fn test_captured_handle_spawns_from_plain_thread() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let spawner = Spawner::with_handle(rt.handle().clone());

        let task = spawner.spawn(async { 7 }).unwrap();
        assert_eq!(rt.block_on(task).unwrap(), 7);
    }

    #[tokio::test]
    async fn test_current_captures_runtime() {
        let spawner = Spawner::current();
        assert!(spawner.is_available());
        assert_eq!(spawner.spawn(async { 1 }).unwrap().await.unwrap(), 1);
    }
}
