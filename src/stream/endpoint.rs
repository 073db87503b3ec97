//! Endpoint construction.
//!
//! A stream asks its [`EndpointBuilder`] for a URL at every `connect()`. Domain
//! services implement it from their live subscription collection, so a
//! reconnect always encodes exactly what is subscribed at that moment.

/// Produces the full URL for the next connection attempt.
///
/// `base` is the channel URL (base URL plus public/protected path). Returning
/// `None` means there is nothing to stream and `connect()` becomes a no-op.
pub trait EndpointBuilder: Send + Sync + 'static {
    fn endpoint(&self, base: &str) -> Option<String>;
}

impl<F> EndpointBuilder for F
where
    F: Fn(&str) -> Option<String> + Send + Sync + 'static,
{
    fn endpoint(&self, base: &str) -> Option<String> {
        self(base)
    }
}

/// Endpoint with no query parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct BareEndpoint;

impl EndpointBuilder for BareEndpoint {
    fn endpoint(&self, base: &str) -> Option<String> {
        Some(base.to_string())
    }
}

/// Append url-encoded `pairs` to `url`, keeping their order and repeated keys.
pub fn with_query<K, V>(url: &str, pairs: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    if pairs.is_empty() {
        return url.to_string();
    }

    let encoded: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (k.as_ref(), v.as_ref())).collect();
    // Serializing a slice of string pairs cannot fail.
    let query = serde_urlencoded::to_string(&encoded).unwrap_or_default();
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_query_repeated_keys() {
        let url = with_query(
            "https://x/v1/stream/public",
            &[("action", "instrument_price"), ("instrument_id", "R_10"), ("instrument_id", "R_100")],
        );
        assert_eq!(
            url,
            "https://x/v1/stream/public?action=instrument_price&instrument_id=R_10&instrument_id=R_100"
        );
    }

    #[test]
    fn test_with_query_encodes_and_appends() {
        let url = with_query("wss://x/ws?a=1", &[("Authorization", "Bearer t k")]);
        assert_eq!(url, "wss://x/ws?a=1&Authorization=Bearer+t+k");
    }

    #[test]
    fn test_with_query_empty() {
        let pairs: [(&str, &str); 0] = [];
        assert_eq!(with_query("https://x", &pairs), "https://x");
    }

    #[test]
    fn test_closure_builder() {
        let builder = |base: &str| Some(format!("{base}?action=ping"));
        assert_eq!(builder.endpoint("https://x").as_deref(), Some("https://x?action=ping"));
        assert_eq!(BareEndpoint.endpoint("https://x").as_deref(), Some("https://x"));
    }
}
