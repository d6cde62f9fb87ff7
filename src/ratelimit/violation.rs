//! Violation reporting with per-identity suppression and identifier masking.
//!
//! A denied caller produces at most one warning per suppression interval.
//! Warnings carry a masked identity only; the raw identifier never reaches a
//! [`ViolationSink`].

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt::Debug;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::identity::{IP_PREFIX, UNKNOWN_IDENTITY};

/// Default gap between repeated warnings for one identity.
pub const DEFAULT_SUPPRESSION: Duration = Duration::from_secs(3600);

const TOKEN_VISIBLE_CHARS: usize = 8;
const TOKEN_PLACEHOLDER: &str = "...";
const IPV4_PLACEHOLDER: &str = "xxx";
const IPV6_PLACEHOLDER: &str = "xxxx";

/// A sanitized rate limit violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViolationEvent {
    /// Masked caller identity
    pub site_id: String,
    pub endpoint: String,
    pub current: u64,
    pub limit: u64,
    pub retry_after: u64,
}

/// Receiver of violation warnings.
pub trait ViolationSink: Send + Sync + Debug {
    /// Record one warning. Must not panic.
    fn warn(&self, event: &ViolationEvent);
}

/// Sink that forwards violations to `tracing` at WARN level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ViolationSink for TracingSink {
    fn warn(&self, event: &ViolationEvent) {
        warn!(
            site_id = %event.site_id,
            endpoint = %event.endpoint,
            current = event.current,
            limit = event.limit,
            retry_after = event.retry_after,
            "Rate limit exceeded"
        );
    }
}

/// Emits at most one warning per identity per suppression interval.
#[derive(Debug)]
pub struct ViolationReporter {
    /// Identity -> epoch millis of the last emitted warning
    marks: DashMap<String, i64>,
    suppression_millis: i64,
    sink: Arc<dyn ViolationSink>,
}

impl ViolationReporter {
    /// Create a reporter with the given sink and suppression interval.
    pub fn new(sink: Arc<dyn ViolationSink>, suppression: Duration) -> Self {
        Self {
            marks: DashMap::new(),
            suppression_millis: i64::try_from(suppression.as_millis()).unwrap_or(i64::MAX),
            sink,
        }
    }

    /// Emit a warning for `identity` unless one was emitted within the
    /// suppression interval. Returns whether a warning was emitted.
    pub fn report_if_due(
        &self,
        identity: &str,
        endpoint: &str,
        current: u64,
        limit: u64,
        retry_after: u64,
        now_millis: i64,
    ) -> bool {
        let due = match self.marks.entry(identity.to_string()) {
            Entry::Occupied(mut entry) => {
                if now_millis.saturating_sub(*entry.get()) >= self.suppression_millis {
                    entry.insert(now_millis);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now_millis);
                true
            }
        };

        if due {
            self.sink.warn(&ViolationEvent {
                site_id: mask_identifier(identity),
                endpoint: endpoint.to_string(),
                current,
                limit,
                retry_after,
            });
        }
        due
    }

    /// Drop marks older than the suppression interval. Returns how many
    /// were removed.
    pub fn prune(&self, now_millis: i64) -> usize {
        let before = self.marks.len();
        let suppression = self.suppression_millis;
        self.marks
            .retain(|_, last| now_millis.saturating_sub(*last) <= suppression);
        before.saturating_sub(self.marks.len())
    }

    /// Number of identities with a live mark.
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Forget every mark.
    pub fn clear(&self) {
        self.marks.clear();
    }
}

/// Mask an identity string for logging.
///
/// `unknown` passes through. `ip:` identities lose their last IPv4 octet or
/// IPv6 segment. Site tokens longer than eight characters are cut to eight
/// plus a placeholder.
pub fn mask_identifier(identity: &str) -> String {
    if identity == UNKNOWN_IDENTITY {
        return identity.to_string();
    }

    if let Some(addr) = identity.strip_prefix(IP_PREFIX) {
        return format!("{}{}", IP_PREFIX, mask_ip(addr));
    }

    match identity.char_indices().nth(TOKEN_VISIBLE_CHARS) {
        Some((cut, _)) => format!("{}{}", &identity[..cut], TOKEN_PLACEHOLDER),
        None => identity.to_string(),
    }
}

/// Replace the last segment of an address.
///
/// A trailing port and IPv6 brackets are dropped first. Anything that does
/// not parse as an IP address is replaced whole.
pub fn mask_ip(addr: &str) -> String {
    let host = strip_port(addr.trim());
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let [a, b, c, _] = v4.octets();
            format!("{}.{}.{}.{}", a, b, c, IPV4_PLACEHOLDER)
        }
        Ok(IpAddr::V6(_)) => match host.rfind(':') {
            Some(idx) => format!("{}:{}", &host[..idx], IPV6_PLACEHOLDER),
            None => IPV6_PLACEHOLDER.to_string(),
        },
        Err(_) => IPV4_PLACEHOLDER.to_string(),
    }
}

/// `[v6]:port` and `v4:port` down to the bare host; bare IPv6 is untouched.
fn strip_port(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match addr.split_once(':') {
        Some((host, port)) if !port.contains(':') => host,
        _ => addr,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Sink that keeps every event for inspection.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        pub events: Mutex<Vec<ViolationEvent>>,
    }

    impl RecordingSink {
        pub fn count(&self) -> usize {
            self.events.lock().len()
        }
    }

    impl ViolationSink for RecordingSink {
        fn warn(&self, event: &ViolationEvent) {
            self.events.lock().push(event.clone());
        }
    }

    fn reporter() -> (ViolationReporter, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let reporter = ViolationReporter::new(sink.clone(), DEFAULT_SUPPRESSION);
        (reporter, sink)
    }

    #[test]
    fn test_mask_unknown_passes_through() {
        assert_eq!(mask_identifier("unknown"), "unknown");
    }

    #[test]
    fn test_mask_ipv4() {
        assert_eq!(mask_identifier("ip:203.0.113.1"), "ip:203.0.113.xxx");
    }

    #[test]
    fn test_mask_ipv6() {
        assert_eq!(mask_identifier("ip:2001:db8:0:0:0:0:0:7"), "ip:2001:db8:0:0:0:0:0:xxxx");
        assert_eq!(mask_identifier("ip:2001:db8::1"), "ip:2001:db8::xxxx");
    }

    #[test]
    fn test_mask_address_with_port() {
        let masked = mask_identifier("ip:203.0.113.1:51234");
        assert_eq!(masked, "ip:203.0.113.xxx");
        assert!(!masked.contains("203.0.113.1"));

        assert_eq!(mask_identifier("ip:[2001:db8::1]:443"), "ip:2001:db8::xxxx");
        assert_eq!(mask_identifier("ip:[2001:db8::1]"), "ip:2001:db8::xxxx");
        assert_eq!(mask_identifier("ip:localhost:8080"), "ip:xxx");
    }

    #[test]
    fn test_mask_unparseable_ip() {
        assert_eq!(mask_identifier("ip:localhost"), "ip:xxx");
        assert_eq!(mask_identifier("ip:"), "ip:xxx");
    }

    #[test]
    fn test_mask_token_lengths() {
        assert_eq!(mask_identifier("abcdefgh"), "abcdefgh");
        assert_eq!(mask_identifier("abc"), "abc");

        let long = "a1b2c3d4".repeat(8);
        assert_eq!(long.len(), 64);
        assert_eq!(mask_identifier(&long), "a1b2c3d4...");
        assert_eq!(mask_identifier("abcdefghi"), "abcdefgh...");
    }

    #[test]
    fn test_first_denial_reports() {
        let (reporter, sink) = reporter();
        assert!(reporter.report_if_due("ip:203.0.113.1", "product", 600, 600, 12, 0));

        let events = sink.events.lock();
        assert_eq!(
            events[0],
            ViolationEvent {
                site_id: "ip:203.0.113.xxx".to_string(),
                endpoint: "product".to_string(),
                current: 600,
                limit: 600,
                retry_after: 12,
            }
        );
    }

    #[test]
    fn test_repeat_within_hour_is_suppressed() {
        let (reporter, sink) = reporter();
        assert!(reporter.report_if_due("A-token-1", "test", 5, 5, 1, 0));
        assert!(!reporter.report_if_due("A-token-1", "test", 5, 5, 1, 10));
        assert!(!reporter.report_if_due("A-token-1", "other", 5, 5, 1, 3_599_999));
        assert_eq!(sink.count(), 1);

        assert!(reporter.report_if_due("A-token-1", "test", 5, 5, 1, 3_601_000));
        assert_eq!(sink.count(), 2);
    }

    #[test]
    fn test_identities_suppressed_independently() {
        let (reporter, sink) = reporter();
        reporter.report_if_due("ip:10.0.0.1", "cart", 1, 1, 1, 0);
        reporter.report_if_due("ip:10.0.0.2", "cart", 1, 1, 1, 0);
        assert_eq!(sink.count(), 2);
        assert_eq!(reporter.len(), 2);
    }

    #[test]
    fn test_raw_token_never_reaches_sink() {
        let (reporter, sink) = reporter();
        let token = "secret-token-0123456789";
        reporter.report_if_due(token, "account", 300, 300, 30, 0);
        assert!(sink.events.lock().iter().all(|e| !e.site_id.contains(token)));
    }

    #[test]
    fn test_prune_drops_expired_marks() {
        let (reporter, _sink) = reporter();
        reporter.report_if_due("old-identity", "cart", 1, 1, 1, 0);
        reporter.report_if_due("new-identity", "cart", 1, 1, 1, 3_000_000);

        assert_eq!(reporter.prune(3_600_001), 1);
        assert_eq!(reporter.len(), 1);

        reporter.clear();
        assert!(reporter.is_empty());
    }
}
