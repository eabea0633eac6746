use crate::types::ServiceSpec;

/// How often an announcer resends its service list
pub const ANNOUNCE_INTERVAL_SECS: u64 = 30;

/// Upper bound on establishing the announcer's TCP connection
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Collector tick: garbage collection and unconditional snapshot write
pub const TICK_INTERVAL_SECS: u64 = 30;

/// Announcements older than this are evicted on the next tick
pub const STALE_AFTER_SECS: u64 = 300;

/// Capacity of the listener -> reconciler queue
pub const QUEUE_CAPACITY: usize = 10;

/// Output file contents written on a fresh start
pub const EMPTY_SNAPSHOT: &[u8] = b"[]";

/// Encode an announcement payload: one compact JSON array per connection.
pub fn encode_announcement(services: &[ServiceSpec]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(services)
}

/// Decode an announcement payload. The whole buffer must be exactly one JSON array.
pub fn decode_announcement(bytes: &[u8]) -> serde_json::Result<Vec<ServiceSpec>> {
    serde_json::from_slice(bytes)
}
