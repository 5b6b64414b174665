pub mod endpoint;
pub mod mdns;
pub mod netump;
pub mod ringbuf;
pub mod transcoder;
pub mod ump;

/// mDNS service type for Network UMP endpoints
pub const MDNS_SERVICE_TYPE: &str = "_midi2._udp.local";

/// Default ports
pub const DEFAULT_LOCAL_PORT: u16 = 5504;
pub const DEFAULT_REMOTE_PORT: u16 = 5504;

/// Default UMP endpoint name
pub const DEFAULT_ENDPOINT_NAME: &str = "Zynthian NetUMP";

/// Announcement defaults
pub const DEFAULT_ANNOUNCE_INTERVAL_MS: u64 = 5000;
