pub mod activation;
pub mod env;
pub mod fetch;
pub mod locator;
pub mod options;
pub mod result;

/// Activation role name of the forwarder engine
pub const ROLE_FORWARDER: &str = "forwarder";
/// Activation role name of the traffic generator engine
pub const ROLE_TRAFFICGEN: &str = "trafficgen";

/// Default management JSON-RPC endpoint
pub const DEFAULT_MGMT_ADDR: &str = "127.0.0.1:6345";

/// Ethernet port defaults used when provisioning PCI ports
pub const ETH_PORT_MTU: u16 = 9000;
pub const ETH_PORT_DRIVER: &str = "PCI";

/// Restart defaults, tuned to the engine's typical restart time
pub const DEFAULT_RESTART_SETTLE_MS: u64 = 20_000;
pub const DEFAULT_HEALTH_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_HEALTH_ATTEMPTS: u32 = 30;

/// Fetch progress polling interval during a trial
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Microseconds since the Unix epoch.
pub fn now_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
