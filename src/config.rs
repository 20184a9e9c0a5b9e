use std::time::Duration;

/// Control port of the CGMiner/BMMiner JSON API.
pub const MINER_API_PORT: u16 = 4028;

/// Default HTTP port probed for the keyword sniffing.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default worker pool size.
pub const DEFAULT_CONCURRENCY: usize = 50;

/// Upper bound on the worker pool, whatever the caller asks for.
pub const MAX_CONCURRENCY: usize = 1_000;

/// Tuning for the three per-address probes.
///
/// `Default` holds the production values; every deadline is a few seconds at
/// most so a worker can never block indefinitely on a single address.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Echo requests sent per ping invocation.
    pub ping_count: u32,
    /// Per-reply wait handed to the ping tool.
    pub ping_wait: Duration,
    /// Hard deadline for the whole ping process, on top of `ping_wait`.
    pub ping_grace: Duration,
    pub miner_port: u16,
    pub miner_connect_timeout: Duration,
    pub miner_read_timeout: Duration,
    /// Upper bound on bytes accepted from the miner API.
    pub miner_max_bytes: usize,
    pub http_timeout: Duration,
    /// Upper bound on HTTP body bytes inspected.
    pub http_max_bytes: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ping_count: 2,
            ping_wait: Duration::from_secs(1),
            ping_grace: Duration::from_secs(2),
            miner_port: MINER_API_PORT,
            miner_connect_timeout: Duration::from_millis(1500),
            miner_read_timeout: Duration::from_millis(1500),
            miner_max_bytes: 64 * 1024,
            http_timeout: Duration::from_millis(1500),
            http_max_bytes: 256 * 1024,
        }
    }
}

impl ProbeConfig {
    /// Deadline applied around the spawned ping process.
    pub fn ping_deadline(&self) -> Duration {
        self.ping_wait + self.ping_grace
    }
}
