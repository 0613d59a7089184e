/// Per-service tuning for callback expiry and tick cadence.
///
/// Shared by every service a docker hosts; see `DockerConfig::service`.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Callbacks older than this are dropped by the sweep, in milliseconds.
    pub callback_max_age_ms: u64,
    /// Minimum interval between opportunistic sweeps in milliseconds.
    pub sweep_interval_ms: u64,
    /// Interval between `on_tick` calls for non-shell services in milliseconds.
    pub tick_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            callback_max_age_ms: 60_000,
            sweep_interval_ms: 10_000,
            tick_interval_ms: 1_000,
        }
    }
}
