// Engine configuration
//
// All tunables are passed in at construction; no ambient globals.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a spot stays live before the sweep archives it.
    pub spot_live_window: Duration,
    /// How often the expiry sweep runs.
    pub sweep_interval: Duration,
    /// Timeout applied to every persistence gateway call.
    pub store_timeout: Duration,
    /// How many times a conditional write is retried on conflict.
    pub conflict_retries: u32,
    /// Re-spot matching: frequency tolerance in MHz.
    pub respot_freq_tolerance_mhz: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            spot_live_window: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            store_timeout: Duration::from_secs(5),
            conflict_retries: 3,
            respot_freq_tolerance_mhz: 0.01,
        }
    }
}
