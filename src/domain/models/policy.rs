use serde::{Deserialize, Serialize};

/// Per-account send pacing configuration.
///
/// When `active` is false the dispatcher ignores the stored values and falls
/// back to a fixed inter-message delay with no batching and no daily cap;
/// `RatePolicy::default()` is that fallback, so "no policy row" and "policy
/// explicitly disabled" take the same code path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatePolicy {
    pub min_interval_s: u64,
    pub max_interval_s: u64,
    pub batch_size: u32,
    pub batch_cooldown_s: u64,
    pub daily_cap: Option<u32>,
    pub jitter_enabled: bool,
    pub active: bool,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            min_interval_s: 10,
            max_interval_s: 15,
            batch_size: 30,
            batch_cooldown_s: 60,
            daily_cap: None,
            jitter_enabled: true,
            active: false,
        }
    }
}
