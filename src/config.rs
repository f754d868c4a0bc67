// COREPLUG CONFIGURATION
// WHAT THE CLI RESOLVES INTO. DEFAULTS MATCH tuning.rs.

use std::time::Duration;

use crate::engine::OfflinePolicy;
use crate::tuning::{
    Thresholds, DEFAULT_SUSPEND_FREQ_KHZ, DEFAULT_TICK_MS, RESUME_DELAY_TICKS, WARMUP_TICKS,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HotplugConfig {
    pub thresholds: Thresholds,
    pub suspend_freq_khz: u32,
    pub offline_policy: OfflinePolicy,
}

impl Default for HotplugConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            suspend_freq_khz: DEFAULT_SUSPEND_FREQ_KHZ,
            offline_policy: OfflinePolicy::All,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timing {
    pub tick: Duration,
    pub warmup_ticks: u64,
    pub resume_delay_ticks: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self::from_tick_ms(DEFAULT_TICK_MS, WARMUP_TICKS)
    }
}

impl Timing {
    pub fn from_tick_ms(tick_ms: u64, warmup_ticks: u64) -> Self {
        Self {
            // A ZERO TICK WOULD SPIN THE WORKER
            tick: Duration::from_millis(tick_ms.max(1)),
            warmup_ticks,
            resume_delay_ticks: RESUME_DELAY_TICKS,
        }
    }

    pub fn warmup(&self) -> Duration {
        self.tick.saturating_mul(self.warmup_ticks.min(u64::from(u32::MAX)) as u32)
    }

    pub fn resume_delay(&self) -> Duration {
        self.tick.saturating_mul(self.resume_delay_ticks.min(u64::from(u32::MAX)) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timing() {
        let t = Timing::default();
        assert_eq!(t.tick, Duration::from_secs(1));
        assert_eq!(t.warmup(), Duration::from_secs(25));
        assert_eq!(t.resume_delay(), Duration::from_secs(1));
    }

    #[test]
    fn zero_tick_clamped() {
        assert_eq!(Timing::from_tick_ms(0, 0).tick, Duration::from_millis(1));
    }

    #[test]
    fn default_config() {
        let c = HotplugConfig::default();
        assert_eq!(c.thresholds, Thresholds::default());
        assert_eq!(c.suspend_freq_khz, 702_000);
        assert_eq!(c.offline_policy, OfflinePolicy::All);
    }
}
