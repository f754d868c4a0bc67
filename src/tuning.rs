// COREPLUG TUNING TYPES
// PURE-RUST MODULE: ZERO SYSFS DEPENDENCIES
// SHARED BETWEEN THE ENGINE, THE PLATFORM ADAPTERS AND THE OFFLINE TESTS

use crate::platform::Platform;

// LOAD LEVELS (PERCENT PER ONLINE CORE)
// EFFECTIVE THRESHOLD = BASELINE * ONLINE CORES. MORE CORES ONLINE
// RAISES THE BAR FOR ANY FURTHER CHANGE.

pub const DEFAULT_FIRST_LEVEL: u32  = 80;   // HIGH: ONLINE EVERYTHING
pub const DEFAULT_SECOND_LEVEL: u32 = 50;   // MEDIUM: ONE CORE AT A TIME
pub const DEFAULT_THIRD_LEVEL: u32  = 25;   // LOW: COLLAPSE TO CPU0

// STICKY BAND FLOOR: UNSCALED, INDEPENDENT OF THE CONFIGURABLE THIRD LEVEL
pub const STICKY_FLOOR: u32 = DEFAULT_THIRD_LEVEL;

pub const DEFAULT_SUSPEND_FREQ_KHZ: u32 = 702_000;

// HYSTERESIS

pub const HYSTERESIS_MS: u64 = 2000;
pub const MEDIUM_HYSTERESIS_MS: u64 = HYSTERESIS_MS * 2;

// SCHEDULING (IN TICKS OF DEFAULT_TICK_MS)

pub const DEFAULT_TICK_MS: u64 = 1000;
pub const WARMUP_TICKS: u64 = 25;
pub const RESUME_DELAY_TICKS: u64 = 1;

// LOAD HISTORY

pub const HISTORY_SIZE: usize = 8;

// THE PRIMARY CORE NEVER GOES OFFLINE
pub const PRIMARY_CORE: u32 = 0;

// INTERACTIVE GOVERNOR PROFILES
// (above_hispeed_delay MS, go_hispeed_load %, timer_rate MS, min_sample_time MS)

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TunableProfile {
    pub above_hispeed_delay: u32,
    pub go_hispeed_load: u32,
    pub timer_rate: u32,
    pub min_sample_time: u32,
}

impl TunableProfile {
    pub const fn new(
        above_hispeed_delay: u32,
        go_hispeed_load: u32,
        timer_rate: u32,
        min_sample_time: u32,
    ) -> Self {
        Self { above_hispeed_delay, go_hispeed_load, timer_rate, min_sample_time }
    }
}

// ALL CORES UP: RAMP IMMEDIATELY, SAMPLE FAST
pub const HIGH_LOAD_PROFILE: TunableProfile = TunableProfile::new(0, 80, 10, 80);
// FIRST EXTRA CORE: LAZY RAMP, LET CPUFREQ HANDLE UI BURSTS
pub const SECOND_CORE_PROFILE: TunableProfile = TunableProfile::new(50, 99, 30, 20);
// BACK TO CPU0: CONSERVATIVE
pub const LOW_LOAD_PROFILE: TunableProfile = TunableProfile::new(15, 99, 25, 40);

// THRESHOLDS

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Thresholds {
    pub first: u32,
    pub second: u32,
    pub third: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            first: DEFAULT_FIRST_LEVEL,
            second: DEFAULT_SECOND_LEVEL,
            third: DEFAULT_THIRD_LEVEL,
        }
    }
}

impl Thresholds {
    // EFFECTIVE THRESHOLDS FOR THE GIVEN ONLINE CORE COUNT
    pub fn scaled(&self, online_cores: u32) -> Thresholds {
        Thresholds {
            first: self.first.saturating_mul(online_cores),
            second: self.second.saturating_mul(online_cores),
            third: self.third.saturating_mul(online_cores),
        }
    }
}

// LOAD BANDS

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Band {
    High,
    Medium,
    Sticky,
    Low,
    Idle,
}

impl Band {
    pub fn label(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Sticky => "STICKY",
            Self::Low => "LOW",
            Self::Idle => "IDLE",
        }
    }
}

// BAND CLASSIFICATION
// ORDER MATTERS: HIGH -> MEDIUM -> STICKY -> LOW. FIRST MATCH WINS,
// SO STICKY SHADOWS LOW WHENEVER TWO CORES ARE ONLINE.

pub fn classify(average: u32, online_cores: u32, baseline: &Thresholds) -> Band {
    let t = baseline.scaled(online_cores);

    if average >= t.first {
        Band::High
    } else if (average >= t.third && online_cores < 2) || average >= t.second {
        Band::Medium
    } else if average >= STICKY_FLOOR && online_cores == 2 {
        Band::Sticky
    } else if average <= t.third && online_cores > 1 {
        Band::Low
    } else {
        Band::Idle
    }
}

// TUNABLE SCALER
// PUSHES A PROFILE TO THE GOVERNOR. FAILURES ARE LOGGED, NEVER PROPAGATED.

#[derive(Default)]
pub struct TunableScaler {
    last: Option<TunableProfile>,
    pushes: u64,
}

impl TunableScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply<P: Platform + ?Sized>(&mut self, platform: &mut P, profile: TunableProfile) {
        if let Err(e) = platform.apply_governor_tunables(&profile) {
            log::debug!("GOVERNOR TUNABLES NOT APPLIED: {:#}", e);
        }
        self.last = Some(profile);
        self.pushes += 1;
    }

    pub fn last_applied(&self) -> Option<TunableProfile> {
        self.last
    }

    pub fn pushes(&self) -> u64 {
        self.pushes
    }
}
