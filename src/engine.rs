// COREPLUG THRESHOLD ENGINE
// PURE DECISION LOGIC: SMOOTHED LOAD + CONTROLLER STATE -> LevelAction.
// NO PLATFORM ACCESS. Hotplug EXECUTES WHATEVER COMES OUT OF HERE.
//
// BANDS ARE EVALUATED HIGH -> MEDIUM -> STICKY -> LOW (SEE tuning::classify).
// EACH ESCALATING OR DE-ESCALATING BAND HAS ITS OWN HYSTERESIS WINDOW,
// MEASURED FROM THE LAST TRANSITION OF ANY KIND.

use crate::tuning::{
    classify, Band, Thresholds, TunableProfile, DEFAULT_SUSPEND_FREQ_KHZ, HIGH_LOAD_PROFILE,
    HYSTERESIS_MS, MEDIUM_HYSTERESIS_MS, SECOND_CORE_PROFILE,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Escalation {
    // EVERY OFFLINE CORE
    HighLoad,
    // EXACTLY ONE MORE CORE
    MediumLoad,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LevelAction {
    Escalate { reason: Escalation },
    DeescalateOne,
    DeescalateAll,
    Hold,
}

impl LevelAction {
    pub fn label(self) -> &'static str {
        match self {
            Self::Escalate { reason: Escalation::HighLoad } => "UP-ALL",
            Self::Escalate { reason: Escalation::MediumLoad } => "UP-ONE",
            Self::DeescalateOne => "DOWN-ONE",
            Self::DeescalateAll => "DOWN-ALL",
            Self::Hold => "HOLD",
        }
    }

    pub fn is_transition(self) -> bool {
        !matches!(self, Self::Hold)
    }
}

// HOW MANY CORES THE LOW BAND TAKES DOWN PER WINDOW
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, clap::ValueEnum)]
pub enum OfflinePolicy {
    // EVERYTHING BUT CPU0
    #[default]
    All,
    // HIGHEST-NUMBERED ONLINE CORE ONLY
    One,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ControllerState {
    // MONOTONIC MS OF THE LAST ONLINE/OFFLINE TRANSITION. 0 = NEVER.
    pub last_action_ms: u64,
    pub online_cores: u32,
    pub total_cores: u32,
    pub thresholds: Thresholds,
    pub suspend_freq_khz: u32,
}

impl ControllerState {
    pub fn new(online_cores: u32, total_cores: u32) -> Self {
        Self {
            last_action_ms: 0,
            online_cores,
            total_cores,
            thresholds: Thresholds::default(),
            suspend_freq_khz: DEFAULT_SUSPEND_FREQ_KHZ,
        }
    }

    fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_action_ms)
    }
}

pub struct ThresholdEngine {
    hysteresis_ms: u64,
    medium_hysteresis_ms: u64,
    offline_policy: OfflinePolicy,
}

impl Default for ThresholdEngine {
    fn default() -> Self {
        Self::new(OfflinePolicy::All)
    }
}

impl ThresholdEngine {
    pub fn new(offline_policy: OfflinePolicy) -> Self {
        Self {
            hysteresis_ms: HYSTERESIS_MS,
            medium_hysteresis_ms: MEDIUM_HYSTERESIS_MS,
            offline_policy,
        }
    }

    pub fn offline_policy(&self) -> OfflinePolicy {
        self.offline_policy
    }

    pub fn decide(&self, average: u32, now_ms: u64, state: &ControllerState) -> LevelAction {
        match classify(average, state.online_cores, &state.thresholds) {
            Band::High => self.high_load(now_ms, state, self.hysteresis_ms),
            Band::Medium => self.medium_load(now_ms, state, self.medium_hysteresis_ms),
            Band::Low => self.low_load(now_ms, state, self.hysteresis_ms),
            Band::Sticky | Band::Idle => LevelAction::Hold,
        }
    }

    // TWO CORES ONLINE SKIPS THE WINDOW: STRAIGHT TO MAX
    pub fn high_load(&self, now_ms: u64, state: &ControllerState, window_ms: u64) -> LevelAction {
        if state.online_cores >= state.total_cores {
            return LevelAction::Hold;
        }
        if state.online_cores == 2 || state.elapsed_ms(now_ms) >= window_ms {
            LevelAction::Escalate { reason: Escalation::HighLoad }
        } else {
            LevelAction::Hold
        }
    }

    // 1 -> 2 SKIPS THE WINDOW
    pub fn medium_load(&self, now_ms: u64, state: &ControllerState, window_ms: u64) -> LevelAction {
        if state.online_cores >= state.total_cores {
            return LevelAction::Hold;
        }
        if state.online_cores < 2 || state.elapsed_ms(now_ms) >= window_ms {
            LevelAction::Escalate { reason: Escalation::MediumLoad }
        } else {
            LevelAction::Hold
        }
    }

    pub fn low_load(&self, now_ms: u64, state: &ControllerState, window_ms: u64) -> LevelAction {
        if state.online_cores <= 1 {
            return LevelAction::Hold;
        }
        if state.elapsed_ms(now_ms) < window_ms {
            return LevelAction::Hold;
        }
        match self.offline_policy {
            OfflinePolicy::All => LevelAction::DeescalateAll,
            OfflinePolicy::One => LevelAction::DeescalateOne,
        }
    }
}

// MEDIUM-BAND PROFILE, KEYED ON THE ONLINE COUNT BEFORE THE NEW CORE
pub fn medium_profile(online_before: u32) -> Option<TunableProfile> {
    match online_before {
        1 => Some(SECOND_CORE_PROFILE),
        3 => Some(HIGH_LOAD_PROFILE),
        _ => None,
    }
}
