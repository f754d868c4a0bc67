// COREPLUG SUSPEND CONTROLLER
// TWO-STATE MACHINE DRIVEN BY DISPLAY EVENTS.
//
//   ACTIVE    --display off-->  SUSPENDED  (COLLAPSE TO CPU0, CAP MAX FREQ)
//   SUSPENDED --display on--->  ACTIVE     (ONLINE EVERYTHING, UNCAP)
//
// REPEATED EVENTS ARE NOT FILTERED: THE SAME TRANSITION IS RE-ISSUED AND
// THE PLATFORM SEES A REDUNDANT WRITE.

use crate::engine::{Escalation, LevelAction};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PowerState {
    #[default]
    Active,
    Suspended,
}

impl PowerState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
        }
    }
}

// WHAT THE CALLER MUST EXECUTE. max_freq_khz None REMOVES THE CAP.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Transition {
    pub action: LevelAction,
    pub max_freq_khz: Option<u32>,
}

#[derive(Default)]
pub struct SuspendController {
    state: PowerState,
    suspends: u64,
    resumes: u64,
}

impl SuspendController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn is_suspended(&self) -> bool {
        self.state == PowerState::Suspended
    }

    pub fn display_off(&mut self, suspend_freq_khz: u32) -> Transition {
        if self.is_suspended() {
            log::debug!("DISPLAY OFF WHILE SUSPENDED, RE-APPLYING");
        }
        self.state = PowerState::Suspended;
        self.suspends += 1;
        Transition {
            action: LevelAction::DeescalateAll,
            max_freq_khz: Some(suspend_freq_khz),
        }
    }

    pub fn display_on(&mut self) -> Transition {
        if !self.is_suspended() {
            log::debug!("DISPLAY ON WHILE ACTIVE, RE-APPLYING");
        }
        self.state = PowerState::Active;
        self.resumes += 1;
        Transition {
            action: LevelAction::Escalate { reason: Escalation::HighLoad },
            max_freq_khz: None,
        }
    }

    pub fn suspends(&self) -> u64 {
        self.suspends
    }

    pub fn resumes(&self) -> u64 {
        self.resumes
    }
}
