// COREPLUG CONTROLLER
// OWNS EVERYTHING ONE CONTROL LOOP NEEDS: THE PLATFORM, CONTROLLER STATE,
// LOAD HISTORY, ENGINE, CORE CONTROLLER, TUNABLE SCALER AND SUSPEND STATE.
//
// NOT THREAD-AWARE. THE SCHEDULER WRAPS ONE Hotplug IN A MUTEX AND IS THE
// ONLY THING THAT CALLS cycle/suspend/resume CONCURRENTLY.

use anyhow::{bail, Result};

use crate::config::HotplugConfig;
use crate::cores::CoreController;
use crate::engine::{medium_profile, ControllerState, Escalation, LevelAction, ThresholdEngine};
use crate::event::EventLog;
use crate::history::LoadHistory;
use crate::platform::Platform;
use crate::suspend::{PowerState, SuspendController};
use crate::tuning::{Thresholds, TunableScaler, HIGH_LOAD_PROFILE, LOW_LOAD_PROFILE};

pub struct Hotplug<P: Platform> {
    platform: P,
    state: ControllerState,
    history: LoadHistory,
    engine: ThresholdEngine,
    cores: CoreController,
    scaler: TunableScaler,
    suspend: SuspendController,
    pub log: EventLog,
}

impl<P: Platform> Hotplug<P> {
    pub fn new(platform: P, config: HotplugConfig) -> Result<Self> {
        let total = platform.total_core_count();
        if total == 0 {
            bail!("PLATFORM REPORTS NO CORES");
        }
        let online = platform.online_core_count().max(1);

        let mut state = ControllerState::new(online, total);
        state.thresholds = config.thresholds;
        state.suspend_freq_khz = config.suspend_freq_khz;

        Ok(Self {
            platform,
            state,
            history: LoadHistory::new(),
            engine: ThresholdEngine::new(config.offline_policy),
            cores: CoreController::new(),
            scaler: TunableScaler::new(),
            suspend: SuspendController::new(),
            log: EventLog::new(),
        })
    }

    // ONE CONTROL CYCLE. A SUSPENDED CONTROLLER DOES NOTHING.
    pub fn cycle(&mut self, now_ms: u64) -> LevelAction {
        if self.suspend.is_suspended() {
            log::debug!("CYCLE SKIPPED: SUSPENDED");
            return LevelAction::Hold;
        }

        let sample = self.platform.current_load();
        let average = self.history.record(sample);
        self.refresh_online();

        let action = self.engine.decide(average, now_ms, &self.state);
        log::debug!(
            "LOAD {} AVG {} ONLINE {}/{} -> {}",
            sample,
            average,
            self.state.online_cores,
            self.state.total_cores,
            action.label()
        );
        self.execute(action, now_ms);

        self.log.snapshot(now_ms, sample, average, self.state.online_cores, action);
        action
    }

    fn execute(&mut self, action: LevelAction, now_ms: u64) {
        let online_before = self.state.online_cores;
        match action {
            LevelAction::Hold => return,
            LevelAction::Escalate { reason: Escalation::HighLoad } => {
                let up = self.cores.online_all(&mut self.platform);
                log::info!("CPU {} UP - HIGH LOAD", fmt_cpus(&up));
                self.scaler.apply(&mut self.platform, HIGH_LOAD_PROFILE);
            }
            LevelAction::Escalate { reason: Escalation::MediumLoad } => {
                if let Some(cpu) = self.cores.online_next(&mut self.platform) {
                    log::info!("CPU{} UP - MEDIUM LOAD", cpu);
                }
                if let Some(profile) = medium_profile(online_before) {
                    self.scaler.apply(&mut self.platform, profile);
                }
            }
            LevelAction::DeescalateAll => {
                let down = self.cores.offline_secondaries(&mut self.platform);
                log::info!("CPU {} DOWN - LOW LOAD", fmt_cpus(&down));
                self.scaler.apply(&mut self.platform, LOW_LOAD_PROFILE);
            }
            LevelAction::DeescalateOne => {
                if let Some(cpu) = self.cores.offline_last(&mut self.platform) {
                    log::info!("CPU{} DOWN - LOW LOAD", cpu);
                }
                if self.platform.online_core_count() <= 1 {
                    self.scaler.apply(&mut self.platform, LOW_LOAD_PROFILE);
                }
            }
        }
        self.state.last_action_ms = now_ms;
        self.refresh_online();
    }

    // PLATFORM IS THE SOURCE OF TRUTH. A FAILED REQUEST CANNOT LEAVE A
    // STALE COUNT BEHIND.
    fn refresh_online(&mut self) {
        let online = self.platform.online_core_count().max(1);
        if online != self.state.online_cores {
            log::debug!("ONLINE COUNT {} -> {}", self.state.online_cores, online);
        }
        self.state.online_cores = online;
    }

    // ACTION IS SKIPPED WHEN THERE IS NOTHING LEFT TO DO
    fn applicable(&self, action: LevelAction) -> LevelAction {
        let s = &self.state;
        match action {
            LevelAction::Escalate { .. } if s.online_cores >= s.total_cores => LevelAction::Hold,
            LevelAction::DeescalateOne | LevelAction::DeescalateAll if s.online_cores <= 1 => {
                LevelAction::Hold
            }
            other => other,
        }
    }

    // DISPLAY OFF: COLLAPSE TO CPU0 REGARDLESS OF LOAD, THEN CAP
    pub fn suspend(&mut self, now_ms: u64) {
        let t = self.suspend.display_off(self.state.suspend_freq_khz);
        self.refresh_online();
        let action = self.applicable(t.action);
        self.execute(action, now_ms);
        if let Err(e) = self.platform.set_frequency_limit(None, t.max_freq_khz) {
            log::warn!("SUSPEND FREQUENCY CAP FAILED: {:#}", e);
        }
        log::info!(
            "SUSPENDED: {} CORE(S) ONLINE, MAX {} KHZ",
            self.state.online_cores,
            self.state.suspend_freq_khz
        );
    }

    // DISPLAY ON: EVERYTHING UP REGARDLESS OF LOAD, THEN UNCAP
    pub fn resume(&mut self, now_ms: u64) {
        let t = self.suspend.display_on();
        self.refresh_online();
        let action = self.applicable(t.action);
        self.execute(action, now_ms);
        if let Err(e) = self.platform.set_frequency_limit(None, t.max_freq_khz) {
            log::warn!("FREQUENCY CAP REMOVAL FAILED: {:#}", e);
        }
        log::info!("RESUMED: {} CORE(S) ONLINE", self.state.online_cores);
    }

    // LEAVE THE MACHINE AT FULL CAPACITY ON EXIT
    pub fn release(&mut self) -> Result<()> {
        let up = self.cores.online_all(&mut self.platform);
        if !up.is_empty() {
            log::info!("CPU {} RESTORED", fmt_cpus(&up));
        }
        self.refresh_online();
        self.platform.set_frequency_limit(None, None)
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn power_state(&self) -> PowerState {
        self.suspend.state()
    }

    pub fn history(&self) -> &LoadHistory {
        &self.history
    }

    pub fn scaler(&self) -> &TunableScaler {
        &self.scaler
    }

    pub fn cores(&self) -> &CoreController {
        &self.cores
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    // CONFIGURATION SURFACE. NO VALIDATION: ANY VALUE IS TAKEN AS-IS.

    pub fn thresholds(&self) -> Thresholds {
        self.state.thresholds
    }

    pub fn first_level(&self) -> u32 {
        self.state.thresholds.first
    }

    pub fn set_first_level(&mut self, value: u32) {
        self.state.thresholds.first = value;
    }

    pub fn second_level(&self) -> u32 {
        self.state.thresholds.second
    }

    pub fn set_second_level(&mut self, value: u32) {
        self.state.thresholds.second = value;
    }

    pub fn third_level(&self) -> u32 {
        self.state.thresholds.third
    }

    pub fn set_third_level(&mut self, value: u32) {
        self.state.thresholds.third = value;
    }

    pub fn suspend_frequency(&self) -> u32 {
        self.state.suspend_freq_khz
    }

    pub fn set_suspend_frequency(&mut self, khz: u32) {
        self.state.suspend_freq_khz = khz;
    }
}

fn fmt_cpus(cpus: &[u32]) -> String {
    if cpus.is_empty() {
        return "NONE".to_string();
    }
    cpus.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(",")
}
