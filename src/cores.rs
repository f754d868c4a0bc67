// COREPLUG CORE CONTROLLER
// BRINGS SECONDARY CORES UP AND DOWN THROUGH THE PLATFORM.
// CPU0 IS NEVER TAKEN OFFLINE. EVERY FAILURE IS LOGGED AND THE BATCH
// CONTINUES: A REFUSED CORE SIMPLY STAYS WHERE IT WAS.

use thiserror::Error;

use crate::platform::Platform;
use crate::tuning::PRIMARY_CORE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("CPU{0} IS THE PRIMARY CORE AND STAYS ONLINE")]
    Primary(u32),
    #[error("CPU{0} REFUSED TO COME ONLINE")]
    OnlineRefused(u32),
    #[error("CPU{0} REFUSED TO GO OFFLINE")]
    OfflineRefused(u32),
}

#[derive(Default)]
pub struct CoreController {
    online_failures: u64,
    offline_failures: u64,
}

impl CoreController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bring_online<P: Platform + ?Sized>(
        &mut self,
        platform: &mut P,
        cpu: u32,
    ) -> Result<(), CoreError> {
        if platform.bring_core_online(cpu) {
            log::debug!("CPU{} ONLINE", cpu);
            Ok(())
        } else {
            self.online_failures += 1;
            Err(CoreError::OnlineRefused(cpu))
        }
    }

    pub fn take_offline<P: Platform + ?Sized>(
        &mut self,
        platform: &mut P,
        cpu: u32,
    ) -> Result<(), CoreError> {
        if cpu == PRIMARY_CORE {
            return Err(CoreError::Primary(cpu));
        }
        if platform.take_core_offline(cpu) {
            log::debug!("CPU{} OFFLINE", cpu);
            Ok(())
        } else {
            self.offline_failures += 1;
            Err(CoreError::OfflineRefused(cpu))
        }
    }

    // EVERY OFFLINE SECONDARY, ASCENDING. RETURNS THE CORES THAT CAME UP.
    pub fn online_all<P: Platform + ?Sized>(&mut self, platform: &mut P) -> Vec<u32> {
        let mut changed = Vec::new();
        for cpu in secondaries(platform) {
            if platform.core_online(cpu) {
                continue;
            }
            match self.bring_online(platform, cpu) {
                Ok(()) => changed.push(cpu),
                Err(e) => log::warn!("{}", e),
            }
        }
        changed
    }

    // LOWEST-NUMBERED OFFLINE SECONDARY ONLY
    pub fn online_next<P: Platform + ?Sized>(&mut self, platform: &mut P) -> Option<u32> {
        let cpu = secondaries(platform).into_iter().find(|&cpu| !platform.core_online(cpu))?;
        match self.bring_online(platform, cpu) {
            Ok(()) => Some(cpu),
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    }

    // EVERY ONLINE SECONDARY. RETURNS THE CORES THAT WENT DOWN.
    pub fn offline_secondaries<P: Platform + ?Sized>(&mut self, platform: &mut P) -> Vec<u32> {
        let mut changed = Vec::new();
        for cpu in secondaries(platform) {
            if !platform.core_online(cpu) {
                continue;
            }
            match self.take_offline(platform, cpu) {
                Ok(()) => changed.push(cpu),
                Err(e) => log::warn!("{}", e),
            }
        }
        changed
    }

    // HIGHEST-NUMBERED ONLINE SECONDARY ONLY
    pub fn offline_last<P: Platform + ?Sized>(&mut self, platform: &mut P) -> Option<u32> {
        let cpu = secondaries(platform)
            .into_iter()
            .rev()
            .find(|&cpu| platform.core_online(cpu))?;
        match self.take_offline(platform, cpu) {
            Ok(()) => Some(cpu),
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    }

    pub fn online_failures(&self) -> u64 {
        self.online_failures
    }

    pub fn offline_failures(&self) -> u64 {
        self.offline_failures
    }
}

// ASCENDING REAL IDS MINUS CPU0. PRESENT LISTS CAN HAVE HOLES ("0,2-3").
fn secondaries<P: Platform + ?Sized>(platform: &P) -> Vec<u32> {
    let mut ids = platform.core_ids();
    ids.retain(|&cpu| cpu != PRIMARY_CORE);
    ids
}
