// COREPLUG PLATFORM LAYER
// EVERYTHING THE CONTROLLER TOUCHES OUTSIDE ITS OWN MEMORY GOES THROUGH
// THE Platform TRAIT: LOAD SAMPLING, CPU HOTPLUG, FREQUENCY LIMITS AND
// GOVERNOR TUNABLES.
//
// SysfsPlatform DRIVES A REAL LINUX BOX. SimPlatform IS AN IN-MEMORY
// STAND-IN FOR TESTS AND `coreplug simulate`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use regex::Regex;

use crate::tuning::{TunableProfile, PRIMARY_CORE};

pub const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";
pub const INTERACTIVE_GOVERNOR_DIR: &str = "/sys/devices/system/cpu/cpufreq/interactive";
pub const PROC_STAT: &str = "/proc/stat";

pub trait Platform: Send {
    // INSTANTANEOUS LOAD, SUMMED OVER ONLINE CORES, SCALED TO MAX FREQUENCY
    fn current_load(&mut self) -> u32;

    fn core_online(&self, cpu: u32) -> bool;

    fn bring_core_online(&mut self, cpu: u32) -> bool;

    fn take_core_offline(&mut self, cpu: u32) -> bool;

    fn online_core_count(&self) -> u32;

    fn total_core_count(&self) -> u32;

    // EVERY CORE ID THE PLATFORM KNOWS, ASCENDING. IDS MAY HAVE GAPS.
    fn core_ids(&self) -> Vec<u32>;

    // None REMOVES THE LIMIT ON THAT SIDE
    fn set_frequency_limit(&mut self, min_khz: Option<u32>, max_khz: Option<u32>) -> Result<()>;

    fn apply_governor_tunables(&mut self, profile: &TunableProfile) -> Result<()>;
}

// ---------------------------------------------------------------------------
// PARSERS
// ---------------------------------------------------------------------------

// PARSE A KERNEL CPU LIST ("0-3,5,7-8") INTO SORTED IDS
pub fn parse_cpu_range(raw: &str) -> Vec<u32> {
    let mut cpus = Vec::new();
    for range in raw.trim().split(',') {
        let parts: Vec<&str> = range.trim().split('-').collect();
        match parts.len() {
            1 => {
                if let Ok(cpu) = parts[0].parse::<u32>() {
                    cpus.push(cpu);
                }
            }
            2 => {
                if let (Ok(lo), Ok(hi)) = (parts[0].parse::<u32>(), parts[1].parse::<u32>()) {
                    cpus.extend(lo..=hi);
                }
            }
            _ => {}
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    cpus
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

static CPU_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^cpu(\d+)\s+(.+)$").expect("static regex"));

// PER-CPU LINES OF /proc/stat. THE AGGREGATE "cpu" LINE IS SKIPPED.
pub fn parse_proc_stat(raw: &str) -> HashMap<u32, CpuTimes> {
    let mut out = HashMap::new();
    for line in raw.lines() {
        let Some(caps) = CPU_LINE.captures(line) else {
            continue;
        };
        let Ok(cpu) = caps[1].parse::<u32>() else {
            continue;
        };
        // user nice system idle iowait irq softirq steal
        let fields: Vec<u64> = caps[2]
            .split_whitespace()
            .take(8)
            .filter_map(|f| f.parse().ok())
            .collect();
        if fields.len() < 4 {
            continue;
        }
        let total: u64 = fields.iter().sum();
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        out.insert(cpu, CpuTimes { busy: total.saturating_sub(idle), total });
    }
    out
}

// BUSY PERCENTAGE OVER THE INTERVAL, WEIGHTED BY cur_khz / max_khz.
// A CORE PINNED AT HALF ITS MAX CLOCK AND 100% BUSY REPORTS 50.
pub fn load_at_max_freq(prev: CpuTimes, cur: CpuTimes, cur_khz: u32, max_khz: u32) -> u32 {
    let dt = cur.total.saturating_sub(prev.total);
    if dt == 0 {
        return 0;
    }
    let busy = cur.busy.saturating_sub(prev.busy).min(dt);
    let pct = busy * 100 / dt;
    if max_khz == 0 {
        return pct as u32;
    }
    (pct * u64::from(cur_khz.min(max_khz)) / u64::from(max_khz)) as u32
}

// ---------------------------------------------------------------------------
// SYSFS
// ---------------------------------------------------------------------------

pub struct SysfsPlatform {
    cpu_root: PathBuf,
    governor_dir: PathBuf,
    proc_stat: PathBuf,
    prev: HashMap<u32, CpuTimes>,
}

impl SysfsPlatform {
    pub fn new(cpu_root: impl Into<PathBuf>, governor_dir: impl Into<PathBuf>) -> Result<Self> {
        let cpu_root = cpu_root.into();
        let present = cpu_root.join("present");
        fs::read_to_string(&present)
            .with_context(|| format!("CANNOT READ {}", present.display()))?;
        Ok(Self {
            cpu_root,
            governor_dir: governor_dir.into(),
            proc_stat: PathBuf::from(PROC_STAT),
            prev: HashMap::new(),
        })
    }

    pub fn with_proc_stat(mut self, path: impl Into<PathBuf>) -> Self {
        self.proc_stat = path.into();
        self
    }

    pub fn cpu_root(&self) -> &Path {
        &self.cpu_root
    }

    pub fn governor_dir(&self) -> &Path {
        &self.governor_dir
    }

    pub fn present_cores(&self) -> Vec<u32> {
        read_cpu_list(&self.cpu_root.join("present"))
    }

    pub fn online_cores(&self) -> Vec<u32> {
        read_cpu_list(&self.cpu_root.join("online"))
    }

    fn cpufreq_path(&self, cpu: u32, leaf: &str) -> PathBuf {
        self.cpu_root.join(format!("cpu{}", cpu)).join("cpufreq").join(leaf)
    }

    pub fn read_cpufreq(&self, cpu: u32, leaf: &str) -> Option<u32> {
        read_u32(&self.cpufreq_path(cpu, leaf))
    }

    // (cur, max) FOR load_at_max_freq. EITHER SIDE MISSING -> (0, 0), WHICH
    // LEAVES THE BUSY PERCENTAGE UNWEIGHTED.
    fn freq_weight(&self, cpu: u32) -> (u32, u32) {
        let cur = self.read_cpufreq(cpu, "scaling_cur_freq");
        let max = self.read_cpufreq(cpu, "cpuinfo_max_freq");
        match (cur, max) {
            (Some(cur), Some(max)) if max > 0 => (cur, max),
            _ => {
                log::debug!("CPU{} FREQUENCY UNREADABLE, LOAD UNWEIGHTED", cpu);
                (0, 0)
            }
        }
    }

    fn set_online(&mut self, cpu: u32, online: bool) -> bool {
        let path = self.cpu_root.join(format!("cpu{}", cpu)).join("online");
        match fs::write(&path, if online { "1" } else { "0" }) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("WRITE {} FAILED: {}", path.display(), e);
                false
            }
        }
    }
}

fn read_cpu_list(path: &Path) -> Vec<u32> {
    fs::read_to_string(path)
        .map(|raw| parse_cpu_range(&raw))
        .unwrap_or_default()
}

fn read_u32(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn write_value(path: &Path, value: u32) -> Result<()> {
    fs::write(path, value.to_string())
        .with_context(|| format!("WRITE {} -> {}", value, path.display()))
}

impl Platform for SysfsPlatform {
    fn current_load(&mut self) -> u32 {
        let raw = match fs::read_to_string(&self.proc_stat) {
            Ok(raw) => raw,
            Err(e) => {
                log::debug!("READ {} FAILED: {}", self.proc_stat.display(), e);
                return 0;
            }
        };
        let times = parse_proc_stat(&raw);

        let mut load = 0u32;
        for cpu in self.online_cores() {
            let (Some(cur), Some(prev)) = (times.get(&cpu), self.prev.get(&cpu)) else {
                continue;
            };
            let (cur_khz, max_khz) = self.freq_weight(cpu);
            load = load.saturating_add(load_at_max_freq(*prev, *cur, cur_khz, max_khz));
        }

        self.prev = times;
        load
    }

    fn core_online(&self, cpu: u32) -> bool {
        self.online_cores().contains(&cpu)
    }

    fn bring_core_online(&mut self, cpu: u32) -> bool {
        self.set_online(cpu, true)
    }

    fn take_core_offline(&mut self, cpu: u32) -> bool {
        if cpu == PRIMARY_CORE {
            return false;
        }
        self.set_online(cpu, false)
    }

    fn online_core_count(&self) -> u32 {
        self.online_cores().len() as u32
    }

    fn total_core_count(&self) -> u32 {
        self.present_cores().len() as u32
    }

    fn core_ids(&self) -> Vec<u32> {
        self.present_cores()
    }

    fn set_frequency_limit(&mut self, min_khz: Option<u32>, max_khz: Option<u32>) -> Result<()> {
        let mut failed = 0usize;
        let mut last_err = None;

        for cpu in self.online_cores() {
            let max = max_khz.or_else(|| self.read_cpufreq(cpu, "cpuinfo_max_freq"));
            let min = min_khz.or_else(|| self.read_cpufreq(cpu, "cpuinfo_min_freq"));
            let writes = [("scaling_max_freq", max), ("scaling_min_freq", min)];
            for (leaf, value) in writes {
                let Some(value) = value else {
                    continue;
                };
                if let Err(e) = write_value(&self.cpufreq_path(cpu, leaf), value) {
                    failed += 1;
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(e.context(format!("{} FREQUENCY LIMIT WRITES FAILED", failed))),
            None => Ok(()),
        }
    }

    fn apply_governor_tunables(&mut self, profile: &TunableProfile) -> Result<()> {
        // TIME KNOBS ARE MILLISECONDS IN THE PROFILE, MICROSECONDS IN SYSFS
        let writes = [
            ("above_hispeed_delay", profile.above_hispeed_delay.saturating_mul(1000)),
            ("go_hispeed_load", profile.go_hispeed_load),
            ("timer_rate", profile.timer_rate.saturating_mul(1000)),
            ("min_sample_time", profile.min_sample_time.saturating_mul(1000)),
        ];
        let mut failed = Vec::new();
        for (leaf, value) in writes {
            if write_value(&self.governor_dir.join(leaf), value).is_err() {
                failed.push(leaf);
            }
        }
        if !failed.is_empty() {
            bail!("GOVERNOR TUNABLES NOT WRITTEN: {}", failed.join(", "));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SIMULATION
// ---------------------------------------------------------------------------

pub struct SimPlatform {
    online: Vec<bool>,
    loads: VecDeque<u32>,
    idle_load: u32,
    failing: HashSet<u32>,
    freq_limits: Vec<(Option<u32>, Option<u32>)>,
    profiles: Vec<TunableProfile>,
    online_requests: Vec<u32>,
    offline_requests: Vec<u32>,
}

impl SimPlatform {
    // total CORES, THE FIRST online OF THEM UP. CPU0 IS ALWAYS UP.
    pub fn new(total: u32, online: u32) -> Self {
        let total = total.max(1);
        let online = online.clamp(1, total);
        Self {
            online: (0..total).map(|cpu| cpu < online).collect(),
            loads: VecDeque::new(),
            idle_load: 0,
            failing: HashSet::new(),
            freq_limits: Vec::new(),
            profiles: Vec::new(),
            online_requests: Vec::new(),
            offline_requests: Vec::new(),
        }
    }

    pub fn push_loads(&mut self, loads: impl IntoIterator<Item = u32>) {
        self.loads.extend(loads);
    }

    // REPORTED ONCE THE SCRIPTED QUEUE RUNS DRY
    pub fn set_idle_load(&mut self, load: u32) {
        self.idle_load = load;
    }

    // REQUESTS FOR THIS CORE FAIL FROM NOW ON
    pub fn fail_core(&mut self, cpu: u32) {
        self.failing.insert(cpu);
    }

    pub fn online_ids(&self) -> Vec<u32> {
        self.online
            .iter()
            .enumerate()
            .filter(|(_, up)| **up)
            .map(|(cpu, _)| cpu as u32)
            .collect()
    }

    pub fn freq_limits(&self) -> &[(Option<u32>, Option<u32>)] {
        &self.freq_limits
    }

    // MAX CAP CURRENTLY IN EFFECT
    pub fn max_freq_limit(&self) -> Option<u32> {
        self.freq_limits.last().and_then(|(_, max)| *max)
    }

    pub fn profiles(&self) -> &[TunableProfile] {
        &self.profiles
    }

    pub fn online_requests(&self) -> &[u32] {
        &self.online_requests
    }

    pub fn offline_requests(&self) -> &[u32] {
        &self.offline_requests
    }

    fn set(&mut self, cpu: u32, up: bool) -> bool {
        if self.failing.contains(&cpu) {
            return false;
        }
        match self.online.get_mut(cpu as usize) {
            Some(slot) => {
                *slot = up;
                true
            }
            None => false,
        }
    }
}

impl Platform for SimPlatform {
    fn current_load(&mut self) -> u32 {
        self.loads.pop_front().unwrap_or(self.idle_load)
    }

    fn core_online(&self, cpu: u32) -> bool {
        self.online.get(cpu as usize).copied().unwrap_or(false)
    }

    fn bring_core_online(&mut self, cpu: u32) -> bool {
        self.online_requests.push(cpu);
        self.set(cpu, true)
    }

    fn take_core_offline(&mut self, cpu: u32) -> bool {
        self.offline_requests.push(cpu);
        if cpu == PRIMARY_CORE {
            return false;
        }
        self.set(cpu, false)
    }

    fn online_core_count(&self) -> u32 {
        self.online.iter().filter(|up| **up).count() as u32
    }

    fn total_core_count(&self) -> u32 {
        self.online.len() as u32
    }

    fn core_ids(&self) -> Vec<u32> {
        (0..self.online.len() as u32).collect()
    }

    fn set_frequency_limit(&mut self, min_khz: Option<u32>, max_khz: Option<u32>) -> Result<()> {
        self.freq_limits.push((min_khz, max_khz));
        Ok(())
    }

    fn apply_governor_tunables(&mut self, profile: &TunableProfile) -> Result<()> {
        self.profiles.push(*profile);
        Ok(())
    }
}
