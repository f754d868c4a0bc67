// COREPLUG SYSFS ADAPTER TESTS
// FAKE /sys TREES IN A TEMPDIR FOR THE OFFLINE TESTS.
//
// THE #[ignore] TESTS TOUCH REAL CPU HOTPLUG. REQUIRES ROOT.
// RUN: sudo cargo test --test hotplug -- --ignored --test-threads=1

use std::fs;
use std::path::{Path, PathBuf};

use coreplug::config::HotplugConfig;
use coreplug::cores::CoreController;
use coreplug::hotplug::Hotplug;
use coreplug::platform::{Platform, SysfsPlatform, INTERACTIVE_GOVERNOR_DIR, SYSFS_CPU_ROOT};
use coreplug::tuning::LOW_LOAD_PROFILE;

// ---------------------------------------------------------------------------
// FAKE SYSFS
// ---------------------------------------------------------------------------

struct FakeSysfs {
    _dir: tempfile::TempDir,
    cpu_root: PathBuf,
    governor: PathBuf,
    stat: PathBuf,
}

fn write(path: &Path, value: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, value).unwrap();
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap().trim().to_string()
}

// 4 PRESENT, 0-1 ONLINE, 1 GHZ MAX / 300 MHZ MIN
fn fake_sysfs() -> FakeSysfs {
    let dir = tempfile::tempdir().unwrap();
    let cpu_root = dir.path().join("cpu");
    let governor = cpu_root.join("cpufreq").join("interactive");
    let stat = dir.path().join("stat");

    write(&cpu_root.join("present"), "0-3\n");
    write(&cpu_root.join("online"), "0-1\n");
    for cpu in 0..4 {
        let base = cpu_root.join(format!("cpu{}", cpu));
        write(&base.join("online"), if cpu < 2 { "1" } else { "0" });
        let freq = base.join("cpufreq");
        write(&freq.join("cpuinfo_max_freq"), "1000000");
        write(&freq.join("cpuinfo_min_freq"), "300000");
        write(&freq.join("scaling_max_freq"), "1000000");
        write(&freq.join("scaling_min_freq"), "300000");
        write(&freq.join("scaling_cur_freq"), "1000000");
    }
    for leaf in ["above_hispeed_delay", "go_hispeed_load", "timer_rate", "min_sample_time"] {
        write(&governor.join(leaf), "0");
    }
    write(&stat, "cpu  0 0 0 0 0 0 0 0\ncpu0 0 0 0 0 0 0 0 0\ncpu1 0 0 0 0 0 0 0 0\n");

    FakeSysfs { _dir: dir, cpu_root, governor, stat }
}

fn platform(fake: &FakeSysfs) -> SysfsPlatform {
    SysfsPlatform::new(&fake.cpu_root, &fake.governor)
        .unwrap()
        .with_proc_stat(&fake.stat)
}

#[test]
fn counts_from_range_files() {
    let fake = fake_sysfs();
    let p = platform(&fake);
    assert_eq!(p.total_core_count(), 4);
    assert_eq!(p.online_core_count(), 2);
    assert!(p.core_online(1));
    assert!(!p.core_online(2));
}

#[test]
fn missing_root_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(SysfsPlatform::new(dir.path().join("nope"), dir.path()).is_err());
}

#[test]
fn hotplug_writes_online_files() {
    let fake = fake_sysfs();
    let mut p = platform(&fake);
    assert!(p.bring_core_online(2));
    assert_eq!(read(&fake.cpu_root.join("cpu2/online")), "1");
    assert!(p.take_core_offline(1));
    assert_eq!(read(&fake.cpu_root.join("cpu1/online")), "0");
}

#[test]
fn primary_core_never_written() {
    let fake = fake_sysfs();
    let mut p = platform(&fake);
    assert!(!p.take_core_offline(0));
    assert_eq!(read(&fake.cpu_root.join("cpu0/online")), "1");
}

#[test]
fn missing_online_file_fails_request() {
    let fake = fake_sysfs();
    let mut p = platform(&fake);
    assert!(!p.bring_core_online(9));
}

#[test]
fn frequency_cap_hits_online_cores_only() {
    let fake = fake_sysfs();
    let mut p = platform(&fake);
    p.set_frequency_limit(None, Some(702_000)).unwrap();

    for cpu in 0..2 {
        let freq = fake.cpu_root.join(format!("cpu{}/cpufreq", cpu));
        assert_eq!(read(&freq.join("scaling_max_freq")), "702000");
        // NO MIN LIMIT -> HARDWARE FLOOR
        assert_eq!(read(&freq.join("scaling_min_freq")), "300000");
    }
    assert_eq!(read(&fake.cpu_root.join("cpu2/cpufreq/scaling_max_freq")), "1000000");

    p.set_frequency_limit(None, None).unwrap();
    assert_eq!(read(&fake.cpu_root.join("cpu0/cpufreq/scaling_max_freq")), "1000000");
}

#[test]
fn tunables_written_in_microseconds() {
    let fake = fake_sysfs();
    let mut p = platform(&fake);
    p.apply_governor_tunables(&LOW_LOAD_PROFILE).unwrap();
    assert_eq!(read(&fake.governor.join("above_hispeed_delay")), "15000");
    assert_eq!(read(&fake.governor.join("go_hispeed_load")), "99");
    assert_eq!(read(&fake.governor.join("timer_rate")), "25000");
    assert_eq!(read(&fake.governor.join("min_sample_time")), "40000");
}

#[test]
fn tunables_without_governor_dir_fail() {
    let fake = fake_sysfs();
    fs::remove_dir_all(&fake.governor).unwrap();
    let mut p = platform(&fake);
    assert!(p.apply_governor_tunables(&LOW_LOAD_PROFILE).is_err());
}

#[test]
fn load_summed_at_max_frequency() {
    let fake = fake_sysfs();
    let mut p = platform(&fake);
    // FIRST READ PRIMES THE DELTA
    assert_eq!(p.current_load(), 0);

    // CPU0: 50/100 BUSY AT FULL CLOCK. CPU1: 100/100 BUSY AT HALF CLOCK.
    write(&fake.stat, "cpu  150 0 0 50 0 0 0 0\ncpu0 50 0 0 50 0 0 0 0\ncpu1 100 0 0 0 0 0 0 0\n");
    write(&fake.cpu_root.join("cpu1/cpufreq/scaling_cur_freq"), "500000");
    assert_eq!(p.current_load(), 100);
}

#[test]
fn controller_drives_fake_tree() {
    let fake = fake_sysfs();
    let mut h = Hotplug::new(platform(&fake), HotplugConfig::default()).unwrap();
    assert_eq!(h.state().online_cores, 2);
    assert_eq!(h.state().total_cores, 4);

    // IDLE BOX, TWO CORES UP: LOW BAND TAKES CPU1 DOWN
    h.cycle(25_000);
    assert_eq!(read(&fake.cpu_root.join("cpu1/online")), "0");
    assert_eq!(read(&fake.governor.join("go_hispeed_load")), "99");
}

#[test]
fn load_unweighted_when_cur_freq_missing() {
    let fake = fake_sysfs();
    let mut p = platform(&fake);
    p.current_load();

    // CPU1 LOSES scaling_cur_freq: ITS 100% MUST STILL COUNT
    fs::remove_file(fake.cpu_root.join("cpu1/cpufreq/scaling_cur_freq")).unwrap();
    write(&fake.stat, "cpu  150 0 0 50 0 0 0 0\ncpu0 50 0 0 50 0 0 0 0\ncpu1 100 0 0 0 0 0 0 0\n");
    assert_eq!(p.current_load(), 150);
}

// PRESENT "0,2-3": CPU1 DOES NOT EXIST, ONLY CPU0 ONLINE
fn sparse_sysfs() -> FakeSysfs {
    let fake = fake_sysfs();
    fs::remove_dir_all(fake.cpu_root.join("cpu1")).unwrap();
    write(&fake.cpu_root.join("present"), "0,2-3\n");
    write(&fake.cpu_root.join("online"), "0\n");
    fake
}

#[test]
fn sparse_present_list_reaches_every_core() {
    let fake = sparse_sysfs();
    let mut p = platform(&fake);
    assert_eq!(p.core_ids(), vec![0, 2, 3]);
    assert_eq!(p.total_core_count(), 3);

    let mut cores = CoreController::new();
    assert_eq!(cores.online_all(&mut p), vec![2, 3]);
    assert_eq!(cores.online_failures(), 0);
    assert_eq!(read(&fake.cpu_root.join("cpu2/online")), "1");
    assert_eq!(read(&fake.cpu_root.join("cpu3/online")), "1");
}

#[test]
fn sparse_present_list_offline_order() {
    let fake = sparse_sysfs();
    write(&fake.cpu_root.join("online"), "0,2-3\n");
    let mut p = platform(&fake);

    let mut cores = CoreController::new();
    // HIGHEST REAL ID FIRST
    assert_eq!(cores.offline_last(&mut p), Some(3));
    assert_eq!(read(&fake.cpu_root.join("cpu3/online")), "0");

    // THE FAKE TREE DOES NOT REFRESH THE SUMMARY FILE ITSELF
    write(&fake.cpu_root.join("online"), "0,2\n");
    // NEXT IS CPU2, NEVER THE MISSING CPU1
    assert_eq!(cores.offline_last(&mut p), Some(2));
    assert_eq!(cores.offline_failures(), 0);
}

// ---------------------------------------------------------------------------
// REAL HARDWARE
// ---------------------------------------------------------------------------

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

struct CpuGuard {
    cpu: u32,
}

impl Drop for CpuGuard {
    fn drop(&mut self) {
        let path = format!("{}/cpu{}/online", SYSFS_CPU_ROOT, self.cpu);
        let _ = fs::write(path, "1");
    }
}

#[test]
#[ignore]
fn toggles_real_cpu1() {
    if !is_root() {
        eprintln!("SKIPPED: NOT ROOT");
        return;
    }
    let mut p = SysfsPlatform::new(SYSFS_CPU_ROOT, INTERACTIVE_GOVERNOR_DIR).unwrap();
    if p.total_core_count() < 2 {
        eprintln!("SKIPPED: SINGLE CORE");
        return;
    }
    let _guard = CpuGuard { cpu: 1 };

    assert!(p.bring_core_online(1));
    assert!(p.core_online(1));
    let before = p.online_core_count();

    assert!(p.take_core_offline(1), "CPU1 NOT HOTPLUGGABLE");
    assert!(!p.core_online(1));
    assert_eq!(p.online_core_count(), before - 1);

    assert!(p.bring_core_online(1));
    assert_eq!(p.online_core_count(), before);
}
