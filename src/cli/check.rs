use std::io::Read;
use std::path::Path;

use anyhow::Result;

use coreplug::display::detect_display_probe;
use coreplug::platform::parse_cpu_range;

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz       NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz       UNREADABLE (SKIPPED)");
        return true;
    }
    let found = kernel_config_has(&config, "CONFIG_HOTPLUG_CPU");
    if found {
        println!("  CONFIG_HOTPLUG_CPU    OK");
    } else {
        println!("  CONFIG_HOTPLUG_CPU    NOT SET -- cores cannot be taken offline");
    }
    found
}

fn kernel_config_has(config: &str, option: &str) -> bool {
    config
        .lines()
        .filter_map(|l| l.split_once('='))
        .any(|(k, v)| k == option && v == "y")
}

fn check_path(label: &str, path: &Path) -> bool {
    let ok = path.exists();
    println!("  {:<22}{} ({})", label, if ok { "OK" } else { "MISSING" }, path.display());
    ok
}

pub fn run_check(sysfs_root: &Path, governor_dir: &Path, backlight_root: &Path) -> Result<()> {
    println!("COREPLUG ENVIRONMENT CHECK");
    println!();

    let mut ok = true;

    println!("KERNEL CONFIG:");
    if !check_kernel_config() {
        ok = false;
    }
    println!();

    println!("CPU HOTPLUG:");
    ok &= check_path("present", &sysfs_root.join("present"));
    ok &= check_path("online", &sysfs_root.join("online"));
    let present = parse_cpu_range(
        &std::fs::read_to_string(sysfs_root.join("present")).unwrap_or_default(),
    );
    let hotpluggable = present
        .iter()
        .filter(|&&cpu| sysfs_root.join(format!("cpu{}", cpu)).join("online").exists())
        .count();
    println!("  {:<22}{} OF {}", "hotpluggable", hotpluggable, present.len());
    if hotpluggable == 0 {
        ok = false;
    }
    println!();

    println!("CPUFREQ:");
    let cpufreq = sysfs_root.join("cpu0").join("cpufreq");
    ok &= check_path("scaling_max_freq", &cpufreq.join("scaling_max_freq"));
    check_path("cpuinfo_max_freq", &cpufreq.join("cpuinfo_max_freq"));
    let governor = std::fs::read_to_string(cpufreq.join("scaling_governor")).unwrap_or_default();
    let governor = governor.trim();
    println!("  {:<22}{}", "governor", if governor.is_empty() { "unknown" } else { governor });
    if !check_path("tunables", governor_dir) {
        println!("  (TUNABLE PROFILES WILL BE SKIPPED)");
    }
    println!();

    println!("DISPLAY:");
    match detect_display_probe(backlight_root) {
        Some(p) => println!("  {:<22}{}", "probe", p.path().display()),
        None => println!("  {:<22}NOT FOUND (ASSUME ON)", "probe"),
    }
    println!();

    if unsafe { libc::geteuid() } != 0 {
        println!("NOT ROOT -- sysfs writes will fail");
        ok = false;
    }

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        std::process::exit(1);
    }

    Ok(())
}
