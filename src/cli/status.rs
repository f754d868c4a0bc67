use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use coreplug::display::detect_display_probe;
use coreplug::platform::{Platform, SysfsPlatform};

// ONE-SHOT SNAPSHOT: TOPOLOGY, FREQUENCIES, ONE SECOND OF LOAD, DISPLAY
pub fn run_status(sysfs_root: &Path, governor_dir: &Path, backlight_root: &Path) -> Result<()> {
    let mut platform = SysfsPlatform::new(sysfs_root, governor_dir)?;

    let present = platform.present_cores();
    let online = platform.online_cores();
    println!("COREPLUG STATUS");
    println!("CORES:           {} ONLINE / {} PRESENT", online.len(), present.len());
    println!();

    println!("{:<6} {:<8} {:<12} {:<12} {:<12}", "CPU", "STATE", "CUR_KHZ", "LIMIT_KHZ", "MAX_KHZ");
    println!("{}", "-".repeat(54));
    for &cpu in &present {
        let up = online.contains(&cpu);
        let show = |leaf: &str| {
            platform
                .read_cpufreq(cpu, leaf)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        let (cur, limit, max) = if up {
            (show("scaling_cur_freq"), show("scaling_max_freq"), show("cpuinfo_max_freq"))
        } else {
            ("-".to_string(), "-".to_string(), "-".to_string())
        };
        println!("{:<6} {:<8} {:<12} {:<12} {:<12}",
            cpu, if up { "ONLINE" } else { "OFFLINE" }, cur, limit, max);
    }
    println!();

    // FIRST READ ONLY PRIMES THE /proc/stat DELTA
    platform.current_load();
    std::thread::sleep(Duration::from_secs(1));
    let load = platform.current_load();
    println!("LOAD AT MAX FREQ: {} (SUM OVER {} ONLINE)", load, platform.online_core_count());

    match detect_display_probe(backlight_root) {
        Some(p) => {
            let state = match p.read_display_on() {
                Some(true) => "ON",
                Some(false) => "OFF",
                None => "UNREADABLE",
            };
            println!("DISPLAY:          {} ({})", state, p.path().display());
        }
        None => println!("DISPLAY:          NO PROBE"),
    }

    Ok(())
}
