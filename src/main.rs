// COREPLUG v1.0.0 -- LOAD-DRIVEN CPU HOTPLUG
// ONLINES AND OFFLINES SECONDARY CORES FROM SMOOTHED LOAD, RETUNES THE
// INTERACTIVE GOVERNOR ON EVERY TRANSITION, AND COLLAPSES TO CPU0 WITH A
// FREQUENCY CAP WHILE THE DISPLAY IS OFF.

mod cli;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use coreplug::config::{HotplugConfig, Timing};
use coreplug::display::{detect_display_probe, DisplayEvent, DisplayWatcher, BACKLIGHT_ROOT, POLL_INTERVAL};
use coreplug::engine::OfflinePolicy;
use coreplug::hotplug::Hotplug;
use coreplug::platform::{Platform, SysfsPlatform, INTERACTIVE_GOVERNOR_DIR, SYSFS_CPU_ROOT};
use coreplug::scheduler::Scheduler;
use coreplug::tuning::{
    Thresholds, DEFAULT_FIRST_LEVEL, DEFAULT_SECOND_LEVEL, DEFAULT_SUSPEND_FREQ_KHZ,
    DEFAULT_THIRD_LEVEL, DEFAULT_TICK_MS, WARMUP_TICKS,
};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "coreplug")]
#[command(about = "COREPLUG -- LOAD-DRIVEN CPU HOTPLUG CONTROLLER")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    // DEBUG LOGGING (RUST_LOG OVERRIDES)
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    // RUN THE CONTROLLER UNTIL CTRL+C / SIGTERM
    Run(RunArgs),
    // CHECK KERNEL CONFIG, SYSFS PATHS AND PRIVILEGES
    Check(PathArgs),
    // PRINT TOPOLOGY, FREQUENCIES AND ONE SECOND OF LOAD
    Status(PathArgs),
    // REPLAY A LOAD TRACE AGAINST SIMULATED CORES
    Simulate(SimulateArgs),
}

#[derive(Args)]
struct PathArgs {
    #[arg(long, default_value = SYSFS_CPU_ROOT)]
    sysfs_root: PathBuf,

    #[arg(long, default_value = INTERACTIVE_GOVERNOR_DIR)]
    governor_dir: PathBuf,

    #[arg(long, default_value = BACKLIGHT_ROOT)]
    backlight_root: PathBuf,
}

#[derive(Args)]
struct LevelArgs {
    // HIGH LOAD, PERCENT PER ONLINE CORE
    #[arg(long, default_value_t = DEFAULT_FIRST_LEVEL)]
    first_level: u32,

    // MEDIUM LOAD, PERCENT PER ONLINE CORE
    #[arg(long, default_value_t = DEFAULT_SECOND_LEVEL)]
    second_level: u32,

    // LOW LOAD, PERCENT PER ONLINE CORE
    #[arg(long, default_value_t = DEFAULT_THIRD_LEVEL)]
    third_level: u32,

    // MAX FREQUENCY WHILE THE DISPLAY IS OFF (KHZ)
    #[arg(long, default_value_t = DEFAULT_SUSPEND_FREQ_KHZ)]
    suspend_freq: u32,

    // LOW LOAD TAKES DOWN ALL SECONDARIES OR ONE PER WINDOW
    #[arg(long, value_enum, default_value_t = OfflinePolicy::All)]
    offline_policy: OfflinePolicy,
}

impl LevelArgs {
    fn config(&self) -> HotplugConfig {
        HotplugConfig {
            thresholds: Thresholds {
                first: self.first_level,
                second: self.second_level,
                third: self.third_level,
            },
            suspend_freq_khz: self.suspend_freq,
            offline_policy: self.offline_policy,
        }
    }
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    paths: PathArgs,

    #[command(flatten)]
    levels: LevelArgs,

    // CONTROL PERIOD IN MILLISECONDS
    #[arg(long, default_value_t = DEFAULT_TICK_MS)]
    tick_ms: u64,

    // TICKS BEFORE THE FIRST CYCLE
    #[arg(long, default_value_t = WARMUP_TICKS)]
    warmup_ticks: u64,

    // IGNORE THE BACKLIGHT (NEVER SUSPEND)
    #[arg(long)]
    no_display_watch: bool,

    // LEAVE CORES AND FREQUENCY CAP AS THEY ARE ON EXIT
    #[arg(long)]
    no_restore: bool,

    // DUMP FULL EVENT LOG ON EXIT
    #[arg(long)]
    dump_log: bool,
}

#[derive(Args)]
struct SimulateArgs {
    #[command(flatten)]
    levels: LevelArgs,

    #[arg(long, default_value_t = 4)]
    total: u32,

    #[arg(long, default_value_t = 1)]
    online: u32,

    #[arg(long, default_value_t = DEFAULT_TICK_MS)]
    tick_ms: u64,

    // e.g. "90*8,off,on,10*4"
    trace: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();

    match cli.command {
        Command::Run(args) => run(args),
        Command::Check(p) => cli::check::run_check(&p.sysfs_root, &p.governor_dir, &p.backlight_root),
        Command::Status(p) => cli::status::run_status(&p.sysfs_root, &p.governor_dir, &p.backlight_root),
        Command::Simulate(args) => cli::simulate::run_simulate(
            args.levels.config(),
            args.total,
            args.online,
            args.tick_ms,
            &args.trace,
        )
        .map(|_| ()),
    }
}

fn run(args: RunArgs) -> Result<()> {
    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    let platform = SysfsPlatform::new(&args.paths.sysfs_root, &args.paths.governor_dir)?;
    let config = args.levels.config();
    let timing = Timing::from_tick_ms(args.tick_ms, args.warmup_ticks);

    println!("COREPLUG v1.0.0");
    println!("CORES:           {} ONLINE / {} PRESENT",
             platform.online_core_count(), platform.total_core_count());
    println!("LEVELS:          {}/{}/{} (PER ONLINE CORE)",
             config.thresholds.first, config.thresholds.second, config.thresholds.third);
    println!("SUSPEND FREQ:    {} KHZ", config.suspend_freq_khz);
    println!("OFFLINE POLICY:  {:?}", config.offline_policy);
    println!("TICK:            {} ms (warm-up {} ticks)", timing.tick.as_millis(), timing.warmup_ticks);

    let hotplug = Hotplug::new(platform, config)?;
    let mut sched = Scheduler::start(hotplug, timing)?;
    let handle = sched.handle();

    let mut watcher = None;
    if args.no_display_watch {
        println!("DISPLAY:         NOT WATCHED");
    } else if let Some(probe) = detect_display_probe(&args.paths.backlight_root) {
        println!("DISPLAY:         {}", probe.path().display());
        let display = handle.clone();
        watcher = Some(DisplayWatcher::spawn(probe, POLL_INTERVAL, move |ev| match ev {
            DisplayEvent::Off => display.on_display_off(),
            DisplayEvent::On => display.on_display_on(),
        })?);
    } else {
        println!("DISPLAY:         PROBE NOT FOUND (ASSUME ON)");
    }
    println!();

    println!("COREPLUG IS ACTIVE (CTRL+C TO EXIT)");
    while !SHUTDOWN.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }
    println!("COREPLUG IS SHUTTING DOWN");

    if let Some(w) = watcher.as_mut() {
        w.stop();
    }
    sched.stop();

    handle.with(|h| {
        if !args.no_restore {
            if let Err(e) = h.release() {
                log::warn!("RESTORE INCOMPLETE: {:#}", e);
            }
        }
        if args.dump_log {
            h.log.dump();
        }
        h.log.summary();
    });

    println!("COREPLUG OUT.");
    Ok(())
}
