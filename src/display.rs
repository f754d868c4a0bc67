// COREPLUG DISPLAY WATCHER
// TURNS BACKLIGHT STATE INTO DISPLAY ON/OFF EVENTS.
//
// PROBE ORDER UNDER /sys/class/backlight/*:
//   bl_power    0 = UNBLANKED (ON), ANYTHING ELSE = OFF
//   brightness  0 = OFF, ANYTHING ELSE = ON
// NO PROBE: NO EVENTS, THE DISPLAY IS ASSUMED ON FOREVER.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};

pub const BACKLIGHT_ROOT: &str = "/sys/class/backlight";
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayProbe {
    BlPower(PathBuf),
    Brightness(PathBuf),
}

impl DisplayProbe {
    pub fn path(&self) -> &Path {
        match self {
            Self::BlPower(p) | Self::Brightness(p) => p,
        }
    }

    pub fn parse(&self, raw: &str) -> Option<bool> {
        let value: u64 = raw.trim().parse().ok()?;
        Some(match self {
            Self::BlPower(_) => value == 0,
            Self::Brightness(_) => value > 0,
        })
    }

    pub fn read_display_on(&self) -> Option<bool> {
        self.parse(&fs::read_to_string(self.path()).ok()?)
    }
}

// bl_power ON ANY DEVICE WINS OVER brightness ON ANY DEVICE.
// DEVICES ARE VISITED IN NAME ORDER.
pub fn detect_display_probe(root: &Path) -> Option<DisplayProbe> {
    let mut devices: Vec<PathBuf> = fs::read_dir(root)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    devices.sort();

    devices
        .iter()
        .map(|d| d.join("bl_power"))
        .find(|p| p.is_file())
        .map(DisplayProbe::BlPower)
        .or_else(|| {
            devices
                .iter()
                .map(|d| d.join("brightness"))
                .find(|p| p.is_file())
                .map(DisplayProbe::Brightness)
        })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayEvent {
    On,
    Off,
}

// EDGE DETECTOR. THE FIRST READING ONLY COUNTS WHEN IT SAYS OFF:
// THE CONTROLLER STARTS OUT ACTIVE, SO "ON" IS NOT NEWS.
#[derive(Default)]
pub struct DisplayEdge {
    last: Option<bool>,
}

impl DisplayEdge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, on: bool) -> Option<DisplayEvent> {
        let prev = self.last.replace(on);
        match (prev, on) {
            (None, false) | (Some(true), false) => Some(DisplayEvent::Off),
            (Some(false), true) => Some(DisplayEvent::On),
            _ => None,
        }
    }
}

pub struct DisplayWatcher {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DisplayWatcher {
    pub fn spawn<F>(probe: DisplayProbe, interval: Duration, mut on_event: F) -> Result<Self>
    where
        F: FnMut(DisplayEvent) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let worker = thread::Builder::new()
            .name("coreplug-display".into())
            .spawn(move || {
                let mut edge = DisplayEdge::new();
                while !stop_flag.load(Ordering::Relaxed) {
                    match probe.read_display_on() {
                        Some(on) => {
                            if let Some(ev) = edge.observe(on) {
                                log::info!("DISPLAY {}", if on { "ON" } else { "OFF" });
                                on_event(ev);
                            }
                        }
                        None => log::debug!("DISPLAY PROBE {} UNREADABLE", probe.path().display()),
                    }
                    thread::park_timeout(interval);
                }
            })
            .context("CANNOT SPAWN DISPLAY WATCHER")?;

        Ok(Self { stop, worker: Some(worker) })
    }

    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.stop.store(true, Ordering::Relaxed);
        worker.thread().unpark();
        if worker.join().is_err() {
            log::error!("DISPLAY WATCHER PANICKED");
        }
    }
}

impl Drop for DisplayWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
