// COREPLUG SCHEDULER
// ONE WORKER THREAD, ONE LOCK.
//
// THE WORKER HOLDS THE LOCK FOR THE WHOLE CYCLE AND ARMS THE NEXT DEADLINE
// ONLY AFTER THE CYCLE RETURNS, SO CYCLES NEVER OVERLAP.
// DISPLAY EVENTS TAKE THE SAME LOCK: AN IN-FLIGHT CYCLE FINISHES FIRST,
// THEN THE TRANSITION RUNS, THEN (ON RESUME) THE WORKER IS RE-ARMED.
//
//   cycle(n) --> suspend --> [NO DEADLINE] --> resume --> +1 TICK --> cycle(n+1)

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};

use crate::config::Timing;
use crate::hotplug::Hotplug;
use crate::platform::Platform;

struct Inner<P: Platform> {
    hotplug: Hotplug<P>,
    // None: DISARMED (SUSPENDED)
    next_due: Option<Instant>,
    shutdown: bool,
    cycles: u64,
}

struct Shared<P: Platform> {
    inner: Mutex<Inner<P>>,
    wake: Condvar,
}

pub struct Scheduler<P: Platform + 'static> {
    shared: Arc<Shared<P>>,
    timing: Timing,
    worker: Option<JoinHandle<()>>,
}

impl<P: Platform + 'static> Scheduler<P> {
    // FIRST CYCLE RUNS AFTER THE WARM-UP
    pub fn start(hotplug: Hotplug<P>, timing: Timing) -> Result<Self> {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                hotplug,
                next_due: Some(Instant::now() + timing.warmup()),
                shutdown: false,
                cycles: 0,
            }),
            wake: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("coreplug-worker".into())
            .spawn(move || worker_loop(worker_shared, timing))
            .context("CANNOT SPAWN HOTPLUG WORKER")?;

        log::info!(
            "WORKER STARTED: TICK {}MS, FIRST CYCLE IN {}MS",
            timing.tick.as_millis(),
            timing.warmup().as_millis()
        );

        Ok(Self { shared, timing, worker: Some(worker) })
    }

    pub fn handle(&self) -> HotplugHandle<P> {
        HotplugHandle { shared: Arc::clone(&self.shared), timing: self.timing }
    }

    // WAITS FOR AN IN-FLIGHT CYCLE, THEN JOINS. IDEMPOTENT.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        {
            let mut inner = self.shared.inner.lock();
            inner.shutdown = true;
            self.shared.wake.notify_all();
        }
        if worker.join().is_err() {
            log::error!("HOTPLUG WORKER PANICKED");
        }
    }
}

impl<P: Platform + 'static> Drop for Scheduler<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<P: Platform>(shared: Arc<Shared<P>>, timing: Timing) {
    let mut inner = shared.inner.lock();
    loop {
        if inner.shutdown {
            break;
        }
        let Some(due) = inner.next_due else {
            shared.wake.wait(&mut inner);
            continue;
        };
        if Instant::now() < due {
            // DEADLINE MAY MOVE WHILE WE SLEEP. RE-CHECK EVERYTHING ON WAKE.
            shared.wake.wait_until(&mut inner, due);
            continue;
        }

        inner.hotplug.cycle(monotonic_ms());
        inner.cycles += 1;
        inner.next_due = Some(Instant::now() + timing.tick);
    }
    log::debug!("WORKER EXITED AFTER {} CYCLES", inner.cycles);
}

// THE ENTRY POINTS OTHER THREADS USE: DISPLAY EVENTS, TUNABLES, INSPECTION
pub struct HotplugHandle<P: Platform> {
    shared: Arc<Shared<P>>,
    timing: Timing,
}

impl<P: Platform> Clone for HotplugHandle<P> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared), timing: self.timing }
    }
}

impl<P: Platform> HotplugHandle<P> {
    pub fn on_display_off(&self) {
        let mut inner = self.shared.inner.lock();
        // CANCEL: NOTHING RUNS UNTIL RESUME RE-ARMS
        inner.next_due = None;
        inner.hotplug.suspend(monotonic_ms());
    }

    pub fn on_display_on(&self) {
        let mut inner = self.shared.inner.lock();
        inner.hotplug.resume(monotonic_ms());
        inner.next_due = Some(Instant::now() + self.timing.resume_delay());
        self.shared.wake.notify_all();
    }

    // RUN f WITH EXCLUSIVE ACCESS, BETWEEN CYCLES
    pub fn with<R>(&self, f: impl FnOnce(&mut Hotplug<P>) -> R) -> R {
        let mut inner = self.shared.inner.lock();
        f(&mut inner.hotplug)
    }

    pub fn cycles(&self) -> u64 {
        self.shared.inner.lock().cycles
    }

    pub fn is_armed(&self) -> bool {
        self.shared.inner.lock().next_due.is_some()
    }

    pub fn first_level(&self) -> u32 {
        self.with(|h| h.first_level())
    }

    pub fn set_first_level(&self, value: u32) {
        self.with(|h| h.set_first_level(value))
    }

    pub fn second_level(&self) -> u32 {
        self.with(|h| h.second_level())
    }

    pub fn set_second_level(&self, value: u32) {
        self.with(|h| h.set_second_level(value))
    }

    pub fn third_level(&self) -> u32 {
        self.with(|h| h.third_level())
    }

    pub fn set_third_level(&self, value: u32) {
        self.with(|h| h.set_third_level(value))
    }

    pub fn suspend_frequency(&self) -> u32 {
        self.with(|h| h.suspend_frequency())
    }

    pub fn set_suspend_frequency(&self, khz: u32) {
        self.with(|h| h.set_suspend_frequency(khz))
    }
}

pub fn monotonic_ms() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1000 + (ts.tv_nsec as u64) / 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HotplugConfig;
    use crate::platform::SimPlatform;
    use crate::tuning::TunableProfile;
    use std::sync::mpsc;
    use std::time::Duration;

    fn fast_timing() -> Timing {
        Timing { tick: Duration::from_millis(5), warmup_ticks: 0, resume_delay_ticks: 1 }
    }

    fn start(total: u32, online: u32) -> Scheduler<SimPlatform> {
        let h = Hotplug::new(SimPlatform::new(total, online), HotplugConfig::default())
            .expect("sim platform has cores");
        Scheduler::start(h, fast_timing()).expect("spawn worker")
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn worker_cycles_and_stops() {
        let mut sched = start(4, 1);
        let handle = sched.handle();
        assert!(wait_for(|| handle.cycles() >= 3));
        sched.stop();
        let after = handle.cycles();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(handle.cycles(), after);
    }

    #[test]
    fn suspend_disarms_until_resume() {
        let mut sched = start(4, 4);
        let handle = sched.handle();
        assert!(wait_for(|| handle.cycles() >= 1));

        handle.on_display_off();
        assert!(!handle.is_armed());
        let frozen = handle.cycles();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(handle.cycles(), frozen);
        assert_eq!(handle.with(|h| h.state().online_cores), 1);

        handle.on_display_on();
        assert!(handle.is_armed());
        assert_eq!(handle.with(|h| h.state().online_cores), 4);
        assert!(wait_for(|| handle.cycles() > frozen));
        sched.stop();
    }

    // === ORDERING AGAINST AN IN-FLIGHT CYCLE ===

    // current_load PARKS UNTIL THE TEST RELEASES IT. THE WORKER HOLDS THE
    // LOCK THE WHOLE TIME, SO THE CYCLE STAYS IN FLIGHT.
    struct GatedPlatform {
        inner: SimPlatform,
        entered: mpsc::Sender<()>,
        release: mpsc::Receiver<()>,
        trace: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Platform for GatedPlatform {
        fn current_load(&mut self) -> u32 {
            let _ = self.entered.send(());
            // SENDER DROPPED -> NO LONGER GATED
            let _ = self.release.recv();
            self.trace.lock().push("cycle");
            self.inner.current_load()
        }

        fn core_online(&self, cpu: u32) -> bool {
            self.inner.core_online(cpu)
        }

        fn bring_core_online(&mut self, cpu: u32) -> bool {
            self.inner.bring_core_online(cpu)
        }

        fn take_core_offline(&mut self, cpu: u32) -> bool {
            self.inner.take_core_offline(cpu)
        }

        fn online_core_count(&self) -> u32 {
            self.inner.online_core_count()
        }

        fn total_core_count(&self) -> u32 {
            self.inner.total_core_count()
        }

        fn core_ids(&self) -> Vec<u32> {
            self.inner.core_ids()
        }

        fn set_frequency_limit(&mut self, min_khz: Option<u32>, max_khz: Option<u32>) -> Result<()> {
            self.trace.lock().push(if max_khz.is_some() { "cap" } else { "uncap" });
            self.inner.set_frequency_limit(min_khz, max_khz)
        }

        fn apply_governor_tunables(&mut self, profile: &TunableProfile) -> Result<()> {
            self.inner.apply_governor_tunables(profile)
        }
    }

    #[test]
    fn display_off_waits_for_in_flight_cycle() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let trace = Arc::new(Mutex::new(Vec::new()));
        let platform = GatedPlatform {
            inner: SimPlatform::new(4, 1),
            entered: entered_tx,
            release: release_rx,
            trace: Arc::clone(&trace),
        };
        // LONG TICK: ONE CYCLE, THEN NOTHING DUE FOR A WHILE
        let timing = Timing {
            tick: Duration::from_millis(200),
            warmup_ticks: 0,
            resume_delay_ticks: 1,
        };
        let h = Hotplug::new(platform, HotplugConfig::default()).expect("four cores");
        let mut sched = Scheduler::start(h, timing).expect("spawn worker");
        let handle = sched.handle();

        // CYCLE 1 IS PARKED INSIDE current_load
        entered_rx.recv_timeout(Duration::from_secs(5)).expect("first cycle started");

        let (done_tx, done_rx) = mpsc::channel();
        let display = handle.clone();
        let off = thread::spawn(move || {
            display.on_display_off();
            let _ = done_tx.send(());
        });

        thread::sleep(Duration::from_millis(30));
        assert!(done_rx.try_recv().is_err(), "suspend ran during a cycle");
        assert!(trace.lock().is_empty());

        release_tx.send(()).expect("worker waiting");
        done_rx.recv_timeout(Duration::from_secs(5)).expect("suspend completed");
        off.join().expect("display thread");

        // CYCLE RETURNED BEFORE THE SUSPEND CAP WAS WRITTEN
        assert_eq!(*trace.lock(), vec!["cycle", "cap"]);
        assert_eq!(handle.cycles(), 1);
        assert!(!handle.is_armed());

        // DISARMED: NO CYCLE STARTS WHILE SUSPENDED, EVEN PAST THE TICK
        assert!(entered_rx.recv_timeout(Duration::from_millis(400)).is_err());
        assert_eq!(handle.cycles(), 1);

        handle.on_display_on();
        entered_rx.recv_timeout(Duration::from_secs(5)).expect("cycle after resume");
        // UNGATE SO THE WORKER CAN FINISH AND STOP
        drop(release_tx);
        sched.stop();

        assert_eq!(handle.cycles(), 2);
        assert_eq!(*trace.lock(), vec!["cycle", "cap", "uncap", "cycle"]);
    }

    #[test]
    fn tunables_through_handle() {
        let mut sched = start(2, 1);
        let handle = sched.handle();
        handle.set_first_level(90);
        handle.set_second_level(60);
        handle.set_third_level(30);
        handle.set_suspend_frequency(300_000);
        assert_eq!(handle.first_level(), 90);
        assert_eq!(handle.second_level(), 60);
        assert_eq!(handle.third_level(), 30);
        assert_eq!(handle.suspend_frequency(), 300_000);
        sched.stop();
    }

    #[test]
    fn monotonic_advances() {
        let a = monotonic_ms();
        thread::sleep(Duration::from_millis(5));
        assert!(monotonic_ms() >= a + 4);
    }
}
