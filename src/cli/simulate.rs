// OFFLINE REPLAY: FEED A LOAD TRACE THROUGH THE CONTROLLER AGAINST THE
// SIMULATED PLATFORM AND PRINT EVERY DECISION.
//
// TRACE SYNTAX: COMMA OR WHITESPACE SEPARATED STEPS
//   90      ONE CYCLE WITH LOAD 90
//   90*8    EIGHT CYCLES WITH LOAD 90
//   off/on  DISPLAY EVENT (NO CYCLE)

use anyhow::{bail, Context, Result};

use coreplug::config::HotplugConfig;
use coreplug::hotplug::Hotplug;
use coreplug::platform::SimPlatform;
use coreplug::suspend::PowerState;
use coreplug::tuning::WARMUP_TICKS;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceStep {
    Load(u32),
    DisplayOff,
    DisplayOn,
}

pub fn parse_trace(raw: &str) -> Result<Vec<TraceStep>> {
    let mut steps = Vec::new();
    for tok in raw.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty()) {
        match tok.to_ascii_lowercase().as_str() {
            "off" => steps.push(TraceStep::DisplayOff),
            "on" => steps.push(TraceStep::DisplayOn),
            other => {
                let (load, repeat) = match other.split_once('*') {
                    Some((l, n)) => (l, n.parse::<usize>()
                        .with_context(|| format!("BAD REPEAT COUNT IN {:?}", tok))?),
                    None => (other, 1),
                };
                let load = load.parse::<u32>()
                    .with_context(|| format!("BAD TRACE STEP {:?}", tok))?;
                steps.extend(std::iter::repeat(TraceStep::Load(load)).take(repeat));
            }
        }
    }
    if steps.is_empty() {
        bail!("EMPTY TRACE");
    }
    Ok(steps)
}

pub fn run_simulate(
    config: HotplugConfig,
    total: u32,
    online: u32,
    tick_ms: u64,
    trace: &str,
) -> Result<Hotplug<SimPlatform>> {
    let steps = parse_trace(trace)?;
    let mut hotplug = Hotplug::new(SimPlatform::new(total, online), config)?;

    println!("COREPLUG SIMULATION: {} CORES, {} ONLINE, TICK {}MS", total,
             hotplug.state().online_cores, tick_ms);
    println!("{:<8} {:<8} {:<8} {:<8} {:<10} {:<10}",
        "TIME_MS", "LOAD", "AVG", "ONLINE", "ACTION", "PROFILE");
    println!("{}", "-".repeat(56));

    // FIRST CYCLE LANDS AFTER THE WARM-UP
    let mut now_ms = tick_ms.max(1) * WARMUP_TICKS;
    for step in steps {
        match step {
            TraceStep::Load(load) => {
                let suspended = hotplug.power_state() == PowerState::Suspended;
                if !suspended {
                    hotplug.platform_mut().push_loads([load]);
                }
                let pushes = hotplug.scaler().pushes();
                let action = hotplug.cycle(now_ms);
                let profile = match hotplug.scaler().last_applied() {
                    Some(p) if hotplug.scaler().pushes() > pushes => format!(
                        "{}/{}/{}/{}",
                        p.above_hispeed_delay, p.go_hispeed_load, p.timer_rate, p.min_sample_time
                    ),
                    _ => "-".to_string(),
                };
                // SUSPENDED CYCLES ARE NOT LOGGED AND SAMPLE NOTHING
                let avg = if !suspended {
                    hotplug.log.iter_chronological().last().map(|s| s.average.to_string())
                } else {
                    None
                };
                println!("{:<8} {:<8} {:<8} {:<8} {:<10} {:<10}",
                    now_ms, load, avg.unwrap_or_else(|| "-".into()),
                    hotplug.state().online_cores, action.label(), profile);
                now_ms += tick_ms;
            }
            TraceStep::DisplayOff => {
                hotplug.suspend(now_ms);
                println!("{:<8} DISPLAY OFF -> {} ONLINE, MAX {} KHZ", now_ms,
                         hotplug.state().online_cores, hotplug.suspend_frequency());
            }
            TraceStep::DisplayOn => {
                hotplug.resume(now_ms);
                println!("{:<8} DISPLAY ON -> {} ONLINE, UNCAPPED", now_ms,
                         hotplug.state().online_cores);
                // WORKER RESUMES ONE TICK LATER
                now_ms += tick_ms;
            }
        }
    }

    hotplug.log.summary();
    Ok(hotplug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_parsing() {
        let steps = parse_trace("10, 20*2 off\nON").unwrap();
        assert_eq!(steps, vec![
            TraceStep::Load(10),
            TraceStep::Load(20),
            TraceStep::Load(20),
            TraceStep::DisplayOff,
            TraceStep::DisplayOn,
        ]);
    }

    #[test]
    fn trace_rejects_garbage() {
        assert!(parse_trace("10,abc").is_err());
        assert!(parse_trace("10*x").is_err());
        assert!(parse_trace(" , ").is_err());
    }

    #[test]
    fn simulate_end_to_end() {
        let h = run_simulate(HotplugConfig::default(), 4, 1, 1000, "90*8").unwrap();
        assert_eq!(h.platform().online_ids(), vec![0, 1]);
        assert_eq!(h.scaler().pushes(), 1);
    }
}
