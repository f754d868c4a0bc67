// COREPLUG EVENT LOG
// ONE SNAPSHOT PER CONTROL CYCLE: SAMPLE, AVERAGE, ONLINE CORES, ACTION.
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION WHILE RUNNING.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.

use crate::engine::{Escalation, LevelAction};

const MAX_SNAPSHOTS: usize = 8192;

#[derive(Clone, Copy)]
pub struct Snapshot {
    pub ts_ms:   u64,
    pub sample:  u32,
    pub average: u32,
    pub online:  u32,
    pub action:  LevelAction,
}

const EMPTY: Snapshot = Snapshot {
    ts_ms: 0,
    sample: 0,
    average: 0,
    online: 0,
    action: LevelAction::Hold,
};

pub struct EventLog {
    snapshots: Vec<Snapshot>,
    head:      usize,
    len:       usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    pub cycles:       usize,
    pub up_all:       usize,
    pub up_one:       usize,
    pub down:         usize,
    pub holds:        usize,
    pub peak_average: u32,
    pub min_online:   u32,
    pub max_online:   u32,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            snapshots: vec![EMPTY; MAX_SNAPSHOTS],
            head: 0,
            len: 0,
        }
    }

    // ONLINE IS THE COUNT AFTER THE ACTION RAN
    pub fn snapshot(&mut self, ts_ms: u64, sample: u32, average: u32, online: u32,
                    action: LevelAction) {
        self.snapshots[self.head] = Snapshot { ts_ms, sample, average, online, action };
        self.head = (self.head + 1) % MAX_SNAPSHOTS;
        if self.len < MAX_SNAPSHOTS {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // ITERATE SNAPSHOTS IN CHRONOLOGICAL ORDER
    pub fn iter_chronological(&self) -> impl Iterator<Item = &Snapshot> {
        let start = if self.len < MAX_SNAPSHOTS { 0 } else { self.head };
        (0..self.len).map(move |i| {
            &self.snapshots[(start + i) % MAX_SNAPSHOTS]
        })
    }

    pub fn tally(&self) -> Tally {
        let mut t = Tally { min_online: u32::MAX, ..Tally::default() };
        for s in self.iter_chronological() {
            t.cycles += 1;
            match s.action {
                LevelAction::Escalate { reason: Escalation::HighLoad } => t.up_all += 1,
                LevelAction::Escalate { reason: Escalation::MediumLoad } => t.up_one += 1,
                LevelAction::DeescalateOne | LevelAction::DeescalateAll => t.down += 1,
                LevelAction::Hold => t.holds += 1,
            }
            t.peak_average = t.peak_average.max(s.average);
            t.min_online = t.min_online.min(s.online);
            t.max_online = t.max_online.max(s.online);
        }
        if t.cycles == 0 {
            t.min_online = 0;
        }
        t
    }

    // DUMP THE TIME SERIES AFTER EXECUTION
    pub fn dump(&self) {
        let mut iter = self.iter_chronological();
        let Some(first) = iter.next() else {
            return;
        };
        let base_ts = first.ts_ms;

        println!("\n{:<10} {:<8} {:<8} {:<8} {:<10}",
            "TIME_S", "SAMPLE", "AVG", "ONLINE", "ACTION");
        println!("{}", "-".repeat(48));

        for s in std::iter::once(first).chain(iter) {
            let elapsed_s = s.ts_ms.saturating_sub(base_ts) as f64 / 1000.0;
            println!("{:<10.1} {:<8} {:<8} {:<8} {:<10}",
                elapsed_s, s.sample, s.average, s.online, s.action.label());
        }

        if self.len == MAX_SNAPSHOTS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} SNAPSHOTS)", MAX_SNAPSHOTS);
        }
        println!("TOTAL SNAPSHOTS: {}", self.len);
    }

    // SUMMARY STATISTICS
    pub fn summary(&self) {
        if self.len < 2 {
            return;
        }
        let t = self.tally();

        let mut iter = self.iter_chronological();
        let first_ts = iter.next().map(|s| s.ts_ms).unwrap_or(0);
        let last_ts = iter.last().map(|s| s.ts_ms).unwrap_or(first_ts);
        let elapsed_s = last_ts.saturating_sub(first_ts) as f64 / 1000.0;

        println!("\n{}", "=".repeat(50));
        println!("COREPLUG SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  CYCLES:            {}", t.cycles);
        println!("  UP (ALL):          {}", t.up_all);
        println!("  UP (ONE):          {}", t.up_one);
        println!("  DOWN:              {}", t.down);
        println!("  HOLDS:             {}", t.holds);
        println!("  PEAK AVERAGE:      {}", t.peak_average);
        println!("  ONLINE RANGE:      {}..{}", t.min_online, t.max_online);
        println!("  ELAPSED:           {:.1}s", elapsed_s);
    }
}
