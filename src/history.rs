// COREPLUG LOAD HISTORY
// FIXED RING OF THE LAST 8 LOAD SAMPLES. FILTERS SHORT SPIKES AND DIPS.
//
// THE AVERAGE ALWAYS DIVIDES BY THE FULL CAPACITY. SLOTS START AT ZERO,
// SO THE FIRST 7 AVERAGES AFTER STARTUP READ LOW.

use crate::tuning::HISTORY_SIZE;

pub struct LoadHistory {
    samples: [u32; HISTORY_SIZE],
    cursor: usize,
}

impl Default for LoadHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadHistory {
    pub fn new() -> Self {
        Self {
            samples: [0; HISTORY_SIZE],
            cursor: 0,
        }
    }

    // STORE A SAMPLE, ADVANCE THE CURSOR, RETURN THE TRUNCATED AVERAGE
    pub fn record(&mut self, sample: u32) -> u32 {
        self.samples[self.cursor] = sample;
        self.cursor = (self.cursor + 1) % HISTORY_SIZE;

        let sum: u64 = self.samples.iter().map(|&s| u64::from(s)).sum();
        (sum / HISTORY_SIZE as u64) as u32
    }

    pub fn samples(&self) -> &[u32; HISTORY_SIZE] {
        &self.samples
    }
}
