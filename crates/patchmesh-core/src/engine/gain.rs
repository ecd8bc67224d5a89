//! Mixer gain matrix shared between the control thread and the kernel
//!
//! One `i32` cell per (sink, source) pair in hundredths of a dB. The control
//! thread stores, the real-time kernel loads, both with relaxed ordering:
//! every cell is independently meaningful and a few buffers of staleness are
//! inaudible.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::types::{gain_from_db, GAIN_NOT_MIXED, PORT_MAX};

/// PORT_MAX × PORT_MAX atomic gain cells, indexed `[sink][source]`
pub struct GainMatrix {
    cells: Box<[[AtomicI32; PORT_MAX]; PORT_MAX]>,
}

impl GainMatrix {
    /// A matrix with every pair "not mixed"
    pub fn new() -> Self {
        Self {
            cells: Box::new(std::array::from_fn(|_| {
                std::array::from_fn(|_| AtomicI32::new(GAIN_NOT_MIXED))
            })),
        }
    }

    /// Unity on the diagonal, everything else not mixed
    pub fn identity(channels: usize) -> Self {
        let matrix = Self::new();
        for channel in 0..channels.min(PORT_MAX) {
            matrix.set(channel, channel, 0);
        }
        matrix
    }

    /// Gain of `source` into `sink`; out-of-range pairs are not mixed
    #[inline]
    pub fn get(&self, sink: usize, source: usize) -> i32 {
        self.cells
            .get(sink)
            .and_then(|row| row.get(source))
            .map_or(GAIN_NOT_MIXED, |cell| cell.load(Ordering::Relaxed))
    }

    /// Store a gain; out-of-range pairs are ignored
    #[inline]
    pub fn set(&self, sink: usize, source: usize, centi_db: i32) {
        if let Some(cell) = self.cells.get(sink).and_then(|row| row.get(source)) {
            cell.store(centi_db, Ordering::Relaxed);
        }
    }

    pub fn set_db(&self, sink: usize, source: usize, db: f32) {
        self.set(sink, source, gain_from_db(db));
    }

    /// Mark every pair "not mixed"
    pub fn clear(&self) {
        for cell in self.cells.iter().flatten() {
            cell.store(GAIN_NOT_MIXED, Ordering::Relaxed);
        }
    }

    /// Copy of the top-left `sinks × sources` block
    pub fn snapshot(&self, sources: usize, sinks: usize) -> Vec<Vec<i32>> {
        (0..sinks.min(PORT_MAX))
            .map(|sink| {
                (0..sources.min(PORT_MAX))
                    .map(|source| self.get(sink, source))
                    .collect()
            })
            .collect()
    }

    /// Load rows produced by [`snapshot`](Self::snapshot); cells not
    /// covered keep their value
    pub fn load(&self, rows: &[Vec<i32>]) {
        for (sink, row) in rows.iter().enumerate() {
            for (source, &gain) in row.iter().enumerate() {
                self.set(sink, source, gain);
            }
        }
    }
}

impl Default for GainMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GainMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GainMatrix").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_matrix_is_not_mixed() {
        let gains = GainMatrix::new();
        assert_eq!(gains.get(0, 0), GAIN_NOT_MIXED);
        assert_eq!(gains.get(PORT_MAX - 1, PORT_MAX - 1), GAIN_NOT_MIXED);
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let gains = GainMatrix::new();
        gains.set(PORT_MAX, 0, 0);
        gains.set(0, PORT_MAX, 0);
        assert_eq!(gains.get(PORT_MAX, 0), GAIN_NOT_MIXED);
    }

    #[test]
    fn test_snapshot_and_load() {
        let gains = GainMatrix::identity(2);
        gains.set_db(0, 1, -6.0);
        assert_eq!(gains.snapshot(2, 2), vec![vec![0, -600], vec![GAIN_NOT_MIXED, 0]]);

        let other = GainMatrix::new();
        other.load(&gains.snapshot(2, 2));
        assert_eq!(other.get(0, 1), -600);
        assert_eq!(other.get(1, 1), 0);

        other.clear();
        assert_eq!(other.get(1, 1), GAIN_NOT_MIXED);
    }
}
