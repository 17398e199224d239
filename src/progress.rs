/// Counts finished tasks against the total for one run.
///
/// `completed` only ever grows and never exceeds `total`, so the derived
/// percentage is non-decreasing within a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Progress {
    completed: usize,
    total: usize,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self { completed: 0, total }
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Count one terminal transition. Returns `false` when the count was
    /// already saturated.
    pub fn record_terminal(&mut self) -> bool {
        if self.completed >= self.total {
            return false;
        }
        self.completed += 1;
        true
    }

    /// Force completion at the end of a run.
    pub fn finish(&mut self) {
        self.completed = self.total;
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let percent = (self.completed as f64 / self.total as f64 * 100.0).round();
        percent.min(100.0) as u8
    }
}
