use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LaneStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    /// Dead-lettered jobs.
    pub failed: u64,
}

impl LaneStats {
    /// Jobs that still have work ahead of them.
    pub fn pending(&self) -> u64 {
        self.waiting + self.active
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub analyze: LaneStats,
    pub notify: LaneStats,
}

impl QueueStats {
    pub fn is_idle(&self) -> bool {
        self.analyze.pending() == 0 && self.notify.pending() == 0
    }
}
