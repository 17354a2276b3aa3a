//! Size-based write-completion detection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Still within the stability window.
    Pending,
    /// Size unchanged across the required number of polls.
    Stable,
    /// Max wait elapsed while the size was still changing.
    TimedOut,
}

#[derive(Debug, Clone)]
struct Candidate {
    first_seen: Instant,
    last_counted: Instant,
    size: u64,
    unchanged_polls: u32,
}

/// Tracks every candidate independently; a candidate leaves the tracker as
/// soon as it resolves to `Stable` or `TimedOut`.
#[derive(Debug)]
pub struct StabilityTracker {
    required_polls: u32,
    poll_interval: Duration,
    max_wait: Duration,
    candidates: HashMap<PathBuf, Candidate>,
}

impl StabilityTracker {
    pub fn new(required_polls: u32, poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            required_polls: required_polls.max(1),
            poll_interval,
            max_wait,
            candidates: HashMap::new(),
        }
    }

    /// Records the size of `path` at `now`.
    ///
    /// Observations closer together than the poll interval (extra scans
    /// triggered by change notifications) never count towards stability.
    pub fn observe(&mut self, path: &Path, size: u64, now: Instant) -> Observation {
        let Some(candidate) = self.candidates.get_mut(path) else {
            self.candidates.insert(
                path.to_path_buf(),
                Candidate {
                    first_seen: now,
                    last_counted: now,
                    size,
                    unchanged_polls: 0,
                },
            );
            return Observation::Pending;
        };

        if candidate.size != size {
            candidate.size = size;
            candidate.unchanged_polls = 0;
            candidate.last_counted = now;
        } else if now.saturating_duration_since(candidate.last_counted) >= self.poll_interval {
            candidate.unchanged_polls += 1;
            candidate.last_counted = now;
        }

        let outcome = if candidate.unchanged_polls >= self.required_polls {
            Observation::Stable
        } else if now.saturating_duration_since(candidate.first_seen) >= self.max_wait {
            Observation::TimedOut
        } else {
            Observation::Pending
        };

        if outcome != Observation::Pending {
            self.candidates.remove(path);
        }
        outcome
    }

    /// Drops candidates for which `keep` is false.
    pub fn retain(&mut self, mut keep: impl FnMut(&Path) -> bool) {
        self.candidates.retain(|path, _| keep(path));
    }

    pub fn pending(&self) -> usize {
        self.candidates.len()
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    fn tracker() -> StabilityTracker {
        StabilityTracker::new(3, SECOND, Duration::from_secs(10))
    }

    #[test]
    fn test_stable_after_three_unchanged_polls() {
        let mut t = tracker();
        let path = Path::new("/in/a.csv");
        let t0 = Instant::now();

        assert_eq!(t.observe(path, 100, t0), Observation::Pending);
        assert_eq!(t.observe(path, 100, t0 + SECOND), Observation::Pending);
        assert_eq!(t.observe(path, 100, t0 + SECOND * 2), Observation::Pending);
        assert_eq!(t.observe(path, 100, t0 + SECOND * 3), Observation::Stable);
        assert_eq!(t.pending(), 0);
    }

    #[test]
    fn test_growth_resets_the_count() {
        let mut t = tracker();
        let path = Path::new("/in/a.csv");
        let t0 = Instant::now();

        t.observe(path, 100, t0);
        t.observe(path, 100, t0 + SECOND);
        t.observe(path, 100, t0 + SECOND * 2);
        assert_eq!(t.observe(path, 200, t0 + SECOND * 3), Observation::Pending);
        assert_eq!(t.observe(path, 200, t0 + SECOND * 4), Observation::Pending);
        assert_eq!(t.observe(path, 200, t0 + SECOND * 5), Observation::Pending);
        assert_eq!(t.observe(path, 200, t0 + SECOND * 6), Observation::Stable);
    }

    #[test]
    fn test_rapid_rescans_do_not_count() {
        let mut t = tracker();
        let path = Path::new("/in/a.csv");
        let t0 = Instant::now();
        let blip = Duration::from_millis(50);

        t.observe(path, 100, t0);
        for i in 1..10 {
            assert_eq!(t.observe(path, 100, t0 + blip * i), Observation::Pending);
        }
    }

    #[test]
    fn test_still_growing_after_max_wait_times_out() {
        let mut t = tracker();
        let path = Path::new("/in/big.xlsx");
        let t0 = Instant::now();

        for i in 0..10u32 {
            assert_eq!(
                t.observe(path, 1000 * u64::from(i + 1), t0 + SECOND * i),
                Observation::Pending
            );
        }
        assert_eq!(t.observe(path, 99_999, t0 + SECOND * 10), Observation::TimedOut);
        assert_eq!(t.pending(), 0);
    }

    #[test]
    fn test_candidates_are_independent() {
        let mut t = tracker();
        let a = Path::new("/in/a.csv");
        let b = Path::new("/in/b.csv");
        let t0 = Instant::now();

        t.observe(a, 1, t0);
        for i in 1..=3u32 {
            t.observe(b, u64::from(i), t0 + SECOND * i);
            let expected = if i == 3 { Observation::Stable } else { Observation::Pending };
            assert_eq!(t.observe(a, 1, t0 + SECOND * i), expected);
        }
        assert_eq!(t.pending(), 1);

        t.retain(|p| p != b);
        assert_eq!(t.pending(), 0);
    }
}
