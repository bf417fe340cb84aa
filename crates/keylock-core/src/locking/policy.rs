//! Wait-policy helpers
//!
//! The staleness-aware policy only gives up on a lease whose holder token
//! stays the same across two full lease windows. A token that keeps changing
//! means the lock is cycling between live holders, which is contention rather
//! than abandonment.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of looking at the current holder once a window has elapsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// A new window was opened; keep waiting
    Rearmed,
    /// The same holder has occupied the lease for two full windows
    Stale { holder: String },
}

/// Shortest pause between two polls of a busy lease
pub const MIN_PAUSE: Duration = Duration::from_millis(1);

/// Tracks the lease holder across observation windows
#[derive(Debug, Clone)]
pub struct StalenessDetector {
    window: Duration,
    /// `None` when the window reaches past the clock's range
    deadline: Option<Instant>,
    baseline: Option<String>,
    windows_elapsed: u32,
}

impl StalenessDetector {
    /// Open the first window at `now`
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            deadline: now.checked_add(window),
            baseline: None,
            windows_elapsed: 0,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn deadline_passed(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Holder token recorded at the last window crossing
    pub fn baseline(&self) -> Option<&str> {
        self.baseline.as_deref()
    }

    /// Number of windows that have closed so far
    pub fn windows_elapsed(&self) -> u32 {
        self.windows_elapsed
    }

    /// Record the holder seen after the deadline passed.
    ///
    /// The first crossing only records a baseline. Later crossings report
    /// [`Observation::Stale`] when the holder matches the baseline; an absent
    /// holder never counts as stale.
    pub fn observe(&mut self, holder: Option<String>, now: Instant) -> Observation {
        let first_crossing = self.windows_elapsed == 0;
        self.windows_elapsed += 1;

        if !first_crossing {
            if let Some(current) = holder.as_deref() {
                if self.baseline.as_deref() == Some(current) {
                    return Observation::Stale {
                        holder: current.to_string(),
                    };
                }
            }
        }

        self.baseline = holder;
        self.deadline = now.checked_add(self.window);
        Observation::Rearmed
    }
}

/// Uniformly random pause in `[MIN_PAUSE, max)`, or `MIN_PAUSE` when `max`
/// is not above it
pub fn jitter(max: Duration) -> Duration {
    let floor = u64::try_from(MIN_PAUSE.as_nanos()).unwrap_or(u64::MAX);
    let bound = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
    if bound <= floor {
        return MIN_PAUSE;
    }
    Duration::from_nanos(rand::thread_rng().gen_range(floor..bound))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(1);

    #[test]
    fn test_deadline_starts_one_window_out() {
        let start = Instant::now();
        let detector = StalenessDetector::new(WINDOW, start);

        assert!(!detector.deadline_passed(start));
        assert!(detector.deadline_passed(start + WINDOW));
        assert_eq!(detector.windows_elapsed(), 0);
        assert_eq!(detector.baseline(), None);
    }

    #[test]
    fn test_first_crossing_records_baseline() {
        let start = Instant::now();
        let mut detector = StalenessDetector::new(WINDOW, start);

        let now = start + WINDOW;
        assert_eq!(
            detector.observe(Some("a".to_string()), now),
            Observation::Rearmed
        );
        assert_eq!(detector.baseline(), Some("a"));
        assert_eq!(detector.deadline(), Some(now + WINDOW));
    }

    #[test]
    fn test_same_holder_twice_is_stale() {
        let start = Instant::now();
        let mut detector = StalenessDetector::new(WINDOW, start);

        detector.observe(Some("a".to_string()), start + WINDOW);
        assert_eq!(
            detector.observe(Some("a".to_string()), start + WINDOW * 2),
            Observation::Stale {
                holder: "a".to_string()
            }
        );
    }

    #[test]
    fn test_cycling_holder_is_never_stale() {
        let start = Instant::now();
        let mut detector = StalenessDetector::new(WINDOW, start);

        for (i, holder) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            let now = start + WINDOW * (i as u32 + 1);
            assert_eq!(
                detector.observe(Some(holder.to_string()), now),
                Observation::Rearmed
            );
        }
        assert_eq!(detector.baseline(), Some("e"));
        assert_eq!(detector.windows_elapsed(), 5);
    }

    #[test]
    fn test_vanished_holder_is_not_stale() {
        let start = Instant::now();
        let mut detector = StalenessDetector::new(WINDOW, start);

        detector.observe(None, start + WINDOW);
        assert_eq!(detector.observe(None, start + WINDOW * 2), Observation::Rearmed);
        assert_eq!(
            detector.observe(Some("a".to_string()), start + WINDOW * 3),
            Observation::Rearmed
        );
    }

    #[test]
    fn test_unrepresentable_window_never_passes() {
        let start = Instant::now();
        let mut detector = StalenessDetector::new(Duration::MAX, start);

        assert_eq!(detector.deadline(), None);
        assert!(!detector.deadline_passed(start + WINDOW * 3600));
        assert_eq!(
            detector.observe(Some("a".to_string()), start + WINDOW),
            Observation::Rearmed
        );
        assert_eq!(detector.deadline(), None);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let max = Duration::from_millis(50);
        for _ in 0..200 {
            let pause = jitter(max);
            assert!(pause >= MIN_PAUSE);
            assert!(pause < max);
        }
    }

    #[test]
    fn test_jitter_never_returns_zero() {
        assert_eq!(jitter(Duration::ZERO), MIN_PAUSE);
        assert_eq!(jitter(Duration::from_nanos(10)), MIN_PAUSE);
    }
}
