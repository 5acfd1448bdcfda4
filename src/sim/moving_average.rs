//! Sliding-window moving averages over per-tick samples.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use crate::telemetry::{StateTree, StateValue};

/// Bounded window, newest sample first. Storage grows with the samples.
#[derive(Debug, Clone)]
struct Window {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl Window {
    fn bounded(capacity: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            capacity,
        }
    }

    fn push(&mut self, value: f64) {
        self.samples.push_front(value);
        while self.samples.len() > self.capacity {
            self.samples.pop_back();
        }
    }

    fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }
}

/// Tracks moving averages for a set of fields over several periods.
///
/// Windows are created up front for every `(field, period)` pair; a period of
/// `p` minutes ticked every `run_interval` holds `p * 60 / run_interval`
/// samples (at least one).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use prosumer_sim::sim::moving_average::MovingAverageTracker;
///
/// let mut tracker = MovingAverageTracker::new(&["power"], &[1], Duration::from_secs(30));
/// for v in [1.0, 2.0, 3.0] {
///     tracker.record("power", v);
/// }
/// // One minute at 30s ticks keeps the two newest samples.
/// assert_eq!(tracker.average("power", 1), Some(2.5));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MovingAverageTracker {
    windows: BTreeMap<(String, u32), Window>,
}

impl MovingAverageTracker {
    /// Creates windows for every field and period in minutes.
    pub fn new<S: AsRef<str>>(fields: &[S], periods: &[u32], run_interval: Duration) -> Self {
        let mut windows = BTreeMap::new();
        for field in fields {
            for &period in periods {
                let capacity = Self::window_capacity(period, run_interval);
                windows.insert(
                    (field.as_ref().to_string(), period),
                    Window::bounded(capacity),
                );
            }
        }
        Self { windows }
    }

    /// Number of samples a `period_minutes` window holds at `run_interval`.
    pub fn window_capacity(period_minutes: u32, run_interval: Duration) -> usize {
        let interval = run_interval.as_secs_f64();
        if interval <= 0.0 {
            return 1;
        }
        ((f64::from(period_minutes) * 60.0 / interval).floor() as usize).max(1)
    }

    /// Pushes `value` into every window registered for `field`.
    ///
    /// Unregistered fields are ignored.
    pub fn record(&mut self, field: &str, value: f64) {
        for ((name, _), window) in self.windows.iter_mut() {
            if name == field {
                window.push(value);
            }
        }
    }

    /// Current mean for `field` over `period` minutes, if any sample was recorded.
    pub fn average(&self, field: &str, period: u32) -> Option<f64> {
        self.windows
            .get(&(field.to_string(), period))
            .and_then(Window::mean)
    }

    /// Number of samples currently held for `field` over `period` minutes.
    pub fn sample_count(&self, field: &str, period: u32) -> usize {
        self.windows
            .get(&(field.to_string(), period))
            .map_or(0, |w| w.samples.len())
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Averages as a state tree: `{"<period>m": {"<field>": mean}}`.
    ///
    /// Windows without samples are left out.
    pub fn to_state(&self) -> StateTree {
        let mut tree = StateTree::new();
        for ((field, period), window) in &self.windows {
            let Some(mean) = window.mean() else {
                continue;
            };
            let entry = tree
                .entry(format!("{period}m"))
                .or_insert_with(|| StateValue::Tree(StateTree::new()));
            if let StateValue::Tree(per_field) = entry {
                per_field.insert(field.clone(), StateValue::Float(mean));
            }
        }
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn capacity_follows_period_and_interval() {
        assert_eq!(MovingAverageTracker::window_capacity(5, secs(1)), 300);
        assert_eq!(MovingAverageTracker::window_capacity(15, secs(60)), 15);
        assert_eq!(MovingAverageTracker::window_capacity(1, secs(120)), 1);
        assert_eq!(MovingAverageTracker::window_capacity(1, Duration::ZERO), 1);
    }

    #[test]
    fn window_never_exceeds_capacity() {
        let mut tracker = MovingAverageTracker::new(&["power"], &[1], secs(20));
        for i in 0..10 {
            tracker.record("power", i as f64);
            assert!(tracker.sample_count("power", 1) <= 3);
        }
        assert_eq!(tracker.sample_count("power", 1), 3);
    }

    #[test]
    fn long_periods_do_not_reserve_their_capacity() {
        let mut tracker = MovingAverageTracker::new(&["power"], &[u32::MAX], secs(1));
        tracker.record("power", 2.5);
        assert_eq!(tracker.sample_count("power", u32::MAX), 1);
        assert_eq!(tracker.average("power", u32::MAX), Some(2.5));
    }

    #[test]
    fn oldest_sample_is_evicted_after_window_fills() {
        let mut tracker = MovingAverageTracker::new(&["power"], &[1], secs(20));
        for v in [3.0, 6.0, 9.0] {
            tracker.record("power", v);
        }
        assert_eq!(tracker.average("power", 1), Some(6.0));

        tracker.record("power", 12.0);
        assert_eq!(tracker.average("power", 1), Some(9.0));

        tracker.record("power", 15.0);
        assert_eq!(tracker.average("power", 1), Some(12.0));
    }

    #[test]
    fn periods_are_tracked_independently() {
        let mut tracker = MovingAverageTracker::new(&["power"], &[1, 2], secs(30));
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            tracker.record("power", v);
        }
        assert_eq!(tracker.average("power", 1), Some(4.5));
        assert_eq!(tracker.average("power", 2), Some(3.5));
    }

    #[test]
    fn unknown_fields_and_periods_have_no_average() {
        let mut tracker = MovingAverageTracker::new(&["power"], &[5], secs(1));
        tracker.record("voltage", 230.0);
        assert_eq!(tracker.average("voltage", 5), None);
        assert_eq!(tracker.average("power", 15), None);
        assert_eq!(tracker.average("power", 5), None);
    }

    #[test]
    fn state_groups_by_period() {
        let mut tracker = MovingAverageTracker::new(&["power"], &[5, 15], secs(1));
        tracker.record("power", 2.0);
        let state = tracker.to_state();

        let Some(StateValue::Tree(five)) = state.get("5m") else {
            panic!("missing 5m entry: {state:?}");
        };
        assert_eq!(five.get("power"), Some(&StateValue::Float(2.0)));
        assert!(state.contains_key("15m"));
    }

    #[test]
    fn empty_tracker_has_empty_state() {
        let tracker = MovingAverageTracker::new::<&str>(&[], &[5], secs(1));
        assert!(tracker.is_empty());
        assert!(tracker.to_state().is_empty());
    }
}
