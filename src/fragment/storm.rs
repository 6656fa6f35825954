//! Per-source fragment arrival rate tracking
//!
//! Sliding-window counters keyed by source address. Source-scoped, not
//! group-scoped: a storm spread across many fragment keys from one source
//! still trips the threshold.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Window state for one source
struct SourceWindow {
    arrivals: VecDeque<Instant>,
    /// Suppresses repeat alerts within one window
    last_fired: Option<Instant>,
}

/// Sliding-window rate monitor across all fragment groups of a source
pub struct StormMonitor {
    window: Duration,
    rate_threshold: f64,
    sources: HashMap<Ipv4Addr, SourceWindow>,
}

impl StormMonitor {
    pub fn new(window_secs: u64, rate_threshold: f64) -> Self {
        Self {
            window: Duration::from_secs(window_secs.max(1)),
            rate_threshold,
            sources: HashMap::new(),
        }
    }

    /// Record one fragment arrival; true when the storm threshold is crossed
    /// and no alert fired within the current window yet.
    pub fn record(&mut self, source: Ipv4Addr, now: Instant) -> bool {
        let entry = self.sources.entry(source).or_insert_with(|| SourceWindow {
            arrivals: VecDeque::new(),
            last_fired: None,
        });

        entry.arrivals.push_back(now);
        while let Some(&front) = entry.arrivals.front() {
            if now.duration_since(front) > self.window {
                entry.arrivals.pop_front();
            } else {
                break;
            }
        }

        let rate = entry.arrivals.len() as f64 / self.window.as_secs_f64();
        if rate <= self.rate_threshold {
            return false;
        }

        match entry.last_fired {
            Some(fired) if now.duration_since(fired) < self.window => false,
            _ => {
                entry.last_fired = Some(now);
                true
            }
        }
    }

    /// Drop sources with no arrivals inside the window
    pub fn sweep(&mut self, now: Instant) {
        let window = self.window;
        self.sources.retain(|_, w| {
            w.arrivals
                .back()
                .map(|&last| now.duration_since(last) <= window)
                .unwrap_or(false)
        });
    }

    pub fn tracked_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_per_window() {
        let mut monitor = StormMonitor::new(1, 5.0);
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let now = Instant::now();

        let mut fired = 0;
        for _ in 0..20 {
            if monitor.record(src, now) {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_below_threshold_never_fires() {
        let mut monitor = StormMonitor::new(10, 100.0);
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let now = Instant::now();

        for _ in 0..50 {
            assert!(!monitor.record(src, now));
        }
    }

    #[test]
    fn test_sources_independent() {
        let mut monitor = StormMonitor::new(1, 5.0);
        let now = Instant::now();

        for _ in 0..20 {
            monitor.record(Ipv4Addr::new(10, 0, 0, 1), now);
        }
        // Second source is still quiet
        assert!(!monitor.record(Ipv4Addr::new(10, 0, 0, 2), now));
        assert_eq!(monitor.tracked_sources(), 2);
    }

    #[test]
    fn test_sweep_drops_idle_sources() {
        let mut monitor = StormMonitor::new(1, 5.0);
        let start = Instant::now();
        monitor.record(Ipv4Addr::new(10, 0, 0, 1), start);

        monitor.sweep(start + Duration::from_secs(5));
        assert_eq!(monitor.tracked_sources(), 0);
    }
}
