//! Self-gating clocks for the periodic activities.

use crate::config::Timing;
use crate::device::Timestamp;

/// Fires at most once per interval.
#[derive(Debug, Clone, Copy)]
pub struct Gate {
    interval: u64,
    last: Option<Timestamp>,
}

impl Gate {
    pub fn new(interval: u64) -> Self {
        Gate {
            interval,
            last: None,
        }
    }

    /// Check the gate at `now`, arming it for the next interval if it fires.
    ///
    /// A clock that went backwards fires the gate rather than stalling it.
    pub fn due(&mut self, now: Timestamp) -> bool {
        let due = match self.last {
            None => true,
            Some(last) => now < last || now >= last.saturating_add(self.interval),
        };
        if due {
            self.last = Some(now);
        }
        due
    }

    pub fn last(&self) -> Option<Timestamp> {
        self.last
    }
}

/// The global activities of one tick. Per-device probes are paced by the
/// device records themselves.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    pub discovery: Gate,
    pub sweep: Gate,
}

impl Scheduler {
    pub fn new(timing: &Timing) -> Self {
        Scheduler {
            discovery: Gate::new(timing.discovery_interval),
            sweep: Gate::new(timing.sweep_interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_fires_once_per_interval() {
        let mut gate = Gate::new(5);
        assert!(gate.due(100));
        assert!(!gate.due(100));
        assert!(!gate.due(104));
        assert!(gate.due(105));
        assert_eq!(gate.last(), Some(105));
    }

    #[test]
    fn test_late_tick_only_delays() {
        let mut gate = Gate::new(5);
        assert!(gate.due(100));
        assert!(gate.due(117));
        assert!(!gate.due(121));
        assert!(gate.due(122));
    }

    #[test]
    fn test_clock_going_backwards() {
        let mut gate = Gate::new(60);
        assert!(gate.due(1000));
        assert!(gate.due(500));
        assert!(!gate.due(501));
    }
}
