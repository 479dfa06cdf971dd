//! Progress counters shared between the monitor worker and external writers.
//!
//! Writers:
//! - `admitted_seq`: the monitor worker, from each received decision
//! - `completed_seq`: the pipeline's completion path, via [`ProgressHandle`]
//! - `inhibit_threshold`: whoever reconfigures the monitor while it runs
//!
//! Every field is a single atomic word; nothing here ever blocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::message::TriggerNumber;

/// One consistent-enough read of all three values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub admitted_seq: TriggerNumber,
    pub completed_seq: TriggerNumber,
    pub inhibit_threshold: u64,
}

impl Progress {
    /// Admitted minus completed, or `None` once completion has overtaken admission.
    pub fn backlog(&self) -> Option<u64> {
        self.admitted_seq.checked_sub(self.completed_seq)
    }

    /// Whether the backlog warrants asserting Busy. Never true with threshold 0.
    pub fn is_over_threshold(&self) -> bool {
        self.inhibit_threshold > 0
            && self
                .backlog()
                .is_some_and(|backlog| backlog >= self.inhibit_threshold)
    }
}

#[derive(Debug)]
pub struct ProgressCounters {
    admitted: AtomicU64,
    completed: AtomicU64,
    threshold: AtomicU64,
}

impl ProgressCounters {
    pub fn new(inhibit_threshold: u64) -> Self {
        Self {
            admitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            threshold: AtomicU64::new(inhibit_threshold),
        }
    }

    pub fn admitted_seq(&self) -> TriggerNumber {
        self.admitted.load(Ordering::Acquire)
    }

    pub fn set_admitted_seq(&self, seq: TriggerNumber) {
        self.admitted.store(seq, Ordering::Release);
    }

    pub fn completed_seq(&self) -> TriggerNumber {
        self.completed.load(Ordering::Acquire)
    }

    pub fn set_completed_seq(&self, seq: TriggerNumber) {
        self.completed.store(seq, Ordering::Release);
    }

    pub fn threshold(&self) -> u64 {
        self.threshold.load(Ordering::Acquire)
    }

    pub fn set_threshold(&self, threshold: u64) {
        self.threshold.store(threshold, Ordering::Release);
    }

    pub fn snapshot(&self) -> Progress {
        Progress {
            admitted_seq: self.admitted_seq(),
            completed_seq: self.completed_seq(),
            inhibit_threshold: self.threshold(),
        }
    }
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_INHIBIT_THRESHOLD)
    }
}

/// Cloneable update point for the pipeline's completion path.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    counters: Arc<ProgressCounters>,
}

impl ProgressHandle {
    pub(crate) fn new(counters: Arc<ProgressCounters>) -> Self {
        Self { counters }
    }

    /// Record the trigger number that has just left the processing chain.
    pub fn set_completed_seq(&self, seq: TriggerNumber) {
        self.counters.set_completed_seq(seq);
    }

    pub fn completed_seq(&self) -> TriggerNumber {
        self.counters.completed_seq()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(admitted: u64, completed: u64, threshold: u64) -> Progress {
        Progress {
            admitted_seq: admitted,
            completed_seq: completed,
            inhibit_threshold: threshold,
        }
    }

    #[test]
    fn over_threshold_at_exact_backlog() {
        assert!(progress(10, 5, 5).is_over_threshold());
        assert!(!progress(9, 5, 5).is_over_threshold());
    }

    #[test]
    fn completion_ahead_of_admission_is_never_busy() {
        assert_eq!(progress(3, 8, 1).backlog(), None);
        assert!(!progress(3, 8, 1).is_over_threshold());
    }

    #[test]
    fn zero_threshold_disables() {
        assert!(!progress(1_000, 0, 0).is_over_threshold());
    }

    #[test]
    fn handle_writes_through_to_counters() {
        let counters = Arc::new(ProgressCounters::new(4));
        let handle = ProgressHandle::new(Arc::clone(&counters));

        counters.set_admitted_seq(20);
        handle.set_completed_seq(17);
        counters.set_threshold(2);

        assert_eq!(counters.snapshot(), progress(20, 17, 2));
        assert_eq!(handle.completed_seq(), 17);
    }

    #[test]
    fn completion_updates_from_other_threads() {
        let counters = Arc::new(ProgressCounters::default());
        let handles: Vec<_> = (1..=4u64)
            .map(|n| {
                let handle = ProgressHandle::new(Arc::clone(&counters));
                std::thread::spawn(move || handle.set_completed_seq(n * 10))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!([10, 20, 30, 40].contains(&counters.completed_seq()));
    }
}
