//! Busy/Free hysteresis with a two-phase transition.
//!
//! A transition is first recorded as `requested`. It becomes `current` only
//! through [`FlowController::mark_sent`], i.e. after the inhibit message
//! announcing it was accepted by the output channel. A request that could not
//! be sent stays pending, and the next evaluation may replace or withdraw it.

use std::time::Duration;

use tokio::time::Instant;

use super::progress::Progress;
use crate::message::FlowState;

#[derive(Debug)]
pub struct FlowController {
    current: FlowState,
    requested: Option<FlowState>,
    last_sent: Instant,
    min_resend_interval: Duration,
}

impl FlowController {
    /// Starts Free. The resend clock starts at `now`, so with a non-zero
    /// interval the first message also waits one interval.
    pub fn new(min_resend_interval: Duration, now: Instant) -> Self {
        Self {
            current: FlowState::Free,
            requested: None,
            last_sent: now,
            min_resend_interval,
        }
    }

    pub fn current(&self) -> FlowState {
        self.current
    }

    pub fn requested(&self) -> Option<FlowState> {
        self.requested
    }

    /// Re-evaluate the backlog and update the pending request.
    ///
    /// With threshold 0 monitoring is off: any pending request is discarded
    /// and the current state is held.
    pub fn evaluate(&mut self, progress: Progress) -> Option<FlowState> {
        if progress.inhibit_threshold == 0 {
            self.requested = None;
            return None;
        }

        let target = if progress.is_over_threshold() {
            FlowState::Busy
        } else {
            FlowState::Free
        };
        self.requested = (target != self.current).then_some(target);
        self.requested
    }

    /// The pending state to announce, if one exists and the resend interval
    /// has elapsed since the last successful send.
    pub fn due(&self, now: Instant) -> Option<FlowState> {
        let target = self.requested.filter(|state| *state != self.current)?;
        (now.saturating_duration_since(self.last_sent) >= self.min_resend_interval)
            .then_some(target)
    }

    /// Apply `state` after its inhibit message was sent.
    pub fn mark_sent(&mut self, state: FlowState, now: Instant) {
        self.current = state;
        if self.requested == Some(state) {
            self.requested = None;
        }
        self.last_sent = now;
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

    /// Evaluate and, if something is due, pretend it was sent. Returns what was sent.
    fn step(ctl: &mut FlowController, p: Progress, now: Instant) -> Option<FlowState> {
        ctl.evaluate(p);
        let due = ctl.due(now)?;
        ctl.mark_sent(due, now);
        Some(due)
    }

    #[test]
    fn busy_when_backlog_reaches_threshold() {
        let t0 = Instant::now();
        let mut ctl = FlowController::new(Duration::ZERO, t0);

        assert_eq!(step(&mut ctl, progress(0, 0, 5), t0), None);
        assert_eq!(step(&mut ctl, progress(3, 0, 5), t0), None);
        assert_eq!(step(&mut ctl, progress(10, 0, 5), t0), Some(FlowState::Busy));
        assert_eq!(ctl.current(), FlowState::Busy);
        assert_eq!(ctl.requested(), None);
    }

    #[test]
    fn free_when_backlog_drops_below_threshold() {
        let t0 = Instant::now();
        let mut ctl = FlowController::new(Duration::ZERO, t0);
        step(&mut ctl, progress(10, 0, 5), t0);

        assert_eq!(step(&mut ctl, progress(10, 6, 5), t0), Some(FlowState::Free));
        assert_eq!(ctl.current(), FlowState::Free);
    }

    #[test]
    fn free_when_completion_overtakes_admission() {
        let t0 = Instant::now();
        let mut ctl = FlowController::new(Duration::ZERO, t0);
        step(&mut ctl, progress(10, 0, 5), t0);

        assert_eq!(step(&mut ctl, progress(10, 30, 5), t0), Some(FlowState::Free));
    }

    #[test]
    fn unchanged_backlog_sends_nothing_more() {
        let t0 = Instant::now();
        let mut ctl = FlowController::new(Duration::ZERO, t0);
        assert!(step(&mut ctl, progress(10, 0, 5), t0).is_some());

        for admitted in 10..20 {
            assert_eq!(step(&mut ctl, progress(admitted, 0, 5), t0), None);
        }
        assert_eq!(ctl.current(), FlowState::Busy);
    }

    #[test]
    fn unsent_request_does_not_change_current() {
        let t0 = Instant::now();
        let mut ctl = FlowController::new(Duration::ZERO, t0);

        assert_eq!(ctl.evaluate(progress(10, 0, 5)), Some(FlowState::Busy));
        assert_eq!(ctl.due(t0), Some(FlowState::Busy));
        // Send failed: nothing marked.
        assert_eq!(ctl.current(), FlowState::Free);
        assert_eq!(ctl.requested(), Some(FlowState::Busy));

        // Still warranted on the next pass, so it is offered again.
        ctl.evaluate(progress(11, 0, 5));
        assert_eq!(ctl.due(t0), Some(FlowState::Busy));
    }

    #[test]
    fn stale_request_is_withdrawn_by_fresh_evaluation() {
        let t0 = Instant::now();
        let mut ctl = FlowController::new(Duration::ZERO, t0);

        ctl.evaluate(progress(10, 0, 5));
        assert_eq!(ctl.requested(), Some(FlowState::Busy));

        // Backlog cleared before the Busy message could be delivered.
        assert_eq!(ctl.evaluate(progress(10, 9, 5)), None);
        assert_eq!(ctl.due(t0), None);
        assert_eq!(ctl.current(), FlowState::Free);
    }

    #[test]
    fn rate_limit_holds_back_opposite_transition() {
        let interval = Duration::from_millis(500);
        let t0 = Instant::now();
        let mut ctl = FlowController::new(interval, t0);

        // Clock starts at construction.
        assert_eq!(step(&mut ctl, progress(10, 0, 5), t0), None);
        let t1 = t0 + interval;
        assert_eq!(step(&mut ctl, progress(10, 0, 5), t1), Some(FlowState::Busy));

        // Free is warranted right away but must wait for the interval.
        let early = t1 + Duration::from_millis(100);
        assert_eq!(step(&mut ctl, progress(10, 10, 5), early), None);
        assert_eq!(ctl.requested(), Some(FlowState::Free));
        assert_eq!(ctl.current(), FlowState::Busy);

        let later = t1 + interval;
        assert_eq!(step(&mut ctl, progress(10, 10, 5), later), Some(FlowState::Free));
    }

    #[test]
    fn zero_threshold_disables_emission() {
        let t0 = Instant::now();
        let mut ctl = FlowController::new(Duration::ZERO, t0);

        assert_eq!(step(&mut ctl, progress(1_000, 0, 0), t0), None);
        assert_eq!(ctl.current(), FlowState::Free);
    }

    #[test]
    fn disabling_while_busy_holds_state_until_reenabled() {
        let t0 = Instant::now();
        let mut ctl = FlowController::new(Duration::ZERO, t0);
        step(&mut ctl, progress(10, 0, 5), t0);

        assert_eq!(step(&mut ctl, progress(10, 10, 0), t0), None);
        assert_eq!(ctl.current(), FlowState::Busy);

        assert_eq!(step(&mut ctl, progress(10, 10, 5), t0), Some(FlowState::Free));
    }

    #[test]
    fn threshold_change_applies_on_next_evaluation() {
        let t0 = Instant::now();
        let mut ctl = FlowController::new(Duration::ZERO, t0);

        assert_eq!(step(&mut ctl, progress(4, 0, 5), t0), None);
        assert_eq!(step(&mut ctl, progress(4, 0, 2), t0), Some(FlowState::Busy));
    }
}
