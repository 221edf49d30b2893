//! Session lifecycle state machine
//!
//! Pure transitions for one session-oriented exchange:
//!
//! ```text
//! Uninitialized -> RuntimeStarted -> SessionOpen -> {Replied | TimedOut | Failed}
//!               -> SessionClosed -> RuntimeStopped
//! ```
//!
//! Shortcuts to `RuntimeStopped` exist only where no session was ever
//! opened: from `RuntimeStarted`, and from `Uninitialized` when `start`
//! failed or was cut off by the deadline.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Uninitialized,
    RuntimeStarted,
    SessionOpen,
    Replied,
    TimedOut,
    /// Any non-timeout failure while the prompt was in flight
    Failed,
    SessionClosed,
    RuntimeStopped,
}

impl Phase {
    /// Prompts may only be submitted here
    pub fn accepts_prompt(self) -> bool {
        self == Phase::SessionOpen
    }

    /// A session exists and has not been destroyed yet
    pub fn holds_session(self) -> bool {
        matches!(
            self,
            Phase::SessionOpen | Phase::Replied | Phase::TimedOut | Phase::Failed
        )
    }

    /// The runtime is up and has not been stopped yet
    pub fn holds_runtime(self) -> bool {
        !matches!(self, Phase::Uninitialized | Phase::RuntimeStopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Start,
    OpenSession,
    Reply,
    TimeOut,
    Fail,
    CloseSession,
    Stop,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid lifecycle transition: {step:?} from {phase:?}")]
pub struct LifecycleError {
    pub phase: Phase,
    pub step: Step,
}

/// Pure transition function
pub fn advance(phase: Phase, step: Step) -> Result<Phase, LifecycleError> {
    match (phase, step) {
        (Phase::Uninitialized, Step::Start) => Ok(Phase::RuntimeStarted),
        (Phase::RuntimeStarted, Step::OpenSession) => Ok(Phase::SessionOpen),
        (Phase::Uninitialized | Phase::RuntimeStarted, Step::Stop) => Ok(Phase::RuntimeStopped),
        (Phase::SessionOpen, Step::Reply) => Ok(Phase::Replied),
        (Phase::SessionOpen, Step::TimeOut) => Ok(Phase::TimedOut),
        (Phase::SessionOpen, Step::Fail) => Ok(Phase::Failed),
        (Phase::Replied | Phase::TimedOut | Phase::Failed, Step::CloseSession) => {
            Ok(Phase::SessionClosed)
        }
        (Phase::SessionClosed, Step::Stop) => Ok(Phase::RuntimeStopped),
        (phase, step) => Err(LifecycleError { phase, step }),
    }
}

/// Tracks the phase of one exchange as the driver performs each step
#[derive(Debug)]
pub struct Lifecycle {
    phase: Phase,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            phase: Phase::Uninitialized,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Record a step the driver just completed
    pub fn record(&mut self, step: Step) {
        match advance(self.phase, step) {
            Ok(next) => {
                tracing::debug!(from = ?self.phase, to = ?next, "Exchange lifecycle");
                self.phase = next;
            }
            Err(e) => {
                tracing::error!(error = %e, "Exchange lifecycle violated");
                debug_assert!(false, "{e}");
            }
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const HAPPY_PATH: [Step; 5] = [
        Step::Start,
        Step::OpenSession,
        Step::Reply,
        Step::CloseSession,
        Step::Stop,
    ];

    #[test]
    fn test_happy_path() {
        let end = HAPPY_PATH
            .iter()
            .try_fold(Phase::Uninitialized, |phase, step| advance(phase, *step));
        assert_eq!(end, Ok(Phase::RuntimeStopped));
    }

    #[test]
    fn test_cannot_stop_with_open_session() {
        assert_eq!(
            advance(Phase::SessionOpen, Step::Stop),
            Err(LifecycleError {
                phase: Phase::SessionOpen,
                step: Step::Stop
            })
        );
    }

    #[test]
    fn test_cannot_close_before_outcome() {
        assert!(advance(Phase::SessionOpen, Step::CloseSession).is_err());
    }

    #[test]
    fn test_second_prompt_rejected() {
        assert!(advance(Phase::Replied, Step::Reply).is_err());
        assert!(!Phase::Replied.accepts_prompt());
    }

    #[test]
    fn test_session_creation_failure_shortcut() {
        let phase = advance(Phase::Uninitialized, Step::Start).unwrap();
        assert_eq!(advance(phase, Step::Stop), Ok(Phase::RuntimeStopped));
    }

    #[test]
    fn test_failed_start_still_stops() {
        assert_eq!(
            advance(Phase::Uninitialized, Step::Stop),
            Ok(Phase::RuntimeStopped)
        );
        assert!(advance(Phase::Uninitialized, Step::OpenSession).is_err());
    }

    #[test]
    fn test_resource_ownership_by_phase() {
        assert!(!Phase::Uninitialized.holds_runtime());
        assert!(Phase::RuntimeStarted.holds_runtime());
        assert!(!Phase::RuntimeStarted.holds_session());
        assert!(Phase::TimedOut.holds_session());
        assert!(Phase::SessionClosed.holds_runtime());
        assert!(!Phase::SessionClosed.holds_session());
        assert!(!Phase::RuntimeStopped.holds_runtime());
    }

    fn arb_step() -> impl Strategy<Value = Step> {
        prop_oneof![
            Just(Step::Start),
            Just(Step::OpenSession),
            Just(Step::Reply),
            Just(Step::TimeOut),
            Just(Step::Fail),
            Just(Step::CloseSession),
            Just(Step::Stop),
        ]
    }

    proptest! {
        /// Whatever order steps are attempted in, an opened session is always
        /// closed exactly once before the runtime stops, and at most one
        /// outcome is ever accepted.
        #[test]
        fn prop_no_transition_skips_teardown(steps in proptest::collection::vec(arb_step(), 0..30)) {
            let mut phase = Phase::Uninitialized;
            let mut accepted = Vec::new();
            for step in steps {
                if let Ok(next) = advance(phase, step) {
                    if matches!(step, Step::Reply | Step::TimeOut | Step::Fail) {
                        prop_assert!(phase.accepts_prompt());
                    }
                    accepted.push(step);
                    phase = next;
                }
            }

            let outcomes = accepted
                .iter()
                .filter(|s| matches!(s, Step::Reply | Step::TimeOut | Step::Fail))
                .count();
            prop_assert!(outcomes <= 1);

            if phase == Phase::RuntimeStopped && accepted.contains(&Step::OpenSession) {
                let closes = accepted.iter().filter(|s| **s == Step::CloseSession).count();
                prop_assert_eq!(closes, 1);
                let close_at = accepted.iter().position(|s| *s == Step::CloseSession);
                let stop_at = accepted.iter().position(|s| *s == Step::Stop);
                prop_assert!(close_at < stop_at);
            }
        }

        #[test]
        fn prop_stopped_is_terminal(step in arb_step()) {
            prop_assert!(advance(Phase::RuntimeStopped, step).is_err());
        }
    }
}
