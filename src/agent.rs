//! Agent-step contract.
//!
//! A handful of steps in the spec are explicitly delegated to an external,
//! non-deterministic collaborator ("Agent" category) rather than
//! implemented as deterministic code: Phase 3's TOC inference fallback
//! (step 3.2), Phase 4's chunk-boundary sentence rejoin (step 4.6). The
//! core never calls an LLM itself; it owns the retry/criticality policy
//! and calls through this trait so a real agent integration can be wired
//! in without touching orchestration logic.
//!
//! Default implementation: [`NoopAgent`] always declines (`Err`), which
//! combined with low-criticality skip-on-exhaustion is enough to run the
//! full pipeline end-to-end with no agent wired in at all — the Code path
//! for each of these steps already guarantees no content is dropped even
//! when the agent step is skipped.

use crate::error::ValidationError;

/// How the orchestrator reacts when an [`AgentStep`] exhausts its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    /// Skip the step and continue the phase with whatever the Code path
    /// already produced.
    Low,
    /// Halt the phase and surface a fatal error.
    High,
}

/// One delegated, retryable unit of work.
pub trait AgentStep<I, O> {
    /// Attempt the step once. `step_id` is the `N.M` identifier the result
    /// is recorded against; `input` is whatever context the step needs.
    fn attempt(&self, step_id: &str, input: &I) -> Result<O, ValidationError>;

    /// Criticality if every retry is exhausted.
    fn criticality(&self) -> Criticality {
        Criticality::Low
    }
}

/// Maximum attempts per agent step, per the error-handling design: retried
/// up to 3 times with the validation contract re-checked each time.
pub const MAX_RETRIES: u32 = 3;

/// Drive an [`AgentStep`] to completion under the core's retry policy.
/// Returns `Ok(Some(output))` on success, `Ok(None)` if every retry failed
/// and the step is low-criticality (phase should continue without it), or
/// `Err` if every retry failed and the step is high-criticality (phase
/// should halt).
pub fn run_with_retry<I, O>(
    step: &impl AgentStep<I, O>,
    step_id: &str,
    input: &I,
) -> Result<Option<O>, ValidationError> {
    let mut last_err = None;
    for _ in 0..MAX_RETRIES {
        match step.attempt(step_id, input) {
            Ok(out) => return Ok(Some(out)),
            Err(e) => last_err = Some(e),
        }
    }
    match step.criticality() {
        Criticality::Low => Ok(None),
        Criticality::High => Err(last_err.unwrap_or_else(|| ValidationError("exhausted retries".into()))),
    }
}

/// Default agent: always declines. Used whenever no external collaborator
/// has been wired in, which is the expected configuration for this core.
pub struct NoopAgent;

impl<I, O> AgentStep<I, O> for NoopAgent {
    fn attempt(&self, step_id: &str, _input: &I) -> Result<O, ValidationError> {
        Err(ValidationError(format!(
            "no agent collaborator configured for step {step_id}"
        )))
    }

    fn criticality(&self) -> Criticality {
        Criticality::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_agent_exhausts_and_returns_none_for_low_criticality() {
        let agent = NoopAgent;
        let result: Result<Option<()>, ValidationError> =
            run_with_retry(&agent, "4.6", &());
        assert_eq!(result.unwrap(), None);
    }

    struct AlwaysFailsHigh;
    impl AgentStep<(), ()> for AlwaysFailsHigh {
        fn attempt(&self, _step_id: &str, _input: &()) -> Result<(), ValidationError> {
            Err(ValidationError("nope".into()))
        }
        fn criticality(&self) -> Criticality {
            Criticality::High
        }
    }

    #[test]
    fn high_criticality_propagates_error_after_exhaustion() {
        let agent = AlwaysFailsHigh;
        let result = run_with_retry(&agent, "3.2", &());
        assert!(result.is_err());
    }

    struct SucceedsOnThirdTry {
        attempts: std::cell::Cell<u32>,
    }
    impl AgentStep<(), u32> for SucceedsOnThirdTry {
        fn attempt(&self, _step_id: &str, _input: &()) -> Result<u32, ValidationError> {
            let n = self.attempts.get() + 1;
            self.attempts.set(n);
            if n >= 3 {
                Ok(n)
            } else {
                Err(ValidationError("not yet".into()))
            }
        }
    }

    #[test]
    fn retries_up_to_max_before_giving_up() {
        let agent = SucceedsOnThirdTry {
            attempts: std::cell::Cell::new(0),
        };
        let result = run_with_retry(&agent, "4.6", &());
        assert_eq!(result.unwrap(), Some(3));
    }
}
