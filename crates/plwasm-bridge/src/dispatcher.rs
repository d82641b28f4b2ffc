//! Per-call dispatch into the embedded runtime.
//!
//! Every call follows the same path:
//! 1. Make sure the runtime is started (at most one startup per process)
//! 2. Parse and resolve the routine identifier
//! 3. Run the routine and classify the result into a [`CallOutcome`]

use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use plwasm_common::{HostValue, ManagedError, NativeFault, RoutineOutcome, StartupError};
use plwasm_host::TrustTier;

use crate::embedder::RuntimeEmbedder;
use crate::runtime::{InvalidRoutineId, RoutineId};

/// Recoverable call failures.
///
/// A [`NativeFault`] is not one of these. It travels in
/// [`CallOutcome::FatalFault`] and never converts into a `CallError`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The embedded runtime could not be started.
    #[error(transparent)]
    Initialization(#[from] StartupError),

    /// The routine identifier does not parse.
    #[error(transparent)]
    InvalidRoutine(#[from] InvalidRoutineId),

    /// No module or export by that name.
    #[error("routine '{routine}' does not exist")]
    RoutineNotFound {
        /// The routine that was looked up.
        routine: String,
    },

    /// The routine's module exists but could not be loaded.
    #[error("routine '{routine}' could not be loaded: {reason}")]
    LoadFailed {
        /// The routine that was looked up.
        routine: String,
        /// Why loading failed.
        reason: String,
    },

    /// The routine failed inside the runtime.
    #[error(transparent)]
    Managed(#[from] ManagedError),
}

impl CallError {
    /// Returns `true` if the runtime never started.
    pub fn is_initialization(&self) -> bool {
        matches!(self, Self::Initialization(_))
    }

    /// Returns `true` if the routine could not be found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RoutineNotFound { .. })
    }
}

/// Result of one dispatched call.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum CallOutcome {
    /// The routine returned a value.
    Success(HostValue),
    /// The call failed; the process can carry on.
    RecoverableError(CallError),
    /// The native boundary faulted; the process must not continue.
    FatalFault(NativeFault),
}

impl CallOutcome {
    /// Returns `true` if the routine returned a value.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns `true` for a fatal fault.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalFault(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::RecoverableError(_) => "recoverable_error",
            Self::FatalFault(_) => "fatal_fault",
        }
    }
}

impl From<RoutineOutcome> for CallOutcome {
    fn from(outcome: RoutineOutcome) -> Self {
        match outcome {
            RoutineOutcome::Success(value) => Self::Success(value),
            RoutineOutcome::RecoverableError(err) => Self::RecoverableError(err.into()),
            RoutineOutcome::FatalFault(fault) => Self::FatalFault(fault),
        }
    }
}

/// State of one call, from dispatch until the outcome goes back to the host.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Unique identifier of the call.
    pub call_id: Uuid,
    /// The routine identifier as the host passed it.
    pub routine: String,
    /// The parsed routine, once the identifier is valid.
    pub target: Option<RoutineId>,
    /// The trust tier the call runs under.
    pub trust: TrustTier,
    /// When dispatch began.
    pub started: Instant,
    /// Set by [`CallContext::finish`].
    pub outcome: Option<CallOutcome>,
}

impl CallContext {
    fn new(routine: &str, trust: TrustTier) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            routine: routine.to_string(),
            target: None,
            trust,
            started: Instant::now(),
            outcome: None,
        }
    }

    /// Record the outcome on the context and hand it back.
    pub fn finish(&mut self, outcome: CallOutcome) -> CallOutcome {
        let duration_ms = self.started.elapsed().as_millis();
        match &outcome {
            CallOutcome::Success(_) => info!(
                call_id = %self.call_id,
                routine = %self.routine,
                trust = %self.trust,
                duration_ms,
                "Call completed"
            ),
            CallOutcome::RecoverableError(err) => warn!(
                call_id = %self.call_id,
                routine = %self.routine,
                trust = %self.trust,
                duration_ms,
                error = %err,
                "Call failed"
            ),
            CallOutcome::FatalFault(fault) => error!(
                call_id = %self.call_id,
                routine = %self.routine,
                trust = %self.trust,
                duration_ms,
                fault = %fault,
                "Call hit a native fault"
            ),
        }
        self.outcome = Some(outcome.clone());
        outcome
    }
}

/// Running totals over every call a dispatcher has handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Calls dispatched.
    pub calls: u64,
    /// Calls that returned a value.
    pub successes: u64,
    /// Calls that failed recoverably.
    pub recoverable_errors: u64,
    /// Calls that ended in a native fault.
    pub fatal_faults: u64,
}

impl DispatchStats {
    fn record(&mut self, outcome: &CallOutcome) {
        self.calls += 1;
        match outcome {
            CallOutcome::Success(_) => self.successes += 1,
            CallOutcome::RecoverableError(_) => self.recoverable_errors += 1,
            CallOutcome::FatalFault(_) => self.fatal_faults += 1,
        }
    }
}

/// Routes host calls to routines in the embedded runtime.
#[derive(Debug, Default)]
pub struct CallDispatcher {
    stats: DispatchStats,
}

impl CallDispatcher {
    /// Create a dispatcher with zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics so far.
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Dispatch one call.
    ///
    /// Startup is attempted first; if it fails, nothing is resolved and the
    /// startup error is returned as [`CallError::Initialization`].
    #[instrument(skip(self, embedder, args), fields(args = args.len()))]
    pub fn invoke(
        &mut self,
        embedder: &mut RuntimeEmbedder,
        routine: &str,
        args: &[HostValue],
    ) -> CallOutcome {
        let mut context = CallContext::new(routine, embedder.current_posture());
        let outcome = Self::dispatch(embedder, &mut context, args);
        self.stats.record(&outcome);
        debug!(outcome = outcome.kind(), "Dispatch finished");
        context.finish(outcome)
    }

    fn dispatch(
        embedder: &mut RuntimeEmbedder,
        context: &mut CallContext,
        args: &[HostValue],
    ) -> CallOutcome {
        if let Err(err) = embedder.ensure_ready() {
            return CallOutcome::RecoverableError(err.into());
        }

        let id = match RoutineId::parse(&context.routine) {
            Ok(id) => id,
            Err(err) => return CallOutcome::RecoverableError(err.into()),
        };
        context.target = Some(id.clone());

        let Some(runtime) = embedder.runtime() else {
            // ensure_ready succeeded, so only Ready can be observed here.
            return CallOutcome::RecoverableError(StartupError::ShutDown.into());
        };

        let handle = match runtime.resolve(&id) {
            Ok(handle) => handle,
            Err(err) if err.is_not_found() => {
                return CallOutcome::RecoverableError(CallError::RoutineNotFound {
                    routine: id.to_string(),
                });
            }
            Err(err) => {
                return CallOutcome::RecoverableError(CallError::LoadFailed {
                    routine: id.to_string(),
                    reason: err.to_string(),
                });
            }
        };

        runtime
            .call(&context.call_id.to_string(), &handle, args)
            .into()
    }
}
