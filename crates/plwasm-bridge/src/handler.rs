//! Entry points the host calls.
//!
//! [`BridgeContext`] is the process-wide context the host creates once at
//! load time. The host calls [`call_handler`] for every routine invocation
//! and [`set_trust`] before the first one. Failures come back as
//! [`HostError`]s carrying the host's message level and a SQLSTATE code.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

use plwasm_common::{
    HostConfig, HostLevel, HostLogSink, HostValue, LevelMapError, LogBridge, MisuseError,
    NativeFault,
};
use plwasm_host::TrustTier;

use crate::dispatcher::{CallDispatcher, CallError, CallOutcome, DispatchStats};
use crate::embedder::RuntimeEmbedder;
use crate::runtime::RuntimeLauncher;

/// A five-character SQLSTATE error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SqlState(&'static str);

impl SqlState {
    /// `39000`: the embedded runtime could not be started.
    pub const EXTERNAL_ROUTINE_INVOCATION: Self = Self("39000");
    /// `42883`: no routine by that name.
    pub const UNDEFINED_FUNCTION: Self = Self("42883");
    /// `42602`: the routine name is malformed.
    pub const INVALID_NAME: Self = Self("42602");
    /// `42P13`: the routine's code could not be loaded.
    pub const INVALID_FUNCTION_DEFINITION: Self = Self("42P13");
    /// `38000`: the routine raised an error.
    pub const EXTERNAL_ROUTINE_EXCEPTION: Self = Self("38000");
    /// `55000`: the request is not valid in the current state.
    pub const OBJECT_NOT_IN_PREREQUISITE_STATE: Self = Self("55000");
    /// `XX000`: internal error.
    pub const INTERNAL_ERROR: Self = Self("XX000");

    /// The code as text.
    pub fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// An error reported back to the host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{level}: {message}")]
pub struct HostError {
    /// Host message level. `Fatal` means the process must exit.
    pub level: HostLevel,
    /// SQLSTATE code.
    pub code: SqlState,
    /// Primary message, verbatim from the failing layer.
    pub message: String,
    /// Additional detail, such as a trap code.
    pub detail: Option<String>,
}

impl HostError {
    fn error(code: SqlState, message: impl Into<String>) -> Self {
        Self {
            level: HostLevel::Error,
            code,
            message: message.into(),
            detail: None,
        }
    }

    #[must_use]
    fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }

    /// Returns `true` if the host process must not continue.
    pub fn is_fatal(&self) -> bool {
        self.level >= HostLevel::Fatal
    }
}

impl From<CallError> for HostError {
    fn from(err: CallError) -> Self {
        let message = err.to_string();
        match err {
            CallError::Initialization(_) => {
                Self::error(SqlState::EXTERNAL_ROUTINE_INVOCATION, message)
            }
            CallError::InvalidRoutine(_) => Self::error(SqlState::INVALID_NAME, message),
            CallError::RoutineNotFound { .. } => {
                Self::error(SqlState::UNDEFINED_FUNCTION, message)
            }
            CallError::LoadFailed { .. } => {
                Self::error(SqlState::INVALID_FUNCTION_DEFINITION, message)
            }
            CallError::Managed(managed) => {
                let detail = match managed.code {
                    Some(code) => Some(format!("{} ({code})", managed.kind)),
                    None => Some(managed.kind.to_string()),
                };
                Self::error(SqlState::EXTERNAL_ROUTINE_EXCEPTION, message).with_detail(detail)
            }
        }
    }
}

impl From<MisuseError> for HostError {
    fn from(err: MisuseError) -> Self {
        Self::error(SqlState::OBJECT_NOT_IN_PREREQUISITE_STATE, err.reason)
    }
}

impl From<NativeFault> for HostError {
    fn from(fault: NativeFault) -> Self {
        Self {
            level: HostLevel::Fatal,
            code: SqlState::INTERNAL_ERROR,
            message: fault.to_string(),
            detail: None,
        }
    }
}

/// Process-wide bridge state.
#[derive(Debug)]
pub struct BridgeContext {
    embedder: RuntimeEmbedder,
    dispatcher: CallDispatcher,
    log: Arc<LogBridge>,
}

impl BridgeContext {
    /// Build the context. The runtime itself starts on the first call.
    ///
    /// # Errors
    ///
    /// Returns [`LevelMapError`] if the level tables fail validation.
    pub fn new(
        config: Arc<dyn HostConfig>,
        sink: Arc<dyn HostLogSink>,
        launcher: Box<dyn RuntimeLauncher>,
    ) -> Result<Self, LevelMapError> {
        let log = Arc::new(LogBridge::new(sink)?);
        Ok(Self {
            embedder: RuntimeEmbedder::new(config, log.clone(), launcher),
            dispatcher: CallDispatcher::new(),
            log,
        })
    }

    /// The embedder.
    pub fn embedder(&self) -> &RuntimeEmbedder {
        &self.embedder
    }

    /// Mutable access to the embedder.
    pub fn embedder_mut(&mut self) -> &mut RuntimeEmbedder {
        &mut self.embedder
    }

    /// Call statistics.
    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// The log bridge shared with the runtime.
    pub fn log(&self) -> &Arc<LogBridge> {
        &self.log
    }

    /// Tear the runtime down. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.embedder.teardown();
    }
}

/// Run a routine on behalf of the host.
///
/// # Errors
///
/// Returns a [`HostError`] at level `Error` for recoverable failures and at
/// level `Fatal` for native faults.
#[instrument(skip(ctx, args), fields(args = args.len()))]
pub fn call_handler(
    ctx: &mut BridgeContext,
    routine: &str,
    args: &[HostValue],
) -> Result<HostValue, HostError> {
    match ctx.dispatcher.invoke(&mut ctx.embedder, routine, args) {
        CallOutcome::Success(value) => Ok(value),
        CallOutcome::RecoverableError(err) => Err(err.into()),
        CallOutcome::FatalFault(fault) => Err(fault.into()),
    }
}

/// Select the trust tier before the runtime starts.
///
/// # Errors
///
/// Returns a [`HostError`] with code `55000` once the runtime has been
/// started, failed or torn down. The tier is left unchanged.
pub fn set_trust(ctx: &mut BridgeContext, trusted: bool) -> Result<(), HostError> {
    let tier = TrustTier::from_trusted(trusted);
    let previous = ctx.embedder.set_posture(tier)?;
    if previous != tier {
        info!(%previous, current = %tier, "Host changed the trust tier");
    }
    Ok(())
}
