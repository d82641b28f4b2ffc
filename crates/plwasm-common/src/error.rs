//! Error types for plwasm.
//!
//! This module defines the error hierarchy shared by every crate:
//! - [`StartupError`]: Why the embedded runtime could not be brought up
//! - [`MisuseError`]: A call made at the wrong point of the lifecycle
//! - [`ManagedError`]: A recoverable error raised inside a routine
//! - [`NativeFault`]: A fault at the native boundary, fatal to the process
//! - [`RuntimeError`]: Engine-level failures (compilation, module lookup, I/O)

use std::fmt;
use std::io;

use thiserror::Error;

/// Errors that keep the embedded runtime from reaching the ready state.
///
/// A startup error is remembered for the lifetime of the process, so it is
/// `Clone` and carries only owned strings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    /// A configuration key required for startup is not set.
    #[error("Required configuration key '{key}' is not set")]
    ConfigMissing {
        /// The configuration key that was looked up.
        key: String,
    },

    /// A configuration key holds a value that cannot be used.
    #[error("Invalid value for configuration key '{key}': {reason}")]
    ConfigInvalid {
        /// The configuration key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The embedded runtime failed to come up.
    #[error("Embedded runtime failed to start: {reason}")]
    StartupFailure {
        /// Description of the failure.
        reason: String,
    },

    /// A previous startup attempt unwound before completing.
    #[error("Embedded runtime startup was interrupted")]
    Interrupted,

    /// The runtime has been torn down and will not start again.
    #[error("Embedded runtime has been shut down")]
    ShutDown,
}

impl StartupError {
    /// Create a new `ConfigMissing` error.
    pub fn config_missing(key: impl Into<String>) -> Self {
        Self::ConfigMissing { key: key.into() }
    }

    /// Create a new `ConfigInvalid` error.
    pub fn config_invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `StartupFailure` error.
    pub fn startup_failure(reason: impl Into<String>) -> Self {
        Self::StartupFailure {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error comes from configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::ConfigMissing { .. } | Self::ConfigInvalid { .. }
        )
    }
}

/// A programming or configuration error rejected at the call site.
///
/// Misuse never changes runtime state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Misuse: {reason}")]
pub struct MisuseError {
    /// Description of what was attempted.
    pub reason: String,
}

impl MisuseError {
    /// Create a new misuse error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Classification of a recoverable routine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedErrorKind {
    /// The routine raised an error through the guest ABI.
    Raised,
    /// The routine trapped (unreachable, out-of-bounds access, stack overflow).
    Trap,
    /// The routine ran out of fuel.
    FuelExhausted,
    /// The routine exceeded its wall-clock limit.
    Timeout,
    /// The module does not export the requested routine.
    MissingExport,
    /// The routine's module could not be loaded for the call.
    LoadFailed,
    /// The routine broke the guest ABI contract.
    AbiViolation,
}

impl fmt::Display for ManagedErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Raised => "raised",
            Self::Trap => "trap",
            Self::FuelExhausted => "fuel exhausted",
            Self::Timeout => "timeout",
            Self::MissingExport => "missing export",
            Self::LoadFailed => "load failed",
            Self::AbiViolation => "abi violation",
        };
        f.write_str(name)
    }
}

/// A recoverable error raised while a routine ran inside the embedded runtime.
///
/// The original diagnostic is preserved so the host can report it verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ManagedError {
    /// What kind of error occurred.
    pub kind: ManagedErrorKind,
    /// The diagnostic message as produced by the routine or the runtime.
    pub message: String,
    /// Trap code when the runtime provided one.
    pub code: Option<String>,
}

impl ManagedError {
    /// Create a new managed error of the given kind.
    pub fn new(kind: ManagedErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    /// Create an error raised by the routine itself.
    pub fn raised(message: impl Into<String>) -> Self {
        Self::new(ManagedErrorKind::Raised, message)
    }

    /// Attach a trap code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Returns `true` if a resource limit stopped the routine.
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self.kind,
            ManagedErrorKind::FuelExhausted | ManagedErrorKind::Timeout
        )
    }
}

/// A fault at the native boundary.
///
/// `NativeFault` never converts into a recoverable error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Native fault: {message}")]
pub struct NativeFault {
    /// Description of the fault.
    pub message: String,
}

impl NativeFault {
    /// Create a new native fault.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Engine-level errors.
///
/// These occur while compiling, locating or preparing modules, before any
/// routine code runs.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The requested module was not found in the catalog.
    #[error("Module not found: {module_id}")]
    ModuleNotFound {
        /// The identifier of the module that was not found.
        module_id: String,
    },

    /// WebAssembly compilation failed.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

impl RuntimeError {
    /// Create a new `ModuleNotFound` error.
    pub fn module_not_found(module_id: impl Into<String>) -> Self {
        Self::ModuleNotFound {
            module_id: module_id.into(),
        }
    }

    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates the module was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ModuleNotFound { .. })
    }
}

impl From<RuntimeError> for StartupError {
    fn from(err: RuntimeError) -> Self {
        Self::startup_failure(err.to_string())
    }
}
