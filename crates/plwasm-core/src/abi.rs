//! Errors raised by host functions to end a routine call.
//!
//! A host function returns one of these as its error; Wasmtime unwinds the
//! guest and hands the same error back to [`crate::InstanceRunner`], which
//! recognises it by downcasting.

/// The routine raised an error through the `raise` host function.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("routine raised: {message}")]
pub struct GuestRaise {
    /// Message supplied by the routine.
    pub message: String,
}

impl GuestRaise {
    /// Create a new raise.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The routine broke the host-call contract.
///
/// Out-of-bounds pointers, unknown argument indexes, invalid UTF-8 in log
/// messages and a missing `memory` export all end up here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ABI violation: {reason}")]
pub struct AbiViolation {
    /// What the routine did wrong.
    pub reason: String,
}

impl AbiViolation {
    /// Create a new violation.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
