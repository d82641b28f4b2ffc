//! The boundary between the bridge and the embedded runtime.
//!
//! The embedder only ever talks to the runtime through two traits:
//! - [`RuntimeLauncher`]: starts a runtime from [`StartupParams`], once
//! - [`ManagedRuntime`]: resolves and calls routines, then shuts down
//!
//! [`crate::wasm`] provides the Wasmtime implementation.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use plwasm_common::{
    HostValue, LogBridge, RoutineOutcome, RuntimeConfig, RuntimeError, Severity, StartupError,
};
use plwasm_host::TrustPolicy;

/// Identity of a routine: a module and one of its exports.
///
/// `name` names module `name`, export `name`; `module.export` names them
/// separately. Both parts are non-empty and limited to ASCII letters,
/// digits, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutineId {
    module: String,
    export: String,
}

impl RoutineId {
    /// Parse a routine identifier.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidRoutineId`] if either part is empty or contains a
    /// character outside `[A-Za-z0-9_-]`.
    pub fn parse(routine: &str) -> Result<Self, InvalidRoutineId> {
        let (module, export) = routine.split_once('.').unwrap_or((routine, routine));

        if !is_identifier(module) || !is_identifier(export) {
            return Err(InvalidRoutineId(routine.to_string()));
        }

        Ok(Self {
            module: module.to_string(),
            export: export.to_string(),
        })
    }

    /// The module the routine lives in.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// The exported function to call.
    pub fn export(&self) -> &str {
        &self.export
    }
}

fn is_identifier(part: &str) -> bool {
    !part.is_empty()
        && part
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

impl fmt::Display for RoutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.module == self.export {
            f.write_str(&self.module)
        } else {
            write!(f, "{}.{}", self.module, self.export)
        }
    }
}

impl FromStr for RoutineId {
    type Err = InvalidRoutineId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A routine identifier that does not parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid routine identifier '{0}'")]
pub struct InvalidRoutineId(pub String);

/// A routine the runtime has resolved and can call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineHandle {
    id: RoutineId,
    fingerprint: Option<String>,
}

impl RoutineHandle {
    /// Create a handle for a resolved routine.
    pub fn new(id: RoutineId) -> Self {
        Self {
            id,
            fingerprint: None,
        }
    }

    /// Attach a fingerprint of the code the routine resolved to.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// The routine identity.
    pub fn id(&self) -> &RoutineId {
        &self.id
    }

    /// Fingerprint of the resolved code, if the runtime provides one.
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }
}

/// Everything the runtime is started with.
///
/// Built once during startup and kept unchanged for the life of the runtime.
#[derive(Debug, Clone, Serialize)]
pub struct StartupParams {
    /// The sealed trust posture.
    pub trust: TrustPolicy,

    /// Directories routine modules are loaded from, in search order.
    pub module_path: Vec<PathBuf>,

    /// Verbosity threshold installed before the runtime started.
    pub log_threshold: Severity,

    /// Engine and per-call limits.
    pub runtime: RuntimeConfig,

    /// Where routine log messages go.
    #[serde(skip)]
    pub log: Arc<LogBridge>,
}

/// Starts the embedded runtime.
pub trait RuntimeLauncher: Send {
    /// Start a runtime with the given parameters.
    ///
    /// Called at most once per embedder.
    ///
    /// # Errors
    ///
    /// Returns a [`StartupError`] if the runtime cannot be brought up.
    fn launch(&self, params: &StartupParams) -> Result<Box<dyn ManagedRuntime>, StartupError>;
}

/// A live embedded runtime.
pub trait ManagedRuntime: fmt::Debug + Send {
    /// Resolve a routine.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ModuleNotFound`] if no such routine exists,
    /// or another [`RuntimeError`] if its code cannot be loaded.
    fn resolve(&self, id: &RoutineId) -> Result<RoutineHandle, RuntimeError>;

    /// Call a resolved routine. `call_id` identifies the call in logs.
    fn call(&self, call_id: &str, handle: &RoutineHandle, args: &[HostValue]) -> RoutineOutcome;

    /// Release runtime resources and join runtime-owned threads.
    ///
    /// Called exactly once, at teardown.
    fn shutdown(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_name() {
        let id = RoutineId::parse("echo").unwrap();
        assert_eq!(id.module(), "echo");
        assert_eq!(id.export(), "echo");
        assert_eq!(id.to_string(), "echo");
    }

    #[test]
    fn test_parse_qualified_name() {
        let id: RoutineId = "text-utils.upper_case".parse().unwrap();
        assert_eq!(id.module(), "text-utils");
        assert_eq!(id.export(), "upper_case");
        assert_eq!(id.to_string(), "text-utils.upper_case");
    }

    #[test]
    fn test_parse_rejects_bad_identifiers() {
        for bad in ["", ".", "a.", ".b", "a.b.c", "../x", "sp ace", "ü"] {
            assert!(RoutineId::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_handle_fingerprint() {
        let id = RoutineId::parse("echo").unwrap();
        let handle = RoutineHandle::new(id.clone());
        assert_eq!(handle.fingerprint(), None);

        let handle = handle.with_fingerprint("abc123");
        assert_eq!(handle.id(), &id);
        assert_eq!(handle.fingerprint(), Some("abc123"));
    }
}
