//! Host-side values and routine outcomes.
//!
//! [`HostValue`] is the raw representation the host hands to the call
//! handler. Routines see arguments as byte strings: every non-null value is
//! passed in its text form, except [`HostValue::Bytes`], which is passed raw.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ManagedError, NativeFault};

/// A value crossing the host boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostValue {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// Double precision float.
    Float(f64),
    /// Text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl HostValue {
    /// Returns `true` for [`HostValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Encode the value as routine argument bytes.
    ///
    /// Returns `None` for NULL.
    pub fn to_arg_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(if *b { b"true".to_vec() } else { b"false".to_vec() }),
            Self::Int(i) => Some(i.to_string().into_bytes()),
            Self::Float(f) => Some(f.to_string().into_bytes()),
            Self::Text(s) => Some(s.as_bytes().to_vec()),
            Self::Bytes(b) => Some(b.clone()),
        }
    }

    /// Decode a routine result.
    ///
    /// A result that was never set is NULL; valid UTF-8 becomes text.
    pub fn from_result_bytes(bytes: Option<Vec<u8>>) -> Self {
        match bytes {
            None => Self::Null,
            Some(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Self::Text(text),
                Err(e) => Self::Bytes(e.into_bytes()),
            },
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
            Self::Bytes(b) => {
                f.write_str("\\x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for HostValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

/// Outcome of running one routine inside the embedded runtime.
///
/// Exactly one of three things happens: a value comes back, the routine
/// raises a recoverable error, or the native boundary faults.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum RoutineOutcome {
    /// The routine returned normally.
    Success(HostValue),
    /// The routine failed in a way the host can report and move past.
    RecoverableError(ManagedError),
    /// The runtime faulted; the process must not continue.
    FatalFault(NativeFault),
}

impl RoutineOutcome {
    /// Returns `true` if the routine returned normally.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns `true` for a fatal fault.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalFault(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_bytes() {
        assert_eq!(HostValue::Null.to_arg_bytes(), None);
        assert_eq!(HostValue::from("hi").to_arg_bytes(), Some(b"hi".to_vec()));
        assert_eq!(HostValue::Int(-7).to_arg_bytes(), Some(b"-7".to_vec()));
        assert_eq!(HostValue::Bool(true).to_arg_bytes(), Some(b"true".to_vec()));
        assert_eq!(
            HostValue::Bytes(vec![0, 159]).to_arg_bytes(),
            Some(vec![0, 159])
        );
    }

    #[test]
    fn test_from_result_bytes() {
        assert_eq!(HostValue::from_result_bytes(None), HostValue::Null);
        assert_eq!(
            HostValue::from_result_bytes(Some(b"hi".to_vec())),
            HostValue::Text("hi".into())
        );
        assert_eq!(
            HostValue::from_result_bytes(Some(vec![0xff, 0xfe])),
            HostValue::Bytes(vec![0xff, 0xfe])
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(HostValue::Null.to_string(), "NULL");
        assert_eq!(HostValue::Bytes(vec![0xde, 0xad]).to_string(), "\\xdead");
        assert_eq!(HostValue::from("abc").to_string(), "abc");
    }

    #[test]
    fn test_json_untagged() {
        let json = serde_json::to_string(&HostValue::from("hi")).unwrap();
        assert_eq!(json, "\"hi\"");
        let value: HostValue = serde_json::from_str("42").unwrap();
        assert_eq!(value, HostValue::Int(42));
    }

    #[test]
    fn test_outcome_predicates() {
        assert!(RoutineOutcome::Success(HostValue::Null).is_success());
        assert!(RoutineOutcome::FatalFault(NativeFault::new("boom")).is_fatal());
        assert!(!RoutineOutcome::RecoverableError(ManagedError::raised("x")).is_fatal());
    }
}
