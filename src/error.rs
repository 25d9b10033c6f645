//! Error taxonomy shared by every layer of the bridge
//!
//! [`ErrorKind`] is the closed set every caller switches on. Host and transport
//! failures are mapped onto it exactly once, by [`classify`], at the safe
//! invoker boundary. Nothing upstream re-classifies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::path::{LivePath, PathError};
use crate::transport::TransportError;

/// Closed error classification for every bridge failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or nonexistent target
    InvalidPath,
    /// Index or value outside the accepted bounds
    OutOfRange,
    /// Read-only property or disallowed mutation
    Permission,
    /// Precondition unmet (no clip, wrong clip type, no notes)
    State,
    /// Host momentarily busy or unreachable
    Transient,
}

/// Who a failure is on: the caller, the session's current state, or the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Client,
    Conflict,
    Transient,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::InvalidPath,
        ErrorKind::OutOfRange,
        ErrorKind::Permission,
        ErrorKind::State,
        ErrorKind::Transient,
    ];

    /// Only transient failures are worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    /// Client errors are the caller's fault; `State` is a conflict and
    /// `Transient` is the host's.
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidPath | ErrorKind::OutOfRange | ErrorKind::Permission
        )
    }

    pub fn category(self) -> ErrorCategory {
        if self.is_client_error() {
            ErrorCategory::Client
        } else if self.is_retryable() {
            ErrorCategory::Transient
        } else {
            ErrorCategory::Conflict
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidPath => "InvalidPath",
            ErrorKind::OutOfRange => "OutOfRange",
            ErrorKind::Permission => "Permission",
            ErrorKind::State => "State",
            ErrorKind::Transient => "Transient",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified bridge failure
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct BridgeError {
    pub kind: ErrorKind,
    pub message: String,
    /// Canonical path of the target, when one was resolved
    pub path: Option<String>,
}

impl BridgeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: None,
        }
    }

    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidPath, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfRange, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, message)
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::State, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// Attach the target path (kept if one is already set)
    pub fn at(mut self, path: &LivePath) -> Self {
        if self.path.is_none() {
            self.path = Some(path.to_string());
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<PathError> for BridgeError {
    fn from(err: PathError) -> Self {
        BridgeError::invalid_path(err.to_string())
    }
}

/// Outcome of one safe invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    pub success: bool,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CallResult {
    pub fn ok(value: Value) -> Self {
        Self {
            success: true,
            value,
            error_kind: None,
            message: None,
        }
    }

    pub fn failed(err: &BridgeError) -> Self {
        Self {
            success: false,
            value: Value::Null,
            error_kind: Some(err.kind),
            message: Some(err.message.clone()),
        }
    }

    /// Convert back into a `Result`, rebuilding the error for failed calls
    pub fn into_result(self) -> Result<Value, BridgeError> {
        if self.success {
            return Ok(self.value);
        }
        Err(BridgeError::new(
            self.error_kind.unwrap_or(ErrorKind::State),
            self.message.unwrap_or_else(|| "call failed".to_string()),
        ))
    }
}

/// Map a transport or host failure onto the taxonomy.
///
/// This is the only place host error strings are interpreted; swap the
/// heuristics in [`classify_host_message`] when the host changes its wording.
pub fn classify(err: &TransportError) -> ErrorKind {
    match err {
        TransportError::Timeout { .. } | TransportError::Io(_) | TransportError::Closed => {
            ErrorKind::Transient
        }
        // A garbled datagram says nothing about the target itself
        TransportError::Decode(_) => ErrorKind::Transient,
        TransportError::Encode(_) => ErrorKind::InvalidPath,
        // Resending the same payload can never fit
        TransportError::Oversized { .. } => ErrorKind::OutOfRange,
        TransportError::Host(message) => classify_host_message(message),
    }
}

const TRANSIENT_SIGNATURES: &[&str] = &[
    "busy",
    "unavailable",
    "timed out",
    "timeout",
    "try again",
    "rendering",
    "exporting",
    "not responding",
];

const STATE_SIGNATURES: &[&str] = &[
    "no clip",
    "empty",
    "not a midi clip",
    "not an audio clip",
    "has no notes",
];

const RANGE_SIGNATURES: &[&str] = &["out of range", "out of bounds"];

const PERMISSION_SIGNATURES: &[&str] = &[
    "read-only",
    "read only",
    "not allowed",
    "permission",
    "cannot be modified",
];

const INVALID_PATH_SIGNATURES: &[&str] = &[
    "does not exist",
    "invalid",
    "unknown",
    "not found",
    "no such",
    "has no attribute",
];

/// Classify a host-reported error string. Order matters: the first matching
/// family wins, and unrecognised messages fall back to `State`.
pub fn classify_host_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let matches = |signatures: &[&str]| signatures.iter().any(|s| lower.contains(s));

    if matches(TRANSIENT_SIGNATURES) {
        ErrorKind::Transient
    } else if matches(STATE_SIGNATURES) {
        ErrorKind::State
    } else if matches(RANGE_SIGNATURES) {
        ErrorKind::OutOfRange
    } else if matches(PERMISSION_SIGNATURES) {
        ErrorKind::Permission
    } else if matches(INVALID_PATH_SIGNATURES) {
        ErrorKind::InvalidPath
    } else {
        ErrorKind::State
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_host_message_classification() {
        let cases = [
            ("Object does not exist: live_set tracks 4", ErrorKind::InvalidPath),
            ("Unknown property 'volume'", ErrorKind::InvalidPath),
            ("Index out of range: track 9", ErrorKind::OutOfRange),
            ("Property 'length' is read-only", ErrorKind::Permission),
            ("No clip in slot 3", ErrorKind::State),
            ("Clip is not a MIDI clip", ErrorKind::State),
            ("Host busy: rendering", ErrorKind::Transient),
            ("Live is temporarily unavailable", ErrorKind::Transient),
            ("something odd happened", ErrorKind::State),
        ];

        for (message, expected) in cases {
            assert_eq!(classify_host_message(message), expected, "{}", message);
        }
    }

    #[test]
    fn test_transient_wins_over_other_families() {
        // "busy" and "out of range" together: the host was busy, the index may be fine
        assert_eq!(
            classify_host_message("busy, parameter value out of range check skipped"),
            ErrorKind::Transient
        );
    }

    #[test]
    fn test_transport_failures_are_transient() {
        let timeout = TransportError::Timeout {
            request_id: 7,
            timeout: Duration::from_millis(250),
        };
        assert_eq!(classify(&timeout), ErrorKind::Transient);
        assert_eq!(classify(&TransportError::Io("reset".into())), ErrorKind::Transient);
        assert_eq!(classify(&TransportError::Closed), ErrorKind::Transient);
        assert_eq!(
            classify(&TransportError::Encode("bad arg".into())),
            ErrorKind::InvalidPath
        );
        assert_eq!(
            classify(&TransportError::Oversized {
                size: 140_000,
                limit: 65_507
            }),
            ErrorKind::OutOfRange
        );
    }

    #[test]
    fn test_categories() {
        assert_eq!(ErrorKind::InvalidPath.category(), ErrorCategory::Client);
        assert_eq!(ErrorKind::OutOfRange.category(), ErrorCategory::Client);
        assert_eq!(ErrorKind::Permission.category(), ErrorCategory::Client);
        assert_eq!(ErrorKind::State.category(), ErrorCategory::Conflict);
        assert_eq!(ErrorKind::Transient.category(), ErrorCategory::Transient);
    }

    #[test]
    fn test_only_transient_is_retryable() {
        for kind in ErrorKind::ALL {
            assert_eq!(kind.is_retryable(), kind == ErrorKind::Transient);
        }
    }

    #[test]
    fn test_call_result_round_trips_error() {
        let err = BridgeError::permission("read-only");
        let result = CallResult::failed(&err);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Permission));

        let back = result.into_result().unwrap_err();
        assert_eq!(back.kind, ErrorKind::Permission);
        assert_eq!(back.message, "read-only");
    }

    #[test]
    fn test_call_result_serializes_camel_case() {
        let json = serde_json::to_value(CallResult::failed(&BridgeError::state("no clip"))).unwrap();
        assert_eq!(json["errorKind"], "State");
        assert_eq!(json["success"], false);
    }
}
