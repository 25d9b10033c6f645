//! Transport adapters - the boundary that carries a call to the host
//!
//! Two interchangeable implementations sit behind [`Transport`]:
//! - [`InProcessTransport`]: direct calls into a [`crate::host::HostBridge`]
//!   when the bridge runs inside the host's scripting environment
//! - [`UdpTransport`]: OSC datagrams to the host's listener, correlated by
//!   request id, with a per-request timeout
//!
//! Transports never classify errors; they report what happened and the safe
//! invoker decides what it means.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::path::LivePath;

pub mod codec;
pub mod in_process;
pub mod udp;

pub use in_process::InProcessTransport;
pub use udp::UdpTransport;

/// Method name used for property reads
pub const GET: &str = "get";
/// Method name used for property writes
pub const SET: &str = "set";

/// One remote call: a method name plus its argument list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostCall {
    pub method: String,
    pub args: Vec<Value>,
}

impl HostCall {
    /// Read a property
    pub fn get(property: &str) -> Self {
        Self {
            method: GET.to_string(),
            args: vec![Value::String(property.to_string())],
        }
    }

    /// Write a property
    pub fn set(property: &str, value: Value) -> Self {
        Self {
            method: SET.to_string(),
            args: vec![Value::String(property.to_string()), value],
        }
    }

    /// Invoke a named function on the target
    pub fn method(name: &str, args: Vec<Value>) -> Self {
        Self {
            method: name.to_string(),
            args,
        }
    }

    /// Property name for `get`/`set` calls
    pub fn property(&self) -> Option<&str> {
        match self.method.as_str() {
            GET | SET => self.args.first().and_then(Value::as_str),
            _ => None,
        }
    }
}

/// What went wrong while carrying a call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The host executed the call and reported an error
    #[error("host error: {0}")]
    Host(String),
    #[error("request {request_id} timed out after {timeout:?}")]
    Timeout { request_id: i32, timeout: Duration },
    #[error("transport I/O: {0}")]
    Io(String),
    #[error("encoding request: {0}")]
    Encode(String),
    /// Encoded message does not fit in one datagram
    #[error("message of {size} bytes exceeds the {limit}-byte datagram limit")]
    Oversized { size: usize, limit: usize },
    #[error("decoding reply: {0}")]
    Decode(String),
    #[error("transport closed")]
    Closed,
}

/// Carries calls to the host
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs (e.g., "in-process", "udp")
    fn name(&self) -> &str;

    /// Execute `call` against the object at `path` and return its raw result
    async fn call(&self, path: &LivePath, call: &HostCall) -> Result<Value, TransportError>;

    /// Release sockets and background tasks
    ///
    /// Default implementation: nothing to release
    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_host_call_property() {
        assert_eq!(HostCall::get("has_clip").property(), Some("has_clip"));
        assert_eq!(HostCall::set("gain_db", json!(-3.0)).property(), Some("gain_db"));
        assert_eq!(HostCall::method("get_notes", vec![]).property(), None);
    }
}
