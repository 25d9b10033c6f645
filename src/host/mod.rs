//! Host-side object model access
//!
//! [`HostBridge`] is the shape of the host's scripting bridge object: resolve
//! a path, run a method, return a JSON value or the host's error string.
//! [`memory::MemorySession`] implements it over an in-memory live set.

use serde_json::Value;

use crate::path::LivePath;
use crate::transport::HostCall;

pub mod memory;

pub use memory::MemorySession;

/// The host's scripting bridge. Errors are the host's own wording; the
/// bridge classifies them later.
pub trait HostBridge: Send + Sync {
    fn call(&self, path: &LivePath, call: &HostCall) -> Result<Value, String>;
}
