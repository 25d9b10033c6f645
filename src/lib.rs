//! Control bridge for a live DAW session
//!
//! Layers, bottom-up:
//! - [`path`] and [`validate`]: addressing and index checks, no I/O
//! - [`transport`]: carries calls to the host (in-process or OSC over UDP)
//! - [`invoke`] and [`error`]: one call, one classification
//! - [`cache`] and [`retry`]: cheap repeated reads, bounded retries
//! - [`transform`]: named multi-step clip and device operations
//! - [`service`]: JSON-in/JSON-out entry point with correlation ids
//!
//! [`host::MemorySession`] is an in-memory live set for tests and simulation.

pub mod cache;
pub mod config;
pub mod error;
pub mod host;
pub mod invoke;
pub mod path;
pub mod retry;
pub mod service;
pub mod transform;
pub mod transport;
pub mod validate;

pub use error::{BridgeError, CallResult, ErrorKind};
pub use path::{LivePath, PathComponents};
pub use service::{Bridge, ServiceResponse};
pub use transform::{TransformOutcome, TransformRequest};
