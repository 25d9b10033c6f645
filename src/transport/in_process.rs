//! In-process transport - direct calls into the host's scripting bridge

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

use super::{HostCall, Transport, TransportError};
use crate::host::HostBridge;
use crate::path::LivePath;

/// Calls a [`HostBridge`] living in the same process
pub struct InProcessTransport {
    name: String,
    host: Arc<dyn HostBridge>,
}

impl InProcessTransport {
    pub fn new(host: Arc<dyn HostBridge>) -> Self {
        Self {
            name: "in-process".to_string(),
            host,
        }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, path: &LivePath, call: &HostCall) -> Result<Value, TransportError> {
        trace!("{} → {} {}", self.name, path, call.method);
        self.host.call(path, call).map_err(TransportError::Host)
    }
}
