//! Safe invoker - the single boundary where remote calls are made and their
//! failures classified
//!
//! Every host call goes through [`SafeInvoker::invoke`]. It runs the call
//! once (never retries), maps failures through [`classify`], and either
//! returns a failed [`CallResult`] or raises a [`BridgeError`], depending on
//! [`InvokeOptions::throw_on_error`].

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::{classify, BridgeError, CallResult};
use crate::path::LivePath;
use crate::transport::{HostCall, Transport};

/// Per-call behaviour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeOptions {
    /// Operation name for logs
    pub name: String,
    /// A null result counts as a failure
    pub required: bool,
    /// Raise failures instead of returning them in the `CallResult`
    pub throw_on_error: bool,
}

impl InvokeOptions {
    /// A read whose value the caller needs
    pub fn read(name: &str) -> Self {
        Self {
            name: name.to_string(),
            required: true,
            throw_on_error: true,
        }
    }

    /// A write; the host returns nothing useful
    pub fn write(name: &str) -> Self {
        Self {
            name: name.to_string(),
            required: false,
            throw_on_error: true,
        }
    }

    /// Best-effort probe; failures come back inside the `CallResult`
    pub fn probe(name: &str) -> Self {
        Self {
            name: name.to_string(),
            required: false,
            throw_on_error: false,
        }
    }
}

/// Runs host calls through a [`Transport`] and classifies what comes back
#[derive(Clone)]
pub struct SafeInvoker {
    transport: Arc<dyn Transport>,
}

impl SafeInvoker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub async fn invoke(
        &self,
        path: &LivePath,
        call: HostCall,
        options: &InvokeOptions,
    ) -> Result<CallResult, BridgeError> {
        let outcome = match self.transport.call(path, &call).await {
            Ok(Value::Null) if options.required => Err(BridgeError::state(format!(
                "{}: {} {} returned nothing",
                options.name, path, call.method
            ))),
            Ok(value) => Ok(value),
            Err(e) => Err(BridgeError::new(classify(&e), e.to_string())),
        };

        match outcome {
            Ok(value) => Ok(CallResult::ok(value)),
            Err(err) => {
                let err = err.at(path);
                if options.throw_on_error {
                    return Err(err);
                }
                debug!(
                    "{}: {} on {} swallowed ({}): {}",
                    options.name, call.method, path, err.kind, err.message
                );
                Ok(CallResult::failed(&err))
            }
        }
    }

    /// `invoke` with throwing options, returning the bare value
    pub async fn value(
        &self,
        path: &LivePath,
        call: HostCall,
        options: &InvokeOptions,
    ) -> Result<Value, BridgeError> {
        let options = InvokeOptions {
            throw_on_error: true,
            ..options.clone()
        };
        Ok(self.invoke(path, call, &options).await?.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::host::MemorySession;
    use crate::path::PathComponents;
    use crate::transport::InProcessTransport;
    use serde_json::json;

    fn invoker() -> (SafeInvoker, Arc<MemorySession>) {
        let session = Arc::new(MemorySession::demo());
        let transport = Arc::new(InProcessTransport::new(session.clone()));
        (SafeInvoker::new(transport), session)
    }

    #[tokio::test]
    async fn test_success_wraps_value() {
        let (invoker, _) = invoker();
        let result = invoker
            .invoke(&LivePath::root(), HostCall::get("track_count"), &InvokeOptions::read("count"))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.value, json!(3));
    }

    #[tokio::test]
    async fn test_throwing_failure_is_classified_with_path() {
        let (invoker, _) = invoker();
        let path = PathComponents::clip(0, 6).build().unwrap();
        let err = invoker
            .invoke(&path, HostCall::get("length"), &InvokeOptions::read("length"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::State);
        assert_eq!(err.path.as_deref(), Some("live_set tracks 0 clip_slots 6 clip"));
    }

    #[tokio::test]
    async fn test_probe_swallows_failure() {
        let (invoker, _) = invoker();
        let path = PathComponents::clip(0, 6).build().unwrap();
        let result = invoker
            .invoke(&path, HostCall::get("length"), &InvokeOptions::probe("length"))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::State));
    }

    #[tokio::test]
    async fn test_invoke_never_retries() {
        let (invoker, session) = invoker();
        session.fail_next(1, "Host busy");
        let err = invoker
            .invoke(&LivePath::root(), HostCall::get("tempo"), &InvokeOptions::read("tempo"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transient);
        assert_eq!(session.call_count(), 1);
    }

    #[tokio::test]
    async fn test_required_null_is_state() {
        let (invoker, _) = invoker();
        let path = PathComponents::track(0).build().unwrap();
        // set returns null; marking it required turns that into a failure
        let err = invoker
            .invoke(&path, HostCall::set("name", json!("Lead")), &InvokeOptions::read("rename"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::State);
    }
}
