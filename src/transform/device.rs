//! Device parameter access

use serde_json::json;

use super::{TransformComposer, TransformOutcome};
use crate::error::BridgeError;
use crate::path::PathComponents;

impl TransformComposer {
    pub async fn get_device_parameter(
        &self,
        track: usize,
        device: usize,
        parameter: usize,
    ) -> Result<TransformOutcome, BridgeError> {
        let path = PathComponents::parameter(track, device, parameter).build()?;
        let value = self.read_cached(&path, "value").await?;
        Ok(TransformOutcome::new(format!("{} = {}", path, value), 1).with_value(value))
    }

    pub async fn set_device_parameter(
        &self,
        track: usize,
        device: usize,
        parameter: usize,
        value: f64,
    ) -> Result<TransformOutcome, BridgeError> {
        let path = PathComponents::parameter(track, device, parameter).build()?;
        self.set_property(&path, "value", json!(value)).await?;
        Ok(TransformOutcome::new(format!("Set {} to {}", path, value), 1).with_value(json!(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StateCache;
    use crate::error::ErrorKind;
    use crate::host::MemorySession;
    use crate::invoke::SafeInvoker;
    use crate::retry::RetryPolicy;
    use crate::transport::InProcessTransport;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_then_get_sees_new_value() {
        let session = Arc::new(MemorySession::demo());
        let transport = Arc::new(InProcessTransport::new(session.clone()));
        let composer = TransformComposer::new(SafeInvoker::new(transport), Arc::new(StateCache::default()))
            .with_retry(RetryPolicy::none());

        let before = composer.get_device_parameter(0, 0, 1).await.unwrap();
        assert_eq!(before.value, Some(json!(0.5)));

        composer.set_device_parameter(0, 0, 1, 0.75).await.unwrap();
        let after = composer.get_device_parameter(0, 0, 1).await.unwrap();
        assert_eq!(after.value, Some(json!(0.75)));
        assert_eq!(session.parameter_value(0, 0, 1), Some(0.75));

        let err = composer.set_device_parameter(0, 0, 1, 3.0).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfRange);
    }
}
