//! Transform composer - multi-step clip and device operations
//!
//! Every operation runs the same pipeline:
//! 1. resolve: build paths from validated indices
//! 2. precondition: check the target exists and has the right type
//! 3. apply: one or more host writes, each retried on `Transient` only
//! 4. invalidate + report: drop cached reads under the written path
//!
//! Steps raise on the first failure and nothing is rolled back. Note writes
//! replace the whole note list, so a retried write lands the same result.

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::StateCache;
use crate::error::BridgeError;
use crate::invoke::{InvokeOptions, SafeInvoker};
use crate::path::LivePath;
use crate::retry::RetryPolicy;
use crate::transport::HostCall;

pub mod audio;
pub mod device;
pub mod export;
pub mod midi;
pub mod notes;
pub mod request;

pub use notes::{Grid, Note, VelocityOp};
pub use request::{ClipTarget, Operation, TransformRequest};

/// Result payload of a successful transform
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformOutcome {
    pub message: String,
    /// Notes, properties or tracks touched
    pub affected: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl TransformOutcome {
    pub fn new(message: impl Into<String>, affected: usize) -> Self {
        Self {
            message: message.into(),
            affected,
            ..Self::default()
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }
}

/// What kind of clip sits in a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipKind {
    Midi,
    Audio,
}

/// Composes host calls into named operations
pub struct TransformComposer {
    invoker: SafeInvoker,
    cache: Arc<StateCache>,
    retry: RwLock<RetryPolicy>,
    export_dir: RwLock<PathBuf>,
}

impl TransformComposer {
    pub fn new(invoker: SafeInvoker, cache: Arc<StateCache>) -> Self {
        Self {
            invoker,
            cache,
            retry: RwLock::new(RetryPolicy::default()),
            export_dir: RwLock::new(PathBuf::from("exports")),
        }
    }

    pub fn with_retry(self, policy: RetryPolicy) -> Self {
        *self.retry.write() = policy;
        self
    }

    pub fn with_export_dir(self, dir: impl Into<PathBuf>) -> Self {
        *self.export_dir.write() = dir.into();
        self
    }

    pub fn cache(&self) -> &Arc<StateCache> {
        &self.cache
    }

    pub fn invoker(&self) -> &SafeInvoker {
        &self.invoker
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        *self.retry.read()
    }

    pub fn set_retry_policy(&self, policy: RetryPolicy) {
        *self.retry.write() = policy;
    }

    pub fn export_dir(&self) -> PathBuf {
        self.export_dir.read().clone()
    }

    pub fn set_export_dir(&self, dir: &Path) {
        *self.export_dir.write() = dir.to_path_buf();
    }

    /// Run one request to completion or first failure
    pub async fn execute(&self, request: TransformRequest) -> Result<TransformOutcome, BridgeError> {
        let operation = request.operation();
        debug!("{}: starting", operation);

        let result = match request {
            TransformRequest::Quantize {
                target,
                grid,
                strength,
            } => self.quantize(target, grid, strength).await,
            TransformRequest::Transpose { target, semitones } => {
                self.transpose(target, semitones).await
            }
            TransformRequest::Velocity { target, op, value } => {
                self.velocity(target, op, value).await
            }
            TransformRequest::Legato { target } => self.legato(target).await,
            TransformRequest::RemoveOverlaps { target } => self.remove_overlaps(target).await,
            TransformRequest::TimeShift { target, amount } => self.time_shift(target, amount).await,
            TransformRequest::Fade {
                target,
                fade_in,
                fade_out,
            } => self.fade(target, fade_in, fade_out).await,
            TransformRequest::Normalize { target, level } => self.normalize(target, level).await,
            TransformRequest::TimeStretch { target, factor } => {
                self.time_stretch(target, factor).await
            }
            TransformRequest::PitchShift {
                target,
                semitones,
                cents,
            } => self.pitch_shift(target, semitones, cents).await,
            TransformRequest::Rotate { target, degrees } => self.rotate(target, degrees).await,
            TransformRequest::ExportTrack { track, file } => self.export_track(track, file).await,
            TransformRequest::ExportStems { directory, tracks } => {
                self.export_stems(directory, tracks).await
            }
            TransformRequest::ReadNotes { target } => self.read_notes(target).await,
            TransformRequest::GetDeviceParameter {
                track,
                device,
                parameter,
            } => self.get_device_parameter(track, device, parameter).await,
            TransformRequest::SetDeviceParameter {
                track,
                device,
                parameter,
                value,
            } => {
                self.set_device_parameter(track, device, parameter, value)
                    .await
            }
        };

        match &result {
            Ok(outcome) => info!("✅ {}: {}", operation, outcome.message),
            Err(e) => warn!("❌ {} failed: {}", operation, e),
        }
        result
    }

    /// Uncached read, retried on `Transient`
    pub(crate) async fn read(&self, path: &LivePath, property: &str) -> Result<Value, BridgeError> {
        let policy = self.retry_policy();
        let options = InvokeOptions::read(property);
        policy
            .run(property, || {
                self.invoker
                    .value(path, HostCall::get(property), &options)
            })
            .await
    }

    /// Read through the cache. A fetch that races an invalidation is returned
    /// to the caller but not stored.
    pub(crate) async fn read_cached(&self, path: &LivePath, property: &str) -> Result<Value, BridgeError> {
        self.call_cached(path, property, HostCall::get(property)).await
    }

    /// Cached result of an arbitrary read-only call, stored under `path#key`
    pub(crate) async fn call_cached(
        &self,
        path: &LivePath,
        key: &str,
        call: HostCall,
    ) -> Result<Value, BridgeError> {
        let cache_key = StateCache::key(path, key);
        if let Some(value) = self.cache.get(&cache_key) {
            return Ok(value);
        }

        let generation = self.cache.generation();
        let policy = self.retry_policy();
        let options = InvokeOptions::read(key);
        let value = policy
            .run(key, || self.invoker.value(path, call.clone(), &options))
            .await?;
        self.cache.set_if_generation(cache_key, value.clone(), generation);
        Ok(value)
    }

    /// Retried write followed by prefix invalidation of `path`.
    ///
    /// Invalidation runs even when the write fails: after a timeout the
    /// host may or may not have applied it.
    pub(crate) async fn write(&self, path: &LivePath, call: HostCall) -> Result<Value, BridgeError> {
        let policy = self.retry_policy();
        let name = call.property().unwrap_or(&call.method).to_string();
        let options = InvokeOptions::write(&name);
        let result = policy
            .run(&name, || self.invoker.value(path, call.clone(), &options))
            .await;
        self.cache.invalidate(path.as_str());
        result
    }

    pub(crate) async fn set_property(
        &self,
        path: &LivePath,
        property: &str,
        value: Value,
    ) -> Result<(), BridgeError> {
        self.write(path, HostCall::set(property, value)).await?;
        Ok(())
    }

    /// Precondition shared by every clip operation: the slot holds a clip
    pub(crate) async fn require_clip(&self, target: ClipTarget) -> Result<ClipKind, BridgeError> {
        let slot = target.slot_path()?;
        let has_clip = self.read_cached(&slot, "has_clip").await?;
        if has_clip != Value::Bool(true) {
            return Err(BridgeError::state(format!("no clip in {}", target)).at(&slot));
        }

        let clip = target.clip_path()?;
        let is_midi = self.read_cached(&clip, "is_midi_clip").await?;
        Ok(if is_midi == Value::Bool(true) {
            ClipKind::Midi
        } else {
            ClipKind::Audio
        })
    }

    pub(crate) async fn read_number(&self, path: &LivePath, property: &str) -> Result<f64, BridgeError> {
        let value = self.read_cached(path, property).await?;
        value.as_f64().ok_or_else(|| {
            BridgeError::state(format!("{} is not numeric ({})", property, value)).at(path)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::host::MemorySession;
    use crate::path::PathComponents;
    use crate::transport::InProcessTransport;
    use std::time::Duration;

    fn composer() -> (TransformComposer, Arc<MemorySession>) {
        let session = Arc::new(MemorySession::demo());
        let transport = Arc::new(InProcessTransport::new(session.clone()));
        let composer = TransformComposer::new(
            SafeInvoker::new(transport),
            Arc::new(StateCache::new(Duration::from_secs(60))),
        )
        .with_retry(RetryPolicy::none());
        (composer, session)
    }

    #[tokio::test]
    async fn test_cached_read_hits_host_once() {
        let (composer, session) = composer();
        let root = LivePath::root();
        composer.read_cached(&root, "track_count").await.unwrap();
        composer.read_cached(&root, "track_count").await.unwrap();
        assert_eq!(session.call_count(), 1);
    }

    #[tokio::test]
    async fn test_write_invalidates_prefix() {
        let (composer, session) = composer();
        let path = PathComponents::parameter(0, 0, 1).build().unwrap();
        composer.read_cached(&path, "value").await.unwrap();
        composer
            .set_property(&path, "value", serde_json::json!(0.25))
            .await
            .unwrap();
        let value = composer.read_cached(&path, "value").await.unwrap();
        assert_eq!(value, serde_json::json!(0.25));
        assert_eq!(session.call_count(), 3);
    }

    #[tokio::test]
    async fn test_require_clip_reports_state() {
        let (composer, _) = composer();
        assert_eq!(
            composer.require_clip(ClipTarget::new(0, 0)).await.unwrap(),
            ClipKind::Midi
        );
        assert_eq!(
            composer.require_clip(ClipTarget::new(2, 0)).await.unwrap(),
            ClipKind::Audio
        );
        let err = composer.require_clip(ClipTarget::new(0, 3)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::State);
    }

    #[tokio::test]
    async fn test_missing_track_is_out_of_range() {
        let (composer, _) = composer();
        let err = composer.require_clip(ClipTarget::new(9, 0)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfRange);
    }
}
