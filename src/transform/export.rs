//! Track and stem export
//!
//! The host renders; the bridge only picks file names and sequences calls.
//! Stems are exported one track at a time and the batch stops at the first
//! failure, leaving already-rendered files in place.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{TransformComposer, TransformOutcome};
use crate::error::BridgeError;
use crate::invoke::InvokeOptions;
use crate::path::{LivePath, PathComponents};
use crate::transport::HostCall;
use crate::validate::{validate_bounded, TRACK};

fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Default export file for a track: `track_<n>_<timestamp>.wav`
pub fn default_track_file(dir: &Path, track: usize, stamp: &str) -> PathBuf {
    dir.join(format!("track_{}_{}.wav", track, stamp))
}

/// File-system-safe version of a track name
fn slug(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "track".to_string()
    } else {
        trimmed.to_string()
    }
}

impl TransformComposer {
    async fn render_track(&self, track: usize, file: &Path) -> Result<String, BridgeError> {
        let path = PathComponents::track(track).build()?;
        let file = file.to_string_lossy().to_string();
        let policy = self.retry_policy();
        let options = InvokeOptions::write("export");

        debug!("exporting track {} to {}", track, file);
        let returned = policy
            .run("export", || {
                self.invoker()
                    .value(&path, HostCall::method("export", vec![json!(file)]), &options)
            })
            .await?;
        Ok(returned.as_str().map(str::to_string).unwrap_or(file))
    }

    pub async fn export_track(&self, track: usize, file: Option<String>) -> Result<TransformOutcome, BridgeError> {
        let file = match file {
            Some(file) => PathBuf::from(file),
            None => default_track_file(&self.export_dir(), track, &timestamp()),
        };
        let written = self.render_track(track, &file).await?;
        Ok(TransformOutcome::new(format!("Exported track {} to {}", track, written), 1)
            .with_files(vec![written]))
    }

    pub async fn export_stems(
        &self,
        directory: Option<String>,
        tracks: Option<Vec<Value>>,
    ) -> Result<TransformOutcome, BridgeError> {
        let dir = directory.map(PathBuf::from).unwrap_or_else(|| self.export_dir());
        let root = LivePath::root();
        let count = self.read_number(&root, "track_count").await? as usize;
        if count == 0 {
            return Err(BridgeError::state("live set has no tracks").at(&root));
        }

        let indices = match tracks {
            Some(raw) => raw
                .iter()
                .map(|value| validate_bounded(&TRACK, value, count))
                .collect::<Result<Vec<_>, _>>()?,
            None => (0..count).collect(),
        };

        let total = indices.len();
        let stamp = timestamp();
        let mut files = Vec::with_capacity(total);
        for track in indices {
            let name = self.track_name(track).await;
            let file = dir.join(format!("{:02}_{}_{}.wav", track + 1, slug(&name), stamp));
            let written = self.render_track(track, &file).await.map_err(|e| BridgeError {
                message: format!("{} ({} of {} stems exported before failure)", e.message, files.len(), total),
                ..e
            })?;
            files.push(written);
        }

        info!("📦 Exported {} stems to {}", files.len(), dir.display());
        Ok(TransformOutcome::new(
            format!("Exported {} stems to {}", files.len(), dir.display()),
            files.len(),
        )
        .with_files(files))
    }

    /// Track name for file naming; falls back to the index when the host won't say
    async fn track_name(&self, track: usize) -> String {
        let fallback = format!("track_{}", track);
        let Ok(path) = PathComponents::track(track).build() else {
            return fallback;
        };
        let probe = self
            .invoker()
            .invoke(&path, HostCall::get("name"), &InvokeOptions::probe("track name"))
            .await;
        match probe {
            Ok(result) if result.success => result
                .value
                .as_str()
                .map(str::to_string)
                .unwrap_or(fallback),
            _ => fallback,
        }
    }
}
