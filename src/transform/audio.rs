//! Clip operations that act on audio clips, and the ones that branch on
//! clip type (MIDI edits notes, audio edits clip properties)

use serde_json::json;

use super::notes::{clamp_velocity, MAX_PITCH, MAX_VELOCITY};
use super::{ClipKind, ClipTarget, TransformComposer, TransformOutcome};
use crate::error::BridgeError;

/// Peak level `normalize` aims for on audio clips, in dBFS
pub const DEFAULT_NORMALIZE_DB: f64 = -0.3;

const PITCH_COARSE_LIMIT: i64 = 48;

/// 30° per semitone. No clip survives a shift wider than the MIDI pitch range.
fn rotation_semitones(degrees: f64) -> Result<i32, BridgeError> {
    let semitones = (degrees / 30.0).round();
    if !semitones.is_finite() || semitones.abs() > f64::from(MAX_PITCH) {
        return Err(BridgeError::out_of_range(format!(
            "rotating by {}° shifts pitch by more than {} semitones",
            degrees, MAX_PITCH
        )));
    }
    Ok(semitones as i32)
}

impl TransformComposer {
    pub async fn time_shift(&self, target: ClipTarget, amount: f64) -> Result<TransformOutcome, BridgeError> {
        match self.require_clip(target).await? {
            ClipKind::Midi => {
                let count = self.shift_notes(target, amount).await?;
                Ok(TransformOutcome::new(
                    format!("Shifted {} notes by {} beats", count, amount),
                    count,
                ))
            }
            ClipKind::Audio => {
                let clip = target.clip_path()?;
                let marker = self.read_number(&clip, "start_marker").await?;
                // Moving the content later means starting playback earlier in the file
                let moved = marker - amount;
                self.set_property(&clip, "start_marker", json!(moved)).await?;
                Ok(TransformOutcome::new(
                    format!("Moved start marker from {} to {}", marker, moved),
                    1,
                ))
            }
        }
    }

    pub async fn fade(
        &self,
        target: ClipTarget,
        fade_in: f64,
        fade_out: f64,
    ) -> Result<TransformOutcome, BridgeError> {
        match self.require_clip(target).await? {
            ClipKind::Midi => {
                let count = self.fade_notes(target, fade_in, fade_out).await?;
                Ok(TransformOutcome::new(
                    format!("Faded {} notes (in {} / out {} beats)", count, fade_in, fade_out),
                    count,
                ))
            }
            ClipKind::Audio => {
                let clip = target.clip_path()?;
                self.set_property(&clip, "fade_in_time", json!(fade_in)).await?;
                self.set_property(&clip, "fade_out_time", json!(fade_out)).await?;
                Ok(TransformOutcome::new(
                    format!("Set clip fades to in {} / out {} beats", fade_in, fade_out),
                    2,
                ))
            }
        }
    }

    pub async fn normalize(&self, target: ClipTarget, level: Option<f64>) -> Result<TransformOutcome, BridgeError> {
        match self.require_clip(target).await? {
            ClipKind::Midi => {
                let velocity = level.map(clamp_velocity).unwrap_or(MAX_VELOCITY);
                let count = self.normalize_notes(target, velocity).await?;
                Ok(TransformOutcome::new(
                    format!("Normalized {} notes to velocity {}", count, velocity),
                    count,
                ))
            }
            ClipKind::Audio => {
                let clip = target.clip_path()?;
                let target_db = level.unwrap_or(DEFAULT_NORMALIZE_DB);
                // Peak is read fresh; a cached peak from before an edit is useless here
                let peak = self.read(&clip, "peak_db").await?;
                let peak_db = peak.as_f64().ok_or_else(|| {
                    BridgeError::state(format!("peak_db is not numeric ({})", peak)).at(&clip)
                })?;
                let gain = target_db - peak_db;
                self.set_property(&clip, "gain_db", json!(gain)).await?;
                Ok(TransformOutcome::new(
                    format!("Normalized clip to {} dBFS (gain {:+.1} dB)", target_db, gain),
                    1,
                ))
            }
        }
    }

    pub async fn time_stretch(&self, target: ClipTarget, factor: f64) -> Result<TransformOutcome, BridgeError> {
        match self.require_clip(target).await? {
            ClipKind::Midi => {
                let count = self.stretch_notes(target, factor).await?;
                Ok(TransformOutcome::new(
                    format!("Stretched {} notes by {}x", count, factor),
                    count,
                ))
            }
            ClipKind::Audio => {
                let clip = target.clip_path()?;
                self.set_property(&clip, "warping", json!(true)).await?;
                self.set_property(&clip, "warp_factor", json!(factor)).await?;
                Ok(TransformOutcome::new(format!("Warped clip by {}x", factor), 2))
            }
        }
    }

    pub async fn pitch_shift(
        &self,
        target: ClipTarget,
        semitones: i32,
        cents: f64,
    ) -> Result<TransformOutcome, BridgeError> {
        let clip = self.require_audio(target, "pitchShift").await?;
        self.set_property(&clip, "pitch_coarse", json!(semitones)).await?;
        self.set_property(&clip, "pitch_fine", json!(cents)).await?;
        Ok(TransformOutcome::new(
            format!("Pitch set to {:+} semitones {:+} cents", semitones, cents),
            2,
        ))
    }

    /// Degrees map to pitch (30° per semitone) and, for MIDI, time (90° per beat)
    pub async fn rotate(&self, target: ClipTarget, degrees: f64) -> Result<TransformOutcome, BridgeError> {
        let semitones = rotation_semitones(degrees)?;
        match self.require_clip(target).await? {
            ClipKind::Midi => {
                let shift = degrees / 90.0;
                let count = self.rotate_notes(target, semitones, shift).await?;
                Ok(TransformOutcome::new(
                    format!(
                        "Rotated {} notes by {}° ({:+} semitones, {} beats)",
                        count, degrees, semitones, shift
                    ),
                    count,
                ))
            }
            ClipKind::Audio => {
                let clip = target.clip_path()?;
                let current = self.read_number(&clip, "pitch_coarse").await? as i64;
                let coarse = current + i64::from(semitones);
                if coarse.abs() > PITCH_COARSE_LIMIT {
                    return Err(BridgeError::out_of_range(format!(
                        "rotating to {} semitones leaves -48..=48",
                        coarse
                    ))
                    .at(&clip));
                }
                self.set_property(&clip, "pitch_coarse", json!(coarse)).await?;
                Ok(TransformOutcome::new(
                    format!("Rotated audio clip by {}° ({:+} semitones)", degrees, semitones),
                    1,
                ))
            }
        }
    }

    async fn require_audio(
        &self,
        target: ClipTarget,
        operation: &str,
    ) -> Result<crate::path::LivePath, BridgeError> {
        let clip = target.clip_path()?;
        match self.require_clip(target).await? {
            ClipKind::Audio => Ok(clip),
            ClipKind::Midi => Err(BridgeError::state(format!(
                "{} needs an audio clip, {} holds MIDI",
                operation, target
            ))
            .at(&clip)),
        }
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

    fn composer() -> (TransformComposer, Arc<MemorySession>) {
        let session = Arc::new(MemorySession::demo());
        let transport = Arc::new(InProcessTransport::new(session.clone()));
        let composer = TransformComposer::new(SafeInvoker::new(transport), Arc::new(StateCache::default()))
            .with_retry(RetryPolicy::none());
        (composer, session)
    }

    const VOX: ClipTarget = ClipTarget {
        track: 2,
        clip_slot: 0,
    };

    #[test]
    fn test_rotation_semitones_bounds() {
        assert_eq!(rotation_semitones(90.0).unwrap(), 3);
        assert_eq!(rotation_semitones(-60.0).unwrap(), -2);
        assert_eq!(rotation_semitones(3810.0).unwrap(), 127);
        assert_eq!(rotation_semitones(3840.0).unwrap_err().kind, ErrorKind::OutOfRange);
        assert_eq!(rotation_semitones(-1e12).unwrap_err().kind, ErrorKind::OutOfRange);
    }

    #[tokio::test]
    async fn test_huge_rotation_rejected_before_host_calls() {
        let (composer, session) = composer();
        let before = session.notes(0, 0).unwrap();
        let target = ClipTarget {
            track: 0,
            clip_slot: 0,
        };

        let err = composer.rotate(target, 1e12).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::OutOfRange);
        assert_eq!(session.call_count(), 0);
        assert_eq!(session.notes(0, 0).unwrap(), before);
    }

    #[tokio::test]
    async fn test_normalize_audio_sets_gain() {
        let (composer, session) = composer();
        composer.normalize(VOX, None).await.unwrap();
        let audio = session.audio_clip(2, 0).unwrap();
        assert!((audio.gain_db - 5.7).abs() < 1e-9, "{}", audio.gain_db);
    }

    #[tokio::test]
    async fn test_time_stretch_audio_enables_warping() {
        let (composer, session) = composer();
        composer.time_stretch(VOX, 0.5).await.unwrap();
        let audio = session.audio_clip(2, 0).unwrap();
        assert!(audio.warping);
        assert_eq!(audio.warp_factor, 0.5);
    }

    #[tokio::test]
    async fn test_time_shift_audio_moves_marker_back() {
        let (composer, session) = composer();
        composer.time_shift(VOX, -1.0).await.unwrap();
        assert_eq!(session.audio_clip(2, 0).unwrap().start_marker, 1.0);
    }

    #[tokio::test]
    async fn test_pitch_shift_requires_audio() {
        let (composer, _) = composer();
        let err = composer
            .pitch_shift(ClipTarget::new(0, 0), 3, 0.0)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::State);
    }

    #[tokio::test]
    async fn test_fade_past_clip_end_is_host_range_error() {
        let (composer, _) = composer();
        let err = composer.fade(VOX, 0.0, 20.0).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfRange);
    }

    #[tokio::test]
    async fn test_midi_normalize_defaults_to_full_velocity() {
        let (composer, session) = composer();
        composer.normalize(ClipTarget::new(0, 0), None).await.unwrap();
        let loudest = session.notes(0, 0).unwrap().iter().map(|n| n.velocity).max();
        assert_eq!(loudest, Some(127));
    }
}
