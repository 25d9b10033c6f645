//! Note-level operations on MIDI clips

use serde_json::Value;

use super::notes::{self, Grid, Note, VelocityOp};
use super::{ClipKind, ClipTarget, TransformComposer, TransformOutcome};
use crate::error::BridgeError;
use crate::path::LivePath;
use crate::transport::HostCall;

const NOTES_KEY: &str = "notes";

impl TransformComposer {
    /// Current notes of a clip, served from the cache while fresh
    pub(crate) async fn load_notes(&self, clip: &LivePath) -> Result<Vec<Note>, BridgeError> {
        let raw = self
            .call_cached(clip, NOTES_KEY, HostCall::method("get_notes", vec![]))
            .await?;
        serde_json::from_value(raw)
            .map_err(|e| BridgeError::state(format!("unreadable note list: {}", e)).at(clip))
    }

    /// Replace the clip's notes in one call
    pub(crate) async fn store_notes(&self, clip: &LivePath, notes: &[Note]) -> Result<(), BridgeError> {
        let payload = serde_json::to_value(notes)
            .map_err(|e| BridgeError::invalid_path(format!("unencodable notes: {}", e)))?;
        self.write(clip, HostCall::method("set_notes", vec![payload]))
            .await?;
        Ok(())
    }

    async fn require_midi(&self, target: ClipTarget, operation: &str) -> Result<LivePath, BridgeError> {
        let clip = target.clip_path()?;
        match self.require_clip(target).await? {
            ClipKind::Midi => Ok(clip),
            ClipKind::Audio => Err(BridgeError::state(format!(
                "{} needs a MIDI clip, {} holds audio",
                operation, target
            ))
            .at(&clip)),
        }
    }

    /// Load, edit and store the notes of a MIDI clip. Empty clips are a
    /// `State` failure. Returns the number of notes written.
    pub(crate) async fn edit_notes<F>(
        &self,
        target: ClipTarget,
        operation: &str,
        edit: F,
    ) -> Result<usize, BridgeError>
    where
        F: FnOnce(Vec<Note>) -> Result<Vec<Note>, BridgeError>,
    {
        let clip = self.require_midi(target, operation).await?;
        let current = self.load_notes(&clip).await?;
        if current.is_empty() {
            return Err(BridgeError::state(format!("clip at {} has no notes", target)).at(&clip));
        }
        let edited = edit(current).map_err(|e| e.at(&clip))?;
        self.store_notes(&clip, &edited).await?;
        Ok(edited.len())
    }

    pub async fn quantize(
        &self,
        target: ClipTarget,
        grid: Grid,
        strength: f64,
    ) -> Result<TransformOutcome, BridgeError> {
        let count = self
            .edit_notes(target, "quantize", |mut notes| {
                notes::quantize(&mut notes, grid, strength);
                Ok(notes)
            })
            .await?;
        Ok(TransformOutcome::new(
            format!(
                "Quantized {} notes to {} grid at {}% strength",
                count, grid, strength
            ),
            count,
        ))
    }

    pub async fn transpose(&self, target: ClipTarget, semitones: i32) -> Result<TransformOutcome, BridgeError> {
        let count = self.transpose_notes(target, semitones).await?;
        Ok(TransformOutcome::new(
            format!("Transposed {} notes by {:+} semitones", count, semitones),
            count,
        ))
    }

    async fn transpose_notes(&self, target: ClipTarget, semitones: i32) -> Result<usize, BridgeError> {
        self.edit_notes(target, "transpose", |notes| notes::transpose(&notes, semitones))
            .await
    }

    pub async fn velocity(
        &self,
        target: ClipTarget,
        op: VelocityOp,
        value: f64,
    ) -> Result<TransformOutcome, BridgeError> {
        let count = self
            .edit_notes(target, "velocity", |mut notes| {
                notes::apply_velocity(&mut notes, op, value);
                Ok(notes)
            })
            .await?;
        Ok(TransformOutcome::new(
            format!("Applied velocity {} {} to {} notes", op, value, count),
            count,
        ))
    }

    pub async fn legato(&self, target: ClipTarget) -> Result<TransformOutcome, BridgeError> {
        let clip = target.clip_path()?;
        let length = self.read_number(&clip, "length").await?;
        let count = self
            .edit_notes(target, "legato", |mut notes| {
                notes::legato(&mut notes, length);
                Ok(notes)
            })
            .await?;
        Ok(TransformOutcome::new(format!("Made {} notes legato", count), count))
    }

    pub async fn remove_overlaps(&self, target: ClipTarget) -> Result<TransformOutcome, BridgeError> {
        let mut before = 0;
        let count = self
            .edit_notes(target, "removeOverlaps", |notes| {
                before = notes.len();
                Ok(notes::remove_overlaps(notes))
            })
            .await?;
        let removed = before.saturating_sub(count);
        Ok(TransformOutcome::new(
            format!("Removed overlaps, {} notes kept, {} dropped", count, removed),
            count,
        ))
    }

    /// Cached note list as a JSON value
    pub async fn read_notes(&self, target: ClipTarget) -> Result<TransformOutcome, BridgeError> {
        let clip = self.require_midi(target, "readNotes").await?;
        let notes = self.load_notes(&clip).await?;
        let value = serde_json::to_value(&notes).unwrap_or(Value::Null);
        Ok(TransformOutcome::new(format!("Read {} notes", notes.len()), notes.len()).with_value(value))
    }

    pub(crate) async fn shift_notes(&self, target: ClipTarget, amount: f64) -> Result<usize, BridgeError> {
        self.edit_notes(target, "timeShift", |mut notes| {
            notes::time_shift(&mut notes, amount);
            Ok(notes)
        })
        .await
    }

    pub(crate) async fn fade_notes(
        &self,
        target: ClipTarget,
        fade_in: f64,
        fade_out: f64,
    ) -> Result<usize, BridgeError> {
        let clip = target.clip_path()?;
        let length = self.read_number(&clip, "length").await?;
        self.edit_notes(target, "fade", |mut notes| {
            notes::fade_velocities(&mut notes, fade_in, fade_out, length);
            Ok(notes)
        })
        .await
    }

    pub(crate) async fn normalize_notes(&self, target: ClipTarget, velocity: u8) -> Result<usize, BridgeError> {
        self.edit_notes(target, "normalize", |mut notes| {
            notes::normalize_velocities(&mut notes, velocity);
            Ok(notes)
        })
        .await
    }

    pub(crate) async fn stretch_notes(&self, target: ClipTarget, factor: f64) -> Result<usize, BridgeError> {
        self.edit_notes(target, "timeStretch", |mut notes| {
            notes::time_stretch(&mut notes, factor);
            Ok(notes)
        })
        .await
    }

    /// Transpose, then shift: two separate note writes
    pub(crate) async fn rotate_notes(
        &self,
        target: ClipTarget,
        semitones: i32,
        shift: f64,
    ) -> Result<usize, BridgeError> {
        let mut count = 0;
        if semitones != 0 {
            count = self.transpose_notes(target, semitones).await?;
        }
        if shift != 0.0 {
            count = self.shift_notes(target, shift).await?;
        }
        Ok(count)
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

    #[tokio::test]
    async fn test_quantize_snaps_and_reports() {
        let (composer, session) = composer();
        let outcome = composer
            .quantize(ClipTarget::new(0, 0), Grid::SIXTEENTH, 100.0)
            .await
            .unwrap();
        assert_eq!(outcome.message, "Quantized 4 notes to 1/16 grid at 100% strength");

        let starts: Vec<f64> = session.notes(0, 0).unwrap().iter().map(|n| n.start).collect();
        assert_eq!(starts, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_transpose_out_of_range_writes_nothing() {
        let (composer, session) = composer();
        let before = session.notes(0, 0).unwrap();
        let err = composer.transpose(ClipTarget::new(0, 0), 60).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfRange);
        assert_eq!(session.notes(0, 0).unwrap(), before);
    }

    #[tokio::test]
    async fn test_transpose_audio_clip_is_state() {
        let (composer, _) = composer();
        let err = composer.transpose(ClipTarget::new(2, 0), 2).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::State);
    }

    #[tokio::test]
    async fn test_empty_clip_is_state() {
        let (composer, session) = composer();
        session.set_midi_clip(1, 3, 4.0, vec![]);
        let err = composer
            .quantize(ClipTarget::new(1, 3), Grid::SIXTEENTH, 100.0)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::State);
    }

    #[tokio::test]
    async fn test_legato_uses_clip_length() {
        let (composer, session) = composer();
        composer.legato(ClipTarget::new(1, 0)).await.unwrap();
        let durations: Vec<f64> = session.notes(1, 0).unwrap().iter().map(|n| n.duration).collect();
        assert_eq!(durations, vec![1.0, 1.0, 1.0, 1.0]);
    }

    #[tokio::test]
    async fn test_read_notes_served_from_cache() {
        let (composer, session) = composer();
        composer.read_notes(ClipTarget::new(0, 0)).await.unwrap();
        let calls = session.call_count();
        let outcome = composer.read_notes(ClipTarget::new(0, 0)).await.unwrap();
        assert_eq!(session.call_count(), calls);
        assert_eq!(outcome.affected, 4);
    }
}
