//! MemorySession - an in-memory live set behind the [`HostBridge`] interface
//!
//! Behaves like the real host where the bridge can observe it: same path
//! grammar, same property names, and error strings in the host's wording
//! ("Index out of range", "No clip in slot", "is read-only"). It also has
//! knobs for simulating a busy host.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use super::HostBridge;
use crate::path::LivePath;
use crate::transform::notes::Note;
use crate::transport::{HostCall, GET, SET};

/// Clip slots per track
pub const DEFAULT_SLOTS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

impl Parameter {
    pub fn new(name: &str, value: f64, min: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            min,
            max,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub name: String,
    pub parameters: Vec<Parameter>,
}

/// Properties of an audio clip the bridge can see
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub peak_db: f64,
    pub gain_db: f64,
    pub pitch_coarse: i64,
    pub pitch_fine: f64,
    pub warping: bool,
    pub warp_factor: f64,
    pub fade_in_time: f64,
    pub fade_out_time: f64,
    pub start_marker: f64,
}

impl AudioClip {
    pub fn with_peak(peak_db: f64) -> Self {
        Self {
            peak_db,
            gain_db: 0.0,
            pitch_coarse: 0,
            pitch_fine: 0.0,
            warping: false,
            warp_factor: 1.0,
            fade_in_time: 0.0,
            fade_out_time: 0.0,
            start_marker: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClipContent {
    Midi(Vec<Note>),
    Audio(AudioClip),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub name: String,
    pub length: f64,
    pub content: ClipContent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub name: String,
    pub devices: Vec<Device>,
    pub clip_slots: Vec<Option<Clip>>,
}

#[derive(Debug)]
struct SessionState {
    tracks: Vec<Track>,
    tempo: f64,
    exports: Vec<String>,
}

/// Simulated busy period
#[derive(Debug)]
struct BusyWindow {
    remaining: u32,
    message: String,
}

/// In-memory live set
pub struct MemorySession {
    state: Mutex<SessionState>,
    busy: Mutex<Option<BusyWindow>>,
    calls: AtomicUsize,
}

impl MemorySession {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState {
                tracks: Vec::new(),
                tempo: 120.0,
                exports: Vec::new(),
            }),
            busy: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Three-track session: a MIDI track with an off-grid clip and a synth,
    /// a drum track, and an audio track with a vocal clip
    pub fn demo() -> Self {
        let session = Self::new();

        let keys = session.add_track("Keys");
        session.add_device(
            keys,
            "Operator",
            vec![
                Parameter::new("Device On", 1.0, 0.0, 1.0),
                Parameter::new("Filter Freq", 0.5, 0.0, 1.0),
                Parameter::new("Volume", 0.85, 0.0, 1.0),
            ],
        );
        session.set_midi_clip(
            keys,
            0,
            4.0,
            vec![
                Note::new(60, 0.05, 0.5, 90),
                Note::new(64, 0.98, 0.5, 80),
                Note::new(67, 2.1, 0.75, 100),
                Note::new(72, 3.02, 0.5, 70),
            ],
        );

        let drums = session.add_track("Drums");
        session.set_midi_clip(
            drums,
            0,
            4.0,
            vec![
                Note::new(36, 0.0, 0.25, 120),
                Note::new(38, 1.0, 0.25, 110),
                Note::new(36, 2.0, 0.25, 120),
                Note::new(38, 3.0, 0.25, 110),
            ],
        );

        let vox = session.add_track("Vox");
        session.set_audio_clip(vox, 0, 8.0, -6.0);

        session
    }

    /// Append a track with empty clip slots; returns its index
    pub fn add_track(&self, name: &str) -> usize {
        let mut state = self.state.lock();
        state.tracks.push(Track {
            name: name.to_string(),
            devices: Vec::new(),
            clip_slots: vec![None; DEFAULT_SLOTS],
        });
        state.tracks.len() - 1
    }

    /// Append a device to a track; returns its index
    pub fn add_device(&self, track: usize, name: &str, parameters: Vec<Parameter>) -> usize {
        let mut state = self.state.lock();
        let devices = &mut state.tracks[track].devices;
        devices.push(Device {
            name: name.to_string(),
            parameters,
        });
        devices.len() - 1
    }

    pub fn set_midi_clip(&self, track: usize, slot: usize, length: f64, notes: Vec<Note>) {
        self.put_clip(
            track,
            slot,
            Clip {
                name: format!("MIDI {}", slot + 1),
                length,
                content: ClipContent::Midi(notes),
            },
        );
    }

    pub fn set_audio_clip(&self, track: usize, slot: usize, length: f64, peak_db: f64) {
        self.put_clip(
            track,
            slot,
            Clip {
                name: format!("Audio {}", slot + 1),
                length,
                content: ClipContent::Audio(AudioClip::with_peak(peak_db)),
            },
        );
    }

    fn put_clip(&self, track: usize, slot: usize, clip: Clip) {
        let mut state = self.state.lock();
        state.tracks[track].clip_slots[slot] = Some(clip);
    }

    pub fn remove_clip(&self, track: usize, slot: usize) {
        let mut state = self.state.lock();
        state.tracks[track].clip_slots[slot] = None;
    }

    /// Direct look at a MIDI clip's notes, bypassing the bridge
    pub fn notes(&self, track: usize, slot: usize) -> Option<Vec<Note>> {
        let state = self.state.lock();
        match &state.tracks.get(track)?.clip_slots.get(slot)?.as_ref()?.content {
            ClipContent::Midi(notes) => Some(notes.clone()),
            ClipContent::Audio(_) => None,
        }
    }

    /// Direct look at an audio clip, bypassing the bridge
    pub fn audio_clip(&self, track: usize, slot: usize) -> Option<AudioClip> {
        let state = self.state.lock();
        match &state.tracks.get(track)?.clip_slots.get(slot)?.as_ref()?.content {
            ClipContent::Audio(audio) => Some(audio.clone()),
            ClipContent::Midi(_) => None,
        }
    }

    pub fn parameter_value(&self, track: usize, device: usize, parameter: usize) -> Option<f64> {
        let state = self.state.lock();
        state
            .tracks
            .get(track)?
            .devices
            .get(device)?
            .parameters
            .get(parameter)
            .map(|p| p.value)
    }

    /// Make the next `calls` calls fail with `message`
    pub fn fail_next(&self, calls: u32, message: &str) {
        *self.busy.lock() = Some(BusyWindow {
            remaining: calls,
            message: message.to_string(),
        });
    }

    /// Number of calls received, failed ones included
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Files rendered by `export`, in order
    pub fn exports(&self) -> Vec<String> {
        self.state.lock().exports.clone()
    }

    fn take_busy(&self) -> Option<String> {
        let mut busy = self.busy.lock();
        let window = busy.as_mut()?;
        if window.remaining == 0 {
            *busy = None;
            return None;
        }
        window.remaining -= 1;
        Some(window.message.clone())
    }
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBridge for MemorySession {
    fn call(&self, path: &LivePath, call: &HostCall) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.take_busy() {
            debug!("memory host busy: {} {}", path, call.method);
            return Err(message);
        }

        let c = *path.components();
        let mut guard = self.state.lock();
        let SessionState {
            tracks,
            tempo,
            exports,
        } = &mut *guard;

        let Some(t) = c.track else {
            return live_set_call(tracks.len(), tempo, call);
        };
        let track = tracks
            .get_mut(t)
            .ok_or_else(|| format!("Index out of range: track {}", t))?;

        if let Some(d) = c.device {
            let device = track
                .devices
                .get_mut(d)
                .ok_or_else(|| format!("Index out of range: device {}", d))?;
            return match c.parameter {
                Some(p) => {
                    let parameter = device
                        .parameters
                        .get_mut(p)
                        .ok_or_else(|| format!("Index out of range: parameter {}", p))?;
                    parameter_call(parameter, call)
                }
                None => device_call(device, call),
            };
        }

        if let Some(s) = c.clip_slot {
            let slot = track
                .clip_slots
                .get_mut(s)
                .ok_or_else(|| format!("Index out of range: clip slot {}", s))?;
            if !c.clip {
                return slot_call(slot.is_some(), call);
            }
            let clip = slot
                .as_mut()
                .ok_or_else(|| format!("No clip in slot {}", s))?;
            return clip_call(clip, call);
        }

        track_call(track, exports, call)
    }
}

fn property(call: &HostCall) -> Result<&str, String> {
    call.property()
        .ok_or_else(|| "Invalid call: missing property name".to_string())
}

fn set_value(call: &HostCall) -> Result<&Value, String> {
    call.args
        .get(1)
        .ok_or_else(|| "Invalid call: missing value".to_string())
}

fn number(call: &HostCall, name: &str) -> Result<f64, String> {
    set_value(call)?
        .as_f64()
        .ok_or_else(|| format!("Invalid value for '{}'", name))
}

fn unknown_property(name: &str) -> String {
    format!("Unknown property '{}'", name)
}

fn read_only(name: &str) -> String {
    format!("Property '{}' is read-only", name)
}

fn unknown_method(call: &HostCall) -> String {
    format!("Unknown method '{}'", call.method)
}

fn live_set_call(track_count: usize, tempo: &mut f64, call: &HostCall) -> Result<Value, String> {
    match call.method.as_str() {
        GET => match property(call)? {
            "track_count" => Ok(json!(track_count)),
            "tempo" => Ok(json!(*tempo)),
            other => Err(unknown_property(other)),
        },
        SET => match property(call)? {
            "tempo" => {
                let value = number(call, "tempo")?;
                if !(20.0..=999.0).contains(&value) {
                    return Err(format!("Tempo {} out of range", value));
                }
                *tempo = value;
                Ok(Value::Null)
            }
            "track_count" => Err(read_only("track_count")),
            other => Err(unknown_property(other)),
        },
        _ => Err(unknown_method(call)),
    }
}

fn track_call(track: &mut Track, exports: &mut Vec<String>, call: &HostCall) -> Result<Value, String> {
    match call.method.as_str() {
        GET => match property(call)? {
            "name" => Ok(json!(track.name)),
            "device_count" => Ok(json!(track.devices.len())),
            "clip_slot_count" => Ok(json!(track.clip_slots.len())),
            other => Err(unknown_property(other)),
        },
        SET => match property(call)? {
            "name" => {
                let name = set_value(call)?
                    .as_str()
                    .ok_or_else(|| "Invalid value for 'name'".to_string())?;
                track.name = name.to_string();
                Ok(Value::Null)
            }
            "device_count" | "clip_slot_count" => Err(read_only(property(call)?)),
            other => Err(unknown_property(other)),
        },
        "export" => {
            let file = call
                .args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| "Invalid call: export needs a file name".to_string())?;
            exports.push(file.to_string());
            Ok(json!(file))
        }
        _ => Err(unknown_method(call)),
    }
}

fn device_call(device: &Device, call: &HostCall) -> Result<Value, String> {
    match call.method.as_str() {
        GET => match property(call)? {
            "name" => Ok(json!(device.name)),
            "parameter_count" => Ok(json!(device.parameters.len())),
            other => Err(unknown_property(other)),
        },
        SET => Err(read_only(property(call)?)),
        _ => Err(unknown_method(call)),
    }
}

fn parameter_call(parameter: &mut Parameter, call: &HostCall) -> Result<Value, String> {
    match call.method.as_str() {
        GET => match property(call)? {
            "name" => Ok(json!(parameter.name)),
            "value" => Ok(json!(parameter.value)),
            "min" => Ok(json!(parameter.min)),
            "max" => Ok(json!(parameter.max)),
            other => Err(unknown_property(other)),
        },
        SET => match property(call)? {
            "value" => {
                let value = number(call, "value")?;
                if value < parameter.min || value > parameter.max {
                    return Err(format!(
                        "Parameter value {} out of range [{}, {}]",
                        value, parameter.min, parameter.max
                    ));
                }
                parameter.value = value;
                Ok(Value::Null)
            }
            "name" | "min" | "max" => Err(read_only(property(call)?)),
            other => Err(unknown_property(other)),
        },
        _ => Err(unknown_method(call)),
    }
}

fn slot_call(has_clip: bool, call: &HostCall) -> Result<Value, String> {
    match call.method.as_str() {
        GET => match property(call)? {
            "has_clip" => Ok(json!(has_clip)),
            other => Err(unknown_property(other)),
        },
        SET => Err(read_only(property(call)?)),
        _ => Err(unknown_method(call)),
    }
}

fn clip_call(clip: &mut Clip, call: &HostCall) -> Result<Value, String> {
    match call.method.as_str() {
        GET => {
            let name = property(call)?;
            match name {
                "name" => return Ok(json!(clip.name)),
                "length" => return Ok(json!(clip.length)),
                "is_midi_clip" => return Ok(json!(matches!(clip.content, ClipContent::Midi(_)))),
                "is_audio_clip" => return Ok(json!(matches!(clip.content, ClipContent::Audio(_)))),
                _ => {}
            }
            let audio = audio_only(clip, name)?;
            match name {
                "peak_db" => Ok(json!(audio.peak_db)),
                "gain_db" => Ok(json!(audio.gain_db)),
                "pitch_coarse" => Ok(json!(audio.pitch_coarse)),
                "pitch_fine" => Ok(json!(audio.pitch_fine)),
                "warping" => Ok(json!(audio.warping)),
                "warp_factor" => Ok(json!(audio.warp_factor)),
                "fade_in_time" => Ok(json!(audio.fade_in_time)),
                "fade_out_time" => Ok(json!(audio.fade_out_time)),
                "start_marker" => Ok(json!(audio.start_marker)),
                other => Err(unknown_property(other)),
            }
        }
        SET => {
            let name = property(call)?;
            match name {
                "name" => {
                    let value = set_value(call)?
                        .as_str()
                        .ok_or_else(|| "Invalid value for 'name'".to_string())?;
                    clip.name = value.to_string();
                    return Ok(Value::Null);
                }
                "length" | "is_midi_clip" | "is_audio_clip" | "peak_db" => {
                    return Err(read_only(name))
                }
                _ => {}
            }
            let length = clip.length;
            let audio = audio_only(clip, name)?;
            set_audio_property(audio, length, name, call)
        }
        "get_notes" => match &clip.content {
            ClipContent::Midi(notes) => serde_json::to_value(notes).map_err(|e| e.to_string()),
            ClipContent::Audio(_) => Err("Clip is not a MIDI clip".to_string()),
        },
        "set_notes" => {
            let ClipContent::Midi(notes) = &mut clip.content else {
                return Err("Clip is not a MIDI clip".to_string());
            };
            let payload = call
                .args
                .first()
                .cloned()
                .ok_or_else(|| "Invalid call: set_notes needs a note list".to_string())?;
            let replacement: Vec<Note> = serde_json::from_value(payload)
                .map_err(|e| format!("Invalid notes payload: {}", e))?;
            if let Some(bad) = replacement.iter().find(|n| n.pitch > 127) {
                return Err(format!("Note pitch {} out of range", bad.pitch));
            }
            *notes = replacement;
            Ok(json!(notes.len()))
        }
        _ => Err(unknown_method(call)),
    }
}

fn audio_only<'a>(clip: &'a mut Clip, name: &str) -> Result<&'a mut AudioClip, String> {
    match &mut clip.content {
        ClipContent::Audio(audio) => Ok(audio),
        ClipContent::Midi(_) => Err(format!("Clip is not an audio clip ('{}')", name)),
    }
}

fn set_audio_property(
    audio: &mut AudioClip,
    length: f64,
    name: &str,
    call: &HostCall,
) -> Result<Value, String> {
    match name {
        "gain_db" => {
            let value = number(call, name)?;
            if !(-70.0..=24.0).contains(&value) {
                return Err(format!("Gain {} dB out of range", value));
            }
            audio.gain_db = value;
        }
        "pitch_coarse" => {
            let value = number(call, name)?;
            if value.fract() != 0.0 || !(-48.0..=48.0).contains(&value) {
                return Err(format!("Transpose {} out of range", value));
            }
            audio.pitch_coarse = value as i64;
        }
        "pitch_fine" => {
            let value = number(call, name)?;
            if !(-50.0..=50.0).contains(&value) {
                return Err(format!("Detune {} out of range", value));
            }
            audio.pitch_fine = value;
        }
        "warping" => {
            audio.warping = set_value(call)?
                .as_bool()
                .ok_or_else(|| "Invalid value for 'warping'".to_string())?;
        }
        "warp_factor" => {
            if !audio.warping {
                return Err("Cannot stretch a clip that is not warping: not allowed".to_string());
            }
            let value = number(call, name)?;
            if value <= 0.0 {
                return Err(format!("Warp factor {} out of range", value));
            }
            audio.warp_factor = value;
        }
        "fade_in_time" | "fade_out_time" => {
            let value = number(call, name)?;
            if value < 0.0 || value > length {
                return Err(format!("Fade {} out of range", value));
            }
            if name == "fade_in_time" {
                audio.fade_in_time = value;
            } else {
                audio.fade_out_time = value;
            }
        }
        "start_marker" => {
            audio.start_marker = number(call, name)?;
        }
        other => return Err(unknown_property(other)),
    }
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathComponents;

    fn run(session: &MemorySession, components: PathComponents, call: HostCall) -> Result<Value, String> {
        session.call(&components.build().unwrap(), &call)
    }

    #[test]
    fn test_demo_shape() {
        let session = MemorySession::demo();
        assert_eq!(
            run(&session, PathComponents::live_set(), HostCall::get("track_count")),
            Ok(json!(3))
        );
        assert_eq!(
            run(&session, PathComponents::clip_slot(0, 0), HostCall::get("has_clip")),
            Ok(json!(true))
        );
        assert_eq!(
            run(&session, PathComponents::clip_slot(0, 1), HostCall::get("has_clip")),
            Ok(json!(false))
        );
    }

    #[test]
    fn test_host_error_wording() {
        let session = MemorySession::demo();

        let err = run(&session, PathComponents::track(9), HostCall::get("name")).unwrap_err();
        assert!(err.contains("out of range"), "{}", err);

        let err = run(&session, PathComponents::clip(0, 5), HostCall::get("length")).unwrap_err();
        assert!(err.starts_with("No clip"), "{}", err);

        let err = run(&session, PathComponents::clip(0, 0), HostCall::set("length", json!(8.0)))
            .unwrap_err();
        assert!(err.contains("read-only"), "{}", err);

        let err = run(&session, PathComponents::clip(2, 0), HostCall::method("get_notes", vec![]))
            .unwrap_err();
        assert!(err.contains("not a MIDI clip"), "{}", err);
    }

    #[test]
    fn test_busy_window_counts_down() {
        let session = MemorySession::demo();
        session.fail_next(2, "Host busy: rendering");

        let root = PathComponents::live_set();
        assert!(run(&session, root, HostCall::get("track_count")).is_err());
        assert!(run(&session, root, HostCall::get("track_count")).is_err());
        assert!(run(&session, root, HostCall::get("track_count")).is_ok());
        assert_eq!(session.call_count(), 3);
    }

    #[test]
    fn test_set_notes_replaces() {
        let session = MemorySession::demo();
        let notes = json!([{"pitch": 48, "start": 0.0, "duration": 4.0, "velocity": 64}]);
        run(
            &session,
            PathComponents::clip(1, 0),
            HostCall::method("set_notes", vec![notes]),
        )
        .unwrap();
        let stored = session.notes(1, 0).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].pitch, 48);
    }
}
