//! Pure note-list edits
//!
//! Everything here works on plain `Vec<Note>` values; reading and writing the
//! clip is the composer's job. Times are in beats.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;

const EPSILON: f64 = 1e-9;

pub const MIN_VELOCITY: u8 = 1;
pub const MAX_VELOCITY: u8 = 127;
pub const MAX_PITCH: u8 = 127;

/// One MIDI note as carried by `get_notes` / `set_notes`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub start: f64,
    pub duration: f64,
    pub velocity: u8,
    #[serde(default)]
    pub mute: bool,
}

impl Note {
    pub fn new(pitch: u8, start: f64, duration: f64, velocity: u8) -> Self {
        Self {
            pitch,
            start,
            duration,
            velocity,
            mute: false,
        }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Quantize grid, e.g. `1/16` or `1/8T`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub denominator: u32,
    pub triplet: bool,
}

impl Grid {
    pub const SIXTEENTH: Grid = Grid {
        denominator: 16,
        triplet: false,
    };

    /// Grid spacing in beats (a 4/4 bar is four beats)
    pub fn beats(&self) -> f64 {
        let straight = 4.0 / f64::from(self.denominator);
        if self.triplet {
            straight * 2.0 / 3.0
        } else {
            straight
        }
    }

    pub fn snap(&self, position: f64) -> f64 {
        let step = self.beats();
        (position / step).round() * step
    }
}

impl FromStr for Grid {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            BridgeError::invalid_path(format!(
                "unknown grid '{}', expected 1/1 through 1/64 with optional T",
                s
            ))
        };

        let trimmed = s.trim();
        let (body, triplet) = match trimmed.strip_suffix(|c| c == 'T' || c == 't') {
            Some(body) => (body, true),
            None => (trimmed, false),
        };
        let denominator: u32 = body
            .strip_prefix("1/")
            .and_then(|d| d.parse().ok())
            .ok_or_else(invalid)?;

        match denominator {
            1 | 2 | 4 | 8 | 16 | 32 | 64 => Ok(Grid {
                denominator,
                triplet,
            }),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "1/{}", self.denominator)?;
        if self.triplet {
            f.write_str("T")?;
        }
        Ok(())
    }
}

/// Velocity edit mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VelocityOp {
    Set,
    Add,
    Scale,
}

impl FromStr for VelocityOp {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "set" => Ok(VelocityOp::Set),
            "add" => Ok(VelocityOp::Add),
            "scale" => Ok(VelocityOp::Scale),
            other => Err(BridgeError::invalid_path(format!(
                "unknown velocity operation '{}', expected set, add or scale",
                other
            ))),
        }
    }
}

impl fmt::Display for VelocityOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VelocityOp::Set => "set",
            VelocityOp::Add => "add",
            VelocityOp::Scale => "scale",
        })
    }
}

/// Round and clamp into the playable velocity range
pub fn clamp_velocity(value: f64) -> u8 {
    if value.is_nan() {
        return MIN_VELOCITY;
    }
    value
        .round()
        .clamp(f64::from(MIN_VELOCITY), f64::from(MAX_VELOCITY)) as u8
}

fn sort_by_start(notes: &mut [Note]) {
    notes.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.pitch.cmp(&b.pitch)));
}

/// Pull each start toward the grid by `strength` percent (0..=100).
/// Returns how many notes moved.
pub fn quantize(notes: &mut [Note], grid: Grid, strength: f64) -> usize {
    let amount = strength / 100.0;
    let mut moved = 0;
    for note in notes.iter_mut() {
        let target = grid.snap(note.start);
        let start = if amount >= 1.0 {
            target
        } else {
            note.start + (target - note.start) * amount
        };
        if (start - note.start).abs() > EPSILON {
            moved += 1;
        }
        note.start = start.max(0.0);
    }
    moved
}

/// Shift every pitch; fails without touching anything if a pitch would leave 0..=127
pub fn transpose(notes: &[Note], semitones: i32) -> Result<Vec<Note>, BridgeError> {
    notes
        .iter()
        .map(|note| {
            let pitch = i64::from(note.pitch) + i64::from(semitones);
            if !(0..=i64::from(MAX_PITCH)).contains(&pitch) {
                return Err(BridgeError::out_of_range(format!(
                    "transposing pitch {} by {} gives {}, outside 0..=127",
                    note.pitch, semitones, pitch
                )));
            }
            Ok(Note {
                pitch: pitch as u8,
                ..note.clone()
            })
        })
        .collect()
}

pub fn apply_velocity(notes: &mut [Note], op: VelocityOp, value: f64) {
    for note in notes.iter_mut() {
        let current = f64::from(note.velocity);
        let next = match op {
            VelocityOp::Set => value,
            VelocityOp::Add => current + value,
            VelocityOp::Scale => current * value,
        };
        note.velocity = clamp_velocity(next);
    }
}

/// Stretch every note to the next later start, the last ones to `clip_length`
pub fn legato(notes: &mut Vec<Note>, clip_length: f64) {
    sort_by_start(notes);
    let starts: Vec<f64> = notes.iter().map(|n| n.start).collect();

    for note in notes.iter_mut() {
        let next = starts
            .iter()
            .copied()
            .find(|&s| s > note.start + EPSILON)
            .unwrap_or(clip_length);
        if next > note.start + EPSILON {
            note.duration = next - note.start;
        }
    }
}

/// Truncate same-pitch notes at the next one's start; drop what collapses to nothing
pub fn remove_overlaps(notes: Vec<Note>) -> Vec<Note> {
    let mut notes = notes;
    notes.sort_by(|a, b| a.pitch.cmp(&b.pitch).then(a.start.total_cmp(&b.start)));

    for i in 1..notes.len() {
        let (before, after) = notes.split_at_mut(i);
        let previous = &mut before[i - 1];
        let current = &after[0];
        if previous.pitch == current.pitch && previous.end() > current.start + EPSILON {
            previous.duration = current.start - previous.start;
        }
    }

    let mut kept: Vec<Note> = notes
        .into_iter()
        .filter(|n| n.duration > EPSILON)
        .collect();
    sort_by_start(&mut kept);
    kept
}

/// Move starts by `amount` beats, clamping at zero
pub fn time_shift(notes: &mut [Note], amount: f64) {
    for note in notes.iter_mut() {
        note.start = (note.start + amount).max(0.0);
    }
}

/// Scale starts and durations; `factor` must already be positive
pub fn time_stretch(notes: &mut [Note], factor: f64) {
    for note in notes.iter_mut() {
        note.start *= factor;
        note.duration *= factor;
    }
}

/// Linear velocity ramps over the first `fade_in` and last `fade_out` beats
pub fn fade_velocities(notes: &mut [Note], fade_in: f64, fade_out: f64, clip_length: f64) {
    let fade_out_start = clip_length - fade_out;
    for note in notes.iter_mut() {
        let mut gain = 1.0;
        if fade_in > EPSILON && note.start < fade_in {
            gain *= note.start / fade_in;
        }
        if fade_out > EPSILON && note.start > fade_out_start {
            gain *= ((clip_length - note.start) / fade_out).max(0.0);
        }
        note.velocity = clamp_velocity(f64::from(note.velocity) * gain);
    }
}

/// Scale velocities so the loudest note lands on `target`
pub fn normalize_velocities(notes: &mut [Note], target: u8) -> f64 {
    let Some(loudest) = notes.iter().map(|n| n.velocity).max() else {
        return 1.0;
    };
    let factor = f64::from(target) / f64::from(loudest.max(MIN_VELOCITY));
    apply_velocity(notes, VelocityOp::Scale, factor);
    factor
}
