//! Typed transform requests, built from untyped service parameters
//!
//! Parameter names follow the service surface: `trackIndex`, `clipSlot`,
//! `deviceIndex`, `parameterIndex`, plus per-operation fields. Everything is
//! validated here, so a request that parses never needs re-checking.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::notes::{Grid, VelocityOp};
use crate::error::BridgeError;
use crate::path::{LivePath, PathComponents};
use crate::validate::{validate_clip_slot, validate_parameter_index, validate_track_index};

/// Clip addressed by track and slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipTarget {
    pub track: usize,
    pub clip_slot: usize,
}

impl ClipTarget {
    pub fn new(track: usize, clip_slot: usize) -> Self {
        Self { track, clip_slot }
    }

    pub fn slot_path(&self) -> Result<LivePath, BridgeError> {
        Ok(PathComponents::clip_slot(self.track, self.clip_slot).build()?)
    }

    pub fn clip_path(&self) -> Result<LivePath, BridgeError> {
        Ok(PathComponents::clip(self.track, self.clip_slot).build()?)
    }
}

impl fmt::Display for ClipTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track {} slot {}", self.track, self.clip_slot)
    }
}

/// Named operations accepted by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Quantize,
    Transpose,
    Velocity,
    Legato,
    RemoveOverlaps,
    TimeShift,
    Fade,
    Normalize,
    TimeStretch,
    PitchShift,
    Rotate,
    ExportTrack,
    ExportStems,
    ReadNotes,
    GetDeviceParameter,
    SetDeviceParameter,
}

impl Operation {
    pub const ALL: [Operation; 16] = [
        Operation::Quantize,
        Operation::Transpose,
        Operation::Velocity,
        Operation::Legato,
        Operation::RemoveOverlaps,
        Operation::TimeShift,
        Operation::Fade,
        Operation::Normalize,
        Operation::TimeStretch,
        Operation::PitchShift,
        Operation::Rotate,
        Operation::ExportTrack,
        Operation::ExportStems,
        Operation::ReadNotes,
        Operation::GetDeviceParameter,
        Operation::SetDeviceParameter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Quantize => "quantize",
            Operation::Transpose => "transpose",
            Operation::Velocity => "velocity",
            Operation::Legato => "legato",
            Operation::RemoveOverlaps => "removeOverlaps",
            Operation::TimeShift => "timeShift",
            Operation::Fade => "fade",
            Operation::Normalize => "normalize",
            Operation::TimeStretch => "timeStretch",
            Operation::PitchShift => "pitchShift",
            Operation::Rotate => "rotate",
            Operation::ExportTrack => "exportTrack",
            Operation::ExportStems => "exportStems",
            Operation::ReadNotes => "readNotes",
            Operation::GetDeviceParameter => "getDeviceParameter",
            Operation::SetDeviceParameter => "setDeviceParameter",
        }
    }

    /// Parameter names, for help output
    pub fn params(self) -> &'static str {
        match self {
            Operation::Quantize => "trackIndex, clipSlot, grid?, strength?",
            Operation::Transpose => "trackIndex, clipSlot, semitones",
            Operation::Velocity => "trackIndex, clipSlot, operation (set|add|scale), value",
            Operation::Legato | Operation::RemoveOverlaps | Operation::ReadNotes => {
                "trackIndex, clipSlot"
            }
            Operation::TimeShift => "trackIndex, clipSlot, amount",
            Operation::Fade => "trackIndex, clipSlot, fadeIn?, fadeOut?",
            Operation::Normalize => "trackIndex, clipSlot, target?",
            Operation::TimeStretch => "trackIndex, clipSlot, factor",
            Operation::PitchShift => "trackIndex, clipSlot, semitones?, cents?",
            Operation::Rotate => "trackIndex, clipSlot, degrees",
            Operation::ExportTrack => "trackIndex, path?",
            Operation::ExportStems => "directory?, tracks?",
            Operation::GetDeviceParameter => "trackIndex, deviceIndex, parameterIndex",
            Operation::SetDeviceParameter => "trackIndex, deviceIndex, parameterIndex, value",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| BridgeError::invalid_path(format!("unknown operation '{}'", s)))
    }
}

/// A validated request for one named operation
#[derive(Debug, Clone, PartialEq)]
pub enum TransformRequest {
    Quantize {
        target: ClipTarget,
        grid: Grid,
        strength: f64,
    },
    Transpose {
        target: ClipTarget,
        semitones: i32,
    },
    Velocity {
        target: ClipTarget,
        op: VelocityOp,
        value: f64,
    },
    Legato {
        target: ClipTarget,
    },
    RemoveOverlaps {
        target: ClipTarget,
    },
    TimeShift {
        target: ClipTarget,
        amount: f64,
    },
    Fade {
        target: ClipTarget,
        fade_in: f64,
        fade_out: f64,
    },
    Normalize {
        target: ClipTarget,
        /// dBFS for audio clips, velocity for MIDI clips
        level: Option<f64>,
    },
    TimeStretch {
        target: ClipTarget,
        factor: f64,
    },
    PitchShift {
        target: ClipTarget,
        semitones: i32,
        cents: f64,
    },
    Rotate {
        target: ClipTarget,
        degrees: f64,
    },
    ExportTrack {
        track: usize,
        file: Option<String>,
    },
    ExportStems {
        directory: Option<String>,
        /// Raw indices, bounded against the live track count at execution
        tracks: Option<Vec<Value>>,
    },
    ReadNotes {
        target: ClipTarget,
    },
    GetDeviceParameter {
        track: usize,
        device: usize,
        parameter: usize,
    },
    SetDeviceParameter {
        track: usize,
        device: usize,
        parameter: usize,
        value: f64,
    },
}

const PITCH_COARSE_RANGE: std::ops::RangeInclusive<i64> = -48..=48;
const PITCH_FINE_RANGE: std::ops::RangeInclusive<f64> = -50.0..=50.0;

impl TransformRequest {
    pub fn operation(&self) -> Operation {
        match self {
            TransformRequest::Quantize { .. } => Operation::Quantize,
            TransformRequest::Transpose { .. } => Operation::Transpose,
            TransformRequest::Velocity { .. } => Operation::Velocity,
            TransformRequest::Legato { .. } => Operation::Legato,
            TransformRequest::RemoveOverlaps { .. } => Operation::RemoveOverlaps,
            TransformRequest::TimeShift { .. } => Operation::TimeShift,
            TransformRequest::Fade { .. } => Operation::Fade,
            TransformRequest::Normalize { .. } => Operation::Normalize,
            TransformRequest::TimeStretch { .. } => Operation::TimeStretch,
            TransformRequest::PitchShift { .. } => Operation::PitchShift,
            TransformRequest::Rotate { .. } => Operation::Rotate,
            TransformRequest::ExportTrack { .. } => Operation::ExportTrack,
            TransformRequest::ExportStems { .. } => Operation::ExportStems,
            TransformRequest::ReadNotes { .. } => Operation::ReadNotes,
            TransformRequest::GetDeviceParameter { .. } => Operation::GetDeviceParameter,
            TransformRequest::SetDeviceParameter { .. } => Operation::SetDeviceParameter,
        }
    }

    /// Build a request from an operation name and its JSON parameters
    pub fn from_params(op: &str, params: &Value) -> Result<Self, BridgeError> {
        let operation: Operation = op.parse()?;
        if !(params.is_object() || params.is_null()) {
            return Err(BridgeError::invalid_path("parameters must be a JSON object"));
        }
        let p = Params(params);

        Ok(match operation {
            Operation::Quantize => {
                let target = p.clip_target()?;
                let grid = match p.optional_str("grid")? {
                    Some(grid) => grid.parse()?,
                    None => Grid::SIXTEENTH,
                };
                let strength = p.optional_number("strength")?.unwrap_or(100.0);
                if !(0.0..=100.0).contains(&strength) {
                    return Err(BridgeError::out_of_range(format!(
                        "strength {} outside 0..=100",
                        strength
                    )));
                }
                TransformRequest::Quantize {
                    target,
                    grid,
                    strength,
                }
            }
            Operation::Transpose => TransformRequest::Transpose {
                target: p.clip_target()?,
                semitones: p.semitones("semitones")?,
            },
            Operation::Velocity => TransformRequest::Velocity {
                target: p.clip_target()?,
                op: p.required_str("operation")?.parse()?,
                value: p.number("value")?,
            },
            Operation::Legato => TransformRequest::Legato {
                target: p.clip_target()?,
            },
            Operation::RemoveOverlaps => TransformRequest::RemoveOverlaps {
                target: p.clip_target()?,
            },
            Operation::TimeShift => TransformRequest::TimeShift {
                target: p.clip_target()?,
                amount: p.number("amount")?,
            },
            Operation::Fade => {
                let target = p.clip_target()?;
                let fade_in = p.optional_number("fadeIn")?.unwrap_or(0.0);
                let fade_out = p.optional_number("fadeOut")?.unwrap_or(0.0);
                if fade_in < 0.0 || fade_out < 0.0 {
                    return Err(BridgeError::out_of_range("fade lengths cannot be negative"));
                }
                TransformRequest::Fade {
                    target,
                    fade_in,
                    fade_out,
                }
            }
            Operation::Normalize => TransformRequest::Normalize {
                target: p.clip_target()?,
                level: p.optional_number("target")?,
            },
            Operation::TimeStretch => {
                let target = p.clip_target()?;
                let factor = p.number("factor")?;
                if factor <= 0.0 {
                    return Err(BridgeError::out_of_range(format!(
                        "stretch factor must be positive, got {}",
                        factor
                    )));
                }
                TransformRequest::TimeStretch { target, factor }
            }
            Operation::PitchShift => {
                let target = p.clip_target()?;
                let semitones = match p.get("semitones") {
                    Value::Null => 0,
                    _ => p.semitones("semitones")?,
                };
                if !PITCH_COARSE_RANGE.contains(&i64::from(semitones)) {
                    return Err(BridgeError::out_of_range(format!(
                        "pitch shift {} semitones outside -48..=48",
                        semitones
                    )));
                }
                let cents = p.optional_number("cents")?.unwrap_or(0.0);
                if !PITCH_FINE_RANGE.contains(&cents) {
                    return Err(BridgeError::out_of_range(format!(
                        "detune {} cents outside -50..=50",
                        cents
                    )));
                }
                TransformRequest::PitchShift {
                    target,
                    semitones,
                    cents,
                }
            }
            Operation::Rotate => TransformRequest::Rotate {
                target: p.clip_target()?,
                degrees: p.number("degrees")?,
            },
            Operation::ExportTrack => TransformRequest::ExportTrack {
                track: validate_track_index(p.get("trackIndex"))?,
                file: p.optional_str("path")?.map(str::to_string),
            },
            Operation::ExportStems => {
                let tracks = match p.get("tracks") {
                    Value::Null => None,
                    Value::Array(items) => Some(items.clone()),
                    _ => return Err(BridgeError::invalid_path("'tracks' must be an array")),
                };
                TransformRequest::ExportStems {
                    directory: p.optional_str("directory")?.map(str::to_string),
                    tracks,
                }
            }
            Operation::ReadNotes => TransformRequest::ReadNotes {
                target: p.clip_target()?,
            },
            Operation::GetDeviceParameter => {
                let (track, device, parameter) = p.parameter_address()?;
                TransformRequest::GetDeviceParameter {
                    track,
                    device,
                    parameter,
                }
            }
            Operation::SetDeviceParameter => {
                let (track, device, parameter) = p.parameter_address()?;
                TransformRequest::SetDeviceParameter {
                    track,
                    device,
                    parameter,
                    value: p.number("value")?,
                }
            }
        })
    }
}

/// Typed accessors over the raw parameter object
struct Params<'a>(&'a Value);

static NULL: Value = Value::Null;

impl<'a> Params<'a> {
    fn get(&self, name: &str) -> &'a Value {
        self.0.get(name).unwrap_or(&NULL)
    }

    fn clip_target(&self) -> Result<ClipTarget, BridgeError> {
        let (track, clip_slot) = validate_clip_slot(self.get("trackIndex"), self.get("clipSlot"))?;
        Ok(ClipTarget { track, clip_slot })
    }

    fn parameter_address(&self) -> Result<(usize, usize, usize), BridgeError> {
        validate_parameter_index(
            self.get("trackIndex"),
            self.get("deviceIndex"),
            self.get("parameterIndex"),
        )
    }

    fn number(&self, name: &str) -> Result<f64, BridgeError> {
        self.optional_number(name)?
            .ok_or_else(|| BridgeError::invalid_path(format!("'{}' is required", name)))
    }

    fn optional_number(&self, name: &str) -> Result<Option<f64>, BridgeError> {
        match self.get(name) {
            Value::Null => Ok(None),
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.is_finite())
                .map(Some)
                .ok_or_else(|| BridgeError::invalid_path(format!("'{}' is not a usable number", name))),
            _ => Err(BridgeError::invalid_path(format!("'{}' must be a number", name))),
        }
    }

    /// Whole semitones; `1.5` is rejected rather than rounded
    fn semitones(&self, name: &str) -> Result<i32, BridgeError> {
        let value = self.get(name);
        let Some(number) = value.as_i64() else {
            return Err(match value {
                Value::Null => BridgeError::invalid_path(format!("'{}' is required", name)),
                _ => BridgeError::invalid_path(format!("'{}' must be an integer, got {}", name, value)),
            });
        };
        i32::try_from(number)
            .map_err(|_| BridgeError::out_of_range(format!("'{}' {} is too large", name, number)))
    }

    fn required_str(&self, name: &str) -> Result<&'a str, BridgeError> {
        self.optional_str(name)?
            .ok_or_else(|| BridgeError::invalid_path(format!("'{}' is required", name)))
    }

    fn optional_str(&self, name: &str) -> Result<Option<&'a str>, BridgeError> {
        match self.get(name) {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s.as_str())),
            _ => Err(BridgeError::invalid_path(format!("'{}' must be a string", name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn kind(op: &str, params: Value) -> ErrorKind {
        TransformRequest::from_params(op, &params).unwrap_err().kind
    }

    #[test]
    fn test_operation_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        assert_eq!("explode".parse::<Operation>().unwrap_err().kind, ErrorKind::InvalidPath);
    }

    #[test]
    fn test_quantize_defaults() {
        let request =
            TransformRequest::from_params("quantize", &json!({"trackIndex": 0, "clipSlot": 1})).unwrap();
        assert_eq!(
            request,
            TransformRequest::Quantize {
                target: ClipTarget::new(0, 1),
                grid: Grid::SIXTEENTH,
                strength: 100.0,
            }
        );
    }

    #[test]
    fn test_strength_bounds() {
        let params = json!({"trackIndex": 0, "clipSlot": 0, "strength": 120});
        assert_eq!(kind("quantize", params), ErrorKind::OutOfRange);
    }

    #[test]
    fn test_semitones_must_be_integers() {
        let params = json!({"trackIndex": 0, "clipSlot": 0, "semitones": 1.5});
        assert_eq!(kind("transpose", params), ErrorKind::InvalidPath);

        let params = json!({"trackIndex": 0, "clipSlot": 0, "semitones": -7});
        assert!(matches!(
            TransformRequest::from_params("transpose", &params).unwrap(),
            TransformRequest::Transpose { semitones: -7, .. }
        ));
    }

    #[test]
    fn test_index_errors_surface_first() {
        assert_eq!(
            kind("transpose", json!({"trackIndex": -1, "clipSlot": 0, "semitones": 2})),
            ErrorKind::OutOfRange
        );
        assert_eq!(
            kind("getDeviceParameter", json!({"trackIndex": 0, "deviceIndex": "0", "parameterIndex": 0})),
            ErrorKind::InvalidPath
        );
    }

    #[test]
    fn test_stretch_and_pitch_bounds() {
        assert_eq!(
            kind("timeStretch", json!({"trackIndex": 0, "clipSlot": 0, "factor": 0})),
            ErrorKind::OutOfRange
        );
        assert_eq!(
            kind("pitchShift", json!({"trackIndex": 0, "clipSlot": 0, "semitones": 60})),
            ErrorKind::OutOfRange
        );
        assert_eq!(
            kind("pitchShift", json!({"trackIndex": 0, "clipSlot": 0, "cents": 75.0})),
            ErrorKind::OutOfRange
        );
    }

    #[test]
    fn test_params_must_be_object() {
        assert_eq!(kind("legato", json!([0, 1])), ErrorKind::InvalidPath);
    }
}
