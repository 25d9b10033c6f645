//! Index validation ahead of any remote call
//!
//! Validators check shape only: an index must be a non-negative JSON integer.
//! Live bounds (the actual track count) are the host's business unless the
//! caller already holds the count, see [`validate_bounded`].
//!
//! Wrong types (`"0"`, `0.5`, `null`, missing) fail with `InvalidPath`,
//! negative integers with `OutOfRange`.

use serde_json::Value;

use crate::error::BridgeError;

/// Where an index's upper bound comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsSource {
    /// Caller supplies the bound, or there is none
    CallerSupplied,
    /// Bound is a live count read from the host
    LiveCount,
}

/// Shape constraint for one kind of index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRule {
    pub name: &'static str,
    pub min_inclusive: u64,
    pub bounds_source: BoundsSource,
}

pub const TRACK: ValidationRule = ValidationRule {
    name: "track index",
    min_inclusive: 0,
    bounds_source: BoundsSource::LiveCount,
};

pub const DEVICE: ValidationRule = ValidationRule {
    name: "device index",
    min_inclusive: 0,
    bounds_source: BoundsSource::LiveCount,
};

pub const PARAMETER: ValidationRule = ValidationRule {
    name: "parameter index",
    min_inclusive: 0,
    bounds_source: BoundsSource::LiveCount,
};

pub const CLIP_SLOT: ValidationRule = ValidationRule {
    name: "clip slot",
    min_inclusive: 0,
    bounds_source: BoundsSource::CallerSupplied,
};

impl ValidationRule {
    /// Check a raw value and return it as an index
    pub fn check(&self, value: &Value) -> Result<usize, BridgeError> {
        let number = match value {
            Value::Number(n) => n,
            Value::Null => {
                return Err(BridgeError::invalid_path(format!("{} is missing", self.name)))
            }
            other => {
                return Err(BridgeError::invalid_path(format!(
                    "{} must be an integer, got {}",
                    self.name,
                    type_name(other)
                )))
            }
        };

        if let Some(index) = number.as_u64() {
            if index < self.min_inclusive {
                return Err(BridgeError::out_of_range(format!(
                    "{} {} is below {}",
                    self.name, index, self.min_inclusive
                )));
            }
            return usize::try_from(index).map_err(|_| {
                BridgeError::out_of_range(format!("{} {} is too large", self.name, index))
            });
        }

        if let Some(index) = number.as_i64() {
            return Err(BridgeError::out_of_range(format!(
                "{} must be non-negative, got {}",
                self.name, index
            )));
        }

        Err(BridgeError::invalid_path(format!(
            "{} must be an integer, got {}",
            self.name, number
        )))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn validate_track_index(track: &Value) -> Result<usize, BridgeError> {
    TRACK.check(track)
}

/// Track is checked first so the first failure is always the outermost one
pub fn validate_device_index(track: &Value, device: &Value) -> Result<(usize, usize), BridgeError> {
    let track = validate_track_index(track)?;
    let device = DEVICE.check(device)?;
    Ok((track, device))
}

pub fn validate_parameter_index(
    track: &Value,
    device: &Value,
    parameter: &Value,
) -> Result<(usize, usize, usize), BridgeError> {
    let (track, device) = validate_device_index(track, device)?;
    let parameter = PARAMETER.check(parameter)?;
    Ok((track, device, parameter))
}

pub fn validate_clip_slot(track: &Value, slot: &Value) -> Result<(usize, usize), BridgeError> {
    let track = validate_track_index(track)?;
    let slot = CLIP_SLOT.check(slot)?;
    Ok((track, slot))
}

/// Shape check plus an upper bound the caller already knows.
pub fn validate_bounded(
    rule: &ValidationRule,
    value: &Value,
    count: usize,
) -> Result<usize, BridgeError> {
    let index = rule.check(value)?;
    if index >= count {
        return Err(BridgeError::out_of_range(format!(
            "{} {} out of range (count {})",
            rule.name, index, count
        )));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;
    use serde_json::json;

    fn rejected() -> Vec<Value> {
        vec![json!(-1), json!(-100), json!("0"), json!(0.5), Value::Null]
    }

    #[test]
    fn test_every_validator_rejects_malformed() {
        for bad in rejected() {
            assert!(validate_track_index(&bad).is_err(), "track {:?}", bad);
            assert!(validate_device_index(&json!(0), &bad).is_err(), "device {:?}", bad);
            assert!(validate_clip_slot(&json!(0), &bad).is_err(), "slot {:?}", bad);
            assert!(
                validate_parameter_index(&json!(0), &json!(0), &bad).is_err(),
                "parameter {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_every_validator_accepts_valid() {
        for good in [0u64, 1, 1000] {
            let v = json!(good);
            assert_eq!(validate_track_index(&v).unwrap(), good as usize);
            assert_eq!(validate_device_index(&v, &v).unwrap().1, good as usize);
            assert_eq!(validate_clip_slot(&v, &v).unwrap().1, good as usize);
            assert_eq!(validate_parameter_index(&v, &v, &v).unwrap().2, good as usize);
        }
    }

    #[test]
    fn test_kind_depends_on_shape() {
        assert_eq!(
            validate_track_index(&json!(-1)).unwrap_err().kind,
            ErrorKind::OutOfRange
        );
        assert_eq!(
            validate_track_index(&json!("0")).unwrap_err().kind,
            ErrorKind::InvalidPath
        );
        assert_eq!(
            validate_track_index(&json!(0.5)).unwrap_err().kind,
            ErrorKind::InvalidPath
        );
        assert_eq!(
            validate_track_index(&Value::Null).unwrap_err().kind,
            ErrorKind::InvalidPath
        );
    }

    #[test]
    fn test_track_fails_before_device() {
        let err = validate_device_index(&json!("x"), &json!(-1)).unwrap_err();
        assert!(err.message.starts_with("track index"), "{}", err.message);
    }

    #[test]
    fn test_bounded_uses_live_count() {
        assert_eq!(validate_bounded(&TRACK, &json!(3), 4).unwrap(), 3);
        let err = validate_bounded(&TRACK, &json!(4), 4).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfRange);
    }

    proptest! {
        #[test]
        fn prop_negative_always_out_of_range(i in i64::MIN..0) {
            let err = validate_track_index(&json!(i)).unwrap_err();
            prop_assert_eq!(err.kind, ErrorKind::OutOfRange);
        }

        #[test]
        fn prop_non_negative_always_passes(i in 0u32..u32::MAX) {
            prop_assert_eq!(validate_clip_slot(&json!(0), &json!(i)).unwrap().1, i as usize);
        }
    }
}
