//! OSC wire format for the datagram transport
//!
//! Request:  `/live/call  [id:int, path:str, method:str, args...]`
//! Reply:    `/live/reply [id:int, "ok", value:blob(json)]`
//!           `/live/reply [id:int, "error", message:str]`
//!
//! Scalar arguments travel as native OSC types. Arrays and objects (note
//! lists) travel as JSON blobs so they stay distinguishable from strings.
//! Every message must fit in a single datagram ([`MAX_DATAGRAM`]).

use rosc::{decoder, encoder, OscMessage, OscPacket, OscType};
use serde_json::{Number, Value};

use super::{HostCall, TransportError};
use crate::path::LivePath;

pub const CALL_ADDR: &str = "/live/call";
pub const REPLY_ADDR: &str = "/live/reply";

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM: usize = 65_507;

const STATUS_OK: &str = "ok";
const STATUS_ERROR: &str = "error";

/// Decoded reply datagram
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub request_id: i32,
    pub outcome: Result<Value, String>,
}

/// Decoded request datagram, as seen by a host-side listener
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub request_id: i32,
    pub path: String,
    pub call: HostCall,
}

pub fn to_osc(value: &Value) -> Result<OscType, TransportError> {
    Ok(match value {
        Value::Null => OscType::Nil,
        Value::Bool(b) => OscType::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                match i32::try_from(i) {
                    Ok(small) => OscType::Int(small),
                    Err(_) => OscType::Long(i),
                }
            } else if let Some(f) = n.as_f64() {
                OscType::Double(f)
            } else {
                return Err(TransportError::Encode(format!("unrepresentable number {}", n)));
            }
        }
        Value::String(s) => OscType::String(s.clone()),
        Value::Array(_) | Value::Object(_) => OscType::Blob(
            serde_json::to_vec(value).map_err(|e| TransportError::Encode(e.to_string()))?,
        ),
    })
}

pub fn from_osc(arg: &OscType) -> Result<Value, TransportError> {
    Ok(match arg {
        OscType::Nil => Value::Null,
        OscType::Bool(b) => Value::Bool(*b),
        OscType::Int(i) => Value::from(*i),
        OscType::Long(i) => Value::from(*i),
        OscType::Float(f) => float_value(f64::from(*f)),
        OscType::Double(f) => float_value(*f),
        OscType::String(s) => Value::String(s.clone()),
        OscType::Blob(bytes) => {
            serde_json::from_slice(bytes).map_err(|e| TransportError::Decode(e.to_string()))?
        }
        other => {
            return Err(TransportError::Decode(format!(
                "unsupported OSC argument {:?}",
                other
            )))
        }
    })
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn encode_message(addr: &str, args: Vec<OscType>) -> Result<Vec<u8>, TransportError> {
    let packet = OscPacket::Message(OscMessage {
        addr: addr.to_string(),
        args,
    });
    let bytes = encoder::encode(&packet).map_err(|e| TransportError::Encode(format!("{:?}", e)))?;
    if bytes.len() > MAX_DATAGRAM {
        return Err(TransportError::Oversized {
            size: bytes.len(),
            limit: MAX_DATAGRAM,
        });
    }
    Ok(bytes)
}

fn decode_message(bytes: &[u8], expected_addr: &str) -> Result<OscMessage, TransportError> {
    let (_, packet) =
        decoder::decode_udp(bytes).map_err(|e| TransportError::Decode(format!("{:?}", e)))?;
    match packet {
        OscPacket::Message(message) if message.addr == expected_addr => Ok(message),
        OscPacket::Message(message) => Err(TransportError::Decode(format!(
            "unexpected address {}",
            message.addr
        ))),
        OscPacket::Bundle(_) => Err(TransportError::Decode("unexpected bundle".to_string())),
    }
}

pub fn encode_call(
    request_id: i32,
    path: &LivePath,
    call: &HostCall,
) -> Result<Vec<u8>, TransportError> {
    let mut args = Vec::with_capacity(call.args.len() + 3);
    args.push(OscType::Int(request_id));
    args.push(OscType::String(path.to_string()));
    args.push(OscType::String(call.method.clone()));
    for arg in &call.args {
        args.push(to_osc(arg)?);
    }
    encode_message(CALL_ADDR, args)
}

pub fn decode_call(bytes: &[u8]) -> Result<Request, TransportError> {
    let message = decode_message(bytes, CALL_ADDR)?;
    let mut args = message.args.iter();

    let request_id = match args.next() {
        Some(OscType::Int(id)) => *id,
        _ => return Err(TransportError::Decode("missing request id".to_string())),
    };
    let path = match args.next() {
        Some(OscType::String(p)) => p.clone(),
        _ => return Err(TransportError::Decode("missing path".to_string())),
    };
    let method = match args.next() {
        Some(OscType::String(m)) => m.clone(),
        _ => return Err(TransportError::Decode("missing method".to_string())),
    };
    let args = args.map(from_osc).collect::<Result<Vec<_>, _>>()?;

    Ok(Request {
        request_id,
        path,
        call: HostCall { method, args },
    })
}

pub fn encode_reply(request_id: i32, outcome: &Result<Value, String>) -> Result<Vec<u8>, TransportError> {
    let args = match outcome {
        Ok(value) => vec![
            OscType::Int(request_id),
            OscType::String(STATUS_OK.to_string()),
            OscType::Blob(
                serde_json::to_vec(value).map_err(|e| TransportError::Encode(e.to_string()))?,
            ),
        ],
        Err(message) => vec![
            OscType::Int(request_id),
            OscType::String(STATUS_ERROR.to_string()),
            OscType::String(message.clone()),
        ],
    };
    encode_message(REPLY_ADDR, args)
}

pub fn decode_reply(bytes: &[u8]) -> Result<Reply, TransportError> {
    let message = decode_message(bytes, REPLY_ADDR)?;

    match message.args.as_slice() {
        [OscType::Int(id), OscType::String(status), payload] if status == STATUS_OK => Ok(Reply {
            request_id: *id,
            outcome: Ok(from_osc(payload)?),
        }),
        [OscType::Int(id), OscType::String(status), OscType::String(error)]
            if status == STATUS_ERROR =>
        {
            Ok(Reply {
                request_id: *id,
                outcome: Err(error.clone()),
            })
        }
        _ => Err(TransportError::Decode(format!(
            "malformed reply arguments {:?}",
            message.args
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathComponents;
    use serde_json::json;

    #[test]
    fn test_call_keeps_argument_types() {
        let path = PathComponents::clip(0, 1).build().unwrap();
        let notes = json!([{"pitch": 60, "start": 0.0, "duration": 1.0, "velocity": 100}]);
        let call = HostCall::method("set_notes", vec![notes.clone()]);

        let bytes = encode_call(42, &path, &call).unwrap();
        let request = decode_call(&bytes).unwrap();

        assert_eq!(request.request_id, 42);
        assert_eq!(request.path, "live_set tracks 0 clip_slots 1 clip");
        assert_eq!(request.call.method, "set_notes");
        assert_eq!(request.call.args, vec![notes]);
    }

    #[test]
    fn test_scalar_mapping() {
        assert_eq!(to_osc(&json!(3)).unwrap(), OscType::Int(3));
        assert_eq!(to_osc(&json!(5_000_000_000i64)).unwrap(), OscType::Long(5_000_000_000));
        assert_eq!(to_osc(&json!(0.5)).unwrap(), OscType::Double(0.5));
        assert_eq!(to_osc(&json!("gain_db")).unwrap(), OscType::String("gain_db".into()));
        assert_eq!(from_osc(&OscType::Float(0.25)).unwrap(), json!(0.25));
        assert_eq!(from_osc(&OscType::Nil).unwrap(), Value::Null);
    }

    #[test]
    fn test_error_reply() {
        let bytes = encode_reply(9, &Err("No clip in slot 2".to_string())).unwrap();
        let reply = decode_reply(&bytes).unwrap();
        assert_eq!(reply.request_id, 9);
        assert_eq!(reply.outcome, Err("No clip in slot 2".to_string()));
    }

    fn many_notes(count: usize) -> Value {
        let notes: Vec<Value> = (0..count)
            .map(|i| json!({"pitch": 60, "start": i as f64 * 0.25, "duration": 0.25, "velocity": 100}))
            .collect();
        Value::Array(notes)
    }

    #[test]
    fn test_oversized_call_rejected_before_sending() {
        let path = PathComponents::clip(0, 0).build().unwrap();
        let call = HostCall::method("set_notes", vec![many_notes(2000)]);

        let err = encode_call(1, &path, &call).unwrap_err();
        assert!(
            matches!(err, TransportError::Oversized { size, limit } if size > limit && limit == MAX_DATAGRAM),
            "{:?}",
            err
        );
        assert!(!crate::error::classify(&err).is_retryable());

        // A clip of ordinary size still fits
        let call = HostCall::method("set_notes", vec![many_notes(200)]);
        assert!(encode_call(2, &path, &call).unwrap().len() <= MAX_DATAGRAM);
    }

    #[test]
    fn test_oversized_reply_rejected() {
        let err = encode_reply(3, &Ok(many_notes(2000))).unwrap_err();
        assert!(matches!(err, TransportError::Oversized { .. }));
    }

    #[test]
    fn test_reply_on_wrong_address_rejected() {
        let path = PathComponents::track(0).build().unwrap();
        let bytes = encode_call(1, &path, &HostCall::get("name")).unwrap();
        assert!(matches!(decode_reply(&bytes), Err(TransportError::Decode(_))));
    }
}
