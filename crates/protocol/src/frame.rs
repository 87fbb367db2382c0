//! Subscription frames.
//!
//! Each frame is two CBOR values back to back: a header `{op, t?}` and a
//! payload.  `op = 1` is a message whose payload type is named by `t`
//! (`#commit`); `op = -1` is an error whose payload is an
//! [`ErrorBody`](crate::ErrorBody) and after which the stream ends.

use std::io::Cursor;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ErrorBody;

pub const OP_MESSAGE: i64 = 1;
pub const OP_ERROR: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub op: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message { t: Option<String>, payload: Value },
    Error(ErrorBody),
}

impl Frame {
    pub fn message(payload: Value) -> Self {
        Self::Message { t: None, payload }
    }

    pub fn typed(t: impl Into<String>, payload: Value) -> Self {
        Self::Message {
            t: Some(t.into()),
            payload,
        }
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(ErrorBody::new(name, message))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn header(&self) -> FrameHeader {
        match self {
            Self::Message { t, .. } => FrameHeader {
                op: OP_MESSAGE,
                t: t.clone(),
            },
            Self::Error(_) => FrameHeader { op: OP_ERROR, t: None },
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("encoding frame: {0}")]
    Encode(String),
    #[error("decoding frame: {0}")]
    Decode(String),
    #[error("unknown frame op {0}")]
    UnknownOp(i64),
    #[error("{0} trailing bytes after frame")]
    Trailing(usize),
}

pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::new();
    let enc = |e: ciborium::ser::Error<std::io::Error>| FrameError::Encode(e.to_string());
    ciborium::into_writer(&frame.header(), &mut buf).map_err(enc)?;
    match frame {
        Frame::Message { payload, .. } => ciborium::into_writer(payload, &mut buf).map_err(enc)?,
        Frame::Error(body) => ciborium::into_writer(body, &mut buf).map_err(enc)?,
    }
    Ok(buf)
}

/// Decodes exactly one frame from `bytes`.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    let dec = |e: ciborium::de::Error<std::io::Error>| FrameError::Decode(e.to_string());
    let mut cursor = Cursor::new(bytes);
    let header: FrameHeader = ciborium::from_reader(&mut cursor).map_err(dec)?;
    let frame = match header.op {
        OP_MESSAGE => Frame::Message {
            t: header.t,
            payload: ciborium::from_reader(&mut cursor).map_err(dec)?,
        },
        OP_ERROR => Frame::Error(ciborium::from_reader(&mut cursor).map_err(dec)?),
        other => return Err(FrameError::UnknownOp(other)),
    };
    let rest = bytes.len() - cursor.position() as usize;
    if rest > 0 {
        return Err(FrameError::Trailing(rest));
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_is_a_separate_cbor_value() {
        let bytes = encode_frame(&Frame::typed("#count", json!({"num": 1}))).unwrap();
        let mut cursor = Cursor::new(bytes.as_slice());
        let header: FrameHeader = ciborium::from_reader(&mut cursor).unwrap();
        assert_eq!(header, FrameHeader { op: 1, t: Some("#count".into()) });
        let payload: Value = ciborium::from_reader(&mut cursor).unwrap();
        assert_eq!(payload, json!({"num": 1}));
    }

    #[test]
    fn message_without_type_omits_t() {
        let bytes = encode_frame(&Frame::message(json!({"num": 2}))).unwrap();
        let decoded = decode_frame(&bytes).unwrap();
        assert_eq!(decoded, Frame::message(json!({"num": 2})));
    }

    #[test]
    fn error_frame_carries_name_and_message() {
        let bytes = encode_frame(&Frame::error("FutureCursor", "cursor in the future")).unwrap();
        match decode_frame(&bytes).unwrap() {
            Frame::Error(body) => {
                assert_eq!(body.error, "FutureCursor");
                assert_eq!(body.message.as_deref(), Some("cursor in the future"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_op_and_trailing_bytes_fail() {
        let mut buf = Vec::new();
        ciborium::into_writer(&FrameHeader { op: 7, t: None }, &mut buf).unwrap();
        ciborium::into_writer(&json!({}), &mut buf).unwrap();
        assert!(matches!(decode_frame(&buf), Err(FrameError::UnknownOp(7))));

        let mut bytes = encode_frame(&Frame::message(json!(1))).unwrap();
        bytes.push(0);
        assert!(matches!(decode_frame(&bytes), Err(FrameError::Trailing(1))));
    }
}
