//! Wire encoding of delivery events
//!
//! Control traffic travels as JSON text frames:
//!
//! ```text
//! client -> {"event":"request-delivery","ack":7,"data":{"identifier":"abc123"}}
//! client -> {"ack":12,"data":{"message":"chunk-ack","number":3}}
//! server -> {"ack":7,"data":"begin-delivery"}  |  {"ack":7,"error":{...}}
//! server -> {"event":"delivery-complete"}
//! server -> {"event":"delivery-error","data":{...}}
//! ```
//!
//! Chunks travel as binary frames with a fixed preamble and a JSON header:
//!
//! ```text
//! +-------+-------+------------------+---------------+-----------+
//! | magic | ver   | header_len (u32) | header (JSON) | payload   |
//! | 0x53  | 0x01  | big-endian       |               |           |
//! +-------+-------+------------------+---------------+-----------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use shipd_errors::{DeliveryError, Error, TransportError};
use shipd_events::FailureContext;
use shipd_types::{Chunk, RequestPayload};
use tokio_tungstenite::tungstenite::Message;

/// Magic byte, 'S' for shipd
pub const MAGIC: u8 = 0x53;

/// Chunk frame layout version
pub const VERSION: u8 = 0x01;

/// magic(1) + ver(1) + header_len(4)
pub const FIXED_HEADER_LEN: usize = 6;

pub const REQUEST_DELIVERY: &str = "request-delivery";
pub const BEGIN_DELIVERY: &str = "begin-delivery";
pub const CHUNK_DELIVERED: &str = "chunk-delivered";
pub const CHUNK_ACK: &str = "chunk-ack";
pub const DELIVERY_COMPLETE: &str = "delivery-complete";
pub const DELIVERY_ERROR: &str = "delivery-error";

/// A decoded client frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    RequestDelivery {
        ack: Option<u64>,
        payload: RequestPayload,
    },
    ChunkAck {
        number: u64,
    },
}

/// A client frame that could not be understood
#[derive(Debug, Clone)]
pub struct DecodeError {
    /// Ack id recovered from the frame, if any
    pub ack: Option<u64>,
    pub error: Error,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    ack: Option<u64>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AckReply {
    message: String,
    number: u64,
}

/// Decode a text frame from the client
///
/// # Errors
///
/// Returns a `DecodeError` carrying whatever ack id could be recovered.
pub fn decode_text(text: &str) -> Result<Inbound, DecodeError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|e| DecodeError {
        ack: None,
        error: TransportError::MalformedFrame {
            message: e.to_string(),
        }
        .into(),
    })?;
    let ack = envelope.ack;
    let violation = |message: String| DecodeError {
        ack,
        error: DeliveryError::protocol(message).into(),
    };

    match envelope.event.as_deref() {
        Some(REQUEST_DELIVERY) => {
            let payload = match envelope.data {
                Some(data) => serde_json::from_value(data)
                    .map_err(|e| violation(format!("invalid request-delivery payload: {e}")))?,
                None => RequestPayload::default(),
            };
            Ok(Inbound::RequestDelivery { ack, payload })
        }
        Some(other) => Err(violation(format!("unknown event `{other}`"))),
        None => {
            let reply: AckReply = envelope
                .data
                .and_then(|data| serde_json::from_value(data).ok())
                .ok_or_else(|| violation("frame has neither event nor ack reply".to_string()))?;
            if reply.message != CHUNK_ACK {
                return Err(violation(format!("unknown reply `{}`", reply.message)));
            }
            Ok(Inbound::ChunkAck {
                number: reply.number,
            })
        }
    }
}

/// A frame queued for the client
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Reply to a `request-delivery` that carried an ack id
    Reply {
        ack: u64,
        result: Result<(), FailureContext>,
    },
    /// A chunk, tagged with the ack id the client may answer
    Chunk { ack: u64, chunk: Chunk },
    Complete,
    Error(FailureContext),
}

#[derive(Serialize)]
struct ReplyFrame<'a> {
    ack: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a FailureContext>,
}

#[derive(Serialize)]
struct EventFrame<'a> {
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a FailureContext>,
}

/// Header of a binary chunk frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHeader {
    pub event: String,
    pub ack: u64,
    pub number: u64,
    pub size: u64,
    pub total_size: Option<u64>,
}

impl Outbound {
    /// Render as a WebSocket message
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be serialized.
    pub fn into_message(self) -> Result<Message, Error> {
        let message = match self {
            Self::Reply { ack, result } => {
                let frame = match &result {
                    Ok(()) => ReplyFrame {
                        ack,
                        data: Some(BEGIN_DELIVERY),
                        error: None,
                    },
                    Err(failure) => ReplyFrame {
                        ack,
                        data: None,
                        error: Some(failure),
                    },
                };
                Message::text(serde_json::to_string(&frame)?)
            }
            Self::Chunk { ack, chunk } => Message::binary(encode_chunk(ack, &chunk)?),
            Self::Complete => Message::text(serde_json::to_string(&EventFrame {
                event: DELIVERY_COMPLETE,
                data: None,
            })?),
            Self::Error(failure) => Message::text(serde_json::to_string(&EventFrame {
                event: DELIVERY_ERROR,
                data: Some(&failure),
            })?),
        };
        Ok(message)
    }
}

/// Encode a chunk as a binary frame
///
/// # Errors
///
/// Returns an error if the header cannot be serialized or exceeds 4 GiB.
pub fn encode_chunk(ack: u64, chunk: &Chunk) -> Result<Bytes, Error> {
    let header = serde_json::to_vec(&ChunkHeader {
        event: CHUNK_DELIVERED.to_string(),
        ack,
        number: chunk.number,
        size: chunk.size(),
        total_size: chunk.total_size,
    })?;
    let header_len = u32::try_from(header.len()).map_err(|_| TransportError::MalformedFrame {
        message: "chunk header exceeds 4 GiB".to_string(),
    })?;

    let mut frame = BytesMut::with_capacity(FIXED_HEADER_LEN + header.len() + chunk.data.len());
    frame.put_u8(MAGIC);
    frame.put_u8(VERSION);
    frame.put_u32(header_len);
    frame.put_slice(&header);
    frame.put_slice(&chunk.data);
    Ok(frame.freeze())
}

/// Split a binary chunk frame into header and payload
///
/// # Errors
///
/// Returns `MalformedFrame` for a bad preamble, a truncated frame, or a
/// payload whose length disagrees with the header.
pub fn decode_chunk(frame: &Bytes) -> Result<(ChunkHeader, Bytes), Error> {
    let malformed = |message: String| -> Error { TransportError::MalformedFrame { message }.into() };

    if frame.len() < FIXED_HEADER_LEN {
        return Err(malformed(format!("frame of {} bytes is too short", frame.len())));
    }
    if frame[0] != MAGIC {
        return Err(malformed(format!(
            "bad magic: expected 0x{MAGIC:02X}, got 0x{:02X}",
            frame[0]
        )));
    }
    if frame[1] != VERSION {
        return Err(malformed(format!(
            "unsupported version: expected {VERSION}, got {}",
            frame[1]
        )));
    }

    let header_len = u32::from_be_bytes([frame[2], frame[3], frame[4], frame[5]]) as usize;
    let payload_start = FIXED_HEADER_LEN + header_len;
    if frame.len() < payload_start {
        return Err(malformed("truncated chunk header".to_string()));
    }

    let header: ChunkHeader = serde_json::from_slice(&frame[FIXED_HEADER_LEN..payload_start])
        .map_err(|e| malformed(format!("chunk header: {e}")))?;
    let payload = frame.slice(payload_start..);
    if payload.len() as u64 != header.size {
        return Err(malformed(format!(
            "payload is {} bytes, header says {}",
            payload.len(),
            header.size
        )));
    }
    Ok((header, payload))
}
