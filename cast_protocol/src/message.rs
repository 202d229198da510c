use crate::msgpack::{self, PackError, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] PackError),

    #[error("unknown message tag: {0}")]
    UnknownTag(String),

    #[error("missing message tag")]
    MissingTag,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{0}' out of range")]
    OutOfRange(&'static str),

    #[error("trailing bytes after message")]
    TrailingBytes,

    #[error("connection closed")]
    Closed,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

impl ProtocolError {
    /// True for decode failures that should be logged and skipped without
    /// tearing down the channel.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::Malformed(_)
                | ProtocolError::UnknownTag(_)
                | ProtocolError::MissingTag
                | ProtocolError::MissingField(_)
                | ProtocolError::OutOfRange(_)
                | ProtocolError::TrailingBytes
        )
    }
}

/// One wire message. Every message is a single MessagePack map whose `type`
/// entry names the tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Session descriptor, source → sink, sent once on connect.
    ServerInfo {
        sample_rate: u32,
        channels: u16,
        bit_depth: u16,
        chunk_duration_ms: u32,
        server_start_time: f64,
    },
    /// Sink → source. `t1` is the sink's send stamp.
    SyncRequest { t1: f64 },
    /// Source → sink. Echoes `t1`, adds receive stamp `t2` and send stamp `t3`.
    SyncResponse { t1: f64, t2: f64, t3: f64 },
    /// Source → sink. One stamped PCM frame.
    AudioChunk {
        timestamp: f64,
        sequence: u64,
        data: Vec<u8>,
    },
    /// Sink → source, after the first accepted sync exchange.
    ClientReady { client_id: String },
    /// Either direction, informational.
    Error { message: String },
}

impl Message {
    pub fn tag(&self) -> &'static str {
        match self {
            Message::ServerInfo { .. } => "server_info",
            Message::SyncRequest { .. } => "sync_request",
            Message::SyncResponse { .. } => "sync_response",
            Message::AudioChunk { .. } => "audio_chunk",
            Message::ClientReady { .. } => "client_ready",
            Message::Error { .. } => "error",
        }
    }

    /// Serialize to a single self-delimited binary record.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(match self {
            Message::AudioChunk { data, .. } => data.len() + 64,
            _ => 64,
        });

        match self {
            Message::ServerInfo {
                sample_rate,
                channels,
                bit_depth,
                chunk_duration_ms,
                server_start_time,
            } => {
                msgpack::write_map_header(&mut out, 6);
                msgpack::write_str(&mut out, "type");
                msgpack::write_str(&mut out, self.tag());
                msgpack::write_str(&mut out, "sampleRate");
                msgpack::write_uint(&mut out, *sample_rate as u64);
                msgpack::write_str(&mut out, "channels");
                msgpack::write_uint(&mut out, *channels as u64);
                msgpack::write_str(&mut out, "bitDepth");
                msgpack::write_uint(&mut out, *bit_depth as u64);
                msgpack::write_str(&mut out, "chunkDurationMs");
                msgpack::write_uint(&mut out, *chunk_duration_ms as u64);
                msgpack::write_str(&mut out, "serverStartTime");
                msgpack::write_f64(&mut out, *server_start_time);
            }
            Message::SyncRequest { t1 } => {
                msgpack::write_map_header(&mut out, 2);
                msgpack::write_str(&mut out, "type");
                msgpack::write_str(&mut out, self.tag());
                msgpack::write_str(&mut out, "t1");
                msgpack::write_f64(&mut out, *t1);
            }
            Message::SyncResponse { t1, t2, t3 } => {
                msgpack::write_map_header(&mut out, 4);
                msgpack::write_str(&mut out, "type");
                msgpack::write_str(&mut out, self.tag());
                msgpack::write_str(&mut out, "t1");
                msgpack::write_f64(&mut out, *t1);
                msgpack::write_str(&mut out, "t2");
                msgpack::write_f64(&mut out, *t2);
                msgpack::write_str(&mut out, "t3");
                msgpack::write_f64(&mut out, *t3);
            }
            Message::AudioChunk {
                timestamp,
                sequence,
                data,
            } => {
                msgpack::write_map_header(&mut out, 4);
                msgpack::write_str(&mut out, "type");
                msgpack::write_str(&mut out, self.tag());
                msgpack::write_str(&mut out, "timestamp");
                msgpack::write_f64(&mut out, *timestamp);
                msgpack::write_str(&mut out, "sequence");
                msgpack::write_uint(&mut out, *sequence);
                msgpack::write_str(&mut out, "data");
                msgpack::write_bin(&mut out, data);
            }
            Message::ClientReady { client_id } => {
                msgpack::write_map_header(&mut out, 2);
                msgpack::write_str(&mut out, "type");
                msgpack::write_str(&mut out, self.tag());
                msgpack::write_str(&mut out, "clientId");
                msgpack::write_str(&mut out, client_id);
            }
            Message::Error { message } => {
                msgpack::write_map_header(&mut out, 2);
                msgpack::write_str(&mut out, "type");
                msgpack::write_str(&mut out, self.tag());
                msgpack::write_str(&mut out, "message");
                msgpack::write_str(&mut out, message);
            }
        }

        out
    }

    /// Parse a single message. Fails on an unknown tag, a missing required
    /// field, an out-of-range numeric field, or a length mismatch.
    pub fn decode(bytes: &[u8]) -> Result<Message, ProtocolError> {
        let mut input = bytes;
        let fields = msgpack::read_map(&mut input)?;
        if !input.is_empty() {
            return Err(ProtocolError::TrailingBytes);
        }

        let tag = fields
            .iter()
            .find(|(key, _)| key == "type")
            .ok_or(ProtocolError::MissingTag)?;
        let tag = match &tag.1 {
            Value::Str(tag) => tag.as_str(),
            _ => return Err(ProtocolError::MissingTag),
        };

        match tag {
            "server_info" => Ok(Message::ServerInfo {
                sample_rate: uint_field(&fields, "sampleRate", 1, 1_000_000)? as u32,
                channels: uint_field(&fields, "channels", 1, 255)? as u16,
                bit_depth: uint_field(&fields, "bitDepth", 8, 64)? as u16,
                chunk_duration_ms: uint_field(&fields, "chunkDurationMs", 1, 60_000)? as u32,
                server_start_time: time_field(&fields, "serverStartTime")?,
            }),
            "sync_request" => Ok(Message::SyncRequest {
                t1: time_field(&fields, "t1")?,
            }),
            "sync_response" => Ok(Message::SyncResponse {
                t1: time_field(&fields, "t1")?,
                t2: time_field(&fields, "t2")?,
                t3: time_field(&fields, "t3")?,
            }),
            "audio_chunk" => Ok(Message::AudioChunk {
                timestamp: time_field(&fields, "timestamp")?,
                sequence: uint_field(&fields, "sequence", 0, u64::MAX)?,
                data: bin_field(&fields, "data")?,
            }),
            "client_ready" => Ok(Message::ClientReady {
                client_id: str_field(&fields, "clientId")?,
            }),
            "error" => Ok(Message::Error {
                message: str_field(&fields, "message")?,
            }),
            other => Err(ProtocolError::UnknownTag(other.to_string())),
        }
    }
}

fn field<'a>(
    fields: &'a [(String, Value)],
    name: &'static str,
) -> Result<&'a Value, ProtocolError> {
    fields
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
        .ok_or(ProtocolError::MissingField(name))
}

fn uint_field(
    fields: &[(String, Value)],
    name: &'static str,
    min: u64,
    max: u64,
) -> Result<u64, ProtocolError> {
    let value = field(fields, name)?
        .as_u64()
        .ok_or(ProtocolError::OutOfRange(name))?;
    if value < min || value > max {
        return Err(ProtocolError::OutOfRange(name));
    }
    Ok(value)
}

/// Timestamps are finite, non-negative fractional milliseconds.
fn time_field(fields: &[(String, Value)], name: &'static str) -> Result<f64, ProtocolError> {
    let value = field(fields, name)?
        .as_f64()
        .ok_or(ProtocolError::OutOfRange(name))?;
    if !value.is_finite() || value < 0.0 {
        return Err(ProtocolError::OutOfRange(name));
    }
    Ok(value)
}

fn str_field(fields: &[(String, Value)], name: &'static str) -> Result<String, ProtocolError> {
    match field(fields, name)? {
        Value::Str(value) => Ok(value.clone()),
        _ => Err(ProtocolError::OutOfRange(name)),
    }
}

fn bin_field(fields: &[(String, Value)], name: &'static str) -> Result<Vec<u8>, ProtocolError> {
    match field(fields, name)? {
        Value::Bin(value) => Ok(value.clone()),
        _ => Err(ProtocolError::OutOfRange(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgpack;

    fn round_trip(message: Message) {
        let encoded = message.encode();
        let decoded = Message::decode(&encoded).expect("decode");
        assert_eq!(decoded, message);
    }

    #[test]
    fn round_trip_every_tag() {
        round_trip(Message::ServerInfo {
            sample_rate: 48_000,
            channels: 2,
            bit_depth: 16,
            chunk_duration_ms: 20,
            server_start_time: 1234.5,
        });
        round_trip(Message::SyncRequest { t1: 0.25 });
        round_trip(Message::SyncResponse {
            t1: 1.0,
            t2: 500.125,
            t3: 500.25,
        });
        round_trip(Message::AudioChunk {
            timestamp: 98765.4321,
            sequence: 5001,
            data: vec![0x55; 3840],
        });
        round_trip(Message::ClientReady {
            client_id: "kitchen".to_string(),
        });
        round_trip(Message::Error {
            message: "device not found".to_string(),
        });
    }

    #[test]
    fn round_trip_randomized_chunks() {
        // Deterministic LCG; covers sequence values across all integer widths
        // plus the float64 fallback beyond u32. Shifts keep sequences within
        // the 2^53 range float64 represents exactly.
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..50 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let sequence = state >> (11 + state % 32);
            let len = (state % 4096) as usize;
            round_trip(Message::AudioChunk {
                timestamp: (state % 1_000_000) as f64 + 0.5,
                sequence,
                data: vec![(state & 0xff) as u8; len],
            });
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut out = Vec::new();
        msgpack::write_map_header(&mut out, 1);
        msgpack::write_str(&mut out, "type");
        msgpack::write_str(&mut out, "volume_change");
        match Message::decode(&out) {
            Err(ProtocolError::UnknownTag(tag)) => assert_eq!(tag, "volume_change"),
            other => panic!("expected unknown tag, got {:?}", other),
        }
    }

    #[test]
    fn missing_field_is_rejected() {
        let mut out = Vec::new();
        msgpack::write_map_header(&mut out, 1);
        msgpack::write_str(&mut out, "type");
        msgpack::write_str(&mut out, "sync_request");
        match Message::decode(&out) {
            Err(ProtocolError::MissingField("t1")) => {}
            other => panic!("expected missing t1, got {:?}", other),
        }
    }

    #[test]
    fn negative_timestamp_is_out_of_range() {
        let mut out = Vec::new();
        msgpack::write_map_header(&mut out, 2);
        msgpack::write_str(&mut out, "type");
        msgpack::write_str(&mut out, "sync_request");
        msgpack::write_str(&mut out, "t1");
        msgpack::write_f64(&mut out, -1.0);
        match Message::decode(&out) {
            Err(ProtocolError::OutOfRange("t1")) => {}
            other => panic!("expected out of range, got {:?}", other),
        }
    }

    #[test]
    fn zero_sample_rate_is_out_of_range() {
        let encoded = Message::ServerInfo {
            sample_rate: 48_000,
            channels: 2,
            bit_depth: 16,
            chunk_duration_ms: 20,
            server_start_time: 0.0,
        }
        .encode();

        // Patch the encoded sampleRate (fixstr key then uint16 0xbb80) down
        // to zero by rewriting the value byte sequence.
        let needle = [0xcd, 0xbb, 0x80];
        let pos = encoded
            .windows(3)
            .position(|window| window == needle)
            .expect("sampleRate encoding");
        let mut patched = encoded.clone();
        patched[pos] = 0x00; // positive fixint 0
        patched.remove(pos + 2);
        patched.remove(pos + 1);
        match Message::decode(&patched) {
            Err(ProtocolError::OutOfRange("sampleRate")) => {}
            other => panic!("expected out of range, got {:?}", other),
        }
    }

    #[test]
    fn short_blob_is_rejected() {
        let encoded = Message::AudioChunk {
            timestamp: 1.0,
            sequence: 0,
            data: vec![1, 2, 3, 4, 5, 6, 7, 8],
        }
        .encode();
        // Drop the final payload byte so the declared bin length overruns.
        let truncated = &encoded[..encoded.len() - 1];
        match Message::decode(truncated) {
            Err(ProtocolError::Malformed(PackError::Truncated)) => {}
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut encoded = Message::SyncRequest { t1: 5.0 }.encode();
        encoded.push(0x00);
        match Message::decode(&encoded) {
            Err(ProtocolError::TrailingBytes) => {}
            other => panic!("expected trailing bytes, got {:?}", other),
        }
    }

    #[test]
    fn fields_decode_in_any_order() {
        let mut out = Vec::new();
        msgpack::write_map_header(&mut out, 2);
        msgpack::write_str(&mut out, "t1");
        msgpack::write_f64(&mut out, 42.0);
        msgpack::write_str(&mut out, "type");
        msgpack::write_str(&mut out, "sync_request");
        assert_eq!(
            Message::decode(&out).unwrap(),
            Message::SyncRequest { t1: 42.0 }
        );
    }
}
