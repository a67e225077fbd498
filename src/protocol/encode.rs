//! Protocol message encoding
//!
//! Frames are `tag (1 byte) | payload length (u32 big-endian) | payload`.
//! Map keys are sorted before encoding so the same logical value always
//! produces the same bytes.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};

use super::constants::{access_modes, tags};
use super::message::{ClientMessage, ServerMessage};
use crate::session::AccessMode;
use crate::value::{Node, Relationship, Value};
use crate::{Error, Result};

/// Encode a client message into a framed byte buffer
pub fn encode_message(msg: &ClientMessage) -> Result<BytesMut> {
    let mut buf = BytesMut::new();

    match msg {
        ClientMessage::Hello {
            user_agent,
            scheme,
            principal,
            credentials,
        } => {
            let len_pos = begin_frame(&mut buf, tags::HELLO);
            encode_string(&mut buf, user_agent)?;
            encode_string(&mut buf, scheme)?;
            encode_string(&mut buf, principal)?;
            encode_string(&mut buf, credentials)?;
            end_frame(&mut buf, len_pos);
        }
        ClientMessage::Goodbye => {
            let len_pos = begin_frame(&mut buf, tags::GOODBYE);
            end_frame(&mut buf, len_pos);
        }
        ClientMessage::Reset => {
            let len_pos = begin_frame(&mut buf, tags::RESET);
            end_frame(&mut buf, len_pos);
        }
        ClientMessage::Begin {
            database,
            mode,
            bookmarks,
        } => {
            let len_pos = begin_frame(&mut buf, tags::BEGIN);
            encode_string(&mut buf, database)?;
            buf.put_u8(match mode {
                AccessMode::Read => access_modes::READ,
                AccessMode::Write => access_modes::WRITE,
            });
            encode_count(&mut buf, bookmarks.len())?;
            for bookmark in bookmarks {
                encode_string(&mut buf, bookmark)?;
            }
            end_frame(&mut buf, len_pos);
        }
        ClientMessage::Commit => {
            let len_pos = begin_frame(&mut buf, tags::COMMIT);
            end_frame(&mut buf, len_pos);
        }
        ClientMessage::Rollback => {
            let len_pos = begin_frame(&mut buf, tags::ROLLBACK);
            end_frame(&mut buf, len_pos);
        }
        ClientMessage::Run { query, parameters } => {
            let len_pos = begin_frame(&mut buf, tags::RUN);
            encode_string(&mut buf, query)?;
            encode_map(&mut buf, parameters)?;
            end_frame(&mut buf, len_pos);
        }
        ClientMessage::Pull { n } => {
            let len_pos = begin_frame(&mut buf, tags::PULL);
            buf.put_i64(*n);
            end_frame(&mut buf, len_pos);
        }
        ClientMessage::Discard { n } => {
            let len_pos = begin_frame(&mut buf, tags::DISCARD);
            buf.put_i64(*n);
            end_frame(&mut buf, len_pos);
        }
    }

    Ok(buf)
}

/// Encode a server message into a framed byte buffer.
///
/// The client never sends these; this direction exists for in-process test
/// servers and fuzzing.
pub fn encode_server_message(msg: &ServerMessage) -> Result<BytesMut> {
    let mut buf = BytesMut::new();

    match msg {
        ServerMessage::Success { metadata } => {
            let len_pos = begin_frame(&mut buf, tags::SUCCESS);
            encode_map(&mut buf, metadata)?;
            end_frame(&mut buf, len_pos);
        }
        ServerMessage::Record { values } => {
            let len_pos = begin_frame(&mut buf, tags::RECORD);
            encode_count(&mut buf, values.len())?;
            for value in values {
                encode_value(&mut buf, value)?;
            }
            end_frame(&mut buf, len_pos);
        }
        ServerMessage::Ignored => {
            let len_pos = begin_frame(&mut buf, tags::IGNORED);
            end_frame(&mut buf, len_pos);
        }
        ServerMessage::Failure { code, message } => {
            let len_pos = begin_frame(&mut buf, tags::FAILURE);
            encode_string(&mut buf, code)?;
            encode_string(&mut buf, message)?;
            end_frame(&mut buf, len_pos);
        }
    }

    Ok(buf)
}

/// Encode the handshake request: magic preamble plus proposed versions,
/// unused slots zeroed.
pub fn encode_handshake() -> BytesMut {
    use super::constants::{HANDSHAKE_MAGIC, HANDSHAKE_VERSION_SLOTS, PROTOCOL_VERSION};

    let mut buf = BytesMut::with_capacity(4 + HANDSHAKE_VERSION_SLOTS * 4);
    buf.put_slice(&HANDSHAKE_MAGIC);
    buf.put_u32(PROTOCOL_VERSION);
    for _ in 1..HANDSHAKE_VERSION_SLOTS {
        buf.put_u32(0);
    }
    buf
}

/// Write the tag byte, reserve the length field, return its position
fn begin_frame(buf: &mut BytesMut, tag: u8) -> usize {
    buf.put_u8(tag);
    let len_pos = buf.len();
    buf.put_u32(0);
    len_pos
}

/// Fill in the payload length reserved by `begin_frame`
fn end_frame(buf: &mut BytesMut, len_pos: usize) {
    let len = buf.len() - len_pos - 4;
    buf[len_pos..len_pos + 4].copy_from_slice(&(len as u32).to_be_bytes());
}

fn encode_count(buf: &mut BytesMut, count: usize) -> Result<()> {
    let count = u32::try_from(count)
        .map_err(|_| Error::Protocol(format!("collection too large to encode: {count} items")))?;
    buf.put_u32(count);
    Ok(())
}

fn encode_string(buf: &mut BytesMut, s: &str) -> Result<()> {
    encode_count(buf, s.len())?;
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn encode_bytes(buf: &mut BytesMut, b: &[u8]) -> Result<()> {
    encode_count(buf, b.len())?;
    buf.put_slice(b);
    Ok(())
}

fn encode_map(buf: &mut BytesMut, map: &HashMap<String, Value>) -> Result<()> {
    encode_count(buf, map.len())?;
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    for key in keys {
        encode_string(buf, key)?;
        encode_value(buf, &map[key])?;
    }
    Ok(())
}

fn encode_node_body(buf: &mut BytesMut, node: &Node) -> Result<()> {
    buf.put_i64(node.id);
    encode_count(buf, node.labels.len())?;
    for label in &node.labels {
        encode_string(buf, label)?;
    }
    encode_map(buf, &node.properties)
}

fn encode_relationship_body(buf: &mut BytesMut, rel: &Relationship) -> Result<()> {
    buf.put_i64(rel.id);
    buf.put_i64(rel.start_node_id);
    buf.put_i64(rel.end_node_id);
    encode_string(buf, &rel.rel_type)?;
    encode_map(buf, &rel.properties)
}

/// Encode a single value with its type tag
pub fn encode_value(buf: &mut BytesMut, value: &Value) -> Result<()> {
    use super::constants::value_tags;

    match value {
        Value::Null => buf.put_u8(value_tags::NULL),
        Value::Bool(b) => {
            buf.put_u8(value_tags::BOOL);
            buf.put_u8(u8::from(*b));
        }
        Value::Integer(i) => {
            buf.put_u8(value_tags::INTEGER);
            buf.put_i64(*i);
        }
        Value::Float(f) => {
            buf.put_u8(value_tags::FLOAT);
            buf.put_f64(*f);
        }
        Value::String(s) => {
            buf.put_u8(value_tags::STRING);
            encode_string(buf, s)?;
        }
        Value::Bytes(b) => {
            buf.put_u8(value_tags::BYTES);
            encode_bytes(buf, b)?;
        }
        Value::List(items) => {
            buf.put_u8(value_tags::LIST);
            encode_count(buf, items.len())?;
            for item in items {
                encode_value(buf, item)?;
            }
        }
        Value::Map(map) => {
            buf.put_u8(value_tags::MAP);
            encode_map(buf, map)?;
        }
        Value::Node(node) => {
            buf.put_u8(value_tags::NODE);
            encode_node_body(buf, node)?;
        }
        Value::Relationship(rel) => {
            buf.put_u8(value_tags::RELATIONSHIP);
            encode_relationship_body(buf, rel)?;
        }
        Value::Path(path) => {
            buf.put_u8(value_tags::PATH);
            encode_count(buf, path.nodes().len())?;
            for node in path.nodes() {
                encode_node_body(buf, node)?;
            }
            encode_count(buf, path.relationships().len())?;
            for rel in path.relationships() {
                encode_relationship_body(buf, rel)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_run_frame_layout() {
        let msg = ClientMessage::Run {
            query: "RETURN 1".to_string(),
            parameters: HashMap::new(),
        };
        let buf = encode_message(&msg).unwrap();

        assert_eq!(buf[0], tags::RUN);
        let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        assert_eq!(len, buf.len() - 5);
    }

    #[test]
    fn test_encode_goodbye_is_empty_frame() {
        let buf = encode_message(&ClientMessage::Goodbye).unwrap();
        assert_eq!(buf.len(), 5);
        assert_eq!(buf[0], tags::GOODBYE);
        assert_eq!(&buf[1..5], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_handshake_layout() {
        use super::super::constants::{HANDSHAKE_MAGIC, PROTOCOL_VERSION};

        let buf = encode_handshake();
        assert_eq!(buf.len(), 20);
        assert_eq!(&buf[0..4], &HANDSHAKE_MAGIC);
        assert_eq!(
            u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            PROTOCOL_VERSION
        );
        assert_eq!(&buf[8..20], &[0u8; 12]);
    }

    #[test]
    fn test_map_encoding_is_deterministic() {
        let mut map = HashMap::new();
        for key in ["zebra", "alpha", "monkey"] {
            map.insert(key.to_string(), Value::Integer(1));
        }

        let mut a = BytesMut::new();
        let mut b = BytesMut::new();
        encode_map(&mut a, &map).unwrap();
        encode_map(&mut b, &map).unwrap();
        assert_eq!(a, b);

        // Sorted key order: alpha before monkey before zebra
        let alpha_pos = a.windows(5).position(|w| w == b"alpha").unwrap();
        let zebra_pos = a.windows(5).position(|w| w == b"zebra").unwrap();
        assert!(alpha_pos < zebra_pos);
    }

    #[test]
    fn test_encode_begin_carries_bookmarks() {
        let msg = ClientMessage::Begin {
            database: "graph".to_string(),
            mode: AccessMode::Read,
            bookmarks: vec!["gw:12".to_string()],
        };
        let buf = encode_message(&msg).unwrap();
        assert_eq!(buf[0], tags::BEGIN);
        assert!(buf.windows(5).any(|w| w == b"gw:12"));
        assert!(buf.contains(&access_modes::READ));
    }
}
