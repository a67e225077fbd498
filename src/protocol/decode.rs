//! Protocol message decoding
//!
//! `decode_message` works incrementally over a receive buffer: `Ok(None)`
//! means the buffer does not yet hold a complete frame, `Ok(Some((msg,
//! consumed)))` hands back one decoded frame. The caller must advance the
//! buffer by `consumed` after a successful decode. A hard error means the
//! stream is corrupt and the connection cannot be trusted anymore.

use std::collections::HashMap;

use bytes::BytesMut;

use super::constants::{access_modes, tags, value_tags};
use super::message::{ClientMessage, ServerMessage};
use crate::session::AccessMode;
use crate::value::{Node, Path, Relationship, Value};
use crate::{Error, Result};

/// Maximum payload length accepted from the wire.
///
/// Any frame whose length field exceeds this is rejected before allocation,
/// so a crafted header cannot make the client reserve gigabytes.
const MAX_MESSAGE_LENGTH: usize = 16 * 1024 * 1024;

/// Maximum nesting depth for lists and maps
const MAX_NESTING_DEPTH: usize = 128;

/// Decode one server message from the receive buffer
pub fn decode_message(data: &mut BytesMut) -> Result<Option<(ServerMessage, usize)>> {
    let Some((tag, payload, consumed)) = split_frame(data)? else {
        return Ok(None);
    };

    let mut reader = Reader::new(payload);
    let msg = match tag {
        tags::SUCCESS => ServerMessage::Success {
            metadata: reader.map(0)?,
        },
        tags::RECORD => {
            let count = reader.collection_count()?;
            let mut values = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                values.push(reader.value(0)?);
            }
            ServerMessage::Record { values }
        }
        tags::IGNORED => ServerMessage::Ignored,
        tags::FAILURE => ServerMessage::Failure {
            code: reader.string()?,
            message: reader.string()?,
        },
        other => {
            return Err(Error::Protocol(format!(
                "unknown server message tag 0x{other:02x}"
            )))
        }
    };
    reader.finish()?;

    Ok(Some((msg, consumed)))
}

/// Decode one client message from a receive buffer.
///
/// Only servers (in-process test servers in particular) need this direction.
pub fn decode_client_message(data: &mut BytesMut) -> Result<Option<(ClientMessage, usize)>> {
    let Some((tag, payload, consumed)) = split_frame(data)? else {
        return Ok(None);
    };

    let mut reader = Reader::new(payload);
    let msg = match tag {
        tags::HELLO => ClientMessage::Hello {
            user_agent: reader.string()?,
            scheme: reader.string()?,
            principal: reader.string()?,
            credentials: reader.string()?,
        },
        tags::GOODBYE => ClientMessage::Goodbye,
        tags::RESET => ClientMessage::Reset,
        tags::BEGIN => {
            let database = reader.string()?;
            let mode = match reader.u8()? {
                access_modes::READ => AccessMode::Read,
                access_modes::WRITE => AccessMode::Write,
                other => {
                    return Err(Error::Protocol(format!(
                        "unknown access mode byte 0x{other:02x}"
                    )))
                }
            };
            let count = reader.collection_count()?;
            let mut bookmarks = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                bookmarks.push(reader.string()?);
            }
            ClientMessage::Begin {
                database,
                mode,
                bookmarks,
            }
        }
        tags::COMMIT => ClientMessage::Commit,
        tags::ROLLBACK => ClientMessage::Rollback,
        tags::RUN => ClientMessage::Run {
            query: reader.string()?,
            parameters: reader.map(0)?,
        },
        tags::PULL => ClientMessage::Pull { n: reader.i64()? },
        tags::DISCARD => ClientMessage::Discard { n: reader.i64()? },
        other => {
            return Err(Error::Protocol(format!(
                "unknown client message tag 0x{other:02x}"
            )))
        }
    };
    reader.finish()?;

    Ok(Some((msg, consumed)))
}

/// Decode one value from a byte slice, returning the value and the number of
/// bytes it occupied
pub fn decode_value(data: &[u8]) -> Result<(Value, usize)> {
    let mut reader = Reader::new(data);
    let value = reader.value(0)?;
    Ok((value, reader.offset))
}

/// Split off the next complete frame, if the buffer holds one
fn split_frame(data: &BytesMut) -> Result<Option<(u8, &[u8], usize)>> {
    if data.len() < 5 {
        return Ok(None);
    }

    let tag = data[0];
    let len = u32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;

    if len > MAX_MESSAGE_LENGTH {
        return Err(Error::Protocol(format!(
            "message length {len} exceeds maximum allowed {MAX_MESSAGE_LENGTH}"
        )));
    }
    if data.len() < 5 + len {
        return Ok(None);
    }

    Ok(Some((tag, &data[5..5 + len], 5 + len)))
}

/// Checked reader over a frame payload
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::Protocol(format!(
                "truncated payload: need {n} bytes, have {}",
                self.remaining()
            )));
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        Ok(i64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn f64(&mut self) -> Result<f64> {
        let b = self.take(8)?;
        Ok(f64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Element count for a collection. Every element needs at least one byte,
    /// so a count larger than the remaining payload is corrupt.
    fn collection_count(&mut self) -> Result<usize> {
        let count = self.u32()? as usize;
        if count > self.remaining() {
            return Err(Error::Protocol(format!(
                "collection count {count} exceeds remaining payload {}",
                self.remaining()
            )));
        }
        Ok(count)
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| Error::Protocol("invalid utf-8 in string".into()))
    }

    fn byte_string(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn map(&mut self, depth: usize) -> Result<HashMap<String, Value>> {
        let count = self.collection_count()?;
        let mut map = HashMap::with_capacity(count.min(1024));
        for _ in 0..count {
            let key = self.string()?;
            let value = self.value(depth + 1)?;
            map.insert(key, value);
        }
        Ok(map)
    }

    fn node_body(&mut self, depth: usize) -> Result<Node> {
        let id = self.i64()?;
        let count = self.collection_count()?;
        let mut labels = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            labels.push(self.string()?);
        }
        let properties = self.map(depth)?;
        Ok(Node::new(id, labels, properties))
    }

    fn relationship_body(&mut self, depth: usize) -> Result<Relationship> {
        let id = self.i64()?;
        let start = self.i64()?;
        let end = self.i64()?;
        let rel_type = self.string()?;
        let properties = self.map(depth)?;
        Ok(Relationship::new(id, start, end, rel_type, properties))
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_NESTING_DEPTH {
            return Err(Error::Protocol(format!(
                "value nesting exceeds maximum depth {MAX_NESTING_DEPTH}"
            )));
        }

        let tag = self.u8()?;
        let value = match tag {
            value_tags::NULL => Value::Null,
            value_tags::BOOL => match self.u8()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(Error::Protocol(format!("invalid bool byte 0x{other:02x}")))
                }
            },
            value_tags::INTEGER => Value::Integer(self.i64()?),
            value_tags::FLOAT => Value::Float(self.f64()?),
            value_tags::STRING => Value::String(self.string()?),
            value_tags::BYTES => Value::Bytes(self.byte_string()?),
            value_tags::LIST => {
                let count = self.collection_count()?;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.value(depth + 1)?);
                }
                Value::List(items)
            }
            value_tags::MAP => Value::Map(self.map(depth)?),
            value_tags::NODE => Value::Node(self.node_body(depth)?),
            value_tags::RELATIONSHIP => Value::Relationship(self.relationship_body(depth)?),
            value_tags::PATH => {
                let node_count = self.collection_count()?;
                let mut nodes = Vec::with_capacity(node_count.min(1024));
                for _ in 0..node_count {
                    nodes.push(self.node_body(depth)?);
                }
                let rel_count = self.collection_count()?;
                let mut relationships = Vec::with_capacity(rel_count.min(1024));
                for _ in 0..rel_count {
                    relationships.push(self.relationship_body(depth)?);
                }
                Value::Path(Path::new(nodes, relationships)?)
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unknown value tag 0x{other:02x}"
                )))
            }
        };
        Ok(value)
    }

    /// A fully decoded frame must leave nothing behind
    fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(Error::Protocol(format!(
                "{} trailing bytes after message payload",
                self.remaining()
            )));
        }
        Ok(())
    }
}
