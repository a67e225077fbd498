//! Wire protocol implementation
//!
//! Messages travel as tagged frames: a one-byte tag, a big-endian `u32`
//! payload length, then the payload. Before any message exchange the client
//! sends a 20-byte handshake (magic preamble plus four proposed protocol
//! versions) and the server answers with the version it picked.
//!
//! The encoder and decoder are pure functions over byte buffers, so they can
//! be tested and fuzzed without a socket.

pub mod constants;
pub mod decode;
pub mod encode;
pub mod message;

pub use constants::{DEFAULT_PORT, FETCH_ALL, HANDSHAKE_MAGIC, PROTOCOL_VERSION};
pub use decode::{decode_client_message, decode_message, decode_value};
pub use encode::{encode_handshake, encode_message, encode_server_message, encode_value};
pub use message::{ClientMessage, ServerMessage};
