//! Wire protocol constants

/// Handshake preamble sent before version negotiation
pub const HANDSHAKE_MAGIC: [u8; 4] = [0x60, 0x57, 0x49, 0x52];

/// Protocol version proposed by this client
pub const PROTOCOL_VERSION: u32 = 1;

/// Number of version slots in the handshake request
pub const HANDSHAKE_VERSION_SLOTS: usize = 4;

/// Default server port
pub const DEFAULT_PORT: u16 = 7687;

/// Pull/discard amount meaning "everything remaining"
pub const FETCH_ALL: i64 = -1;

/// Message type tags
pub mod tags {
    /// Client: open and authenticate the connection
    pub const HELLO: u8 = 0x01;

    /// Client: orderly shutdown
    pub const GOODBYE: u8 = 0x02;

    /// Client: clear failure state and any open transaction
    pub const RESET: u8 = 0x0F;

    /// Client: run a query inside the open transaction
    pub const RUN: u8 = 0x10;

    /// Client: open an explicit transaction
    pub const BEGIN: u8 = 0x11;

    /// Client: commit the open transaction
    pub const COMMIT: u8 = 0x12;

    /// Client: roll back the open transaction
    pub const ROLLBACK: u8 = 0x13;

    /// Client: throw away records from the current stream
    pub const DISCARD: u8 = 0x2F;

    /// Client: request records from the current stream
    pub const PULL: u8 = 0x3F;

    /// Server: request completed, metadata attached
    pub const SUCCESS: u8 = 0x70;

    /// Server: one row of the current stream
    pub const RECORD: u8 = 0x71;

    /// Server: request skipped because the connection is in a failed state
    pub const IGNORED: u8 = 0x7E;

    /// Server: request failed, code and message attached
    pub const FAILURE: u8 = 0x7F;
}

/// Value type tags
pub mod value_tags {
    pub const NULL: u8 = 0xC0;
    pub const BOOL: u8 = 0xC1;
    pub const INTEGER: u8 = 0xC2;
    pub const FLOAT: u8 = 0xC3;
    pub const STRING: u8 = 0xC4;
    pub const BYTES: u8 = 0xC5;
    pub const LIST: u8 = 0xC6;
    pub const MAP: u8 = 0xC7;
    pub const NODE: u8 = 0xC8;
    pub const RELATIONSHIP: u8 = 0xC9;
    pub const PATH: u8 = 0xCA;
}

/// Access mode bytes carried in BEGIN
pub mod access_modes {
    pub const READ: u8 = b'r';
    pub const WRITE: u8 = b'w';
}
