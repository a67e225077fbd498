//! Protocol message types
//!
//! Client messages are requests; every request is answered by exactly one
//! SUCCESS or FAILURE frame, except RUN/PULL which interleave RECORD frames
//! before the closing SUCCESS. A connection in the failed state answers
//! everything but RESET with IGNORED.

use std::collections::HashMap;

use crate::session::AccessMode;
use crate::value::Value;

/// Messages sent by the client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Open the connection: identify the client and authenticate
    Hello {
        user_agent: String,
        scheme: String,
        principal: String,
        credentials: String,
    },

    /// Orderly shutdown; no response expected
    Goodbye,

    /// Clear failure state and abort any open transaction
    Reset,

    /// Open an explicit transaction
    Begin {
        database: String,
        mode: AccessMode,
        bookmarks: Vec<String>,
    },

    /// Commit the open transaction
    Commit,

    /// Roll back the open transaction
    Rollback,

    /// Run a query inside the open transaction
    Run {
        query: String,
        parameters: HashMap<String, Value>,
    },

    /// Request up to `n` records from the current stream (-1 = all)
    Pull {
        n: i64,
    },

    /// Drop up to `n` records from the current stream (-1 = all)
    Discard {
        n: i64,
    },
}

/// Messages sent by the server
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Request completed; metadata depends on the request
    Success {
        metadata: HashMap<String, Value>,
    },

    /// One row of the current stream
    Record {
        values: Vec<Value>,
    },

    /// Request skipped because the connection is in a failed state
    Ignored,

    /// Request failed
    Failure {
        code: String,
        message: String,
    },
}

impl ClientMessage {
    /// Message name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "HELLO",
            Self::Goodbye => "GOODBYE",
            Self::Reset => "RESET",
            Self::Begin { .. } => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
            Self::Run { .. } => "RUN",
            Self::Pull { .. } => "PULL",
            Self::Discard { .. } => "DISCARD",
        }
    }
}

impl ServerMessage {
    /// Message name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Success { .. } => "SUCCESS",
            Self::Record { .. } => "RECORD",
            Self::Ignored => "IGNORED",
            Self::Failure { .. } => "FAILURE",
        }
    }
}
