//! Connection management
//!
//! This module handles:
//! * Transport abstraction (plain TCP vs TLS)
//! * Connection lifecycle (handshake, auth, transaction operations)
//! * State machine enforcement
//! * TLS configuration and support

mod conn;
mod state;
mod tls;
mod transport;

pub use conn::{Connection, Connector};
pub use state::ConnectionState;
pub use tls::{parse_server_name, Encryption, TlsConfig, TlsConfigBuilder};
pub use transport::Transport;
