//! Core connection type

use super::state::ConnectionState;
use super::tls::{Encryption, TlsConfig};
use super::transport::Transport;
use crate::driver::AuthToken;
use crate::protocol::constants::PROTOCOL_VERSION;
use crate::protocol::{
    decode_message, encode_handshake, encode_message, ClientMessage, ServerMessage,
};
use crate::session::AccessMode;
use crate::value::Value;
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use std::collections::HashMap;
use std::time::Duration;
use tracing::Instrument;

/// Connection factory.
///
/// Holds everything needed to dial, encrypt, handshake, and authenticate a
/// single connection. The pool clones one of these and calls [`open`] per
/// connection it creates.
///
/// [`open`]: Connector::open
#[derive(Debug, Clone)]
pub struct Connector {
    /// Server hostname
    pub host: String,
    /// Server port
    pub port: u16,
    /// Encryption level from the URI scheme
    pub encryption: Encryption,
    /// Compiled TLS configuration (None when encryption is disabled)
    pub tls: Option<TlsConfig>,
    /// Credentials presented in HELLO
    pub auth: AuthToken,
    /// User agent string presented in HELLO
    pub user_agent: String,
    /// Time allowed for dial, TLS, handshake, and HELLO combined
    pub connect_timeout: Duration,
}

impl Connector {
    /// Create a connector with default timeout and no encryption
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            encryption: Encryption::default(),
            tls: None,
            auth: AuthToken::none(),
            user_agent: concat!("graphwire/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Set the encryption level and compile the matching TLS configuration.
    ///
    /// `ca_cert_path` points at a PEM bundle to trust instead of the system
    /// roots; it only applies to [`Encryption::Verified`].
    pub fn encryption(mut self, encryption: Encryption, ca_cert_path: Option<&str>) -> Result<Self> {
        self.tls = TlsConfig::for_encryption(encryption, ca_cert_path)?;
        self.encryption = encryption;
        Ok(self)
    }

    /// Set the credentials presented in HELLO
    pub fn auth(mut self, auth: AuthToken) -> Self {
        self.auth = auth;
        self
    }

    /// Set the user agent string presented in HELLO
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Open a connection: dial, negotiate TLS if configured, run the version
    /// handshake, and authenticate.
    pub async fn open(&self) -> Result<Connection> {
        let connect = async {
            let transport = if let Some(tls) = &self.tls {
                Transport::connect_tcp_tls(&self.host, self.port, tls).await?
            } else {
                Transport::connect_tcp(&self.host, self.port).await?
            };

            let mut conn = Connection::new(transport);
            conn.handshake().await?;
            conn.hello(&self.auth, &self.user_agent).await?;
            crate::metrics::counters::connections_opened();
            tracing::debug!(
                server_agent = conn.server_agent().unwrap_or("unknown"),
                "connection established"
            );
            Ok(conn)
        };

        tokio::time::timeout(self.connect_timeout, connect)
            .instrument(tracing::info_span!(
                "connect",
                host = %self.host,
                port = self.port,
                encryption = %self.encryption
            ))
            .await
            .map_err(|_| Error::Timeout(self.connect_timeout))?
    }
}

/// A single authenticated server connection
pub struct Connection {
    transport: Transport,
    state: ConnectionState,
    read_buf: BytesMut,
    server_agent: Option<String>,
    connection_id: Option<String>,
    broken: bool,
}

impl Connection {
    /// Create connection from transport
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            state: ConnectionState::Initial,
            read_buf: BytesMut::with_capacity(8192),
            server_agent: None,
            connection_id: None,
            broken: false,
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the connection has seen an unrecoverable transport failure
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Whether the connection can go straight back into the idle pool
    pub fn is_ready(&self) -> bool {
        !self.broken && self.state == ConnectionState::Ready
    }

    /// Server product string from the HELLO response
    pub fn server_agent(&self) -> Option<&str> {
        self.server_agent.as_deref()
    }

    /// Server-assigned connection id from the HELLO response
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Exchange the version handshake.
    ///
    /// Sends the magic preamble plus proposed versions and reads the
    /// server's 4-byte pick. A pick of zero means no common version.
    async fn handshake(&mut self) -> Result<()> {
        self.state.transition(ConnectionState::Handshaking)?;

        let buf = encode_handshake();
        self.transport.write_all(&buf).await?;
        self.transport.flush().await?;

        let mut reply = [0u8; 4];
        self.transport.read_exact(&mut reply).await?;
        let chosen = u32::from_be_bytes(reply);

        match chosen {
            0 => {
                self.broken = true;
                Err(Error::Connection(
                    "server rejected all proposed protocol versions".into(),
                ))
            }
            PROTOCOL_VERSION => Ok(()),
            other => {
                self.broken = true;
                Err(Error::Protocol(format!(
                    "server picked unsupported protocol version {other}"
                )))
            }
        }
    }

    /// Authenticate with HELLO
    async fn hello(&mut self, auth: &AuthToken, user_agent: &str) -> Result<()> {
        self.state.transition(ConnectionState::Authenticating)?;
        let auth_start = std::time::Instant::now();
        crate::metrics::counters::auth_attempted();

        let (scheme, principal, credentials) = match auth {
            AuthToken::None => ("none", String::new(), String::new()),
            AuthToken::Basic { username, password } => {
                ("basic", username.clone(), password.clone())
            }
        };

        let msg = ClientMessage::Hello {
            user_agent: user_agent.to_string(),
            scheme: scheme.to_string(),
            principal,
            credentials,
        };
        self.send_message(&msg).await?;

        match self.receive_message().await? {
            ServerMessage::Success { metadata } => {
                self.server_agent = string_field(&metadata, "server");
                self.connection_id = string_field(&metadata, "connection_id");
                self.state.transition(ConnectionState::Ready)?;
                crate::metrics::counters::auth_successful();
                crate::metrics::histograms::auth_duration(
                    auth_start.elapsed().as_millis() as u64
                );
                Ok(())
            }
            ServerMessage::Failure { code, message } => {
                crate::metrics::counters::auth_failed(&code);
                // The server hangs up after a failed HELLO
                self.broken = true;
                let _ = self.state.transition(ConnectionState::Failed);
                Err(Error::from_failure(code, message))
            }
            other => Err(self.unexpected(&other, "HELLO")),
        }
    }

    /// Begin an explicit transaction
    pub async fn begin(
        &mut self,
        database: &str,
        mode: AccessMode,
        bookmarks: &[String],
    ) -> Result<()> {
        if self.state != ConnectionState::Ready {
            return Err(Error::InvalidState {
                expected: "ready".into(),
                actual: self.state.to_string(),
            });
        }

        let msg = ClientMessage::Begin {
            database: database.to_string(),
            mode,
            bookmarks: bookmarks.to_vec(),
        };
        self.send_message(&msg).await?;

        match self.receive_message().await? {
            ServerMessage::Success { .. } => {
                self.state.transition(ConnectionState::InTransaction)?;
                crate::metrics::counters::transactions_begun();
                Ok(())
            }
            ServerMessage::Failure { code, message } => Err(self.failure(code, message)),
            other => Err(self.unexpected(&other, "BEGIN")),
        }
    }

    /// Run a query inside the open transaction, returning the record keys
    pub async fn run(
        &mut self,
        query: &str,
        parameters: &HashMap<String, Value>,
    ) -> Result<Vec<String>> {
        if self.state != ConnectionState::InTransaction {
            return Err(Error::InvalidState {
                expected: "in_transaction".into(),
                actual: self.state.to_string(),
            });
        }

        let msg = ClientMessage::Run {
            query: query.to_string(),
            parameters: parameters.clone(),
        };
        self.send_message(&msg).await?;

        match self.receive_message().await? {
            ServerMessage::Success { metadata } => {
                let keys = string_list(&metadata, "fields");
                self.state.transition(ConnectionState::Streaming)?;
                tracing::trace!(columns = keys.len(), "query accepted");
                Ok(keys)
            }
            ServerMessage::Failure { code, message } => Err(self.failure(code, message)),
            other => Err(self.unexpected(&other, "RUN")),
        }
    }

    /// Pull up to `n` records from the open stream.
    ///
    /// Returns the raw record rows plus `Some(metadata)` once the stream is
    /// finished, or `None` when the server still has records left.
    pub async fn pull(
        &mut self,
        n: i64,
    ) -> Result<(Vec<Vec<Value>>, Option<HashMap<String, Value>>)> {
        if self.state != ConnectionState::Streaming {
            return Err(Error::InvalidState {
                expected: "streaming".into(),
                actual: self.state.to_string(),
            });
        }

        self.send_message(&ClientMessage::Pull { n }).await?;

        let mut rows = Vec::new();
        loop {
            match self.receive_message().await? {
                ServerMessage::Record { values } => rows.push(values),
                ServerMessage::Success { metadata } => {
                    crate::metrics::counters::records_streamed(rows.len() as u64);
                    let has_more =
                        matches!(metadata.get("has_more"), Some(Value::Bool(true)));
                    if has_more {
                        return Ok((rows, None));
                    }
                    self.state.transition(ConnectionState::InTransaction)?;
                    return Ok((rows, Some(metadata)));
                }
                ServerMessage::Failure { code, message } => {
                    return Err(self.failure(code, message))
                }
                other => return Err(self.unexpected(&other, "PULL")),
            }
        }
    }

    /// Throw away the rest of the open stream, returning its summary metadata
    pub async fn discard(&mut self) -> Result<HashMap<String, Value>> {
        if self.state != ConnectionState::Streaming {
            return Err(Error::InvalidState {
                expected: "streaming".into(),
                actual: self.state.to_string(),
            });
        }

        self.send_message(&ClientMessage::Discard {
            n: crate::protocol::FETCH_ALL,
        })
        .await?;

        match self.receive_message().await? {
            ServerMessage::Success { metadata } => {
                self.state.transition(ConnectionState::InTransaction)?;
                Ok(metadata)
            }
            ServerMessage::Failure { code, message } => Err(self.failure(code, message)),
            other => Err(self.unexpected(&other, "DISCARD")),
        }
    }

    /// Commit the open transaction, returning the bookmark the server minted
    pub async fn commit(&mut self) -> Result<Option<String>> {
        if self.state != ConnectionState::InTransaction {
            return Err(Error::InvalidState {
                expected: "in_transaction".into(),
                actual: self.state.to_string(),
            });
        }

        self.send_message(&ClientMessage::Commit).await?;

        match self.receive_message().await? {
            ServerMessage::Success { metadata } => {
                self.state.transition(ConnectionState::Ready)?;
                crate::metrics::counters::transactions_committed();
                Ok(string_field(&metadata, "bookmark"))
            }
            ServerMessage::Failure { code, message } => Err(self.failure(code, message)),
            other => Err(self.unexpected(&other, "COMMIT")),
        }
    }

    /// Roll back the open transaction
    pub async fn rollback(&mut self) -> Result<()> {
        if self.state != ConnectionState::InTransaction {
            return Err(Error::InvalidState {
                expected: "in_transaction".into(),
                actual: self.state.to_string(),
            });
        }

        self.send_message(&ClientMessage::Rollback).await?;

        match self.receive_message().await? {
            ServerMessage::Success { .. } => {
                self.state.transition(ConnectionState::Ready)?;
                crate::metrics::counters::transactions_rolled_back();
                Ok(())
            }
            ServerMessage::Failure { code, message } => Err(self.failure(code, message)),
            other => Err(self.unexpected(&other, "ROLLBACK")),
        }
    }

    /// Reset the connection to a clean state.
    ///
    /// Discards any open transaction and clears a failure, server side and
    /// client side.
    pub async fn reset(&mut self) -> Result<()> {
        self.send_message(&ClientMessage::Reset).await?;

        match self.receive_message().await? {
            ServerMessage::Success { .. } => {
                if self.state != ConnectionState::Ready {
                    self.state.transition(ConnectionState::Ready)?;
                }
                tracing::trace!("connection reset");
                Ok(())
            }
            ServerMessage::Failure { code, message } => {
                self.broken = true;
                Err(self.failure(code, message))
            }
            other => Err(self.unexpected(&other, "RESET")),
        }
    }

    /// Close the connection, telling the server goodbye first
    pub async fn close(mut self) -> Result<()> {
        self.state.transition(ConnectionState::Closed)?;
        let _ = self.send_message(&ClientMessage::Goodbye).await;
        self.transport.shutdown().await?;
        crate::metrics::counters::connections_closed();
        Ok(())
    }

    /// Send a client message
    async fn send_message(&mut self, msg: &ClientMessage) -> Result<()> {
        let buf = encode_message(msg)?;
        let write = async {
            self.transport.write_all(&buf).await?;
            self.transport.flush().await
        };
        if let Err(e) = write.await {
            self.broken = true;
            return Err(e);
        }
        tracing::trace!(message = msg.name(), bytes = buf.len(), "sent");
        Ok(())
    }

    /// Receive one server message
    async fn receive_message(&mut self) -> Result<ServerMessage> {
        loop {
            match decode_message(&mut self.read_buf) {
                Ok(Some((msg, consumed))) => {
                    self.read_buf.advance(consumed);
                    tracing::trace!(message = msg.name(), "received");
                    return Ok(msg);
                }
                Ok(None) => {}
                Err(e) => {
                    self.broken = true;
                    return Err(e);
                }
            }

            // Need more data
            let n = match self.transport.read_buf(&mut self.read_buf).await {
                Ok(n) => n,
                Err(e) => {
                    self.broken = true;
                    return Err(e);
                }
            };
            if n == 0 {
                self.broken = true;
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Record a server FAILURE: the connection needs RESET before reuse
    fn failure(&mut self, code: String, message: String) -> Error {
        tracing::debug!(%code, "server failure");
        let _ = self.state.transition(ConnectionState::Failed);
        Error::from_failure(code, message)
    }

    /// An unexpected reply leaves the session out of sync with the server
    fn unexpected(&mut self, msg: &ServerMessage, request: &str) -> Error {
        self.broken = true;
        Error::Protocol(format!(
            "unexpected {} in response to {request}",
            msg.name()
        ))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("connection_id", &self.connection_id)
            .field("broken", &self.broken)
            .finish()
    }
}

fn string_field(metadata: &HashMap<String, Value>, key: &str) -> Option<String> {
    metadata.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_list(metadata: &HashMap<String, Value>, key: &str) -> Vec<String> {
    match metadata.get(key) {
        Some(Value::List(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_defaults() {
        let connector = Connector::new("localhost", 7687);

        assert_eq!(connector.host, "localhost");
        assert_eq!(connector.port, 7687);
        assert_eq!(connector.encryption, Encryption::Disabled);
        assert!(connector.tls.is_none());
        assert_eq!(connector.connect_timeout, Duration::from_secs(30));
        assert!(connector.user_agent.starts_with("graphwire/"));
    }

    #[test]
    fn test_connector_fluent() {
        let connector = Connector::new("graph.example.com", 9999)
            .auth(AuthToken::basic("ada", "secret"))
            .user_agent("app/1.0")
            .connect_timeout(Duration::from_secs(5));

        assert_eq!(connector.user_agent, "app/1.0");
        assert_eq!(connector.connect_timeout, Duration::from_secs(5));
        assert!(matches!(connector.auth, AuthToken::Basic { .. }));
    }

    #[test]
    fn test_connector_encryption_compiles_tls() {
        let connector = Connector::new("localhost", 7687)
            .encryption(Encryption::TrustAny, None)
            .unwrap();

        assert_eq!(connector.encryption, Encryption::TrustAny);
        assert!(connector.tls.is_some());
    }

    #[test]
    fn test_metadata_field_helpers() {
        let mut metadata = HashMap::new();
        metadata.insert("server".to_string(), Value::from("graphdb/5.0"));
        metadata.insert(
            "fields".to_string(),
            Value::List(vec![Value::from("a"), Value::from("b")]),
        );

        assert_eq!(
            string_field(&metadata, "server"),
            Some("graphdb/5.0".to_string())
        );
        assert_eq!(string_field(&metadata, "missing"), None);
        assert_eq!(string_list(&metadata, "fields"), vec!["a", "b"]);
        assert!(string_list(&metadata, "missing").is_empty());
    }

    // Verify that connection futures are Send (compile-time check), so they
    // can cross task boundaries under the multi-threaded runtime.
    #[allow(dead_code)]
    fn _require_send_futures(conn: &mut Connection) {
        fn require_send<T: Send>(_t: T) {}
        require_send(conn.reset());
    }
}
