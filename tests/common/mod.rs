//! In-process stub server for driver tests.
//!
//! Speaks just enough of the wire protocol to exercise the client: version
//! handshake, HELLO authentication, transactions, streaming with `has_more`
//! paging, bookmarks, and failure injection. Understands a fixed set of
//! query shapes; anything else fails with a syntax error so a typo in a test
//! shows up loudly.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use graphwire::protocol::{
    decode_client_message, encode_server_message, ClientMessage, ServerMessage, HANDSHAKE_MAGIC,
    PROTOCOL_VERSION,
};
use graphwire::Value;

pub const TRANSIENT_CODE: &str = "Graph.TransientError.General.TemporarilyUnavailable";

/// Stub behavior fixed at startup
#[derive(Default, Clone)]
pub struct Options {
    /// Require these exact basic credentials in HELLO
    pub require_auth: Option<(String, String)>,
    /// Version to answer the handshake with (default: the supported one)
    pub handshake_version: Option<u32>,
}

/// Counters and injection knobs shared with the test body
pub struct ServerState {
    options: Options,
    /// Monotonic commit counter; bookmarks are `gws:{seq}`
    commit_seq: AtomicUsize,
    /// Committed key/value pairs, shared by all connections
    store: Mutex<HashMap<String, Value>>,
    pub begin_count: AtomicUsize,
    pub run_count: AtomicUsize,
    pub pull_count: AtomicUsize,
    pub connections_served: AtomicUsize,
    /// Bookmarks presented in the most recent BEGIN
    pub last_begin_bookmarks: Mutex<Vec<String>>,
    /// Access mode presented in the most recent BEGIN
    pub last_begin_mode: Mutex<Option<graphwire::AccessMode>>,
    /// Fail this many upcoming BEGINs with a transient error
    pub fail_next_begins: AtomicUsize,
    /// Fail this many upcoming RUNs with a transient error
    pub fail_next_runs: AtomicUsize,
    /// Fail this many upcoming COMMITs with a transient error
    pub fail_next_commits: AtomicUsize,
    /// Drop the connection on the next COMMIT without answering
    pub drop_on_commit: AtomicBool,
}

impl ServerState {
    fn new(options: Options) -> Self {
        Self {
            options,
            commit_seq: AtomicUsize::new(0),
            store: Mutex::new(HashMap::new()),
            begin_count: AtomicUsize::new(0),
            run_count: AtomicUsize::new(0),
            pull_count: AtomicUsize::new(0),
            connections_served: AtomicUsize::new(0),
            last_begin_bookmarks: Mutex::new(Vec::new()),
            last_begin_mode: Mutex::new(None),
            fail_next_begins: AtomicUsize::new(0),
            fail_next_runs: AtomicUsize::new(0),
            fail_next_commits: AtomicUsize::new(0),
            drop_on_commit: AtomicBool::new(false),
        }
    }

    fn take_injected(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// A listening stub server; lives until the test process exits
pub struct StubServer {
    addr: SocketAddr,
    pub state: Arc<ServerState>,
}

impl StubServer {
    pub async fn start() -> Self {
        Self::start_with(Options::default()).await
    }

    pub async fn start_with(options: Options) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        let state = Arc::new(ServerState::new(options));

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let n = accept_state
                    .connections_served
                    .fetch_add(1, Ordering::SeqCst);
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let _ = serve_connection(socket, state, format!("stub-{n}")).await;
                });
            }
        });

        Self { addr, state }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connection URI with credentials the default stub accepts
    pub fn uri(&self) -> String {
        format!("graphwire://ada:secret@{}", self.addr)
    }
}

/// Per-connection protocol state
#[derive(Default)]
struct ConnSession {
    failed: bool,
    /// Records waiting to be PULLed
    rows: VecDeque<Vec<Value>>,
    /// Metadata for the SUCCESS that ends the current stream
    stream_meta: HashMap<String, Value>,
    /// FAILURE to deliver on the next PULL instead of records
    fail_on_pull: Option<(&'static str, &'static str)>,
    /// Writes applied to the store at COMMIT
    pending_writes: Vec<(String, Value)>,
}

async fn serve_connection(
    mut socket: TcpStream,
    state: Arc<ServerState>,
    conn_id: String,
) -> std::io::Result<()> {
    // Version negotiation
    let mut handshake = [0u8; 20];
    socket.read_exact(&mut handshake).await?;
    if handshake[..4] != HANDSHAKE_MAGIC {
        return Ok(());
    }
    let version = state.options.handshake_version.unwrap_or(PROTOCOL_VERSION);
    socket.write_all(&version.to_be_bytes()).await?;
    if version != PROTOCOL_VERSION {
        return Ok(());
    }

    let mut buf = BytesMut::with_capacity(8192);
    let mut session = ConnSession::default();

    loop {
        let Some(msg) = read_client_message(&mut socket, &mut buf).await? else {
            return Ok(());
        };

        if matches!(msg, ClientMessage::Goodbye) {
            return Ok(());
        }
        if session.failed && !matches!(msg, ClientMessage::Reset) {
            send(&mut socket, &ServerMessage::Ignored).await?;
            continue;
        }

        match msg {
            ClientMessage::Hello {
                principal,
                credentials,
                ..
            } => {
                if let Some((user, password)) = &state.options.require_auth {
                    if &principal != user || &credentials != password {
                        send(
                            &mut socket,
                            &failure(
                                "Graph.ClientError.Security.Unauthorized",
                                "invalid credentials",
                            ),
                        )
                        .await?;
                        return Ok(());
                    }
                }
                let metadata = meta(&[
                    ("server", Value::from("graphstub/0.1")),
                    ("connection_id", Value::from(conn_id.as_str())),
                ]);
                send(&mut socket, &ServerMessage::Success { metadata }).await?;
            }

            ClientMessage::Begin {
                bookmarks, mode, ..
            } => {
                state.begin_count.fetch_add(1, Ordering::SeqCst);
                *state.last_begin_bookmarks.lock().expect("lock") = bookmarks;
                *state.last_begin_mode.lock().expect("lock") = Some(mode);

                if ServerState::take_injected(&state.fail_next_begins) {
                    session.failed = true;
                    send(&mut socket, &failure(TRANSIENT_CODE, "server busy")).await?;
                    continue;
                }
                send(&mut socket, &success_empty()).await?;
            }

            ClientMessage::Run { query, parameters } => {
                state.run_count.fetch_add(1, Ordering::SeqCst);

                if ServerState::take_injected(&state.fail_next_runs) {
                    session.failed = true;
                    send(&mut socket, &failure(TRANSIENT_CODE, "server busy")).await?;
                    continue;
                }

                match plan_query(&query, &parameters, &state, &conn_id, &mut session) {
                    Plan::Stream { fields, rows, meta } => {
                        session.rows = rows.into();
                        session.stream_meta = meta;
                        session.fail_on_pull = None;
                        let metadata = run_metadata(&fields);
                        send(&mut socket, &ServerMessage::Success { metadata }).await?;
                    }
                    Plan::FailOnPull {
                        fields,
                        code,
                        message,
                    } => {
                        session.rows.clear();
                        session.stream_meta = HashMap::new();
                        session.fail_on_pull = Some((code, message));
                        let metadata = run_metadata(&fields);
                        send(&mut socket, &ServerMessage::Success { metadata }).await?;
                    }
                    Plan::FailRun { code, message } => {
                        session.failed = true;
                        send(&mut socket, &failure(code, message)).await?;
                    }
                }
            }

            ClientMessage::Pull { n } => {
                state.pull_count.fetch_add(1, Ordering::SeqCst);

                if let Some((code, message)) = session.fail_on_pull.take() {
                    session.failed = true;
                    send(&mut socket, &failure(code, message)).await?;
                    continue;
                }

                let batch = if n < 0 {
                    session.rows.len()
                } else {
                    (n as usize).min(session.rows.len())
                };
                for _ in 0..batch {
                    let values = session.rows.pop_front().expect("row");
                    send(&mut socket, &ServerMessage::Record { values }).await?;
                }

                let metadata = if session.rows.is_empty() {
                    std::mem::take(&mut session.stream_meta)
                } else {
                    meta(&[("has_more", Value::Bool(true))])
                };
                send(&mut socket, &ServerMessage::Success { metadata }).await?;
            }

            ClientMessage::Discard { .. } => {
                session.rows.clear();
                session.fail_on_pull = None;
                let metadata = std::mem::take(&mut session.stream_meta);
                send(&mut socket, &ServerMessage::Success { metadata }).await?;
            }

            ClientMessage::Commit => {
                if state.drop_on_commit.swap(false, Ordering::SeqCst) {
                    return Ok(());
                }
                if ServerState::take_injected(&state.fail_next_commits) {
                    session.failed = true;
                    send(&mut socket, &failure(TRANSIENT_CODE, "commit contention")).await?;
                    continue;
                }

                {
                    let mut store = state.store.lock().expect("lock");
                    for (key, value) in session.pending_writes.drain(..) {
                        store.insert(key, value);
                    }
                }
                let seq = state.commit_seq.fetch_add(1, Ordering::SeqCst) + 1;
                let metadata = meta(&[("bookmark", Value::from(format!("gws:{seq}")))]);
                send(&mut socket, &ServerMessage::Success { metadata }).await?;
            }

            ClientMessage::Rollback => {
                session.pending_writes.clear();
                session.rows.clear();
                session.fail_on_pull = None;
                send(&mut socket, &success_empty()).await?;
            }

            ClientMessage::Reset => {
                session.failed = false;
                session.rows.clear();
                session.fail_on_pull = None;
                session.pending_writes.clear();
                send(&mut socket, &success_empty()).await?;
            }

            // Handled before the failure check
            ClientMessage::Goodbye => unreachable!(),
        }
    }
}

/// How the stub answers one RUN
enum Plan {
    Stream {
        fields: Vec<&'static str>,
        rows: Vec<Vec<Value>>,
        meta: HashMap<String, Value>,
    },
    FailOnPull {
        fields: Vec<&'static str>,
        code: &'static str,
        message: &'static str,
    },
    FailRun {
        code: &'static str,
        message: &'static str,
    },
}

fn plan_query(
    query: &str,
    params: &HashMap<String, Value>,
    state: &ServerState,
    conn_id: &str,
    session: &mut ConnSession,
) -> Plan {
    let int_param = |name: &str| params.get(name).and_then(Value::as_int);

    match query {
        "UNWIND range($from, $to) AS n RETURN n" => {
            let (Some(from), Some(to)) = (int_param("from"), int_param("to")) else {
                return Plan::FailRun {
                    code: "Graph.ClientError.Statement.ParameterMissing",
                    message: "expected integer parameters `from` and `to`",
                };
            };
            Plan::Stream {
                fields: vec!["n"],
                rows: (from..=to).map(|i| vec![Value::Integer(i)]).collect(),
                meta: read_meta(),
            }
        }

        "RETURN $x AS x" => match params.get("x") {
            Some(x) => Plan::Stream {
                fields: vec!["x"],
                rows: vec![vec![x.clone()]],
                meta: read_meta(),
            },
            None => Plan::FailRun {
                code: "Graph.ClientError.Statement.ParameterMissing",
                message: "expected parameter `x`",
            },
        },

        "RETURN 1 AS one" => Plan::Stream {
            fields: vec!["one"],
            rows: vec![vec![Value::Integer(1)]],
            meta: read_meta(),
        },

        "RETURN connectionId() AS id" => Plan::Stream {
            fields: vec!["id"],
            rows: vec![vec![Value::from(conn_id)]],
            meta: read_meta(),
        },

        "CREATE (n {key: $key, value: $value})" => {
            let (Some(Value::String(key)), Some(value)) =
                (params.get("key"), params.get("value"))
            else {
                return Plan::FailRun {
                    code: "Graph.ClientError.Statement.ParameterMissing",
                    message: "expected parameters `key` and `value`",
                };
            };
            session.pending_writes.push((key.clone(), value.clone()));
            Plan::Stream {
                fields: vec![],
                rows: vec![],
                meta: write_meta(),
            }
        }

        "MATCH (n {key: $key}) RETURN n.value AS value" => {
            let Some(Value::String(key)) = params.get("key") else {
                return Plan::FailRun {
                    code: "Graph.ClientError.Statement.ParameterMissing",
                    message: "expected parameter `key`",
                };
            };
            let rows = match state.store.lock().expect("lock").get(key) {
                Some(value) => vec![vec![value.clone()]],
                None => vec![],
            };
            Plan::Stream {
                fields: vec!["value"],
                rows,
                meta: read_meta(),
            }
        }

        "RETURN 10/0 AS boom" => Plan::FailOnPull {
            fields: vec!["boom"],
            code: "Graph.ClientError.Statement.ArithmeticError",
            message: "/ by zero",
        },

        _ => Plan::FailRun {
            code: "Graph.ClientError.Statement.SyntaxError",
            message: "unrecognized query",
        },
    }
}

fn run_metadata(fields: &[&str]) -> HashMap<String, Value> {
    meta(&[(
        "fields",
        Value::List(fields.iter().map(|f| Value::from(*f)).collect()),
    )])
}

fn read_meta() -> HashMap<String, Value> {
    meta(&[
        ("type", Value::from("r")),
        ("db", Value::from("stub")),
        ("t_first", Value::Integer(1)),
        ("t_last", Value::Integer(2)),
    ])
}

fn write_meta() -> HashMap<String, Value> {
    let stats = meta(&[
        ("nodes-created", Value::Integer(1)),
        ("properties-set", Value::Integer(2)),
    ]);
    meta(&[
        ("type", Value::from("w")),
        ("db", Value::from("stub")),
        ("stats", Value::Map(stats)),
    ])
}

fn meta(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn success_empty() -> ServerMessage {
    ServerMessage::Success {
        metadata: HashMap::new(),
    }
}

fn failure(code: &str, message: &str) -> ServerMessage {
    ServerMessage::Failure {
        code: code.to_string(),
        message: message.to_string(),
    }
}

async fn send(socket: &mut TcpStream, msg: &ServerMessage) -> std::io::Result<()> {
    let frame = encode_server_message(msg).expect("encode server message");
    socket.write_all(&frame).await
}

async fn read_client_message(
    socket: &mut TcpStream,
    buf: &mut BytesMut,
) -> std::io::Result<Option<ClientMessage>> {
    loop {
        match decode_client_message(buf) {
            Ok(Some((msg, consumed))) => {
                buf.advance(consumed);
                return Ok(Some(msg));
            }
            Ok(None) => {}
            Err(_) => return Ok(None),
        }
        if socket.read_buf(buf).await? == 0 {
            return Ok(None);
        }
    }
}
