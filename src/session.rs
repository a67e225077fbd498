//! Sessions: the unit of causal consistency
//!
//! A [`Session`] borrows a connection from the pool for each transaction and
//! returns it when the transaction finishes. Bookmarks chain those
//! transactions together: every successful commit advances the session's
//! bookmark, and every later transaction presents it so the server can wait
//! until that state is visible.
//!
//! [`read_transaction`] and [`write_transaction`] run a transaction function
//! with automatic retry: transient failures roll the work back, wait with
//! jittered exponential backoff, and try again on a fresh connection until
//! the driver's retry time budget runs out.
//!
//! [`read_transaction`]: Session::read_transaction
//! [`write_transaction`]: Session::write_transaction

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;

use crate::driver::DriverConfig;
use crate::pool::Pool;
use crate::query::Query;
use crate::stream::ResultStream;
use crate::transaction::Transaction;
use crate::{Error, Result};

/// First backoff delay for transaction function retries
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Routing hint sent with BEGIN.
///
/// Against a single server both modes behave the same; a cluster would send
/// reads to followers and writes to the leader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-only work
    Read,
    /// Read-write work
    #[default]
    Write,
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// A causal consistency token minted by a successful commit.
///
/// Opaque to clients. Pass bookmarks between sessions to make one session's
/// writes visible to another's reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bookmark(String);

impl Bookmark {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Bookmark {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Bookmark {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl std::fmt::Display for Bookmark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bookmark storage shared between a session and its transactions
pub(crate) type BookmarkHolder = Arc<std::sync::Mutex<Vec<String>>>;

/// Session configuration
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Database to run against (None = driver default)
    pub database: Option<String>,
    /// Access mode for plain `begin_transaction` and `run`
    pub default_access_mode: AccessMode,
    /// Bookmarks the first transaction must wait for
    pub bookmarks: Vec<Bookmark>,
    /// Records pulled per batch (None = driver default)
    pub fetch_size: Option<i64>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database this session runs against
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the access mode used by `begin_transaction` and `run`
    pub fn default_access_mode(mut self, mode: AccessMode) -> Self {
        self.default_access_mode = mode;
        self
    }

    /// Seed the session with bookmarks from elsewhere
    pub fn bookmarks(mut self, bookmarks: impl IntoIterator<Item = Bookmark>) -> Self {
        self.bookmarks = bookmarks.into_iter().collect();
        self
    }

    /// Set how many records each PULL requests
    pub fn fetch_size(mut self, fetch_size: i64) -> Self {
        self.fetch_size = Some(fetch_size);
        self
    }
}

/// A client-side unit of work against one database.
///
/// Sessions are cheap: they hold no connection between transactions. They
/// are not meant to be shared across tasks; open one per logical flow.
#[derive(Debug)]
pub struct Session {
    pool: Arc<Pool>,
    database: String,
    default_access_mode: AccessMode,
    fetch_size: i64,
    max_retry_time: Duration,
    bookmarks: BookmarkHolder,
    closed: bool,
}

impl Session {
    pub(crate) fn new(
        pool: Arc<Pool>,
        driver_config: Arc<DriverConfig>,
        config: SessionConfig,
    ) -> Self {
        let database = config
            .database
            .unwrap_or_else(|| driver_config.default_database.clone());
        let fetch_size = config.fetch_size.unwrap_or(driver_config.fetch_size);
        let bookmarks = config.bookmarks.into_iter().map(|b| b.0).collect();

        Self {
            pool,
            database,
            default_access_mode: config.default_access_mode,
            fetch_size,
            max_retry_time: driver_config.max_transaction_retry_time,
            bookmarks: Arc::new(std::sync::Mutex::new(bookmarks)),
            closed: false,
        }
    }

    /// The bookmark of the most recent successful commit, if any
    pub fn last_bookmark(&self) -> Option<Bookmark> {
        self.bookmarks
            .lock()
            .expect("bookmark mutex poisoned")
            .last()
            .map(|token| Bookmark::new(token.clone()))
    }

    /// Begin an explicit transaction in the session's access mode.
    ///
    /// The transaction holds a pooled connection until it commits, rolls
    /// back, or is dropped.
    pub async fn begin_transaction(&mut self) -> Result<Transaction> {
        self.begin_with_mode(self.default_access_mode).await
    }

    /// Run a single query in its own transaction and commit it.
    ///
    /// The returned stream is fully buffered client side, so it can be read
    /// after the connection has gone back to the pool.
    pub async fn run(&mut self, query: impl Into<Query>) -> Result<ResultStream> {
        let mut tx = self.begin_transaction().await?;
        let stream = match tx.run(query).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(e);
            }
        };
        tx.commit().await?;
        Ok(stream)
    }

    /// Run a transaction function in read mode with automatic retry
    pub async fn read_transaction<T, F>(&mut self, work: F) -> Result<T>
    where
        F: for<'tx> FnMut(&'tx mut Transaction) -> BoxFuture<'tx, Result<T>>,
    {
        self.transaction_with_retry(AccessMode::Read, work).await
    }

    /// Run a transaction function in write mode with automatic retry.
    ///
    /// The function may run several times, so it must not carry side effects
    /// beyond the transaction itself. A commit interrupted by connection
    /// loss is never retried: the server may have applied it.
    pub async fn write_transaction<T, F>(&mut self, work: F) -> Result<T>
    where
        F: for<'tx> FnMut(&'tx mut Transaction) -> BoxFuture<'tx, Result<T>>,
    {
        self.transaction_with_retry(AccessMode::Write, work).await
    }

    /// Close the session. Idempotent; later operations fail.
    pub async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    async fn begin_with_mode(&mut self, mode: AccessMode) -> Result<Transaction> {
        self.ensure_open()?;

        let mut conn = self.pool.acquire().await?;
        let bookmarks: Vec<String> = self
            .bookmarks
            .lock()
            .expect("bookmark mutex poisoned")
            .clone();

        if let Err(e) = conn.begin(&self.database, mode, &bookmarks).await {
            conn.release().await;
            return Err(e);
        }
        tracing::debug!(%mode, bookmarks = bookmarks.len(), "transaction begun");

        Ok(Transaction::new(
            conn,
            self.fetch_size,
            Arc::clone(&self.bookmarks),
        ))
    }

    async fn transaction_with_retry<T, F>(&mut self, mode: AccessMode, mut work: F) -> Result<T>
    where
        F: for<'tx> FnMut(&'tx mut Transaction) -> BoxFuture<'tx, Result<T>>,
    {
        self.ensure_open()?;

        let started = Instant::now();
        let mut delay = INITIAL_RETRY_DELAY;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let error = match self.attempt_transaction(mode, &mut work).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "transaction function succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Retryable(e)) => e,
            };

            // Check the budget before sleeping, not after: a sleep that would
            // overrun it is pointless
            let backoff = jittered(delay);
            if started.elapsed() + backoff >= self.max_retry_time {
                tracing::debug!(attempt, "retry time budget exhausted");
                return Err(error);
            }

            tracing::warn!(
                attempt,
                delay_ms = backoff.as_millis() as u64,
                error = %error,
                "transient failure, retrying transaction function"
            );
            crate::metrics::counters::retries_attempted();
            crate::metrics::histograms::retry_backoff(backoff.as_millis() as u64);

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.pool.wait_closed() => {
                    return Err(Error::Cancelled(
                        "driver closed during retry backoff".into(),
                    ));
                }
            }
            delay *= 2;
        }
    }

    /// One attempt: begin, run the function, commit; roll back on failure
    async fn attempt_transaction<T, F>(
        &mut self,
        mode: AccessMode,
        work: &mut F,
    ) -> std::result::Result<T, Attempt>
    where
        F: for<'tx> FnMut(&'tx mut Transaction) -> BoxFuture<'tx, Result<T>>,
    {
        let mut tx = match self.begin_with_mode(mode).await {
            Ok(tx) => tx,
            Err(e) => return Err(classify(e)),
        };

        match work(&mut tx).await {
            Ok(value) => match tx.commit().await {
                Ok(()) => Ok(value),
                Err(e) if connection_lost(&e) => {
                    // The server may have applied this commit; retrying could
                    // run the work twice
                    Err(Attempt::Fatal(Error::Connection(format!(
                        "connection lost during commit, outcome unknown: {e}"
                    ))))
                }
                Err(e) => Err(classify(e)),
            },
            Err(e) => {
                let _ = tx.rollback().await;
                Err(classify(e))
            }
        }
    }
}

/// Outcome of one transaction function attempt
enum Attempt {
    Retryable(Error),
    Fatal(Error),
}

fn classify(e: Error) -> Attempt {
    if e.is_retryable() {
        Attempt::Retryable(e)
    } else {
        Attempt::Fatal(e)
    }
}

fn connection_lost(e: &Error) -> bool {
    matches!(
        e,
        Error::Connection(_) | Error::ConnectionClosed | Error::Io(_)
    )
}

/// Apply +/-20% jitter so retrying clients spread out
fn jittered(delay: Duration) -> Duration {
    use rand::Rng;
    let factor = rand::thread_rng().gen_range(0.8..=1.2);
    delay.mul_f64(factor)
}
