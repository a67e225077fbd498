//! Explicit transactions
//!
//! A [`Transaction`] owns a pooled connection for its whole lifetime. Queries
//! run inside it return [`ResultStream`]s that read lazily from the server;
//! the transaction and its streams share state behind an async mutex, so a
//! stream can keep pulling records after the `run` call returns.
//!
//! Only one query per connection can be streaming at a time. Running a new
//! query (or committing) first drains the open stream into its buffer, so
//! earlier streams stay readable. Rolling back discards unread records
//! instead.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::pool::PooledConnection;
use crate::query::Query;
use crate::record::Record;
use crate::session::BookmarkHolder;
use crate::stream::ResultStream;
use crate::summary::ResultSummary;
use crate::{Error, Result};

/// Transaction lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxState {
    /// Open and accepting queries
    Active,
    /// Finished with COMMIT
    Committed,
    /// Finished with ROLLBACK
    RolledBack,
    /// A failure ended the transaction; only rollback remains
    Failed,
}

/// Buffered state for one query's results
pub(crate) struct StreamState {
    pub keys: Arc<Vec<String>>,
    pub buffered: VecDeque<Record>,
    pub summary: Option<ResultSummary>,
    /// No more records will arrive from the server for this query
    pub finished: bool,
}

/// State shared between a transaction and its result streams
pub(crate) struct TxInner {
    pub conn: Option<PooledConnection>,
    pub state: TxState,
    pub streams: HashMap<u64, StreamState>,
    /// Query whose records are still on the server, if any
    pub live_qid: Option<u64>,
    pub next_qid: u64,
    pub fetch_size: i64,
    pub bookmarks: BookmarkHolder,
}

impl TxInner {
    pub(crate) fn ensure_active(&self, action: &str) -> Result<()> {
        match self.state {
            TxState::Active => Ok(()),
            TxState::Committed => Err(Error::TransactionClosed(format!(
                "cannot {action}: transaction already committed"
            ))),
            TxState::RolledBack => Err(Error::TransactionClosed(format!(
                "cannot {action}: transaction already rolled back"
            ))),
            TxState::Failed => Err(Error::TransactionClosed(format!(
                "cannot {action}: transaction failed and can only be rolled back"
            ))),
        }
    }

    /// Pull one batch for `qid` into its buffer
    pub(crate) async fn pull_batch(&mut self, qid: u64) -> Result<()> {
        let fetch_size = self.fetch_size;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| Error::TransactionClosed("connection already released".into()))?;

        let (rows, final_metadata) = match conn.pull(fetch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                self.state = TxState::Failed;
                self.live_qid = None;
                if let Some(stream) = self.streams.get_mut(&qid) {
                    stream.finished = true;
                }
                return Err(e);
            }
        };

        let stream = self
            .streams
            .get_mut(&qid)
            .ok_or_else(|| Error::Protocol("pulled records for an unknown query".into()))?;
        let keys = Arc::clone(&stream.keys);
        for row in rows {
            stream.buffered.push_back(Record::new(Arc::clone(&keys), row)?);
        }

        if let Some(metadata) = final_metadata {
            stream.finished = true;
            stream.summary = Some(ResultSummary::from_metadata(&metadata));
            self.live_qid = None;
        }
        Ok(())
    }

    /// Drain the live stream fully into its buffer
    pub(crate) async fn buffer_live(&mut self) -> Result<()> {
        while let Some(qid) = self.live_qid {
            self.pull_batch(qid).await?;
        }
        Ok(())
    }

    /// Throw away the live stream's unread records
    pub(crate) async fn discard_live(&mut self) -> Result<()> {
        let Some(qid) = self.live_qid.take() else {
            return Ok(());
        };

        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| Error::TransactionClosed("connection already released".into()))?;

        match conn.discard().await {
            Ok(metadata) => {
                if let Some(stream) = self.streams.get_mut(&qid) {
                    stream.finished = true;
                    stream.summary = Some(ResultSummary::from_metadata(&metadata));
                }
                Ok(())
            }
            Err(e) => {
                self.state = TxState::Failed;
                if let Some(stream) = self.streams.get_mut(&qid) {
                    stream.finished = true;
                }
                Err(e)
            }
        }
    }

    /// Best-effort cleanup for an abandoned transaction
    pub(crate) async fn abandon(&mut self) {
        if self.state == TxState::Active {
            let _ = self.discard_live().await;
            if let Some(conn) = self.conn.as_mut() {
                if conn.state().in_transaction() {
                    let _ = conn.rollback().await;
                }
            }
            self.state = TxState::RolledBack;
        }
        if let Some(conn) = self.conn.take() {
            conn.release().await;
        }
    }
}

/// An explicit transaction.
///
/// Obtained from [`Session::begin_transaction`]. Ends with [`commit`] or
/// [`rollback`]; a transaction dropped without either is rolled back in the
/// background.
///
/// [`Session::begin_transaction`]: crate::session::Session::begin_transaction
/// [`commit`]: Transaction::commit
/// [`rollback`]: Transaction::rollback
pub struct Transaction {
    inner: Arc<Mutex<TxInner>>,
}

impl Transaction {
    pub(crate) fn new(
        conn: PooledConnection,
        fetch_size: i64,
        bookmarks: BookmarkHolder,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TxInner {
                conn: Some(conn),
                state: TxState::Active,
                streams: HashMap::new(),
                live_qid: None,
                next_qid: 0,
                fetch_size,
                bookmarks,
            })),
        }
    }

    /// Run a query inside this transaction.
    ///
    /// The returned stream reads records lazily. If another query of this
    /// transaction is still streaming, its remaining records are buffered
    /// client side first.
    pub async fn run(&mut self, query: impl Into<Query>) -> Result<ResultStream> {
        let query = query.into();
        let mut inner = self.inner.lock().await;
        inner.ensure_active("run a query")?;
        inner.buffer_live().await?;

        let (text, parameters) = query.into_parts();
        let conn = inner
            .conn
            .as_mut()
            .ok_or_else(|| Error::TransactionClosed("connection already released".into()))?;
        let keys = match conn.run(&text, &parameters).await {
            Ok(keys) => keys,
            Err(e) => {
                inner.state = TxState::Failed;
                return Err(e);
            }
        };

        let qid = inner.next_qid;
        inner.next_qid += 1;
        let keys = Arc::new(keys);
        inner.streams.insert(
            qid,
            StreamState {
                keys: Arc::clone(&keys),
                buffered: VecDeque::new(),
                summary: None,
                finished: false,
            },
        );
        inner.live_qid = Some(qid);

        Ok(ResultStream::new(Arc::clone(&self.inner), qid, keys))
    }

    /// Commit the transaction.
    ///
    /// Any open stream is drained into its buffer first, so records stay
    /// readable after the commit. On success the session's bookmark advances
    /// to the one the server minted.
    pub async fn commit(self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_active("commit")?;
        inner.buffer_live().await?;

        let conn = inner
            .conn
            .as_mut()
            .ok_or_else(|| Error::TransactionClosed("connection already released".into()))?;

        match conn.commit().await {
            Ok(bookmark) => {
                inner.state = TxState::Committed;
                if let Some(bookmark) = bookmark {
                    let mut held =
                        inner.bookmarks.lock().expect("bookmark mutex poisoned");
                    held.clear();
                    held.push(bookmark);
                }
                if let Some(conn) = inner.conn.take() {
                    conn.release().await;
                }
                Ok(())
            }
            Err(e) => {
                inner.state = TxState::Failed;
                if let Some(conn) = inner.conn.take() {
                    conn.release().await;
                }
                Err(e)
            }
        }
    }

    /// Roll back the transaction, discarding unread records server side
    pub async fn rollback(self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let result = match inner.state {
            TxState::Active => {
                match inner.discard_live().await {
                    Ok(()) => match inner.conn.as_mut() {
                        Some(conn) => conn.rollback().await,
                        None => Err(Error::TransactionClosed(
                            "connection already released".into(),
                        )),
                    },
                    Err(e) => Err(e),
                }
            }
            TxState::Failed => {
                // The server already dropped the transaction; RESET clears
                // the failure so the connection can be pooled again
                match inner.conn.as_mut() {
                    Some(conn) => conn.reset().await,
                    None => Ok(()),
                }
            }
            _ => inner.ensure_active("roll back"),
        };

        inner.state = TxState::RolledBack;
        if let Some(conn) = inner.conn.take() {
            conn.release().await;
        }
        result
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // Fast path: commit or rollback already ran
        if let Ok(inner) = self.inner.try_lock() {
            if inner.conn.is_none() {
                return;
            }
        }

        let inner = Arc::clone(&self.inner);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                inner.lock().await.abandon().await;
            });
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Transaction")
    }
}
