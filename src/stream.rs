//! Lazy result streams
//!
//! A [`ResultStream`] yields the records of one query. Records are pulled
//! from the server in batches of the configured fetch size, so results
//! larger than memory can be walked without buffering them all.
//!
//! The stream stays valid after its transaction commits: committing drains
//! open streams into client-side buffers first. Rolling back discards unread
//! records instead, and further `next` calls return what was already
//! buffered, then end.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::record::Record;
use crate::summary::ResultSummary;
use crate::transaction::TxInner;
use crate::{Error, Result};

/// A stream of records produced by one query
pub struct ResultStream {
    shared: Arc<Mutex<TxInner>>,
    qid: u64,
    keys: Arc<Vec<String>>,
}

impl ResultStream {
    pub(crate) fn new(shared: Arc<Mutex<TxInner>>, qid: u64, keys: Arc<Vec<String>>) -> Self {
        Self { shared, qid, keys }
    }

    /// Column names of this result, in order
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Next record, or `None` once the stream is exhausted.
    ///
    /// Pulls another batch from the server when the buffer runs dry and the
    /// stream is still live.
    pub async fn next(&mut self) -> Result<Option<Record>> {
        loop {
            let mut inner = self.shared.lock().await;

            if let Some(stream) = inner.streams.get_mut(&self.qid) {
                if let Some(record) = stream.buffered.pop_front() {
                    return Ok(Some(record));
                }
                if stream.finished {
                    return Ok(None);
                }
            } else {
                return Err(Error::Protocol("result stream state missing".into()));
            }

            // Buffer is dry and the server still holds records
            inner.ensure_active("read more records")?;
            inner.pull_batch(self.qid).await?;
        }
    }

    /// Collect every remaining record into a vector
    pub async fn collect(&mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Throw away the remaining records and return the summary.
    ///
    /// Unread records buffered client side are dropped; records still on the
    /// server are discarded there without crossing the wire.
    pub async fn consume(&mut self) -> Result<ResultSummary> {
        let mut inner = self.shared.lock().await;

        let live = inner.live_qid == Some(self.qid);
        if live {
            inner.ensure_active("consume the result")?;
            inner.discard_live().await?;
        }

        let stream = inner
            .streams
            .get_mut(&self.qid)
            .ok_or_else(|| Error::Protocol("result stream state missing".into()))?;
        stream.buffered.clear();

        match &stream.summary {
            Some(summary) => Ok(summary.clone()),
            None => Err(Error::TransactionClosed(
                "transaction ended before the result summary arrived".into(),
            )),
        }
    }

    /// The summary for a fully consumed result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResultNotConsumed`] while records remain. Use
    /// [`consume`] to skip them, or drain the stream with [`next`].
    ///
    /// [`consume`]: ResultStream::consume
    /// [`next`]: ResultStream::next
    pub async fn summary(&self) -> Result<ResultSummary> {
        let inner = self.shared.lock().await;

        let stream = inner
            .streams
            .get(&self.qid)
            .ok_or_else(|| Error::Protocol("result stream state missing".into()))?;

        if !stream.finished || !stream.buffered.is_empty() {
            return Err(Error::ResultNotConsumed(
                "records remain in the stream: drain it or call consume() first".into(),
            ));
        }

        match &stream.summary {
            Some(summary) => Ok(summary.clone()),
            None => Err(Error::TransactionClosed(
                "transaction ended before the result summary arrived".into(),
            )),
        }
    }

    /// Adapt into a `futures::Stream` of records
    pub fn into_stream(self) -> impl futures::Stream<Item = Result<Record>> {
        futures::stream::try_unfold(self, |mut stream| async move {
            let item = stream.next().await?;
            Ok(item.map(|record| (record, stream)))
        })
    }
}

impl std::fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream")
            .field("qid", &self.qid)
            .field("keys", &self.keys)
            .finish()
    }
}
