//! Connection pooling
//!
//! The pool owns every connection the driver creates. A semaphore bounds the
//! number of connections that can exist at once; idle connections are parked
//! in a LIFO stack so the most recently used (and most likely still warm)
//! connection is handed out first.
//!
//! Acquisition waits for a free slot up to the configured timeout. Closing
//! the pool wakes every waiter with a cancellation error and refuses any
//! later acquisition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, OwnedSemaphorePermit, Semaphore};

use crate::connection::{Connection, Connector};
use crate::{Error, Result};

/// Bounded connection pool
pub struct Pool {
    connector: Connector,
    acquisition_timeout: Duration,
    idle: Mutex<Vec<Connection>>,
    semaphore: Arc<Semaphore>,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
}

impl Pool {
    /// Create a pool that will open at most `max_size` connections
    pub fn new(connector: Connector, max_size: usize, acquisition_timeout: Duration) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            connector,
            acquisition_timeout,
            idle: Mutex::new(Vec::new()),
            semaphore: Arc::new(Semaphore::new(max_size)),
            closed: AtomicBool::new(false),
            close_tx,
        }
    }

    /// Whether the pool has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of connections currently parked idle
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// Acquire a connection, reusing an idle one when possible.
    ///
    /// Waits up to the acquisition timeout for a free slot. Every connection
    /// handed out holds a semaphore permit, so the pool can never exceed its
    /// configured size.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.is_closed() {
            return Err(Error::DriverClosed);
        }

        let start = std::time::Instant::now();
        let acquire = self.semaphore.clone().acquire_owned();
        let permit = match tokio::time::timeout(self.acquisition_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                // Semaphore closed while we were waiting
                return Err(Error::Cancelled(
                    "driver closed while waiting for a connection".into(),
                ));
            }
            Err(_) => {
                crate::metrics::counters::pool_exhausted();
                return Err(Error::PoolExhausted(self.acquisition_timeout));
            }
        };

        // The permit can also arrive just as the pool closes
        if self.is_closed() {
            return Err(Error::DriverClosed);
        }

        let reused = {
            let mut idle = self.idle.lock().await;
            let conn = idle.pop();
            crate::metrics::gauges::pool_idle(idle.len());
            conn
        };

        let conn = match reused {
            Some(conn) => {
                crate::metrics::counters::pool_acquired(crate::metrics::labels::SOURCE_IDLE);
                conn
            }
            None => {
                // Dropping the permit on a dial failure frees the slot
                let conn = self.connector.open().await?;
                crate::metrics::counters::pool_acquired(crate::metrics::labels::SOURCE_DIAL);
                conn
            }
        };

        crate::metrics::histograms::acquire_duration(start.elapsed().as_millis() as u64);
        Ok(PooledConnection {
            conn: Some(conn),
            permit: Some(permit),
            pool: Arc::clone(self),
        })
    }

    /// Return a connection to the idle stack, or dispose of it.
    ///
    /// Broken connections are dropped. Connections still carrying transaction
    /// state get a RESET first and are dropped if that fails.
    async fn park(&self, mut conn: Connection) {
        if self.is_closed() {
            let _ = conn.close().await;
            return;
        }

        if conn.is_broken() {
            crate::metrics::counters::connections_broken();
            tracing::debug!("dropping broken connection");
            return;
        }

        if !conn.is_ready() {
            if let Err(e) = conn.reset().await {
                crate::metrics::counters::connections_broken();
                tracing::debug!(error = %e, "dropping connection that failed to reset");
                return;
            }
        }

        let mut idle = self.idle.lock().await;
        idle.push(conn);
        crate::metrics::gauges::pool_idle(idle.len());
    }

    /// Close the pool: refuse new acquisitions, wake waiters with a
    /// cancellation error, and say goodbye to every idle connection.
    ///
    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.semaphore.close();
        let _ = self.close_tx.send(true);

        let drained: Vec<Connection> = {
            let mut idle = self.idle.lock().await;
            crate::metrics::gauges::pool_idle(0);
            idle.drain(..).collect()
        };
        for conn in drained {
            let _ = conn.close().await;
        }
        tracing::debug!("pool closed");
    }

    /// Wait until the pool is closed
    pub async fn wait_closed(&self) {
        let mut rx = self.close_tx.subscribe();
        if *rx.borrow() {
            return;
        }
        // Sender lives as long as the pool, but a lost sender also means done
        let _ = rx.changed().await;
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("host", &self.connector.host)
            .field("port", &self.connector.port)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A connection leased from the pool.
///
/// Dereferences to [`Connection`]. Prefer [`release`] so the connection goes
/// back to the pool promptly; dropping without release spawns a background
/// task to do the same.
///
/// [`release`]: PooledConnection::release
pub struct PooledConnection {
    conn: Option<Connection>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<Pool>,
}

impl PooledConnection {
    /// Return the connection to the pool.
    ///
    /// The connection is parked before the pool slot frees up, so a waiter
    /// that wakes for the slot will find it in the idle stack.
    pub async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.park(conn).await;
        }
        drop(self.permit.take());
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection taken")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let permit = self.permit.take();
            let pool = Arc::clone(&self.pool);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    pool.park(conn).await;
                    drop(permit);
                });
            }
            // Without a runtime the connection just drops
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool(max_size: usize, timeout: Duration) -> Arc<Pool> {
        // Port 9 (discard) is never running a graph server
        let connector = Connector::new("localhost", 9);
        Arc::new(Pool::new(connector, max_size, timeout))
    }

    #[tokio::test]
    async fn test_acquire_after_close_is_driver_closed() {
        let pool = test_pool(1, Duration::from_millis(100));
        pool.close().await;

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::DriverClosed));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let pool = test_pool(1, Duration::from_millis(100));
        pool.close().await;
        pool.close().await;
        assert!(pool.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_when_no_slot_frees() {
        let pool = test_pool(1, Duration::from_millis(50));

        // Hold the only slot so the next acquire can only wait
        let _permit = pool.semaphore.clone().acquire_owned().await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::PoolExhausted(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_waiters() {
        let pool = test_pool(1, Duration::from_secs(60));
        let _permit = pool.semaphore.clone().acquire_owned().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await })
        };

        // Let the waiter enqueue on the semaphore before closing
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.close().await;

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_wait_closed_wakes_on_close() {
        let pool = test_pool(1, Duration::from_millis(100));

        let watcher = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.wait_closed().await;
                true
            })
        };

        pool.close().await;
        assert!(watcher.await.unwrap());
    }

    #[tokio::test]
    async fn test_dial_failure_frees_the_slot() {
        // Connecting to localhost:9 fails, but the slot must come back so
        // the next attempt is a fresh dial error, not an exhausted pool
        let pool = test_pool(1, Duration::from_millis(200));

        let first = pool.acquire().await.unwrap_err();
        assert!(matches!(first, Error::Connection(_)));

        let second = pool.acquire().await.unwrap_err();
        assert!(matches!(second, Error::Connection(_)));
    }
}
