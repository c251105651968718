//! Connection lifecycle callbacks handed to the pool manager.
//!
//! `bb8` owns the pooled connections; this module tells it how to create one
//! (connect plus handshake), how to validate one on checkout, and when one must
//! be destroyed instead of reused. Destroying is dropping: [`Connection`] sends
//! `QUIT` from its `Drop` impl.

use async_trait::async_trait;
use log::{info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::BackendOptions;
use crate::connection::Connection;
use crate::error::Error;
use crate::stats::PoolStats;

/// Creates and checks connections for one backend address.
#[derive(Debug)]
pub struct ConnectionManager {
    addr: String,
    options: BackendOptions,
    next_id: AtomicU64,
    stats: Arc<PoolStats>,
    log: bool,
}

impl ConnectionManager {
    pub fn new(addr: String, options: BackendOptions, stats: Arc<PoolStats>, log: bool) -> Self {
        Self {
            addr,
            options,
            next_id: AtomicU64::new(1),
            stats,
            log,
        }
    }
}

#[async_trait]
impl bb8::ManageConnection for ConnectionManager {
    type Connection = Connection;
    type Error = Error;

    async fn connect(&self) -> Result<Connection, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = Connection::open(id, &self.addr, &self.options).await?;
        let tracked = TrackedClose::new(Arc::clone(&self.stats));
        self.stats.record_opened();
        if self.log {
            info!("Opened connection #{} to {}", id, self.addr);
        }
        Ok(conn.with_close_hook(tracked))
    }

    async fn is_valid(&self, conn: &mut Connection) -> Result<(), Error> {
        if !self.options.test_on_checkout {
            return Ok(());
        }
        conn.ping().await
    }

    fn has_broken(&self, conn: &mut Connection) -> bool {
        conn.is_broken()
    }
}

/// Counts a connection as closed once it is dropped by the pool.
#[derive(Debug)]
pub(crate) struct TrackedClose {
    stats: Arc<PoolStats>,
}

impl TrackedClose {
    fn new(stats: Arc<PoolStats>) -> Self {
        Self { stats }
    }
}

impl Drop for TrackedClose {
    fn drop(&mut self) {
        self.stats.record_closed();
    }
}

/// Logs connection errors that `bb8` hits in the background.
///
/// Factory failures while replenishing, or a failed checkout validation,
/// never reach a caller directly, so they are reported here.
#[derive(Debug, Clone)]
pub struct LogErrorSink {
    pool: String,
}

impl LogErrorSink {
    pub fn new(pool: String) -> Self {
        Self { pool }
    }
}

impl bb8::ErrorSink<Error> for LogErrorSink {
    fn sink(&self, error: Error) {
        warn!("{}: connection error: {}", self.pool, error);
    }

    fn boxed_clone(&self) -> Box<dyn bb8::ErrorSink<Error>> {
        Box::new(self.clone())
    }
}
