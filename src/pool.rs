//! # Pooled Command Dispatch
//!
//! [`KvPool`] is the facade callers talk to. It configures a `bb8` pool with the
//! connection callbacks from [`crate::manager`] and runs every command through
//! the same cycle:
//!
//! 1. validate and normalize the request (usage errors stop here),
//! 2. acquire a connection, waiting for a free one if the pool is at `max`,
//! 3. execute the command on the borrowed connection,
//! 4. release the connection,
//! 5. deliver the outcome to the caller (future or callback).
//!
//! Release always happens before the outcome is delivered, so a callback that
//! issues another command against the same pool can reuse the connection that
//! was just freed instead of waiting on itself.

use bb8::PooledConnection;
use log::{debug, info, warn};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::command::{Request, ToArgs};
use crate::config::PoolConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::manager::{ConnectionManager, LogErrorSink};
use crate::protocol::Reply;
use crate::stats::{PoolStats, PoolStatus, StatsSnapshot};

/// A bounded pool of connections to one backend, with command dispatch.
///
/// Cloning is cheap and every clone shares the same pool.
///
/// # Example
///
/// ```rust,no_run
/// use kv_pool::{KvPool, PoolConfig, Result};
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let pool = KvPool::new(PoolConfig::new("127.0.0.1", 6379))?;
///
///     pool.set(("foo", "bar")).await?;
///     let keys = pool.keys("*").await?.into_strings();
///     assert_eq!(keys, vec!["foo".to_string()]);
///
///     let reply = pool.send_command("hget", ["foo2", "bar"]).await?;
///     println!("{:?}", reply);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct KvPool {
    pool: bb8::Pool<ConnectionManager>,
    config: Arc<PoolConfig>,
    name: Arc<str>,
    stats: Arc<PoolStats>,
}

impl KvPool {
    /// Build a pool from `config`, applying defaults to zero or empty fields.
    ///
    /// No connection is opened here; the first command opens the first one.
    /// Must be called from within a Tokio runtime, since the idle reaper runs
    /// as a background task.
    pub fn new(config: PoolConfig) -> Result<Self> {
        let config = config.with_defaults();
        config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::config("a pool must be created inside a Tokio runtime"));
        }

        let name = config.pool_name();
        let stats = Arc::new(PoolStats::new());
        let manager = ConnectionManager::new(
            config.addr(),
            config.options.clone(),
            Arc::clone(&stats),
            config.log,
        );

        let pool = bb8::Pool::builder()
            .max_size(config.max)
            .min_idle(None)
            .max_lifetime(None)
            .idle_timeout(Some(config.idle_timeout()))
            .reaper_rate(config.reap_interval())
            .connection_timeout(config.options.acquire_timeout())
            .test_on_check_out(config.options.test_on_checkout)
            .error_sink(Box::new(LogErrorSink::new(name.clone())))
            .build_unchecked(manager);

        info!(
            "Created pool {} (max {}, idle timeout {:?}, reap interval {:?})",
            name,
            config.max,
            config.idle_timeout(),
            config.reap_interval()
        );

        Ok(KvPool {
            pool,
            config: Arc::new(config),
            name: Arc::from(name),
            stats,
        })
    }

    /// Run `command` with `args` on a pooled connection and return its reply.
    ///
    /// # Errors
    ///
    /// * `Error::Usage` if the command name is malformed (nothing is acquired)
    /// * `Error::AcquireTimeout` / `Error::Connection` if no connection could be had
    /// * `Error::Server` if the backend rejected the command
    /// * `Error::Io` / `Error::Protocol` / `Error::Timeout` on transport failure
    pub async fn send_command<A: ToArgs>(&self, command: &str, args: A) -> Result<Reply> {
        let request = Request::new(command, &args)?;
        let (command, args, _) = request.into_parts();
        self.run(&command, &args).await
    }

    /// Run `command` and hand the outcome to `callback`.
    ///
    /// Usage errors are returned directly and the callback is never called.
    /// Otherwise the callback is called exactly once, after the connection has
    /// gone back to the pool, and this returns `Ok(())`.
    pub async fn send_command_with<A, F>(&self, command: &str, args: A, callback: F) -> Result<()>
    where
        A: ToArgs,
        F: FnOnce(Result<Reply>) + Send + 'static,
    {
        let request = Request::new(command, &args)?;
        self.dispatch_with(request, callback).await
    }

    /// Run a prebuilt request.
    ///
    /// If the request carries a callback the outcome goes there and this
    /// returns `None`; otherwise the outcome is returned.
    pub async fn dispatch(&self, request: Request) -> Option<Result<Reply>> {
        let (command, args, callback) = request.into_parts();
        let outcome = self.run(&command, &args).await;
        match callback {
            Some(callback) => {
                callback(outcome);
                None
            }
            None => Some(outcome),
        }
    }

    /// Run a prebuilt request with a callback supplied alongside it.
    ///
    /// Fails with `Error::Usage` when the request already carries a callback.
    pub async fn dispatch_with<F>(&self, request: Request, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Reply>) + Send + 'static,
    {
        let request = request.with_callback(callback)?;
        self.dispatch(request).await;
        Ok(())
    }

    async fn run(&self, command: &str, args: &[Vec<u8>]) -> Result<Reply> {
        self.stats.record_dispatched();

        let mut checkout = self.acquire().await?;
        let outcome = checkout.execute(command, args).await;
        drop(checkout);

        if let Err(e) = &outcome {
            self.stats.record_command_error();
            debug!("{}: {} failed: {}", self.name, command, e);
        }
        outcome
    }

    /// Borrow a connection for the duration of the returned guard.
    async fn acquire(&self) -> Result<Checkout<'_>> {
        match self.pool.get().await {
            Ok(conn) => {
                self.stats.record_acquired();
                if self.config.log {
                    info!("{}: acquired connection #{}", self.name, conn.id());
                }
                Ok(Checkout {
                    conn: Some(conn),
                    owner: self,
                })
            }
            Err(bb8::RunError::User(e)) => {
                self.stats.record_acquire_failure();
                warn!("{}: failed to open connection: {}", self.name, e);
                Err(e)
            }
            Err(bb8::RunError::TimedOut) => {
                self.stats.record_acquire_failure();
                let waited = self.config.options.acquire_timeout();
                warn!("{}: no connection available after {:?}", self.name, waited);
                Err(Error::AcquireTimeout {
                    pool: self.name.to_string(),
                    waited,
                })
            }
        }
    }

    /// Current size of the pool as seen by the pool manager.
    pub fn status(&self) -> PoolStatus {
        let state = self.pool.state();
        PoolStatus {
            connections: state.connections,
            idle_connections: state.idle_connections,
            max: self.config.max,
        }
    }

    /// Counters accumulated since the pool was created.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The configuration in effect, with defaults applied.
    pub fn pool_config(&self) -> &PoolConfig {
        &self.config
    }

    /// Pool name, `redis://host:port`.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for KvPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvPool")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

/// Create a pool for `config`; shorthand for [`KvPool::new`].
pub fn create_pool(config: PoolConfig) -> Result<KvPool> {
    KvPool::new(config)
}

/// A connection checked out of the pool.
///
/// Dropping the guard releases the connection exactly once; a connection
/// flagged broken is destroyed by the pool instead of being kept.
struct Checkout<'a> {
    conn: Option<PooledConnection<'a, ConnectionManager>>,
    owner: &'a KvPool,
}

impl Deref for Checkout<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `Drop` takes the connection out.
        self.conn.as_deref().unwrap_or_else(|| unreachable!("checkout already released"))
    }
}

impl DerefMut for Checkout<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
            .as_deref_mut()
            .unwrap_or_else(|| unreachable!("checkout already released"))
    }
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let id = conn.id();
        let broken = conn.is_broken();
        drop(conn);

        self.owner.stats.record_released();
        if broken {
            warn!("{}: discarded broken connection #{}", self.owner.name, id);
        } else if self.owner.config.log {
            info!("{}: released connection #{}", self.owner.name, id);
        }
    }
}
