//! # Pool Statistics
//!
//! Counters describing what the facade has done with its pool: how many
//! commands were dispatched, how many acquisitions succeeded or failed, and
//! how many connections were opened and destroyed over the pool's lifetime.
//!
//! Counters use relaxed atomics; a snapshot is consistent per counter but not
//! across counters while commands are in flight.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Live counters shared by the facade and the connection manager.
#[derive(Debug)]
pub struct PoolStats {
    dispatched: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    acquire_failures: AtomicU64,
    command_errors: AtomicU64,
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    start_time: Instant,
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolStats {
    pub fn new() -> Self {
        Self {
            dispatched: AtomicU64::new(0),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            acquire_failures: AtomicU64::new(0),
            command_errors: AtomicU64::new(0),
            connections_opened: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acquire_failure(&self) {
        self.acquire_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_command_error(&self) {
        self.command_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            acquire_failures: self.acquire_failures.load(Ordering::Relaxed),
            command_errors: self.command_errors.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Commands that passed validation and went to the pool
    pub dispatched: u64,
    /// Successful acquisitions
    pub acquired: u64,
    /// Connections handed back after a command
    pub released: u64,
    /// Acquisitions that failed (timeout or factory error)
    pub acquire_failures: u64,
    /// Commands that failed after a connection was acquired
    pub command_errors: u64,
    /// Connections created by the factory
    pub connections_opened: u64,
    /// Connections destroyed by the pool
    pub connections_closed: u64,
    pub uptime_seconds: u64,
}

impl StatsSnapshot {
    /// Connections currently checked out by callers.
    pub fn in_flight(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uptime_seconds:{}\r\n", self.uptime_seconds)?;
        write!(f, "dispatched:{}\r\n", self.dispatched)?;
        write!(f, "acquired:{}\r\n", self.acquired)?;
        write!(f, "released:{}\r\n", self.released)?;
        write!(f, "acquire_failures:{}\r\n", self.acquire_failures)?;
        write!(f, "command_errors:{}\r\n", self.command_errors)?;
        write!(f, "connections_opened:{}\r\n", self.connections_opened)?;
        write!(f, "connections_closed:{}\r\n", self.connections_closed)
    }
}

/// Size of the pool at one moment, as reported by the pool manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Open connections, idle and checked out
    pub connections: u32,
    /// Open connections waiting in the pool
    pub idle_connections: u32,
    /// Configured upper bound
    pub max: u32,
}

impl PoolStatus {
    pub fn in_use(&self) -> u32 {
        self.connections.saturating_sub(self.idle_connections)
    }
}
