//! # kv_pool - Pooled Connections for Redis-compatible Stores
//!
//! A bounded pool of persistent connections to a single key-value server,
//! with a dispatch facade that borrows a connection per command and gives it
//! back as soon as the reply is in.
//!
//! ## Architecture Overview
//!
//! - **Configuration** (`config`): backend address, backend options, pool sizing
//! - **Protocol** (`protocol`): RESP2 request encoding and reply decoding
//! - **Connection** (`connection`): one TCP connection with its handshake
//! - **Manager** (`manager`): create / validate / destroy callbacks for `bb8`
//! - **Facade** (`pool`): acquire → execute → release for every command
//! - **Commands** (`commands`): per-command methods built from a static table
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kv_pool::{create_pool, PoolConfig, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut config = PoolConfig::new("127.0.0.1", 6379);
//!     config.max = 8;
//!     let pool = create_pool(config)?;
//!
//!     pool.set(("greeting", "hello")).await?;
//!     let value = pool.get("greeting").await?;
//!     println!("{:?}", value.as_str());
//!
//!     pool.send_command_with("hset", ("h", "f", "v"), |outcome| {
//!         println!("hset finished: {:?}", outcome);
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod pool;
pub mod protocol;
pub mod stats;

pub use command::{Callback, Request, ToArgs};
pub use commands::{is_passthrough, Passthrough, COMMANDS};
pub use config::{BackendOptions, PoolConfig};
pub use error::{Error, Result};
pub use pool::{create_pool, KvPool};
pub use protocol::Reply;
pub use stats::{PoolStatus, StatsSnapshot};
