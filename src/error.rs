//! Error types for pooled key-value operations

use std::time::Duration;
use thiserror::Error;

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the pool facade can report.
///
/// The variants fall into three groups that callers usually treat differently:
/// usage errors (`Usage`, `Config`) are raised before anything touches the
/// network, acquisition errors (`AcquireTimeout`, `Connection`) mean the command
/// was never issued, and command errors (`Io`, `Protocol`, `Timeout`, `Server`)
/// happened on a borrowed connection.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request: bad command name, bad argument, duplicate callback
    #[error("Usage error: {message}")]
    Usage { message: String },

    /// Invalid configuration or construction context
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// No connection became available within the acquire timeout
    #[error("Timed out after {waited:?} waiting for a connection from {pool}")]
    AcquireTimeout { pool: String, waited: Duration },

    /// Opening or handshaking a new connection failed
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// I/O operation errors
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Malformed reply framing from the server
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// The command did not complete within the command timeout
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// The server answered with an error reply
    #[error("Server error: {message}")]
    Server { message: String },
}

impl Error {
    /// Create a usage error
    pub fn usage<S: Into<String>>(msg: S) -> Self {
        Error::Usage { message: msg.into() }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config { message: msg.into() }
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Error::Connection { message: msg.into() }
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol { message: msg.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout { message: msg.into() }
    }

    /// Create a server error
    pub fn server<S: Into<String>>(msg: S) -> Self {
        Error::Server { message: msg.into() }
    }

    /// Whether this error leaves the connection it happened on unusable.
    ///
    /// A connection that saw a transport failure may have a half-read reply
    /// in its buffer, so it must be destroyed rather than handed out again.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io { .. } | Error::Protocol { .. } | Error::Timeout { .. } | Error::Connection { .. }
        )
    }

    /// Whether this error was raised before any connection was acquired
    pub fn is_usage(&self) -> bool {
        matches!(self, Error::Usage { .. } | Error::Config { .. })
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config {
            message: err.to_string(),
        }
    }
}
