//! # Backend Connection
//!
//! A single TCP connection to the backend server, speaking RESP2.
//!
//! A connection is only handed to the pool once the handshake is complete:
//! `AUTH` (when a password is configured), `SELECT` (when a non-zero database
//! is configured), `CLIENT SETNAME` (when a name is configured) and finally a
//! `PING` that must be answered with `PONG`.
//!
//! Any transport failure during a command, or a command future dropped before
//! its reply arrived, marks the connection broken; the pool checks that flag on
//! release and destroys broken connections instead of reusing them.

use log::{debug, warn};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::BackendOptions;
use crate::error::{Error, Result};
use crate::manager::TrackedClose;
use crate::protocol::{encode_command, read_reply, Reply};

/// Bytes of a RESP-encoded `QUIT`, written on drop without waiting for the reply.
const QUIT_COMMAND: &[u8] = b"*1\r\n$4\r\nQUIT\r\n";

/// An open, handshaken connection to the backend.
pub struct Connection {
    id: u64,
    addr: String,
    stream: Option<BufStream<TcpStream>>,
    write_buf: Vec<u8>,
    command_timeout: Option<Duration>,
    broken: bool,
    close_hook: Option<TrackedClose>,
}

impl Connection {
    /// Open a connection to `addr` and run the handshake.
    ///
    /// The whole open (TCP connect plus handshake) is bounded by the
    /// configured connect timeout.
    pub async fn open(id: u64, addr: &str, options: &BackendOptions) -> Result<Self> {
        let connect_timeout = options.connect_timeout();
        match timeout(connect_timeout, Self::open_inner(id, addr, options)).await {
            Ok(result) => result,
            Err(_) => Err(Error::connection(format!(
                "Timed out after {:?} connecting to {}",
                connect_timeout, addr
            ))),
        }
    }

    async fn open_inner(id: u64, addr: &str, options: &BackendOptions) -> Result<Self> {
        debug!("Opening connection #{} to {}", id, addr);
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::connection(format!("Failed to connect to {}: {}", addr, e)))?;

        if options.nodelay {
            stream
                .set_nodelay(true)
                .map_err(|e| Error::connection(format!("Failed to set TCP_NODELAY: {}", e)))?;
        }

        let mut conn = Connection {
            id,
            addr: addr.to_string(),
            stream: Some(BufStream::new(stream)),
            write_buf: Vec::with_capacity(256),
            command_timeout: options.command_timeout(),
            broken: false,
            close_hook: None,
        };
        conn.handshake(options).await?;
        debug!("Connection #{} to {} is ready", id, addr);
        Ok(conn)
    }

    async fn handshake(&mut self, options: &BackendOptions) -> Result<()> {
        if let Some(password) = &options.password {
            let auth = match &options.username {
                Some(username) => vec![username.clone().into_bytes(), password.clone().into_bytes()],
                None => vec![password.clone().into_bytes()],
            };
            self.execute("AUTH", &auth)
                .await
                .map_err(|e| Error::connection(format!("AUTH failed on {}: {}", self.addr, e)))?;
        }

        if options.database != 0 {
            let db = options.database.to_string().into_bytes();
            self.execute("SELECT", &[db]).await.map_err(|e| {
                Error::connection(format!(
                    "SELECT {} failed on {}: {}",
                    options.database, self.addr, e
                ))
            })?;
        }

        if let Some(name) = &options.client_name {
            let args = [b"SETNAME".to_vec(), name.clone().into_bytes()];
            self.execute("CLIENT", &args).await.map_err(|e| {
                Error::connection(format!("CLIENT SETNAME failed on {}: {}", self.addr, e))
            })?;
        }

        self.ping().await
    }

    /// Check the connection with `PING`; anything but `PONG` is an error.
    pub async fn ping(&mut self) -> Result<()> {
        match self.execute("PING", &[]).await? {
            Reply::Status(status) if status == "PONG" => Ok(()),
            other => {
                self.broken = true;
                Err(Error::connection(format!(
                    "Unexpected PING reply from {}: {:?}",
                    self.addr, other
                )))
            }
        }
    }

    /// Send one command and read its reply.
    ///
    /// Server error replies come back as `Err(Error::Server)` and leave the
    /// connection usable. Transport errors and timeouts mark it broken.
    pub async fn execute(&mut self, command: &str, args: &[Vec<u8>]) -> Result<Reply> {
        if self.broken {
            return Err(Error::connection(format!(
                "Connection #{} to {} is broken",
                self.id, self.addr
            )));
        }

        // Stays set if this future is dropped mid-command, so a connection with
        // a half-read reply never goes back into rotation.
        self.broken = true;

        let result = match self.command_timeout {
            Some(limit) => match timeout(limit, self.round_trip(command, args)).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(format!(
                    "{} timed out after {:?}",
                    command, limit
                ))),
            },
            None => self.round_trip(command, args).await,
        };

        self.broken = matches!(&result, Err(e) if e.is_transport());
        if let Err(e) = &result {
            if self.broken {
                warn!(
                    "Connection #{} to {} failed during {}: {}",
                    self.id, self.addr, command, e
                );
            }
        }
        result
    }

    async fn round_trip(&mut self, command: &str, args: &[Vec<u8>]) -> Result<Reply> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::connection("Connection already closed"))?;

        self.write_buf.clear();
        encode_command(command, args, &mut self.write_buf);
        stream.write_all(&self.write_buf).await?;
        stream.flush().await?;

        read_reply(stream).await
    }

    /// Close gracefully: send `QUIT`, wait for its reply and shut the socket down.
    pub async fn quit(mut self) -> Result<()> {
        let result = if self.broken {
            Ok(())
        } else {
            self.round_trip("QUIT", &[]).await.map(|_| ())
        };
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.get_mut().shutdown().await;
        }
        debug!("Connection #{} to {} closed", self.id, self.addr);
        result
    }

    pub(crate) fn with_close_hook(mut self, hook: TrackedClose) -> Self {
        self.close_hook = Some(hook);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        if self.broken {
            return;
        }
        // The pool destroys connections synchronously, so the QUIT goes out on
        // a detached task when a runtime is still around.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let id = self.id;
            handle.spawn(async move {
                let socket = stream.get_mut();
                if socket.write_all(QUIT_COMMAND).await.is_ok() {
                    let _ = socket.shutdown().await;
                }
                debug!("Sent QUIT on connection #{}", id);
            });
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("broken", &self.broken)
            .finish()
    }
}
