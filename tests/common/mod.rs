//! In-process RESP2 test backend.
//!
//! Speaks enough of the Redis protocol for the pool tests: connection
//! handshake commands, strings, hashes, `KEYS`, `FLUSHDB`, and two debugging
//! hooks (`DEBUG SLEEP <seconds>` and `DEBUG DROP`, which closes the socket
//! without replying). Every test gets its own server on an ephemeral port.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use log::{debug, info};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use kv_pool::PoolConfig;

const DATABASES: usize = 16;

static INIT_LOGGER: Once = Once::new();

/// Route `log` output through env_logger; use RUST_LOG=debug to see it.
pub fn init_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Counters for what clients did to the server.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub total_connections: AtomicU64,
    pub active_connections: AtomicU64,
    pub peak_connections: AtomicU64,
    pub total_commands: AtomicU64,
    pub quit_commands: AtomicU64,
    pub auth_commands: AtomicU64,
    pub select_commands: AtomicU64,
    pub client_names: Mutex<Vec<String>>,
}

impl ServerStats {
    fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::SeqCst);
        let active = self.active_connections.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_connections.fetch_max(active, Ordering::SeqCst);
    }

    fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn total(&self) -> u64 {
        self.total_connections.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> u64 {
        self.active_connections.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> u64 {
        self.peak_connections.load(Ordering::SeqCst)
    }

    pub fn quits(&self) -> u64 {
        self.quit_commands.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
enum Value {
    Str(Vec<u8>),
    Hash(HashMap<Vec<u8>, Vec<u8>>),
}

/// Shared in-memory keyspace, one map per logical database.
#[derive(Clone)]
pub struct Store {
    dbs: Arc<RwLock<Vec<HashMap<Vec<u8>, Value>>>>,
}

impl Store {
    fn new() -> Self {
        Self {
            dbs: Arc::new(RwLock::new(vec![HashMap::new(); DATABASES])),
        }
    }

    /// Keys in `db`, sorted, as strings.
    pub fn keys(&self, db: usize) -> Vec<String> {
        let dbs = self.dbs.read().unwrap();
        let mut keys: Vec<String> = dbs[db]
            .keys()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .collect();
        keys.sort();
        keys
    }
}

enum Reply {
    Status(&'static str),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Nil,
    Array(Vec<Reply>),
}

impl Reply {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Status(s) => out.extend_from_slice(format!("+{}\r\n", s).as_bytes()),
            Reply::Error(e) => out.extend_from_slice(format!("-{}\r\n", e).as_bytes()),
            Reply::Integer(n) => out.extend_from_slice(format!(":{}\r\n", n).as_bytes()),
            Reply::Bulk(data) => {
                out.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Reply::Nil => out.extend_from_slice(b"$-1\r\n"),
            Reply::Array(items) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode(out);
                }
            }
        }
    }
}

/// Options for a test server instance.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub password: Option<String>,
}

/// A running test server; stops accepting when dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    pub stats: Arc<ServerStats>,
    pub store: Store,
    accept_task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> TestServer {
        Self::start_with(ServerOptions::default()).await
    }

    pub async fn start_with(options: ServerOptions) -> TestServer {
        init_logging();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test server");
        let addr = listener.local_addr().expect("test server addr");
        let stats = Arc::new(ServerStats::default());
        let store = Store::new();
        let options = Arc::new(options);

        let accept_task = {
            let stats = Arc::clone(&stats);
            let store = store.clone();
            tokio::spawn(async move {
                loop {
                    let (socket, peer) = match listener.accept().await {
                        Ok(accepted) => accepted,
                        Err(_) => continue,
                    };
                    debug!("Test server accepted {}", peer);
                    stats.connection_opened();
                    let stats = Arc::clone(&stats);
                    let store = store.clone();
                    let options = Arc::clone(&options);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, &store, &stats, &options).await {
                            debug!("Test server connection {} ended: {}", peer, e);
                        }
                        stats.connection_closed();
                    });
                }
            })
        };

        info!("Test server listening on {}", addr);
        TestServer {
            addr,
            stats,
            store,
            accept_task,
        }
    }

    /// Pool configuration pointing at this server, small timeouts for tests.
    pub fn pool_config(&self) -> PoolConfig {
        let mut config = PoolConfig::new(self.addr.ip().to_string(), self.addr.port());
        config.options.connect_timeout_millis = 2_000;
        config.options.acquire_timeout_millis = 5_000;
        config
    }

    /// Wait until the server has seen `n` QUIT commands, or give up after two seconds.
    pub async fn wait_for_quits(&self, n: u64) -> bool {
        wait_until(|| self.stats.quits() >= n).await
    }

    /// Wait until at most `n` client connections are open.
    pub async fn wait_for_active_at_most(&self, n: u64) -> bool {
        wait_until(|| self.stats.active() <= n).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Poll `condition` every 10ms for up to two seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

struct Session {
    authenticated: bool,
    db: usize,
}

async fn handle_connection(
    socket: TcpStream,
    store: &Store,
    stats: &ServerStats,
    options: &ServerOptions,
) -> Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);
    let mut session = Session {
        authenticated: options.password.is_none(),
        db: 0,
    };
    let mut out = Vec::with_capacity(256);

    loop {
        let args = match read_command(&mut reader).await? {
            Some(args) => args,
            None => return Ok(()),
        };
        if args.is_empty() {
            bail!("empty command");
        }
        stats.total_commands.fetch_add(1, Ordering::SeqCst);

        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        match name.as_str() {
            "QUIT" => {
                stats.quit_commands.fetch_add(1, Ordering::SeqCst);
                writer.write_all(b"+OK\r\n").await?;
                return Ok(());
            }
            "DEBUG" if is_arg(&args, 1, "DROP") => return Ok(()),
            "DEBUG" if is_arg(&args, 1, "SLEEP") => {
                let seconds: f64 = text(&args, 2)?.parse()?;
                tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
                writer.write_all(b"+OK\r\n").await?;
                continue;
            }
            _ => {}
        }

        let reply = execute(&name, &args[1..], &mut session, store, stats, options);
        out.clear();
        reply.encode(&mut out);
        writer.write_all(&out).await?;
    }
}

fn is_arg(args: &[Vec<u8>], index: usize, expected: &str) -> bool {
    args.get(index)
        .map(|arg| arg.eq_ignore_ascii_case(expected.as_bytes()))
        .unwrap_or(false)
}

fn text(args: &[Vec<u8>], index: usize) -> Result<String> {
    args.get(index)
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .ok_or_else(|| anyhow!("missing argument {}", index))
}

fn wrong_args(name: &str) -> Reply {
    Reply::Error(format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn wrong_type() -> Reply {
    Reply::Error("WRONGTYPE Operation against a key holding the wrong kind of value".to_string())
}

fn execute(
    name: &str,
    args: &[Vec<u8>],
    session: &mut Session,
    store: &Store,
    stats: &ServerStats,
    options: &ServerOptions,
) -> Reply {
    if name == "AUTH" {
        stats.auth_commands.fetch_add(1, Ordering::SeqCst);
        let given = match args {
            [password] | [_, password] => password,
            _ => return wrong_args(name),
        };
        return match &options.password {
            None => Reply::Error("ERR Client sent AUTH, but no password is set".to_string()),
            Some(expected) if expected.as_bytes() == given.as_slice() => {
                session.authenticated = true;
                Reply::Status("OK")
            }
            Some(_) => Reply::Error("WRONGPASS invalid username-password pair".to_string()),
        };
    }
    if !session.authenticated {
        return Reply::Error("NOAUTH Authentication required.".to_string());
    }

    match (name, args) {
        ("PING", []) => Reply::Status("PONG"),
        ("PING", [message]) | ("ECHO", [message]) => Reply::Bulk(message.clone()),
        ("SELECT", [db]) => {
            stats.select_commands.fetch_add(1, Ordering::SeqCst);
            match String::from_utf8_lossy(db).parse::<usize>() {
                Ok(db) if db < DATABASES => {
                    session.db = db;
                    Reply::Status("OK")
                }
                _ => Reply::Error("ERR DB index is out of range".to_string()),
            }
        }
        ("CLIENT", [sub, client_name]) if sub.eq_ignore_ascii_case(b"SETNAME") => {
            stats
                .client_names
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(client_name).into_owned());
            Reply::Status("OK")
        }
        ("GET", [key]) => {
            let dbs = store.dbs.read().unwrap();
            match dbs[session.db].get(key) {
                Some(Value::Str(data)) => Reply::Bulk(data.clone()),
                Some(Value::Hash(_)) => wrong_type(),
                None => Reply::Nil,
            }
        }
        ("SET", [key, value]) => {
            let mut dbs = store.dbs.write().unwrap();
            dbs[session.db].insert(key.clone(), Value::Str(value.clone()));
            Reply::Status("OK")
        }
        ("DEL", keys) if !keys.is_empty() => {
            let mut dbs = store.dbs.write().unwrap();
            let removed = keys
                .iter()
                .filter(|key| dbs[session.db].remove(*key).is_some())
                .count();
            Reply::Integer(removed as i64)
        }
        ("EXISTS", keys) if !keys.is_empty() => {
            let dbs = store.dbs.read().unwrap();
            let found = keys.iter().filter(|key| dbs[session.db].contains_key(*key)).count();
            Reply::Integer(found as i64)
        }
        ("KEYS", [pattern]) => {
            let dbs = store.dbs.read().unwrap();
            let mut keys: Vec<&Vec<u8>> = dbs[session.db]
                .keys()
                .filter(|key| matches_pattern(pattern, key))
                .collect();
            keys.sort();
            Reply::Array(keys.into_iter().map(|key| Reply::Bulk(key.clone())).collect())
        }
        ("DBSIZE", []) => {
            let dbs = store.dbs.read().unwrap();
            Reply::Integer(dbs[session.db].len() as i64)
        }
        ("FLUSHDB", []) => {
            let mut dbs = store.dbs.write().unwrap();
            dbs[session.db].clear();
            Reply::Status("OK")
        }
        ("INCR", [key]) => incr_by(store, session.db, key, 1),
        ("INCRBY", [key, amount]) => match String::from_utf8_lossy(amount).parse::<i64>() {
            Ok(amount) => incr_by(store, session.db, key, amount),
            Err(_) => Reply::Error("ERR value is not an integer or out of range".to_string()),
        },
        ("HSET", [key, pairs @ ..]) if !pairs.is_empty() && pairs.len() % 2 == 0 => {
            let mut dbs = store.dbs.write().unwrap();
            let entry = dbs[session.db]
                .entry(key.clone())
                .or_insert_with(|| Value::Hash(HashMap::new()));
            match entry {
                Value::Hash(hash) => {
                    let added = pairs
                        .chunks(2)
                        .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
                        .count();
                    Reply::Integer(added as i64)
                }
                Value::Str(_) => wrong_type(),
            }
        }
        ("HGET", [key, field]) => {
            let dbs = store.dbs.read().unwrap();
            match dbs[session.db].get(key) {
                Some(Value::Hash(hash)) => hash.get(field).cloned().map(Reply::Bulk).unwrap_or(Reply::Nil),
                Some(Value::Str(_)) => wrong_type(),
                None => Reply::Nil,
            }
        }
        ("HGETALL", [key]) => {
            let dbs = store.dbs.read().unwrap();
            match dbs[session.db].get(key) {
                Some(Value::Hash(hash)) => {
                    let mut fields: Vec<_> = hash.iter().collect();
                    fields.sort();
                    Reply::Array(
                        fields
                            .into_iter()
                            .flat_map(|(f, v)| [Reply::Bulk(f.clone()), Reply::Bulk(v.clone())])
                            .collect(),
                    )
                }
                Some(Value::Str(_)) => wrong_type(),
                None => Reply::Array(Vec::new()),
            }
        }
        (
            "PING" | "ECHO" | "SELECT" | "GET" | "SET" | "DEL" | "EXISTS" | "KEYS" | "DBSIZE"
            | "FLUSHDB" | "INCR" | "INCRBY" | "HSET" | "HGET" | "HGETALL",
            _,
        ) => wrong_args(name),
        _ => Reply::Error(format!(
            "ERR unknown command '{}'",
            name.to_ascii_lowercase()
        )),
    }
}

fn incr_by(store: &Store, db: usize, key: &[u8], amount: i64) -> Reply {
    let mut dbs = store.dbs.write().unwrap();
    let current = match dbs[db].get(key) {
        Some(Value::Str(data)) => match String::from_utf8_lossy(data).parse::<i64>() {
            Ok(n) => n,
            Err(_) => return Reply::Error("ERR value is not an integer or out of range".to_string()),
        },
        Some(Value::Hash(_)) => return wrong_type(),
        None => 0,
    };
    let next = current + amount;
    dbs[db].insert(key.to_vec(), Value::Str(next.to_string().into_bytes()));
    Reply::Integer(next)
}

/// Glob subset: `*` alone, a trailing `*` prefix match, or an exact key.
fn matches_pattern(pattern: &[u8], key: &[u8]) -> bool {
    match pattern.split_last() {
        Some((b'*', prefix)) => key.starts_with(prefix),
        _ => pattern == key,
    }
}

/// Read one RESP array-of-bulk-strings command. `None` on clean EOF.
async fn read_command<R>(reader: &mut R) -> Result<Option<Vec<Vec<u8>>>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line).await? == 0 {
        return Ok(None);
    }
    let header = trim_crlf(&line)?;
    let count: usize = match header.split_first() {
        Some((b'*', count)) => std::str::from_utf8(count)?.parse()?,
        _ => bail!("expected array header"),
    };

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_until(b'\n', &mut line).await?;
        let header = trim_crlf(&line)?;
        let len: usize = match header.split_first() {
            Some((b'$', len)) => std::str::from_utf8(len)?.parse()?,
            _ => bail!("expected bulk header"),
        };
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data).await?;
        data.truncate(len);
        args.push(data);
    }
    Ok(Some(args))
}

fn trim_crlf(line: &[u8]) -> Result<&[u8]> {
    line.strip_suffix(b"\r\n")
        .ok_or_else(|| anyhow!("line not terminated by CRLF"))
}
