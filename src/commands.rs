//! # Command Registration Table
//!
//! The backend commands [`KvPool`] exposes as methods. Each entry produces a
//! lower-case method and an upper-case alias taking any [`ToArgs`] value, so
//! code written against a single-connection client keeps working:
//!
//! ```rust,no_run
//! # use kv_pool::{KvPool, PoolConfig};
//! # async fn demo(pool: KvPool) -> kv_pool::Result<()> {
//! pool.hset(("foo2", "bar", "baz")).await?;
//! let value = pool.HGET(("foo2", ["bar"])).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Commands that only make sense while holding one connection across calls
//! (`MULTI`/`EXEC`, `WATCH`, `SELECT`, `AUTH`, pub/sub, `MONITOR`, `QUIT`) are
//! not in the table: through a pool, consecutive calls may land on different
//! connections. They can still be sent with [`KvPool::send_command`].

use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::command::ToArgs;
use crate::error::Result;
use crate::pool::KvPool;
use crate::protocol::Reply;

macro_rules! passthrough_commands {
    ($(($method:ident, $alias:ident, $name:literal)),* $(,)?) => {
        /// Names of every command with a passthrough method, in lower case.
        pub static COMMANDS: &[&str] = &[$($name),*];

        impl KvPool {
            $(
                #[doc = concat!("Run `", $name, "` on a pooled connection.")]
                pub async fn $method<A: ToArgs>(&self, args: A) -> Result<Reply> {
                    self.send_command($name, args).await
                }

                #[allow(non_snake_case)]
                #[doc = concat!("Upper-case alias for `", $name, "`.")]
                pub async fn $alias<A: ToArgs>(&self, args: A) -> Result<Reply> {
                    self.send_command($name, args).await
                }
            )*
        }
    };
}

passthrough_commands! {
    // strings
    (get, GET, "get"),
    (set, SET, "set"),
    (setnx, SETNX, "setnx"),
    (setex, SETEX, "setex"),
    (psetex, PSETEX, "psetex"),
    (getset, GETSET, "getset"),
    (append, APPEND, "append"),
    (strlen, STRLEN, "strlen"),
    (setrange, SETRANGE, "setrange"),
    (getrange, GETRANGE, "getrange"),
    (substr, SUBSTR, "substr"),
    (incr, INCR, "incr"),
    (decr, DECR, "decr"),
    (incrby, INCRBY, "incrby"),
    (decrby, DECRBY, "decrby"),
    (incrbyfloat, INCRBYFLOAT, "incrbyfloat"),
    (mget, MGET, "mget"),
    (mset, MSET, "mset"),
    (msetnx, MSETNX, "msetnx"),
    (setbit, SETBIT, "setbit"),
    (getbit, GETBIT, "getbit"),
    (bitcount, BITCOUNT, "bitcount"),
    (bitop, BITOP, "bitop"),
    (bitpos, BITPOS, "bitpos"),
    (bitfield, BITFIELD, "bitfield"),
    // keys
    (del, DEL, "del"),
    (exists, EXISTS, "exists"),
    (keys, KEYS, "keys"),
    (scan, SCAN, "scan"),
    (randomkey, RANDOMKEY, "randomkey"),
    (rename, RENAME, "rename"),
    (renamenx, RENAMENX, "renamenx"),
    (r#move, MOVE, "move"),
    (r#type, TYPE, "type"),
    (expire, EXPIRE, "expire"),
    (expireat, EXPIREAT, "expireat"),
    (pexpire, PEXPIRE, "pexpire"),
    (pexpireat, PEXPIREAT, "pexpireat"),
    (persist, PERSIST, "persist"),
    (ttl, TTL, "ttl"),
    (pttl, PTTL, "pttl"),
    (sort, SORT, "sort"),
    (dump, DUMP, "dump"),
    (restore, RESTORE, "restore"),
    (migrate, MIGRATE, "migrate"),
    (object, OBJECT, "object"),
    (touch, TOUCH, "touch"),
    (unlink, UNLINK, "unlink"),
    (wait, WAIT, "wait"),
    // lists
    (lpush, LPUSH, "lpush"),
    (rpush, RPUSH, "rpush"),
    (lpushx, LPUSHX, "lpushx"),
    (rpushx, RPUSHX, "rpushx"),
    (linsert, LINSERT, "linsert"),
    (lpop, LPOP, "lpop"),
    (rpop, RPOP, "rpop"),
    (blpop, BLPOP, "blpop"),
    (brpop, BRPOP, "brpop"),
    (rpoplpush, RPOPLPUSH, "rpoplpush"),
    (brpoplpush, BRPOPLPUSH, "brpoplpush"),
    (llen, LLEN, "llen"),
    (lindex, LINDEX, "lindex"),
    (lset, LSET, "lset"),
    (lrange, LRANGE, "lrange"),
    (ltrim, LTRIM, "ltrim"),
    (lrem, LREM, "lrem"),
    // sets
    (sadd, SADD, "sadd"),
    (srem, SREM, "srem"),
    (smove, SMOVE, "smove"),
    (sismember, SISMEMBER, "sismember"),
    (scard, SCARD, "scard"),
    (spop, SPOP, "spop"),
    (srandmember, SRANDMEMBER, "srandmember"),
    (sinter, SINTER, "sinter"),
    (sinterstore, SINTERSTORE, "sinterstore"),
    (sunion, SUNION, "sunion"),
    (sunionstore, SUNIONSTORE, "sunionstore"),
    (sdiff, SDIFF, "sdiff"),
    (sdiffstore, SDIFFSTORE, "sdiffstore"),
    (smembers, SMEMBERS, "smembers"),
    (sscan, SSCAN, "sscan"),
    // sorted sets
    (zadd, ZADD, "zadd"),
    (zincrby, ZINCRBY, "zincrby"),
    (zrem, ZREM, "zrem"),
    (zremrangebyscore, ZREMRANGEBYSCORE, "zremrangebyscore"),
    (zremrangebyrank, ZREMRANGEBYRANK, "zremrangebyrank"),
    (zunionstore, ZUNIONSTORE, "zunionstore"),
    (zinterstore, ZINTERSTORE, "zinterstore"),
    (zrange, ZRANGE, "zrange"),
    (zrangebyscore, ZRANGEBYSCORE, "zrangebyscore"),
    (zrevrangebyscore, ZREVRANGEBYSCORE, "zrevrangebyscore"),
    (zcount, ZCOUNT, "zcount"),
    (zrevrange, ZREVRANGE, "zrevrange"),
    (zcard, ZCARD, "zcard"),
    (zscore, ZSCORE, "zscore"),
    (zrank, ZRANK, "zrank"),
    (zrevrank, ZREVRANK, "zrevrank"),
    (zscan, ZSCAN, "zscan"),
    (zrangebylex, ZRANGEBYLEX, "zrangebylex"),
    (zrevrangebylex, ZREVRANGEBYLEX, "zrevrangebylex"),
    (zlexcount, ZLEXCOUNT, "zlexcount"),
    (zremrangebylex, ZREMRANGEBYLEX, "zremrangebylex"),
    (zpopmin, ZPOPMIN, "zpopmin"),
    (zpopmax, ZPOPMAX, "zpopmax"),
    (bzpopmin, BZPOPMIN, "bzpopmin"),
    (bzpopmax, BZPOPMAX, "bzpopmax"),
    // hashes
    (hset, HSET, "hset"),
    (hsetnx, HSETNX, "hsetnx"),
    (hget, HGET, "hget"),
    (hmset, HMSET, "hmset"),
    (hmget, HMGET, "hmget"),
    (hincrby, HINCRBY, "hincrby"),
    (hincrbyfloat, HINCRBYFLOAT, "hincrbyfloat"),
    (hdel, HDEL, "hdel"),
    (hlen, HLEN, "hlen"),
    (hkeys, HKEYS, "hkeys"),
    (hvals, HVALS, "hvals"),
    (hgetall, HGETALL, "hgetall"),
    (hexists, HEXISTS, "hexists"),
    (hscan, HSCAN, "hscan"),
    (hstrlen, HSTRLEN, "hstrlen"),
    // hyperloglog
    (pfadd, PFADD, "pfadd"),
    (pfcount, PFCOUNT, "pfcount"),
    (pfmerge, PFMERGE, "pfmerge"),
    (geoadd, GEOADD, "geoadd"),
    (geodist, GEODIST, "geodist"),
    (geohash, GEOHASH, "geohash"),
    (geopos, GEOPOS, "geopos"),
    (georadius, GEORADIUS, "georadius"),
    (georadiusbymember, GEORADIUSBYMEMBER, "georadiusbymember"),
    // streams
    (xadd, XADD, "xadd"),
    (xlen, XLEN, "xlen"),
    (xrange, XRANGE, "xrange"),
    (xrevrange, XREVRANGE, "xrevrange"),
    (xread, XREAD, "xread"),
    (xreadgroup, XREADGROUP, "xreadgroup"),
    (xgroup, XGROUP, "xgroup"),
    (xack, XACK, "xack"),
    (xpending, XPENDING, "xpending"),
    (xclaim, XCLAIM, "xclaim"),
    (xdel, XDEL, "xdel"),
    (xtrim, XTRIM, "xtrim"),
    (xinfo, XINFO, "xinfo"),
    // scripting and pub
    (eval, EVAL, "eval"),
    (evalsha, EVALSHA, "evalsha"),
    (script, SCRIPT, "script"),
    (publish, PUBLISH, "publish"),
    (pubsub, PUBSUB, "pubsub"),
    // server
    (ping, PING, "ping"),
    (echo, ECHO, "echo"),
    (dbsize, DBSIZE, "dbsize"),
    (flushdb, FLUSHDB, "flushdb"),
    (flushall, FLUSHALL, "flushall"),
    (info, INFO, "info"),
    (time, TIME, "time"),
    (save, SAVE, "save"),
    (bgsave, BGSAVE, "bgsave"),
    (bgrewriteaof, BGREWRITEAOF, "bgrewriteaof"),
    (lastsave, LASTSAVE, "lastsave"),
    (shutdown, SHUTDOWN, "shutdown"),
    (slaveof, SLAVEOF, "slaveof"),
    (config, CONFIG, "config"),
    (client, CLIENT, "client"),
    (debug, DEBUG, "debug"),
    (cluster, CLUSTER, "cluster"),
    (command, COMMAND, "command"),
    (role, OLE, "role"),
    (replicaof, EPLICAOF, "replicaof"),
    (swapdb, SWAPDB, "swapdb"),
    (slowlog, SLOWLOG, "slowlog"),
    (memory, MEMORY, "memory"),
    (latency, LATENCY, "latency"),
    (lolwut, LOLWUT, "lolwut"),
}

static COMMAND_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| COMMANDS.iter().copied().collect());

/// Whether `name` has a passthrough method (case-insensitive).
pub fn is_passthrough(name: &str) -> bool {
    COMMAND_SET.contains(name.to_ascii_lowercase().as_str())
}

/// A registered command bound to a pool, looked up by name at runtime.
#[derive(Debug, Clone, Copy)]
pub struct Passthrough<'a> {
    pool: &'a KvPool,
    name: &'static str,
}

impl Passthrough<'_> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Same as calling the generated method for this command.
    pub async fn call<A: ToArgs>(&self, args: A) -> Result<Reply> {
        self.pool.send_command(self.name, args).await
    }

    /// Callback form of [`Passthrough::call`].
    pub async fn call_with<A, F>(&self, args: A, callback: F) -> Result<()>
    where
        A: ToArgs,
        F: FnOnce(Result<Reply>) + Send + 'static,
    {
        self.pool.send_command_with(self.name, args, callback).await
    }
}

impl KvPool {
    /// Look up a registered command by name, in either case.
    pub fn passthrough(&self, name: &str) -> Option<Passthrough<'_>> {
        let lower = name.to_ascii_lowercase();
        COMMAND_SET
            .get(lower.as_str())
            .map(|&name| Passthrough { pool: self, name })
    }
}
