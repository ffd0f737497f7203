//! Memcached backend over the text protocol
//!
//! Memcached has a single keyspace, reported as the database `default`.
//! Key listing walks `lru_crawler metadump all`, which also carries each
//! key's absolute expiry; `TTL` is answered from the same dump.

mod commands;
pub mod protocol;
mod translator;

use std::time::Duration;

use kvbridge_core::{ConnectionType, DatabaseInfo, Error, Result, ServerInfo, Ttl, EXPIRED_TTL, NO_TTL};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::net::{self, Wire};
use crate::backend::Backend;
use crate::connection::NativeConnector;
use crate::registry::CommandRegistry;

pub use translator::MemcachedTranslator;

/// Name of the only database.
pub const DEFAULT_DATABASE: &str = "default";

/// Where to reach a memcached server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemcachedConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Connect, read and write timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11211,
            timeout_ms: 5_000,
        }
    }
}

/// An open memcached socket.
pub struct MemcachedHandle {
    wire: Wire,
}

impl MemcachedHandle {
    /// `set`, `add`, `replace`, `append` or `prepend`; returns whether the
    /// item was stored.
    pub fn store(&mut self, verb: &str, key: &str, flags: u32, exptime: i64, value: &str) -> Result<bool> {
        match self.wire.store(verb, key, flags, exptime, value)?.as_str() {
            "STORED" => Ok(true),
            "NOT_STORED" | "NOT_FOUND" | "EXISTS" => Ok(false),
            other => Err(Error::native(format!("unexpected reply to {}: {}", verb, other))),
        }
    }

    /// Value of `key`, if present.
    pub fn get(&mut self, key: &str) -> Result<Option<String>> {
        self.wire.fetch(key)
    }

    /// Delete `key`; returns whether it existed.
    pub fn delete(&mut self, key: &str) -> Result<bool> {
        protocol::check_key(key)?;
        match self.wire.request(&format!("delete {}", key))?.as_str() {
            "DELETED" => Ok(true),
            "NOT_FOUND" => Ok(false),
            other => Err(Error::native(format!("unexpected reply to delete: {}", other))),
        }
    }

    /// `incr` or `decr`; `None` when the key does not exist.
    pub fn step(&mut self, verb: &str, key: &str, delta: u64) -> Result<Option<u64>> {
        protocol::check_key(key)?;
        let reply = self.wire.request(&format!("{} {} {}", verb, key, delta))?;
        if reply == "NOT_FOUND" {
            return Ok(None);
        }
        reply
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::native(format!("unexpected reply to {}: {}", verb, reply)))
    }

    /// Change the expiry of `key`; returns whether it exists.
    pub fn touch(&mut self, key: &str, exptime: i64) -> Result<bool> {
        protocol::check_key(key)?;
        match self.wire.request(&format!("touch {} {}", key, exptime))?.as_str() {
            "TOUCHED" => Ok(true),
            "NOT_FOUND" => Ok(false),
            other => Err(Error::native(format!("unexpected reply to touch: {}", other))),
        }
    }

    /// Every live key with its absolute expiry, sorted by key.
    pub fn dump(&mut self) -> Result<Vec<protocol::DumpEntry>> {
        let lines = self.wire.listing("lru_crawler metadump all")?;
        let mut entries = protocol::parse_metadump(&lines);
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Every live key, sorted.
    pub fn keys(&mut self) -> Result<Vec<String>> {
        Ok(self.dump()?.into_iter().map(|entry| entry.key).collect())
    }

    /// Seconds until `key` expires, [`NO_TTL`] or [`EXPIRED_TTL`].
    pub fn ttl(&mut self, key: &str) -> Result<Ttl> {
        let now = chrono::Utc::now().timestamp();
        let ttl = match self.dump()?.into_iter().find(|entry| entry.key == key) {
            None => EXPIRED_TTL,
            Some(entry) if entry.exp < 0 => NO_TTL,
            Some(entry) => (entry.exp - now).max(0),
        };
        Ok(ttl)
    }

    /// `stats [group]` as `name value` pairs.
    pub fn stats(&mut self, group: Option<&str>) -> Result<Vec<(String, String)>> {
        let line = match group {
            Some(group) => format!("stats {}", group),
            None => "stats".to_string(),
        };
        Ok(protocol::parse_stats(&self.wire.listing(&line)?))
    }

    /// Number of items currently stored.
    pub fn item_count(&mut self) -> Result<u64> {
        let stats = self.stats(None)?;
        let count = stats
            .iter()
            .find(|(name, _)| name == "curr_items")
            .and_then(|(_, value)| value.parse().ok())
            .unwrap_or(0);
        Ok(count)
    }

    /// Invalidate every item, optionally after `delay` seconds.
    pub fn flush_all(&mut self, delay: Option<u64>) -> Result<()> {
        let line = match delay {
            Some(delay) => format!("flush_all {}", delay),
            None => "flush_all".to_string(),
        };
        expect_ok(&self.wire.request(&line)?)
    }

    /// Server version string.
    pub fn version(&mut self) -> Result<String> {
        let reply = self.wire.request("version")?;
        Ok(reply.strip_prefix("VERSION ").unwrap_or(&reply).to_string())
    }
}

fn expect_ok(reply: &str) -> Result<()> {
    if reply == "OK" {
        Ok(())
    } else {
        Err(Error::native(format!("unexpected reply: {}", reply)))
    }
}

/// Opens memcached sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemcachedConnector;

impl NativeConnector for MemcachedConnector {
    type Config = MemcachedConfig;
    type Handle = MemcachedHandle;

    fn open(&mut self, config: &MemcachedConfig) -> Result<MemcachedHandle> {
        let timeout = Duration::from_millis(config.timeout_ms.max(1));
        let stream = net::connect(&config.host, config.port, timeout)?;
        let mut handle = MemcachedHandle {
            wire: Wire::new(stream)?,
        };
        // The text protocol has no handshake; make sure something answers.
        let version = handle.version()?;
        debug!(target: "kvbridge::conn", host = %config.host, port = config.port, %version, "memcached socket open");
        Ok(handle)
    }

    fn close(&mut self, mut handle: MemcachedHandle) -> Result<()> {
        if !handle.wire.is_broken() {
            let _ = handle.wire.send(b"quit\r\n");
        }
        handle.wire.shutdown();
        Ok(())
    }

    fn is_open(&self, handle: &MemcachedHandle) -> bool {
        !handle.wire.is_broken()
    }
}

/// The memcached backend.
pub struct Memcached;

impl Backend for Memcached {
    type Connector = MemcachedConnector;
    type Translator = MemcachedTranslator;
    const CONNECTION_TYPE: ConnectionType = ConnectionType::Memcached;

    fn translator() -> MemcachedTranslator {
        MemcachedTranslator
    }

    fn registry() -> &'static CommandRegistry<MemcachedHandle> {
        &commands::REGISTRY
    }

    fn current_database(handle: &mut MemcachedHandle) -> Result<DatabaseInfo> {
        let count = handle.item_count()?;
        Ok(DatabaseInfo::new(DEFAULT_DATABASE, Some(count), true))
    }

    fn server_info(handle: &mut MemcachedHandle) -> Result<ServerInfo> {
        let mut info = ServerInfo::default();
        for (name, value) in handle.stats(None)? {
            info.push("Server", name, value);
        }
        Ok(info)
    }

    fn properties(handle: &mut MemcachedHandle) -> Result<Vec<(String, String)>> {
        handle.stats(Some("settings"))
    }

    fn shutdown(handle: &mut MemcachedHandle) -> Result<()> {
        // An enabled shutdown closes the socket without replying.
        match handle.wire.request("shutdown") {
            Ok(reply) => expect_ok(&reply),
            Err(_) if handle.wire.is_broken() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
