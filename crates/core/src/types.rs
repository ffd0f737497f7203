//! Shared descriptive types
//!
//! - ConnectionType: which backend family a driver talks to
//! - CommandLoggingType: who issued a command
//! - DatabaseInfo / DatabaseContent / ScanPage: database listings
//! - ServerInfo / ServerInfoSnapshot: sectioned server statistics
//! - KeyEvent: key-change notifications raised while commands run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::key::{NDbKValue, NKey, Ttl};
use crate::value::ValueType;

/// Backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    /// RESP protocol server
    Redis,
    /// Memcached ASCII protocol server
    Memcached,
    /// redb embedded file
    Redb,
    /// LMDB environment
    Lmdb,
}

impl ConnectionType {
    /// Lowercase backend name.
    pub fn name(self) -> &'static str {
        match self {
            ConnectionType::Redis => "redis",
            ConnectionType::Memcached => "memcached",
            ConnectionType::Redb => "redb",
            ConnectionType::Lmdb => "lmdb",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Who issued a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CommandLoggingType {
    /// Not classified
    #[default]
    Unknown,
    /// Typed by the user
    User,
    /// Issued by the engine on the user's behalf
    Inner,
}

/// One database of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Database name (`0`, `default`, table name, ...)
    pub name: String,
    /// Number of keys, when known
    pub keys_count: Option<u64>,
    /// Whether this is the selected database
    pub is_default: bool,
}

impl DatabaseInfo {
    /// Describe a database.
    pub fn new(name: impl Into<String>, keys_count: Option<u64>, is_default: bool) -> Self {
        DatabaseInfo {
            name: name.into(),
            keys_count,
            is_default,
        }
    }
}

/// One page of a cursor scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPage {
    /// Cursor the page started at
    pub cursor_in: u64,
    /// Cursor for the next page, `0` when the scan is complete
    pub cursor_out: u64,
    /// Keys on this page
    pub keys: Vec<String>,
}

/// A key listed by a content load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEntry {
    /// The key
    pub key: NKey,
    /// Stored value type, `String` for untyped stores
    pub value_type: ValueType,
    /// Expiry, [`NO_TTL`](crate::NO_TTL) when none or unknown
    pub ttl: Ttl,
}

/// A page of keys loaded from one database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseContent {
    /// Database the keys belong to
    pub database: String,
    /// Glob the keys were matched against
    pub pattern: String,
    /// Requested page size
    pub count: u64,
    /// Cursor the page started at
    pub cursor_in: u64,
    /// Cursor for the next page
    pub cursor_out: u64,
    /// Keys loaded so far
    pub keys: Vec<KeyEntry>,
}

/// Server statistics grouped into named sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// `(section, [(field, value)])` in server order
    pub sections: Vec<(String, Vec<(String, String)>)>,
}

impl ServerInfo {
    /// Parse `# Section` headers followed by `field:value` lines.
    ///
    /// Fields before the first header land in a `Server` section. Blank
    /// and unparseable lines are skipped.
    pub fn parse(text: &str) -> ServerInfo {
        let mut info = ServerInfo::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(section) = line.strip_prefix('#') {
                info.sections.push((section.trim().to_string(), Vec::new()));
                continue;
            }
            if let Some((field, value)) = line.split_once(':') {
                if info.sections.is_empty() {
                    info.sections.push(("Server".to_string(), Vec::new()));
                }
                if let Some((_, fields)) = info.sections.last_mut() {
                    fields.push((field.trim().to_string(), value.trim().to_string()));
                }
            }
        }
        info
    }

    /// Append a field, opening `section` if it is not the current one.
    pub fn push(&mut self, section: &str, field: impl Into<String>, value: impl Into<String>) {
        let open = matches!(self.sections.last(), Some((name, _)) if name == section);
        if !open {
            self.sections.push((section.to_string(), Vec::new()));
        }
        if let Some((_, fields)) = self.sections.last_mut() {
            fields.push((field.into(), value.into()));
        }
    }

    /// Look up a field in any section.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.sections
            .iter()
            .flat_map(|(_, fields)| fields.iter())
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (section, fields) in &self.sections {
            writeln!(f, "# {}", section)?;
            for (field, value) in fields {
                writeln!(f, "{}:{}", field, value)?;
            }
        }
        Ok(())
    }
}

/// A timestamped [`ServerInfo`] sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfoSnapshot {
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
    /// The sample
    pub info: ServerInfo,
}

/// Result of the discovery request issued after connecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    /// Server statistics, when the backend reports any
    pub server_info: Option<ServerInfo>,
    /// Selected database
    pub current_database: DatabaseInfo,
}

/// Key-change notification raised by a command handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyEvent {
    /// A key was written
    Added(NDbKValue),
    /// A key was read
    Loaded(NDbKValue),
    /// Keys were deleted
    Removed(Vec<NKey>),
    /// A key was renamed
    Renamed {
        /// Old key
        key: NKey,
        /// New name
        new_name: String,
    },
    /// A key's expiry was changed
    TtlChanged {
        /// The key
        key: NKey,
        /// New expiry
        ttl: Ttl,
    },
    /// A key's expiry was read
    TtlLoaded {
        /// The key
        key: NKey,
        /// Current expiry
        ttl: Ttl,
    },
    /// Another database was selected
    DatabaseChanged(DatabaseInfo),
    /// The selected database was emptied
    Flushed,
    /// The connection was asked to quit
    Quit,
}
