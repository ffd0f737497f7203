//! Request types posted to a [`Server`](crate::Server)
//!
//! A request is pure data: an initiator identity, an optional error
//! propagated from an earlier step, and one [`Verb`] with its payload.

use std::fmt;
use std::path::PathBuf;

use kvbridge_core::{Error, NDbKValue, NKey, Ttl, ValueType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of whoever posted a request; echoed on every event it causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Initiator(Uuid);

impl Initiator {
    /// A fresh random identity.
    pub fn new() -> Self {
        Initiator(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for Initiator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Initiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Every operation the pipeline runs.
///
/// | Verb | Output on success |
/// |------|-------------------|
/// | `Connect`, `Disconnect`, `ShutDown` | `Unit` |
/// | `DiscoveryInfo` | `Discovery` |
/// | `Execute`, `ProcessConfigArgs` | `Tree` |
/// | `LoadDatabases` | `Databases` |
/// | `LoadDatabaseContent` | `Content` |
/// | `SetDefaultDatabase` | `Database` |
/// | `LoadKey` | `Key` |
/// | `DeleteKeys` | `Keys` (the keys actually removed) |
/// | `ServerInfo` | `ServerInfo` |
/// | `ServerInfoHistory` | `History` |
/// | `ServerPropertyGet` | `Properties` |
/// | everything else | `Unit` |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Verb {
    /// Open the connection
    Connect,
    /// Close the connection
    Disconnect,
    /// Server info and selected database; posted by the worker after connecting
    DiscoveryInfo,
    /// Run the connection's startup commands; posted by the worker after connecting
    ProcessConfigArgs,
    /// Run a newline-separated script
    Execute {
        /// Script text
        text: String,
        /// Extra rounds after the first
        #[serde(default)]
        repeat: usize,
        /// Minimum milliseconds between the starts of two rounds
        #[serde(default)]
        msec_repeat_interval: u64,
        /// Do not record the commands in the result tree
        #[serde(default)]
        silence: bool,
        /// Report each command as `CommandLogged`
        #[serde(default)]
        history: bool,
    },
    /// List databases
    LoadDatabases,
    /// Page through the keys of the selected database
    LoadDatabaseContent {
        /// Glob the keys must match
        pattern: String,
        /// Page size
        count: u64,
        /// Cursor from the previous page, `0` to start
        cursor: u64,
    },
    /// Select another database
    SetDefaultDatabase {
        /// Database name
        name: String,
    },
    /// Store a key
    CreateKey {
        /// Key, value and TTL
        key: NDbKValue,
    },
    /// Read a key
    LoadKey {
        /// The key
        key: NKey,
        /// Type the key is expected to hold
        value_type: ValueType,
    },
    /// Delete keys
    DeleteKeys {
        /// Keys to delete
        keys: Vec<NKey>,
    },
    /// Rename a key
    RenameKey {
        /// The key
        key: NKey,
        /// New name
        new_name: String,
    },
    /// Change a key's expiry
    ChangeTtl {
        /// The key
        key: NKey,
        /// New expiry, `NO_TTL` to persist
        ttl: Ttl,
    },
    /// Empty the selected database
    RemoveAllKeys,
    /// Server statistics
    ServerInfo,
    /// Stored server-info samples
    ServerInfoHistory,
    /// Delete stored server-info samples
    ClearHistory,
    /// Server configuration properties
    ServerPropertyGet,
    /// Change one server property
    ServerPropertySet {
        /// Property name
        name: String,
        /// New value
        value: String,
    },
    /// Change the server password
    ChangePassword {
        /// Current password
        old: String,
        /// New password
        new: String,
    },
    /// Change the server's client limit
    SetMaxConnections {
        /// New limit
        max: u32,
    },
    /// Copy the store to a file
    Backup {
        /// Destination
        path: PathBuf,
    },
    /// Write all pairs of the selected database to a file
    Export {
        /// Destination
        path: PathBuf,
    },
    /// Ask the server process to stop
    ShutDown,
}

impl Verb {
    /// An `Execute` with default script options.
    pub fn execute(text: impl Into<String>) -> Self {
        Verb::Execute {
            text: text.into(),
            repeat: 0,
            msec_repeat_interval: 0,
            silence: false,
            history: false,
        }
    }

    /// Name used in logs and `Unsupported` messages.
    pub fn name(&self) -> &'static str {
        match self {
            Verb::Connect => "Connect",
            Verb::Disconnect => "Disconnect",
            Verb::DiscoveryInfo => "DiscoveryInfo",
            Verb::ProcessConfigArgs => "ProcessConfigArgs",
            Verb::Execute { .. } => "Execute",
            Verb::LoadDatabases => "LoadDatabases",
            Verb::LoadDatabaseContent { .. } => "LoadDatabaseContent",
            Verb::SetDefaultDatabase { .. } => "SetDefaultDatabase",
            Verb::CreateKey { .. } => "CreateKey",
            Verb::LoadKey { .. } => "LoadKey",
            Verb::DeleteKeys { .. } => "DeleteKeys",
            Verb::RenameKey { .. } => "RenameKey",
            Verb::ChangeTtl { .. } => "ChangeTtl",
            Verb::RemoveAllKeys => "RemoveAllKeys",
            Verb::ServerInfo => "ServerInfo",
            Verb::ServerInfoHistory => "ServerInfoHistory",
            Verb::ClearHistory => "ClearHistory",
            Verb::ServerPropertyGet => "ServerPropertyGet",
            Verb::ServerPropertySet { .. } => "ServerPropertySet",
            Verb::ChangePassword { .. } => "ChangePassword",
            Verb::SetMaxConnections { .. } => "SetMaxConnections",
            Verb::Backup { .. } => "Backup",
            Verb::Export { .. } => "Export",
            Verb::ShutDown => "ShutDown",
        }
    }
}

/// One unit of work for the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Who asked
    pub initiator: Initiator,
    /// Error from an earlier step; the worker answers with it unchanged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
    /// What to do
    pub verb: Verb,
}

impl Request {
    /// A request from a fresh initiator.
    pub fn new(verb: Verb) -> Self {
        Self::from_initiator(Initiator::new(), verb)
    }

    /// A request on behalf of `initiator`.
    pub fn from_initiator(initiator: Initiator, verb: Verb) -> Self {
        Self {
            initiator,
            error: None,
            verb,
        }
    }

    /// Carry `error` instead of running the verb.
    pub fn with_error(mut self, error: Error) -> Self {
        self.error = Some(error);
        self
    }
}
