//! The capability bundle one backend plugs into the engine

use std::path::Path;

use kvbridge_core::{ConnectionType, DatabaseInfo, Error, Result, ServerInfo, ValueType};

use crate::connection::NativeConnector;
use crate::registry::CommandRegistry;
use crate::translator::CommandTranslator;

/// Native handle type of backend `B`.
pub type Handle<B> = <<B as Backend>::Connector as NativeConnector>::Handle;

/// Native configuration type of backend `B`.
pub type Config<B> = <<B as Backend>::Connector as NativeConnector>::Config;

/// Everything the [`Driver`](crate::Driver) needs from a backend.
///
/// Optional capabilities default to `Unsupported`.
pub trait Backend: Send + 'static {
    /// Opens and closes native handles
    type Connector: NativeConnector;
    /// Builds native command lines
    type Translator: CommandTranslator;

    /// Backend family
    const CONNECTION_TYPE: ConnectionType;

    /// The backend's translator.
    fn translator() -> Self::Translator;

    /// The backend's command table.
    fn registry() -> &'static CommandRegistry<Handle<Self>>;

    /// Whether the handle passed any secondary authentication step.
    fn is_authenticated(_handle: &Handle<Self>) -> bool {
        true
    }

    /// The selected database.
    fn current_database(handle: &mut Handle<Self>) -> Result<DatabaseInfo>;

    /// Every database the server exposes.
    fn databases(handle: &mut Handle<Self>) -> Result<Vec<DatabaseInfo>> {
        Ok(vec![Self::current_database(handle)?])
    }

    /// Stored type of `key`; untyped stores report `String`.
    fn key_type(_handle: &mut Handle<Self>, _key: &str) -> Result<ValueType> {
        Ok(ValueType::String)
    }

    /// Server statistics.
    fn server_info(_handle: &mut Handle<Self>) -> Result<ServerInfo> {
        Err(Error::unsupported_verb(Self::CONNECTION_TYPE, "ServerInfo"))
    }

    /// Copy the store to `path`.
    fn backup(_handle: &mut Handle<Self>, _path: &Path) -> Result<()> {
        Err(Error::unsupported_verb(Self::CONNECTION_TYPE, "Backup"))
    }

    /// Write every key and value of the selected database to `path`.
    fn export(_handle: &mut Handle<Self>, _path: &Path) -> Result<()> {
        Err(Error::unsupported_verb(Self::CONNECTION_TYPE, "Export"))
    }

    /// Server configuration properties.
    fn properties(_handle: &mut Handle<Self>) -> Result<Vec<(String, String)>> {
        Err(Error::unsupported_verb(Self::CONNECTION_TYPE, "ServerPropertyGet"))
    }

    /// Change one server configuration property.
    fn set_property(_handle: &mut Handle<Self>, _name: &str, _value: &str) -> Result<()> {
        Err(Error::unsupported_verb(Self::CONNECTION_TYPE, "ServerPropertySet"))
    }

    /// Change the server password.
    fn change_password(_handle: &mut Handle<Self>, _old: &str, _new: &str) -> Result<()> {
        Err(Error::unsupported_verb(Self::CONNECTION_TYPE, "ChangePassword"))
    }

    /// Change the server's client limit.
    fn set_max_connections(_handle: &mut Handle<Self>, _max: u32) -> Result<()> {
        Err(Error::unsupported_verb(Self::CONNECTION_TYPE, "SetMaxConnections"))
    }

    /// Ask the server process to stop.
    fn shutdown(_handle: &mut Handle<Self>) -> Result<()> {
        Err(Error::unsupported_verb(Self::CONNECTION_TYPE, "ShutDown"))
    }
}
