//! Backend selection
//!
//! [`BackendConfig`] is the tagged configuration a settings provider hands
//! over; [`AnyDriver`] is the matching driver. Every driver call the
//! pipeline needs is dispatched through one `match`.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use kvbridge_core::{
    CommandLoggingType, ConnectionType, DatabaseContent, DatabaseInfo, DiscoveryInfo, NDbKValue,
    NKey, NValue, NodeId, Result, ResultTree, ServerInfo, Ttl, ValueType,
};
#[cfg(feature = "lmdb")]
use kvbridge_engine::backends::{Lmdb, LmdbConfig};
use kvbridge_engine::backends::{Memcached, MemcachedConfig, Redb, RedbConfig, Redis, RedisConfig};
use kvbridge_engine::{Driver, DriverEvent, DriverOptions, EngineConfig, ScriptOptions};
use serde::{Deserialize, Serialize};

/// Which backend to talk to, and how.
///
/// ```toml
/// [backend]
/// type = "redis"
/// host = "127.0.0.1"
/// port = 6379
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Redis server
    Redis(RedisConfig),
    /// memcached server
    Memcached(MemcachedConfig),
    /// redb file
    Redb(RedbConfig),
    /// LMDB environment
    #[cfg(feature = "lmdb")]
    Lmdb(LmdbConfig),
}

impl BackendConfig {
    /// Backend this config selects.
    pub fn connection_type(&self) -> ConnectionType {
        match self {
            BackendConfig::Redis(_) => ConnectionType::Redis,
            BackendConfig::Memcached(_) => ConnectionType::Memcached,
            BackendConfig::Redb(_) => ConnectionType::Redb,
            #[cfg(feature = "lmdb")]
            BackendConfig::Lmdb(_) => ConnectionType::Lmdb,
        }
    }
}

/// One named connection as supplied by the settings provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Display name; also names the worker thread and the history file
    pub name: String,
    /// Separator between rendered array elements
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Namespace separator for listed keys
    #[serde(default = "default_ns_separator")]
    pub ns_separator: String,
    /// Commands run as `Inner` right after connecting
    #[serde(default)]
    pub startup_commands: Vec<String>,
    /// Backend selection
    pub backend: BackendConfig,
}

fn default_delimiter() -> String {
    "\n".to_string()
}

fn default_ns_separator() -> String {
    ":".to_string()
}

impl ConnectionSettings {
    /// Settings with default delimiters and no startup commands.
    pub fn new(name: impl Into<String>, backend: BackendConfig) -> Self {
        Self {
            name: name.into(),
            delimiter: default_delimiter(),
            ns_separator: default_ns_separator(),
            startup_commands: Vec::new(),
            backend,
        }
    }

    /// Driver options for these settings under `engine`.
    pub fn driver_options(&self, engine: &EngineConfig) -> DriverOptions {
        DriverOptions {
            delimiter: self.delimiter.clone(),
            ns_separator: self.ns_separator.clone(),
            default_scan_count: engine.default_scan_count,
        }
    }
}

/// A driver for whichever backend the settings selected, plus its config.
pub enum AnyDriver {
    /// Redis
    Redis(Driver<Redis>, RedisConfig),
    /// memcached
    Memcached(Driver<Memcached>, MemcachedConfig),
    /// redb
    Redb(Driver<Redb>, RedbConfig),
    /// LMDB
    #[cfg(feature = "lmdb")]
    Lmdb(Driver<Lmdb>, LmdbConfig),
}

macro_rules! dispatch {
    ($self:expr, $driver:ident => $body:expr) => {
        match $self {
            AnyDriver::Redis($driver, _) => $body,
            AnyDriver::Memcached($driver, _) => $body,
            AnyDriver::Redb($driver, _) => $body,
            #[cfg(feature = "lmdb")]
            AnyDriver::Lmdb($driver, _) => $body,
        }
    };
}

impl AnyDriver {
    /// A disconnected driver for `backend`.
    pub fn new(backend: &BackendConfig, options: DriverOptions) -> Self {
        match backend {
            BackendConfig::Redis(c) => AnyDriver::Redis(Driver::new(options), c.clone()),
            BackendConfig::Memcached(c) => AnyDriver::Memcached(Driver::new(options), c.clone()),
            BackendConfig::Redb(c) => AnyDriver::Redb(Driver::new(options), c.clone()),
            #[cfg(feature = "lmdb")]
            BackendConfig::Lmdb(c) => AnyDriver::Lmdb(Driver::new(options), c.clone()),
        }
    }

    /// Connect with the stored config.
    pub fn connect(&mut self) -> Result<()> {
        match self {
            AnyDriver::Redis(driver, config) => driver.connect(config),
            AnyDriver::Memcached(driver, config) => driver.connect(config),
            AnyDriver::Redb(driver, config) => driver.connect(config),
            #[cfg(feature = "lmdb")]
            AnyDriver::Lmdb(driver, config) => driver.connect(config),
        }
    }

    /// Close the connection.
    pub fn disconnect(&mut self) -> Result<()> {
        dispatch!(self, d => d.disconnect())
    }

    /// Whether a native handle is open.
    pub fn is_connected(&self) -> bool {
        dispatch!(self, d => d.is_connected())
    }

    /// Backend this driver talks to.
    pub fn connection_type(&self) -> ConnectionType {
        dispatch!(self, d => d.connection_type())
    }

    /// Flag shared with callers for cooperative interruption.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        dispatch!(self, d => d.interrupt_flag())
    }

    /// See [`Driver::clear_interrupt`].
    pub fn clear_interrupt(&self) {
        dispatch!(self, d => d.clear_interrupt())
    }

    /// See [`Driver::is_interrupted`].
    pub fn is_interrupted(&self) -> bool {
        dispatch!(self, d => d.is_interrupted())
    }

    /// Drain driver notifications.
    pub fn take_events(&mut self) -> Vec<DriverEvent> {
        dispatch!(self, d => d.take_events())
    }

    /// Run one command line into `tree` under `parent`.
    pub fn execute(
        &mut self,
        tree: &mut ResultTree,
        parent: NodeId,
        line: &str,
        logging: CommandLoggingType,
    ) -> Result<NodeId> {
        dispatch!(self, d => d.execute(tree, parent, line, logging))
    }

    /// Run a script into `tree`.
    pub fn execute_script(
        &mut self,
        tree: &mut ResultTree,
        text: &str,
        options: &ScriptOptions,
        progress: &mut dyn FnMut(u8),
    ) -> Result<()> {
        dispatch!(self, d => d.execute_script(tree, text, options, progress))
    }

    /// Run one engine-issued command.
    pub fn run_inner(&mut self, line: &str) -> Result<NValue> {
        dispatch!(self, d => d.run_inner(line))
    }

    /// See [`Driver::create_key`].
    pub fn create_key(&mut self, kv: &NDbKValue) -> Result<()> {
        dispatch!(self, d => d.create_key(kv))
    }

    /// See [`Driver::load_key`].
    pub fn load_key(&mut self, key: &NKey, ty: ValueType) -> Result<NDbKValue> {
        dispatch!(self, d => d.load_key(key, ty))
    }

    /// Delete keys, returning those removed.
    pub fn delete_keys(&mut self, keys: &[NKey]) -> Result<Vec<NKey>> {
        dispatch!(self, d => d.delete_keys(keys))
    }

    /// See [`Driver::rename_key`].
    pub fn rename_key(&mut self, key: &NKey, new_name: &str) -> Result<()> {
        dispatch!(self, d => d.rename_key(key, new_name))
    }

    /// See [`Driver::change_ttl`].
    pub fn change_ttl(&mut self, key: &NKey, ttl: Ttl) -> Result<()> {
        dispatch!(self, d => d.change_ttl(key, ttl))
    }

    /// See [`Driver::load_database_content`].
    pub fn load_database_content(&mut self, content: &mut DatabaseContent) -> Result<()> {
        dispatch!(self, d => d.load_database_content(content))
    }

    /// See [`Driver::databases`].
    pub fn databases(&mut self) -> Result<Vec<DatabaseInfo>> {
        dispatch!(self, d => d.databases())
    }

    /// See [`Driver::set_default_database`].
    pub fn set_default_database(&mut self, name: &str) -> Result<DatabaseInfo> {
        dispatch!(self, d => d.set_default_database(name))
    }

    /// See [`Driver::remove_all_keys`].
    pub fn remove_all_keys(&mut self) -> Result<()> {
        dispatch!(self, d => d.remove_all_keys())
    }

    /// See [`Driver::server_info`].
    pub fn server_info(&mut self) -> Result<ServerInfo> {
        dispatch!(self, d => d.server_info())
    }

    /// See [`Driver::discovery_info`].
    pub fn discovery_info(&mut self) -> Result<DiscoveryInfo> {
        dispatch!(self, d => d.discovery_info())
    }

    /// See [`Driver::backup`].
    pub fn backup(&mut self, path: &Path) -> Result<()> {
        dispatch!(self, d => d.backup(path))
    }

    /// See [`Driver::export`].
    pub fn export(&mut self, path: &Path) -> Result<()> {
        dispatch!(self, d => d.export(path))
    }

    /// See [`Driver::properties`].
    pub fn properties(&mut self) -> Result<Vec<(String, String)>> {
        dispatch!(self, d => d.properties())
    }

    /// See [`Driver::set_property`].
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<()> {
        dispatch!(self, d => d.set_property(name, value))
    }

    /// See [`Driver::change_password`].
    pub fn change_password(&mut self, old: &str, new: &str) -> Result<()> {
        dispatch!(self, d => d.change_password(old, new))
    }

    /// See [`Driver::set_max_connections`].
    pub fn set_max_connections(&mut self, max: u32) -> Result<()> {
        dispatch!(self, d => d.set_max_connections(max))
    }

    /// Stop the server and disconnect.
    pub fn shutdown(&mut self) -> Result<()> {
        dispatch!(self, d => d.shutdown())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_config_is_tagged() {
        let toml_text = r#"
            name = "cache"
            [backend]
            type = "memcached"
            port = 11311
        "#;
        let settings: ConnectionSettings = toml::from_str(toml_text).unwrap();
        assert_eq!(settings.delimiter, "\n");
        assert!(settings.startup_commands.is_empty());
        match &settings.backend {
            BackendConfig::Memcached(c) => {
                assert_eq!(c.port, 11311);
                assert_eq!(c.host, "127.0.0.1");
            }
            other => panic!("unexpected backend {:?}", other),
        }
        assert_eq!(settings.backend.connection_type(), ConnectionType::Memcached);
    }

    #[test]
    fn test_any_driver_matches_config() {
        let backend = BackendConfig::Redb(RedbConfig::new("/tmp/never-opened.redb"));
        let driver = AnyDriver::new(&backend, DriverOptions::default());
        assert_eq!(driver.connection_type(), ConnectionType::Redb);
        assert!(!driver.is_connected());
    }
}
