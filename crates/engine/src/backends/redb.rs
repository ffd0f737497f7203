//! redb backend
//!
//! One redb file per connection. Each table is a database; the selected
//! table receives every key command. Keys and values are UTF-8 strings.

use std::path::{Path, PathBuf};

use ::redb::{Database, ReadableTable, TableDefinition, TableError, TableHandle};
use kvbridge_core::{ConnectionType, DatabaseInfo, Error, Result, ServerInfo};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::embedded::{self, EmbeddedStore};
use crate::backend::Backend;
use crate::connection::NativeConnector;
use crate::registry::CommandRegistry;
use crate::translator::PlainTranslator;

/// Table selected right after connecting.
pub const DEFAULT_TABLE: &str = "default";

fn native(e: impl Into<::redb::Error>) -> Error {
    Error::native(e.into().to_string())
}

/// Where and how to open a redb file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedbConfig {
    /// Database file
    pub path: PathBuf,
    /// Create the file when it does not exist
    pub create_if_missing: bool,
    /// Table selected after connecting
    pub default_table: String,
}

impl Default for RedbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("kvbridge.redb"),
            create_if_missing: true,
            default_table: DEFAULT_TABLE.to_string(),
        }
    }
}

impl RedbConfig {
    /// Config for `path` with the defaults for everything else.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// An open redb file plus the selected table.
pub struct RedbHandle {
    db: Database,
    path: PathBuf,
    selected: String,
}

impl RedbHandle {
    fn table(&self) -> TableDefinition<'_, &'static str, &'static str> {
        TableDefinition::new(&self.selected)
    }

    fn ensure_table(&self, name: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(native)?;
        txn.open_table(TableDefinition::<&str, &str>::new(name))
            .map_err(native)?;
        txn.commit().map_err(native)
    }
}

impl EmbeddedStore for RedbHandle {
    const NAME: &'static str = "redb";

    fn put(&mut self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(native)?;
        {
            let mut table = txn.open_table(self.table()).map_err(native)?;
            table.insert(key, value).map_err(native)?;
        }
        txn.commit().map_err(native)
    }

    fn fetch(&mut self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read().map_err(native)?;
        let table = match txn.open_table(self.table()) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(native(e)),
        };
        let value = table.get(key).map_err(native)?;
        Ok(value.map(|guard| guard.value().to_string()))
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write().map_err(native)?;
        let existed = {
            let mut table = txn.open_table(self.table()).map_err(native)?;
            let removed = table.remove(key).map_err(native)?;
            removed.is_some()
        };
        txn.commit().map_err(native)?;
        Ok(existed)
    }

    fn rename(&mut self, key: &str, new_name: &str) -> Result<bool> {
        let txn = self.db.begin_write().map_err(native)?;
        let moved = {
            let mut table = txn.open_table(self.table()).map_err(native)?;
            let value = table
                .remove(key)
                .map_err(native)?
                .map(|guard| guard.value().to_string());
            if let Some(value) = &value {
                table.insert(new_name, value.as_str()).map_err(native)?;
            }
            value.is_some()
        };
        if moved {
            txn.commit().map_err(native)?;
        } else {
            txn.abort().map_err(native)?;
        }
        Ok(moved)
    }

    fn all_keys(&mut self) -> Result<Vec<String>> {
        let txn = self.db.begin_read().map_err(native)?;
        let table = match txn.open_table(self.table()) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(native(e)),
        };
        let mut keys = Vec::new();
        for entry in table.iter().map_err(native)? {
            let (key, _) = entry.map_err(native)?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }

    fn clear(&mut self) -> Result<()> {
        let txn = self.db.begin_write().map_err(native)?;
        txn.delete_table(self.table()).map_err(native)?;
        txn.open_table(self.table()).map_err(native)?;
        txn.commit().map_err(native)
    }

    fn database_names(&mut self) -> Result<Vec<String>> {
        let txn = self.db.begin_read().map_err(native)?;
        let tables = txn.list_tables().map_err(native)?;
        Ok(tables.map(|t| t.name().to_string()).collect())
    }

    fn selected(&self) -> &str {
        &self.selected
    }

    fn select(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("empty table name"));
        }
        self.ensure_table(name)?;
        self.selected = name.to_string();
        Ok(())
    }

    fn create_database(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("empty table name"));
        }
        self.ensure_table(name)
    }

    fn settings(&self) -> Vec<(String, String)> {
        vec![
            ("path".to_string(), self.path.display().to_string()),
            ("default_table".to_string(), self.selected.clone()),
        ]
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

/// Opens redb files.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedbConnector;

impl NativeConnector for RedbConnector {
    type Config = RedbConfig;
    type Handle = RedbHandle;

    fn open(&mut self, config: &RedbConfig) -> Result<RedbHandle> {
        if !config.create_if_missing && !config.path.exists() {
            return Err(Error::invalid_argument(format!(
                "Invalid input path({})",
                config.path.display()
            )));
        }
        let db = Database::create(&config.path).map_err(native)?;
        let handle = RedbHandle {
            db,
            path: config.path.clone(),
            selected: config.default_table.clone(),
        };
        handle.ensure_table(&config.default_table)?;
        debug!(target: "kvbridge::conn", path = %config.path.display(), "redb file opened");
        Ok(handle)
    }

    fn close(&mut self, handle: RedbHandle) -> Result<()> {
        drop(handle);
        Ok(())
    }

    fn is_open(&self, _handle: &RedbHandle) -> bool {
        true
    }
}

static REGISTRY: Lazy<CommandRegistry<RedbHandle>> = Lazy::new(embedded::commands::<RedbHandle>);

/// The redb backend.
pub struct Redb;

impl Backend for Redb {
    type Connector = RedbConnector;
    type Translator = PlainTranslator;
    const CONNECTION_TYPE: ConnectionType = ConnectionType::Redb;

    fn translator() -> PlainTranslator {
        PlainTranslator::new("redb")
    }

    fn registry() -> &'static CommandRegistry<RedbHandle> {
        &REGISTRY
    }

    fn current_database(handle: &mut RedbHandle) -> Result<DatabaseInfo> {
        embedded::current_database(handle)
    }

    fn databases(handle: &mut RedbHandle) -> Result<Vec<DatabaseInfo>> {
        embedded::databases(handle)
    }

    fn server_info(handle: &mut RedbHandle) -> Result<ServerInfo> {
        embedded::stats(handle, RedbHandle::NAME)
    }

    fn backup(handle: &mut RedbHandle, path: &Path) -> Result<()> {
        std::fs::copy(&handle.path, path)?;
        Ok(())
    }

    fn export(handle: &mut RedbHandle, path: &Path) -> Result<()> {
        embedded::export_json(handle, path)
    }

    fn properties(handle: &mut RedbHandle) -> Result<Vec<(String, String)>> {
        Ok(handle.settings())
    }
}
