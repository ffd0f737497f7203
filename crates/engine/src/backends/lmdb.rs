//! LMDB backend over heed
//!
//! The environment directory holds one named LMDB database per logical
//! database. The unnamed main database lists their names.

use std::path::{Path, PathBuf};

use heed::types::{DecodeIgnore, Str};
use heed::{CompactionOption, Database, Env, EnvOpenOptions};
use kvbridge_core::{ConnectionType, DatabaseInfo, Error, Result, ServerInfo};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::embedded::{self, EmbeddedStore};
use crate::backend::Backend;
use crate::connection::NativeConnector;
use crate::registry::CommandRegistry;
use crate::translator::PlainTranslator;

/// Database selected right after connecting.
pub const DEFAULT_DB: &str = "default";

const MIB: usize = 1024 * 1024;

fn native(e: heed::Error) -> Error {
    Error::native(e.to_string())
}

/// Where and how to open an LMDB environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmdbConfig {
    /// Environment directory
    pub path: PathBuf,
    /// Create the directory when it does not exist
    pub create_if_missing: bool,
    /// Database selected after connecting
    pub default_db: String,
    /// Memory map size in MiB
    pub map_size_mb: usize,
    /// Maximum number of named databases
    pub max_dbs: u32,
}

impl Default for LmdbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("kvbridge.lmdb"),
            create_if_missing: true,
            default_db: DEFAULT_DB.to_string(),
            map_size_mb: 64,
            max_dbs: 16,
        }
    }
}

impl LmdbConfig {
    /// Config for `path` with the defaults for everything else.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// An open environment plus the selected database.
pub struct LmdbHandle {
    env: Env,
    db: Database<Str, Str>,
    path: PathBuf,
    selected: String,
    max_dbs: u32,
}

impl LmdbHandle {
    fn open_db(&self, name: &str) -> Result<Database<Str, Str>> {
        let mut wtxn = self.env.write_txn().map_err(native)?;
        let db = self
            .env
            .create_database::<Str, Str>(&mut wtxn, Some(name))
            .map_err(native)?;
        wtxn.commit().map_err(native)?;
        Ok(db)
    }
}

impl EmbeddedStore for LmdbHandle {
    const NAME: &'static str = "lmdb";

    fn put(&mut self, key: &str, value: &str) -> Result<()> {
        let mut wtxn = self.env.write_txn().map_err(native)?;
        self.db.put(&mut wtxn, key, value).map_err(native)?;
        wtxn.commit().map_err(native)
    }

    fn fetch(&mut self, key: &str) -> Result<Option<String>> {
        let rtxn = self.env.read_txn().map_err(native)?;
        let value = self.db.get(&rtxn, key).map_err(native)?;
        Ok(value.map(str::to_string))
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        let mut wtxn = self.env.write_txn().map_err(native)?;
        let existed = self.db.delete(&mut wtxn, key).map_err(native)?;
        wtxn.commit().map_err(native)?;
        Ok(existed)
    }

    fn rename(&mut self, key: &str, new_name: &str) -> Result<bool> {
        let mut wtxn = self.env.write_txn().map_err(native)?;
        let value = match self.db.get(&wtxn, key).map_err(native)? {
            Some(value) => value.to_string(),
            None => return Ok(false),
        };
        self.db.put(&mut wtxn, new_name, &value).map_err(native)?;
        self.db.delete(&mut wtxn, key).map_err(native)?;
        wtxn.commit().map_err(native)?;
        Ok(true)
    }

    fn all_keys(&mut self) -> Result<Vec<String>> {
        let rtxn = self.env.read_txn().map_err(native)?;
        let mut keys = Vec::new();
        for entry in self.db.iter(&rtxn).map_err(native)? {
            let (key, _) = entry.map_err(native)?;
            keys.push(key.to_string());
        }
        Ok(keys)
    }

    fn key_count(&mut self) -> Result<u64> {
        let rtxn = self.env.read_txn().map_err(native)?;
        self.db.len(&rtxn).map_err(native)
    }

    fn clear(&mut self) -> Result<()> {
        let mut wtxn = self.env.write_txn().map_err(native)?;
        self.db.clear(&mut wtxn).map_err(native)?;
        wtxn.commit().map_err(native)
    }

    fn database_names(&mut self) -> Result<Vec<String>> {
        let rtxn = self.env.read_txn().map_err(native)?;
        let main: Option<Database<Str, DecodeIgnore>> =
            self.env.open_database(&rtxn, None).map_err(native)?;
        let mut names = Vec::new();
        if let Some(main) = main {
            for entry in main.iter(&rtxn).map_err(native)? {
                let (name, _) = entry.map_err(native)?;
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn selected(&self) -> &str {
        &self.selected
    }

    fn select(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("empty database name"));
        }
        self.db = self.open_db(name)?;
        self.selected = name.to_string();
        Ok(())
    }

    fn create_database(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("empty database name"));
        }
        self.open_db(name).map(|_| ())
    }

    fn settings(&self) -> Vec<(String, String)> {
        vec![
            ("path".to_string(), self.path.display().to_string()),
            ("map_size".to_string(), self.env.info().map_size.to_string()),
            ("max_dbs".to_string(), self.max_dbs.to_string()),
            ("max_readers".to_string(), self.env.info().maximum_number_of_readers.to_string()),
        ]
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

/// Opens LMDB environments.
#[derive(Debug, Default, Clone, Copy)]
pub struct LmdbConnector;

impl NativeConnector for LmdbConnector {
    type Config = LmdbConfig;
    type Handle = LmdbHandle;

    fn open(&mut self, config: &LmdbConfig) -> Result<LmdbHandle> {
        if !config.path.is_dir() {
            if !config.create_if_missing {
                return Err(Error::invalid_argument(format!(
                    "Invalid input path({})",
                    config.path.display()
                )));
            }
            std::fs::create_dir_all(&config.path)?;
        }
        // SAFETY: the environment is opened once per connection and the
        // file is not truncated or opened twice by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(config.map_size_mb.max(1) * MIB)
                .max_dbs(config.max_dbs)
                .open(&config.path)
        }
        .map_err(native)?;

        let mut wtxn = env.write_txn().map_err(native)?;
        let db = env
            .create_database::<Str, Str>(&mut wtxn, Some(&config.default_db))
            .map_err(native)?;
        wtxn.commit().map_err(native)?;

        debug!(target: "kvbridge::conn", path = %config.path.display(), "lmdb environment opened");
        Ok(LmdbHandle {
            env,
            db,
            path: config.path.clone(),
            selected: config.default_db.clone(),
            max_dbs: config.max_dbs,
        })
    }

    fn close(&mut self, handle: LmdbHandle) -> Result<()> {
        drop(handle);
        Ok(())
    }

    fn is_open(&self, _handle: &LmdbHandle) -> bool {
        true
    }
}

static REGISTRY: Lazy<CommandRegistry<LmdbHandle>> = Lazy::new(embedded::commands::<LmdbHandle>);

/// The LMDB backend.
pub struct Lmdb;

impl Backend for Lmdb {
    type Connector = LmdbConnector;
    type Translator = PlainTranslator;
    const CONNECTION_TYPE: ConnectionType = ConnectionType::Lmdb;

    fn translator() -> PlainTranslator {
        PlainTranslator::new("LMDB")
    }

    fn registry() -> &'static CommandRegistry<LmdbHandle> {
        &REGISTRY
    }

    fn current_database(handle: &mut LmdbHandle) -> Result<DatabaseInfo> {
        embedded::current_database(handle)
    }

    fn databases(handle: &mut LmdbHandle) -> Result<Vec<DatabaseInfo>> {
        embedded::databases(handle)
    }

    fn server_info(handle: &mut LmdbHandle) -> Result<ServerInfo> {
        let mut info = embedded::stats(handle, LmdbHandle::NAME)?;
        let env = handle.env.info();
        info.push("Environment", "map_size", env.map_size.to_string());
        info.push("Environment", "last_txn_id", env.last_txn_id.to_string());
        info.push("Environment", "number_of_readers", env.number_of_readers.to_string());
        Ok(info)
    }

    fn backup(handle: &mut LmdbHandle, path: &Path) -> Result<()> {
        handle
            .env
            .copy_to_file(path, CompactionOption::Enabled)
            .map_err(native)?;
        Ok(())
    }

    fn export(handle: &mut LmdbHandle, path: &Path) -> Result<()> {
        embedded::export_json(handle, path)
    }

    fn properties(handle: &mut LmdbHandle) -> Result<Vec<(String, String)>> {
        Ok(handle.settings())
    }
}
