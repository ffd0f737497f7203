//! Command set shared by the embedded stores
//!
//! redb and LMDB both expose named databases of string keys and string
//! values. They implement [`EmbeddedStore`] and get the same command
//! table:
//!
//! | Command | Reply |
//! |---------|-------|
//! | `HELP [command]` | command list or one command's help |
//! | `INFO` | store statistics |
//! | `CONFIG GET <glob>` | matching `name value` pairs |
//! | `CREATEDB <name>` | `OK` |
//! | `SCAN <cursor> [MATCH p] [COUNT n]` | `[cursor, [keys]]` |
//! | `KEYS <start> <end> <limit>` | keys strictly between the bounds |
//! | `DBKCOUNT` | number of keys |
//! | `FLUSHDB` | `OK` |
//! | `SELECT <name>` | `OK` |
//! | `SET <key> <value>` | `OK` |
//! | `GET <key>` | value |
//! | `RENAME <key> <new>` | `OK` |
//! | `DEL <key> [key ...]` | number of keys removed |
//! | `QUIT` | `OK` |

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use kvbridge_core::{
    DatabaseInfo, Error, KeyEvent, NDbKValue, NKey, NValue, Result, ServerInfo,
};

use crate::glob::{glob_match, keys_in_range, parse_number, parse_scan_args, scan_keys};
use crate::registry::{CommandContext, CommandHolder, CommandRegistry, INFINITE_ARGS};

/// Storage primitives of an embedded key-value store.
pub trait EmbeddedStore: Send + 'static {
    /// Store name reported by `INFO`
    const NAME: &'static str;

    /// Write a key in the selected database.
    fn put(&mut self, key: &str, value: &str) -> Result<()>;

    /// Read a key from the selected database.
    fn fetch(&mut self, key: &str) -> Result<Option<String>>;

    /// Delete a key; returns whether it existed.
    fn remove(&mut self, key: &str) -> Result<bool>;

    /// Move a value to `new_name` in one write transaction; returns whether
    /// `key` existed.
    fn rename(&mut self, key: &str, new_name: &str) -> Result<bool>;

    /// Every key of the selected database in ascending order.
    fn all_keys(&mut self) -> Result<Vec<String>>;

    /// Number of keys in the selected database.
    fn key_count(&mut self) -> Result<u64> {
        Ok(self.all_keys()?.len() as u64)
    }

    /// Delete every key of the selected database.
    fn clear(&mut self) -> Result<()>;

    /// Names of every database in the store.
    fn database_names(&mut self) -> Result<Vec<String>>;

    /// Name of the selected database.
    fn selected(&self) -> &str;

    /// Select a database, creating it if needed.
    fn select(&mut self, name: &str) -> Result<()>;

    /// Create an empty database.
    fn create_database(&mut self, name: &str) -> Result<()>;

    /// Store configuration as `name value` pairs.
    fn settings(&self) -> Vec<(String, String)>;

    /// Location of the store on disk.
    fn location(&self) -> &Path;
}

// =============================================================================
// Capabilities shared by the embedded backends
// =============================================================================

/// The selected database with its key count.
pub fn current_database<H: EmbeddedStore>(handle: &mut H) -> Result<DatabaseInfo> {
    let count = handle.key_count()?;
    Ok(DatabaseInfo::new(handle.selected(), Some(count), true))
}

/// Every database; only the selected one carries a key count.
pub fn databases<H: EmbeddedStore>(handle: &mut H) -> Result<Vec<DatabaseInfo>> {
    let selected = handle.selected().to_string();
    let count = handle.key_count()?;
    let mut names = handle.database_names()?;
    if !names.contains(&selected) {
        names.push(selected.clone());
    }
    Ok(names
        .into_iter()
        .map(|name| {
            if name == selected {
                DatabaseInfo::new(name, Some(count), true)
            } else {
                DatabaseInfo::new(name, None, false)
            }
        })
        .collect())
}

/// Statistics: store path, selected database and key counts.
pub fn stats<H: EmbeddedStore>(handle: &mut H, backend: &str) -> Result<ServerInfo> {
    let mut info = ServerInfo::default();
    info.push("Server", "backend", backend);
    info.push("Server", "path", handle.location().display().to_string());
    info.push("Keyspace", "selected_db", handle.selected());
    info.push("Keyspace", "databases", handle.database_names()?.len().to_string());
    info.push("Keyspace", "keys", handle.key_count()?.to_string());
    Ok(info)
}

/// Write the selected database to `path` as one JSON object.
pub fn export_json<H: EmbeddedStore>(handle: &mut H, path: &Path) -> Result<()> {
    let mut object = serde_json::Map::new();
    for key in handle.all_keys()? {
        if let Some(value) = handle.fetch(&key)? {
            object.insert(key, serde_json::Value::String(value));
        }
    }
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, &serde_json::Value::Object(object))
        .map_err(|e| Error::Io {
            reason: e.to_string(),
        })?;
    out.flush()?;
    Ok(())
}

// =============================================================================
// Command table
// =============================================================================

/// The shared command table for store type `H`.
pub fn commands<H: EmbeddedStore>() -> CommandRegistry<H> {
    CommandRegistry::new(vec![
        CommandHolder::new("HELP", "[command]", "Return how to use a command", "0.1.0", "HELP GET", 0, 1, help::<H>),
        CommandHolder::new("INFO", "", "Return store statistics", "0.1.0", "INFO", 0, 0, info::<H>),
        CommandHolder::new("CONFIG GET", "<glob>", "Read store settings", "0.1.0", "CONFIG GET *", 1, 0, config_get::<H>),
        CommandHolder::new("CREATEDB", "<name>", "Create a database", "0.1.0", "CREATEDB users", 1, 0, create_db::<H>),
        CommandHolder::new(
            "SCAN",
            "<cursor> [MATCH pattern] [COUNT count]",
            "Incrementally iterate the keys",
            "0.1.0",
            "SCAN 0 MATCH user:* COUNT 10",
            1,
            4,
            scan::<H>,
        ),
        CommandHolder::new(
            "KEYS",
            "<key_start> <key_end> <limit>",
            "Keys strictly between two bounds",
            "0.1.0",
            "KEYS a z 10",
            3,
            0,
            keys::<H>,
        ),
        CommandHolder::new("DBKCOUNT", "", "Number of keys in the selected database", "0.1.0", "DBKCOUNT", 0, 0, key_count::<H>),
        CommandHolder::new("FLUSHDB", "", "Remove every key of the selected database", "0.1.0", "FLUSHDB", 0, 0, flush_db::<H>),
        CommandHolder::new("SELECT", "<name>", "Select a database", "0.1.0", "SELECT users", 1, 0, select::<H>),
        CommandHolder::new("SET", "<key> <value>", "Set the value of a key", "0.1.0", "SET name alice", 2, 0, set::<H>),
        CommandHolder::new("GET", "<key>", "Get the value of a key", "0.1.0", "GET name", 1, 0, get::<H>),
        CommandHolder::new("RENAME", "<key> <newkey>", "Rename a key", "0.1.0", "RENAME name nick", 2, 0, rename::<H>),
        CommandHolder::new("DEL", "<key> [key ...]", "Delete keys", "0.1.0", "DEL name", 1, INFINITE_ARGS, del::<H>),
        CommandHolder::new("QUIT", "", "Close the connection", "0.1.0", "QUIT", 0, 0, quit::<H>),
    ])
}

fn ok() -> NValue {
    NValue::String("OK".to_string())
}

fn help<H: EmbeddedStore>(ctx: &mut CommandContext<'_, H>, args: &[String]) -> Result<NValue> {
    ctx.registry().help(args)
}

fn info<H: EmbeddedStore>(ctx: &mut CommandContext<'_, H>, _args: &[String]) -> Result<NValue> {
    let info = stats(ctx.handle, H::NAME)?;
    Ok(NValue::String(info.to_string()))
}

fn config_get<H: EmbeddedStore>(ctx: &mut CommandContext<'_, H>, args: &[String]) -> Result<NValue> {
    let pairs = ctx
        .handle
        .settings()
        .into_iter()
        .filter(|(name, _)| glob_match(&args[0], name))
        .flat_map(|(name, value)| [NValue::String(name), NValue::String(value)])
        .collect();
    Ok(NValue::Array(pairs))
}

fn create_db<H: EmbeddedStore>(ctx: &mut CommandContext<'_, H>, args: &[String]) -> Result<NValue> {
    ctx.handle.create_database(&args[0])?;
    Ok(ok())
}

fn scan<H: EmbeddedStore>(ctx: &mut CommandContext<'_, H>, args: &[String]) -> Result<NValue> {
    let (cursor, pattern, count) = parse_scan_args(args, ctx.default_count())?;
    let keys = ctx.handle.all_keys()?;
    let page = scan_keys(keys.into_iter().map(Ok), cursor, &pattern, count, ctx.interrupt_flag())?;
    Ok(NValue::Array(vec![
        NValue::String(page.cursor_out.to_string()),
        NValue::Array(page.keys.into_iter().map(NValue::String).collect()),
    ]))
}

fn keys<H: EmbeddedStore>(ctx: &mut CommandContext<'_, H>, args: &[String]) -> Result<NValue> {
    let limit = parse_number(&args[2], "limit")?;
    let all = ctx.handle.all_keys()?;
    let found = keys_in_range(all.into_iter().map(Ok), &args[0], &args[1], limit, ctx.interrupt_flag())?;
    Ok(NValue::Array(found.into_iter().map(NValue::String).collect()))
}

fn key_count<H: EmbeddedStore>(ctx: &mut CommandContext<'_, H>, _args: &[String]) -> Result<NValue> {
    let count = ctx.handle.key_count()?;
    Ok(NValue::Integer(i64::try_from(count).unwrap_or(i64::MAX)))
}

fn flush_db<H: EmbeddedStore>(ctx: &mut CommandContext<'_, H>, _args: &[String]) -> Result<NValue> {
    ctx.handle.clear()?;
    ctx.notify(KeyEvent::Flushed);
    Ok(ok())
}

fn select<H: EmbeddedStore>(ctx: &mut CommandContext<'_, H>, args: &[String]) -> Result<NValue> {
    ctx.handle.select(&args[0])?;
    let database = current_database(ctx.handle)?;
    ctx.notify(KeyEvent::DatabaseChanged(database));
    Ok(ok())
}

fn set<H: EmbeddedStore>(ctx: &mut CommandContext<'_, H>, args: &[String]) -> Result<NValue> {
    ctx.handle.put(&args[0], &args[1])?;
    ctx.notify(KeyEvent::Added(NDbKValue::new(args[0].as_str(), args[1].as_str())));
    Ok(ok())
}

fn get<H: EmbeddedStore>(ctx: &mut CommandContext<'_, H>, args: &[String]) -> Result<NValue> {
    let value = ctx
        .handle
        .fetch(&args[0])?
        .ok_or_else(|| Error::native("key not found."))?;
    ctx.notify(KeyEvent::Loaded(NDbKValue::new(args[0].as_str(), value.as_str())));
    Ok(NValue::String(value))
}

fn rename<H: EmbeddedStore>(ctx: &mut CommandContext<'_, H>, args: &[String]) -> Result<NValue> {
    let (key, new_name) = (&args[0], &args[1]);
    let exists = if key == new_name {
        ctx.handle.fetch(key)?.is_some()
    } else {
        ctx.handle.rename(key, new_name)?
    };
    if !exists {
        return Err(Error::native("key not found."));
    }
    ctx.notify(KeyEvent::Renamed {
        key: NKey::from(key.as_str()),
        new_name: new_name.clone(),
    });
    Ok(ok())
}

fn del<H: EmbeddedStore>(ctx: &mut CommandContext<'_, H>, args: &[String]) -> Result<NValue> {
    let mut removed = Vec::new();
    for key in args {
        ctx.checkpoint()?;
        if ctx.handle.remove(key)? {
            removed.push(NKey::from(key.as_str()));
        }
    }
    let count = removed.len() as i64;
    if !removed.is_empty() {
        ctx.notify(KeyEvent::Removed(removed));
    }
    Ok(NValue::Integer(count))
}

fn quit<H: EmbeddedStore>(ctx: &mut CommandContext<'_, H>, _args: &[String]) -> Result<NValue> {
    ctx.notify(KeyEvent::Quit);
    Ok(ok())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicBool;

    /// In-memory store for exercising the command table.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        dbs: BTreeMap<String, BTreeMap<String, String>>,
        selected: String,
        path: PathBuf,
    }

    impl MemoryStore {
        pub(crate) fn new() -> Self {
            let mut store = MemoryStore {
                selected: "default".to_string(),
                ..MemoryStore::default()
            };
            store.dbs.insert("default".to_string(), BTreeMap::new());
            store
        }

        fn db(&mut self) -> &mut BTreeMap<String, String> {
            self.dbs.entry(self.selected.clone()).or_default()
        }
    }

    impl EmbeddedStore for MemoryStore {
        const NAME: &'static str = "memory";

        fn put(&mut self, key: &str, value: &str) -> Result<()> {
            self.db().insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn fetch(&mut self, key: &str) -> Result<Option<String>> {
            Ok(self.db().get(key).cloned())
        }

        fn remove(&mut self, key: &str) -> Result<bool> {
            Ok(self.db().remove(key).is_some())
        }

        fn rename(&mut self, key: &str, new_name: &str) -> Result<bool> {
            let db = self.db();
            match db.remove(key) {
                Some(value) => {
                    db.insert(new_name.to_string(), value);
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        fn all_keys(&mut self) -> Result<Vec<String>> {
            Ok(self.db().keys().cloned().collect())
        }

        fn clear(&mut self) -> Result<()> {
            self.db().clear();
            Ok(())
        }

        fn database_names(&mut self) -> Result<Vec<String>> {
            Ok(self.dbs.keys().cloned().collect())
        }

        fn selected(&self) -> &str {
            &self.selected
        }

        fn select(&mut self, name: &str) -> Result<()> {
            self.selected = name.to_string();
            self.db();
            Ok(())
        }

        fn create_database(&mut self, name: &str) -> Result<()> {
            self.dbs.entry(name.to_string()).or_default();
            Ok(())
        }

        fn settings(&self) -> Vec<(String, String)> {
            vec![
                ("path".to_string(), self.path.display().to_string()),
                ("max_dbs".to_string(), "16".to_string()),
            ]
        }

        fn location(&self) -> &Path {
            &self.path
        }
    }

    fn run(store: &mut MemoryStore, events: &mut Vec<KeyEvent>, line: &[&str]) -> Result<NValue> {
        let registry = commands::<MemoryStore>();
        let tokens: Vec<String> = line.iter().map(|s| s.to_string()).collect();
        let (holder, used) = registry.find(&tokens).ok_or_else(|| Error::unknown_command(line.join(" ")))?;
        holder.check_arity(tokens.len() - used)?;
        let flag = AtomicBool::new(false);
        let mut ctx = CommandContext::new(store, &registry, events, &flag, 100);
        (holder.handler)(&mut ctx, &tokens[used..])
    }

    #[test]
    fn test_set_get_del() {
        let mut store = MemoryStore::new();
        let mut events = Vec::new();
        assert_eq!(run(&mut store, &mut events, &["SET", "a", "1"]).unwrap(), NValue::from("OK"));
        assert_eq!(run(&mut store, &mut events, &["get", "a"]).unwrap(), NValue::from("1"));
        assert_eq!(run(&mut store, &mut events, &["DEL", "a", "b"]).unwrap(), NValue::Integer(1));
        assert_eq!(run(&mut store, &mut events, &["DEL", "a"]).unwrap(), NValue::Integer(0));
        assert!(run(&mut store, &mut events, &["GET", "a"]).is_err());

        assert_eq!(events.len(), 3);
        assert_eq!(events[2], KeyEvent::Removed(vec![NKey::from("a")]));
    }

    #[test]
    fn test_rename_moves_value() {
        let mut store = MemoryStore::new();
        let mut events = Vec::new();
        run(&mut store, &mut events, &["SET", "a", "1"]).unwrap();
        run(&mut store, &mut events, &["RENAME", "a", "b"]).unwrap();
        assert_eq!(store.fetch("a").unwrap(), None);
        assert_eq!(store.fetch("b").unwrap().as_deref(), Some("1"));
        assert!(run(&mut store, &mut events, &["RENAME", "missing", "c"]).is_err());
    }

    #[test]
    fn test_scan_and_keys() {
        let mut store = MemoryStore::new();
        for i in 0..5 {
            store.put(&format!("k{}", i), "v").unwrap();
        }
        let mut events = Vec::new();
        let reply = run(&mut store, &mut events, &["SCAN", "0", "COUNT", "2"]).unwrap();
        assert_eq!(
            reply,
            NValue::Array(vec![
                NValue::from("2"),
                NValue::Array(vec!["k0".into(), "k1".into()]),
            ])
        );
        let reply = run(&mut store, &mut events, &["KEYS", "k0", "k4", "10"]).unwrap();
        assert_eq!(reply.as_array().unwrap().len(), 3);
        assert_eq!(run(&mut store, &mut events, &["DBKCOUNT"]).unwrap(), NValue::Integer(5));
    }

    #[test]
    fn test_select_and_flush() {
        let mut store = MemoryStore::new();
        let mut events = Vec::new();
        run(&mut store, &mut events, &["SET", "a", "1"]).unwrap();
        run(&mut store, &mut events, &["SELECT", "other"]).unwrap();
        assert_eq!(store.selected(), "other");
        assert_eq!(store.key_count().unwrap(), 0);
        run(&mut store, &mut events, &["SELECT", "default"]).unwrap();
        run(&mut store, &mut events, &["FLUSHDB"]).unwrap();
        assert_eq!(store.key_count().unwrap(), 0);
        assert_eq!(events.last(), Some(&KeyEvent::Flushed));

        let dbs = databases(&mut store).unwrap();
        assert_eq!(dbs.len(), 2);
        assert!(dbs.iter().any(|d| d.name == "default" && d.is_default));
    }

    #[test]
    fn test_config_get_filters_by_glob() {
        let mut store = MemoryStore::new();
        let mut events = Vec::new();
        let reply = run(&mut store, &mut events, &["CONFIG", "GET", "max*"]).unwrap();
        assert_eq!(reply, NValue::Array(vec!["max_dbs".into(), "16".into()]));
    }

    #[test]
    fn test_help_and_arity() {
        let mut store = MemoryStore::new();
        let mut events = Vec::new();
        let list = run(&mut store, &mut events, &["HELP"]).unwrap();
        assert_eq!(list.as_array().unwrap().len(), 14);
        let err = run(&mut store, &mut events, &["SET", "a"]).unwrap_err();
        assert!(matches!(err, Error::WrongArity { passed: 1, min: 2, .. }));
    }
}
