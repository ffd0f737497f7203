//! Generic key operations to native command lines
//!
//! A [`CommandTranslator`] only builds strings. It never touches the
//! network or disk, so the only failures are malformed input
//! (`InvalidArgument`) and operations the backend has no notion of
//! (`Unsupported`).

use kvbridge_core::{Error, NDbKValue, NKey, Result, Ttl, ValueType};

use crate::args::{join_args, split_args};

/// Per-backend command builder.
pub trait CommandTranslator: Send + 'static {
    /// Command that stores `kv`.
    fn create(&self, kv: &NDbKValue) -> Result<String>;

    /// Command that reads `key`, which is expected to hold `ty`.
    fn load(&self, key: &NKey, ty: ValueType) -> Result<String>;

    /// Command that deletes `key`.
    fn delete(&self, key: &NKey) -> Result<String>;

    /// Command that renames `key` to `new_name`.
    fn rename(&self, key: &NKey, new_name: &str) -> Result<String>;

    /// Command that sets the expiry of `key`.
    fn change_ttl(&self, key: &NKey, ttl: Ttl) -> Result<String>;

    /// Command that reads the expiry of `key`.
    fn load_ttl(&self, key: &NKey) -> Result<String>;

    /// Whether `command` is one of the read verbs [`load`](Self::load) produces.
    fn is_load_command(&self, command: &str) -> bool;
}

/// First word of a command line, uppercased.
pub fn command_verb(command: &str) -> Option<String> {
    split_args(command)
        .ok()
        .and_then(|words| words.into_iter().next())
        .map(|w| w.to_ascii_uppercase())
}

/// Build `verb key args...` with quoting.
pub fn build_command(verb: &str, key: &NKey, args: &[String]) -> Result<String> {
    let key = key.command_text()?;
    let mut words = Vec::with_capacity(args.len() + 2);
    words.push(verb);
    words.push(key);
    words.extend(args.iter().map(String::as_str));
    Ok(join_args(words))
}

/// Validate a rename target.
pub fn check_new_name(new_name: &str) -> Result<()> {
    if new_name.is_empty() {
        return Err(Error::invalid_argument("empty new key name"));
    }
    Ok(())
}

/// Translator for untyped stores without expiry (redb, LMDB).
///
/// Values are stored as text; collections are flattened to their
/// elements joined by a single space.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTranslator {
    backend: &'static str,
}

impl PlainTranslator {
    /// Translator that names `backend` in its `Unsupported` messages.
    pub const fn new(backend: &'static str) -> Self {
        Self { backend }
    }

    fn ttl_unsupported(&self) -> Error {
        Error::unsupported(format!(
            "Sorry, but now {} does not support keys with expiration.",
            if self.backend.is_empty() { "this backend" } else { self.backend }
        ))
    }
}

impl CommandTranslator for PlainTranslator {
    fn create(&self, kv: &NDbKValue) -> Result<String> {
        build_command("SET", &kv.key, &[kv.value.to_string()])
    }

    fn load(&self, key: &NKey, _ty: ValueType) -> Result<String> {
        build_command("GET", key, &[])
    }

    fn delete(&self, key: &NKey) -> Result<String> {
        build_command("DEL", key, &[])
    }

    fn rename(&self, key: &NKey, new_name: &str) -> Result<String> {
        check_new_name(new_name)?;
        build_command("RENAME", key, &[new_name.to_string()])
    }

    fn change_ttl(&self, key: &NKey, _ttl: Ttl) -> Result<String> {
        key.command_text()?;
        Err(self.ttl_unsupported())
    }

    fn load_ttl(&self, key: &NKey) -> Result<String> {
        key.command_text()?;
        Err(self.ttl_unsupported())
    }

    fn is_load_command(&self, command: &str) -> bool {
        command_verb(command).as_deref() == Some("GET")
    }
}
