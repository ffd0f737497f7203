//! Typed Redis commands for generic key operations

use kvbridge_core::{Error, NDbKValue, NKey, NValue, Result, Ttl, ValueType, NO_TTL};

use crate::translator::{build_command, check_new_name, command_verb, CommandTranslator};

const LOAD_VERBS: [&str; 5] = ["GET", "LRANGE", "SMEMBERS", "ZRANGE", "HGETALL"];

/// Raw argument list reading `key` as `ty`.
pub(super) fn load_args(key: &str, ty: ValueType) -> Vec<String> {
    let words = match ty {
        ValueType::Array => vec!["LRANGE", key, "0", "-1"],
        ValueType::Set => vec!["SMEMBERS", key],
        ValueType::ZSet => vec!["ZRANGE", key, "0", "-1", "WITHSCORES"],
        ValueType::Hash => vec!["HGETALL", key],
        _ => vec!["GET", key],
    };
    words.iter().map(|w| w.to_string()).collect()
}

/// Picks the write and read verb from the value type.
///
/// Lists are written with `RPUSH` so a list read back with `LRANGE 0 -1`
/// keeps its order.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisTranslator;

impl CommandTranslator for RedisTranslator {
    fn create(&self, kv: &NDbKValue) -> Result<String> {
        let verb = match kv.value {
            NValue::Array(_) => "RPUSH",
            NValue::Set(_) => "SADD",
            NValue::ZSet(_) => "ZADD",
            NValue::Hash(_) => "HMSET",
            _ => "SET",
        };
        let args = if kv.value.is_collection() {
            let args = kv.value.to_args();
            if args.is_empty() {
                return Err(Error::invalid_argument(format!(
                    "cannot create '{}' as an empty {}",
                    kv.key,
                    kv.value.value_type()
                )));
            }
            args
        } else {
            vec![kv.value.to_string()]
        };
        build_command(verb, &kv.key, &args)
    }

    fn load(&self, key: &NKey, ty: ValueType) -> Result<String> {
        let args = load_args(key.command_text()?, ty);
        build_command(&args[0], key, &args[2..])
    }

    fn delete(&self, key: &NKey) -> Result<String> {
        build_command("DEL", key, &[])
    }

    fn rename(&self, key: &NKey, new_name: &str) -> Result<String> {
        check_new_name(new_name)?;
        build_command("RENAME", key, &[new_name.to_string()])
    }

    fn change_ttl(&self, key: &NKey, ttl: Ttl) -> Result<String> {
        if ttl == NO_TTL {
            build_command("PERSIST", key, &[])
        } else {
            build_command("EXPIRE", key, &[ttl.to_string()])
        }
    }

    fn load_ttl(&self, key: &NKey) -> Result<String> {
        build_command("TTL", key, &[])
    }

    fn is_load_command(&self, command: &str) -> bool {
        command_verb(command)
            .map(|verb| LOAD_VERBS.contains(&verb.as_str()))
            .unwrap_or(false)
    }
}
