//! Generic key operations as memcached command lines

use kvbridge_core::{NDbKValue, NKey, Result, Ttl, ValueType, NO_TTL};

use super::protocol::exptime_for;
use crate::translator::{build_command, check_new_name, command_verb, CommandTranslator};

/// Memcached stores flat strings; every value is written with `SET` and
/// read with `GET` whatever its type.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemcachedTranslator;

impl CommandTranslator for MemcachedTranslator {
    fn create(&self, kv: &NDbKValue) -> Result<String> {
        let value = if kv.value.is_collection() {
            kv.value.to_args().join(" ")
        } else {
            kv.value.to_string()
        };
        build_command("SET", &kv.key, &["0".to_string(), "0".to_string(), value])
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

    fn change_ttl(&self, key: &NKey, ttl: Ttl) -> Result<String> {
        // exptime 0 means "never expires"
        let exptime = if ttl == NO_TTL {
            0
        } else {
            exptime_for(ttl, chrono::Utc::now().timestamp())
        };
        build_command("EXPIRE", key, &[exptime.to_string()])
    }

    fn load_ttl(&self, key: &NKey) -> Result<String> {
        build_command("TTL", key, &[])
    }

    fn is_load_command(&self, command: &str) -> bool {
        command_verb(command).as_deref() == Some("GET")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memcached::protocol::MAX_RELATIVE_EXPTIME;
    use kvbridge_core::NValue;

    #[test]
    fn test_create_uses_zero_flags_and_exptime() {
        let t = MemcachedTranslator;
        assert_eq!(t.create(&NDbKValue::new("k", "v")).unwrap(), "SET k 0 0 v");
        assert_eq!(
            t.create(&NDbKValue::new("k", "two words")).unwrap(),
            "SET k 0 0 \"two words\""
        );
        assert_eq!(
            t.create(&NDbKValue::new("l", NValue::Array(vec!["a".into(), "b".into()]))).unwrap(),
            "SET l 0 0 \"a b\""
        );
    }

    #[test]
    fn test_every_type_loads_with_get() {
        let t = MemcachedTranslator;
        let key = NKey::from("k");
        assert_eq!(t.load(&key, ValueType::Hash).unwrap(), "GET k");
        assert!(t.is_load_command("get k"));
        assert!(!t.is_load_command("SET k 0 0 v"));
    }

    #[test]
    fn test_ttl_commands() {
        let t = MemcachedTranslator;
        let key = NKey::from("k");
        assert_eq!(t.change_ttl(&key, 60).unwrap(), "EXPIRE k 60");
        assert_eq!(t.change_ttl(&key, NO_TTL).unwrap(), "EXPIRE k 0");
        assert_eq!(t.load_ttl(&key).unwrap(), "TTL k");
        assert_eq!(t.rename(&key, "k2").unwrap(), "RENAME k k2");
        assert_eq!(t.delete(&key).unwrap(), "DEL k");
    }

    #[test]
    fn test_long_ttl_is_sent_as_unix_time() {
        let t = MemcachedTranslator;
        let before = chrono::Utc::now().timestamp();
        let ttl = MAX_RELATIVE_EXPTIME * 2;
        let line = t.change_ttl(&NKey::from("k"), ttl).unwrap();
        let exptime: i64 = line.rsplit(' ').next().unwrap().parse().unwrap();
        assert!(exptime >= before + ttl);
        assert!(exptime <= chrono::Utc::now().timestamp() + ttl);
    }
}
