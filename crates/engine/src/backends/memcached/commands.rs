//! Memcached command table

use kvbridge_core::{Error, KeyEvent, NDbKValue, NKey, NValue, Result, NO_TTL};
use once_cell::sync::Lazy;

use super::{protocol, MemcachedHandle, DEFAULT_DATABASE};
use crate::glob::{keys_in_range, parse_number, parse_scan_args, scan_keys};
use crate::registry::{CommandContext, CommandHolder, CommandRegistry, INFINITE_ARGS};

type Ctx<'a> = CommandContext<'a, MemcachedHandle>;

const STORAGE_PARAMS: &str = "<key> <flags> <exptime> <value>";

pub(super) static REGISTRY: Lazy<CommandRegistry<MemcachedHandle>> = Lazy::new(|| {
    CommandRegistry::new(vec![
        CommandHolder::new("HELP", "[command]", "Return how to use a command", "", "HELP SET", 0, 1, help),
        CommandHolder::new("VERSION", "", "Return the server version", "1.2.14", "VERSION", 0, 0, version),
        CommandHolder::new("STATS", "[args]", "Return server statistics", "1.2.14", "STATS settings", 0, INFINITE_ARGS, stats),
        CommandHolder::new("INFO", "", "Return server statistics", "1.2.14", "INFO", 0, 0, info),
        CommandHolder::new("SCAN", "<cursor> [MATCH pattern] [COUNT count]", "Incrementally iterate the keys", "1.4.31", "SCAN 0 MATCH * COUNT 10", 1, 4, scan),
        CommandHolder::new("KEYS", "<key_start> <key_end> <limit>", "Find keys in range between key_start and key_end", "1.4.31", "KEYS a z 10", 3, 0, keys),
        CommandHolder::new("DBKCOUNT", "", "Return the number of keys", "1.2.14", "DBKCOUNT", 0, 0, dbkcount),
        CommandHolder::new("SELECT", "<name>", "Select the database (only 'default')", "1.2.14", "SELECT default", 1, 0, select),
        CommandHolder::new("FLUSHDB", "[time]", "Invalidate all existing items, optionally after a delay", "1.2.14", "FLUSHDB", 0, 1, flushdb),
        CommandHolder::new("DEL", "<key> [key ...]", "Delete keys", "1.2.14", "DEL a b", 1, INFINITE_ARGS, del),
        CommandHolder::new("INCR", "<key> <value>", "Increment a numeric value", "1.2.14", "INCR n 1", 2, 0, incr),
        CommandHolder::new("DECR", "<key> <value>", "Decrement a numeric value", "1.2.14", "DECR n 1", 2, 0, decr),
        CommandHolder::new("SET", STORAGE_PARAMS, "Store a value", "1.2.14", "SET k 0 0 v", 4, 0, set),
        CommandHolder::new("ADD", STORAGE_PARAMS, "Store a value only if the key does not exist", "1.2.14", "ADD k 0 0 v", 4, 0, add),
        CommandHolder::new("REPLACE", STORAGE_PARAMS, "Store a value only if the key exists", "1.2.14", "REPLACE k 0 0 v", 4, 0, replace),
        CommandHolder::new("APPEND", STORAGE_PARAMS, "Append to an existing value", "1.2.14", "APPEND k 0 0 v", 4, 0, append),
        CommandHolder::new("PREPEND", STORAGE_PARAMS, "Prepend to an existing value", "1.2.14", "PREPEND k 0 0 v", 4, 0, prepend),
        CommandHolder::new("GET", "<key>", "Get the value of a key", "1.2.14", "GET k", 1, 0, get),
        CommandHolder::new("RENAME", "<key> <newkey>", "Rename a key", "1.2.14", "RENAME a b", 2, 0, rename),
        CommandHolder::new("EXPIRE", "<key> <exptime>", "Set a key's expiry in seconds", "1.4.8", "EXPIRE k 10", 2, 0, expire),
        CommandHolder::new("TTL", "<key>", "Seconds until a key expires", "1.4.31", "TTL k", 1, 0, ttl),
        CommandHolder::new("QUIT", "", "Close the connection", "1.2.14", "QUIT", 0, 0, quit),
    ])
});

fn ok() -> NValue {
    NValue::String("OK".to_string())
}

fn help(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    ctx.registry().help(args)
}

fn version(ctx: &mut Ctx<'_>, _args: &[String]) -> Result<NValue> {
    ctx.handle.version().map(NValue::String)
}

fn stats_reply(pairs: Vec<(String, String)>) -> NValue {
    let text = pairs
        .into_iter()
        .map(|(name, value)| format!("{}:{}", name, value))
        .collect::<Vec<_>>()
        .join("\n");
    NValue::String(text)
}

fn stats(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let group = if args.is_empty() { None } else { Some(args.join(" ")) };
    let pairs = ctx.handle.stats(group.as_deref())?;
    Ok(stats_reply(pairs))
}

fn info(ctx: &mut Ctx<'_>, _args: &[String]) -> Result<NValue> {
    let pairs = ctx.handle.stats(None)?;
    Ok(stats_reply(pairs))
}

fn scan(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let (cursor, pattern, count) = parse_scan_args(args, ctx.default_count())?;
    let keys = ctx.handle.keys()?;
    let page = scan_keys(keys.into_iter().map(Ok), cursor, &pattern, count, ctx.interrupt_flag())?;
    Ok(NValue::Array(vec![
        NValue::String(page.cursor_out.to_string()),
        NValue::Array(page.keys.into_iter().map(NValue::String).collect()),
    ]))
}

fn keys(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let limit = parse_number(&args[2], "limit")?;
    let all = ctx.handle.keys()?;
    let found = keys_in_range(all.into_iter().map(Ok), &args[0], &args[1], limit, ctx.interrupt_flag())?;
    Ok(NValue::Array(found.into_iter().map(NValue::String).collect()))
}

fn dbkcount(ctx: &mut Ctx<'_>, _args: &[String]) -> Result<NValue> {
    let count = ctx.handle.item_count()?;
    Ok(NValue::Integer(i64::try_from(count).unwrap_or(i64::MAX)))
}

fn select(_ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    if args[0] != DEFAULT_DATABASE {
        return Err(Error::invalid_argument(format!(
            "memcached has only the '{}' database",
            DEFAULT_DATABASE
        )));
    }
    Ok(ok())
}

fn flushdb(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let delay = args.first().map(|d| parse_number(d, "time")).transpose()?;
    ctx.handle.flush_all(delay)?;
    ctx.notify(KeyEvent::Flushed);
    Ok(ok())
}

fn del(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let mut removed = Vec::new();
    for key in args {
        ctx.checkpoint()?;
        if ctx.handle.delete(key)? {
            removed.push(NKey::from(key.as_str()));
        }
    }
    let count = removed.len() as i64;
    if !removed.is_empty() {
        ctx.notify(KeyEvent::Removed(removed));
    }
    Ok(NValue::Integer(count))
}

fn step(ctx: &mut Ctx<'_>, verb: &str, args: &[String]) -> Result<NValue> {
    let delta = parse_number(&args[1], "value")?;
    match ctx.handle.step(verb, &args[0], delta)? {
        Some(value) => {
            let value = i64::try_from(value).unwrap_or(i64::MAX);
            ctx.notify(KeyEvent::Added(NDbKValue::new(args[0].as_str(), value)));
            Ok(NValue::Integer(value))
        }
        None => Err(Error::native("key not found.")),
    }
}

fn incr(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    step(ctx, "incr", args)
}

fn decr(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    step(ctx, "decr", args)
}

fn stored(ctx: &mut Ctx<'_>, verb: &str, args: &[String]) -> Result<NValue> {
    let flags = u32::try_from(parse_number(&args[1], "flags")?)
        .map_err(|_| Error::invalid_argument("flags must fit in 32 bits"))?;
    let exptime: i64 = args[2]
        .parse()
        .map_err(|_| Error::invalid_argument(format!("exptime must be an integer, got '{}'", args[2])))?;
    let (key, value) = (&args[0], &args[3]);
    if !ctx.handle.store(verb, key, flags, exptime, value)? {
        return Err(Error::native(format!("{} failed: item not stored", verb.to_ascii_uppercase())));
    }
    // append/prepend change the value; report what is stored now
    let stored = if verb == "set" || verb == "add" || verb == "replace" {
        value.clone()
    } else {
        ctx.handle.get(key)?.unwrap_or_else(|| value.clone())
    };
    ctx.notify(KeyEvent::Added(NDbKValue::new(key.as_str(), stored.as_str())));
    Ok(ok())
}

fn set(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    stored(ctx, "set", args)
}

fn add(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    stored(ctx, "add", args)
}

fn replace(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    stored(ctx, "replace", args)
}

fn append(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    stored(ctx, "append", args)
}

fn prepend(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    stored(ctx, "prepend", args)
}

fn get(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let value = ctx
        .handle
        .get(&args[0])?
        .ok_or_else(|| Error::native("key not found."))?;
    ctx.notify(KeyEvent::Loaded(NDbKValue::new(args[0].as_str(), value.as_str())));
    Ok(NValue::String(value))
}

fn rename(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let (key, new_name) = (&args[0], &args[1]);
    let value = ctx
        .handle
        .get(key)?
        .ok_or_else(|| Error::native("key not found."))?;
    if key != new_name {
        if !ctx.handle.store("set", new_name, 0, 0, &value)? {
            return Err(Error::native("NOT_STORED"));
        }
        ctx.handle.delete(key)?;
    }
    ctx.notify(KeyEvent::Renamed {
        key: NKey::from(key.as_str()),
        new_name: new_name.clone(),
    });
    Ok(ok())
}

fn expire(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let exptime: i64 = args[1]
        .parse()
        .map_err(|_| Error::invalid_argument(format!("exptime must be an integer, got '{}'", args[1])))?;
    if !ctx.handle.touch(&args[0], exptime)? {
        return Err(Error::native("key not found."));
    }
    let ttl = if exptime == 0 {
        NO_TTL
    } else {
        protocol::ttl_of(exptime, chrono::Utc::now().timestamp())
    };
    ctx.notify(KeyEvent::TtlChanged {
        key: NKey::from(args[0].as_str()),
        ttl,
    });
    Ok(NValue::Integer(1))
}

fn ttl(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let ttl = ctx.handle.ttl(&args[0])?;
    ctx.notify(KeyEvent::TtlLoaded {
        key: NKey::from(args[0].as_str()),
        ttl,
    });
    Ok(NValue::Integer(ttl))
}

fn quit(ctx: &mut Ctx<'_>, _args: &[String]) -> Result<NValue> {
    ctx.notify(KeyEvent::Quit);
    Ok(ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_storage_commands_take_four_arguments() {
        for name in ["SET", "ADD", "REPLACE", "APPEND", "PREPEND"] {
            let holder = REGISTRY.get(name).unwrap();
            assert!(holder.check_arity(4).is_ok());
            assert!(holder.check_arity(2).is_err());
        }
    }

    #[test]
    fn test_lookup() {
        let (holder, used) = REGISTRY.find(&tokens("dbkcount")).unwrap();
        assert_eq!(holder.name, "DBKCOUNT");
        assert_eq!(used, 1);
        assert!(REGISTRY.find(&tokens("HGETALL h")).is_none());
    }
}
