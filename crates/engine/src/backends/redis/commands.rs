//! Redis command table
//!
//! Most commands are forwarded verbatim. Commands that change or read a
//! key also raise the matching [`KeyEvent`].

use kvbridge_core::{DatabaseInfo, KeyEvent, NDbKValue, NKey, NValue, Result, ValueType, NO_TTL};
use once_cell::sync::Lazy;

use super::RedisHandle;
use crate::glob::parse_number;
use crate::registry::{CommandContext, CommandHolder, CommandRegistry, INFINITE_ARGS};

type Ctx<'a> = CommandContext<'a, RedisHandle>;

fn forward(ctx: &mut Ctx<'_>, name: &str, args: &[String]) -> Result<NValue> {
    let mut words: Vec<&str> = name.split(' ').collect();
    words.extend(args.iter().map(String::as_str));
    ctx.handle.call(words.as_slice())
}

macro_rules! forwarded {
    ($name:literal, $params:literal, $summary:literal, $since:literal, $required:expr, $optional:expr) => {
        CommandHolder::<RedisHandle>::new(
            $name,
            $params,
            $summary,
            $since,
            "",
            $required,
            $optional,
            |ctx, args| forward(ctx, $name, args),
        )
    };
}

pub(super) static REGISTRY: Lazy<CommandRegistry<RedisHandle>> = Lazy::new(|| {
    CommandRegistry::new(vec![
        CommandHolder::new("HELP", "[command]", "Return how to use a command", "", "HELP SET", 0, 1, help),
        forwarded!("APPEND", "<key> <value>", "Append a value to a key", "2.0.0", 2, 0),
        CommandHolder::new("AUTH", "[username] <password>", "Authenticate to the server", "1.0.0", "AUTH secret", 1, 1, auth),
        forwarded!("CLIENT LIST", "", "Get the list of client connections", "2.4.0", 0, 0),
        forwarded!("CONFIG GET", "<parameter>", "Get the value of a configuration parameter", "2.0.0", 1, 0),
        forwarded!("CONFIG SET", "<parameter> <value>", "Set a configuration parameter", "2.0.0", 2, 0),
        forwarded!("CONFIG RESETSTAT", "", "Reset the stats returned by INFO", "2.0.0", 0, 0),
        forwarded!("DBSIZE", "", "Number of keys in the selected database", "1.0.0", 0, 0),
        forwarded!("DECR", "<key>", "Decrement the integer value of a key by one", "1.0.0", 1, 0),
        forwarded!("DECRBY", "<key> <decrement>", "Decrement the integer value of a key", "1.0.0", 2, 0),
        CommandHolder::new("DEL", "<key> [key ...]", "Delete keys", "1.0.0", "DEL a b", 1, INFINITE_ARGS, del),
        forwarded!("ECHO", "<message>", "Echo the given string", "1.0.0", 1, 0),
        forwarded!("EXISTS", "<key> [key ...]", "Determine if keys exist", "1.0.0", 1, INFINITE_ARGS),
        CommandHolder::new("EXPIRE", "<key> <seconds>", "Set a key's time to live in seconds", "1.0.0", "EXPIRE k 10", 2, 0, expire),
        CommandHolder::new("FLUSHDB", "[ASYNC]", "Remove all keys from the selected database", "1.0.0", "FLUSHDB", 0, 1, flushdb),
        CommandHolder::new("GET", "<key>", "Get the value of a key", "1.0.0", "GET k", 1, 0, get),
        forwarded!("GETSET", "<key> <value>", "Set a key and return its old value", "1.0.0", 2, 0),
        forwarded!("HDEL", "<key> <field> [field ...]", "Delete hash fields", "2.0.0", 2, INFINITE_ARGS),
        forwarded!("HGET", "<key> <field>", "Get the value of a hash field", "2.0.0", 2, 0),
        CommandHolder::new("HGETALL", "<key>", "Get all fields and values of a hash", "2.0.0", "HGETALL h", 1, 0, hgetall),
        forwarded!("HKEYS", "<key>", "Get all fields of a hash", "2.0.0", 1, 0),
        forwarded!("HLEN", "<key>", "Number of fields in a hash", "2.0.0", 1, 0),
        CommandHolder::new("HMSET", "<key> <field> <value> [field value ...]", "Set hash fields", "2.0.0", "HMSET h f v", 3, INFINITE_ARGS, hmset),
        CommandHolder::new("HSET", "<key> <field> <value> [field value ...]", "Set hash fields", "2.0.0", "HSET h f v", 3, INFINITE_ARGS, hset),
        forwarded!("HVALS", "<key>", "Get all values of a hash", "2.0.0", 1, 0),
        forwarded!("INCR", "<key>", "Increment the integer value of a key by one", "1.0.0", 1, 0),
        forwarded!("INCRBY", "<key> <increment>", "Increment the integer value of a key", "1.0.0", 2, 0),
        forwarded!("INFO", "[section]", "Information and statistics about the server", "1.0.0", 0, 1),
        forwarded!("KEYS", "<pattern>", "Find all keys matching a pattern", "1.0.0", 1, 0),
        forwarded!("LASTSAVE", "", "Timestamp of the last successful save", "1.0.0", 0, 0),
        forwarded!("LLEN", "<key>", "Length of a list", "1.0.0", 1, 0),
        forwarded!("LPOP", "<key>", "Remove and get the first element of a list", "1.0.0", 1, 0),
        CommandHolder::new("LPUSH", "<key> <value> [value ...]", "Prepend values to a list", "1.0.0", "LPUSH l a", 2, INFINITE_ARGS, lpush),
        CommandHolder::new("LRANGE", "<key> <start> <stop>", "Get a range of list elements", "1.0.0", "LRANGE l 0 -1", 3, 0, lrange),
        forwarded!("MGET", "<key> [key ...]", "Get the values of keys", "1.0.0", 1, INFINITE_ARGS),
        forwarded!("MSET", "<key> <value> [key value ...]", "Set multiple keys", "1.0.1", 2, INFINITE_ARGS),
        CommandHolder::new("PERSIST", "<key>", "Remove the expiration from a key", "2.2.0", "PERSIST k", 1, 0, persist),
        forwarded!("PEXPIRE", "<key> <milliseconds>", "Set a key's time to live in milliseconds", "2.6.0", 2, 0),
        forwarded!("PING", "[message]", "Ping the server", "1.0.0", 0, 1),
        forwarded!("PUBLISH", "<channel> <message>", "Post a message to a channel", "2.0.0", 2, 0),
        forwarded!("PTTL", "<key>", "Time to live of a key in milliseconds", "2.6.0", 1, 0),
        CommandHolder::new("QUIT", "", "Close the connection", "1.0.0", "QUIT", 0, 0, quit),
        CommandHolder::new("RENAME", "<key> <newkey>", "Rename a key", "1.0.0", "RENAME a b", 2, 0, rename),
        forwarded!("RPOP", "<key>", "Remove and get the last element of a list", "1.0.0", 1, 0),
        CommandHolder::new("RPUSH", "<key> <value> [value ...]", "Append values to a list", "1.0.0", "RPUSH l a", 2, INFINITE_ARGS, rpush),
        CommandHolder::new("SADD", "<key> <member> [member ...]", "Add members to a set", "1.0.0", "SADD s a", 2, INFINITE_ARGS, sadd),
        forwarded!("SAVE", "", "Synchronously save the dataset to disk", "1.0.0", 0, 0),
        forwarded!("SCAN", "<cursor> [MATCH pattern] [COUNT count] [TYPE type]", "Incrementally iterate the keys", "2.8.0", 1, 6),
        forwarded!("SCARD", "<key>", "Number of members in a set", "1.0.0", 1, 0),
        CommandHolder::new("SELECT", "<index>", "Change the selected database", "1.0.0", "SELECT 1", 1, 0, select),
        CommandHolder::new("SET", "<key> <value> [EX seconds|PX milliseconds] [NX|XX]", "Set the value of a key", "1.0.0", "SET k v", 2, 3, set),
        forwarded!("SHUTDOWN", "[NOSAVE|SAVE]", "Save the dataset and stop the server", "1.0.0", 0, 1),
        CommandHolder::new("SMEMBERS", "<key>", "Get all members of a set", "1.0.0", "SMEMBERS s", 1, 0, smembers),
        forwarded!("SREM", "<key> <member> [member ...]", "Remove members from a set", "1.0.0", 2, INFINITE_ARGS),
        forwarded!("STRLEN", "<key>", "Length of the value stored in a key", "2.2.0", 1, 0),
        forwarded!("TIME", "", "Current server time", "2.6.0", 0, 0),
        CommandHolder::new("TTL", "<key>", "Time to live of a key in seconds", "1.0.0", "TTL k", 1, 0, ttl),
        forwarded!("TYPE", "<key>", "Type stored at a key", "1.0.0", 1, 0),
        CommandHolder::new("ZADD", "<key> <score> <member> [score member ...]", "Add members to a sorted set", "1.2.0", "ZADD z 1 a", 3, INFINITE_ARGS, zadd),
        forwarded!("ZCARD", "<key>", "Number of members in a sorted set", "1.2.0", 1, 0),
        CommandHolder::new("ZRANGE", "<key> <start> <stop> [WITHSCORES]", "Range of members in a sorted set", "1.2.0", "ZRANGE z 0 -1 WITHSCORES", 3, 1, zrange),
        forwarded!("ZREM", "<key> <member> [member ...]", "Remove members from a sorted set", "1.2.0", 2, INFINITE_ARGS),
        forwarded!("ZSCORE", "<key> <member>", "Score of a sorted set member", "1.2.0", 2, 0),
    ])
});

fn help(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    ctx.registry().help(args)
}

fn auth(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let reply = forward(ctx, "AUTH", args)?;
    ctx.handle.authenticated = true;
    Ok(reply)
}

fn key_value(key: &str, value: NValue) -> NDbKValue {
    NDbKValue::new(key, value)
}

fn set(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let reply = forward(ctx, "SET", args)?;
    if !reply.is_null() {
        ctx.notify(KeyEvent::Added(key_value(&args[0], NValue::from(args[1].as_str()))));
    }
    Ok(reply)
}

fn get(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let reply = forward(ctx, "GET", args)?;
    ctx.notify(KeyEvent::Loaded(key_value(&args[0], reply.clone())));
    Ok(reply)
}

fn loaded_as(ctx: &mut Ctx<'_>, name: &str, args: &[String], ty: ValueType) -> Result<NValue> {
    let reply = forward(ctx, name, args)?;
    ctx.notify(KeyEvent::Loaded(key_value(&args[0], reply.clone().coerce(ty))));
    Ok(reply)
}

fn lrange(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    loaded_as(ctx, "LRANGE", args, ValueType::Array)
}

fn smembers(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    loaded_as(ctx, "SMEMBERS", args, ValueType::Set)
}

fn hgetall(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    loaded_as(ctx, "HGETALL", args, ValueType::Hash)
}

fn zrange(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let with_scores = args.get(3).map(|a| a.eq_ignore_ascii_case("WITHSCORES")).unwrap_or(false);
    let ty = if with_scores { ValueType::ZSet } else { ValueType::Array };
    loaded_as(ctx, "ZRANGE", args, ty)
}

fn strings(args: &[String]) -> Vec<NValue> {
    args.iter().map(|a| NValue::from(a.as_str())).collect()
}

fn push(ctx: &mut Ctx<'_>, name: &str, args: &[String]) -> Result<NValue> {
    let reply = forward(ctx, name, args)?;
    ctx.notify(KeyEvent::Added(key_value(&args[0], NValue::Array(strings(&args[1..])))));
    Ok(reply)
}

fn lpush(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    push(ctx, "LPUSH", args)
}

fn rpush(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    push(ctx, "RPUSH", args)
}

fn sadd(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let reply = forward(ctx, "SADD", args)?;
    ctx.notify(KeyEvent::Added(key_value(&args[0], NValue::Set(strings(&args[1..])))));
    Ok(reply)
}

fn zadd(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let reply = forward(ctx, "ZADD", args)?;
    let members: Option<Vec<(String, f64)>> = args[1..]
        .chunks(2)
        .map(|pair| match pair {
            [score, member] => score.parse().ok().map(|s| (member.clone(), s)),
            _ => None,
        })
        .collect();
    let value = match members {
        Some(members) => NValue::ZSet(members),
        None => NValue::Array(strings(&args[1..])),
    };
    ctx.notify(KeyEvent::Added(key_value(&args[0], value)));
    Ok(reply)
}

fn hash_set(ctx: &mut Ctx<'_>, name: &str, args: &[String]) -> Result<NValue> {
    let reply = forward(ctx, name, args)?;
    let fields = args[1..]
        .chunks(2)
        .filter(|pair| pair.len() == 2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    ctx.notify(KeyEvent::Added(key_value(&args[0], NValue::Hash(fields))));
    Ok(reply)
}

fn hmset(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    hash_set(ctx, "HMSET", args)
}

fn hset(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    hash_set(ctx, "HSET", args)
}

fn del(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let reply = forward(ctx, "DEL", args)?;
    if reply.as_integer().unwrap_or(0) > 0 {
        let keys = args.iter().map(|k| NKey::from(k.as_str())).collect();
        ctx.notify(KeyEvent::Removed(keys));
    }
    Ok(reply)
}

fn rename(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let reply = forward(ctx, "RENAME", args)?;
    ctx.notify(KeyEvent::Renamed {
        key: NKey::from(args[0].as_str()),
        new_name: args[1].clone(),
    });
    Ok(reply)
}

fn expire(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let ttl: i64 = args[1]
        .parse()
        .map_err(|_| kvbridge_core::Error::invalid_argument(format!("invalid TTL '{}'", args[1])))?;
    let reply = forward(ctx, "EXPIRE", args)?;
    if reply.as_integer() == Some(1) {
        ctx.notify(KeyEvent::TtlChanged {
            key: NKey::from(args[0].as_str()),
            ttl,
        });
    }
    Ok(reply)
}

fn persist(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let reply = forward(ctx, "PERSIST", args)?;
    ctx.notify(KeyEvent::TtlChanged {
        key: NKey::from(args[0].as_str()),
        ttl: NO_TTL,
    });
    Ok(reply)
}

fn ttl(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let reply = forward(ctx, "TTL", args)?;
    if let Some(ttl) = reply.as_integer() {
        ctx.notify(KeyEvent::TtlLoaded {
            key: NKey::from(args[0].as_str()),
            ttl,
        });
    }
    Ok(reply)
}

fn select(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let index = parse_number(&args[0], "database index")?;
    let reply = forward(ctx, "SELECT", args)?;
    ctx.handle.db = u32::try_from(index).unwrap_or(u32::MAX);
    ctx.notify(KeyEvent::DatabaseChanged(DatabaseInfo::new(args[0].clone(), None, true)));
    Ok(reply)
}

fn flushdb(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let reply = forward(ctx, "FLUSHDB", args)?;
    ctx.notify(KeyEvent::Flushed);
    Ok(reply)
}

fn quit(ctx: &mut Ctx<'_>, args: &[String]) -> Result<NValue> {
    let reply = forward(ctx, "QUIT", args)?;
    ctx.notify(KeyEvent::Quit);
    Ok(reply)
}
