//! Redis backend over RESP2
//!
//! A blocking socket speaks RESP2 to the server. Connecting authenticates
//! with `AUTH` when a password is configured and selects the configured
//! database. A rejected `AUTH` leaves the socket open but unauthenticated,
//! which the driver reports as `NotAuthenticated`.

mod commands;
pub mod resp;
mod translator;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use kvbridge_core::{ConnectionType, DatabaseInfo, Error, NValue, Result, ServerInfo, ValueType};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::net::{self, Wire};
use crate::backend::Backend;
use crate::connection::NativeConnector;
use crate::registry::CommandRegistry;

pub use translator::RedisTranslator;

/// Where and how to reach a Redis server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Password for `AUTH`
    pub password: Option<String>,
    /// Database selected after connecting
    pub db: u32,
    /// Connect, read and write timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            timeout_ms: 5_000,
        }
    }
}

impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("db", &self.db)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// An open Redis socket.
pub struct RedisHandle {
    wire: Wire,
    db: u32,
    password: Option<String>,
    authenticated: bool,
}

impl RedisHandle {
    /// Send one command and read its reply.
    pub fn call<S: AsRef<str>>(&mut self, args: &[S]) -> Result<NValue> {
        self.wire.send(&resp::encode_command(args))?;
        let reply = resp::read_frame(&mut self.wire.reader).map(resp::Frame::into_value);
        self.wire.track(reply)
    }

    /// Selected database index.
    pub fn db(&self) -> u32 {
        self.db
    }

    fn key_count(&mut self) -> Result<u64> {
        let reply = self.call(&["DBSIZE"])?;
        reply
            .as_integer()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| Error::native(format!("unexpected DBSIZE reply: {}", reply)))
    }

    fn config_get(&mut self, pattern: &str) -> Result<Vec<(String, String)>> {
        let reply = self.call(&["CONFIG", "GET", pattern])?;
        let items = reply.as_array().unwrap_or(&[]);
        Ok(items
            .chunks(2)
            .filter(|pair| pair.len() == 2)
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect())
    }
}

/// Opens Redis sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedisConnector;

impl NativeConnector for RedisConnector {
    type Config = RedisConfig;
    type Handle = RedisHandle;

    fn open(&mut self, config: &RedisConfig) -> Result<RedisHandle> {
        let timeout = Duration::from_millis(config.timeout_ms.max(1));
        let stream = net::connect(&config.host, config.port, timeout)?;
        let mut handle = RedisHandle {
            wire: Wire::new(stream)?,
            db: 0,
            password: config.password.clone(),
            authenticated: true,
        };

        if let Some(password) = config.password.as_deref() {
            match handle.call(&["AUTH", password]) {
                Ok(_) => {}
                Err(e) if handle.wire.is_broken() => return Err(e),
                Err(e) => {
                    warn!(target: "kvbridge::conn", error = %e, "AUTH rejected");
                    handle.authenticated = false;
                    return Ok(handle);
                }
            }
        }
        if config.db != 0 {
            handle.call(&["SELECT".to_string(), config.db.to_string()])?;
            handle.db = config.db;
        }
        debug!(target: "kvbridge::conn", host = %config.host, port = config.port, "redis socket open");
        Ok(handle)
    }

    fn close(&mut self, mut handle: RedisHandle) -> Result<()> {
        if !handle.wire.is_broken() {
            let _ = handle.call(&["QUIT"]);
        }
        handle.wire.shutdown();
        Ok(())
    }

    fn is_open(&self, handle: &RedisHandle) -> bool {
        !handle.wire.is_broken()
    }
}

/// The Redis backend.
pub struct Redis;

impl Backend for Redis {
    type Connector = RedisConnector;
    type Translator = RedisTranslator;
    const CONNECTION_TYPE: ConnectionType = ConnectionType::Redis;

    fn translator() -> RedisTranslator {
        RedisTranslator
    }

    fn registry() -> &'static CommandRegistry<RedisHandle> {
        &commands::REGISTRY
    }

    fn is_authenticated(handle: &RedisHandle) -> bool {
        handle.authenticated
    }

    fn current_database(handle: &mut RedisHandle) -> Result<DatabaseInfo> {
        let count = handle.key_count()?;
        Ok(DatabaseInfo::new(handle.db.to_string(), Some(count), true))
    }

    fn databases(handle: &mut RedisHandle) -> Result<Vec<DatabaseInfo>> {
        let total = handle
            .config_get("databases")?
            .first()
            .and_then(|(_, n)| n.parse::<u32>().ok())
            .unwrap_or(16);
        let current = Self::current_database(handle)?;
        Ok((0..total)
            .map(|i| {
                if i == handle.db {
                    current.clone()
                } else {
                    DatabaseInfo::new(i.to_string(), None, false)
                }
            })
            .collect())
    }

    fn key_type(handle: &mut RedisHandle, key: &str) -> Result<ValueType> {
        let reply = handle.call(&["TYPE", key])?;
        Ok(ValueType::from_name(&reply.to_string()))
    }

    fn server_info(handle: &mut RedisHandle) -> Result<ServerInfo> {
        let reply = handle.call(&["INFO"])?;
        Ok(ServerInfo::parse(&reply.to_string()))
    }

    fn backup(handle: &mut RedisHandle, path: &Path) -> Result<()> {
        handle.call(&["SAVE"])?;
        let settings = handle.config_get("dir")?;
        let dir = settings.first().map(|(_, v)| v.clone()).unwrap_or_default();
        let file = handle
            .config_get("dbfilename")?
            .first()
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| "dump.rdb".to_string());
        let source = Path::new(&dir).join(file);
        if !source.exists() {
            return Err(Error::unsupported(format!(
                "Backup needs the server's dump file at {} to be reachable.",
                source.display()
            )));
        }
        std::fs::copy(&source, path)?;
        Ok(())
    }

    fn export(handle: &mut RedisHandle, path: &Path) -> Result<()> {
        let mut object = serde_json::Map::new();
        let mut cursor = "0".to_string();
        loop {
            let reply = handle.call(&["SCAN", cursor.as_str(), "COUNT", "1000"])?;
            let (next, keys) = match reply.as_array() {
                Some([next, NValue::Array(keys)]) => (next.to_string(), keys.clone()),
                _ => return Err(Error::native(format!("malformed SCAN reply: {}", reply))),
            };
            for key in keys {
                let key = key.to_string();
                let ty = Self::key_type(handle, &key)?;
                let command = translator::load_args(&key, ty);
                let value = handle.call(command.as_slice())?.coerce(ty);
                object.insert(key, serde_json::Value::String(value.to_string()));
            }
            if next == "0" {
                break;
            }
            cursor = next;
        }
        let text = serde_json::to_string_pretty(&serde_json::Value::Object(object))
            .map_err(|e| Error::Io {
                reason: e.to_string(),
            })?;
        std::fs::write(path, text)?;
        Ok(())
    }

    fn properties(handle: &mut RedisHandle) -> Result<Vec<(String, String)>> {
        handle.config_get("*")
    }

    fn set_property(handle: &mut RedisHandle, name: &str, value: &str) -> Result<()> {
        handle.call(&["CONFIG", "SET", name, value]).map(|_| ())
    }

    fn change_password(handle: &mut RedisHandle, old: &str, new: &str) -> Result<()> {
        if handle.password.as_deref().unwrap_or("") != old {
            return Err(Error::invalid_argument("old password does not match"));
        }
        handle.call(&["CONFIG", "SET", "requirepass", new])?;
        handle.password = Some(new.to_string()).filter(|p| !p.is_empty());
        Ok(())
    }

    fn set_max_connections(handle: &mut RedisHandle, max: u32) -> Result<()> {
        let max = max.to_string();
        handle.call(&["CONFIG", "SET", "maxclients", max.as_str()]).map(|_| ())
    }

    fn shutdown(handle: &mut RedisHandle) -> Result<()> {
        // A successful SHUTDOWN closes the socket without replying.
        match handle.call(&["SHUTDOWN"]) {
            Ok(_) => Ok(()),
            Err(_) if handle.wire.is_broken() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Driver, DriverEvent, DriverOptions};
    use kvbridge_core::{CommandLoggingType, ErrorKind, KeyEvent, NDbKValue, NKey, ResultTree};
    use std::io::{BufReader, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    /// Answers each incoming command with the next canned reply, then `+OK`.
    /// An empty reply hangs up instead.
    fn serve(stream: TcpStream, replies: Vec<&'static str>) -> Vec<Vec<String>> {
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        let mut replies = replies.into_iter();
        let mut seen = Vec::new();
        while let Ok(frame) = resp::read_frame(&mut reader) {
            let words = match frame.into_value() {
                Ok(NValue::Array(words)) => words.iter().map(ToString::to_string).collect(),
                _ => break,
            };
            seen.push(words);
            let reply = replies.next().unwrap_or("+OK\r\n");
            if reply.is_empty() || writer.write_all(reply.as_bytes()).is_err() {
                break;
            }
        }
        seen
    }

    fn fake_server(replies: Vec<&'static str>) -> (u16, JoinHandle<Vec<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            serve(stream, replies)
        });
        (port, handle)
    }

    /// One connection per entry of `sessions`, served in order.
    fn fake_sessions(sessions: Vec<Vec<&'static str>>) -> (u16, JoinHandle<Vec<Vec<Vec<String>>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            sessions
                .into_iter()
                .map(|replies| serve(listener.accept().unwrap().0, replies))
                .collect()
        });
        (port, handle)
    }

    fn get(driver: &mut Driver<Redis>, key: &str) -> Result<NValue> {
        let line = format!("get {}", key);
        let mut tree = ResultTree::new(line.as_str());
        let root = tree.root();
        let cmd = driver.execute(&mut tree, root, &line, CommandLoggingType::User)?;
        Ok(tree.reply(cmd).cloned().unwrap_or(NValue::Null))
    }

    fn config(port: u16) -> RedisConfig {
        RedisConfig {
            port,
            timeout_ms: 2_000,
            ..RedisConfig::default()
        }
    }

    #[test]
    fn test_password_is_redacted() {
        let config = RedisConfig {
            password: Some("hunter2".into()),
            ..RedisConfig::default()
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_rejected_auth_is_not_authenticated() {
        let (port, server) = fake_server(vec!["-WRONGPASS invalid password\r\n"]);
        let mut driver = Driver::<Redis>::new(DriverOptions::default());
        let err = driver
            .connect(&RedisConfig {
                password: Some("bad".into()),
                ..config(port)
            })
            .unwrap_err();
        assert_eq!(err, Error::NotAuthenticated);
        assert!(!driver.is_connected());

        let seen = server.join().unwrap();
        assert_eq!(seen[0], vec!["AUTH", "bad"]);
        assert_eq!(seen[1], vec!["QUIT"]);
    }

    #[test]
    fn test_commands_round_trip_and_raise_events() {
        let (port, server) = fake_server(vec!["+OK\r\n", "$5\r\nhello\r\n"]);
        let mut driver = Driver::<Redis>::new(DriverOptions::default());
        driver.connect(&config(port)).unwrap();

        driver.create_key(&NDbKValue::new("greeting", "hello")).unwrap();
        let mut tree = ResultTree::new("get greeting");
        let root = tree.root();
        let cmd = driver
            .execute(&mut tree, root, "get greeting", CommandLoggingType::User)
            .unwrap();
        assert_eq!(tree.reply(cmd), Some(&NValue::from("hello")));

        let keys: Vec<KeyEvent> = driver
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                DriverEvent::Key(k) => Some(k),
                _ => None,
            })
            .collect();
        assert_eq!(
            keys,
            vec![
                KeyEvent::Added(NDbKValue::new("greeting", "hello")),
                KeyEvent::Loaded(NDbKValue::new("greeting", "hello")),
            ]
        );

        driver.disconnect().unwrap();
        let seen = server.join().unwrap();
        assert_eq!(seen[0], vec!["SET", "greeting", "hello"]);
        assert_eq!(seen[1], vec!["GET", "greeting"]);
    }

    #[test]
    fn test_scan_is_truncated_to_count() {
        let (port, server) = fake_server(vec![
            "*2\r\n$2\r\n42\r\n*3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n",
        ]);
        let mut driver = Driver::<Redis>::new(DriverOptions::default());
        driver.connect(&config(port)).unwrap();
        let page = driver.scan(0, "*", 2).unwrap();
        assert_eq!(page.keys, vec!["a", "b"]);
        assert_eq!(page.cursor_out, 42);
        driver.disconnect().unwrap();

        let seen = server.join().unwrap();
        assert_eq!(seen[0], vec!["SCAN", "0", "MATCH", "*", "COUNT", "2"]);
    }

    #[test]
    fn test_ttl_commands_reach_the_server() {
        let (port, server) = fake_server(vec![":1\r\n", ":30\r\n"]);
        let mut driver = Driver::<Redis>::new(DriverOptions::default());
        driver.connect(&config(port)).unwrap();
        driver.change_ttl(&NKey::from("k"), 30).unwrap();
        assert_eq!(driver.load_ttl(&NKey::from("k")).unwrap(), 30);
        driver.disconnect().unwrap();

        let seen = server.join().unwrap();
        assert_eq!(seen[0], vec!["EXPIRE", "k", "30"]);
        assert_eq!(seen[1], vec!["TTL", "k"]);
    }

    #[test]
    fn test_registry_handles_multi_word_commands() {
        let tokens: Vec<String> = ["config", "get", "maxmemory"].iter().map(|s| s.to_string()).collect();
        let (holder, used) = Redis::registry().find(&tokens).unwrap();
        assert_eq!(holder.name, "CONFIG GET");
        assert_eq!(used, 2);
    }

    #[test]
    fn test_malformed_reply_drops_the_socket() {
        let (port, server) = fake_sessions(vec![
            vec!["$3\r\nabcd\r\n:7\r\n"],
            vec!["$5\r\nfresh\r\n"],
        ]);
        let mut driver = Driver::<Redis>::new(DriverOptions::default());
        driver.connect(&config(port)).unwrap();

        let err = get(&mut driver, "k").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NativeFailure);
        assert!(!driver.is_connected());
        assert_eq!(get(&mut driver, "k").unwrap_err(), Error::NotConnected);

        driver.connect(&config(port)).unwrap();
        assert_eq!(get(&mut driver, "k").unwrap(), NValue::from("fresh"));
        driver.disconnect().unwrap();

        let sessions = server.join().unwrap();
        assert_eq!(sessions[0], vec![vec!["GET", "k"]]);
        assert_eq!(sessions[1][0], vec!["GET", "k"]);
    }

    #[test]
    fn test_server_hangup_is_io_error() {
        let (port, server) = fake_server(vec![""]);
        let mut driver = Driver::<Redis>::new(DriverOptions::default());
        driver.connect(&config(port)).unwrap();

        let err = get(&mut driver, "k").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(!driver.is_connected());
        driver.disconnect().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_oversized_bulk_drops_the_socket() {
        let (port, server) = fake_server(vec!["$9223372036854775807\r\n"]);
        let mut driver = Driver::<Redis>::new(DriverOptions::default());
        driver.connect(&config(port)).unwrap();

        let err = get(&mut driver, "k").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NativeFailure);
        assert!(!driver.is_connected());
        driver.disconnect().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_error_reply_keeps_the_socket() {
        let (port, server) = fake_server(vec!["-ERR wrong kind of value\r\n", "$2\r\nok\r\n"]);
        let mut driver = Driver::<Redis>::new(DriverOptions::default());
        driver.connect(&config(port)).unwrap();

        assert_eq!(get(&mut driver, "k").unwrap_err(), Error::native("ERR wrong kind of value"));
        assert!(driver.is_connected());
        assert_eq!(get(&mut driver, "k").unwrap(), NValue::from("ok"));
        driver.disconnect().unwrap();
        server.join().unwrap();
    }
}
