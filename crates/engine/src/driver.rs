//! The execution engine for one backend connection
//!
//! A [`Driver`] owns the native handle wrapper plus the backend's
//! translator and command table. Every call blocks until the native
//! operation finishes; the asynchronous pipeline runs drivers on a
//! dedicated worker thread.
//!
//! ## States
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
//!                                   |  ^
//!                                   v  |
//!                               Interrupting
//! ```
//!
//! `Interrupting` is an overlay: the connection is still open and the
//! interrupt flag is raised, so the running script or scan stops at its
//! next checkpoint.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kvbridge_core::{
    CommandInfo, CommandLoggingType, DatabaseContent, DatabaseInfo, DiscoveryInfo, Error,
    ErrorKind, KeyEntry, KeyEvent, NDbKValue, NKey, NValue, NodeId, Result, ResultTree, ScanPage,
    ServerInfo, Ttl, ValueType, NO_TTL,
};
use tracing::{debug, info, warn};

use crate::args::{join_args, split_args};
use crate::backend::{Backend, Config};
use crate::connection::Connection;
use crate::registry::CommandContext;
use crate::translator::CommandTranslator;

/// Lifecycle state of a [`Driver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// No native handle
    Disconnected,
    /// Opening the native handle
    Connecting,
    /// Ready for commands
    Connected,
    /// Connected with the interrupt flag raised
    Interrupting,
    /// Closing the native handle
    Disconnecting,
}

/// Something the caller should hear about after a driver call.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// A handler reported a key change
    Key(KeyEvent),
    /// A command was sent to the backend
    CommandLogged {
        /// Command line
        text: String,
        /// Who issued it
        logging: CommandLoggingType,
    },
}

/// Per-connection display and paging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOptions {
    /// Separator between rendered array elements
    pub delimiter: String,
    /// Namespace separator applied to listed keys
    pub ns_separator: String,
    /// Page size for `SCAN` without `COUNT`
    pub default_scan_count: u64,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            delimiter: "\n".to_string(),
            ns_separator: ":".to_string(),
            default_scan_count: 100,
        }
    }
}

/// How a multi-line script runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptOptions {
    /// Extra rounds after the first
    pub repeat: usize,
    /// Minimum milliseconds between the starts of two rounds
    pub msec_repeat_interval: u64,
    /// Run without recording commands in the tree
    pub silence: bool,
    /// Report every command as [`DriverEvent::CommandLogged`]
    pub history: bool,
}

/// Blocking command execution against one backend.
pub struct Driver<B: Backend> {
    connection: Connection<B::Connector>,
    translator: B::Translator,
    state: DriverState,
    interrupt: Arc<AtomicBool>,
    events: Vec<DriverEvent>,
    options: DriverOptions,
}

impl<B: Backend> Driver<B>
where
    B::Connector: Default,
{
    /// Driver with the backend's default connector.
    pub fn new(options: DriverOptions) -> Self {
        Self::with_connector(B::Connector::default(), options)
    }
}

impl<B: Backend> Driver<B> {
    /// Driver around an explicit connector.
    pub fn with_connector(connector: B::Connector, options: DriverOptions) -> Self {
        Self {
            connection: Connection::new(connector),
            translator: B::translator(),
            state: DriverState::Disconnected,
            interrupt: Arc::new(AtomicBool::new(false)),
            events: Vec::new(),
            options,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the connection; a second call while connected does nothing.
    ///
    /// # Errors
    ///
    /// The connector's open error, or `NotAuthenticated` when the handle
    /// opened but failed the backend's authentication check.
    pub fn connect(&mut self, config: &Config<B>) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.state = DriverState::Connecting;
        if let Err(e) = self.connection.connect(config) {
            self.state = DriverState::Disconnected;
            return Err(e);
        }
        let authenticated = self
            .connection
            .handle()
            .map(B::is_authenticated)
            .unwrap_or(false);
        if !authenticated {
            self.state = DriverState::Disconnecting;
            let _ = self.connection.disconnect();
            self.state = DriverState::Disconnected;
            return Err(Error::NotAuthenticated);
        }
        self.state = DriverState::Connected;
        info!(target: "kvbridge::driver", backend = %B::CONNECTION_TYPE, "driver connected");
        Ok(())
    }

    /// Close the connection; does nothing when already disconnected.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.state == DriverState::Disconnected && !self.connection.is_connected() {
            return self.connection.disconnect();
        }
        self.state = DriverState::Disconnecting;
        let result = self.connection.disconnect();
        self.state = DriverState::Disconnected;
        result
    }

    /// True while the native handle is open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DriverState {
        match self.state {
            DriverState::Connected if !self.connection.is_connected() => DriverState::Disconnected,
            DriverState::Connected if self.interrupt.load(Ordering::Acquire) => {
                DriverState::Interrupting
            }
            state => state,
        }
    }

    /// Configuration of the open connection.
    pub fn config(&self) -> Option<&Config<B>> {
        self.connection.config()
    }

    /// Backend family.
    pub fn connection_type(&self) -> kvbridge_core::ConnectionType {
        B::CONNECTION_TYPE
    }

    /// Display and paging settings.
    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// The wrapped connector.
    pub fn connector(&self) -> &B::Connector {
        self.connection.connector()
    }

    // =========================================================================
    // Interruption
    // =========================================================================

    /// Shared interrupt flag; raising it stops the current run at its
    /// next checkpoint.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Raise the interrupt flag.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Release);
    }

    /// Lower the interrupt flag.
    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::Release);
    }

    /// Whether the interrupt flag is raised.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }

    fn checkpoint(&self) -> Result<()> {
        if self.is_interrupted() {
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    /// Drain notifications raised since the last call.
    pub fn take_events(&mut self) -> Vec<DriverEvent> {
        std::mem::take(&mut self.events)
    }

    // =========================================================================
    // Command execution
    // =========================================================================

    /// Execute one command line and record it under `parent`.
    ///
    /// On success the tree gains one sealed Command node with exactly one
    /// reply child, and its id is returned. On error the tree is unchanged.
    pub fn execute(
        &mut self,
        tree: &mut ResultTree,
        parent: NodeId,
        line: &str,
        logging: CommandLoggingType,
    ) -> Result<NodeId> {
        let tokens = split_args(line)?;
        if tokens.is_empty() {
            return Err(Error::invalid_argument("Empty command line."));
        }
        let registry = B::registry();
        let (holder, used) = registry
            .find(&tokens)
            .ok_or_else(|| Error::unknown_command(line.trim()))?;
        let args = &tokens[used..];
        holder.check_arity(args.len())?;

        let handle = self.connection.handle_mut()?;
        debug!(target: "kvbridge::driver", backend = %B::CONNECTION_TYPE, command = %line.trim(), "executing");

        let mut raised = Vec::new();
        let reply = {
            let mut ctx = CommandContext::new(
                handle,
                registry,
                &mut raised,
                &self.interrupt,
                self.options.default_scan_count,
            );
            (holder.handler)(&mut ctx, args)
        };
        self.events.extend(raised.into_iter().map(DriverEvent::Key));
        let reply = reply?;

        let info = CommandInfo {
            text: line.trim().to_string(),
            logging,
            connection: B::CONNECTION_TYPE,
        };
        let command = tree.append_command(parent, info, &self.options.delimiter)?;
        tree.append_value(command, reply, &self.options.delimiter)?;
        tree.seal(command);
        Ok(command)
    }

    /// Execute a newline-separated script.
    ///
    /// Commands run in textual order. The interrupt flag is checked before
    /// each command; interruption and the first failure both stop the run
    /// without undoing commands that already ran. `progress` receives
    /// values below 100 as commands complete.
    pub fn execute_script(
        &mut self,
        tree: &mut ResultTree,
        text: &str,
        options: &ScriptOptions,
        progress: &mut dyn FnMut(u8),
    ) -> Result<()> {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.is_empty() {
            return Err(Error::invalid_argument("Empty command line."));
        }

        let rounds = options.repeat.saturating_add(1);
        let total = lines.len().saturating_mul(rounds).max(1);
        let mut done = 0usize;

        for round in 0..rounds {
            let started = Instant::now();
            for line in &lines {
                self.checkpoint()?;
                if options.history {
                    self.events.push(DriverEvent::CommandLogged {
                        text: line.to_string(),
                        logging: CommandLoggingType::User,
                    });
                }
                if options.silence {
                    let mut scratch = ResultTree::new(*line);
                    let root = scratch.root();
                    self.execute(&mut scratch, root, line, CommandLoggingType::User)?;
                } else {
                    let root = tree.root();
                    self.execute(tree, root, line, CommandLoggingType::User)?;
                }
                done += 1;
                progress(((done * 100) / total).min(99) as u8);
            }

            if round + 1 < rounds {
                let interval = Duration::from_millis(options.msec_repeat_interval);
                self.sleep_interruptible(interval.saturating_sub(started.elapsed()))?;
            }
        }
        Ok(())
    }

    fn sleep_interruptible(&self, mut remaining: Duration) -> Result<()> {
        const SLICE: Duration = Duration::from_millis(20);
        while !remaining.is_zero() {
            self.checkpoint()?;
            let step = remaining.min(SLICE);
            std::thread::sleep(step);
            remaining -= step;
        }
        Ok(())
    }

    /// Execute one engine-issued command and return its reply.
    pub fn run_inner(&mut self, line: &str) -> Result<NValue> {
        self.events.push(DriverEvent::CommandLogged {
            text: line.to_string(),
            logging: CommandLoggingType::Inner,
        });
        let mut scratch = ResultTree::new(line);
        let root = scratch.root();
        let command = self.execute(&mut scratch, root, line, CommandLoggingType::Inner)?;
        Ok(scratch.reply(command).cloned().unwrap_or(NValue::Null))
    }

    // =========================================================================
    // Key operations
    // =========================================================================

    /// Whether `command` is one of this backend's read verbs.
    pub fn is_load_command(&self, command: &str) -> bool {
        self.translator.is_load_command(command)
    }

    /// Store a key.
    pub fn create_key(&mut self, kv: &NDbKValue) -> Result<()> {
        let command = self.translator.create(kv)?;
        self.run_inner(&command).map(|_| ())
    }

    /// Read a key, coercing the reply to `ty`.
    pub fn load_key(&mut self, key: &NKey, ty: ValueType) -> Result<NDbKValue> {
        let command = self.translator.load(key, ty)?;
        let value = self.run_inner(&command)?.coerce(ty);
        Ok(NDbKValue {
            key: key.clone(),
            value,
            ttl: NO_TTL,
        })
    }

    /// Delete keys one by one; keys that fail are skipped.
    ///
    /// Returns the keys that were actually removed.
    pub fn delete_keys(&mut self, keys: &[NKey]) -> Result<Vec<NKey>> {
        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            self.checkpoint()?;
            let command = match self.translator.delete(key) {
                Ok(command) => command,
                Err(e) => {
                    debug!(target: "kvbridge::driver", key = %key, error = %e, "skipping key");
                    continue;
                }
            };
            match self.run_inner(&command) {
                Ok(NValue::Integer(0)) => {}
                Ok(_) => removed.push(key.clone()),
                Err(e) if e.is_interrupted() => return Err(e),
                Err(e) => {
                    warn!(target: "kvbridge::driver", key = %key, error = %e, "delete failed");
                }
            }
        }
        Ok(removed)
    }

    /// Rename a key.
    pub fn rename_key(&mut self, key: &NKey, new_name: &str) -> Result<()> {
        let command = self.translator.rename(key, new_name)?;
        self.run_inner(&command).map(|_| ())
    }

    /// Change a key's expiry.
    pub fn change_ttl(&mut self, key: &NKey, ttl: Ttl) -> Result<()> {
        let command = self.translator.change_ttl(key, ttl)?;
        self.run_inner(&command).map(|_| ())
    }

    /// Read a key's expiry.
    pub fn load_ttl(&mut self, key: &NKey) -> Result<Ttl> {
        let command = self.translator.load_ttl(key)?;
        let reply = self.run_inner(&command)?;
        reply
            .as_integer()
            .ok_or_else(|| Error::native(format!("unexpected TTL reply: {}", reply)))
    }

    // =========================================================================
    // Databases
    // =========================================================================

    /// One page of keys matching `pattern`, at most `count` long.
    pub fn scan(&mut self, cursor: u64, pattern: &str, count: u64) -> Result<ScanPage> {
        if count == 0 {
            return Ok(ScanPage {
                cursor_in: cursor,
                cursor_out: 0,
                keys: Vec::new(),
            });
        }
        let command = join_args([
            "SCAN".to_string(),
            cursor.to_string(),
            "MATCH".to_string(),
            pattern.to_string(),
            "COUNT".to_string(),
            count.to_string(),
        ]);
        let reply = self.run_inner(&command)?;
        parse_scan_reply(cursor, reply, count)
    }

    /// Fill `content` with one page of keys plus their types and expiries.
    ///
    /// Keys loaded before an interruption or failure stay in `content`.
    pub fn load_database_content(&mut self, content: &mut DatabaseContent) -> Result<()> {
        content.database = self.current_database()?.name;
        let page = self.scan(content.cursor_in, &content.pattern, content.count)?;
        content.cursor_out = page.cursor_out;

        for key in page.keys {
            self.checkpoint()?;
            let value_type = B::key_type(self.connection.handle_mut()?, &key)?;
            let key = NKey::with_separator(key, self.options.ns_separator.as_str());
            let ttl = match self.load_ttl(&key) {
                Ok(ttl) => ttl,
                Err(e) if e.kind() == ErrorKind::Unsupported => NO_TTL,
                Err(e) => return Err(e),
            };
            content.keys.push(KeyEntry {
                key,
                value_type,
                ttl,
            });
        }
        Ok(())
    }

    /// The selected database.
    pub fn current_database(&mut self) -> Result<DatabaseInfo> {
        B::current_database(self.connection.handle_mut()?)
    }

    /// Every database the backend exposes.
    pub fn databases(&mut self) -> Result<Vec<DatabaseInfo>> {
        B::databases(self.connection.handle_mut()?)
    }

    /// Select another database.
    pub fn set_default_database(&mut self, name: &str) -> Result<DatabaseInfo> {
        self.run_inner(&join_args(["SELECT", name]))?;
        self.current_database()
    }

    /// Delete every key of the selected database.
    pub fn remove_all_keys(&mut self) -> Result<()> {
        self.run_inner("FLUSHDB").map(|_| ())
    }

    // =========================================================================
    // Server
    // =========================================================================

    /// Server statistics.
    pub fn server_info(&mut self) -> Result<ServerInfo> {
        B::server_info(self.connection.handle_mut()?)
    }

    /// Server statistics (when supported) and the selected database.
    pub fn discovery_info(&mut self) -> Result<DiscoveryInfo> {
        let server_info = match self.server_info() {
            Ok(info) => Some(info),
            Err(e) if e.kind() == ErrorKind::Unsupported => None,
            Err(e) => return Err(e),
        };
        Ok(DiscoveryInfo {
            server_info,
            current_database: self.current_database()?,
        })
    }

    /// Copy the store to `path`.
    pub fn backup(&mut self, path: &Path) -> Result<()> {
        B::backup(self.connection.handle_mut()?, path)
    }

    /// Export the selected database to `path`.
    pub fn export(&mut self, path: &Path) -> Result<()> {
        B::export(self.connection.handle_mut()?, path)
    }

    /// Server configuration properties.
    pub fn properties(&mut self) -> Result<Vec<(String, String)>> {
        B::properties(self.connection.handle_mut()?)
    }

    /// Change one server property.
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<()> {
        B::set_property(self.connection.handle_mut()?, name, value)
    }

    /// Change the server password.
    pub fn change_password(&mut self, old: &str, new: &str) -> Result<()> {
        B::change_password(self.connection.handle_mut()?, old, new)
    }

    /// Change the server's client limit.
    pub fn set_max_connections(&mut self, max: u32) -> Result<()> {
        B::set_max_connections(self.connection.handle_mut()?, max)
    }

    /// Ask the server to stop, then drop the connection.
    pub fn shutdown(&mut self) -> Result<()> {
        B::shutdown(self.connection.handle_mut()?)?;
        self.disconnect()
    }
}

/// Decode `[cursor, [key, ...]]`, keeping at most `count` keys.
fn parse_scan_reply(cursor_in: u64, reply: NValue, count: u64) -> Result<ScanPage> {
    let malformed = || Error::native(format!("malformed SCAN reply: {}", reply));
    let parts = reply.as_array().ok_or_else(malformed)?;
    let [cursor, keys] = parts else {
        return Err(malformed());
    };
    let cursor_out = cursor
        .as_integer()
        .and_then(|c| u64::try_from(c).ok())
        .ok_or_else(malformed)?;
    let mut keys: Vec<String> = keys
        .as_array()
        .ok_or_else(malformed)?
        .iter()
        .map(ToString::to_string)
        .collect();
    keys.truncate(usize::try_from(count).unwrap_or(usize::MAX));
    Ok(ScanPage {
        cursor_in,
        cursor_out,
        keys,
    })
}
