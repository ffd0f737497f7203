//! The asynchronous request/response pipeline
//!
//! A [`Server`] owns one worker thread and one driver. Callers post
//! [`Request`]s from any thread; the worker runs them one at a time in
//! arrival order and reports everything on the event channel returned by
//! [`Server::start`].
//!
//! While the queue is empty and the driver is connected, the worker samples
//! `server_info` every `history.interval_ms` and appends it to the
//! connection's history file.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use kvbridge_core::{
    CommandLoggingType, DatabaseContent, Error, ErrorKind, Node, Result, ResultTree,
    ServerInfoSnapshot, TreeObserver,
};
use kvbridge_engine::{DriverEvent, EngineConfig, ScriptOptions, ServerHistory};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::engine::{AnyDriver, ConnectionSettings};
use crate::event::Event;
use crate::output::{Outcome, Output, Response};
use crate::request::{Initiator, Request, Verb};

struct Shared {
    queue: Mutex<VecDeque<Request>>,
    work_ready: Condvar,
    shutdown: AtomicBool,
}

impl Shared {
    fn enqueue(&self, request: Request) {
        self.queue.lock().push_back(request);
        self.work_ready.notify_one();
    }
}

/// Handle to one connection's worker thread.
///
/// Dropping the server stops accepting requests, lets the worker finish
/// what is queued, disconnects and joins the thread.
pub struct Server {
    name: String,
    shared: Arc<Shared>,
    events: Sender<Event>,
    interrupt: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Server {
    /// Spawn the worker for `settings`.
    ///
    /// Returns the server and the receiving end of its event channel.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `config` does not validate, `Io` when the
    /// thread cannot be spawned.
    pub fn start(settings: ConnectionSettings, config: EngineConfig) -> Result<(Server, Receiver<Event>)> {
        config.validate()?;
        let (events, receiver) = mpsc::channel();
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let driver = AnyDriver::new(&settings.backend, settings.driver_options(&config));
        let interrupt = driver.interrupt_flag();
        let worker = Worker {
            history: ServerHistory::new(&config.history.directory, &settings.name),
            sampling: config.history.enabled,
            interval: Duration::from_millis(config.history.interval_ms),
            last_sample: Instant::now(),
            driver,
            startup_commands: settings.startup_commands.clone(),
            shared: Arc::clone(&shared),
            events: events.clone(),
        };

        let handle = std::thread::Builder::new()
            .name(format!("kvbridge-{}", settings.name))
            .spawn(move || worker.run())
            .map_err(|e| Error::Io {
                reason: format!("failed to spawn worker thread: {}", e),
            })?;
        info!(target: "kvbridge::server", name = %settings.name, backend = %settings.backend.connection_type(), "worker started");

        Ok((
            Server {
                name: settings.name,
                shared,
                events,
                interrupt,
                worker: Some(handle),
            },
            receiver,
        ))
    }

    /// Connection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `request`; `Started` is sent before this returns.
    ///
    /// # Errors
    ///
    /// `NotConnected` after [`shutdown_worker`](Self::shutdown_worker).
    pub fn post(&self, request: Request) -> Result<Initiator> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }
        let initiator = request.initiator;
        let _ = self.events.send(Event::Started {
            initiator,
            verb: request.verb.clone(),
        });
        self.shared.enqueue(request);
        Ok(initiator)
    }

    /// Queue `verb` on behalf of a fresh initiator.
    pub fn submit(&self, verb: Verb) -> Result<Initiator> {
        self.post(Request::new(verb))
    }

    /// Ask the running request to stop at its next checkpoint.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    /// Stop accepting requests, drain the queue and join the worker.
    ///
    /// The driver is disconnected on the worker thread. Calling this twice
    /// is harmless.
    pub fn shutdown_worker(&mut self) {
        {
            // Hold the lock so the worker cannot miss the notification
            // between its shutdown check and its wait.
            let _queue = self.shared.queue.lock();
            self.shared.shutdown.store(true, Ordering::Release);
            self.shared.work_ready.notify_all();
        }
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!(target: "kvbridge::server", name = %self.name, "worker thread panicked");
            }
            info!(target: "kvbridge::server", name = %self.name, "worker stopped");
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}

/// Streams tree changes of one script run to the event channel.
struct ChannelObserver {
    initiator: Initiator,
    events: Sender<Event>,
}

impl TreeObserver for ChannelObserver {
    fn child_added(&mut self, node: &Node) {
        let _ = self.events.send(Event::ChildAdded {
            initiator: self.initiator,
            node: node.clone(),
        });
    }

    fn node_updated(&mut self, node: &Node) {
        let _ = self.events.send(Event::NodeUpdated {
            initiator: self.initiator,
            node: node.clone(),
        });
    }
}

struct Worker {
    driver: AnyDriver,
    startup_commands: Vec<String>,
    history: ServerHistory,
    sampling: bool,
    interval: Duration,
    last_sample: Instant,
    shared: Arc<Shared>,
    events: Sender<Event>,
}

impl Worker {
    fn run(mut self) {
        while let Some(request) = self.next_request() {
            self.handle(request);
        }
        if self.driver.is_connected() {
            if let Err(e) = self.driver.disconnect() {
                error!(target: "kvbridge::server", error = %e, "disconnect on shutdown failed");
            }
        }
        self.forward_driver_events();
    }

    /// Block until a request is queued or shutdown is requested with an
    /// empty queue, sampling history while idle.
    fn next_request(&mut self) -> Option<Request> {
        let shared = Arc::clone(&self.shared);
        let mut queue = shared.queue.lock();
        loop {
            if let Some(request) = queue.pop_front() {
                return Some(request);
            }
            if shared.shutdown.load(Ordering::Acquire) {
                return None;
            }
            if self.sampling && self.driver.is_connected() {
                let due = self.last_sample + self.interval;
                let now = Instant::now();
                if now >= due {
                    MutexGuard::unlocked(&mut queue, || self.sample_history());
                    continue;
                }
                shared.work_ready.wait_for(&mut queue, due - now);
            } else {
                shared.work_ready.wait(&mut queue);
            }
        }
    }

    fn sample_history(&mut self) {
        self.last_sample = Instant::now();
        let info = match self.driver.server_info() {
            Ok(info) => info,
            Err(e) if e.kind() == ErrorKind::Unsupported => {
                debug!(target: "kvbridge::history", backend = %self.driver.connection_type(), "backend has no server info, sampling off");
                self.sampling = false;
                return;
            }
            Err(e) => {
                warn!(target: "kvbridge::history", error = %e, "server info sample failed");
                return;
            }
        };
        let snapshot = ServerInfoSnapshot {
            timestamp: Utc::now(),
            info,
        };
        if let Err(e) = self.history.append(&snapshot) {
            warn!(target: "kvbridge::history", error = %e, "failed to store sample");
        }
        self.forward_driver_events();
        self.send(Event::ServerInfoSnapshot(snapshot));
    }

    fn handle(&mut self, request: Request) {
        let Request {
            initiator,
            error,
            verb,
        } = request;
        debug!(target: "kvbridge::server", initiator = %initiator, verb = verb.name(), "handling request");

        self.driver.clear_interrupt();
        self.progress(initiator, 0);
        let started = Instant::now();
        let was_connected = self.driver.is_connected();

        let outcome = match error {
            Some(e) => Outcome::Failed(e),
            None => {
                let run = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    self.dispatch(initiator, &verb)
                }));
                match run {
                    Ok(outcome) => outcome,
                    Err(payload) => {
                        let message = payload
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| payload.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "(non-string panic)".to_string());
                        error!(target: "kvbridge::server", verb = verb.name(), panic = %message, "request handler panicked");
                        Outcome::Failed(Error::native(format!(
                            "{} failed unexpectedly: {}",
                            verb.name(),
                            message
                        )))
                    }
                }
            }
        };

        if let Outcome::Failed(e) = &outcome {
            if e.kind() == ErrorKind::Unsupported {
                warn!(target: "kvbridge::server", verb = verb.name(), "{}", e);
            } else {
                debug!(target: "kvbridge::server", verb = verb.name(), error = %e, "request failed");
            }
        }

        self.forward_driver_events();
        self.progress(initiator, 100);
        if matches!(verb, Verb::Connect) && outcome.is_complete() && !was_connected {
            self.last_sample = Instant::now();
            for verb in [Verb::DiscoveryInfo, Verb::ProcessConfigArgs] {
                let request = Request::new(verb);
                self.send(Event::Started {
                    initiator: request.initiator,
                    verb: request.verb.clone(),
                });
                self.shared.enqueue(request);
            }
        }
        self.send(Event::Response(Response {
            initiator,
            verb,
            outcome,
            elapsed: started.elapsed(),
        }));
    }

    fn dispatch(&mut self, initiator: Initiator, verb: &Verb) -> Outcome {
        let driver = &mut self.driver;
        match verb {
            Verb::Connect => unit(driver.connect()),
            Verb::Disconnect => unit(driver.disconnect()),
            Verb::DiscoveryInfo => complete(driver.discovery_info().map(Output::Discovery)),
            Verb::ProcessConfigArgs => self.process_config_args(initiator),
            Verb::Execute {
                text,
                repeat,
                msec_repeat_interval,
                silence,
                history,
            } => {
                let options = ScriptOptions {
                    repeat: *repeat,
                    msec_repeat_interval: *msec_repeat_interval,
                    silence: *silence,
                    history: *history,
                };
                self.execute(initiator, text, &options)
            }
            Verb::LoadDatabases => complete(driver.databases().map(Output::Databases)),
            Verb::LoadDatabaseContent {
                pattern,
                count,
                cursor,
            } => {
                let mut content = DatabaseContent {
                    database: String::new(),
                    pattern: pattern.clone(),
                    count: *count,
                    cursor_in: *cursor,
                    cursor_out: 0,
                    keys: Vec::new(),
                };
                let result = driver.load_database_content(&mut content);
                partial(result, Output::Content(content))
            }
            Verb::SetDefaultDatabase { name } => {
                complete(driver.set_default_database(name).map(Output::Database))
            }
            Verb::CreateKey { key } => unit(driver.create_key(key)),
            Verb::LoadKey { key, value_type } => {
                complete(driver.load_key(key, *value_type).map(Output::Key))
            }
            Verb::DeleteKeys { keys } => complete(driver.delete_keys(keys).map(Output::Keys)),
            Verb::RenameKey { key, new_name } => unit(driver.rename_key(key, new_name)),
            Verb::ChangeTtl { key, ttl } => unit(driver.change_ttl(key, *ttl)),
            Verb::RemoveAllKeys => unit(driver.remove_all_keys()),
            Verb::ServerInfo => complete(driver.server_info().map(Output::ServerInfo)),
            Verb::ServerInfoHistory => complete(self.history.load().map(Output::History)),
            Verb::ClearHistory => unit(self.history.clear()),
            Verb::ServerPropertyGet => complete(driver.properties().map(Output::Properties)),
            Verb::ServerPropertySet { name, value } => unit(driver.set_property(name, value)),
            Verb::ChangePassword { old, new } => unit(driver.change_password(old, new)),
            Verb::SetMaxConnections { max } => unit(driver.set_max_connections(*max)),
            Verb::Backup { path } => unit(driver.backup(path)),
            Verb::Export { path } => unit(driver.export(path)),
            Verb::ShutDown => unit(driver.shutdown()),
        }
    }

    fn execute(&mut self, initiator: Initiator, text: &str, options: &ScriptOptions) -> Outcome {
        let mut tree = self.new_tree(initiator, text);
        let events = self.events.clone();
        let mut last = 0u8;
        let mut progress = |percent: u8| {
            if percent > last {
                last = percent;
                let _ = events.send(Event::Progress { initiator, percent });
            }
        };
        let result = self.driver.execute_script(&mut tree, text, options, &mut progress);
        tree.take_observer();
        partial(result, Output::Tree(tree))
    }

    /// Run the connection's startup commands as `Inner` commands.
    fn process_config_args(&mut self, initiator: Initiator) -> Outcome {
        let text = self.startup_commands.join("\n");
        let mut tree = self.new_tree(initiator, &text);
        let root = tree.root();
        let mut result = Ok(());
        for line in self.startup_commands.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
            if self.driver.is_interrupted() {
                result = Err(Error::Interrupted);
                break;
            }
            self.send(Event::CommandLogged {
                text: line.to_string(),
                logging: CommandLoggingType::Inner,
            });
            if let Err(e) = self.driver.execute(&mut tree, root, line, CommandLoggingType::Inner) {
                result = Err(e);
                break;
            }
        }
        tree.take_observer();
        partial(result, Output::Tree(tree))
    }

    fn new_tree(&self, initiator: Initiator, text: &str) -> ResultTree {
        let mut tree = ResultTree::new(text);
        if let Some(root) = tree.get(tree.root()) {
            self.send(Event::RootCreated {
                initiator,
                node: root.clone(),
            });
        }
        tree.set_observer(Box::new(ChannelObserver {
            initiator,
            events: self.events.clone(),
        }));
        tree
    }

    fn forward_driver_events(&mut self) {
        for event in self.driver.take_events() {
            let event = match event {
                DriverEvent::Key(key) => Event::KeyChanged(key),
                DriverEvent::CommandLogged { text, logging } => Event::CommandLogged { text, logging },
            };
            self.send(event);
        }
    }

    fn progress(&self, initiator: Initiator, percent: u8) {
        self.send(Event::Progress { initiator, percent });
    }

    fn send(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

fn complete(result: Result<Output>) -> Outcome {
    Outcome::from_result(result, Output::Unit)
}

fn unit(result: Result<()>) -> Outcome {
    complete(result.map(|()| Output::Unit))
}

/// `output` is the result on success and the partial result on interruption.
fn partial(result: Result<()>, output: Output) -> Outcome {
    match result {
        Ok(()) => Outcome::Complete(output),
        Err(e) if e.is_interrupted() => Outcome::Interrupted(output),
        Err(e) => Outcome::Failed(e),
    }
}
