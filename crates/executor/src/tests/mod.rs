//! Test modules for the executor crate.

pub mod pipeline;

use std::sync::mpsc::Receiver;
use std::time::Duration;

use kvbridge_engine::backends::RedbConfig;
use kvbridge_engine::{EngineConfig, HistoryConfig};
use tempfile::TempDir;

use crate::{BackendConfig, ConnectionSettings, Event, Initiator, Response, Server};

const WAIT: Duration = Duration::from_secs(10);

/// Settings for a redb file inside `dir`.
pub(crate) fn redb_settings(dir: &TempDir) -> ConnectionSettings {
    ConnectionSettings::new(
        "local",
        BackendConfig::Redb(RedbConfig::new(dir.path().join("store.redb"))),
    )
}

/// Engine config with history under `dir`, sampling off.
pub(crate) fn engine_config(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        history: HistoryConfig {
            enabled: false,
            interval_ms: 10_000,
            directory: dir.path().join("history"),
        },
        ..EngineConfig::default()
    }
}

pub(crate) fn start(dir: &TempDir) -> (Server, Receiver<Event>) {
    Server::start(redb_settings(dir), engine_config(dir)).unwrap()
}

/// Collect events until the response for `initiator` arrives.
///
/// Returns the events of that request (the response excluded) plus every
/// event not tied to a request.
pub(crate) fn wait_for(events: &Receiver<Event>, initiator: Initiator) -> (Vec<Event>, Response) {
    let mut seen = Vec::new();
    loop {
        let event = events
            .recv_timeout(WAIT)
            .expect("no response before timeout");
        match event {
            Event::Response(response) if response.initiator == initiator => {
                return (seen, response);
            }
            other => match other.initiator() {
                Some(id) if id != initiator => {}
                _ => seen.push(other),
            },
        }
    }
}

/// Connect and wait for the connect response and both follow-ups.
pub(crate) fn connect(server: &Server, events: &Receiver<Event>) {
    let id = server.submit(crate::Verb::Connect).unwrap();
    let (_, response) = wait_for(events, id);
    assert!(response.outcome.is_complete(), "{:?}", response.outcome);

    let mut pending = 2;
    while pending > 0 {
        if let Event::Response(response) = events.recv_timeout(WAIT).unwrap() {
            assert!(matches!(
                response.verb,
                crate::Verb::DiscoveryInfo | crate::Verb::ProcessConfigArgs
            ));
            pending -= 1;
        }
    }
}

/// Percent values of the progress events in `events`.
pub(crate) fn progress(events: &[Event]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}
