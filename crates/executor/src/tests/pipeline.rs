//! Pipeline tests: request ordering, progress, outcomes and follow-ups,
//! run against a redb file.

use tempfile::TempDir;

use super::{connect, engine_config, progress, redb_settings, start, wait_for};
use crate::{
    CommandLoggingType, Error, ErrorKind, Event, KeyEvent, NDbKValue, NKey, NValue, Outcome,
    Output, Request, Server, ValueType, Verb,
};

fn command_count(outcome: &Outcome) -> usize {
    outcome
        .output()
        .and_then(Output::tree)
        .map(|tree| tree.command_nodes().len())
        .unwrap_or(0)
}

// =============================================================================
// Event ordering
// =============================================================================

#[test]
fn test_execute_streams_tree_and_ends_with_response() {
    let dir = TempDir::new().unwrap();
    let (server, events) = start(&dir);
    connect(&server, &events);

    let id = server.submit(Verb::execute("SET name alice\nGET name")).unwrap();
    let (seen, response) = wait_for(&events, id);

    assert!(matches!(seen.first(), Some(Event::Started { verb: Verb::Execute { .. }, .. })));
    assert!(seen.iter().any(|e| matches!(e, Event::RootCreated { .. })));
    let children = seen
        .iter()
        .filter(|e| matches!(e, Event::ChildAdded { .. }))
        .count();
    assert_eq!(children, 4, "two command nodes with one reply each");
    assert!(seen
        .iter()
        .any(|e| matches!(e, Event::KeyChanged(KeyEvent::Added(kv)) if kv.key == NKey::new("name"))));

    let percents = progress(&seen);
    assert_eq!(percents.first(), Some(&0));
    assert_eq!(percents.last(), Some(&100));
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));

    let tree = response.outcome.output().and_then(Output::tree).unwrap();
    let commands = tree.command_nodes();
    assert_eq!(commands.len(), 2);
    assert_eq!(
        tree.reply(commands[1].id()),
        Some(&NValue::String("alice".to_string()))
    );
    assert_eq!(commands[0].command().unwrap().logging, CommandLoggingType::User);
}

#[test]
fn test_requests_run_in_arrival_order() {
    let dir = TempDir::new().unwrap();
    let (server, events) = start(&dir);
    connect(&server, &events);

    let ids: Vec<_> = (0..5)
        .map(|i| server.submit(Verb::execute(format!("SET k v{}", i))).unwrap())
        .collect();
    let last = server
        .submit(Verb::LoadKey {
            key: NKey::new("k"),
            value_type: ValueType::String,
        })
        .unwrap();

    let mut answered = Vec::new();
    loop {
        if let Event::Response(response) = events.recv_timeout(std::time::Duration::from_secs(10)).unwrap() {
            answered.push(response.initiator);
            if response.initiator == last {
                match response.outcome {
                    Outcome::Complete(Output::Key(kv)) => {
                        assert_eq!(kv.value, NValue::String("v4".to_string()));
                    }
                    other => panic!("unexpected outcome {:?}", other),
                }
                break;
            }
        }
    }
    assert_eq!(&answered[..5], &ids[..]);
}

// =============================================================================
// Follow-ups after connect
// =============================================================================

#[test]
fn test_connect_posts_discovery_and_startup_commands() {
    let dir = TempDir::new().unwrap();
    let mut settings = redb_settings(&dir);
    settings.startup_commands = vec!["SET booted yes".to_string()];
    let (server, events) = Server::start(settings, engine_config(&dir)).unwrap();

    let id = server.submit(Verb::Connect).unwrap();
    let (_, response) = wait_for(&events, id);
    assert!(response.outcome.is_complete());

    let mut discovery = None;
    let mut startup = None;
    let mut logged_inner = false;
    while discovery.is_none() || startup.is_none() {
        match events.recv_timeout(std::time::Duration::from_secs(10)).unwrap() {
            Event::Response(response) => match response.verb {
                Verb::DiscoveryInfo => discovery = Some(response.outcome),
                Verb::ProcessConfigArgs => startup = Some(response.outcome),
                other => panic!("unexpected response for {:?}", other),
            },
            Event::CommandLogged { text, logging } => {
                logged_inner |= text == "SET booted yes" && logging == CommandLoggingType::Inner;
            }
            _ => {}
        }
    }

    match discovery.unwrap() {
        Outcome::Complete(Output::Discovery(info)) => {
            assert_eq!(info.current_database.name, "default");
            assert!(info.server_info.is_some());
        }
        other => panic!("unexpected discovery outcome {:?}", other),
    }
    let startup = startup.unwrap();
    let tree = startup.output().and_then(Output::tree).unwrap();
    let commands = tree.command_nodes();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].command().unwrap().logging, CommandLoggingType::Inner);
    assert!(logged_inner);
}

#[test]
fn test_connect_twice_has_no_second_follow_up() {
    let dir = TempDir::new().unwrap();
    let (server, events) = start(&dir);
    connect(&server, &events);

    let again = server.submit(Verb::Connect).unwrap();
    let (_, response) = wait_for(&events, again);
    assert!(response.outcome.is_complete());

    let recorder = server.submit(Verb::LoadDatabases).unwrap();
    let (seen, response) = wait_for(&events, recorder);
    assert!(response.outcome.is_complete());
    assert!(!seen.iter().any(|e| matches!(e, Event::Started { verb: Verb::DiscoveryInfo, .. })));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_not_connected_fails() {
    let dir = TempDir::new().unwrap();
    let (server, events) = start(&dir);

    let id = server.submit(Verb::execute("GET a")).unwrap();
    let (seen, response) = wait_for(&events, id);
    assert_eq!(response.outcome.error(), Some(&Error::NotConnected));
    assert_eq!(progress(&seen), vec![0, 100]);
}

#[test]
fn test_propagated_error_is_answered_unchanged() {
    let dir = TempDir::new().unwrap();
    let (server, events) = start(&dir);
    connect(&server, &events);

    let error = Error::invalid_argument("bad input from an earlier step");
    let id = server
        .post(Request::new(Verb::RemoveAllKeys).with_error(error.clone()))
        .unwrap();
    let (seen, response) = wait_for(&events, id);
    assert_eq!(response.outcome.error(), Some(&error));
    assert!(!seen.iter().any(|e| matches!(e, Event::KeyChanged(KeyEvent::Flushed))));
    assert!(matches!(response.verb, Verb::RemoveAllKeys));
}

#[test]
fn test_unsupported_verb() {
    let dir = TempDir::new().unwrap();
    let (server, events) = start(&dir);
    connect(&server, &events);

    let id = server.submit(Verb::SetMaxConnections { max: 10 }).unwrap();
    let (seen, response) = wait_for(&events, id);
    let error = response.outcome.error().unwrap();
    assert_eq!(error.kind(), ErrorKind::Unsupported);
    assert_eq!(
        error.to_string(),
        "Sorry, but now redb not supported SetMaxConnections command."
    );
    assert_eq!(progress(&seen), vec![0, 100]);
}

#[test]
fn test_script_stops_at_first_failure() {
    let dir = TempDir::new().unwrap();
    let (server, events) = start(&dir);
    connect(&server, &events);

    let id = server
        .submit(Verb::execute("SET a 1\nGET missing\nSET b 2"))
        .unwrap();
    let (_, response) = wait_for(&events, id);
    assert_eq!(response.outcome.error().unwrap().kind(), ErrorKind::NativeFailure);

    let id = server
        .submit(Verb::LoadKey {
            key: NKey::new("b"),
            value_type: ValueType::String,
        })
        .unwrap();
    let (_, response) = wait_for(&events, id);
    assert!(response.outcome.error().is_some());
}

// =============================================================================
// Interruption
// =============================================================================

#[test]
fn test_interrupt_keeps_partial_tree() {
    let dir = TempDir::new().unwrap();
    let (server, events) = start(&dir);
    connect(&server, &events);

    let id = server
        .submit(Verb::Execute {
            text: "SET tick 1".to_string(),
            repeat: 10_000,
            msec_repeat_interval: 10,
            silence: false,
            history: false,
        })
        .unwrap();

    loop {
        match events.recv_timeout(std::time::Duration::from_secs(10)).unwrap() {
            Event::ChildAdded { initiator, .. } if initiator == id => break,
            _ => {}
        }
    }
    server.interrupt();

    let (_, response) = wait_for(&events, id);
    assert!(response.outcome.is_interrupted(), "{:?}", response.outcome);
    let done = command_count(&response.outcome);
    assert!(done >= 1 && done < 10_001);

    // The flag is cleared for the next request.
    let id = server.submit(Verb::execute("GET tick")).unwrap();
    let (_, response) = wait_for(&events, id);
    assert!(response.outcome.is_complete());
}

// =============================================================================
// Key and database verbs
// =============================================================================

#[test]
fn test_key_verbs() {
    let dir = TempDir::new().unwrap();
    let (server, events) = start(&dir);
    connect(&server, &events);

    for name in ["user:1", "user:2", "other"] {
        let id = server
            .submit(Verb::CreateKey {
                key: NDbKValue::new(name, "x"),
            })
            .unwrap();
        assert!(wait_for(&events, id).1.outcome.is_complete());
    }

    let id = server
        .submit(Verb::RenameKey {
            key: NKey::new("other"),
            new_name: "user:3".to_string(),
        })
        .unwrap();
    let (seen, response) = wait_for(&events, id);
    assert!(response.outcome.is_complete());
    assert!(seen
        .iter()
        .any(|e| matches!(e, Event::CommandLogged { logging: CommandLoggingType::Inner, .. })));

    let id = server
        .submit(Verb::LoadDatabaseContent {
            pattern: "user:*".to_string(),
            count: 10,
            cursor: 0,
        })
        .unwrap();
    match wait_for(&events, id).1.outcome {
        Outcome::Complete(Output::Content(content)) => {
            assert_eq!(content.database, "default");
            assert_eq!(content.keys.len(), 3);
            assert!(content.keys.iter().all(|k| k.key.namespace().as_deref() == Some("user")));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let id = server
        .submit(Verb::ChangeTtl {
            key: NKey::new("user:1"),
            ttl: 30,
        })
        .unwrap();
    assert_eq!(
        wait_for(&events, id).1.outcome.error().unwrap().kind(),
        ErrorKind::Unsupported
    );

    let id = server
        .submit(Verb::DeleteKeys {
            keys: vec![NKey::new("user:1"), NKey::new("missing")],
        })
        .unwrap();
    match wait_for(&events, id).1.outcome {
        Outcome::Complete(Output::Keys(keys)) => assert_eq!(keys, vec![NKey::new("user:1")]),
        other => panic!("unexpected outcome {:?}", other),
    }

    let id = server.submit(Verb::RemoveAllKeys).unwrap();
    let (seen, response) = wait_for(&events, id);
    assert!(response.outcome.is_complete());
    assert!(seen.iter().any(|e| matches!(e, Event::KeyChanged(KeyEvent::Flushed))));
}

#[test]
fn test_databases_and_select() {
    let dir = TempDir::new().unwrap();
    let (server, events) = start(&dir);
    connect(&server, &events);

    let id = server
        .submit(Verb::SetDefaultDatabase {
            name: "sessions".to_string(),
        })
        .unwrap();
    match wait_for(&events, id).1.outcome {
        Outcome::Complete(Output::Database(db)) => assert_eq!(db.name, "sessions"),
        other => panic!("unexpected outcome {:?}", other),
    }

    let id = server.submit(Verb::LoadDatabases).unwrap();
    match wait_for(&events, id).1.outcome {
        Outcome::Complete(Output::Databases(dbs)) => {
            assert!(dbs.iter().any(|db| db.name == "sessions" && db.is_default));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn test_silent_script_records_nothing() {
    let dir = TempDir::new().unwrap();
    let (server, events) = start(&dir);
    connect(&server, &events);

    let id = server
        .submit(Verb::Execute {
            text: "SET quiet 1".to_string(),
            repeat: 0,
            msec_repeat_interval: 0,
            silence: true,
            history: true,
        })
        .unwrap();
    let (seen, response) = wait_for(&events, id);
    assert!(response.outcome.is_complete());
    assert_eq!(command_count(&response.outcome), 0);
    assert!(seen.iter().any(|e| matches!(
        e,
        Event::CommandLogged { logging: CommandLoggingType::User, text } if text == "SET quiet 1"
    )));
    assert!(seen.iter().any(|e| matches!(e, Event::KeyChanged(KeyEvent::Added(_)))));
}

#[test]
fn test_export_and_backup() {
    let dir = TempDir::new().unwrap();
    let (server, events) = start(&dir);
    connect(&server, &events);

    let id = server.submit(Verb::execute("SET a 1")).unwrap();
    wait_for(&events, id);

    let export = dir.path().join("export.json");
    let id = server.submit(Verb::Export { path: export.clone() }).unwrap();
    assert!(wait_for(&events, id).1.outcome.is_complete());
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&export).unwrap()).unwrap();
    assert_eq!(json["a"], "1");

    let backup = dir.path().join("backup.redb");
    let id = server.submit(Verb::Backup { path: backup.clone() }).unwrap();
    assert!(wait_for(&events, id).1.outcome.is_complete());
    assert!(backup.exists());
}

// =============================================================================
// Shutdown
// =============================================================================

#[test]
fn test_drop_disconnects_and_releases_file() {
    let dir = TempDir::new().unwrap();
    {
        let (server, events) = start(&dir);
        connect(&server, &events);
        let id = server.submit(Verb::execute("SET kept yes")).unwrap();
        wait_for(&events, id);
    }

    let (server, events) = start(&dir);
    connect(&server, &events);
    let id = server
        .submit(Verb::LoadKey {
            key: NKey::new("kept"),
            value_type: ValueType::String,
        })
        .unwrap();
    match wait_for(&events, id).1.outcome {
        Outcome::Complete(Output::Key(kv)) => assert_eq!(kv.value, NValue::String("yes".to_string())),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn test_post_after_shutdown_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (mut server, _events) = start(&dir);
    server.shutdown_worker();
    server.shutdown_worker();
    assert_eq!(server.submit(Verb::Connect).unwrap_err(), Error::NotConnected);
}
