//! Events delivered to the presentation layer.

use kvbridge_core::{CommandLoggingType, KeyEvent, Node, ServerInfoSnapshot};

use crate::output::Response;
use crate::request::{Initiator, Verb};

/// Everything a [`Server`](crate::Server) reports on its event channel.
///
/// For one request the order is always `Started`, zero or more tree and key
/// events interleaved with non-decreasing `Progress`, `Progress(100)`, then
/// exactly one `Response`.
#[derive(Debug)]
pub enum Event {
    /// A request was accepted; sent on the posting thread
    Started {
        /// Who asked
        initiator: Initiator,
        /// What was asked
        verb: Verb,
    },
    /// Percent done, 0 to 100
    Progress {
        /// Who asked
        initiator: Initiator,
        /// Percent done
        percent: u8,
    },
    /// The request finished
    Response(Response),
    /// A script run created its result tree
    RootCreated {
        /// Who asked
        initiator: Initiator,
        /// The root node
        node: Node,
    },
    /// A node was appended to a result tree
    ChildAdded {
        /// Who asked
        initiator: Initiator,
        /// The new node
        node: Node,
    },
    /// A node's value changed
    NodeUpdated {
        /// Who asked
        initiator: Initiator,
        /// The node after the change
        node: Node,
    },
    /// A command handler changed or read a key
    KeyChanged(KeyEvent),
    /// A command was sent to the backend
    CommandLogged {
        /// Command line
        text: String,
        /// Who issued it
        logging: CommandLoggingType,
    },
    /// A server-info sample was taken and stored
    ServerInfoSnapshot(ServerInfoSnapshot),
}

impl Event {
    /// Initiator of request-scoped events.
    pub fn initiator(&self) -> Option<Initiator> {
        match self {
            Event::Started { initiator, .. }
            | Event::Progress { initiator, .. }
            | Event::RootCreated { initiator, .. }
            | Event::ChildAdded { initiator, .. }
            | Event::NodeUpdated { initiator, .. } => Some(*initiator),
            Event::Response(response) => Some(response.initiator),
            _ => None,
        }
    }
}
