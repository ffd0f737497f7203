//! Result tree capturing command replies
//!
//! A run of one or more commands produces a tree:
//!
//! ```text
//! root (Scalar: the submitted text)
//! ├── Command "SET a 1"
//! │   └── Scalar "OK"
//! └── Command "LRANGE l 0 -1"
//!     └── Array ["x", "y"]
//! ```
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Each node keeps
//! its parent's id as a back reference; children are owned by the arena,
//! so there is no reference cycle.
//!
//! ## Invariants
//!
//! - Children are append-only.
//! - Once a Command node is sealed, neither it nor anything below it can
//!   be updated or extended.
//! - The installed [`TreeObserver`] sees every append and every update, in
//!   the order they happen.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::types::{CommandLoggingType, ConnectionType};
use crate::value::NValue;

/// Index of a node in its [`ResultTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    /// Position in the arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// What the literal command node records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    /// Command line as executed
    pub text: String,
    /// Who issued it
    pub logging: CommandLoggingType,
    /// Backend it ran against
    pub connection: ConnectionType,
}

/// Node variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// A single value
    Scalar,
    /// A list of values, rendered one per delimiter
    Array,
    /// One executed command; its single child is the reply
    Command(CommandInfo),
}

/// One node of a [`ResultTree`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    parent: Option<NodeId>,
    kind: NodeKind,
    value: NValue,
    delimiter: String,
    children: Vec<NodeId>,
    sealed: bool,
}

impl Node {
    /// This node's id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Parent id, `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Node variant.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Captured value.
    pub fn value(&self) -> &NValue {
        &self.value
    }

    /// Separator used when rendering array elements.
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Children in append order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Command details when this is a Command node.
    pub fn command(&self) -> Option<&CommandInfo> {
        match &self.kind {
            NodeKind::Command(info) => Some(info),
            _ => None,
        }
    }

    /// True once the owning command completed.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

/// Receives tree notifications.
pub trait TreeObserver: Send {
    /// A node was appended; `node.parent()` is always `Some`.
    fn child_added(&mut self, node: &Node);

    /// A node's value changed.
    fn node_updated(&mut self, node: &Node);
}

/// Arena of result nodes rooted at the submitted text.
pub struct ResultTree {
    nodes: Vec<Node>,
    observer: Option<Box<dyn TreeObserver>>,
}

impl ResultTree {
    /// Create a tree whose root holds `text` with an empty delimiter.
    pub fn new(text: impl Into<String>) -> Self {
        let root = Node {
            id: NodeId(0),
            parent: None,
            kind: NodeKind::Scalar,
            value: NValue::String(text.into()),
            delimiter: String::new(),
            children: Vec::new(),
            sealed: false,
        };
        ResultTree {
            nodes: vec![root],
            observer: None,
        }
    }

    /// Create a tree and install `observer` before any child is added.
    pub fn with_observer(text: impl Into<String>, observer: Box<dyn TreeObserver>) -> Self {
        let mut tree = ResultTree::new(text);
        tree.observer = Some(observer);
        tree
    }

    /// Install or replace the observer.
    pub fn set_observer(&mut self, observer: Box<dyn TreeObserver>) {
        self.observer = Some(observer);
    }

    /// Remove the observer, returning it.
    pub fn take_observer(&mut self) -> Option<Box<dyn TreeObserver>> {
        self.observer.take()
    }

    /// Id of the root node.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Look up a node.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Number of nodes including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always has a root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Children of `id`, empty for unknown ids.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(Node::children).unwrap_or(&[])
    }

    /// Command nodes directly below the root, in execution order.
    pub fn command_nodes(&self) -> Vec<&Node> {
        self.children(self.root())
            .iter()
            .filter_map(|id| self.get(*id))
            .filter(|node| node.command().is_some())
            .collect()
    }

    fn check_writable(&self, id: NodeId) -> Result<()> {
        let mut current = Some(id);
        while let Some(cur) = current {
            let node = self
                .get(cur)
                .ok_or_else(|| Error::invalid_argument(format!("no result node {}", id.0)))?;
            if node.sealed {
                return Err(Error::invalid_argument(format!(
                    "result node {} belongs to a completed command",
                    id.0
                )));
            }
            current = node.parent;
        }
        Ok(())
    }

    fn push(&mut self, parent: NodeId, kind: NodeKind, value: NValue, delimiter: &str) -> Result<NodeId> {
        self.check_writable(parent)?;
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            parent: Some(parent),
            kind,
            value,
            delimiter: delimiter.to_string(),
            children: Vec::new(),
            sealed: false,
        });
        self.nodes[parent.0].children.push(id);
        let node = &self.nodes[id.0];
        if let Some(observer) = self.observer.as_mut() {
            observer.child_added(node);
        }
        Ok(id)
    }

    /// Append a Command node under `parent`.
    pub fn append_command(&mut self, parent: NodeId, info: CommandInfo, delimiter: &str) -> Result<NodeId> {
        let text = NValue::String(info.text.clone());
        self.push(parent, NodeKind::Command(info), text, delimiter)
    }

    /// Append a reply under `parent`: collections become Array nodes,
    /// everything else a Scalar node.
    pub fn append_value(&mut self, parent: NodeId, value: NValue, delimiter: &str) -> Result<NodeId> {
        let kind = if value.is_collection() {
            NodeKind::Array
        } else {
            NodeKind::Scalar
        };
        self.push(parent, kind, value, delimiter)
    }

    /// Replace a node's value.
    pub fn update_value(&mut self, id: NodeId, value: NValue) -> Result<()> {
        self.check_writable(id)?;
        self.nodes[id.0].value = value;
        let node = &self.nodes[id.0];
        if let Some(observer) = self.observer.as_mut() {
            observer.node_updated(node);
        }
        Ok(())
    }

    /// Mark a node and everything below it as complete.
    pub fn seal(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(cur.0) {
                node.sealed = true;
                stack.extend(node.children.iter().copied());
            }
        }
    }

    /// First reply value below a Command node.
    pub fn reply(&self, command: NodeId) -> Option<&NValue> {
        self.children(command)
            .first()
            .and_then(|id| self.get(*id))
            .map(Node::value)
    }

    /// Render a subtree as text.
    ///
    /// Scalars print their value, arrays their elements separated by the
    /// node's delimiter, other nodes their children one per line.
    pub fn render(&self, id: NodeId) -> String {
        let Some(node) = self.get(id) else {
            return String::new();
        };
        match node.kind {
            NodeKind::Array => match &node.value {
                NValue::Array(items) | NValue::Set(items) => items
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(&node.delimiter),
                other => other.to_args().join(&node.delimiter),
            },
            NodeKind::Scalar if node.children.is_empty() => node.value.to_string(),
            _ => node
                .children
                .iter()
                .map(|child| self.render(*child))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl fmt::Debug for ResultTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultTree")
            .field("nodes", &self.nodes)
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

impl Clone for ResultTree {
    /// The clone carries no observer.
    fn clone(&self) -> Self {
        ResultTree {
            nodes: self.nodes.clone(),
            observer: None,
        }
    }
}

impl PartialEq for ResultTree {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl TreeObserver for Recorder {
        fn child_added(&mut self, node: &Node) {
            self.events
                .lock()
                .unwrap()
                .push(format!("add {} -> {}", node.parent().unwrap().index(), node.id().index()));
        }

        fn node_updated(&mut self, node: &Node) {
            self.events
                .lock()
                .unwrap()
                .push(format!("update {}", node.id().index()));
        }
    }

    fn info(text: &str) -> CommandInfo {
        CommandInfo {
            text: text.to_string(),
            logging: CommandLoggingType::User,
            connection: ConnectionType::Redb,
        }
    }

    #[test]
    fn test_root_holds_text() {
        let tree = ResultTree::new("GET a");
        let root = tree.get(tree.root()).unwrap();
        assert_eq!(root.value(), &NValue::from("GET a"));
        assert_eq!(root.delimiter(), "");
        assert!(root.parent().is_none());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_append_sets_parent_and_kind() {
        let mut tree = ResultTree::new("script");
        let cmd = tree.append_command(tree.root(), info("LRANGE l 0 -1"), "\n").unwrap();
        let arr = tree
            .append_value(cmd, NValue::Array(vec!["x".into(), "y".into()]), "\n")
            .unwrap();

        assert_eq!(tree.get(arr).unwrap().parent(), Some(cmd));
        assert_eq!(tree.get(arr).unwrap().kind(), &NodeKind::Array);
        assert_eq!(tree.children(cmd), &[arr]);
        assert_eq!(tree.command_nodes().len(), 1);
        assert_eq!(tree.render(tree.root()), "x\ny");
    }

    #[test]
    fn test_observer_sees_appends_and_updates_in_order() {
        let recorder = Recorder::default();
        let mut tree = ResultTree::with_observer("x", Box::new(recorder.clone()));
        let cmd = tree.append_command(tree.root(), info("GET a"), " ").unwrap();
        let reply = tree.append_value(cmd, NValue::from("1"), " ").unwrap();
        tree.update_value(reply, NValue::from("2")).unwrap();

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events, vec!["add 0 -> 1", "add 1 -> 2", "update 2"]);
    }

    #[test]
    fn test_sealed_command_rejects_changes() {
        let mut tree = ResultTree::new("x");
        let cmd = tree.append_command(tree.root(), info("GET a"), " ").unwrap();
        let reply = tree.append_value(cmd, NValue::from("1"), " ").unwrap();
        tree.seal(cmd);

        assert!(tree.get(reply).unwrap().is_sealed());
        assert!(tree.update_value(reply, NValue::from("2")).is_err());
        assert!(tree.append_value(cmd, NValue::from("3"), " ").is_err());
        // siblings under the root are still allowed
        assert!(tree.append_command(tree.root(), info("GET b"), " ").is_ok());
    }

    #[test]
    fn test_reply_and_render_scalar() {
        let mut tree = ResultTree::new("x");
        let cmd = tree.append_command(tree.root(), info("GET a"), " ").unwrap();
        tree.append_value(cmd, NValue::Integer(5), " ").unwrap();
        assert_eq!(tree.reply(cmd), Some(&NValue::Integer(5)));
        assert_eq!(tree.render(cmd), "5");
    }

    #[test]
    fn test_clone_drops_observer() {
        let tree = ResultTree::with_observer("x", Box::new(Recorder::default()));
        let copy = tree.clone();
        assert_eq!(copy, tree);
        assert!(format!("{:?}", copy).contains("observed: false"));
    }

    #[test]
    fn test_unknown_parent_is_rejected() {
        let mut tree = ResultTree::new("x");
        let bogus = NodeId(42);
        assert!(tree.append_value(bogus, NValue::Null, "").is_err());
    }
}
