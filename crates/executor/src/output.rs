//! Outputs and responses produced by the pipeline.
//!
//! Every verb produces exactly one output type on success; the mapping is
//! documented on [`Verb`](crate::Verb). A failed or interrupted verb still
//! produces exactly one [`Response`].

use std::time::Duration;

use kvbridge_core::{
    DatabaseContent, DatabaseInfo, DiscoveryInfo, Error, NDbKValue, NKey, ResultTree, ServerInfo,
    ServerInfoSnapshot,
};

use crate::request::{Initiator, Verb};

/// Successful (or partial) result of a verb.
#[derive(Debug)]
pub enum Output {
    /// No return value (connect, delete, flush, backup)
    Unit,

    /// Result tree of a script run
    Tree(ResultTree),

    /// Server info and selected database
    Discovery(DiscoveryInfo),

    /// Database listing
    Databases(Vec<DatabaseInfo>),

    /// One page of database content
    Content(DatabaseContent),

    /// The newly selected database
    Database(DatabaseInfo),

    /// A loaded key
    Key(NDbKValue),

    /// Keys actually affected
    Keys(Vec<NKey>),

    /// Server statistics
    ServerInfo(ServerInfo),

    /// Stored server-info samples
    History(Vec<ServerInfoSnapshot>),

    /// Server configuration properties
    Properties(Vec<(String, String)>),
}

impl Output {
    /// The result tree, if this output carries one.
    pub fn tree(&self) -> Option<&ResultTree> {
        match self {
            Output::Tree(tree) => Some(tree),
            _ => None,
        }
    }
}

/// How a verb finished: a result or an error, never both.
#[derive(Debug)]
pub enum Outcome {
    /// Ran to completion
    Complete(Output),
    /// Stopped early by `interrupt()`; carries what was produced so far
    Interrupted(Output),
    /// Stopped by an error
    Failed(Error),
}

impl Outcome {
    /// Output of a complete or interrupted run.
    pub fn output(&self) -> Option<&Output> {
        match self {
            Outcome::Complete(output) | Outcome::Interrupted(output) => Some(output),
            Outcome::Failed(_) => None,
        }
    }

    /// Error of a failed run.
    pub fn error(&self) -> Option<&Error> {
        match self {
            Outcome::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// True for `Complete`.
    pub fn is_complete(&self) -> bool {
        matches!(self, Outcome::Complete(_))
    }

    /// True for `Interrupted`.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Outcome::Interrupted(_))
    }

    /// Split a handler result: `Interrupted` errors carry `partial`.
    pub(crate) fn from_result(result: kvbridge_core::Result<Output>, partial: Output) -> Self {
        match result {
            Ok(output) => Outcome::Complete(output),
            Err(e) if e.is_interrupted() => Outcome::Interrupted(partial),
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// The answer to one request.
#[derive(Debug)]
pub struct Response {
    /// Who asked
    pub initiator: Initiator,
    /// The request's verb and payload
    pub verb: Verb,
    /// How it finished
    pub outcome: Outcome,
    /// Time spent on the worker
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_keeps_partial_output() {
        let partial = Output::Keys(vec![NKey::new("a")]);
        let outcome = Outcome::from_result(Err(Error::Interrupted), partial);
        assert!(outcome.is_interrupted());
        assert!(matches!(outcome.output(), Some(Output::Keys(keys)) if keys.len() == 1));
        assert!(outcome.error().is_none());
    }

    #[test]
    fn test_other_errors_fail() {
        let outcome = Outcome::from_result(Err(Error::NotConnected), Output::Unit);
        assert_eq!(outcome.error(), Some(&Error::NotConnected));
        assert!(outcome.output().is_none());

        let outcome = Outcome::from_result(Ok(Output::Unit), Output::Unit);
        assert!(outcome.is_complete());
    }
}
