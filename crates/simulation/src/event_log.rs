//! Append-only log of causally stamped events.
//!
//! Events from different nodes are ordered only by their vector clocks; the
//! order in the log is the order in which nodes happened to append.

use faultline_types::{MessageId, NodeId, VectorClock};
use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// What happened.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind<M> {
    /// The node started running an actor.
    OperationStart {
        /// Index of the actor in the node's sequence.
        actor: usize,
        /// Rendered actor, e.g. `put(1, 2)`.
        operation: String,
    },

    /// The node received a message.
    MessageReceived {
        /// Sending node.
        sender: NodeId,
        /// Id assigned at send time.
        id: MessageId,
        /// The payload.
        payload: M,
    },

    /// The node crashed.
    NodeCrash,

    /// The node learned that another node crashed.
    CrashNotification {
        /// The crashed node.
        failed: NodeId,
    },

    /// A new incarnation of the node started recovering.
    ProcessRecovery,
}

impl<M: fmt::Debug> fmt::Display for EventKind<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::OperationStart { actor, operation } => {
                write!(f, "OperationStart(actor={}, {})", actor, operation)
            }
            EventKind::MessageReceived {
                sender,
                id,
                payload,
            } => write!(f, "MessageReceived({:?}, from={}, {})", payload, sender, id),
            EventKind::NodeCrash => write!(f, "NodeCrash"),
            EventKind::CrashNotification { failed } => {
                write!(f, "CrashNotification(failed={})", failed)
            }
            EventKind::ProcessRecovery => write!(f, "ProcessRecovery"),
        }
    }
}

/// One logged event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<M> {
    /// Node the event happened on.
    pub node: NodeId,
    /// The node's clock right after the event.
    pub clock: VectorClock,
    /// The node's state dump at the time, if it provides one.
    pub state: Option<String>,
    /// What happened.
    pub kind: EventKind<M>,
}

impl<M: fmt::Debug> fmt::Display for Event<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} clock={}", self.kind, self.clock)?;
        if let Some(state) = &self.state {
            write!(f, " state={}", state)?;
        }
        Ok(())
    }
}

/// Concurrent append-only event log of one invocation.
#[derive(Debug)]
pub struct EventLog<M> {
    events: Mutex<Vec<Event<M>>>,
}

impl<M: Clone + fmt::Debug> EventLog<M> {
    /// Create an empty log.
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Append an event.
    pub fn push(&self, event: Event<M>) {
        self.events.lock().push(event);
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing has been logged.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Copy of all events in append order.
    pub fn snapshot(&self) -> Vec<Event<M>> {
        self.events.lock().clone()
    }

    /// Events logged by `node`.
    pub fn events_of(&self, node: NodeId) -> Vec<Event<M>> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.node == node)
            .cloned()
            .collect()
    }

    /// Write `failure`, a blank line, then one `<node> # <event>` line per
    /// event.
    pub fn write_to<W: Write>(&self, failure: &str, mut out: W) -> io::Result<()> {
        writeln!(out, "{}", failure)?;
        writeln!(out)?;
        for event in self.events.lock().iter() {
            writeln!(out, "{} # {}", event.node.0, event)?;
        }
        out.flush()
    }

    /// Store the log to `path`, replacing any existing file.
    pub fn store_to_file(&self, failure: &str, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        self.write_to(failure, BufWriter::new(file))
    }
}

impl<M: Clone + fmt::Debug> Default for EventLog<M> {
    fn default() -> Self {
        Self::new()
    }
}
