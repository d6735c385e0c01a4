//! Engine events emitted during a run.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::graph::NodeId;

/// Lifecycle events of a running flow. Timestamps are epoch milliseconds
/// from the engine's time provider.
#[derive(Clone, Debug, Serialize)]
pub enum FlowEvent {
    RunStarted {
        execution_id: String,
        at_ms: i64,
    },
    /// A step's skip predicate was true: nothing rendered, no record.
    StepSkipped {
        #[serde(serialize_with = "serialize_node_id")]
        node: NodeId,
        level: u32,
    },
    /// A step's content was handed to the renderer.
    StepRendered {
        #[serde(serialize_with = "serialize_node_id")]
        node: NodeId,
        level: u32,
        at_ms: i64,
    },
    /// A rendered step received its completion signal and its record was
    /// appended.
    StepCompleted {
        #[serde(serialize_with = "serialize_node_id")]
        node: NodeId,
        level: u32,
        at_ms: i64,
    },
    BlockEntered {
        #[serde(serialize_with = "serialize_node_id")]
        node: NodeId,
    },
    /// A block's skip predicate was true: the whole body was bypassed.
    BlockSkipped {
        #[serde(serialize_with = "serialize_node_id")]
        node: NodeId,
    },
    /// A block's repeat predicate was true: the body replays from its first
    /// node.
    BlockRepeated {
        #[serde(serialize_with = "serialize_node_id")]
        node: NodeId,
    },
    BlockExited {
        #[serde(serialize_with = "serialize_node_id")]
        node: NodeId,
    },
    /// A completion signal arrived while no rendered step was awaiting one.
    CompletionRejected {
        reason: String,
    },
    RunCompleted {
        execution_id: String,
        records: usize,
        at_ms: i64,
    },
}

fn serialize_node_id<S: serde::Serializer>(id: &NodeId, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(id.index() as u64)
}

/// Event sender half.
pub type EventSender = mpsc::Sender<FlowEvent>;

/// Event receiver half.
pub type EventReceiver = mpsc::Receiver<FlowEvent>;

/// Create a bounded event channel.
pub fn create_event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(256)
}
