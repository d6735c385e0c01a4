//! Flow dispatcher — the main execution driver.
//!
//! The [`FlowDispatcher`] walks the compiled execution graph one node at a
//! time: block boundaries are dispatched synchronously (skip jumps past the
//! paired end, repeat jumps back past the paired start), while a non-skipped
//! step renders its content and suspends the walk until a
//! [`Command::CompleteStep`] arrives on the command channel. One record is
//! appended per completed presentation, enriched with the engine's level and
//! timestamps before it reaches the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};

use crate::core::event_bus::FlowEvent;
use crate::core::flow_context::FlowContext;
use crate::core::runtime_context::RuntimeContext;
use crate::error::{FlowError, FlowResult};
use crate::graph::{ExecutionGraph, ExecutionNode, NodeId};
use crate::record::{Record, RecordStore, FIELD_END_TIME, FIELD_LEVEL, FIELD_START_TIME};
use crate::render::{PresentationContext, Renderer};
use crate::template::Step;

/// Execution status of a flow.
#[derive(Debug, Clone)]
pub enum ExecutionStatus {
    Running,
    /// A rendered step is on screen, waiting for its completion signal.
    AwaitingCompletion {
        node: NodeId,
        level: u32,
        rendered_at_ms: i64,
    },
    Completed {
        records: usize,
    },
    Failed(String),
}

/// External command to control flow execution.
#[derive(Debug)]
pub enum Command {
    /// Complete the step currently awaiting completion. The engine overwrites
    /// the reserved record fields before appending; the ack reports whether
    /// the signal was accepted.
    CompleteStep {
        fields: HashMap<String, Value>,
        ack: oneshot::Sender<FlowResult<()>>,
    },
}

/// Sender wrapper for engine events, with an atomic active flag so that event
/// emission can be cheaply skipped when no listener is attached.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<FlowEvent>,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<FlowEvent>, active: Arc<AtomicBool>) -> Self {
        Self { tx, active }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub async fn emit(&self, event: FlowEvent) {
        if self.is_active() {
            let _ = self.tx.send(event).await;
        }
    }
}

/// The execution engine for one run.
///
/// Each dispatcher owns its own graph, counters and collaborators; any number
/// of them can run in the same process.
pub struct FlowDispatcher {
    graph: ExecutionGraph,
    renderer: Arc<dyn Renderer>,
    store: Arc<dyn RecordStore>,
    context: RuntimeContext,
    event_emitter: EventEmitter,
    execution_id: String,
    status_tx: Option<watch::Sender<ExecutionStatus>>,
    command_rx: Option<mpsc::Receiver<Command>>,
    /// Per-node dispatch counts, indexed by `NodeId`.
    visits: Vec<u64>,
    /// Per-node completed presentations, indexed by `NodeId`.
    completions: Vec<u64>,
    records_appended: usize,
    run_started_at_ms: i64,
}

impl FlowDispatcher {
    pub fn new(
        graph: ExecutionGraph,
        renderer: Arc<dyn Renderer>,
        store: Arc<dyn RecordStore>,
        context: RuntimeContext,
        event_emitter: EventEmitter,
    ) -> Self {
        let len = graph.len();
        let execution_id = context.id_generator.next_id();
        Self {
            graph,
            renderer,
            store,
            context,
            event_emitter,
            execution_id,
            status_tx: None,
            command_rx: None,
            visits: vec![0; len],
            completions: vec![0; len],
            records_appended: 0,
            run_started_at_ms: 0,
        }
    }

    pub fn set_control_channels(
        &mut self,
        status_tx: watch::Sender<ExecutionStatus>,
        command_rx: mpsc::Receiver<Command>,
    ) {
        self.status_tx = Some(status_tx);
        self.command_rx = Some(command_rx);
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Walk the graph from its first node to the end of the chain, returning
    /// the number of records appended. Ends only by reaching `next == None`
    /// on the root end boundary; there is no mid-run cancellation.
    pub async fn run(&mut self) -> FlowResult<usize> {
        self.run_started_at_ms = self.context.time_provider.now_millis();
        tracing::debug!(execution_id = %self.execution_id, "flow run started");
        self.event_emitter
            .emit(FlowEvent::RunStarted {
                execution_id: self.execution_id.clone(),
                at_ms: self.run_started_at_ms,
            })
            .await;

        let mut cursor = Some(self.graph.first());
        while let Some(id) = cursor {
            cursor = self.dispatch(id).await?;
        }

        let at_ms = self.context.time_provider.now_millis();
        tracing::debug!(
            execution_id = %self.execution_id,
            records = self.records_appended,
            "flow run completed"
        );
        self.event_emitter
            .emit(FlowEvent::RunCompleted {
                execution_id: self.execution_id.clone(),
                records: self.records_appended,
                at_ms,
            })
            .await;
        Ok(self.records_appended)
    }

    /// Dispatch one node and return its successor, `None` ending the run.
    async fn dispatch(&mut self, id: NodeId) -> FlowResult<Option<NodeId>> {
        let ctx = self.context_for(id);
        self.visits[id.index()] += 1;

        match self.graph.node(id) {
            ExecutionNode::BlockStart(node) => {
                let skip = Arc::clone(&node.skip);
                let next = node.next;
                let past_block = self.graph.node(node.pair).next();
                if skip(&ctx) {
                    self.event_emitter.emit(FlowEvent::BlockSkipped { node: id }).await;
                    Ok(past_block)
                } else {
                    self.event_emitter.emit(FlowEvent::BlockEntered { node: id }).await;
                    Ok(next)
                }
            }
            ExecutionNode::BlockEnd(node) => {
                let repeat = Arc::clone(&node.repeat);
                let next = node.next;
                let body_first = self.graph.node(node.pair).next();
                if repeat(&ctx) {
                    self.event_emitter.emit(FlowEvent::BlockRepeated { node: id }).await;
                    Ok(body_first)
                } else {
                    self.event_emitter.emit(FlowEvent::BlockExited { node: id }).await;
                    Ok(next)
                }
            }
            ExecutionNode::Step(node) => {
                let step = node.step.clone();
                let level = node.level;
                let next = node.next;
                self.dispatch_step(id, step, level, next, ctx).await
            }
        }
    }

    async fn dispatch_step(
        &mut self,
        id: NodeId,
        step: Step,
        level: u32,
        next: Option<NodeId>,
        ctx: FlowContext,
    ) -> FlowResult<Option<NodeId>> {
        // A skipped presentation renders nothing, appends nothing, and never
        // evaluates its repeat predicate.
        if step.should_skip(&ctx) {
            self.event_emitter
                .emit(FlowEvent::StepSkipped { node: id, level })
                .await;
            return Ok(next);
        }

        let delay = step.effective_delay(&ctx);
        if delay > Duration::ZERO {
            self.renderer.clear().await;
            self.sleep_rejecting_completions(delay).await;
        }

        // Completion signals sent before this render belong to no step.
        self.reject_stale_completions().await;

        let presentation = PresentationContext {
            execution_id: self.execution_id.clone(),
            level,
            repetition: self.completions[id.index()],
        };
        self.renderer.render(step.content(), &presentation).await;
        let rendered_at_ms = self.context.time_provider.now_millis();

        if let Some(status_tx) = &self.status_tx {
            status_tx.send_replace(ExecutionStatus::AwaitingCompletion {
                node: id,
                level,
                rendered_at_ms,
            });
        }
        self.event_emitter
            .emit(FlowEvent::StepRendered {
                node: id,
                level,
                at_ms: rendered_at_ms,
            })
            .await;

        let fields = self.wait_for_completion().await?;
        let end_ms = self.context.time_provider.now_millis();

        // Engine-computed values win over author-supplied ones under the
        // reserved field names.
        let mut record = Record::from(fields);
        record.insert(FIELD_LEVEL, json!(level));
        record.insert(FIELD_START_TIME, json!(rendered_at_ms));
        record.insert(FIELD_END_TIME, json!(end_ms));
        self.store.append(record);
        self.records_appended += 1;
        self.completions[id.index()] += 1;

        self.event_emitter
            .emit(FlowEvent::StepCompleted {
                node: id,
                level,
                at_ms: end_ms,
            })
            .await;
        if let Some(status_tx) = &self.status_tx {
            status_tx.send_replace(ExecutionStatus::Running);
        }

        // Repeat replays the same node, re-evaluating its skip and delay.
        let ctx = self.context_for(id);
        if step.should_repeat(&ctx) {
            Ok(Some(id))
        } else {
            Ok(next)
        }
    }

    /// Block until the step on screen receives its completion signal.
    async fn wait_for_completion(&mut self) -> FlowResult<HashMap<String, Value>> {
        let Some(rx) = self.command_rx.as_mut() else {
            return Err(FlowError::Internal(
                "step awaiting completion but command channel is unavailable".to_string(),
            ));
        };

        let Some(command) = rx.recv().await else {
            return Err(FlowError::Internal(
                "command channel closed while a step was awaiting completion".to_string(),
            ));
        };

        match command {
            Command::CompleteStep { fields, ack } => {
                let _ = ack.send(Ok(()));
                Ok(fields)
            }
        }
    }

    /// Sleep out a step's start delay, answering any completion signal that
    /// arrives in the meantime with a usage fault — nothing is on screen yet.
    async fn sleep_rejecting_completions(&mut self, delay: Duration) {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            let Some(rx) = self.command_rx.as_mut() else {
                sleep.as_mut().await;
                return;
            };
            tokio::select! {
                _ = &mut sleep => return,
                command = rx.recv() => match command {
                    Some(Command::CompleteStep { ack, .. }) => {
                        let _ = ack.send(Err(FlowError::NoStepAwaitingCompletion));
                        tracing::warn!("completion signal rejected: step not rendered yet");
                        self.event_emitter
                            .emit(FlowEvent::CompletionRejected {
                                reason: "step not rendered yet".to_string(),
                            })
                            .await;
                    }
                    None => {
                        self.command_rx = None;
                    }
                },
            }
        }
    }

    /// Reject completion signals already queued before a render: they were
    /// sent while no step was awaiting one.
    async fn reject_stale_completions(&mut self) {
        let mut rejected = 0usize;
        if let Some(rx) = self.command_rx.as_mut() {
            while let Ok(command) = rx.try_recv() {
                match command {
                    Command::CompleteStep { ack, .. } => {
                        let _ = ack.send(Err(FlowError::NoStepAwaitingCompletion));
                        rejected += 1;
                    }
                }
            }
        }
        for _ in 0..rejected {
            tracing::warn!("completion signal rejected: no step awaiting completion");
            self.event_emitter
                .emit(FlowEvent::CompletionRejected {
                    reason: "no step awaiting completion".to_string(),
                })
                .await;
        }
    }

    fn context_for(&self, id: NodeId) -> FlowContext {
        FlowContext {
            records: self.records_appended,
            completions: self.completions[id.index()],
            visits: self.visits[id.index()],
            elapsed_ms: self
                .context
                .time_provider
                .elapsed_ms(self.run_started_at_ms),
        }
    }
}
