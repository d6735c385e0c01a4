//! High-level flow runner and handle.
//!
//! [`FlowRunner`] (constructed via [`FlowRunnerBuilder`]) is the main entry
//! point for executing an authored [`Sequence`]. It compiles the template
//! tree into a fresh execution graph, spawns the dispatcher on its own task,
//! and returns a [`FlowHandle`] for observing the run and signalling step
//! completions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex};

use crate::compiler::FlowCompiler;
use crate::core::dispatcher::{Command, EventEmitter, ExecutionStatus, FlowDispatcher};
use crate::core::event_bus::FlowEvent;
use crate::core::runtime_context::RuntimeContext;
use crate::error::{FlowError, FlowResult};
use crate::record::{MemoryRecordStore, RecordStore};
use crate::render::{NullRenderer, Renderer};
use crate::template::Sequence;

/// Flow runner with builder-based configuration.
///
/// Use [`FlowRunner::builder(sequence)`](Self::builder) to obtain a
/// [`FlowRunnerBuilder`]. Every run owns its own graph and engine state;
/// any number of runs may live in one process.
pub struct FlowRunner;

impl FlowRunner {
    /// Create a new builder from an authored root sequence.
    pub fn builder(sequence: Sequence) -> FlowRunnerBuilder {
        FlowRunnerBuilder {
            sequence,
            renderer: Arc::new(NullRenderer),
            store: Arc::new(MemoryRecordStore::new()),
            context: RuntimeContext::default(),
            collect_events: true,
        }
    }
}

/// Builder for configuring and launching a run.
pub struct FlowRunnerBuilder {
    sequence: Sequence,
    renderer: Arc<dyn Renderer>,
    store: Arc<dyn RecordStore>,
    context: RuntimeContext,
    collect_events: bool,
}

impl FlowRunnerBuilder {
    /// Set the renderer that step content is handed to.
    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Set the record store completed-step records are appended to.
    pub fn record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = store;
        self
    }

    /// Set the runtime context (time and ID providers).
    pub fn runtime_context(mut self, context: RuntimeContext) -> Self {
        self.context = context;
        self
    }

    /// Enable or disable event collection.
    pub fn collect_events(mut self, collect: bool) -> Self {
        self.collect_events = collect;
        self
    }

    /// Compile the sequence into a fresh execution graph and start walking
    /// it on a spawned task. Returns immediately with a [`FlowHandle`].
    pub fn run(self) -> FlowHandle {
        let compiled = FlowCompiler::compile(&self.sequence);

        let (event_tx, mut event_rx) = mpsc::channel(256);
        let event_active = Arc::new(AtomicBool::new(self.collect_events));
        let event_emitter = EventEmitter::new(event_tx, Arc::clone(&event_active));

        let events = if self.collect_events {
            Some(Arc::new(Mutex::new(Vec::new())))
        } else {
            None
        };
        if let Some(events_clone) = events.clone() {
            let active_flag = Arc::clone(&event_active);
            tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    events_clone.lock().await.push(event);
                }
                active_flag.store(false, Ordering::Relaxed);
            });
        } else {
            event_active.store(false, Ordering::Relaxed);
            drop(event_rx);
        }

        let (status_tx, status_rx) = watch::channel(ExecutionStatus::Running);
        let (command_tx, command_rx) = mpsc::channel(64);

        let mut dispatcher = FlowDispatcher::new(
            compiled.into_graph(),
            self.renderer,
            self.store,
            self.context,
            event_emitter,
        );
        dispatcher.set_control_channels(status_tx.clone(), command_rx);
        let execution_id = dispatcher.execution_id().to_string();

        tokio::spawn(async move {
            match dispatcher.run().await {
                Ok(records) => {
                    let _ = status_tx.send(ExecutionStatus::Completed { records });
                }
                Err(e) => {
                    let _ = status_tx.send(ExecutionStatus::Failed(e.to_string()));
                }
            }
        });

        FlowHandle {
            execution_id,
            status_rx,
            events,
            event_active,
            command_tx,
        }
    }
}

/// Handle to a running or completed flow.
///
/// Allows polling [`status()`](Self::status), blocking on completion via
/// [`wait()`](Self::wait), signalling the current step's completion, and
/// retrieving collected engine events.
pub struct FlowHandle {
    execution_id: String,
    status_rx: watch::Receiver<ExecutionStatus>,
    events: Option<Arc<Mutex<Vec<FlowEvent>>>>,
    event_active: Arc<AtomicBool>,
    command_tx: mpsc::Sender<Command>,
}

impl FlowHandle {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Return the current execution status (non-blocking).
    pub fn status(&self) -> ExecutionStatus {
        self.status_rx.borrow().clone()
    }

    /// Block until the run reaches a terminal status.
    ///
    /// If the engine task dies without publishing one (e.g. a predicate
    /// panicked), the run is reported as failed.
    pub async fn wait(&self) -> ExecutionStatus {
        let mut rx = self.status_rx.clone();
        loop {
            let status = rx.borrow().clone();
            match status {
                ExecutionStatus::Completed { .. } | ExecutionStatus::Failed(_) => return status,
                _ => {
                    if rx.changed().await.is_err() {
                        let last = rx.borrow().clone();
                        return match last {
                            ExecutionStatus::Completed { .. } | ExecutionStatus::Failed(_) => last,
                            _ => ExecutionStatus::Failed(
                                "engine task terminated without a terminal status".to_string(),
                            ),
                        };
                    }
                }
            }
        }
    }

    /// Block until the run either suspends on a rendered step or terminates.
    pub async fn wait_for_step(&self) -> ExecutionStatus {
        let mut rx = self.status_rx.clone();
        loop {
            let status = rx.borrow().clone();
            match status {
                ExecutionStatus::AwaitingCompletion { .. }
                | ExecutionStatus::Completed { .. }
                | ExecutionStatus::Failed(_) => return status,
                _ => {
                    if rx.changed().await.is_err() {
                        return ExecutionStatus::Failed(
                            "engine task terminated without a terminal status".to_string(),
                        );
                    }
                }
            }
        }
    }

    /// Complete the step currently awaiting completion.
    ///
    /// The engine overwrites the reserved fields `level`, `start_time` and
    /// `end_time` in `fields` with its own values before appending the
    /// record. Calling this while no rendered step is awaiting completion is
    /// a usage fault and returns [`FlowError::NoStepAwaitingCompletion`]
    /// without advancing the run.
    pub async fn complete_step(&self, fields: HashMap<String, Value>) -> FlowResult<()> {
        complete_over(&self.command_tx, fields).await
    }

    /// A cloneable completion entry point, for handing into rendered content
    /// or asynchronous handlers associated with it.
    pub fn completer(&self) -> StepCompleter {
        StepCompleter {
            command_tx: self.command_tx.clone(),
        }
    }

    /// Return a snapshot of all collected engine events so far.
    pub async fn events(&self) -> Vec<FlowEvent> {
        match &self.events {
            Some(events) => events.lock().await.clone(),
            None => Vec::new(),
        }
    }

    /// Whether event collection is still active.
    pub fn events_active(&self) -> bool {
        self.event_active.load(Ordering::Relaxed)
    }
}

/// Cloneable completion signal for the step currently on screen.
#[derive(Clone)]
pub struct StepCompleter {
    command_tx: mpsc::Sender<Command>,
}

impl StepCompleter {
    /// See [`FlowHandle::complete_step`].
    pub async fn complete_step(&self, fields: HashMap<String, Value>) -> FlowResult<()> {
        complete_over(&self.command_tx, fields).await
    }
}

async fn complete_over(
    command_tx: &mpsc::Sender<Command>,
    fields: HashMap<String, Value>,
) -> FlowResult<()> {
    let (ack_tx, ack_rx) = oneshot::channel();
    command_tx
        .send(Command::CompleteStep {
            fields,
            ack: ack_tx,
        })
        .await
        .map_err(|_| FlowError::Terminated)?;
    ack_rx.await.map_err(|_| FlowError::Terminated)?
}
