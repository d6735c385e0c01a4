//! End-to-end engine tests: skip/repeat semantics, suspension, records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use trialflow::{
    Block, ExecutionStatus, FakeTimeProvider, FlowError, FlowEvent, FlowHandle, FlowRunner,
    MemoryRecordStore, PresentationContext, RecordStore, Renderer, RuntimeContext, Sequence,
    Step, FIELD_END_TIME, FIELD_LEVEL, FIELD_START_TIME,
};

#[derive(Clone, Debug, PartialEq)]
enum RenderCall {
    Clear,
    Render(Value),
}

/// Renderer that logs calls and notifies the test over a channel.
struct TestRenderer {
    log: Mutex<Vec<RenderCall>>,
    tx: mpsc::UnboundedSender<RenderCall>,
}

impl TestRenderer {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RenderCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                log: Mutex::new(Vec::new()),
                tx,
            }),
            rx,
        )
    }

    fn log(&self) -> Vec<RenderCall> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl Renderer for TestRenderer {
    async fn clear(&self) {
        self.log.lock().push(RenderCall::Clear);
        let _ = self.tx.send(RenderCall::Clear);
    }

    async fn render(&self, content: &Value, _presentation: &PresentationContext) {
        self.log.lock().push(RenderCall::Render(content.clone()));
        let _ = self.tx.send(RenderCall::Render(content.clone()));
    }
}

struct Running {
    handle: FlowHandle,
    store: Arc<MemoryRecordStore>,
    renderer: Arc<TestRenderer>,
    calls: mpsc::UnboundedReceiver<RenderCall>,
}

fn launch(sequence: Sequence) -> Running {
    launch_with_context(sequence, RuntimeContext::default())
}

fn launch_with_context(sequence: Sequence, context: RuntimeContext) -> Running {
    let (renderer, calls) = TestRenderer::new();
    let store = Arc::new(MemoryRecordStore::new());
    let handle = FlowRunner::builder(sequence)
        .renderer(Arc::clone(&renderer) as Arc<dyn Renderer>)
        .record_store(Arc::clone(&store) as Arc<dyn RecordStore>)
        .runtime_context(context)
        .run();
    Running {
        handle,
        store,
        renderer,
        calls,
    }
}

async fn next_render(calls: &mut mpsc::UnboundedReceiver<RenderCall>) -> Value {
    match calls.recv().await.expect("renderer channel closed") {
        RenderCall::Render(content) => content,
        RenderCall::Clear => panic!("expected a render, got a clear"),
    }
}

fn fields(entries: &[(&str, Value)]) -> HashMap<String, Value> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Drain the event-collection task, then snapshot events.
async fn settled_events(handle: &FlowHandle) -> Vec<FlowEvent> {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    handle.events().await
}

// --- Scenario A: one step, no overrides, zero delay ---

#[tokio::test]
async fn single_step_run_appends_one_record_then_terminates() {
    let seq = Sequence::builder()
        .step(Step::new(json!({ "text": "hello" })))
        .build()
        .unwrap();
    let mut run = launch(seq);

    let content = next_render(&mut run.calls).await;
    assert_eq!(content, json!({ "text": "hello" }));

    run.handle
        .complete_step(fields(&[("response", json!("space"))]))
        .await
        .unwrap();

    let status = run.handle.wait().await;
    assert!(matches!(status, ExecutionStatus::Completed { records: 1 }));

    let records = run.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("response"), Some(&json!("space")));
    assert_eq!(records[0].get(FIELD_LEVEL), Some(&json!(0)));
    // zero delay: no blank interval before the render
    assert_eq!(
        run.renderer.log(),
        vec![RenderCall::Render(json!({ "text": "hello" }))]
    );
}

// --- Scenario B: a step repeating itself three times ---

#[tokio::test]
async fn step_repeat_presents_the_same_step_again() {
    let seq = Sequence::builder()
        .step(
            Step::builder(json!("trial"))
                .repeat_if(|ctx| ctx.completions < 4)
                .build(),
        )
        .build()
        .unwrap();
    let mut run = launch(seq);

    for i in 0..4 {
        let content = next_render(&mut run.calls).await;
        assert_eq!(content, json!("trial"));
        run.handle
            .complete_step(fields(&[("pass", json!(i))]))
            .await
            .unwrap();
    }

    let status = run.handle.wait().await;
    assert!(matches!(status, ExecutionStatus::Completed { records: 4 }));
    assert_eq!(run.store.len(), 4);
}

// --- Scenario C: a two-step block replayed once ---

#[tokio::test]
async fn block_repeat_replays_the_body_in_order() {
    let block = Block::builder()
        .step(Step::new(json!("s1")))
        .step(Step::new(json!("s2")))
        .repeat_if(|ctx| ctx.visits == 0)
        .build()
        .unwrap();
    let seq = Sequence::builder().block(block).build().unwrap();
    let mut run = launch(seq);

    let mut presented = Vec::new();
    for i in 0..4 {
        presented.push(next_render(&mut run.calls).await);
        run.handle
            .complete_step(fields(&[("index", json!(i))]))
            .await
            .unwrap();
    }

    assert_eq!(
        presented,
        vec![json!("s1"), json!("s2"), json!("s1"), json!("s2")]
    );
    let status = run.handle.wait().await;
    assert!(matches!(status, ExecutionStatus::Completed { records: 4 }));

    // records land in completion order
    let order: Vec<_> = run
        .store
        .records()
        .iter()
        .map(|r| r.get("index").unwrap().clone())
        .collect();
    assert_eq!(order, vec![json!(0), json!(1), json!(2), json!(3)]);
}

// --- Scenario D: a skipped block leaves no trace ---

#[tokio::test]
async fn block_skip_bypasses_every_descendant() {
    let hidden = Block::builder()
        .step(Step::new(json!("hidden-1")))
        .step(Step::new(json!("hidden-2")))
        .skip_if(|_| true)
        .build()
        .unwrap();
    let seq = Sequence::builder()
        .block(hidden)
        .step(Step::new(json!("after")))
        .build()
        .unwrap();
    let mut run = launch(seq);

    // execution jumps straight to the node after the block
    let content = next_render(&mut run.calls).await;
    assert_eq!(content, json!("after"));
    run.handle.complete_step(HashMap::new()).await.unwrap();

    let status = run.handle.wait().await;
    assert!(matches!(status, ExecutionStatus::Completed { records: 1 }));
    assert_eq!(
        run.renderer.log(),
        vec![RenderCall::Render(json!("after"))]
    );
}

// --- Scenario E: computed delay wins over the fixed delay ---

#[tokio::test(start_paused = true)]
async fn delay_fn_takes_precedence_and_blanks_first() {
    let seq = Sequence::builder()
        .step(
            Step::builder(json!("late"))
                .start_delay(Duration::ZERO)
                .start_delay_with(|_| Duration::from_millis(500))
                .build(),
        )
        .build()
        .unwrap();
    let started = tokio::time::Instant::now();
    let mut run = launch(seq);

    // blank interval first, then the content after the computed delay
    assert_eq!(run.calls.recv().await, Some(RenderCall::Clear));
    let content = next_render(&mut run.calls).await;
    assert_eq!(content, json!("late"));
    assert!(started.elapsed() >= Duration::from_millis(500));

    run.handle.complete_step(HashMap::new()).await.unwrap();
    let status = run.handle.wait().await;
    assert!(matches!(status, ExecutionStatus::Completed { records: 1 }));
}

// --- Reserved record fields ---

#[tokio::test]
async fn engine_overwrites_reserved_record_fields() {
    let seq = Sequence::builder()
        .step(Step::new(json!("x")))
        .build()
        .unwrap();
    let context =
        RuntimeContext::default().with_time_provider(Arc::new(FakeTimeProvider::new(7_000)));
    let mut run = launch_with_context(seq, context);

    next_render(&mut run.calls).await;
    run.handle
        .complete_step(fields(&[
            (FIELD_LEVEL, json!(99)),
            (FIELD_START_TIME, json!(-1)),
            (FIELD_END_TIME, json!(-1)),
            ("kept", json!("yes")),
        ]))
        .await
        .unwrap();
    run.handle.wait().await;

    let records = run.store.records();
    assert_eq!(records[0].get(FIELD_LEVEL), Some(&json!(0)));
    assert_eq!(records[0].get(FIELD_START_TIME), Some(&json!(7_000)));
    assert_eq!(records[0].get(FIELD_END_TIME), Some(&json!(7_000)));
    assert_eq!(records[0].get("kept"), Some(&json!("yes")));
}

// --- Record ordering and mid-run reads ---

#[tokio::test]
async fn records_arrive_in_completion_order_and_are_readable_mid_run() {
    let seq = Sequence::builder()
        .step(Step::new(json!(0)))
        .step(Step::new(json!(1)))
        .step(Step::new(json!(2)))
        .build()
        .unwrap();
    let mut run = launch(seq);

    next_render(&mut run.calls).await;
    run.handle
        .complete_step(fields(&[("index", json!(0))]))
        .await
        .unwrap();

    // by the time the next step renders, the previous record is readable
    next_render(&mut run.calls).await;
    assert_eq!(run.store.len(), 1);
    run.handle
        .complete_step(fields(&[("index", json!(1))]))
        .await
        .unwrap();

    next_render(&mut run.calls).await;
    run.handle
        .complete_step(fields(&[("index", json!(2))]))
        .await
        .unwrap();

    run.handle.wait().await;
    let order: Vec<_> = run
        .store
        .records()
        .iter()
        .map(|r| r.get("index").unwrap().clone())
        .collect();
    assert_eq!(order, vec![json!(0), json!(1), json!(2)]);
}

// --- Step skip on its own, and skip re-evaluated after a repeat ---

#[tokio::test]
async fn skipped_step_appends_nothing_and_never_repeats() {
    let seq = Sequence::builder()
        .step(
            Step::builder(json!("ghost"))
                .skip_if(|_| true)
                // would loop forever if a skipped step evaluated its repeat
                .repeat_if(|_| true)
                .build(),
        )
        .step(Step::new(json!("real")))
        .build()
        .unwrap();
    let mut run = launch(seq);

    let content = next_render(&mut run.calls).await;
    assert_eq!(content, json!("real"));
    run.handle.complete_step(HashMap::new()).await.unwrap();

    let status = run.handle.wait().await;
    assert!(matches!(status, ExecutionStatus::Completed { records: 1 }));
}

#[tokio::test]
async fn repeat_re_evaluates_skip_and_delay() {
    let seq = Sequence::builder()
        .step(
            Step::builder(json!("once"))
                .skip_if(|ctx| ctx.completions >= 1)
                .repeat_if(|ctx| ctx.completions < 2)
                .build(),
        )
        .build()
        .unwrap();
    let mut run = launch(seq);

    next_render(&mut run.calls).await;
    run.handle.complete_step(HashMap::new()).await.unwrap();

    // the repeat re-dispatches the step, whose skip is now true
    let status = run.handle.wait().await;
    assert!(matches!(status, ExecutionStatus::Completed { records: 1 }));
    assert_eq!(run.renderer.log().len(), 1);
}

// --- Whole-experiment loop via the root sequence ---

#[tokio::test]
async fn sequence_repeat_loops_the_whole_run() {
    let seq = Sequence::builder()
        .step(Step::new(json!("a")))
        .step(Step::new(json!("b")))
        .repeat_if(|ctx| ctx.visits == 0)
        .build()
        .unwrap();
    let mut run = launch(seq);

    let mut presented = Vec::new();
    for _ in 0..4 {
        presented.push(next_render(&mut run.calls).await);
        run.handle.complete_step(HashMap::new()).await.unwrap();
    }
    assert_eq!(
        presented,
        vec![json!("a"), json!("b"), json!("a"), json!("b")]
    );
    let status = run.handle.wait().await;
    assert!(matches!(status, ExecutionStatus::Completed { records: 4 }));
}

// --- Usage faults ---

#[tokio::test]
async fn completion_after_the_run_ends_is_reported() {
    let seq = Sequence::builder()
        .step(Step::builder(json!("ghost")).skip_if(|_| true).build())
        .build()
        .unwrap();
    let run = launch(seq);

    let status = run.handle.wait().await;
    assert!(matches!(status, ExecutionStatus::Completed { records: 0 }));

    let err = run.handle.complete_step(HashMap::new()).await.unwrap_err();
    assert!(matches!(err, FlowError::Terminated));
}

#[tokio::test(start_paused = true)]
async fn completion_during_a_start_delay_is_rejected_without_advancing() {
    let seq = Sequence::builder()
        .step(
            Step::builder(json!("delayed"))
                .start_delay(Duration::from_millis(500))
                .build(),
        )
        .build()
        .unwrap();
    let mut run = launch(seq);

    // the blank interval is on screen; nothing is awaiting completion yet
    assert_eq!(run.calls.recv().await, Some(RenderCall::Clear));
    let err = run.handle.complete_step(HashMap::new()).await.unwrap_err();
    assert!(matches!(err, FlowError::NoStepAwaitingCompletion));

    // the rejected signal did not advance the run: the step still renders
    // and completes normally
    let content = next_render(&mut run.calls).await;
    assert_eq!(content, json!("delayed"));
    run.handle.complete_step(HashMap::new()).await.unwrap();
    let status = run.handle.wait().await;
    assert!(matches!(status, ExecutionStatus::Completed { records: 1 }));
}

// --- Predicate faults are fatal ---

#[tokio::test]
async fn panicking_predicate_fails_the_run() {
    let seq = Sequence::builder()
        .step(
            Step::builder(json!("boom"))
                .skip_if(|_| panic!("predicate exploded"))
                .build(),
        )
        .build()
        .unwrap();
    let run = launch(seq);

    let status = run.handle.wait().await;
    assert!(matches!(status, ExecutionStatus::Failed(_)));
}

// --- Events ---

#[tokio::test]
async fn run_emits_lifecycle_events_in_order() {
    let seq = Sequence::builder()
        .step(Step::new(json!("only")))
        .build()
        .unwrap();
    let mut run = launch(seq);

    next_render(&mut run.calls).await;
    run.handle.complete_step(HashMap::new()).await.unwrap();
    run.handle.wait().await;

    let events = settled_events(&run.handle).await;
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            FlowEvent::RunStarted { .. } => "run_started",
            FlowEvent::BlockEntered { .. } => "block_entered",
            FlowEvent::StepRendered { .. } => "step_rendered",
            FlowEvent::StepCompleted { .. } => "step_completed",
            FlowEvent::BlockExited { .. } => "block_exited",
            FlowEvent::RunCompleted { .. } => "run_completed",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "run_started",
            "block_entered",
            "step_rendered",
            "step_completed",
            "block_exited",
            "run_completed"
        ]
    );
}

// --- Completion from inside rendered content ---

#[tokio::test]
async fn completer_works_from_a_spawned_handler() {
    let seq = Sequence::builder()
        .step(Step::new(json!("auto")))
        .build()
        .unwrap();
    let mut run = launch(seq);

    let completer = run.handle.completer();
    next_render(&mut run.calls).await;
    let worker = tokio::spawn(async move {
        completer
            .complete_step(fields(&[("source", json!("handler"))]))
            .await
            .unwrap();
    });
    worker.await.unwrap();

    let status = run.handle.wait().await;
    assert!(matches!(status, ExecutionStatus::Completed { records: 1 }));
    assert_eq!(
        run.store.records()[0].get("source"),
        Some(&json!("handler"))
    );
}

// --- Engine instances are independent ---

#[tokio::test]
async fn two_runs_in_one_process_do_not_share_state() {
    let seq_a = Sequence::builder()
        .step(Step::new(json!("a")))
        .build()
        .unwrap();
    let seq_b = Sequence::builder()
        .step(Step::new(json!("b")))
        .build()
        .unwrap();
    let mut run_a = launch(seq_a);
    let mut run_b = launch(seq_b);

    assert_ne!(run_a.handle.execution_id(), run_b.handle.execution_id());

    next_render(&mut run_a.calls).await;
    next_render(&mut run_b.calls).await;
    // complete in the opposite order to their starts
    run_b
        .handle
        .complete_step(fields(&[("run", json!("b"))]))
        .await
        .unwrap();
    run_a
        .handle
        .complete_step(fields(&[("run", json!("a"))]))
        .await
        .unwrap();

    assert!(matches!(
        run_a.handle.wait().await,
        ExecutionStatus::Completed { records: 1 }
    ));
    assert!(matches!(
        run_b.handle.wait().await,
        ExecutionStatus::Completed { records: 1 }
    ));
    assert_eq!(run_a.store.records()[0].get("run"), Some(&json!("a")));
    assert_eq!(run_b.store.records()[0].get("run"), Some(&json!("b")));
}
