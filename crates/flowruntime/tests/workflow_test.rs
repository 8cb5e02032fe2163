// crates/flowruntime/tests/workflow_test.rs

use async_trait::async_trait;
use flowcore::channel::{queue, single_item};
use flowcore::{
    ErrorHandling, ExecutionEvent, NodeError, RunOutcome, SchedulingMode, Task, TaskContext,
    TaskError, TaskState, WorkflowError, WorkflowSettings,
};
use flownodes::{BatchConsumer, Consumer, ContextTask, Producer, StreamingProducer, TaskExt, Transformer};
use flowruntime::{DotRenderer, Node, Workflow};
use futures::stream::{self, Stream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("flowruntime=debug,flownodes=debug")
        .with_test_writer()
        .try_init();
}

fn collector<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, Consumer<T>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, Consumer::new(move |value| sink.lock().unwrap().push(value)))
}

#[test]
fn test_pipeline_over_single_item_channels() {
    init_tracing();
    let (seen, consumer) = collector::<i32>();

    let mut workflow = Workflow::new("doubler");
    workflow
        .add_node(Node::new("producer", StreamingProducer::from_iter(1..=5)))
        .unwrap()
        .add_node(Node::new("doubler", Transformer::new(|x: i32| x * 2).polling()))
        .unwrap()
        .add_node(Node::new("collector", consumer.polling()))
        .unwrap()
        .connect("producer", "doubler", single_item::<i32>())
        .unwrap()
        .connect("doubler", "collector", single_item::<i32>())
        .unwrap();

    let report = workflow.execute().unwrap();

    assert!(report.is_success(), "{}", report);
    assert!(!report.stopped_by_signal);
    assert_eq!(seen.lock().unwrap().last(), Some(&10));
    for node in &report.nodes {
        assert_eq!(node.state, TaskState::Stopped, "{} should have stopped", node.name);
    }
}

#[test]
fn test_queue_pipeline_delivers_everything_in_order() {
    let (seen, consumer) = collector::<u32>();

    let mut workflow = Workflow::new("queue");
    workflow
        .add_node(Node::new("numbers", StreamingProducer::from_iter(0..100_u32)))
        .unwrap()
        .add_node(Node::new("sink", consumer.polling()))
        .unwrap()
        .connect("numbers", "sink", queue::<u32>(None))
        .unwrap();

    let report = workflow.execute().unwrap();

    assert!(report.is_success());
    assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
}

#[test]
fn test_failure_stops_the_rest_of_the_graph() {
    init_tracing();
    let (_, consumer) = collector::<i32>();

    let mut workflow = Workflow::new("failing");
    workflow
        .add_node(Node::new("producer", StreamingProducer::from_iter(1..=1000)))
        .unwrap()
        .add_node(Node::new(
            "transformer",
            Transformer::try_new(|x: i32| {
                if x == 3 {
                    Err(TaskError::failed("cannot handle 3"))
                } else {
                    Ok(x)
                }
            })
            .polling(),
        ))
        .unwrap()
        .add_node(Node::new("consumer", consumer.polling()))
        .unwrap()
        .connect("producer", "transformer", queue::<i32>(None))
        .unwrap()
        .connect("transformer", "consumer", queue::<i32>(None))
        .unwrap();

    let report = workflow.execute().unwrap();

    let failed: Vec<_> = report.failed_nodes().map(|node| node.name.as_str()).collect();
    assert_eq!(failed, vec!["transformer"]);
    assert_eq!(report.node("consumer").unwrap().state, TaskState::Stopped);
    assert!(matches!(
        report.node("transformer").unwrap().error,
        Some(NodeError::Runtime { .. })
    ));

    let err = report.into_result().unwrap_err();
    assert_eq!(err.failures.len(), 1);
    assert!(err.to_string().contains("cannot handle 3"));
}

#[test]
fn test_setup_failure_prevents_run_but_cleans_up() {
    let cleaned = Arc::new(AtomicU32::new(0));
    let ran = Arc::new(AtomicU32::new(0));
    let (c, r) = (cleaned.clone(), ran.clone());

    let task = Producer::new(move || {
        r.fetch_add(1, Ordering::SeqCst);
        0_u8
    })
    .on_setup(|| Err(TaskError::failed("no database")))
    .on_cleanup(move || {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let mut workflow = Workflow::new("setup");
    workflow.add_node(Node::new("broken", task)).unwrap();

    let report = workflow.execute().unwrap();

    let node = report.node("broken").unwrap();
    assert_eq!(node.state, TaskState::Failed);
    assert!(matches!(node.error, Some(NodeError::Setup { .. })));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(cleaned.load(Ordering::SeqCst), 1);
}

#[test]
fn test_continue_on_error_lets_independent_branch_finish() {
    let (seen, consumer) = collector::<u32>();
    let settings = WorkflowSettings::default().with_error_handling(ErrorHandling::ContinueOnError);

    let mut workflow = Workflow::with_settings("isolated", settings);
    workflow
        .add_node(Node::new(
            "bad",
            Producer::try_new(|| -> Result<u8, TaskError> { Err(TaskError::failed("bad branch")) }),
        ))
        .unwrap()
        .add_node(Node::new(
            "slow",
            StreamingProducer::from_stream(ticker(5)),
        ))
        .unwrap()
        .add_node(Node::new("sink", consumer.polling()))
        .unwrap()
        .connect("slow", "sink", queue::<u32>(None))
        .unwrap();

    let report = workflow.execute().unwrap();

    assert_eq!(report.node("bad").unwrap().state, TaskState::Failed);
    assert_eq!(report.node("sink").unwrap().state, TaskState::Stopped);
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

/// Emits `0..count` with a short pause before each item.
fn ticker(count: u32) -> impl Stream<Item = u32> {
    stream::unfold(0, move |n| async move {
        if n >= count {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        Some((n, n + 1))
    })
}

#[test]
fn test_stop_token_ends_infinite_pipeline() {
    init_tracing();
    let (seen, consumer) = collector::<u64>();

    let mut workflow = Workflow::new("endless");
    workflow
        .add_node(Node::new("ticks", StreamingProducer::from_iter(0_u64..)))
        .unwrap()
        .add_node(Node::new("sink", consumer.polling()))
        .unwrap()
        .connect("ticks", "sink", single_item::<u64>())
        .unwrap();

    let stop = workflow.stop_token();
    let trigger = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        stop.cancel();
    });

    let report = workflow.execute().unwrap();
    trigger.join().unwrap();

    assert!(report.stopped_by_signal);
    assert!(report.is_success(), "{}", report);
    for node in &report.nodes {
        assert_eq!(node.state, TaskState::Stopped, "{} should have stopped", node.name);
    }
    assert!(!seen.lock().unwrap().is_empty());
}

#[test]
fn test_main_thread_nodes_run_on_controlling_thread() {
    let caller = std::thread::current().id();
    let threads: Arc<Mutex<Vec<(&'static str, ThreadId)>>> = Arc::new(Mutex::new(Vec::new()));

    let record = |label: &'static str| {
        let threads = threads.clone();
        move |x: u32| {
            threads.lock().unwrap().push((label, std::thread::current().id()));
            x
        }
    };

    let mut workflow = Workflow::new("cooperative");
    workflow
        .add_node(Node::main_thread("source", StreamingProducer::from_iter(0..20_u32)))
        .unwrap()
        .add_node(Node::main_thread("left", Transformer::new(record("left")).polling()))
        .unwrap()
        .add_node(Node::new("right", Transformer::new(record("right")).polling()))
        .unwrap()
        .add_node(Node::main_thread("drain", Consumer::new(|_: u32| {}).polling()))
        .unwrap()
        .connect("source", "left", queue::<u32>(None))
        .unwrap()
        .connect("left", "right", queue::<u32>(None))
        .unwrap()
        .connect("right", "drain", queue::<u32>(None))
        .unwrap();

    let report = workflow.execute().unwrap();
    assert!(report.is_success());

    let threads = threads.lock().unwrap();
    assert_eq!(threads.len(), 40);
    for (label, id) in threads.iter() {
        match *label {
            "left" => assert_eq!(*id, caller, "main-thread node ran elsewhere"),
            _ => assert_ne!(*id, caller, "parallel node ran on the caller"),
        }
    }
    assert_eq!(report.node("left").unwrap().mode, SchedulingMode::MainThread);
}

struct Stubborn;

#[async_trait]
impl Task for Stubborn {
    fn kind(&self) -> &str {
        "stubborn"
    }

    async fn run(&mut self, _ctx: &TaskContext) -> Result<RunOutcome, TaskError> {
        // Ignores the stop token entirely.
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(RunOutcome::Completed)
    }
}

fn counting_cleanups<T: Task + 'static>(task: T) -> (Arc<AtomicU32>, impl Task + 'static) {
    let cleanups = Arc::new(AtomicU32::new(0));
    let c = cleanups.clone();
    let task = task.on_cleanup(move || {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (cleanups, task)
}

fn wait_for(counter: &AtomicU32, expected: u32) -> u32 {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while counter.load(Ordering::SeqCst) < expected && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    counter.load(Ordering::SeqCst)
}

#[test]
fn test_join_timeout_marks_stuck_node_failed() {
    for mode in [SchedulingMode::Parallel, SchedulingMode::MainThread] {
        let settings = WorkflowSettings::default().with_join_timeout(Duration::from_millis(50));
        let (cleanups, task) = counting_cleanups(Stubborn);
        let mut workflow = Workflow::with_settings("stuck", settings);
        workflow.add_node(Node::with_mode("stubborn", task, mode)).unwrap();

        let stop = workflow.stop_token();
        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            stop.cancel();
        });
        let report = workflow.execute().unwrap();
        trigger.join().unwrap();

        let node = report.node("stubborn").unwrap();
        assert_eq!(node.state, TaskState::Failed, "{}", mode);
        assert!(matches!(node.error, Some(NodeError::Timeout { .. })), "{}", mode);

        if mode == SchedulingMode::MainThread {
            // The abandoned run is cleaned up before execute returns.
            assert_eq!(cleanups.load(Ordering::SeqCst), 1, "{}", mode);
        }
        // The detached parallel worker cleans up once its sleep ends.
        assert_eq!(wait_for(&cleanups, 1), 1, "{}", mode);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1, "{}", mode);
    }
}

struct Panicky;

#[async_trait]
impl Task for Panicky {
    async fn run(&mut self, _ctx: &TaskContext) -> Result<RunOutcome, TaskError> {
        panic!("task blew up");
    }
}

#[test]
fn test_panicking_task_is_reported_failed() {
    let (worker_cleanups, worker) = counting_cleanups(Panicky);
    let (local_cleanups, local) = counting_cleanups(Panicky);
    let mut workflow = Workflow::new("panic");
    let mut events = workflow.subscribe();
    workflow
        .add_node(Node::new("worker", worker))
        .unwrap()
        .add_node(Node::main_thread("local", local))
        .unwrap();

    let report = workflow.execute().unwrap();

    for name in ["worker", "local"] {
        let node = report.node(name).unwrap();
        assert_eq!(node.state, TaskState::Failed);
        assert!(matches!(node.error, Some(NodeError::Panicked { .. })), "{}", name);
    }
    assert_eq!(worker_cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(local_cleanups.load(Ordering::SeqCst), 1);

    let mut failed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeFailed { node, .. } = event {
            failed.push(node);
        }
    }
    failed.sort();
    assert_eq!(failed, ["local", "worker"]);
}

#[test]
fn test_step_driver_advances_in_slices() {
    let (seen, consumer) = collector::<u32>();
    let mut workflow = Workflow::new("stepped");
    workflow
        .add_node(Node::main_thread(
            "source",
            StreamingProducer::from_stream(ticker(3)),
        ))
        .unwrap()
        .add_node(Node::main_thread("sink", consumer.polling()))
        .unwrap()
        .connect("source", "sink", queue::<u32>(None))
        .unwrap();

    let mut execution = workflow.start().unwrap();
    let mut steps = 0;
    while execution.step(Duration::from_millis(1)) {
        steps += 1;
        assert!(steps < 10_000, "execution never finished");
    }
    assert!(!execution.is_running());
    let report = execution.finish();

    assert!(steps > 1, "work should span several steps");
    assert!(report.is_success());
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
}

#[test]
fn test_second_execute_is_rejected() {
    let mut workflow = Workflow::new("once");
    workflow
        .add_node(Node::new("only", Producer::new(|| 1_u8)))
        .unwrap();

    workflow.execute().unwrap();
    let err = workflow.execute().unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState { .. }));
    assert!(workflow.add_node(Node::new("late", Producer::new(|| 2_u8))).is_err());
}

#[test]
fn test_cycle_is_rejected_before_anything_starts() {
    let started = Arc::new(AtomicU32::new(0));
    let flag = started.clone();

    let mut workflow = Workflow::new("cycle");
    workflow
        .add_node(Node::new(
            "a",
            Producer::new(|| 0_u8).on_setup(move || {
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ))
        .unwrap()
        .add_node(Node::new("b", Consumer::new(|_: u8| {})))
        .unwrap()
        .connect_dataflow("a", "b", queue::<u8>(None))
        .unwrap()
        .connect_dependency("b", "a")
        .unwrap();

    assert!(matches!(
        workflow.execute(),
        Err(WorkflowError::CyclicDependency { .. })
    ));
    assert_eq!(started.load(Ordering::SeqCst), 0);
}

#[test]
fn test_batch_consumer_aggregates_fast_producer() {
    let batches = Arc::new(Mutex::new(Vec::new()));
    let sink = batches.clone();

    let mut workflow = Workflow::new("aggregate");
    workflow
        .add_node(Node::new("numbers", StreamingProducer::from_iter(0..50_u32)))
        .unwrap()
        .add_node(Node::new(
            "aggregate",
            BatchConsumer::new(move |batch: Vec<u32>| sink.lock().unwrap().push(batch)).polling(),
        ))
        .unwrap()
        .connect("numbers", "aggregate", queue::<u32>(Some(8)))
        .unwrap();

    let report = workflow.execute().unwrap();
    assert!(report.is_success());

    let batches = batches.lock().unwrap();
    assert!(batches.iter().all(|batch| !batch.is_empty() && batch.len() <= 8));
    let flat: Vec<u32> = batches.iter().flatten().copied().collect();
    assert_eq!(flat, (0..50).collect::<Vec<_>>());
}

#[test]
fn test_read_timeout_fails_starved_node() {
    let settings = WorkflowSettings::default().with_default_read_timeout(Duration::from_millis(20));
    let mut workflow = Workflow::with_settings("starved", settings);
    workflow
        .add_node(Node::new(
            "silent",
            ContextTask::new(|ctx| {
                Box::pin(async move {
                    // Hold the channel open without writing.
                    ctx.stop_token().cancelled().await;
                    Ok(RunOutcome::Completed)
                })
            }),
        ))
        .unwrap()
        .add_node(Node::new("waiting", Consumer::new(|_: u8| {})))
        .unwrap()
        .connect("silent", "waiting", single_item::<u8>())
        .unwrap();

    let report = workflow.execute().unwrap();

    let waiting = report.node("waiting").unwrap();
    assert_eq!(waiting.state, TaskState::Failed);
    assert!(waiting.error.as_ref().unwrap().to_string().contains("timed out"));
    assert_eq!(report.node("silent").unwrap().state, TaskState::Stopped);
}

#[test]
fn test_events_are_broadcast() {
    let mut workflow = Workflow::new("events");
    workflow
        .add_node(Node::new("one", Producer::new(|| 1_u8)))
        .unwrap();
    let mut events = workflow.subscribe();

    let report = workflow.execute().unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.execution_id(), report.execution_id);
        kinds.push(match event {
            ExecutionEvent::WorkflowStarted { .. } => "workflow-started",
            ExecutionEvent::NodeStarted { .. } => "node-started",
            ExecutionEvent::NodeCompleted { .. } => "node-completed",
            ExecutionEvent::NodeFailed { .. } => "node-failed",
            ExecutionEvent::WorkflowCompleted { .. } => "workflow-completed",
            ExecutionEvent::NodeEvent { .. } => "node-event",
        });
    }
    assert_eq!(
        kinds,
        vec!["workflow-started", "node-started", "node-completed", "workflow-completed"]
    );
}

#[test]
fn test_visualize_and_report_serialization() {
    let mut workflow = Workflow::new("render");
    workflow
        .add_node(Node::new("source", Producer::new(|| 1_u8)))
        .unwrap()
        .add_node(Node::main_thread("sink", Consumer::new(|_: u8| {})))
        .unwrap()
        .connect("source", "sink", queue::<u8>(None))
        .unwrap();

    let dot = workflow.visualize(&DotRenderer);
    assert!(dot.contains("source [producer, parallel, #0]"));
    assert!(dot.contains("sink [consumer, main-thread, #1]"));
    assert!(dot.contains("depends"));
    assert!(dot.contains("queue"));

    let description = serde_json::to_value(workflow.describe()).unwrap();
    assert_eq!(description["edges"].as_array().unwrap().len(), 2);

    let report = workflow.execute().unwrap();
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["workflow"], "render");
    assert_eq!(json["nodes"][0]["state"], "stopped");
    assert_eq!(json["nodes"][1]["mode"], "main_thread");
}
