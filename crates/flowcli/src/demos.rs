// crates/flowcli/src/demos.rs

use clap::ValueEnum;
use flowcore::channel::{queue, single_item};
use flowcore::{RunOutcome, TaskContext, TaskError, WorkflowError, WorkflowSettings};
use flownodes::{BatchConsumer, Consumer, ContextTask, DebugSink, Producer, StreamingProducer, TaskExt, Transformer};
use flowruntime::{Node, Workflow};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Built-in example workflows
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Demo {
    /// numbers -> square -> print, over queue channels
    Pipeline,
    /// A sensor sampled on an interval, monitored through a single-item channel
    Polling,
    /// Two sources zipped into sums, consumed in batches
    Aggregate,
}

impl Demo {
    pub fn build(self, settings: WorkflowSettings) -> Result<Workflow, WorkflowError> {
        match self {
            Demo::Pipeline => pipeline(settings),
            Demo::Polling => polling(settings),
            Demo::Aggregate => aggregate(settings),
        }
    }
}

fn pipeline(settings: WorkflowSettings) -> Result<Workflow, WorkflowError> {
    let mut workflow = Workflow::with_settings("pipeline", settings);
    workflow.add_sequence([
        Node::new("numbers", StreamingProducer::from_iter(1..=20_u64)),
        Node::new("square", Transformer::new(|x: u64| x * x).polling()),
        Node::main_thread("print", DebugSink::<u64>::new("squares").polling()),
    ])?;
    workflow.connect_dataflow("numbers", "square", queue::<u64>(None))?;
    workflow.connect_dataflow("square", "print", queue::<u64>(None))?;
    Ok(workflow)
}

fn polling(settings: WorkflowSettings) -> Result<Workflow, WorkflowError> {
    let samples = Arc::new(AtomicU64::new(0));
    let counter = samples.clone();

    let sensor = Producer::new(move || counter.fetch_add(1, Ordering::SeqCst) + 1)
        .polling()
        .interval(Duration::from_millis(50))
        .stop_when(move || samples.load(Ordering::SeqCst) >= 20);
    let monitor = Consumer::new(|reading: u64| tracing::info!(reading, "latest reading")).polling();

    let mut workflow = Workflow::with_settings("polling", settings);
    workflow.add_sequence([Node::new("sensor", sensor), Node::main_thread("monitor", monitor)])?;
    workflow.connect_dataflow("sensor", "monitor", single_item::<u64>())?;
    Ok(workflow)
}

async fn add_pair(ctx: &TaskContext) -> Result<RunOutcome, TaskError> {
    let left: Option<u64> = ctx.read_from("left").await?;
    let right: Option<u64> = ctx.read_from("right").await?;
    match left.zip(right) {
        Some((l, r)) => ctx.write(l + r).await?,
        None => return Ok(RunOutcome::Exhausted),
    }
    Ok(RunOutcome::Completed)
}

fn aggregate(settings: WorkflowSettings) -> Result<Workflow, WorkflowError> {
    let mut workflow = Workflow::with_settings("aggregate", settings);
    workflow.add_nodes([
        Node::new("left", StreamingProducer::from_iter(1..=10_u64)),
        Node::new("right", StreamingProducer::from_iter((1..=10_u64).map(|x| x * 100))),
        Node::new("sum", ContextTask::new(|ctx| Box::pin(add_pair(ctx))).polling()),
        Node::main_thread(
            "report",
            BatchConsumer::new(|batch: Vec<u64>| tracing::info!(?batch, "batch of sums")).polling(),
        ),
    ])?;
    workflow.connect("left", "sum", queue::<u64>(None))?;
    workflow.connect("right", "sum", queue::<u64>(None))?;
    workflow.connect("sum", "report", queue::<u64>(Some(4)))?;
    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_demo_validates() {
        for demo in Demo::value_variants() {
            let mut workflow = demo.build(WorkflowSettings::default()).unwrap();
            assert!(workflow.validate().is_ok(), "{:?} should validate", demo);
        }
    }

    #[test]
    fn test_pipeline_demo_runs_to_completion() {
        let mut workflow = Demo::Pipeline.build(WorkflowSettings::default()).unwrap();
        let report = workflow.execute().unwrap();
        assert!(report.is_success());
        assert_eq!(report.nodes.len(), 3);
    }

    #[test]
    fn test_aggregate_demo_runs_to_completion() {
        let mut workflow = Demo::Aggregate.build(WorkflowSettings::default()).unwrap();
        let report = workflow.execute().unwrap();
        assert!(report.is_success(), "{}", report);
    }
}
