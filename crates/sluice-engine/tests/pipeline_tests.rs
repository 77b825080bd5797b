//! Engine behavior verified with stub components

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use sluice_common::{ComponentConfig, Record, Value};
use sluice_engine::component::Connection;
use sluice_engine::{
    Bound, Datasource, Executor, FrozenSchema, Pipeline, PipelineComponents, PipelineError,
    PipelineOptions, Processor, ProcessorConfig, RunConfigs, RunId, SchemaMapping, Sink, Source,
    Stage,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Stubs
// ============================================================================

#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }
}

fn numbered(n: i64) -> Record {
    Record::from_iter([("n", Value::Int(n)), ("label", Value::from(format!("row-{}", n)))])
}

fn n_of(record: &Record) -> i64 {
    match record.get("n") {
        Some(Value::Int(n)) => *n,
        other => panic!("unexpected n: {:?}", other),
    }
}

struct CountingSource {
    total: i64,
    next: i64,
    columns: Vec<&'static str>,
    fail_open: bool,
    /// Blocks forever once this many records were produced
    stall_after: Option<i64>,
    reads: Arc<AtomicUsize>,
    /// Counts reads made after the sink reported a failure
    watch: Option<(Arc<SinkProbe>, Arc<AtomicUsize>)>,
    log: EventLog,
}

impl CountingSource {
    fn new(total: i64, log: &EventLog) -> Self {
        Self {
            total,
            next: 0,
            columns: vec!["n", "label"],
            fail_open: false,
            stall_after: None,
            reads: Arc::default(),
            watch: None,
            log: log.clone(),
        }
    }
}

#[async_trait]
impl Source for CountingSource {
    async fn open(
        &mut self,
        _config: &ComponentConfig,
        datasource: Option<Box<dyn Datasource>>,
    ) -> Result<()> {
        self.log.push("source.open");
        if let Some(mut ds) = datasource {
            ds.close().await?;
        }
        if self.fail_open {
            bail!("cannot open input");
        }
        Ok(())
    }

    fn columns(&self) -> SchemaMapping {
        SchemaMapping::identity(self.columns.iter().copied())
    }

    async fn read(&mut self) -> Result<Option<Record>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some((probe, after)) = &self.watch {
            if probe.failed.load(Ordering::SeqCst) {
                after.fetch_add(1, Ordering::SeqCst);
            }
        }
        if self.stall_after.is_some_and(|n| self.next >= n) {
            std::future::pending::<()>().await;
        }
        if self.next >= self.total {
            return Ok(None);
        }
        let record = numbered(self.next);
        self.next += 1;
        Ok(Some(record))
    }

    async fn close(&mut self) -> Result<()> {
        self.log.push("source.close");
        Ok(())
    }
}

enum Behavior {
    Pass,
    DropOdd,
    FailAt(i64),
    Rename,
}

struct StubProcessor {
    name: &'static str,
    behavior: Behavior,
    log: EventLog,
}

impl StubProcessor {
    fn boxed(name: &'static str, behavior: Behavior, log: &EventLog) -> Box<dyn Processor> {
        Box::new(Self {
            name,
            behavior,
            log: log.clone(),
        })
    }
}

#[async_trait]
impl Processor for StubProcessor {
    fn handle_columns(&self, config: &ComponentConfig, columns: SchemaMapping) -> SchemaMapping {
        match self.behavior {
            Behavior::Rename => {
                let mapping: BTreeMap<String, String> =
                    config.parse_json("mapping").unwrap_or_default();
                columns.renamed(&mapping)
            },
            _ => columns,
        }
    }

    async fn open(&mut self, _config: &ComponentConfig) -> Result<()> {
        self.log.push(format!("{}.open", self.name));
        Ok(())
    }

    async fn process(&mut self, record: Record) -> Result<Option<Record>> {
        match self.behavior {
            Behavior::Pass | Behavior::Rename => Ok(Some(record)),
            Behavior::DropOdd => {
                if n_of(&record) % 2 == 0 {
                    Ok(Some(record))
                } else {
                    Ok(None)
                }
            },
            Behavior::FailAt(k) => {
                if n_of(&record) == k {
                    bail!("bad record {}", k);
                }
                Ok(Some(record))
            },
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.log.push(format!("{}.close", self.name));
        Ok(())
    }
}

#[derive(Default)]
struct SinkProbe {
    batches: Mutex<Vec<Vec<Record>>>,
    schema: Mutex<Option<FrozenSchema>>,
    failed: AtomicBool,
}

impl SinkProbe {
    fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }

    fn values(&self) -> Vec<i64> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(n_of)
            .collect()
    }
}

struct RecordingSink {
    probe: Arc<SinkProbe>,
    fail_on_write: bool,
    panic_on_write: bool,
    log: EventLog,
}

impl RecordingSink {
    fn new(probe: &Arc<SinkProbe>, log: &EventLog) -> Self {
        Self {
            probe: Arc::clone(probe),
            fail_on_write: false,
            panic_on_write: false,
            log: log.clone(),
        }
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn open(
        &mut self,
        _config: &ComponentConfig,
        schema: FrozenSchema,
        _datasource: Option<Box<dyn Datasource>>,
    ) -> Result<()> {
        self.log.push("sink.open");
        *self.probe.schema.lock().unwrap() = Some(schema);
        Ok(())
    }

    async fn write(&mut self, _run_id: &RunId, batch: &[Record]) -> Result<()> {
        if self.panic_on_write {
            panic!("sink exploded");
        }
        if self.fail_on_write {
            self.probe.failed.store(true, Ordering::SeqCst);
            bail!("disk full");
        }
        self.probe.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.log.push("sink.close");
        Ok(())
    }
}

struct RecordingExecutor {
    name: &'static str,
    fail: bool,
    log: EventLog,
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn open(
        &mut self,
        _config: &ComponentConfig,
        datasource: Option<Box<dyn Datasource>>,
    ) -> Result<()> {
        self.log.push(format!("{}.open", self.name));
        if let Some(mut ds) = datasource {
            ds.close().await?;
        }
        if self.fail {
            bail!("statement failed");
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.log.push(format!("{}.close", self.name));
        Ok(())
    }
}

struct TrackedDatasource {
    name: &'static str,
    log: EventLog,
}

#[async_trait]
impl Datasource for TrackedDatasource {
    async fn init(&mut self, _config: &ComponentConfig) -> Result<()> {
        Ok(())
    }

    fn connection(&self) -> Result<Connection> {
        bail!("no connection in tests")
    }

    async fn close(&mut self) -> Result<()> {
        self.log.push(format!("{}.close", self.name));
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn configs_for(processors: &[&str]) -> RunConfigs {
    RunConfigs {
        processors: processors
            .iter()
            .map(|kind| ProcessorConfig::new(*kind, ComponentConfig::new()))
            .collect(),
        ..Default::default()
    }
}

fn pipeline(components: PipelineComponents, batch_size: usize, queue_capacity: usize) -> Pipeline {
    Pipeline::new(
        RunId::new("test-run"),
        components,
        PipelineOptions::new(batch_size, queue_capacity),
    )
}

fn sink_bound(sink: RecordingSink) -> Bound<dyn Sink> {
    Bound::new(Box::new(sink) as Box<dyn Sink>)
}

fn source_bound(source: CountingSource) -> Bound<dyn Source> {
    Bound::new(Box::new(source) as Box<dyn Source>)
}

fn executor(name: &'static str, fail: bool, log: &EventLog) -> Bound<dyn Executor> {
    Bound::new(Box::new(RecordingExecutor {
        name,
        fail,
        log: log.clone(),
    }) as Box<dyn Executor>)
}

// ============================================================================
// Data flow
// ============================================================================

#[tokio::test]
async fn test_pass_through_delivers_every_record_once() {
    let log = EventLog::default();
    let probe = Arc::new(SinkProbe::default());
    let components = PipelineComponents::new(
        source_bound(CountingSource::new(25, &log)),
        sink_bound(RecordingSink::new(&probe, &log)),
    )
    .with_processor(StubProcessor::boxed("pass", Behavior::Pass, &log));

    let report = pipeline(components, 10, 4)
        .run(&CancellationToken::new(), configs_for(&["pass"]))
        .await
        .unwrap();

    let mut values = probe.values();
    values.sort_unstable();
    assert_eq!(values, (0..25).collect::<Vec<_>>());
    assert_eq!(probe.batch_sizes(), vec![10, 10, 5]);
    assert_eq!(report.records_read, 25);
    assert_eq!(report.records_written, 25);
    assert_eq!(report.batches_written, 3);
    assert_eq!(report.processors[0].received, 25);
}

#[tokio::test]
async fn test_batch_count_is_ceiling_of_records_over_batch_size() {
    for (total, batch, expected) in [
        (20, 10, vec![10, 10]),
        (7, 3, vec![3, 3, 1]),
        (1, 1000, vec![1]),
        (0, 5, vec![]),
    ] {
        let log = EventLog::default();
        let probe = Arc::new(SinkProbe::default());
        let components = PipelineComponents::new(
            source_bound(CountingSource::new(total, &log)),
            sink_bound(RecordingSink::new(&probe, &log)),
        );

        pipeline(components, batch, 8)
            .run(&CancellationToken::new(), RunConfigs::default())
            .await
            .unwrap();
        assert_eq!(probe.batch_sizes(), expected, "total={} batch={}", total, batch);
    }
}

#[tokio::test]
async fn test_dropped_records_never_reach_sink() {
    let log = EventLog::default();
    let probe = Arc::new(SinkProbe::default());
    let components = PipelineComponents::new(
        source_bound(CountingSource::new(10, &log)),
        sink_bound(RecordingSink::new(&probe, &log)),
    )
    .with_processor(StubProcessor::boxed("filter", Behavior::DropOdd, &log));

    let report = pipeline(components, 4, 4)
        .run(&CancellationToken::new(), configs_for(&["filter"]))
        .await
        .unwrap();

    assert_eq!(probe.values(), vec![0, 2, 4, 6, 8]);
    assert_eq!(report.processors[0].filtered(), 5);
    assert_eq!(report.records_written, 5);
}

#[tokio::test]
async fn test_schema_negotiated_through_rename() {
    let log = EventLog::default();
    let probe = Arc::new(SinkProbe::default());
    let mut source = CountingSource::new(0, &log);
    source.columns = vec!["a", "b"];
    let components = PipelineComponents::new(
        source_bound(source),
        sink_bound(RecordingSink::new(&probe, &log)),
    )
    .with_processor(StubProcessor::boxed("rename", Behavior::Rename, &log));

    let mut configs = configs_for(&["rename_column"]);
    configs.processors[0]
        .config
        .insert("mapping", r#"{"a":"x"}"#);

    pipeline(components, 10, 10)
        .run(&CancellationToken::new(), configs)
        .await
        .unwrap();

    let schema = probe.schema.lock().unwrap().clone().unwrap();
    let pairs: Vec<(String, String)> = schema
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("b".to_string(), "b".to_string()),
            ("x".to_string(), "x".to_string())
        ]
    );
}

// ============================================================================
// Failure and cancellation
// ============================================================================

#[tokio::test]
async fn test_processor_error_fails_run_and_closes_everything_once() {
    let log = EventLog::default();
    let probe = Arc::new(SinkProbe::default());
    let components = PipelineComponents::new(
        source_bound(CountingSource::new(1000, &log)),
        sink_bound(RecordingSink::new(&probe, &log)),
    )
    .with_processor(StubProcessor::boxed("first", Behavior::Pass, &log))
    .with_processor(StubProcessor::boxed("second", Behavior::FailAt(7), &log));

    let err = pipeline(components, 5, 2)
        .run(&CancellationToken::new(), configs_for(&["pass", "fail"]))
        .await
        .unwrap_err();

    assert!(
        err.any(|e| matches!(
            e,
            PipelineError::Stage {
                stage: Stage::Processor { index: 1, .. },
                ..
            }
        )),
        "{}",
        err
    );
    assert!(err.to_string().contains("bad record 7"));
    assert!(probe.values().iter().all(|n| *n < 7));

    for component in ["source", "first", "second", "sink"] {
        assert_eq!(log.count(&format!("{}.close", component)), 1, "{}", component);
    }
    let closes: Vec<String> = log
        .events()
        .into_iter()
        .filter(|e| e.ends_with(".close"))
        .collect();
    assert_eq!(closes, vec!["sink.close", "second.close", "first.close", "source.close"]);
}

#[tokio::test]
async fn test_sink_error_stops_source_promptly() {
    let log = EventLog::default();
    let probe = Arc::new(SinkProbe::default());
    let after_error = Arc::new(AtomicUsize::new(0));

    let mut source = CountingSource::new(100_000, &log);
    let reads = Arc::clone(&source.reads);
    source.watch = Some((Arc::clone(&probe), Arc::clone(&after_error)));
    let mut sink = RecordingSink::new(&probe, &log);
    sink.fail_on_write = true;

    let components = PipelineComponents::new(source_bound(source), sink_bound(sink));
    let err = pipeline(components, 10, 10)
        .run(&CancellationToken::new(), RunConfigs::default())
        .await
        .unwrap_err();

    assert!(err.any(|e| matches!(e, PipelineError::Stage { stage: Stage::Sink, .. })));
    assert!(
        after_error.load(Ordering::SeqCst) <= 2,
        "source kept reading: {}",
        after_error.load(Ordering::SeqCst)
    );
    assert!(reads.load(Ordering::SeqCst) < 100_000);
    assert!(probe.batch_sizes().is_empty());
    assert_eq!(log.count("source.close"), 1);
    assert_eq!(log.count("sink.close"), 1);
}

#[tokio::test]
async fn test_caller_cancellation_reports_cancelled() {
    let log = EventLog::default();
    let probe = Arc::new(SinkProbe::default());
    let components = PipelineComponents::new(
        source_bound(CountingSource::new(1_000_000, &log)),
        sink_bound(RecordingSink::new(&probe, &log)),
    )
    .with_post_execute(executor("post", false, &log));

    let token = CancellationToken::new();
    token.cancel();

    let err = pipeline(components, 100, 10)
        .run(&token, RunConfigs::default())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled), "{}", err);
    assert!(probe.batch_sizes().is_empty());
    assert_eq!(log.count("post.open"), 0);
    assert_eq!(log.count("source.close"), 1);
    assert_eq!(log.count("sink.close"), 1);
}

#[tokio::test]
async fn test_partial_batch_is_discarded_on_cancellation() {
    let log = EventLog::default();
    let probe = Arc::new(SinkProbe::default());
    let mut source = CountingSource::new(1_000, &log);
    source.stall_after = Some(10);
    let components = PipelineComponents::new(
        source_bound(source),
        sink_bound(RecordingSink::new(&probe, &log)),
    );

    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            token.cancel();
        })
    };

    let err = pipeline(components, 4, 16)
        .run(&token, RunConfigs::default())
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, PipelineError::Cancelled), "{}", err);
    // Two full batches went out; the trailing two records never do
    assert_eq!(probe.batch_sizes(), vec![4, 4]);
    assert_eq!(log.count("sink.close"), 1);
}

#[tokio::test]
async fn test_worker_panic_is_reported() {
    let log = EventLog::default();
    let probe = Arc::new(SinkProbe::default());
    let mut sink = RecordingSink::new(&probe, &log);
    sink.panic_on_write = true;
    let components = PipelineComponents::new(source_bound(CountingSource::new(50, &log)), sink_bound(sink))
        .with_processor(StubProcessor::boxed("pass", Behavior::Pass, &log));

    let err = pipeline(components, 5, 5)
        .run(&CancellationToken::new(), configs_for(&["pass"]))
        .await
        .unwrap_err();

    assert!(err.any(|e| matches!(e, PipelineError::WorkerPanicked { stage: Stage::Sink })));
    // The panicked sink is gone; everything else still closes once
    assert_eq!(log.count("sink.close"), 0);
    assert_eq!(log.count("pass.close"), 1);
    assert_eq!(log.count("source.close"), 1);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_executors_bracket_the_data_flow() {
    let log = EventLog::default();
    let probe = Arc::new(SinkProbe::default());
    let components = PipelineComponents::new(
        source_bound(CountingSource::new(3, &log)),
        sink_bound(RecordingSink::new(&probe, &log)),
    )
    .with_processor(StubProcessor::boxed("pass", Behavior::Pass, &log))
    .with_pre_execute(executor("pre", false, &log))
    .with_post_execute(executor("post", false, &log));

    pipeline(components, 10, 10)
        .run(&CancellationToken::new(), configs_for(&["pass"]))
        .await
        .unwrap();

    assert_eq!(
        log.events(),
        vec![
            "pre.open",
            "pre.close",
            "source.open",
            "pass.open",
            "sink.open",
            "sink.close",
            "pass.close",
            "source.close",
            "post.open",
            "post.close",
        ]
    );
}

#[tokio::test]
async fn test_post_executor_skipped_after_failure() {
    let log = EventLog::default();
    let probe = Arc::new(SinkProbe::default());
    let components = PipelineComponents::new(
        source_bound(CountingSource::new(20, &log)),
        sink_bound(RecordingSink::new(&probe, &log)),
    )
    .with_processor(StubProcessor::boxed("fail", Behavior::FailAt(0), &log))
    .with_post_execute(
        executor("post", false, &log)
        .with_datasource(Box::new(TrackedDatasource {
            name: "post_ds",
            log: log.clone(),
        })),
    );

    let err = pipeline(components, 10, 10)
        .run(&CancellationToken::new(), configs_for(&["fail"]))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("bad record 0"));
    assert_eq!(log.count("post.open"), 0);
    // The engine closes the datasource it never handed over
    assert_eq!(log.count("post_ds.close"), 1);
}

#[tokio::test]
async fn test_pre_executor_failure_skips_source_and_sink() {
    let log = EventLog::default();
    let probe = Arc::new(SinkProbe::default());
    let source = Bound::new(Box::new(CountingSource::new(5, &log)) as Box<dyn Source>)
        .with_datasource(Box::new(TrackedDatasource {
            name: "source_ds",
            log: log.clone(),
        }));
    let components = PipelineComponents::new(source, sink_bound(RecordingSink::new(&probe, &log)))
        .with_pre_execute(executor("pre", true, &log));

    let err = pipeline(components, 10, 10)
        .run(&CancellationToken::new(), RunConfigs::default())
        .await
        .unwrap_err();

    assert!(err.any(|e| matches!(e, PipelineError::Setup { stage: Stage::PreExecute, .. })));
    assert_eq!(log.count("pre.close"), 1);
    assert_eq!(log.count("source.open"), 0);
    assert_eq!(log.count("sink.open"), 0);
    assert_eq!(log.count("source_ds.close"), 1);
}

#[tokio::test]
async fn test_setup_failure_closes_each_component_once() {
    let log = EventLog::default();
    let probe = Arc::new(SinkProbe::default());
    let mut source = CountingSource::new(5, &log);
    source.fail_open = true;
    let components = PipelineComponents::new(
        source_bound(source),
        sink_bound(RecordingSink::new(&probe, &log)),
    )
    .with_processor(StubProcessor::boxed("pass", Behavior::Pass, &log));

    let err = pipeline(components, 10, 10)
        .run(&CancellationToken::new(), configs_for(&["pass"]))
        .await
        .unwrap_err();

    assert!(err.any(|e| matches!(e, PipelineError::Setup { stage: Stage::Source, .. })));
    assert_eq!(log.count("sink.open"), 0);
    for component in ["source", "pass", "sink"] {
        assert_eq!(log.count(&format!("{}.close", component)), 1, "{}", component);
    }
}

#[tokio::test]
async fn test_processor_config_count_must_match() {
    let log = EventLog::default();
    let probe = Arc::new(SinkProbe::default());
    let components = PipelineComponents::new(
        source_bound(CountingSource::new(5, &log)),
        sink_bound(RecordingSink::new(&probe, &log)),
    )
    .with_processor(StubProcessor::boxed("pass", Behavior::Pass, &log));

    let err = pipeline(components, 10, 10)
        .run(&CancellationToken::new(), RunConfigs::default())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Setup { .. }), "{}", err);
    assert!(log.events().is_empty());
}
