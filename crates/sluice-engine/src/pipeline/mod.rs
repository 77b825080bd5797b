//! Pipeline execution engine
//!
//! A run moves through `Created → SettingUp → Running → ClosingDown` and
//! ends `Completed` or `Failed`:
//!
//! 1. **SettingUp** (sequential, fail-fast): every configuration is passed
//!    through the [`ConfigResolver`]; the pre-executor opens and closes; the
//!    source opens and proposes its columns; each processor negotiates the
//!    columns and opens; the sink opens with the frozen schema.
//! 2. **Running**: one task per stage, joined by bounded queues. The first
//!    worker error cancels the run.
//! 3. **ClosingDown**: sink, processors in reverse, source. Every component
//!    is closed exactly once and close errors are joined into the result.
//! 4. **Completed** runs the post-executor once. **Failed** never does.

mod options;
mod report;
mod workers;

pub use options::{PipelineOptions, DEFAULT_BATCH_SIZE, DEFAULT_QUEUE_CAPACITY};
pub use report::{ProcessorStats, RunId, RunReport, RunState};

use crate::component::{Datasource, Executor, Processor, Sink, Source};
use crate::error::{PipelineError, Stage};
use crate::files::{ConfigResolver, FileId, NoopResolver};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sluice_common::ComponentConfig;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use workers::{ProcessorOutcome, SinkOutcome, SourceOutcome, WorkerContext};

/// A component together with the datasource it will receive at `open`
pub struct Bound<T: ?Sized> {
    pub component: Box<T>,
    pub datasource: Option<Box<dyn Datasource>>,
}

impl<T: ?Sized> Bound<T> {
    pub fn new(component: Box<T>) -> Self {
        Self {
            component,
            datasource: None,
        }
    }

    pub fn with_datasource(mut self, datasource: Box<dyn Datasource>) -> Self {
        self.datasource = Some(datasource);
        self
    }
}

/// Component instances of one run
pub struct PipelineComponents {
    pub pre_execute: Option<Bound<dyn Executor>>,
    pub source: Bound<dyn Source>,
    pub processors: Vec<Box<dyn Processor>>,
    pub sink: Bound<dyn Sink>,
    pub post_execute: Option<Bound<dyn Executor>>,
}

impl PipelineComponents {
    pub fn new(source: Bound<dyn Source>, sink: Bound<dyn Sink>) -> Self {
        Self {
            pre_execute: None,
            source,
            processors: Vec::new(),
            sink,
            post_execute: None,
        }
    }

    pub fn with_processor(mut self, processor: Box<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn with_pre_execute(mut self, executor: Bound<dyn Executor>) -> Self {
        self.pre_execute = Some(executor);
        self
    }

    pub fn with_post_execute(mut self, executor: Bound<dyn Executor>) -> Self {
        self.post_execute = Some(executor);
        self
    }
}

/// Type name and configuration of one processor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    pub kind: String,
    pub config: ComponentConfig,
}

impl ProcessorConfig {
    pub fn new(kind: impl Into<String>, config: ComponentConfig) -> Self {
        Self {
            kind: kind.into(),
            config,
        }
    }
}

/// Per-component configuration of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunConfigs {
    pub pre_execute: Option<ComponentConfig>,
    pub source: ComponentConfig,
    pub processors: Vec<ProcessorConfig>,
    pub sink: ComponentConfig,
    pub post_execute: Option<ComponentConfig>,
}

/// A pipeline ready to run once
pub struct Pipeline {
    run_id: RunId,
    components: PipelineComponents,
    options: PipelineOptions,
    resolver: Arc<dyn ConfigResolver>,
}

impl Pipeline {
    pub fn new(run_id: RunId, components: PipelineComponents, options: PipelineOptions) -> Self {
        let options = options.normalized();
        info!(
            run_id = %run_id,
            batch_size = options.batch_size,
            queue_capacity = options.queue_capacity,
            processors = components.processors.len(),
            "Pipeline created"
        );
        Self {
            run_id,
            components,
            options,
            resolver: Arc::new(NoopResolver),
        }
    }

    /// Resolve file keys with `resolver` before components open
    pub fn with_resolver(mut self, resolver: Arc<dyn ConfigResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    /// Execute the pipeline.
    ///
    /// Cancelling `ctx` stops the run; it then fails with
    /// [`PipelineError::Cancelled`] unless a worker reported an error first.
    pub async fn run(
        self,
        ctx: &CancellationToken,
        configs: RunConfigs,
    ) -> Result<RunReport, PipelineError> {
        let span = info_span!("pipeline", run_id = %self.run_id);
        self.execute(ctx, configs).instrument(span).await
    }

    async fn execute(
        self,
        ctx: &CancellationToken,
        mut configs: RunConfigs,
    ) -> Result<RunReport, PipelineError> {
        let Pipeline {
            run_id,
            components,
            options,
            resolver,
        } = self;
        let PipelineComponents {
            pre_execute,
            source,
            processors,
            sink,
            post_execute,
        } = components;

        let started_at = Utc::now();
        let clock = Instant::now();
        let mut run = Lifecycle::new();
        let mut leftovers = Leftovers::default();

        let Bound {
            component: mut source,
            datasource: source_ds,
        } = source;
        let Bound {
            component: mut sink,
            datasource: sink_ds,
        } = sink;
        leftovers.push(Stage::Source, source_ds);
        leftovers.push(Stage::Sink, sink_ds);
        let mut pre_execute = pre_execute;
        if let Some(pre) = pre_execute.as_mut() {
            leftovers.push(Stage::PreExecute, pre.datasource.take());
        }
        let mut post_execute = post_execute;
        if let Some(post) = post_execute.as_mut() {
            leftovers.push(Stage::PostExecute, post.datasource.take());
        }

        run.enter(RunState::SettingUp);

        if configs.processors.len() != processors.len() {
            let error = PipelineError::Setup {
                stage: Stage::Processor {
                    index: processors.len().min(configs.processors.len()),
                    kind: "unconfigured".into(),
                },
                source: anyhow::anyhow!(
                    "{} processors supplied but {} processor configurations",
                    processors.len(),
                    configs.processors.len()
                ),
            };
            return Err(run.fail(vec![error], leftovers.close_all().await));
        }

        let mut created: Vec<FileId> = Vec::new();
        if let Err(error) = resolve_configs(resolver.as_ref(), &mut configs, &mut created).await {
            let mut cleanup = leftovers.close_all().await;
            cleanup.extend(finish_files(resolver.as_ref(), &run_id, &created, true).await);
            return Err(run.fail(vec![error], cleanup));
        }

        if let Some(mut pre) = pre_execute {
            pre.datasource = leftovers.take(&Stage::PreExecute);
            let config = configs.pre_execute.take().unwrap_or_default();
            let errors = execute_once(Stage::PreExecute, pre, &config).await;
            if !errors.is_empty() {
                let mut cleanup = leftovers.close_all().await;
                cleanup.extend(finish_files(resolver.as_ref(), &run_id, &created, true).await);
                return Err(run.fail(errors, cleanup));
            }
        }

        let kinds: Vec<Stage> = configs
            .processors
            .iter()
            .enumerate()
            .map(|(index, pc)| Stage::Processor {
                index,
                kind: pc.kind.clone(),
            })
            .collect();
        let mut processors = processors;

        let setup = open_components(
            &configs,
            &kinds,
            source.as_mut(),
            &mut processors,
            sink.as_mut(),
            &mut leftovers,
        )
        .await;

        if let Err(error) = setup {
            run.enter(RunState::ClosingDown);
            let mut cleanup = close_components(
                Some(sink),
                kinds.into_iter().zip(processors.into_iter().map(Some)).collect(),
                Some(source),
            )
            .await;
            cleanup.extend(leftovers.close_all().await);
            cleanup.extend(finish_files(resolver.as_ref(), &run_id, &created, true).await);
            return Err(run.fail(vec![error], cleanup));
        }

        // Running
        run.enter(RunState::Running);
        let token = ctx.child_token();
        let worker_count = processors.len() + 2;
        let (error_tx, mut error_rx) = mpsc::channel::<PipelineError>(worker_count);
        let worker_ctx = WorkerContext {
            run_id: run_id.clone(),
            token: token.clone(),
            errors: error_tx,
        };

        let (tx, mut rx) = mpsc::channel(options.queue_capacity);
        let source_handle = spawn(workers::run_source(worker_ctx.clone(), source, tx));

        let mut processor_handles: Vec<(Stage, JoinHandle<ProcessorOutcome>)> = Vec::new();
        for (stage, processor) in kinds.iter().cloned().zip(processors) {
            let (tx, next_rx) = mpsc::channel(options.queue_capacity);
            let handle = spawn(workers::run_processor(
                worker_ctx.clone(),
                stage.clone(),
                processor,
                rx,
                tx,
            ));
            processor_handles.push((stage, handle));
            rx = next_rx;
        }

        let sink_handle = spawn(workers::run_sink(
            worker_ctx.clone(),
            sink,
            rx,
            options.batch_size,
        ));
        drop(worker_ctx);

        let mut errors: Vec<PipelineError> = Vec::new();
        let mut panicked: Vec<PipelineError> = Vec::new();

        let (source, records_read) = match source_handle.await {
            Ok(SourceOutcome { source, read }) => (Some(source), read),
            Err(e) => {
                token.cancel();
                panicked.push(worker_panicked(Stage::Source, e));
                (None, 0)
            },
        };

        let mut processors_back = Vec::with_capacity(processor_handles.len());
        let mut processor_stats = Vec::with_capacity(processor_handles.len());
        for (stage, handle) in processor_handles {
            let kind = match &stage {
                Stage::Processor { kind, .. } => kind.clone(),
                other => other.to_string(),
            };
            match handle.await {
                Ok(ProcessorOutcome {
                    processor,
                    received,
                    emitted,
                }) => {
                    processor_stats.push(ProcessorStats {
                        kind,
                        received,
                        emitted,
                    });
                    processors_back.push((stage, Some(processor)));
                },
                Err(e) => {
                    token.cancel();
                    processor_stats.push(ProcessorStats {
                        kind,
                        ..Default::default()
                    });
                    panicked.push(worker_panicked(stage.clone(), e));
                    processors_back.push((stage, None));
                },
            }
        }

        let (sink, records_written, batches_written) = match sink_handle.await {
            Ok(SinkOutcome {
                sink,
                written,
                batches,
            }) => (Some(sink), written, batches),
            Err(e) => {
                token.cancel();
                panicked.push(worker_panicked(Stage::Sink, e));
                (None, 0, 0)
            },
        };

        // Every sender is gone once the workers have returned
        while let Ok(error) = error_rx.try_recv() {
            errors.push(error);
        }
        errors.extend(panicked);

        if errors.is_empty() && token.is_cancelled() {
            warn!("Run cancelled by caller");
            errors.push(PipelineError::Cancelled);
        }

        if errors.is_empty() {
            info!(records_read, records_written, batches_written, "Data flow finished");
        } else {
            error!(errors = errors.len(), "Data flow failed");
        }

        // ClosingDown
        run.enter(RunState::ClosingDown);
        let close_errors = close_components(sink, processors_back, source).await;
        let flow_ok = errors.is_empty() && close_errors.is_empty();
        errors.extend(close_errors);

        if flow_ok {
            if let Some(mut post) = post_execute {
                post.datasource = leftovers.take(&Stage::PostExecute);
                let config = configs.post_execute.take().unwrap_or_default();
                let post_errors = execute_once(Stage::PostExecute, post, &config).await;
                errors.extend(post_errors.into_iter().map(|e| match e {
                    PipelineError::Setup { source, .. } | PipelineError::Close { source, .. } => {
                        PipelineError::PostExecute(source)
                    },
                    other => other,
                }));
            }
        } else if post_execute.is_some() {
            info!("Skipping post-execute executor after failure");
        }
        errors.extend(leftovers.close_all().await);

        let failed = !errors.is_empty();
        errors.extend(finish_files(resolver.as_ref(), &run_id, &created, failed).await);

        match PipelineError::join(errors) {
            Some(error) => Err(run.fail(vec![error], Vec::new())),
            None => {
                run.enter(RunState::Completed);
                let finished_at = Utc::now();
                Ok(RunReport {
                    run_id,
                    state: RunState::Completed,
                    started_at,
                    finished_at,
                    duration: clock.elapsed(),
                    records_read,
                    records_written,
                    batches_written,
                    processors: processor_stats,
                })
            },
        }
    }
}

/// Tracks and logs state transitions of one run
struct Lifecycle {
    state: RunState,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: RunState::Created,
        }
    }

    fn enter(&mut self, next: RunState) {
        info!(from = %self.state, to = %next, "Pipeline state changed");
        self.state = next;
    }

    fn fail(&mut self, primary: Vec<PipelineError>, cleanup: Vec<PipelineError>) -> PipelineError {
        self.enter(RunState::Failed);
        let error = PipelineError::join(primary.into_iter().chain(cleanup))
            .unwrap_or(PipelineError::Cancelled);
        error!(error = %error, "Pipeline run failed");
        error
    }
}

/// Datasources the engine still owns because their component never opened
#[derive(Default)]
struct Leftovers {
    datasources: Vec<(Stage, Box<dyn Datasource>)>,
}

impl Leftovers {
    fn push(&mut self, stage: Stage, datasource: Option<Box<dyn Datasource>>) {
        if let Some(ds) = datasource {
            self.datasources.push((stage, ds));
        }
    }

    fn take(&mut self, stage: &Stage) -> Option<Box<dyn Datasource>> {
        let position = self.datasources.iter().position(|(s, _)| s == stage)?;
        Some(self.datasources.remove(position).1)
    }

    async fn close_all(&mut self) -> Vec<PipelineError> {
        let mut errors = Vec::new();
        for (stage, mut ds) in self.datasources.drain(..) {
            if let Err(e) = ds.close().await {
                warn!(stage = %stage, error = %e, "Failed to close unused datasource");
                errors.push(PipelineError::Close {
                    stage,
                    source: e.context("unused datasource"),
                });
            }
        }
        errors
    }
}

fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future.in_current_span())
}

fn worker_panicked(stage: Stage, error: tokio::task::JoinError) -> PipelineError {
    error!(stage = %stage, error = %error, "Worker panicked");
    PipelineError::WorkerPanicked { stage }
}

async fn resolve_configs(
    resolver: &dyn ConfigResolver,
    configs: &mut RunConfigs,
    created: &mut Vec<FileId>,
) -> Result<(), PipelineError> {
    let RunConfigs {
        pre_execute,
        source,
        processors,
        sink,
        post_execute,
    } = configs;

    let mut targets: Vec<(Stage, &mut ComponentConfig)> = Vec::new();
    if let Some(config) = pre_execute.as_mut() {
        targets.push((Stage::PreExecute, config));
    }
    if let Some(config) = post_execute.as_mut() {
        targets.push((Stage::PostExecute, config));
    }
    targets.push((Stage::Source, source));
    targets.push((Stage::Sink, sink));
    for (index, pc) in processors.iter_mut().enumerate() {
        let stage = Stage::Processor {
            index,
            kind: pc.kind.clone(),
        };
        targets.push((stage, &mut pc.config));
    }

    for (stage, config) in targets {
        match resolver.resolve(config).await {
            Ok(Some(id)) => {
                info!(stage = %stage, file_id = %id, "Allocated output file");
                created.push(id);
            },
            Ok(None) => {},
            Err(source) => {
                error!(stage = %stage, error = %format!("{:#}", source), "Failed to resolve config");
                return Err(PipelineError::ConfigResolution { stage, source });
            },
        }
    }
    Ok(())
}

async fn finish_files(
    resolver: &dyn ConfigResolver,
    run_id: &RunId,
    created: &[FileId],
    failed: bool,
) -> Option<PipelineError> {
    if created.is_empty() {
        return None;
    }
    info!(files = created.len(), failed, "Settling output files");
    resolver
        .finish(run_id, created, failed)
        .await
        .err()
        .map(PipelineError::FileFinish)
}

/// Open then close an executor. Both steps are attempted.
async fn execute_once(
    stage: Stage,
    bound: Bound<dyn Executor>,
    config: &ComponentConfig,
) -> Vec<PipelineError> {
    let Bound {
        component: mut executor,
        datasource,
    } = bound;
    let mut errors = Vec::new();

    info!(stage = %stage, "Running executor");
    if let Err(source) = executor.open(config, datasource).await {
        error!(stage = %stage, error = %format!("{:#}", source), "Executor failed");
        errors.push(PipelineError::Setup {
            stage: stage.clone(),
            source,
        });
    }
    if let Err(source) = executor.close().await {
        error!(stage = %stage, error = %format!("{:#}", source), "Failed to close executor");
        errors.push(PipelineError::Close { stage, source });
    }
    errors
}

async fn open_components(
    configs: &RunConfigs,
    stages: &[Stage],
    source: &mut dyn Source,
    processors: &mut [Box<dyn Processor>],
    sink: &mut dyn Sink,
    leftovers: &mut Leftovers,
) -> Result<(), PipelineError> {
    info!(stage = "source", "Opening source");
    let source_ds = leftovers.take(&Stage::Source);
    source
        .open(&configs.source, source_ds)
        .await
        .map_err(|source| PipelineError::Setup {
            stage: Stage::Source,
            source,
        })?;

    let mut columns = source.columns();
    info!(stage = "source", columns = columns.len(), "Source opened");

    for ((processor, pc), stage) in processors.iter_mut().zip(&configs.processors).zip(stages) {
        columns = processor.handle_columns(&pc.config, columns);
        info!(stage = %stage, columns = columns.len(), "Opening processor");
        processor
            .open(&pc.config)
            .await
            .map_err(|source| PipelineError::Setup {
                stage: stage.clone(),
                source,
            })?;
    }

    let schema = columns.freeze();
    info!(stage = "sink", columns = schema.len(), "Opening sink");
    let sink_ds = leftovers.take(&Stage::Sink);
    sink.open(&configs.sink, schema, sink_ds)
        .await
        .map_err(|source| PipelineError::Setup {
            stage: Stage::Sink,
            source,
        })?;
    Ok(())
}

/// Close sink, processors in reverse, then source. Missing components were
/// lost to a panicked worker and are skipped.
async fn close_components(
    sink: Option<Box<dyn Sink>>,
    processors: Vec<(Stage, Option<Box<dyn Processor>>)>,
    source: Option<Box<dyn Source>>,
) -> Vec<PipelineError> {
    let mut errors = Vec::new();

    if let Some(mut sink) = sink {
        info!(stage = "sink", "Closing sink");
        if let Err(source) = sink.close().await {
            warn!(stage = "sink", error = %format!("{:#}", source), "Failed to close sink");
            errors.push(PipelineError::Close {
                stage: Stage::Sink,
                source,
            });
        }
    }

    for (stage, processor) in processors.into_iter().rev() {
        let Some(mut processor) = processor else {
            continue;
        };
        info!(stage = %stage, "Closing processor");
        if let Err(source) = processor.close().await {
            warn!(stage = %stage, error = %format!("{:#}", source), "Failed to close processor");
            errors.push(PipelineError::Close { stage, source });
        }
    }

    if let Some(mut source) = source {
        info!(stage = "source", "Closing source");
        if let Err(e) = source.close().await {
            warn!(stage = "source", error = %format!("{:#}", e), "Failed to close source");
            errors.push(PipelineError::Close {
                stage: Stage::Source,
                source: e,
            });
        }
    }

    errors
}
