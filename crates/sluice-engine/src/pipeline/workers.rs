//! Stage workers
//!
//! One task per stage. Every wait (queue receive, queue send, source read,
//! processor call) races the run's cancellation token, biased towards
//! cancellation. A closed upstream queue is the graceful end of stream and
//! is handled separately from cancellation.
//!
//! Each worker hands its component back to the engine when it returns so
//! the engine can close it.

use crate::component::{Processor, Sink, Source};
use crate::error::{PipelineError, Stage};
use crate::pipeline::RunId;
use sluice_common::Record;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Handles shared by every worker of one run
#[derive(Clone)]
pub(super) struct WorkerContext {
    pub run_id: RunId,
    pub token: CancellationToken,
    pub errors: mpsc::Sender<PipelineError>,
}

impl WorkerContext {
    /// Report a fatal error and cancel the run
    fn fail(&self, stage: Stage, source: anyhow::Error) {
        error!(stage = %stage, error = %format!("{:#}", source), "Worker failed, cancelling run");
        if let Err(e) = self.errors.try_send(PipelineError::Stage { stage, source }) {
            // The channel holds one slot per worker
            warn!(error = %e, "Dropped worker error report");
        }
        self.token.cancel();
    }
}

pub(super) struct SourceOutcome {
    pub source: Box<dyn Source>,
    pub read: u64,
}

pub(super) struct ProcessorOutcome {
    pub processor: Box<dyn Processor>,
    pub received: u64,
    pub emitted: u64,
}

pub(super) struct SinkOutcome {
    pub sink: Box<dyn Sink>,
    pub written: u64,
    pub batches: u64,
}

pub(super) async fn run_source(
    ctx: WorkerContext,
    mut source: Box<dyn Source>,
    output: mpsc::Sender<Record>,
) -> SourceOutcome {
    // Cancels the run if this task unwinds
    let guard = ctx.token.clone().drop_guard();
    let mut read = 0u64;
    debug!(stage = "source", "Source worker started");

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => {
                warn!(stage = "source", read, "Source worker cancelled");
                break;
            }
            next = source.read() => next,
        };

        let record = match next {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!(stage = "source", read, "Source exhausted");
                break;
            },
            Err(e) => {
                ctx.fail(Stage::Source, e);
                break;
            },
        };
        read += 1;

        tokio::select! {
            biased;
            _ = ctx.token.cancelled() => {
                warn!(stage = "source", read, "Source worker cancelled while sending");
                break;
            }
            sent = output.send(record) => {
                if sent.is_err() {
                    debug!(stage = "source", "Downstream queue closed");
                    break;
                }
            }
        }
    }

    guard.disarm();
    SourceOutcome { source, read }
}

pub(super) async fn run_processor(
    ctx: WorkerContext,
    stage: Stage,
    mut processor: Box<dyn Processor>,
    mut input: mpsc::Receiver<Record>,
    output: mpsc::Sender<Record>,
) -> ProcessorOutcome {
    let guard = ctx.token.clone().drop_guard();
    let mut received = 0u64;
    let mut emitted = 0u64;
    debug!(stage = %stage, "Processor worker started");

    loop {
        let record = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => {
                warn!(stage = %stage, received, "Processor worker cancelled");
                break;
            }
            next = input.recv() => match next {
                Some(record) => record,
                None => {
                    info!(stage = %stage, received, emitted, "Processor input drained");
                    break;
                }
            },
        };
        received += 1;

        let processed = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => {
                warn!(stage = %stage, received, "Processor worker cancelled mid-record");
                break;
            }
            processed = processor.process(record) => processed,
        };

        let record = match processed {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(e) => {
                ctx.fail(stage.clone(), e);
                break;
            },
        };
        emitted += 1;

        tokio::select! {
            biased;
            _ = ctx.token.cancelled() => {
                warn!(stage = %stage, "Processor worker cancelled while sending");
                break;
            }
            sent = output.send(record) => {
                if sent.is_err() {
                    debug!(stage = %stage, "Downstream queue closed");
                    break;
                }
            }
        }
    }

    guard.disarm();
    ProcessorOutcome {
        processor,
        received,
        emitted,
    }
}

/// Batches records into sink writes.
///
/// The trailing partial batch is written only when the input queue closes
/// gracefully. On cancellation it is discarded.
pub(super) async fn run_sink(
    ctx: WorkerContext,
    mut sink: Box<dyn Sink>,
    mut input: mpsc::Receiver<Record>,
    batch_size: usize,
) -> SinkOutcome {
    let guard = ctx.token.clone().drop_guard();
    let mut batch: Vec<Record> = Vec::with_capacity(batch_size);
    let mut written = 0u64;
    let mut batches = 0u64;
    debug!(stage = "sink", batch_size, "Sink worker started");

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => {
                if !batch.is_empty() {
                    warn!(stage = "sink", discarded = batch.len(), "Sink worker cancelled, partial batch not written");
                }
                break;
            }
            next = input.recv() => next,
        };

        match next {
            Some(record) => {
                batch.push(record);
                if batch.len() >= batch_size {
                    if let Err(e) = write_batch(&ctx, sink.as_mut(), &batch).await {
                        ctx.fail(Stage::Sink, e);
                        break;
                    }
                    written += batch.len() as u64;
                    batches += 1;
                    batch.clear();
                }
            },
            None => {
                if !batch.is_empty() {
                    debug!(stage = "sink", size = batch.len(), "Writing final batch");
                    match write_batch(&ctx, sink.as_mut(), &batch).await {
                        Ok(()) => {
                            written += batch.len() as u64;
                            batches += 1;
                        },
                        Err(e) => ctx.fail(Stage::Sink, e.context("final batch")),
                    }
                }
                info!(stage = "sink", written, batches, "Sink input drained");
                break;
            },
        }
    }

    guard.disarm();
    SinkOutcome {
        sink,
        written,
        batches,
    }
}

async fn write_batch(
    ctx: &WorkerContext,
    sink: &mut dyn Sink,
    batch: &[Record],
) -> anyhow::Result<()> {
    debug!(stage = "sink", size = batch.len(), "Writing batch");
    sink.write(&ctx.run_id, batch).await
}
