use std::sync::Arc;
use std::time::Duration;

use ragscope_core::config::Config;
use ragscope_core::model::metrics::FlatDocument;
use ragscope_store::TraceStore;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::sink::ExportSink;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub flush_interval: Duration,
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            flush_interval: Duration::from_millis(500),
            batch_size: 64,
        }
    }
}

impl PipelineConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            flush_interval: Duration::from_millis(cfg.export_flush_ms.max(1)),
            batch_size: cfg.export_batch_size.max(1),
            ..Self::default()
        }
    }
}

enum ExportMsg {
    Doc(FlatDocument),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Buffers flattened trace metrics and hands them to every sink in batches,
/// either when `batch_size` documents are waiting or on each flush tick.
#[derive(Clone)]
pub struct ExportPipeline {
    tx: mpsc::Sender<ExportMsg>,
}

impl ExportPipeline {
    pub fn new(sinks: Vec<Arc<dyn ExportSink>>, cfg: PipelineConfig) -> Self {
        let (tx, rx) = mpsc::channel(cfg.channel_capacity);
        tokio::spawn(run_export_writer(
            sinks,
            rx,
            cfg.batch_size,
            cfg.flush_interval,
        ));
        Self { tx }
    }

    pub async fn submit(&self, doc: FlatDocument) {
        if self.tx.send(ExportMsg::Doc(doc)).await.is_err() {
            warn!("export pipeline dropped document: receiver closed");
        }
    }

    /// Resolves once everything submitted before the call has been written.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(ExportMsg::Flush(ack_tx)).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }

    /// Writes everything buffered, then drops the sinks. Documents submitted
    /// afterwards are discarded.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(ExportMsg::Shutdown(ack_tx)).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }

    /// Forwards every trace the store finalizes from now on. Dropping the
    /// returned feed stops it.
    pub fn attach(&self, store: &TraceStore) -> CompletionFeed {
        let mut rx = store.subscribe_completed();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let pipeline = self.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    msg = rx.recv() => match msg {
                        Ok(metrics) => pipeline.submit(metrics.to_flat_document()).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "export pipeline lagged behind completed traces");
                        }
                        Err(RecvError::Closed) => return,
                    },
                    _ = &mut stop_rx => break,
                }
            }
            loop {
                match rx.try_recv() {
                    Ok(metrics) => pipeline.submit(metrics.to_flat_document()).await,
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!(skipped, "export pipeline lagged behind completed traces");
                    }
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
        });
        CompletionFeed { stop_tx, task }
    }
}

/// Subscription task moving completed traces into an [`ExportPipeline`].
pub struct CompletionFeed {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl CompletionFeed {
    /// Stops listening and resolves once every completion already published
    /// has been submitted to the pipeline.
    pub async fn drain(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "completion feed task failed");
        }
    }
}

async fn run_export_writer(
    sinks: Vec<Arc<dyn ExportSink>>,
    mut rx: mpsc::Receiver<ExportMsg>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    let mut buffer = Vec::new();
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(ExportMsg::Doc(doc)) => {
                    buffer.push(doc);
                    if buffer.len() >= batch_size {
                        flush_docs(&sinks, &mut buffer);
                    }
                }
                Some(ExportMsg::Flush(ack)) => {
                    flush_docs(&sinks, &mut buffer);
                    let _ = ack.send(());
                }
                Some(ExportMsg::Shutdown(ack)) => {
                    flush_docs(&sinks, &mut buffer);
                    drop(sinks);
                    debug!("export writer stopped");
                    let _ = ack.send(());
                    return;
                }
                None => {
                    flush_docs(&sinks, &mut buffer);
                    break;
                }
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_docs(&sinks, &mut buffer);
                }
            }
        }
    }
}

fn flush_docs(sinks: &[Arc<dyn ExportSink>], buffer: &mut Vec<FlatDocument>) {
    if buffer.is_empty() {
        return;
    }
    for sink in sinks {
        if let Err(e) = sink.write_batch(buffer) {
            warn!(sink = sink.name(), error = %e, "failed to export batch");
        }
    }
    debug!(docs = buffer.len(), "export batch flushed");
    buffer.clear();
}
