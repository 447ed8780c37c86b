use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use ragscope_core::config::Config;
use ragscope_core::cost::Pricing;
use ragscope_core::ids::{TraceId, TraceIdGenerator};
use ragscope_core::model::metrics::FinalMetrics;
use ragscope_core::model::trace::Trace;
use ragscope_core::quality::{QualityAnalyzer, QualityConfig};
use ragscope_core::query::AbandonedTrace;
use ragscope_core::time::{Clock, SystemClock};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Finalized and abandoned traces since the last reset.
#[derive(Debug, Clone)]
pub(crate) struct SessionState {
    pub session_id: String,
    pub completed: Vec<FinalMetrics>,
    pub abandoned: Vec<AbandonedTrace>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            completed: Vec::new(),
            abandoned: Vec::new(),
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Shared handle to every trace the process is tracking. Clones share state.
///
/// Lock order is always `traces` then `session`; neither lock is held
/// across an await point or while computing statistics.
#[derive(Clone)]
pub struct TraceStore {
    traces: Arc<Mutex<HashMap<TraceId, Trace>>>,
    session: Arc<Mutex<SessionState>>,
    ids: Arc<TraceIdGenerator>,
    clock: Arc<dyn Clock>,
    analyzer: Arc<QualityAnalyzer>,
    pricing: Pricing,
    completed_tx: broadcast::Sender<FinalMetrics>,
}

impl Default for TraceStore {
    fn default() -> Self {
        Self::new(Pricing::default(), QualityConfig::default())
    }
}

impl TraceStore {
    pub fn new(pricing: Pricing, quality: QualityConfig) -> Self {
        let (completed_tx, _) = broadcast::channel(1024);
        Self {
            traces: Arc::new(Mutex::new(HashMap::new())),
            session: Arc::new(Mutex::new(SessionState::new())),
            ids: Arc::new(TraceIdGenerator::new()),
            clock: Arc::new(SystemClock),
            analyzer: Arc::new(QualityAnalyzer::new(quality)),
            pricing,
            completed_tx,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.pricing, cfg.quality.clone())
    }

    /// Replaces the time source. Call before the store is shared.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pricing(&self) -> Pricing {
        self.pricing
    }

    pub fn analyzer(&self) -> &QualityAnalyzer {
        &self.analyzer
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn next_trace_id(&self, now: DateTime<Utc>) -> TraceId {
        self.ids.next_id(now)
    }

    pub(crate) fn traces(&self) -> MutexGuard<'_, HashMap<TraceId, Trace>> {
        self.traces.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every trace finalized after this call, in completion order. Slow
    /// receivers lag rather than block completion.
    pub fn subscribe_completed(&self) -> broadcast::Receiver<FinalMetrics> {
        self.completed_tx.subscribe()
    }

    pub(crate) fn publish_completed(&self, metrics: FinalMetrics) {
        let _ = self.completed_tx.send(metrics);
    }
}
