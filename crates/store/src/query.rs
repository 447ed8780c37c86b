use chrono::{DateTime, Utc};
use ragscope_core::error::{RagscopeError, Result};
use ragscope_core::ids::TraceId;
use ragscope_core::model::metrics::FinalMetrics;
use ragscope_core::model::trace::{Trace, TraceStatus};
use ragscope_core::query::{SessionExport, SessionStats, TraceSummary};
use ragscope_core::time::elapsed_ms;
use tracing::info;

use crate::TraceStore;

impl TraceStore {
    /// Snapshot of one trace, whatever its status.
    pub fn get_trace(&self, trace_id: &TraceId) -> Result<Trace> {
        self.traces()
            .get(trace_id)
            .cloned()
            .ok_or_else(|| RagscopeError::UnknownTrace(trace_id.to_string()))
    }

    pub fn session_stats(&self) -> SessionStats {
        let now = self.now();
        let active = self.traces().values().filter(|t| t.is_active()).count();
        let (completed, abandoned) = {
            let session = self.session();
            (session.completed.clone(), session.abandoned.len())
        };

        SessionStats {
            active_traces: active,
            abandoned_traces: abandoned,
            ..compute_session_stats(&completed, now)
        }
    }

    /// Clears session history. In-progress traces keep running and will
    /// land in the fresh session when they complete.
    pub fn reset_session(&self) {
        let mut traces = self.traces();
        let before = traces.len();
        traces.retain(|_, t| t.is_active());
        let dropped = before - traces.len();
        let cleared = {
            let mut session = self.session();
            let cleared = session.completed.len();
            session.reset();
            cleared
        };
        drop(traces);
        info!(cleared, dropped, "session reset");
    }

    /// Full session dump: statistics plus every known or abandoned trace,
    /// oldest first.
    pub fn export_session(&self) -> SessionExport {
        let session_stats = self.session_stats();
        let (mut traces, session_id, abandoned) = {
            let traces = self.traces();
            let session = self.session();
            let summaries = traces
                .values()
                .map(|t| {
                    let summary = TraceSummary {
                        trace_id: t.trace_id.clone(),
                        query: t.query_text.clone(),
                        status: t.status,
                        metrics: t.final_metrics.as_ref().map(FinalMetrics::to_flat_document),
                    };
                    (t.start_time, summary)
                })
                .chain(session.abandoned.iter().map(|a| {
                    let summary = TraceSummary {
                        trace_id: a.trace_id.clone(),
                        query: a.query.clone(),
                        status: TraceStatus::Abandoned,
                        metrics: None,
                    };
                    (a.started_at, summary)
                }))
                .collect::<Vec<_>>();
            (summaries, session.session_id.clone(), session.abandoned.clone())
        };
        traces.sort_by(|(a_start, a), (b_start, b)| {
            a_start.cmp(b_start).then_with(|| a.trace_id.cmp(&b.trace_id))
        });

        SessionExport {
            session_id,
            exported_at: self.now(),
            session_stats,
            traces: traces.into_iter().map(|(_, summary)| summary).collect(),
            abandoned,
        }
    }
}

/// Aggregates finalized traces. Zero traces yields all-zero statistics.
pub fn compute_session_stats(metrics: &[FinalMetrics], now: DateTime<Utc>) -> SessionStats {
    if metrics.is_empty() {
        return SessionStats::default();
    }
    let count = metrics.len();
    let n = count as f64;

    let mut latencies = metrics.iter().map(|m| m.total_latency_ms).collect::<Vec<_>>();
    latencies.sort_unstable();

    let total_latency_ms = latencies.iter().fold(0u64, |acc, ms| acc.saturating_add(*ms));
    let total_cost_usd = metrics.iter().map(|m| m.cost.total_cost_usd).sum::<f64>();
    let total_tokens = metrics
        .iter()
        .fold(0u64, |acc, m| acc.saturating_add(m.total_tokens));
    let hallucinations = metrics
        .iter()
        .filter(|m| m.quality.hallucination_detected)
        .count();
    let succeeded = metrics.iter().filter(|m| !m.is_failed()).count();
    let first_start = metrics
        .iter()
        .map(|m| m.started_at)
        .min()
        .unwrap_or(now);

    SessionStats {
        total_queries: count,
        avg_latency_ms: total_latency_ms as f64 / n,
        min_latency_ms: latencies[0],
        max_latency_ms: latencies[count - 1],
        p95_latency_ms: percentile_nearest_rank(&latencies, 95),
        total_cost_usd,
        avg_cost_usd: total_cost_usd / n,
        total_tokens,
        avg_tokens_per_query: total_tokens as f64 / n,
        hallucination_rate: hallucinations as f64 / n,
        success_rate: succeeded as f64 / n,
        session_duration_s: elapsed_ms(first_start, now) as f64 / 1000.0,
        active_traces: 0,
        abandoned_traces: 0,
    }
}

/// Nearest-rank percentile of an ascending slice: index `ceil(p/100 * n) - 1`,
/// clamped into range. Integer arithmetic keeps the rank exact.
pub fn percentile_nearest_rank(sorted: &[u64], percent: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (percent * sorted.len()).div_ceil(100);
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}
