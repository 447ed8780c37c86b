use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cost::Pricing;
use crate::ids::TraceId;
use crate::model::metrics::{FlatDocument, RetrievedDoc, TokenCounts};
use crate::model::span::RawMetrics;
use crate::model::trace::TraceStatus;

/// Inputs to trace finalization.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Completion {
    #[serde(default)]
    pub response_text: String,
    #[serde(default)]
    pub retrieved_docs: Vec<RetrievedDoc>,
    /// Falls back to the generation span's counts when absent.
    #[serde(default)]
    pub tokens: Option<TokenCounts>,
    /// Falls back to the configured pricing when absent.
    #[serde(default)]
    pub pricing: Option<Pricing>,
    /// Set when an upstream call failed; the trace is labelled `failed`.
    #[serde(default)]
    pub failure: Option<String>,
}

impl Completion {
    pub fn answered(response_text: impl Into<String>, retrieved_docs: Vec<RetrievedDoc>) -> Self {
        Self {
            response_text: response_text.into(),
            retrieved_docs,
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_tokens(mut self, input_tokens: i64, output_tokens: i64) -> Self {
        self.tokens = Some(TokenCounts {
            input_tokens,
            output_tokens,
        });
        self
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = Some(pricing);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionStats {
    pub total_queries: usize,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub total_cost_usd: f64,
    pub avg_cost_usd: f64,
    pub total_tokens: u64,
    pub avg_tokens_per_query: f64,
    pub hallucination_rate: f64,
    pub success_rate: f64,
    pub session_duration_s: f64,
    pub active_traces: usize,
    pub abandoned_traces: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbandonedTrace {
    pub trace_id: TraceId,
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub abandoned_at: DateTime<Utc>,
    pub spans_recorded: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSummary {
    pub trace_id: TraceId,
    pub query: String,
    pub status: TraceStatus,
    pub metrics: Option<FlatDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionExport {
    pub session_id: String,
    pub exported_at: DateTime<Utc>,
    pub session_stats: SessionStats,
    pub traces: Vec<TraceSummary>,
    pub abandoned: Vec<AbandonedTrace>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTraceRequest {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTraceResponse {
    pub trace_id: TraceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSpanRequest {
    pub operation: String,
    pub metrics: RawMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}
