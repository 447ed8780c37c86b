use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::cost::CostBreakdown;
use crate::ids::TraceId;
use crate::quality::STATUS_FAILED;

/// Flat key/value rendering of a finalized trace, for dashboards and
/// metrics backends.
pub type FlatDocument = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedDoc {
    #[serde(alias = "content")]
    pub text: String,
    pub relevance_score: f64,
}

impl RetrievedDoc {
    pub fn new(text: impl Into<String>, relevance_score: f64) -> Self {
        Self {
            text: text.into(),
            relevance_score,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TokenCounts {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityVerdict {
    pub grounding_score: f64,
    pub confidence: f64,
    pub hallucination_detected: bool,
    pub status_label: String,
    pub avg_relevance: f64,
    pub top_relevance: f64,
    pub retrieved_docs_count: usize,
    pub key_words_checked: usize,
    pub grounded_words: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalMetrics {
    pub trace_id: TraceId,
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_latency_ms: u64,
    pub embedding_ms: u64,
    pub search_ms: u64,
    pub generation_ms: u64,
    pub other_ms: u64,
    pub span_durations_ms: BTreeMap<String, u64>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(flatten)]
    pub cost: CostBreakdown,
    pub results_count: Option<u64>,
    pub search_top_relevance: Option<f64>,
    pub model: Option<String>,
    #[serde(flatten)]
    pub quality: QualityVerdict,
    pub error: Option<String>,
}

impl FinalMetrics {
    pub fn is_failed(&self) -> bool {
        self.quality.status_label == STATUS_FAILED
    }

    /// Scores stay in 0..1, costs in USD, latencies in whole milliseconds.
    pub fn to_flat_document(&self) -> FlatDocument {
        let mut doc = FlatDocument::new();
        doc.insert("trace_id".into(), json!(self.trace_id));
        doc.insert("query".into(), json!(self.query));
        doc.insert(
            "started_at".into(),
            json!(self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        doc.insert(
            "completed_at".into(),
            json!(self.completed_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        doc.insert("total_latency_ms".into(), json!(self.total_latency_ms));
        doc.insert("embedding_ms".into(), json!(self.embedding_ms));
        doc.insert("search_ms".into(), json!(self.search_ms));
        doc.insert("generation_ms".into(), json!(self.generation_ms));
        doc.insert("other_ms".into(), json!(self.other_ms));
        for (name, ms) in &self.span_durations_ms {
            doc.insert(format!("span.{name}.duration_ms"), json!(ms));
        }
        doc.insert("input_tokens".into(), json!(self.input_tokens));
        doc.insert("output_tokens".into(), json!(self.output_tokens));
        doc.insert("total_tokens".into(), json!(self.total_tokens));
        doc.insert("input_cost_usd".into(), json!(self.cost.input_cost_usd));
        doc.insert("output_cost_usd".into(), json!(self.cost.output_cost_usd));
        doc.insert("total_cost_usd".into(), json!(self.cost.total_cost_usd));
        doc.insert("results_count".into(), json!(self.results_count));
        doc.insert(
            "search_top_relevance".into(),
            json!(self.search_top_relevance),
        );
        doc.insert("model".into(), json!(self.model));
        doc.insert(
            "grounding_score".into(),
            json!(self.quality.grounding_score),
        );
        doc.insert("confidence".into(), json!(self.quality.confidence));
        doc.insert(
            "hallucination_detected".into(),
            json!(self.quality.hallucination_detected),
        );
        doc.insert("status_label".into(), json!(self.quality.status_label));
        doc.insert("avg_relevance".into(), json!(self.quality.avg_relevance));
        doc.insert("top_relevance".into(), json!(self.quality.top_relevance));
        doc.insert(
            "retrieved_docs_count".into(),
            json!(self.quality.retrieved_docs_count),
        );
        doc.insert("error".into(), json!(self.error));
        doc
    }
}
