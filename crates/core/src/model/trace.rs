use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TraceId;
use crate::model::metrics::FinalMetrics;
use crate::model::span::{Operation, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    InProgress,
    Completed,
    /// Reaped before completion. Only seen in session exports, since reaped
    /// traces leave the store.
    Abandoned,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One end-to-end query. Spans are keyed by operation name; recording the
/// same operation twice keeps the latest span.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trace {
    pub trace_id: TraceId,
    pub query_text: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TraceStatus,
    pub spans: BTreeMap<String, Span>,
    pub final_metrics: Option<FinalMetrics>,
}

impl Trace {
    pub fn new(trace_id: TraceId, query_text: String, start_time: DateTime<Utc>) -> Self {
        Self {
            trace_id,
            query_text,
            start_time,
            end_time: None,
            status: TraceStatus::InProgress,
            spans: BTreeMap::new(),
            final_metrics: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TraceStatus::InProgress
    }

    pub fn span(&self, operation: &Operation) -> Option<&Span> {
        self.spans.get(operation.as_str())
    }

    /// Duration of the span for `operation`, or 0 when it was never recorded.
    pub fn span_duration_ms(&self, operation: &Operation) -> u64 {
        self.span(operation)
            .map(|s| s.metrics.duration_ms)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::model::span::{OperationDetail, SpanMetrics};

    #[test]
    fn missing_spans_contribute_zero() {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let mut trace = Trace::new(TraceId::new("trace_1_0"), "q".into(), start);
        trace.spans.insert(
            "search".into(),
            Span {
                operation: Operation::Search,
                metrics: SpanMetrics {
                    duration_ms: 30,
                    success: true,
                    error: None,
                    detail: OperationDetail::Search {
                        results_count: Some(3),
                        top_relevance: None,
                    },
                },
                recorded_at: start,
            },
        );

        assert_eq!(trace.span_duration_ms(&Operation::Search), 30);
        assert_eq!(trace.span_duration_ms(&Operation::Embedding), 0);
        assert!(trace.is_active());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TraceStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(TraceStatus::Abandoned.to_string(), "abandoned");
    }
}
