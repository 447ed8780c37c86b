use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use ragscope_core::cost::breakdown;
use ragscope_core::error::{RagscopeError, Result};
use ragscope_core::ids::TraceId;
use ragscope_core::model::metrics::{FinalMetrics, TokenCounts};
use ragscope_core::model::span::{Operation, OperationDetail, RawMetrics, Span, SpanMetrics};
use ragscope_core::model::trace::{Trace, TraceStatus};
use ragscope_core::query::Completion;
use ragscope_core::time::elapsed_ms;
use tracing::{debug, info};

use crate::TraceStore;

impl TraceStore {
    pub fn start_trace(&self, query_text: impl Into<String>) -> TraceId {
        let now = self.now();
        let trace_id = self.next_trace_id(now);
        let trace = Trace::new(trace_id.clone(), query_text.into(), now);
        self.traces().insert(trace_id.clone(), trace);
        debug!(trace_id = %trace_id, "trace started");
        trace_id
    }

    /// Validates `metrics` for `operation` and stores the span, replacing
    /// any earlier span for the same operation.
    pub fn record_span(&self, trace_id: &TraceId, operation: &str, metrics: &RawMetrics) -> Result<()> {
        let now = self.now();
        let mut traces = self.traces();
        let trace = active_trace_mut(&mut traces, trace_id)?;

        let operation = Operation::parse(operation)?;
        let metrics = SpanMetrics::from_raw(&operation, metrics)?;
        debug!(
            trace_id = %trace_id,
            operation = %operation,
            duration_ms = metrics.duration_ms,
            success = metrics.success,
            "span recorded"
        );
        trace.spans.insert(
            operation.as_str().to_string(),
            Span {
                operation,
                metrics,
                recorded_at: now,
            },
        );
        Ok(())
    }

    /// Finalizes a trace exactly once. Nothing is mutated when finalization
    /// fails, so the trace stays active and the caller may retry.
    pub fn complete_trace(&self, trace_id: &TraceId, completion: Completion) -> Result<FinalMetrics> {
        let now = self.now();
        let metrics = {
            let mut traces = self.traces();
            let trace = active_trace_mut(&mut traces, trace_id)?;
            let metrics = self.finalize(trace, &completion, now)?;
            trace.end_time = Some(now);
            trace.status = TraceStatus::Completed;
            trace.final_metrics = Some(metrics.clone());
            // Pushed under the traces lock so a concurrent reset sees both or neither.
            self.session().completed.push(metrics.clone());
            metrics
        };

        info!(
            trace_id = %trace_id,
            total_latency_ms = metrics.total_latency_ms,
            total_cost_usd = metrics.cost.total_cost_usd,
            confidence = metrics.quality.confidence,
            hallucination = metrics.quality.hallucination_detected,
            status = %metrics.quality.status_label,
            "trace completed"
        );
        self.publish_completed(metrics.clone());
        Ok(metrics)
    }

    fn finalize(&self, trace: &Trace, completion: &Completion, now: DateTime<Utc>) -> Result<FinalMetrics> {
        let tokens = completion
            .tokens
            .unwrap_or_else(|| generation_tokens(trace));
        let pricing = completion.pricing.unwrap_or(self.pricing());
        let cost = breakdown(tokens.input_tokens, tokens.output_tokens, &pricing)?;

        let quality = match completion.failure {
            Some(_) => self.analyzer().failed(&completion.retrieved_docs),
            None => self
                .analyzer()
                .analyze(&completion.response_text, &completion.retrieved_docs),
        };

        let total_latency_ms = elapsed_ms(trace.start_time, now);
        let embedding_ms = trace.span_duration_ms(&Operation::Embedding);
        let search_ms = trace.span_duration_ms(&Operation::Search);
        let generation_ms = trace.span_duration_ms(&Operation::Generation);
        let known_ms = embedding_ms
            .saturating_add(search_ms)
            .saturating_add(generation_ms);
        let other_ms = total_latency_ms.saturating_sub(known_ms);

        let span_durations_ms = trace
            .spans
            .iter()
            .map(|(name, span)| (name.clone(), span.metrics.duration_ms))
            .collect::<BTreeMap<_, _>>();

        let (results_count, search_top_relevance) = match trace
            .span(&Operation::Search)
            .map(|s| &s.metrics.detail)
        {
            Some(OperationDetail::Search {
                results_count,
                top_relevance,
            }) => (*results_count, *top_relevance),
            _ => (None, None),
        };
        let model = match trace
            .span(&Operation::Generation)
            .map(|s| &s.metrics.detail)
        {
            Some(OperationDetail::Generation { model, .. }) => model.clone(),
            _ => None,
        };

        // breakdown() has already rejected negative counts.
        let input_tokens = tokens.input_tokens.unsigned_abs();
        let output_tokens = tokens.output_tokens.unsigned_abs();

        Ok(FinalMetrics {
            trace_id: trace.trace_id.clone(),
            query: trace.query_text.clone(),
            started_at: trace.start_time,
            completed_at: now,
            total_latency_ms,
            embedding_ms,
            search_ms,
            generation_ms,
            other_ms,
            span_durations_ms,
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
            cost,
            results_count,
            search_top_relevance,
            model,
            quality,
            error: completion.failure.clone(),
        })
    }
}

pub(crate) fn active_trace_mut<'a>(
    traces: &'a mut HashMap<TraceId, Trace>,
    trace_id: &TraceId,
) -> Result<&'a mut Trace> {
    let trace = traces
        .get_mut(trace_id)
        .ok_or_else(|| RagscopeError::UnknownTrace(trace_id.to_string()))?;
    if !trace.is_active() {
        return Err(RagscopeError::TraceNotActive {
            trace_id: trace_id.to_string(),
            status: trace.status.to_string(),
        });
    }
    Ok(trace)
}

fn generation_tokens(trace: &Trace) -> TokenCounts {
    let (input, output) = trace
        .span(&Operation::Generation)
        .and_then(|span| span.metrics.token_counts())
        .unwrap_or((0, 0));
    TokenCounts {
        input_tokens: i64::try_from(input).unwrap_or(i64::MAX),
        output_tokens: i64::try_from(output).unwrap_or(i64::MAX),
    }
}
