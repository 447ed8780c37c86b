use chrono::SecondsFormat;
use owo_colors::OwoColorize;
use ragscope_core::model::metrics::{FinalMetrics, QualityVerdict};
use ragscope_core::model::trace::Trace;
use ragscope_core::query::{SessionExport, SessionStats};

pub fn print_metrics_human(m: &FinalMetrics) {
    println!(
        "TRACE {} latency={}ms cost=${:.6} tokens={} {}",
        m.trace_id,
        m.total_latency_ms,
        m.cost.total_cost_usd,
        m.total_tokens,
        verdict_label(&m.quality)
    );
    println!(
        "  embedding={}ms search={}ms generation={}ms other={}ms",
        m.embedding_ms, m.search_ms, m.generation_ms, m.other_ms
    );
    println!(
        "  confidence={:.0}% grounding={:.0}% ({}/{} words) docs={} avg_relevance={:.2}",
        m.quality.confidence * 100.0,
        m.quality.grounding_score * 100.0,
        m.quality.grounded_words,
        m.quality.key_words_checked,
        m.quality.retrieved_docs_count,
        m.quality.avg_relevance
    );
    if let Some(err) = &m.error {
        println!("  error={err}");
    }
}

pub fn print_trace_human(t: &Trace) {
    println!(
        "TRACE {} status={} started={} spans={}",
        t.trace_id,
        t.status,
        t.start_time.to_rfc3339_opts(SecondsFormat::Millis, true),
        t.spans.len()
    );
    println!("  query=\"{}\"", t.query_text);
    for (name, span) in &t.spans {
        let outcome = if span.metrics.success { "ok" } else { "failed" };
        println!("  {name} ({}ms) {outcome}", span.metrics.duration_ms);
    }
    if let Some(m) = &t.final_metrics {
        print_metrics_human(m);
    }
}

pub fn print_stats_human(s: &SessionStats) {
    println!("queries={}", s.total_queries);
    println!(
        "latency avg={:.1}ms min={}ms max={}ms p95={}ms",
        s.avg_latency_ms, s.min_latency_ms, s.max_latency_ms, s.p95_latency_ms
    );
    println!(
        "cost total=${:.6} avg=${:.6}",
        s.total_cost_usd, s.avg_cost_usd
    );
    println!(
        "tokens total={} avg={:.1}",
        s.total_tokens, s.avg_tokens_per_query
    );
    println!(
        "hallucination_rate={:.1}% success_rate={:.1}%",
        s.hallucination_rate * 100.0,
        s.success_rate * 100.0
    );
    println!(
        "active={} abandoned={} duration={:.1}s",
        s.active_traces, s.abandoned_traces, s.session_duration_s
    );
}

pub fn print_export_human(e: &SessionExport) {
    println!(
        "session={} exported={}",
        e.session_id,
        e.exported_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    );
    print_stats_human(&e.session_stats);
    for t in &e.traces {
        println!("trace={} status={} query=\"{}\"", t.trace_id, t.status, t.query);
    }
    for a in &e.abandoned {
        println!(
            "abandoned={} spans={} query=\"{}\"",
            a.trace_id, a.spans_recorded, a.query
        );
    }
    println!(
        "-- {} traces, {} abandoned --",
        e.traces.len(),
        e.abandoned.len()
    );
}

fn verdict_label(q: &QualityVerdict) -> String {
    if q.hallucination_detected {
        q.status_label.red().to_string()
    } else if q.status_label == ragscope_core::quality::STATUS_FAILED {
        q.status_label.magenta().to_string()
    } else if q.status_label == ragscope_core::quality::STATUS_GROUNDED {
        q.status_label.green().to_string()
    } else {
        q.status_label.yellow().to_string()
    }
}
