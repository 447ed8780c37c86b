use chrono::{DateTime, TimeZone, Utc};
use ragscope_core::model::metrics::RetrievedDoc;
use ragscope_core::model::span::RawMetrics;
use serde_json::{Value, json};

pub const PAYMENT_QUERY: &str = "Why was my payment declined?";

/// 17 of its 20 content words appear in [`policy_docs`].
pub const GROUNDED_ANSWER: &str = "Payments declined: insufficient funds, expired card, incorrect billing details. \
     Fraud prevention may block unusual transactions. Verify details, contact bank. \
     Blockchain lottery tomorrow.";

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
}

/// Three payment-policy chunks with a mean relevance of 0.82.
pub fn policy_docs() -> Vec<RetrievedDoc> {
    vec![
        RetrievedDoc::new(
            "Payments can be declined due to insufficient funds, an expired card, or incorrect billing details.",
            0.89,
        ),
        RetrievedDoc::new(
            "Fraud prevention systems may block unusual transactions and flag them for manual review.",
            0.80,
        ),
        RetrievedDoc::new(
            "Customers should verify card details and contact their bank when a payment is declined repeatedly.",
            0.77,
        ),
    ]
}

pub fn embedding_metrics(duration_ms: u64) -> RawMetrics {
    object(json!({
        "operation": "embedding",
        "duration_ms": duration_ms,
        "success": true,
        "model": "text-embedding-004",
        "dimension": 768,
    }))
}

pub fn search_metrics(duration_ms: u64, results_count: u64, top_relevance: f64) -> RawMetrics {
    object(json!({
        "operation": "search",
        "duration_ms": duration_ms,
        "success": true,
        "results_count": results_count,
        "top_relevance": top_relevance,
    }))
}

pub fn generation_metrics(duration_ms: u64, input_tokens: u64, output_tokens: u64) -> RawMetrics {
    object(json!({
        "operation": "generation",
        "duration_ms": duration_ms,
        "success": true,
        "input_tokens": input_tokens,
        "output_tokens": output_tokens,
        "total_tokens": input_tokens + output_tokens,
        "model": "gemini-1.5-flash",
    }))
}

pub fn object(value: Value) -> RawMetrics {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
