use std::sync::Arc;

use chrono::Utc;
use ragscope_core::config::Config;
use ragscope_core::model::metrics::{FinalMetrics, RetrievedDoc};
use ragscope_core::model::span::RawMetrics;
use ragscope_core::query::{Completion, SessionExport};
use ragscope_core::time::ManualClock;
use ragscope_store::TraceStore;
use serde_json::{Value, json};

enum Outcome {
    Answer(&'static str),
    Failure(&'static str),
}

struct Scenario {
    query: &'static str,
    docs: &'static [(&'static str, f64)],
    embedding_ms: u64,
    search_ms: u64,
    generation_ms: u64,
    tokens: (u64, u64),
    outcome: Outcome,
}

const SCENARIOS: &[Scenario] = &[
    Scenario {
        query: "Why was my payment declined?",
        docs: &[
            (
                "Payments can be declined due to insufficient funds, an expired card, or incorrect billing details.",
                0.89,
            ),
            (
                "Fraud prevention systems may block unusual transactions and flag them for manual review.",
                0.80,
            ),
            (
                "Customers should verify card details and contact their bank when a payment is declined repeatedly.",
                0.77,
            ),
        ],
        embedding_ms: 45,
        search_ms: 30,
        generation_ms: 850,
        tokens: (120, 85),
        outcome: Outcome::Answer(
            "Payments can be declined due to insufficient funds, an expired card, or incorrect \
             billing details. Verify card details and contact your bank.",
        ),
    },
    Scenario {
        query: "How long do refunds take?",
        docs: &[
            (
                "Refunds are processed within 5-7 business days after the refund request is approved.",
                0.91,
            ),
            (
                "Card refunds may take up to 10 business days to appear on your statement.",
                0.84,
            ),
            (
                "Wallet refunds are credited instantly once the merchant confirms the return.",
                0.62,
            ),
        ],
        embedding_ms: 41,
        search_ms: 27,
        generation_ms: 910,
        tokens: (134, 72),
        outcome: Outcome::Answer(
            "Refunds are processed within 5-7 business days after the refund request is approved. \
             Card refunds may take up to 10 business days to appear on your statement.",
        ),
    },
    Scenario {
        query: "What are forex charges?",
        docs: &[
            (
                "International transactions in a foreign currency incur a forex markup of 3.5% of the transaction amount.",
                0.88,
            ),
            (
                "Dynamic currency conversion at the merchant terminal may add a separate conversion fee.",
                0.71,
            ),
        ],
        embedding_ms: 39,
        search_ms: 33,
        generation_ms: 780,
        tokens: (98, 64),
        outcome: Outcome::Answer(
            "Foreign currency transactions incur a forex markup of 3.5% of the transaction amount. \
             Dynamic currency conversion may add a separate fee.",
        ),
    },
    Scenario {
        query: "Should I buy Bitcoin this week?",
        docs: &[
            (
                "Cryptocurrency purchases are not supported on this platform.",
                0.31,
            ),
            (
                "Investment products are offered only through licensed partners.",
                0.22,
            ),
        ],
        embedding_ms: 44,
        search_ms: 29,
        generation_ms: 620,
        tokens: (87, 31),
        outcome: Outcome::Answer(
            "I don't have information about investment advice in our policies. \
             Please contact customer support.",
        ),
    },
    Scenario {
        query: "Do you offer cashback on UPI payments?",
        docs: &[("UPI payments are free of charge for all account holders.", 0.58)],
        embedding_ms: 47,
        search_ms: 31,
        generation_ms: 700,
        tokens: (76, 28),
        outcome: Outcome::Answer(
            "Yes, every UPI payment earns 5% cashback credited instantly to your wallet.",
        ),
    },
    Scenario {
        query: "What is my current account balance?",
        docs: &[],
        embedding_ms: 43,
        search_ms: 26,
        generation_ms: 3000,
        tokens: (0, 0),
        outcome: Outcome::Failure("generation service timed out"),
    },
];

/// Glue time between pipeline steps that no span accounts for.
const STEP_OVERHEAD_MS: i64 = 2;

pub struct DemoReport {
    pub traces: Vec<(String, FinalMetrics)>,
    pub export: SessionExport,
}

/// Replays canned fintech queries against an in-process store. Time is
/// simulated, so the run is instant and its latencies are reproducible.
pub fn run_demo(cfg: &Config) -> anyhow::Result<DemoReport> {
    let clock = ManualClock::new(Utc::now());
    let store = TraceStore::from_config(cfg).with_clock(Arc::new(clock.clone()));
    let mut traces = Vec::with_capacity(SCENARIOS.len());

    for scenario in SCENARIOS {
        let trace_id = store.start_trace(scenario.query);
        let docs = scenario
            .docs
            .iter()
            .map(|(text, score)| RetrievedDoc::new(*text, *score))
            .collect::<Vec<_>>();
        let top_relevance = docs
            .iter()
            .map(|d| d.relevance_score)
            .fold(0.0, f64::max);

        step(&clock, scenario.embedding_ms);
        store.record_span(
            &trace_id,
            "embedding",
            &raw(json!({
                "duration_ms": scenario.embedding_ms,
                "success": true,
                "model": "text-embedding-004",
                "dimension": 768,
            })),
        )?;

        step(&clock, scenario.search_ms);
        store.record_span(
            &trace_id,
            "search",
            &raw(json!({
                "duration_ms": scenario.search_ms,
                "success": true,
                "results_count": docs.len(),
                "top_relevance": top_relevance,
            })),
        )?;

        step(&clock, scenario.generation_ms);
        let (input_tokens, output_tokens) = scenario.tokens;
        let completion = match scenario.outcome {
            Outcome::Answer(text) => {
                store.record_span(
                    &trace_id,
                    "generation",
                    &raw(json!({
                        "duration_ms": scenario.generation_ms,
                        "success": true,
                        "input_tokens": input_tokens,
                        "output_tokens": output_tokens,
                        "total_tokens": input_tokens + output_tokens,
                        "model": "gemini-1.5-flash",
                    })),
                )?;
                Completion::answered(text, docs)
            }
            Outcome::Failure(message) => {
                store.record_span(
                    &trace_id,
                    "generation",
                    &raw(json!({
                        "duration_ms": scenario.generation_ms,
                        "success": false,
                        "error": message,
                    })),
                )?;
                Completion {
                    retrieved_docs: docs,
                    ..Completion::failed(message)
                }
            }
        };

        let metrics = store.complete_trace(&trace_id, completion)?;
        traces.push((scenario.query.to_string(), metrics));
    }

    Ok(DemoReport {
        traces,
        export: store.export_session(),
    })
}

fn step(clock: &ManualClock, span_ms: u64) {
    clock.advance_ms(i64::try_from(span_ms).unwrap_or(i64::MAX) + STEP_OVERHEAD_MS);
}

fn raw(value: Value) -> RawMetrics {
    match value {
        Value::Object(map) => map,
        _ => RawMetrics::new(),
    }
}
