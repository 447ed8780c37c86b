use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RagscopeError, Result};

/// Loosely-typed metrics bundle as reported by an upstream operation.
pub type RawMetrics = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operation {
    Embedding,
    Search,
    Generation,
    Custom(String),
}

impl Operation {
    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim();
        match name {
            "" => Err(RagscopeError::InvalidMetrics(
                "operation name cannot be empty".to_string(),
            )),
            "embedding" => Ok(Self::Embedding),
            "search" => Ok(Self::Search),
            "generation" => Ok(Self::Generation),
            other => Ok(Self::Custom(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Embedding => "embedding",
            Self::Search => "search",
            Self::Generation => "generation",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Operation {
    type Error = RagscopeError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Operation> for String {
    fn from(value: Operation) -> Self {
        value.as_str().to_string()
    }
}

/// Fields specific to each kind of operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationDetail {
    Embedding {
        model: Option<String>,
        dimension: Option<u64>,
    },
    Search {
        results_count: Option<u64>,
        top_relevance: Option<f64>,
    },
    Generation {
        input_tokens: Option<u64>,
        output_tokens: Option<u64>,
        total_tokens: Option<u64>,
        model: Option<String>,
    },
    Custom {
        fields: RawMetrics,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanMetrics {
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub detail: OperationDetail,
}

const COMMON_FIELDS: [&str; 4] = ["operation", "duration_ms", "success", "error"];

impl SpanMetrics {
    /// Validates a raw bundle against the operation it was reported for.
    pub fn from_raw(operation: &Operation, raw: &RawMetrics) -> Result<Self> {
        if let Some(declared) = optional_str(raw, "operation")?
            && declared != operation.as_str()
        {
            return Err(RagscopeError::InvalidMetrics(format!(
                "metrics declare operation {declared} but were recorded as {operation}"
            )));
        }

        let duration_ms = required_duration(raw)?;
        let success = match present(raw, "success") {
            Some(Value::Bool(v)) => *v,
            Some(other) => {
                return Err(RagscopeError::InvalidMetrics(format!(
                    "success must be a boolean, got {other}"
                )));
            }
            None => {
                return Err(RagscopeError::InvalidMetrics(
                    "missing required field success".to_string(),
                ));
            }
        };
        let error = optional_str(raw, "error")?.map(str::to_string);

        let detail = match operation {
            Operation::Embedding => OperationDetail::Embedding {
                model: optional_str(raw, "model")?.map(str::to_string),
                dimension: optional_count(raw, "dimension")?,
            },
            Operation::Search => OperationDetail::Search {
                results_count: optional_count(raw, "results_count")?,
                top_relevance: optional_score(raw, "top_relevance")?,
            },
            Operation::Generation => OperationDetail::Generation {
                input_tokens: optional_count(raw, "input_tokens")?,
                output_tokens: optional_count(raw, "output_tokens")?,
                total_tokens: optional_count(raw, "total_tokens")?,
                model: optional_str(raw, "model")?.map(str::to_string),
            },
            Operation::Custom(_) => OperationDetail::Custom {
                fields: raw
                    .iter()
                    .filter(|(k, _)| !COMMON_FIELDS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            },
        };

        Ok(Self {
            duration_ms,
            success,
            error,
            detail,
        })
    }

    /// `(input_tokens, output_tokens)` reported by a generation span.
    pub fn token_counts(&self) -> Option<(u64, u64)> {
        match &self.detail {
            OperationDetail::Generation {
                input_tokens,
                output_tokens,
                ..
            } => Some((input_tokens.unwrap_or(0), output_tokens.unwrap_or(0))),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Span {
    pub operation: Operation,
    pub metrics: SpanMetrics,
    pub recorded_at: DateTime<Utc>,
}

fn present<'a>(raw: &'a RawMetrics, key: &str) -> Option<&'a Value> {
    raw.get(key).filter(|v| !v.is_null())
}

fn required_duration(raw: &RawMetrics) -> Result<u64> {
    let Some(value) = present(raw, "duration_ms") else {
        return Err(RagscopeError::InvalidMetrics(
            "missing required field duration_ms".to_string(),
        ));
    };
    match value.as_f64() {
        Some(ms) if ms.is_finite() && ms >= 0.0 => Ok(ms.round() as u64),
        _ => Err(RagscopeError::InvalidMetrics(format!(
            "duration_ms must be a non-negative number, got {value}"
        ))),
    }
}

fn optional_str<'a>(raw: &'a RawMetrics, key: &str) -> Result<Option<&'a str>> {
    match present(raw, key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(RagscopeError::InvalidMetrics(format!(
            "{key} must be a string, got {other}"
        ))),
    }
}

fn optional_count(raw: &RawMetrics, key: &str) -> Result<Option<u64>> {
    let Some(value) = present(raw, key) else {
        return Ok(None);
    };
    if let Some(n) = value.as_u64() {
        return Ok(Some(n));
    }
    match value.as_f64() {
        Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => Ok(Some(f as u64)),
        _ => Err(RagscopeError::InvalidMetrics(format!(
            "{key} must be a non-negative integer, got {value}"
        ))),
    }
}

fn optional_score(raw: &RawMetrics, key: &str) -> Result<Option<f64>> {
    let Some(value) = present(raw, key) else {
        return Ok(None);
    };
    match value.as_f64() {
        Some(f) if (0.0..=1.0).contains(&f) => Ok(Some(f)),
        _ => Err(RagscopeError::InvalidMetrics(format!(
            "{key} must be a number in [0, 1], got {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(v: Value) -> RawMetrics {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn parses_known_and_custom_operations() {
        assert_eq!(Operation::parse("search").unwrap(), Operation::Search);
        assert_eq!(
            Operation::parse("rerank").unwrap(),
            Operation::Custom("rerank".into())
        );
        assert!(Operation::parse("  ").is_err());
    }

    #[test]
    fn search_metrics_keep_their_fields() {
        let m = SpanMetrics::from_raw(
            &Operation::Search,
            &raw(json!({"duration_ms": 30, "success": true, "results_count": 3, "top_relevance": 0.89})),
        )
        .unwrap();
        assert_eq!(m.duration_ms, 30);
        assert!(m.success);
        assert_eq!(
            m.detail,
            OperationDetail::Search {
                results_count: Some(3),
                top_relevance: Some(0.89)
            }
        );
    }

    #[test]
    fn fractional_durations_round_to_whole_ms() {
        let m = SpanMetrics::from_raw(
            &Operation::Embedding,
            &raw(json!({"duration_ms": 45.6, "success": true, "model": "text-embedding-004"})),
        )
        .unwrap();
        assert_eq!(m.duration_ms, 46);
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let err = SpanMetrics::from_raw(&Operation::Embedding, &raw(json!({"success": true})))
            .unwrap_err();
        assert!(matches!(err, RagscopeError::InvalidMetrics(_)));

        let err = SpanMetrics::from_raw(&Operation::Embedding, &raw(json!({"duration_ms": 4})))
            .unwrap_err();
        assert!(matches!(err, RagscopeError::InvalidMetrics(_)));
    }

    #[test]
    fn malformed_types_are_rejected() {
        for bad in [
            json!({"duration_ms": "45", "success": true}),
            json!({"duration_ms": -1, "success": true}),
            json!({"duration_ms": 1, "success": "yes"}),
            json!({"duration_ms": 1, "success": true, "input_tokens": -3}),
            json!({"duration_ms": 1, "success": true, "model": 7}),
        ] {
            assert!(
                SpanMetrics::from_raw(&Operation::Generation, &raw(bad.clone())).is_err(),
                "{bad} should be rejected"
            );
        }
        assert!(
            SpanMetrics::from_raw(
                &Operation::Search,
                &raw(json!({"duration_ms": 1, "success": true, "top_relevance": 1.5}))
            )
            .is_err()
        );
    }

    #[test]
    fn declared_operation_must_match() {
        let err = SpanMetrics::from_raw(
            &Operation::Search,
            &raw(json!({"operation": "embedding", "duration_ms": 1, "success": true})),
        )
        .unwrap_err();
        assert!(matches!(err, RagscopeError::InvalidMetrics(_)));
    }

    #[test]
    fn custom_operations_keep_extra_fields() {
        let m = SpanMetrics::from_raw(
            &Operation::Custom("rerank".into()),
            &raw(json!({"duration_ms": 12, "success": false, "error": "timeout", "candidates": 20})),
        )
        .unwrap();
        assert_eq!(m.error.as_deref(), Some("timeout"));
        let OperationDetail::Custom { fields } = m.detail else {
            panic!("expected custom detail");
        };
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["candidates"], json!(20));
    }

    #[test]
    fn generation_reports_token_counts() {
        let m = SpanMetrics::from_raw(
            &Operation::Generation,
            &raw(json!({"duration_ms": 850, "success": true, "input_tokens": 120, "output_tokens": 85})),
        )
        .unwrap();
        assert_eq!(m.token_counts(), Some((120, 85)));
    }
}
