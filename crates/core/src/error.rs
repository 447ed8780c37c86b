use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RagscopeError {
    #[error("unknown trace: {0}")]
    UnknownTrace(String),

    #[error("trace {trace_id} is not active (status={status})")]
    TraceNotActive { trace_id: String, status: String },

    #[error("invalid metrics: {0}")]
    InvalidMetrics(String),

    #[error("invalid token count: input={input_tokens} output={output_tokens}")]
    InvalidTokenCount {
        input_tokens: i64,
        output_tokens: i64,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("export error: {0}")]
    Export(String),

    #[error("io error: {0}")]
    Io(String),
}

impl RagscopeError {
    /// Stable machine-readable code, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTrace(_) => "unknown_trace",
            Self::TraceNotActive { .. } => "trace_not_active",
            Self::InvalidMetrics(_) => "invalid_metrics",
            Self::InvalidTokenCount { .. } => "invalid_token_count",
            Self::Config(_) => "config",
            Self::Parse(_) => "parse",
            Self::Export(_) => "export",
            Self::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, RagscopeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(
            RagscopeError::UnknownTrace("t".into()).kind(),
            "unknown_trace"
        );
        assert_eq!(
            RagscopeError::TraceNotActive {
                trace_id: "t".into(),
                status: "completed".into()
            }
            .kind(),
            "trace_not_active"
        );
        assert_eq!(
            RagscopeError::InvalidTokenCount {
                input_tokens: -1,
                output_tokens: 0
            }
            .kind(),
            "invalid_token_count"
        );
    }

    #[test]
    fn not_active_message_names_status() {
        let err = RagscopeError::TraceNotActive {
            trace_id: "trace_1_1".into(),
            status: "completed".into(),
        };
        assert_eq!(
            err.to_string(),
            "trace trace_1_1 is not active (status=completed)"
        );
    }
}
