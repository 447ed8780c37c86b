use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TraceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Allocates `trace_<seq>_<unix_secs>` ids. The sequence is process-wide
/// and never rewinds, so ids stay unique across session resets.
#[derive(Debug, Default)]
pub struct TraceIdGenerator {
    next: AtomicU64,
}

impl TraceIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self, now: DateTime<Utc>) -> TraceId {
        let seq = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        TraceId(format!("trace_{seq}_{}", now.timestamp()))
    }
}
