use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use ragscope_core::error::{RagscopeError, Result};
use ragscope_core::model::metrics::FlatDocument;

/// Destination for batches of flattened trace metrics.
pub trait ExportSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn write_batch(&self, docs: &[FlatDocument]) -> Result<()>;
}

/// Appends one JSON object per line.
pub struct JsonLinesSink {
    file: Mutex<File>,
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| RagscopeError::Io(format!("failed to create export dir: {e}")))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| RagscopeError::Io(format!("failed to open {}: {e}", path.display())))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl ExportSink for JsonLinesSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn write_batch(&self, docs: &[FlatDocument]) -> Result<()> {
        let file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = BufWriter::new(&*file);
        for doc in docs {
            serde_json::to_writer(&mut out, doc)
                .map_err(|e| RagscopeError::Export(format!("failed to encode document: {e}")))?;
            out.write_all(b"\n")
                .map_err(|e| RagscopeError::Io(format!("failed to write export: {e}")))?;
        }
        out.flush()
            .map_err(|e| RagscopeError::Io(format!("failed to flush export: {e}")))
    }
}

/// Keeps every batch in memory; handy for embedding and tests.
#[derive(Clone, Default)]
pub struct MemorySink {
    docs: Arc<Mutex<Vec<FlatDocument>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn docs(&self) -> Vec<FlatDocument> {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ExportSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn write_batch(&self, docs: &[FlatDocument]) -> Result<()> {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(docs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn doc(id: &str) -> FlatDocument {
        let mut d = FlatDocument::new();
        d.insert("trace_id".into(), json!(id));
        d.insert("total_latency_ms".into(), json!(925));
        d
    }

    #[test]
    fn json_lines_append_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/traces.jsonl");

        JsonLinesSink::open(&path)
            .unwrap()
            .write_batch(&[doc("a"), doc("b")])
            .unwrap();
        JsonLinesSink::open(&path)
            .unwrap()
            .write_batch(&[doc("c")])
            .unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let ids = raw
            .lines()
            .map(|l| serde_json::from_str::<Value>(l).unwrap()["trace_id"].clone())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[test]
    fn memory_sink_collects() {
        let sink = MemorySink::new();
        sink.write_batch(&[doc("a")]).unwrap();
        sink.clone().write_batch(&[doc("b")]).unwrap();
        assert_eq!(sink.docs().len(), 2);
    }
}
