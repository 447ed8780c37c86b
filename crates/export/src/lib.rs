pub mod forward;
pub mod pipeline;
pub mod sink;

pub use pipeline::{CompletionFeed, ExportPipeline, PipelineConfig};
pub use sink::{ExportSink, JsonLinesSink};
