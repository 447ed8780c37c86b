pub mod metrics;
pub mod span;
pub mod trace;
