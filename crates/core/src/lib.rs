pub mod config;
pub mod cost;
pub mod error;
pub mod ids;
pub mod model;
pub mod quality;
pub mod query;
pub mod time;

pub use error::{RagscopeError, Result};
