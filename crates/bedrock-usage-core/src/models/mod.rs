//! Data models for bedrock-usage

mod entry;
mod query;
mod usage;

pub use entry::*;
pub use query::*;
pub use usage::*;
