//! # bedrock-usage
//!
//! Token usage reporting for AWS Bedrock model invocations.
//!
//! Bedrock writes one JSON document per model invocation to a CloudWatch log
//! group. This crate pages through that group for a time window, normalizes
//! each document, and aggregates token counts by model, caller identity and
//! UTC day.
//!
//! ## Architecture
//!
//! - **Retriever**: paginated `FilterLogEvents` reads with bounded retry
//! - **Aggregator**: per-event normalization and grouped statistics
//! - **Pipeline**: retrieval followed by aggregation, one call at a time
//! - **MCP**: JSON-RPC 2.0 server over stdio exposing the pipeline as tools
//!
//! ## Quick Start
//!
//! ```bash
//! # Serve MCP tools on stdio
//! bedrock-usage serve
//!
//! # Per-model usage for the last 3 days
//! bedrock-usage usage --by model --days 3
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod aggregator;
pub mod config;
pub mod error;
pub mod mcp;
pub mod models;
pub mod pipeline;
pub mod retriever;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result, RetrievalError};
    pub use crate::mcp::McpServer;
    pub use crate::models::*;
    pub use crate::pipeline::UsagePipeline;
    pub use crate::retriever::{LogRetriever, LogStore};
}
