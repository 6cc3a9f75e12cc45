//! # pgbulkload
//!
//! Streaming bulk data loader for PostgreSQL.
//!
//! Moves tabular data from heterogeneous sources (MySQL databases and
//! fixed-width text files) into a PostgreSQL target using the COPY text
//! protocol, with:
//!
//! - **Backpressured pipelines**: one bounded queue and two tasks per
//!   table, preserving source row order
//! - **Batch-split recovery**: a rejected batch is halved and retried down
//!   to the failing row, which is logged and dropped
//! - **Parallel index builds** overlapping the next table's load
//! - **Schema bracketing**: drop/create before the load; sequences,
//!   primary keys, foreign keys and comments after it
//! - **Per-table statistics** with phase totals
//!
//! ## Example
//!
//! ```rust,no_run
//! use pgbulkload::{LoadConfig, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoadConfig::load("load.yaml")?;
//!     let report = Orchestrator::new(config).run(CancellationToken::new()).await?;
//!     println!("{}", report.render());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod pg;
pub mod pipeline;
pub mod reader;
pub mod schema;
pub mod stats;

// Re-exports for convenient access
pub use crate::config::{ConnectionSpec, LoadConfig, MysqlSpec, PgHost, TlsMode};
pub use crate::core::{Batch, BatchConfig, Row};
pub use error::{LoadError, Result};
pub use orchestrator::{CheckReport, LoadReport, Orchestrator, PhaseTotal};
pub use pg::{WriterOptions, WriterOutcome};
pub use stats::{Field, LabelStats, Stats};
