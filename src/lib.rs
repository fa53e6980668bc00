//! # SQL Query Layer
//!
//! Database access and optimization core for a Postgres-backed service.
//!
//! - [`db`] - pooled connection manager with bound-parameter execution,
//!   transactional batches, timing statistics and health checks
//! - [`cache`] - TTL + LRU query result cache with tag invalidation
//! - [`metrics`] - execution metrics, per-query aggregates and threshold
//!   alerts
//! - [`optimizer`] - static anti-pattern analysis and best-effort rewriting
//! - [`batch`] - chunked bulk writes and parallel reads under a
//!   concurrency gate
//! - [`context`] - the [`Database`](context::Database) context wiring
//!   everything together
//!
//! # Quick Start
//!
//! ```no_run
//! use sql_query_layer::{config::Config, context::Database, db::SqlValue};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let database = Database::new(Config::load()?);
//! database.start().await?;
//!
//! let rows = database
//!     .cached_query(
//!         "SELECT id, title FROM courses WHERE org_id = $1",
//!         &[SqlValue::from(7)],
//!         None,
//!         ["org:7"]
//!     )
//!     .await?;
//! println!("{} courses", rows.len());
//!
//! // courses of org 7 changed
//! database.cache().invalidate_by_tags(&["org:7"]);
//!
//! database.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod batch;
pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod metrics;
pub mod optimizer;
pub mod output;
pub mod worker;
