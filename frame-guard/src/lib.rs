//! # Frame Guard - Declarative Validation for Tabular Data
//!
//! Frame Guard validates Arrow record batches against declared schemas: typed
//! columns with constraints, composite primary keys, and user-authored SQL
//! rules, all evaluated by DataFusion in a single synthesized query per
//! dataset. Failing rows are not errors. They are split off into a report
//! that knows exactly which rules each row violated, so pipelines can
//! quarantine bad rows and keep going with the rest.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use arrow::array::{Int64Array, StringArray};
//! use arrow::record_batch::RecordBatch;
//! use frame_guard::prelude::*;
//!
//! # async fn example() -> frame_guard::error::Result<()> {
//! let users = Schema::builder("users")
//!     .column("id", IntColumn::new().primary_key())
//!     .column("email", StringColumn::new().pattern("^[^@]+@[^@]+$").nullable(false))
//!     .column("age", IntColumn::new().min(0).max(120))
//!     .rule(Rule::new("adults_have_email", "age < 18 OR email IS NOT NULL"))
//!     .build()?;
//!
//! let batch = RecordBatch::try_new(
//!     users.arrow_schema(),
//!     vec![
//!         Arc::new(Int64Array::from(vec![1, 2, 3])),
//!         Arc::new(StringArray::from(vec!["ada@crate.dev", "grace@crate.dev", "not-an-email"])),
//!         Arc::new(Int64Array::from(vec![Some(36), None, Some(41)])),
//!     ],
//! )?;
//!
//! // Keep the passing rows, quarantine the rest with full attribution.
//! let (valid, report) = users.filter(&[batch]).await?;
//! assert_eq!(valid.num_rows(), 2);
//! assert_eq!(report.num_invalid(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Features
//!
//! ### Typed Columns and Rules
//!
//! - **Integer, float, string, boolean, and date columns** with bounds,
//!   length limits, regex patterns, and allowed-value lists
//! - **Primary keys and uniqueness**, including composite keys
//! - **Custom rules** as SQL boolean predicates, optionally aggregated over
//!   row groups
//! - **Row-level attribution**: every failing row records the full set of
//!   rules it violated, with co-occurrence counts across rules
//!
//! ### Collections
//!
//! Related datasets validate together. Members are first validated against
//! their own schemas, then cross-member filters prune rows that lack a
//! required counterpart elsewhere:
//!
//! ```rust
//! use frame_guard::prelude::*;
//!
//! # fn example() -> frame_guard::error::Result<()> {
//! let users = Schema::builder("users")
//!     .column("user_id", IntColumn::new().primary_key())
//!     .build()?;
//! let orders = Schema::builder("orders")
//!     .column("user_id", IntColumn::new().primary_key())
//!     .column("order_id", IntColumn::new().primary_key())
//!     .build()?;
//!
//! let shop = Collection::builder("shop")
//!     .member("users", users)
//!     .member("orders", orders)
//!     .filter("orders_have_users", OneToAtLeastOne::new("users", "orders"))
//!     .build()?;
//! assert_eq!(shop.member_names(), vec!["users", "orders"]);
//! # Ok(())
//! # }
//! ```
//!
//! ### Constraint-Driven Sampling
//!
//! Every schema doubles as a generator. Sampling honors column constraints
//! at generation time and retries rows that fail the remaining rules, so
//! the output always validates cleanly:
//!
//! ```rust
//! use frame_guard::prelude::*;
//!
//! # async fn example() -> frame_guard::error::Result<()> {
//! let sensors = Schema::builder("sensors")
//!     .column("sensor_id", IntColumn::new().primary_key())
//!     .column("reading", FloatColumn::new().min(-40.0).max(125.0))
//!     .build()?;
//!
//! let batch = sensors.sample(SampleRequest::new().rows(1_000).seed(7)).await?;
//! assert_eq!(batch.num_rows(), 1_000);
//! # Ok(())
//! # }
//! ```
//!
//! Collections are sampled as a unit: shared primary keys are drawn once so
//! relationship filters hold by construction, and a preprocessing hook can
//! reshape the per-member requests, for instance to give each parent row
//! several children.
//!
//! ## Architecture
//!
//! - **`schema`**: column definitions, rules, and the validation surface
//! - **`report`**: failure reports splitting valid rows from invalid ones
//! - **`collection`**: multi-member validation with cross-member filters
//! - **`sample`**: constraint-driven synthetic data generation
//! - **`config`**: process-wide sampling limits
//! - **`logging`**: `tracing` subscriber setup for host applications
//! - **`security`**: identifier and predicate validation for generated SQL
//! - **`error`**: the [`GuardError`](error::GuardError) taxonomy

pub mod collection;
pub mod config;
mod engine;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod report;
pub mod sample;
pub mod schema;
pub mod security;
