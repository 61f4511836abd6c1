//! Error types for the frame-guard validation library.
//!
//! This module provides a comprehensive error handling strategy using `thiserror`
//! for automatic error trait implementations. All errors in the library are
//! represented by the `GuardError` enum.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// The main error type for the frame-guard library.
///
/// This enum represents all possible errors that can occur while defining
/// schemas and collections, validating tables, or sampling synthetic data.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Error in a schema, collection, or filter definition.
    ///
    /// Definition errors are raised eagerly, before any row of data is
    /// scanned, and are never retried.
    #[error("definition error: {message}")]
    Definition {
        /// Human-readable description of the defect
        message: String,
    },

    /// Error raised by `validate` when one or more rows fail validation.
    ///
    /// Carries per-rule failure counts only; the offending rows are
    /// retrievable separately via `filter`.
    #[error("validation of '{schema}' failed: {failures}")]
    RuleValidation {
        /// Name of the schema that was validated
        schema: String,
        /// Per-rule failure counts
        failures: RuleFailures,
    },

    /// Error raised by collection `validate` when one or more members fail.
    ///
    /// Members with zero invalid rows are omitted.
    #[error("validation of collection '{collection}' failed: {}", format_member_failures(.members))]
    MemberValidation {
        /// Name of the collection that was validated
        collection: String,
        /// Per-member failure counts, keyed by member name
        members: BTreeMap<String, RuleFailures>,
    },

    /// Error raised when the sampler cannot reach the target valid row count
    /// within the configured iteration bound.
    #[error(
        "sampling for '{schema}' did not produce enough valid rows within \
         {iterations} iterations; most rejections caused by: {}",
        format_worst_offenders(.failures)
    )]
    SamplingExhausted {
        /// Name of the schema or collection being sampled
        schema: String,
        /// Number of iterations that were attempted
        iterations: usize,
        /// Rejection counts accumulated across all iterations
        failures: RuleFailures,
    },

    /// Error raised when a uniqueness constraint demands more distinct values
    /// than the column's value domain can supply.
    #[error(
        "column '{column}' cannot supply {requested} distinct values \
         (domain exhausted after {produced})"
    )]
    DomainExhausted {
        /// Qualified name of the exhausted column
        column: String,
        /// Number of distinct values that were requested
        requested: usize,
        /// Number of distinct values the domain was able to supply
        produced: usize,
    },

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Generic internal error for unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, GuardError>`.
///
/// This is the standard `Result` type used throughout the library.
pub type Result<T> = std::result::Result<T, GuardError>;

impl GuardError {
    /// Creates a new definition error with the given message.
    pub fn definition(message: impl Into<String>) -> Self {
        Self::Definition {
            message: message.into(),
        }
    }

    /// Creates a new internal error with the given message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Per-rule failure counts carried by validation and sampling errors.
///
/// Rendering distinguishes schema-level rules (e.g. `primary_key`, custom
/// rules) from column-level constraints, whose synthesized names take the
/// form `"{column}|{constraint}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailures {
    counts: BTreeMap<String, usize>,
    total: usize,
}

impl RuleFailures {
    /// Creates a failure summary from per-rule counts and the total number of
    /// invalid rows.
    pub fn new(counts: BTreeMap<String, usize>, total: usize) -> Self {
        Self { counts, total }
    }

    /// Per-rule failure counts, keyed by rule name.
    pub fn counts(&self) -> &BTreeMap<String, usize> {
        &self.counts
    }

    /// Total number of invalid rows.
    pub fn total(&self) -> usize {
        self.total
    }
}

impl fmt::Display for RuleFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rules failed validation:", self.counts.len())?;

        // Schema-level rules first, then column constraints grouped by column.
        let mut columns: BTreeMap<&str, Vec<(&str, usize)>> = BTreeMap::new();
        for (name, count) in &self.counts {
            match name.split_once('|') {
                Some((column, rule)) => {
                    columns.entry(column).or_default().push((rule, *count));
                }
                None => {
                    write!(f, "\n - '{name}' failed validation for {count} rows")?;
                }
            }
        }
        for (column, rules) in columns {
            write!(
                f,
                "\n * column '{column}' failed validation for {} rules:",
                rules.len()
            )?;
            for (rule, count) in rules {
                write!(f, "\n   - '{rule}' failed for {count} rows")?;
            }
        }
        Ok(())
    }
}

fn format_member_failures(members: &BTreeMap<String, RuleFailures>) -> String {
    let mut out = format!("{} members failed validation", members.len());
    for (name, failures) in members {
        out.push_str(&format!("\n > member '{name}': {failures}"));
    }
    out
}

fn format_worst_offenders(failures: &RuleFailures) -> String {
    let mut ranked: Vec<(&String, &usize)> = failures.counts().iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    let rendered: Vec<String> = ranked
        .iter()
        .map(|(name, count)| format!("'{name}' ({count} rows)"))
        .collect();
    if rendered.is_empty() {
        "no rule rejections recorded".to_string()
    } else {
        rendered.join(", ")
    }
}
