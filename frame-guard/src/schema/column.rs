//! Column definitions.
//!
//! Each column in a schema is described by a typed definition (integer,
//! float, string, boolean, date) carrying the built-in constraints for that
//! type, plus shared options such as nullability, key membership, named
//! checks, and an opaque metadata bag. Definitions know how to render their
//! constraints as SQL fragments for the rule engine and how to sample values
//! for the data generator.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::DataType;
use chrono::NaiveDate;

use crate::error::{GuardError, Result};
use crate::sample::{Generator, UniqueKey, UNIQUE_ATTEMPT_LIMIT};
use crate::security;

pub(crate) const DEFAULT_INT_MIN: i64 = 0;
pub(crate) const DEFAULT_INT_MAX: i64 = 10_000;
const DEFAULT_FLOAT_MIN: f64 = 0.0;
const DEFAULT_FLOAT_MAX: f64 = 10_000.0;
const DEFAULT_TEXT_MAX_LENGTH: usize = 32;
const DEFAULT_CHARSET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const DEFAULT_NULL_PROBABILITY: f64 = 0.1;

fn default_date_min() -> NaiveDate {
    #[allow(clippy::expect_used)]
    NaiveDate::from_ymd_opt(2000, 1, 1).expect("hard-coded date should be valid")
}

fn default_date_max() -> NaiveDate {
    #[allow(clippy::expect_used)]
    NaiveDate::from_ymd_opt(2029, 12, 31).expect("hard-coded date should be valid")
}

pub(crate) fn epoch_days(date: NaiveDate) -> i64 {
    // NaiveDate's default is the Unix epoch.
    (date - NaiveDate::default()).num_days()
}

pub(crate) fn date_from_epoch_days(days: i64) -> NaiveDate {
    NaiveDate::default() + chrono::Duration::days(days)
}

/// Options shared by every column type.
#[derive(Debug, Clone)]
pub struct ColumnOptions {
    pub(crate) nullable: bool,
    pub(crate) primary_key: bool,
    pub(crate) unique: bool,
    pub(crate) checks: Vec<(String, String)>,
    pub(crate) null_probability: f64,
    pub(crate) metadata: BTreeMap<String, serde_json::Value>,
}

impl Default for ColumnOptions {
    fn default() -> Self {
        Self {
            nullable: true,
            primary_key: false,
            unique: false,
            checks: Vec::new(),
            null_probability: DEFAULT_NULL_PROBABILITY,
            metadata: BTreeMap::new(),
        }
    }
}

impl ColumnOptions {
    /// Whether values may actually be null: primary-key columns are
    /// implicitly non-nullable.
    pub fn effective_nullable(&self) -> bool {
        self.nullable && !self.primary_key
    }

    /// Whether values must be distinct, either per column or as part of the
    /// composite primary key.
    pub fn needs_distinct_values(&self) -> bool {
        self.unique || self.primary_key
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn unique(&self) -> bool {
        self.unique
    }

    pub fn checks(&self) -> &[(String, String)] {
        &self.checks
    }

    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    fn validate(&self, column: &str) -> Result<()> {
        if !(0.0..=1.0).contains(&self.null_probability) {
            return Err(GuardError::definition(format!(
                "column '{column}': null probability must be between 0.0 and 1.0"
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for (name, predicate) in &self.checks {
            security::validate_identifier(name)?;
            security::validate_predicate(predicate)?;
            if !seen.insert(name.as_str()) {
                return Err(GuardError::definition(format!(
                    "column '{column}': duplicate check name '{name}'"
                )));
            }
        }
        Ok(())
    }
}

/// A named SQL fragment implementing one built-in constraint.
#[derive(Debug, Clone)]
pub struct NamedPredicate {
    pub(crate) name: String,
    pub(crate) sql: String,
}

impl NamedPredicate {
    fn new(name: &str, sql: String) -> Self {
        Self {
            name: name.to_string(),
            sql,
        }
    }
}

/// A typed column definition inside a schema.
///
/// Implementations describe the column's Arrow data type, its built-in
/// constraints as SQL fragments, and how to draw random values satisfying
/// those constraints. Constraint fragments are written null-tolerant; a NULL
/// in a non-nullable column is attributed to the nullability rule alone.
pub trait ColumnDef: fmt::Debug + Send + Sync {
    /// The Arrow data type this column materializes as.
    fn data_type(&self) -> DataType;

    /// Shared options (nullability, keys, checks, metadata).
    fn options(&self) -> &ColumnOptions;

    /// Validates the definition itself. Called once when the schema is built.
    fn validate_definition(&self, column: &str) -> Result<()>;

    /// Named SQL fragments for the type-specific constraints. `target` is the
    /// SQL-rendered reference to the column.
    fn constraint_predicates(&self, target: &str) -> Vec<NamedPredicate>;

    /// Draws `rows` values into an Arrow array. `pool_key` identifies the
    /// column's without-replacement pool inside the generator.
    fn sample(&self, pool_key: &str, generator: &mut Generator, rows: usize) -> Result<ArrayRef>;
}

macro_rules! shared_option_methods {
    () => {
        /// Marks the column as nullable or non-nullable.
        pub fn nullable(mut self, nullable: bool) -> Self {
            self.options.nullable = nullable;
            self
        }

        /// Marks the column as part of the composite primary key. Implies
        /// non-nullable.
        pub fn primary_key(mut self) -> Self {
            self.options.primary_key = true;
            self
        }

        /// Requires all non-null values in the column to be distinct.
        pub fn unique(mut self) -> Self {
            self.options.unique = true;
            self
        }

        /// Attaches a named SQL check predicate to the column. The predicate
        /// is evaluated per row; a NULL result counts as failing.
        pub fn check(mut self, name: impl Into<String>, predicate: impl Into<String>) -> Self {
            self.options.checks.push((name.into(), predicate.into()));
            self
        }

        /// Probability of drawing NULL when sampling a nullable column.
        pub fn null_probability(mut self, probability: f64) -> Self {
            self.options.null_probability = probability;
            self
        }

        /// Attaches an opaque metadata entry. Never interpreted by the engine.
        pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
            self.options.metadata.insert(key.into(), value);
            self
        }
    };
}

// ---------------------------------------------------------------------------
// Integer
// ---------------------------------------------------------------------------

/// A 64-bit integer column with optional inclusive bounds and an optional
/// allowed-value list.
#[derive(Debug, Clone, Default)]
pub struct IntColumn {
    min: Option<i64>,
    max: Option<i64>,
    allowed: Option<Vec<i64>>,
    options: ColumnOptions,
}

impl IntColumn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inclusive lower bound.
    pub fn min(mut self, min: i64) -> Self {
        self.min = Some(min);
        self
    }

    /// Inclusive upper bound.
    pub fn max(mut self, max: i64) -> Self {
        self.max = Some(max);
        self
    }

    /// Restricts values to the given set.
    pub fn allowed(mut self, values: Vec<i64>) -> Self {
        self.allowed = Some(values);
        self
    }

    shared_option_methods!();

    // A lone declared bound may sit past the opposite default, so the
    // derived side keeps the default draw span beyond it.
    fn sampling_bounds(&self) -> (i64, i64) {
        let span = DEFAULT_INT_MAX - DEFAULT_INT_MIN;
        match (self.min, self.max) {
            (Some(min), Some(max)) => (min, max),
            (Some(min), None) if min > DEFAULT_INT_MAX => (min, min.saturating_add(span)),
            (Some(min), None) => (min, DEFAULT_INT_MAX),
            (None, Some(max)) if max < DEFAULT_INT_MIN => (max.saturating_sub(span), max),
            (None, Some(max)) => (DEFAULT_INT_MIN, max),
            (None, None) => (DEFAULT_INT_MIN, DEFAULT_INT_MAX),
        }
    }
}

impl ColumnDef for IntColumn {
    fn data_type(&self) -> DataType {
        DataType::Int64
    }

    fn options(&self) -> &ColumnOptions {
        &self.options
    }

    fn validate_definition(&self, column: &str) -> Result<()> {
        self.options.validate(column)?;
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(GuardError::definition(format!(
                    "column '{column}': min {min} exceeds max {max}"
                )));
            }
        }
        if let Some(allowed) = &self.allowed {
            if allowed.is_empty() {
                return Err(GuardError::definition(format!(
                    "column '{column}': allowed value list cannot be empty"
                )));
            }
        }
        Ok(())
    }

    fn constraint_predicates(&self, target: &str) -> Vec<NamedPredicate> {
        let mut predicates = Vec::new();
        if let Some(min) = self.min {
            predicates.push(NamedPredicate::new(
                "min",
                format!("({target} IS NULL OR {target} >= {min})"),
            ));
        }
        if let Some(max) = self.max {
            predicates.push(NamedPredicate::new(
                "max",
                format!("({target} IS NULL OR {target} <= {max})"),
            ));
        }
        if let Some(allowed) = &self.allowed {
            let list = allowed
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            predicates.push(NamedPredicate::new(
                "is_in",
                format!("({target} IS NULL OR {target} IN ({list}))"),
            ));
        }
        predicates
    }

    fn sample(&self, pool_key: &str, generator: &mut Generator, rows: usize) -> Result<ArrayRef> {
        let nullable = self.options.effective_nullable();
        let null_probability = self.options.null_probability;
        let nulls: Vec<bool> = (0..rows)
            .map(|_| nullable && generator.draw_null(null_probability))
            .collect();
        let needed = nulls.iter().filter(|null| !**null).count();

        let drawn: Vec<i64> = if let Some(allowed) = &self.allowed {
            if self.options.needs_distinct_values() {
                generator.unique_choices(pool_key, allowed, needed, |v| UniqueKey::Int(*v))?
            } else {
                (0..needed)
                    .map(|_| allowed[generator.draw_index(allowed.len())])
                    .collect()
            }
        } else {
            let (min, max) = self.sampling_bounds();
            if self.options.needs_distinct_values() {
                generator.unique_ints(pool_key, min, max, needed)?
            } else {
                (0..needed).map(|_| generator.draw_int(min, max)).collect()
            }
        };

        let mut next = drawn.into_iter();
        let values: Vec<Option<i64>> = nulls
            .into_iter()
            .map(|null| if null { None } else { next.next() })
            .collect();
        Ok(Arc::new(Int64Array::from(values)) as ArrayRef)
    }
}

// ---------------------------------------------------------------------------
// Float
// ---------------------------------------------------------------------------

/// A 64-bit floating point column with optional inclusive bounds.
#[derive(Debug, Clone, Default)]
pub struct FloatColumn {
    min: Option<f64>,
    max: Option<f64>,
    options: ColumnOptions,
}

impl FloatColumn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    shared_option_methods!();

    fn sampling_bounds(&self) -> (f64, f64) {
        let span = DEFAULT_FLOAT_MAX - DEFAULT_FLOAT_MIN;
        match (self.min, self.max) {
            (Some(min), Some(max)) => (min, max),
            (Some(min), None) if min > DEFAULT_FLOAT_MAX => (min, min + span),
            (Some(min), None) => (min, DEFAULT_FLOAT_MAX),
            (None, Some(max)) if max < DEFAULT_FLOAT_MIN => (max - span, max),
            (None, Some(max)) => (DEFAULT_FLOAT_MIN, max),
            (None, None) => (DEFAULT_FLOAT_MIN, DEFAULT_FLOAT_MAX),
        }
    }
}

impl ColumnDef for FloatColumn {
    fn data_type(&self) -> DataType {
        DataType::Float64
    }

    fn options(&self) -> &ColumnOptions {
        &self.options
    }

    fn validate_definition(&self, column: &str) -> Result<()> {
        self.options.validate(column)?;
        for bound in [self.min, self.max].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(GuardError::definition(format!(
                    "column '{column}': bounds must be finite"
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(GuardError::definition(format!(
                    "column '{column}': min {min} exceeds max {max}"
                )));
            }
        }
        Ok(())
    }

    fn constraint_predicates(&self, target: &str) -> Vec<NamedPredicate> {
        let mut predicates = Vec::new();
        if let Some(min) = self.min {
            predicates.push(NamedPredicate::new(
                "min",
                format!("({target} IS NULL OR {target} >= {min})"),
            ));
        }
        if let Some(max) = self.max {
            predicates.push(NamedPredicate::new(
                "max",
                format!("({target} IS NULL OR {target} <= {max})"),
            ));
        }
        predicates
    }

    fn sample(&self, pool_key: &str, generator: &mut Generator, rows: usize) -> Result<ArrayRef> {
        let (min, max) = self.sampling_bounds();
        let nullable = self.options.effective_nullable();
        let distinct = self.options.needs_distinct_values();

        let mut values: Vec<Option<f64>> = Vec::with_capacity(rows);
        for _ in 0..rows {
            if nullable && generator.draw_null(self.options.null_probability) {
                values.push(None);
                continue;
            }
            if distinct {
                // Collisions are vanishingly rare for floats; the attempt cap
                // guards degenerate bounds like min == max.
                let mut attempts = 0;
                loop {
                    let value = generator.draw_float(min, max);
                    if generator.pool_insert(pool_key, UniqueKey::Bits(value.to_bits())) {
                        values.push(Some(value));
                        break;
                    }
                    attempts += 1;
                    if attempts >= UNIQUE_ATTEMPT_LIMIT {
                        return Err(GuardError::DomainExhausted {
                            column: pool_key.to_string(),
                            requested: rows,
                            produced: values.len(),
                        });
                    }
                }
            } else {
                values.push(Some(generator.draw_float(min, max)));
            }
        }
        Ok(Arc::new(Float64Array::from(values)) as ArrayRef)
    }
}

// ---------------------------------------------------------------------------
// String
// ---------------------------------------------------------------------------

/// A UTF-8 string column with optional length bounds, an optional regex
/// pattern, and an optional allowed-value list.
#[derive(Debug, Clone, Default)]
pub struct StringColumn {
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<String>,
    allowed: Option<Vec<String>>,
    options: ColumnOptions,
}

impl StringColumn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum character length.
    pub fn min_length(mut self, length: usize) -> Self {
        self.min_length = Some(length);
        self
    }

    /// Maximum character length.
    pub fn max_length(mut self, length: usize) -> Self {
        self.max_length = Some(length);
        self
    }

    /// Requires values to match the given regex pattern.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Restricts values to the given set.
    pub fn allowed(mut self, values: Vec<String>) -> Self {
        self.allowed = Some(values);
        self
    }

    shared_option_methods!();

    fn length_bounds(&self) -> (usize, usize) {
        let min = self.min_length.unwrap_or(0);
        let max = self
            .max_length
            .unwrap_or_else(|| min.max(DEFAULT_TEXT_MAX_LENGTH));
        (min, max)
    }

    fn draw_text(&self, generator: &mut Generator) -> Result<String> {
        if let Some(pattern) = &self.pattern {
            generator.sample_pattern(pattern)
        } else {
            let (min, max) = self.length_bounds();
            Ok(generator.draw_text(DEFAULT_CHARSET, min, max))
        }
    }
}

impl ColumnDef for StringColumn {
    fn data_type(&self) -> DataType {
        DataType::Utf8
    }

    fn options(&self) -> &ColumnOptions {
        &self.options
    }

    fn validate_definition(&self, column: &str) -> Result<()> {
        self.options.validate(column)?;
        if let (Some(min), Some(max)) = (self.min_length, self.max_length) {
            if min > max {
                return Err(GuardError::definition(format!(
                    "column '{column}': min_length {min} exceeds max_length {max}"
                )));
            }
        }
        if let Some(pattern) = &self.pattern {
            security::validate_pattern(pattern).map_err(|e| match e {
                GuardError::Definition { message } => {
                    GuardError::definition(format!("column '{column}': {message}"))
                }
                other => other,
            })?;
        }
        if let Some(allowed) = &self.allowed {
            if allowed.is_empty() {
                return Err(GuardError::definition(format!(
                    "column '{column}': allowed value list cannot be empty"
                )));
            }
        }
        Ok(())
    }

    fn constraint_predicates(&self, target: &str) -> Vec<NamedPredicate> {
        let mut predicates = Vec::new();
        if let Some(min) = self.min_length {
            predicates.push(NamedPredicate::new(
                "min_length",
                format!("({target} IS NULL OR LENGTH({target}) >= {min})"),
            ));
        }
        if let Some(max) = self.max_length {
            predicates.push(NamedPredicate::new(
                "max_length",
                format!("({target} IS NULL OR LENGTH({target}) <= {max})"),
            ));
        }
        if let Some(pattern) = &self.pattern {
            let escaped = security::escape_literal(pattern);
            predicates.push(NamedPredicate::new(
                "pattern",
                format!("({target} IS NULL OR {target} ~ '{escaped}')"),
            ));
        }
        if let Some(allowed) = &self.allowed {
            let list = allowed
                .iter()
                .map(|v| format!("'{}'", security::escape_literal(v)))
                .collect::<Vec<_>>()
                .join(", ");
            predicates.push(NamedPredicate::new(
                "is_in",
                format!("({target} IS NULL OR {target} IN ({list}))"),
            ));
        }
        predicates
    }

    fn sample(&self, pool_key: &str, generator: &mut Generator, rows: usize) -> Result<ArrayRef> {
        let nullable = self.options.effective_nullable();
        let distinct = self.options.needs_distinct_values();

        if let Some(allowed) = &self.allowed {
            let nulls: Vec<bool> = (0..rows)
                .map(|_| nullable && generator.draw_null(self.options.null_probability))
                .collect();
            let needed = nulls.iter().filter(|null| !**null).count();
            let drawn: Vec<String> = if distinct {
                generator.unique_choices(pool_key, allowed, needed, |v| {
                    UniqueKey::Str(v.clone())
                })?
            } else {
                (0..needed)
                    .map(|_| allowed[generator.draw_index(allowed.len())].clone())
                    .collect()
            };
            let mut next = drawn.into_iter();
            let values: Vec<Option<String>> = nulls
                .into_iter()
                .map(|null| if null { None } else { next.next() })
                .collect();
            return Ok(Arc::new(StringArray::from(values)) as ArrayRef);
        }

        let mut values: Vec<Option<String>> = Vec::with_capacity(rows);
        for _ in 0..rows {
            if nullable && generator.draw_null(self.options.null_probability) {
                values.push(None);
                continue;
            }
            if distinct {
                let mut attempts = 0;
                loop {
                    let value = self.draw_text(generator)?;
                    if generator.pool_insert(pool_key, UniqueKey::Str(value.clone())) {
                        values.push(Some(value));
                        break;
                    }
                    attempts += 1;
                    if attempts >= UNIQUE_ATTEMPT_LIMIT {
                        return Err(GuardError::DomainExhausted {
                            column: pool_key.to_string(),
                            requested: rows,
                            produced: values.len(),
                        });
                    }
                }
            } else {
                values.push(Some(self.draw_text(generator)?));
            }
        }
        Ok(Arc::new(StringArray::from(values)) as ArrayRef)
    }
}

// ---------------------------------------------------------------------------
// Boolean
// ---------------------------------------------------------------------------

/// A boolean column.
#[derive(Debug, Clone, Default)]
pub struct BoolColumn {
    options: ColumnOptions,
}

impl BoolColumn {
    pub fn new() -> Self {
        Self::default()
    }

    shared_option_methods!();
}

impl ColumnDef for BoolColumn {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn options(&self) -> &ColumnOptions {
        &self.options
    }

    fn validate_definition(&self, column: &str) -> Result<()> {
        self.options.validate(column)
    }

    fn constraint_predicates(&self, _target: &str) -> Vec<NamedPredicate> {
        Vec::new()
    }

    fn sample(&self, pool_key: &str, generator: &mut Generator, rows: usize) -> Result<ArrayRef> {
        let nullable = self.options.effective_nullable();
        let nulls: Vec<bool> = (0..rows)
            .map(|_| nullable && generator.draw_null(self.options.null_probability))
            .collect();
        let needed = nulls.iter().filter(|null| !**null).count();

        let drawn: Vec<bool> = if self.options.needs_distinct_values() {
            generator
                .unique_ints(pool_key, 0, 1, needed)?
                .into_iter()
                .map(|v| v == 1)
                .collect()
        } else {
            (0..needed).map(|_| generator.draw_bool()).collect()
        };

        let mut next = drawn.into_iter();
        let values: Vec<Option<bool>> = nulls
            .into_iter()
            .map(|null| if null { None } else { next.next() })
            .collect();
        Ok(Arc::new(BooleanArray::from(values)) as ArrayRef)
    }
}

// ---------------------------------------------------------------------------
// Date
// ---------------------------------------------------------------------------

/// A calendar date column with optional inclusive bounds.
#[derive(Debug, Clone, Default)]
pub struct DateColumn {
    min: Option<NaiveDate>,
    max: Option<NaiveDate>,
    options: ColumnOptions,
}

impl DateColumn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min(mut self, min: NaiveDate) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: NaiveDate) -> Self {
        self.max = Some(max);
        self
    }

    shared_option_methods!();

    fn sampling_bounds(&self) -> (NaiveDate, NaiveDate) {
        let span = default_date_max() - default_date_min();
        match (self.min, self.max) {
            (Some(min), Some(max)) => (min, max),
            (Some(min), None) if min > default_date_max() => (min, min + span),
            (Some(min), None) => (min, default_date_max()),
            (None, Some(max)) if max < default_date_min() => (max - span, max),
            (None, Some(max)) => (default_date_min(), max),
            (None, None) => (default_date_min(), default_date_max()),
        }
    }
}

impl ColumnDef for DateColumn {
    fn data_type(&self) -> DataType {
        DataType::Date32
    }

    fn options(&self) -> &ColumnOptions {
        &self.options
    }

    fn validate_definition(&self, column: &str) -> Result<()> {
        self.options.validate(column)?;
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(GuardError::definition(format!(
                    "column '{column}': min {min} exceeds max {max}"
                )));
            }
        }
        Ok(())
    }

    fn constraint_predicates(&self, target: &str) -> Vec<NamedPredicate> {
        let mut predicates = Vec::new();
        if let Some(min) = self.min {
            predicates.push(NamedPredicate::new(
                "min",
                format!(
                    "({target} IS NULL OR {target} >= DATE '{}')",
                    min.format("%Y-%m-%d")
                ),
            ));
        }
        if let Some(max) = self.max {
            predicates.push(NamedPredicate::new(
                "max",
                format!(
                    "({target} IS NULL OR {target} <= DATE '{}')",
                    max.format("%Y-%m-%d")
                ),
            ));
        }
        predicates
    }

    fn sample(&self, pool_key: &str, generator: &mut Generator, rows: usize) -> Result<ArrayRef> {
        let (min, max) = self.sampling_bounds();
        let (min_days, max_days) = (epoch_days(min), epoch_days(max));
        let nullable = self.options.effective_nullable();
        let nulls: Vec<bool> = (0..rows)
            .map(|_| nullable && generator.draw_null(self.options.null_probability))
            .collect();
        let needed = nulls.iter().filter(|null| !**null).count();

        let drawn: Vec<i64> = if self.options.needs_distinct_values() {
            generator.unique_ints(pool_key, min_days, max_days, needed)?
        } else {
            (0..needed)
                .map(|_| generator.draw_int(min_days, max_days))
                .collect()
        };

        let mut next = drawn.into_iter();
        let values: Vec<Option<i32>> = nulls
            .into_iter()
            .map(|null| {
                if null {
                    None
                } else {
                    next.next().map(|days| days as i32)
                }
            })
            .collect();
        Ok(Arc::new(Date32Array::from(values)) as ArrayRef)
    }
}

macro_rules! shared_column_def {
    ($($column:ty),*) => {
        $(
            impl From<$column> for Arc<dyn ColumnDef> {
                fn from(column: $column) -> Self {
                    Arc::new(column)
                }
            }
        )*
    };
}

shared_column_def!(IntColumn, FloatColumn, StringColumn, BoolColumn, DateColumn);

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    #[test]
    fn test_int_predicates() {
        let column = IntColumn::new().min(0).max(10).allowed(vec![1, 2, 3]);
        let predicates = column.constraint_predicates("t.\"a\"");
        let names: Vec<&str> = predicates.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["min", "max", "is_in"]);
        assert_eq!(predicates[0].sql, "(t.\"a\" IS NULL OR t.\"a\" >= 0)");
        assert_eq!(predicates[2].sql, "(t.\"a\" IS NULL OR t.\"a\" IN (1, 2, 3))");
    }

    #[test]
    fn test_string_predicates_escape_literals() {
        let column = StringColumn::new()
            .min_length(1)
            .pattern("^[a-z]+$")
            .allowed(vec!["it's".to_string()]);
        let predicates = column.constraint_predicates("t.\"s\"");
        let is_in = predicates.iter().find(|p| p.name == "is_in").unwrap();
        assert!(is_in.sql.contains("'it''s'"));
        let pattern = predicates.iter().find(|p| p.name == "pattern").unwrap();
        assert!(pattern.sql.contains("~ '^[a-z]+$'"));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let column = IntColumn::new().min(10).max(0);
        assert!(column.validate_definition("a").is_err());

        let column = StringColumn::new().min_length(5).max_length(2);
        assert!(column.validate_definition("s").is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let column = StringColumn::new().pattern("([unclosed");
        assert!(column.validate_definition("s").is_err());
    }

    #[test]
    fn test_empty_allowed_list_rejected() {
        let column = IntColumn::new().allowed(vec![]);
        assert!(column.validate_definition("a").is_err());
    }

    #[test]
    fn test_int_sampling_respects_bounds() {
        let column = IntColumn::new().min(5).max(9).nullable(false);
        let mut generator = Generator::with_seed(42);
        let array = column.sample("t.a", &mut generator, 100).unwrap();
        let array = array.as_any().downcast_ref::<Int64Array>().unwrap();
        for i in 0..array.len() {
            assert!(!array.is_null(i));
            let value = array.value(i);
            assert!((5..=9).contains(&value), "value {value} out of bounds");
        }
    }

    #[test]
    fn test_unique_int_domain_exhaustion() {
        let column = IntColumn::new().min(0).max(3).unique().nullable(false);
        let mut generator = Generator::with_seed(42);
        let err = column.sample("t.a", &mut generator, 10).unwrap_err();
        assert!(matches!(err, GuardError::DomainExhausted { .. }));
    }

    #[test]
    fn test_unique_ints_stay_distinct_across_calls() {
        let column = IntColumn::new().min(0).max(100).unique().nullable(false);
        let mut generator = Generator::with_seed(7);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..4 {
            let array = column.sample("t.a", &mut generator, 20).unwrap();
            let array = array.as_any().downcast_ref::<Int64Array>().unwrap();
            for i in 0..array.len() {
                assert!(seen.insert(array.value(i)), "duplicate across batches");
            }
        }
    }

    #[test]
    fn test_pattern_sampling_matches() {
        let column = StringColumn::new().pattern("[a-c]{3}").nullable(false);
        let mut generator = Generator::with_seed(1);
        let array = column.sample("t.s", &mut generator, 20).unwrap();
        let array = array.as_any().downcast_ref::<StringArray>().unwrap();
        let re = regex::Regex::new("^[a-c]{3}$").unwrap();
        for i in 0..array.len() {
            assert!(re.is_match(array.value(i)));
        }
    }

    #[test]
    fn test_nullable_column_draws_nulls() {
        let column = FloatColumn::new().null_probability(0.5);
        let mut generator = Generator::with_seed(3);
        let array = column.sample("t.f", &mut generator, 200).unwrap();
        assert!(array.null_count() > 0);
    }

    #[test]
    fn test_primary_key_never_null() {
        let column = IntColumn::new().primary_key().null_probability(1.0);
        let mut generator = Generator::with_seed(3);
        let array = column.sample("t.k", &mut generator, 50).unwrap();
        assert_eq!(array.null_count(), 0);
    }

    #[test]
    fn test_date_sampling_within_bounds() {
        let min = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let max = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let column = DateColumn::new().min(min).max(max).nullable(false);
        let mut generator = Generator::with_seed(11);
        let array = column.sample("t.d", &mut generator, 50).unwrap();
        let array = array.as_any().downcast_ref::<Date32Array>().unwrap();
        let (min_days, max_days) = (epoch_days(min) as i32, epoch_days(max) as i32);
        for i in 0..array.len() {
            let days = array.value(i);
            assert!((min_days..=max_days).contains(&days));
        }
    }

    #[test]
    fn test_lone_min_above_default_range_still_samples() {
        let column = IntColumn::new().min(20_000).nullable(false);
        let mut generator = Generator::with_seed(42);
        let array = column.sample("t.a", &mut generator, 50).unwrap();
        let array = array.as_any().downcast_ref::<Int64Array>().unwrap();
        for i in 0..array.len() {
            assert!(array.value(i) >= 20_000);
        }
    }

    #[test]
    fn test_lone_max_below_default_range_still_samples() {
        let column = IntColumn::new().max(-100).nullable(false);
        let mut generator = Generator::with_seed(42);
        let array = column.sample("t.a", &mut generator, 50).unwrap();
        let array = array.as_any().downcast_ref::<Int64Array>().unwrap();
        for i in 0..array.len() {
            assert!(array.value(i) <= -100);
        }
    }

    #[test]
    fn test_lone_float_min_above_default_range_still_samples() {
        let column = FloatColumn::new().min(50_000.0).nullable(false);
        let mut generator = Generator::with_seed(42);
        let array = column.sample("t.f", &mut generator, 50).unwrap();
        let array = array.as_any().downcast_ref::<Float64Array>().unwrap();
        for i in 0..array.len() {
            assert!(array.value(i) >= 50_000.0);
        }
    }

    #[test]
    fn test_lone_date_min_past_default_range_still_samples() {
        let min = NaiveDate::from_ymd_opt(2035, 1, 1).unwrap();
        let column = DateColumn::new().min(min).nullable(false);
        let mut generator = Generator::with_seed(11);
        let array = column.sample("t.d", &mut generator, 50).unwrap();
        let array = array.as_any().downcast_ref::<Date32Array>().unwrap();
        let min_days = epoch_days(min) as i32;
        for i in 0..array.len() {
            assert!(array.value(i) >= min_days);
        }
    }

    #[test]
    fn test_duplicate_check_names_rejected() {
        let column = IntColumn::new()
            .check("positive", "a > 0")
            .check("positive", "a >= 0");
        assert!(column.validate_definition("a").is_err());
    }
}
