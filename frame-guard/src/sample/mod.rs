//! Synthetic data generation driven by schema constraints.
//!
//! Sampling is generate-and-test: cheap constraints (types, bounds,
//! patterns, membership, uniqueness) are satisfied directly at generation
//! time, while rules the generator cannot honor by construction are handled
//! by a retry loop that validates each candidate batch and regenerates the
//! rows that failed. The loop is bounded by the process-wide iteration
//! limit; running out is a reported error, never a short result.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::compute::{concat_batches, sort_to_indices, take};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use tracing::{debug, instrument};

use crate::collection::Collection;
use crate::config;
use crate::engine;
use crate::error::{GuardError, Result, RuleFailures};
use crate::report::FailureReport;
use crate::schema::{date_from_epoch_days, epoch_days, Schema};

mod generator;

pub use generator::Generator;
pub(crate) use generator::{UniqueKey, UNIQUE_ATTEMPT_LIMIT};

/// Row index carried through the retry loop so overridden rows come back in
/// the caller's order.
const SAMPLE_INDEX_COLUMN: &str = "__fg_sample_idx";

/// Caller-pinned values for one column of a sample request.
///
/// The variant must match the column's declared type. Values appear in the
/// output in the caller's order; a single-element override broadcasts to
/// the requested row count.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideValues {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Str(Vec<Option<String>>),
    Bool(Vec<Option<bool>>),
    Date(Vec<Option<NaiveDate>>),
}

impl OverrideValues {
    /// Number of values, before broadcasting.
    pub fn len(&self) -> usize {
        match self {
            OverrideValues::Int(values) => values.len(),
            OverrideValues::Float(values) => values.len(),
            OverrideValues::Str(values) => values.len(),
            OverrideValues::Bool(values) => values.len(),
            OverrideValues::Date(values) => values.len(),
        }
    }

    /// Whether the override holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn has_null(&self) -> bool {
        match self {
            OverrideValues::Int(values) => values.iter().any(Option::is_none),
            OverrideValues::Float(values) => values.iter().any(Option::is_none),
            OverrideValues::Str(values) => values.iter().any(Option::is_none),
            OverrideValues::Bool(values) => values.iter().any(Option::is_none),
            OverrideValues::Date(values) => values.iter().any(Option::is_none),
        }
    }

    fn data_type(&self) -> DataType {
        match self {
            OverrideValues::Int(_) => DataType::Int64,
            OverrideValues::Float(_) => DataType::Float64,
            OverrideValues::Str(_) => DataType::Utf8,
            OverrideValues::Bool(_) => DataType::Boolean,
            OverrideValues::Date(_) => DataType::Date32,
        }
    }

    fn broadcast(&self, rows: usize) -> OverrideValues {
        match self {
            OverrideValues::Int(values) => OverrideValues::Int(repeat_first(values, rows)),
            OverrideValues::Float(values) => OverrideValues::Float(repeat_first(values, rows)),
            OverrideValues::Str(values) => OverrideValues::Str(repeat_first(values, rows)),
            OverrideValues::Bool(values) => OverrideValues::Bool(repeat_first(values, rows)),
            OverrideValues::Date(values) => OverrideValues::Date(repeat_first(values, rows)),
        }
    }

    /// Builds the arrow array holding the values at `rows`.
    fn array_for(&self, rows: &[usize]) -> ArrayRef {
        match self {
            OverrideValues::Int(values) => Arc::new(Int64Array::from(pick(values, rows))),
            OverrideValues::Float(values) => Arc::new(Float64Array::from(pick(values, rows))),
            OverrideValues::Str(values) => Arc::new(StringArray::from(pick(values, rows))),
            OverrideValues::Bool(values) => Arc::new(BooleanArray::from(pick(values, rows))),
            OverrideValues::Date(values) => {
                let days: Vec<Option<i32>> = rows
                    .iter()
                    .map(|row| {
                        values
                            .get(*row)
                            .copied()
                            .flatten()
                            .map(|date| epoch_days(date) as i32)
                    })
                    .collect();
                Arc::new(Date32Array::from(days))
            }
        }
    }
}

fn repeat_first<T: Clone>(values: &[T], rows: usize) -> Vec<T> {
    values
        .first()
        .map(|value| vec![value.clone(); rows])
        .unwrap_or_default()
}

fn pick<T: Clone>(values: &[T], rows: &[usize]) -> Vec<T> {
    rows.iter().filter_map(|row| values.get(*row).cloned()).collect()
}

/// Parameters for sampling a single schema.
///
/// The row count may come from [`rows`](SampleRequest::rows) or be inferred
/// from the longest override. Equal seeds produce equal output for the same
/// schema and request.
#[derive(Debug, Clone, Default)]
pub struct SampleRequest {
    rows: Option<usize>,
    seed: Option<u64>,
    overrides: BTreeMap<String, OverrideValues>,
}

impl SampleRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of rows to produce.
    pub fn rows(mut self, rows: usize) -> Self {
        self.rows = Some(rows);
        self
    }

    /// Seeds the generator for reproducible output.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Pins the values of `column` instead of generating them.
    pub fn override_column(mut self, column: impl Into<String>, values: OverrideValues) -> Self {
        self.overrides.insert(column.into(), values);
        self
    }

    /// The pinned columns of this request.
    pub fn overrides(&self) -> &BTreeMap<String, OverrideValues> {
        &self.overrides
    }
}

/// Hook run before each collection sampling attempt.
///
/// Receives the per-member sample requests, pre-filled with the shared key
/// columns for every filtered member, and may reshape them, e.g. to repeat
/// keys so that a member carries several rows per key.
pub type PreprocessFn =
    Arc<dyn Fn(&mut BTreeMap<String, SampleRequest>, &mut Generator) + Send + Sync>;

/// Parameters for sampling a whole collection.
#[derive(Clone, Default)]
pub struct CollectionSampleRequest {
    rows: Option<usize>,
    seed: Option<u64>,
    preprocess: Option<PreprocessFn>,
}

impl CollectionSampleRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of rows to produce per member.
    pub fn rows(mut self, rows: usize) -> Self {
        self.rows = Some(rows);
        self
    }

    /// Seeds the generator for reproducible output.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Installs the preprocessing hook.
    pub fn preprocess(
        mut self,
        hook: impl Fn(&mut BTreeMap<String, SampleRequest>, &mut Generator) + Send + Sync + 'static,
    ) -> Self {
        self.preprocess = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for CollectionSampleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionSampleRequest")
            .field("rows", &self.rows)
            .field("seed", &self.seed)
            .field("preprocess", &self.preprocess.is_some())
            .finish()
    }
}

/// Generates a batch for `schema` that validates cleanly.
#[instrument(skip(schema, request), fields(schema = %schema.name()))]
pub(crate) async fn sample_schema(schema: &Schema, request: SampleRequest) -> Result<RecordBatch> {
    let max_iterations = config::max_sampling_iterations();
    let mut generator = match request.seed {
        Some(seed) => Generator::with_seed(seed),
        None => Generator::new(),
    };
    sample_schema_with(schema, &request, &mut generator, max_iterations).await
}

/// The bounded generate-and-test loop behind schema and collection
/// sampling. Rows keep their identity across iterations: a row that fails
/// keeps its pinned override values and only its generated columns are
/// drawn again.
async fn sample_schema_with(
    schema: &Schema,
    request: &SampleRequest,
    generator: &mut Generator,
    max_iterations: usize,
) -> Result<RecordBatch> {
    let resolved = resolve_request(schema, request)?;
    if resolved.target == 0 {
        return Ok(schema.create_empty());
    }

    let declared = schema.arrow_schema();
    let column_count = declared.fields().len();
    let mut fields: Vec<Arc<Field>> = declared.fields().iter().cloned().collect();
    fields.push(Arc::new(Field::new(
        SAMPLE_INDEX_COLUMN,
        DataType::Int64,
        false,
    )));
    let candidate_schema: SchemaRef = Arc::new(ArrowSchema::new(fields));

    let mut pending: Vec<usize> = (0..resolved.target).collect();
    let mut finalized: Vec<RecordBatch> = Vec::new();
    let mut rejection_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut rejected_total = 0_usize;
    let mut iterations = 0_usize;

    while !pending.is_empty() {
        if iterations == max_iterations {
            return Err(GuardError::SamplingExhausted {
                schema: schema.name().to_string(),
                iterations,
                failures: RuleFailures::new(rejection_counts, rejected_total),
            });
        }
        iterations += 1;

        let candidate = draw_candidate(schema, &resolved, &pending, generator, &candidate_schema)?;
        let evaluation = engine::evaluate(schema, std::slice::from_ref(&candidate)).await?;

        if !evaluation.report.is_empty() {
            for (rule, count) in evaluation.report.counts() {
                *rejection_counts.entry(rule.clone()).or_insert(0) += count;
            }
            rejected_total += evaluation.report.num_invalid();
        }

        if evaluation.valid.num_rows() > 0 {
            let resolved_rows: HashSet<i64> =
                index_values(&evaluation.valid, column_count)?.into_iter().collect();
            pending.retain(|row| !resolved_rows.contains(&(*row as i64)));
            finalized.push(evaluation.valid);
        }
    }

    debug!(rows = resolved.target, iterations, "sampling complete");
    assemble(schema, finalized, column_count)
}

/// Generates every member of `collection` so that the whole collection
/// validates cleanly, retrying complete collections until the filters hold.
#[instrument(skip(collection, request), fields(collection = %collection.name()))]
pub(crate) async fn sample_collection(
    collection: &Collection,
    request: CollectionSampleRequest,
) -> Result<BTreeMap<String, RecordBatch>> {
    let max_iterations = config::max_sampling_iterations();
    let Some(rows) = request.rows else {
        return Err(GuardError::definition(
            "collection sample request must specify a row count",
        ));
    };
    let mut generator = match request.seed {
        Some(seed) => Generator::with_seed(seed),
        None => Generator::new(),
    };

    let mut rejection_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut rejected_total = 0_usize;
    let mut iterations = 0_usize;

    loop {
        if iterations == max_iterations {
            return Err(GuardError::SamplingExhausted {
                schema: collection.name().to_string(),
                iterations,
                failures: RuleFailures::new(rejection_counts, rejected_total),
            });
        }
        iterations += 1;
        generator.reset_pools();

        let mut requests = member_requests(collection, rows, &mut generator)?;
        if let Some(preprocess) = &request.preprocess {
            preprocess(&mut requests, &mut generator);
        }

        let mut candidates: BTreeMap<String, Vec<RecordBatch>> = BTreeMap::new();
        for (name, schema) in collection.members() {
            let member_request = requests.remove(name).unwrap_or_default();
            let batch =
                sample_schema_with(schema, &member_request, &mut generator, max_iterations).await?;
            candidates.insert(name.to_string(), vec![batch]);
        }

        let (valid, reports) = collection.filter(candidates).await?;
        if reports.values().all(FailureReport::is_empty) {
            debug!(rows, iterations, "collection sampling complete");
            return Ok(valid);
        }
        for report in reports.values() {
            for (rule, count) in report.counts() {
                *rejection_counts.entry(rule.clone()).or_insert(0) += count;
            }
            rejected_total += report.num_invalid();
        }
    }
}

struct ResolvedRequest {
    target: usize,
    overrides: BTreeMap<String, OverrideValues>,
}

/// Checks the overrides against the schema and resolves the target row
/// count, broadcasting single-element overrides.
fn resolve_request(schema: &Schema, request: &SampleRequest) -> Result<ResolvedRequest> {
    for (name, values) in &request.overrides {
        let Some(column) = schema.column(name) else {
            return Err(GuardError::definition(format!(
                "override references unknown column '{name}'"
            )));
        };
        if values.data_type() != column.data_type() {
            return Err(GuardError::definition(format!(
                "override for column '{name}' holds {} values but the column is {}",
                values.data_type(),
                column.data_type()
            )));
        }
        if values.has_null() && !column.options().effective_nullable() {
            return Err(GuardError::definition(format!(
                "override for column '{name}' contains null values but the column is not nullable"
            )));
        }
    }

    let longest = request.overrides.values().map(OverrideValues::len).max();
    let target = match (request.rows, longest) {
        (Some(rows), _) => rows,
        (None, Some(longest)) => longest,
        (None, None) => {
            return Err(GuardError::definition(
                "sample request must specify a row count or override values",
            ))
        }
    };
    let mut overrides = BTreeMap::new();
    for (name, values) in &request.overrides {
        let len = values.len();
        if len == target {
            overrides.insert(name.clone(), values.clone());
        } else if len == 1 {
            overrides.insert(name.clone(), values.broadcast(target));
        } else {
            return Err(GuardError::definition(format!(
                "override for column '{name}' holds {len} values but {target} rows were requested"
            )));
        }
    }
    Ok(ResolvedRequest { target, overrides })
}

/// Draws one candidate batch for the rows still pending, pinned columns
/// from their overrides and the rest from the generator, with the row
/// identity appended as a final index column.
fn draw_candidate(
    schema: &Schema,
    resolved: &ResolvedRequest,
    pending: &[usize],
    generator: &mut Generator,
    candidate_schema: &SchemaRef,
) -> Result<RecordBatch> {
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(candidate_schema.fields().len());
    for (name, column) in schema.columns() {
        let array = match resolved.overrides.get(name) {
            Some(values) => values.array_for(pending),
            None => {
                let pool = format!("{}.{name}", schema.name());
                column.sample(&pool, generator, pending.len())?
            }
        };
        arrays.push(array);
    }
    arrays.push(Arc::new(Int64Array::from_iter_values(
        pending.iter().map(|row| *row as i64),
    )));
    Ok(RecordBatch::try_new(candidate_schema.clone(), arrays)?)
}

fn index_values(batch: &RecordBatch, index_column: usize) -> Result<Vec<i64>> {
    let column = batch.column(index_column);
    match column.as_any().downcast_ref::<Int64Array>() {
        Some(array) => Ok(array.iter().flatten().collect()),
        None => Err(GuardError::internal(
            "sample index column lost its integer type",
        )),
    }
}

/// Concatenates the finalized rows, restores the caller's row order, and
/// strips the bookkeeping index column.
fn assemble(
    schema: &Schema,
    finalized: Vec<RecordBatch>,
    column_count: usize,
) -> Result<RecordBatch> {
    let combined = match finalized.first() {
        Some(first) => concat_batches(&first.schema(), &finalized)?,
        None => return Ok(schema.create_empty()),
    };
    let order = sort_to_indices(combined.column(column_count), None, None)?;
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(column_count);
    for index in 0..column_count {
        columns.push(take(combined.column(index), &order, None)?);
    }
    Ok(RecordBatch::try_new(schema.arrow_schema(), columns)?)
}

/// One sample request per member, with the shared key columns pre-drawn and
/// pinned for every filtered member.
fn member_requests(
    collection: &Collection,
    rows: usize,
    generator: &mut Generator,
) -> Result<BTreeMap<String, SampleRequest>> {
    let mut requests: BTreeMap<String, SampleRequest> = collection
        .members()
        .map(|(name, _)| (name.to_string(), SampleRequest::new().rows(rows)))
        .collect();

    let shared = shared_keys(collection, rows, generator)?;
    if shared.is_empty() {
        return Ok(requests);
    }
    for name in collection.filtered_member_names() {
        if let Some(request) = requests.get_mut(name) {
            for (column, values) in &shared {
                request.overrides.insert(column.clone(), values.clone());
            }
        }
    }
    Ok(requests)
}

/// Draws the common primary key columns once, so the members agree on the
/// key set and the relationship filters hold by construction.
fn shared_keys(
    collection: &Collection,
    rows: usize,
    generator: &mut Generator,
) -> Result<BTreeMap<String, OverrideValues>> {
    let mut shared = BTreeMap::new();
    let filtered = collection.filtered_member_names();
    let Some(first) = filtered
        .first()
        .and_then(|name| collection.member_schema(name))
    else {
        return Ok(shared);
    };
    for key in collection.common_primary_key() {
        let Some(column) = first.column(key) else {
            continue;
        };
        let pool = format!("{}.{key}", collection.name());
        let array = column.sample(&pool, generator, rows)?;
        shared.insert(key.clone(), key_override(&array, &column.data_type())?);
    }
    Ok(shared)
}

fn key_override(array: &ArrayRef, data_type: &DataType) -> Result<OverrideValues> {
    let values = match data_type {
        DataType::Int64 => array
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|a| OverrideValues::Int(a.iter().collect())),
        DataType::Float64 => array
            .as_any()
            .downcast_ref::<Float64Array>()
            .map(|a| OverrideValues::Float(a.iter().collect())),
        DataType::Utf8 => array
            .as_any()
            .downcast_ref::<StringArray>()
            .map(|a| OverrideValues::Str(a.iter().map(|v| v.map(str::to_string)).collect())),
        DataType::Boolean => array
            .as_any()
            .downcast_ref::<BooleanArray>()
            .map(|a| OverrideValues::Bool(a.iter().collect())),
        DataType::Date32 => array.as_any().downcast_ref::<Date32Array>().map(|a| {
            OverrideValues::Date(
                a.iter()
                    .map(|v| v.map(|days| date_from_epoch_days(i64::from(days))))
                    .collect(),
            )
        }),
        _ => None,
    };
    values.ok_or_else(|| GuardError::internal("shared key column has an unsupported type"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::collection::OneToAtLeastOne;
    use crate::schema::{BoolColumn, FloatColumn, IntColumn, Rule};

    fn int_values(batch: &RecordBatch, column: usize) -> Vec<i64> {
        batch
            .column(column)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .iter()
            .flatten()
            .collect()
    }

    #[tokio::test]
    async fn test_sample_respects_target_and_bounds() {
        let schema = Schema::builder("events")
            .column("a", IntColumn::new().min(10).max(20))
            .build()
            .unwrap();
        let batch = schema
            .sample(SampleRequest::new().rows(25).seed(1))
            .await
            .unwrap();
        assert_eq!(batch.num_rows(), 25);
        assert!(int_values(&batch, 0)
            .into_iter()
            .all(|value| (10..=20).contains(&value)));
    }

    #[tokio::test]
    async fn test_equal_seeds_reproduce_output() {
        let schema = Schema::builder("metrics")
            .column("value", FloatColumn::new().min(0.0).max(1.0))
            .build()
            .unwrap();
        let first = schema
            .sample(SampleRequest::new().rows(10).seed(42))
            .await
            .unwrap();
        let second = schema
            .sample(SampleRequest::new().rows(10).seed(42))
            .await
            .unwrap();
        assert_eq!(first, second);
        let third = schema
            .sample(SampleRequest::new().rows(10).seed(43))
            .await
            .unwrap();
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn test_overrides_come_back_in_caller_order() {
        let schema = Schema::builder("pairs")
            .column("a", IntColumn::new().min(0).max(100))
            .column("b", IntColumn::new().min(0).max(100))
            .rule(Rule::new("ordered", "b >= a"))
            .build()
            .unwrap();
        let request = SampleRequest::new()
            .seed(5)
            .override_column("a", OverrideValues::Int(vec![Some(30), Some(10), Some(20)]));
        let batch = schema.sample(request).await.unwrap();

        assert_eq!(batch.num_rows(), 3);
        assert_eq!(int_values(&batch, 0), vec![30, 10, 20]);
        let a = int_values(&batch, 0);
        let b = int_values(&batch, 1);
        assert!(a.iter().zip(&b).all(|(a, b)| b >= a));
    }

    #[tokio::test]
    async fn test_single_value_override_broadcasts() {
        let schema = Schema::builder("t")
            .column("a", IntColumn::new().min(0).max(100))
            .build()
            .unwrap();
        let request = SampleRequest::new()
            .rows(4)
            .seed(2)
            .override_column("a", OverrideValues::Int(vec![Some(7)]));
        let batch = schema.sample(request).await.unwrap();
        assert_eq!(int_values(&batch, 0), vec![7, 7, 7, 7]);
    }

    #[tokio::test]
    async fn test_override_length_mismatch_is_a_definition_error() {
        let schema = Schema::builder("t")
            .column("a", IntColumn::new())
            .build()
            .unwrap();
        let request = SampleRequest::new()
            .rows(3)
            .override_column("a", OverrideValues::Int(vec![Some(1), Some(2)]));
        let err = schema.sample(request).await.unwrap_err();
        assert!(matches!(err, GuardError::Definition { .. }));
        assert!(err.to_string().contains("2 values but 3 rows"));
    }

    #[tokio::test]
    async fn test_override_for_unknown_column_is_a_definition_error() {
        let schema = Schema::builder("t")
            .column("a", IntColumn::new())
            .build()
            .unwrap();
        let request =
            SampleRequest::new().override_column("b", OverrideValues::Int(vec![Some(1)]));
        let err = schema.sample(request).await.unwrap_err();
        assert!(err.to_string().contains("unknown column 'b'"));
    }

    #[tokio::test]
    async fn test_null_override_for_non_nullable_column_is_rejected() {
        let schema = Schema::builder("t")
            .column("id", IntColumn::new().primary_key())
            .build()
            .unwrap();
        let request =
            SampleRequest::new().override_column("id", OverrideValues::Int(vec![Some(1), None]));
        let err = schema.sample(request).await.unwrap_err();
        assert!(err.to_string().contains("not nullable"));
    }

    #[tokio::test]
    async fn test_request_without_rows_or_overrides_is_rejected() {
        let schema = Schema::builder("t")
            .column("a", IntColumn::new())
            .build()
            .unwrap();
        let err = schema.sample(SampleRequest::new()).await.unwrap_err();
        assert!(matches!(err, GuardError::Definition { .. }));
    }

    #[tokio::test]
    async fn test_zero_rows_returns_a_typed_empty_batch() {
        let schema = Schema::builder("t")
            .column("a", IntColumn::new())
            .build()
            .unwrap();
        let batch = schema.sample(SampleRequest::new().rows(0)).await.unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.schema(), schema.arrow_schema());
    }

    #[tokio::test]
    async fn test_retries_keep_unique_values_distinct_across_iterations() {
        let schema = Schema::builder("t")
            .column("id", IntColumn::new().min(0).max(1000).unique().nullable(false))
            .column("flip", BoolColumn::new())
            .rule(Rule::new("heads", "flip = true"))
            .build()
            .unwrap();
        let mut generator = Generator::with_seed(9);
        let request = SampleRequest::new().rows(20);
        let batch = sample_schema_with(&schema, &request, &mut generator, 10_000)
            .await
            .unwrap();

        assert_eq!(batch.num_rows(), 20);
        let ids: HashSet<i64> = int_values(&batch, 0).into_iter().collect();
        assert_eq!(ids.len(), 20);
        let flips = batch
            .column(1)
            .as_any()
            .downcast_ref::<BooleanArray>()
            .unwrap();
        assert!((0..20).all(|row| flips.value(row)));
    }

    #[tokio::test]
    async fn test_exhaustion_reports_the_rejecting_rule() {
        let schema = Schema::builder("t")
            .column("a", IntColumn::new())
            .rule(Rule::new("never", "1 = 2"))
            .build()
            .unwrap();
        let mut generator = Generator::with_seed(1);
        let request = SampleRequest::new().rows(2);
        let err = sample_schema_with(&schema, &request, &mut generator, 3)
            .await
            .unwrap_err();
        match err {
            GuardError::SamplingExhausted {
                schema,
                iterations,
                failures,
            } => {
                assert_eq!(schema, "t");
                assert_eq!(iterations, 3);
                assert_eq!(failures.counts().get("never"), Some(&6));
                assert_eq!(failures.total(), 6);
            }
            other => panic!("expected SamplingExhausted, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_collection_sampling_aligns_member_keys() {
        let users = Schema::builder("users")
            .column("key", IntColumn::new().primary_key())
            .build()
            .unwrap();
        let orders = Schema::builder("orders")
            .column("key", IntColumn::new().primary_key())
            .column("line", IntColumn::new().primary_key())
            .build()
            .unwrap();
        let collection = Collection::builder("shop")
            .member("users", users)
            .member("orders", orders)
            .filter("linked", OneToAtLeastOne::new("users", "orders"))
            .build()
            .unwrap();

        let members = collection
            .sample(CollectionSampleRequest::new().rows(5).seed(11))
            .await
            .unwrap();

        assert_eq!(members["users"].num_rows(), 5);
        assert_eq!(members["orders"].num_rows(), 5);
        let user_keys: HashSet<i64> = int_values(&members["users"], 0).into_iter().collect();
        let order_keys: HashSet<i64> = int_values(&members["orders"], 0).into_iter().collect();
        assert_eq!(user_keys.len(), 5);
        assert_eq!(user_keys, order_keys);
    }

    #[tokio::test]
    async fn test_collection_preprocess_hook_reshapes_members() {
        let users = Schema::builder("users")
            .column("key", IntColumn::new().primary_key())
            .build()
            .unwrap();
        let orders = Schema::builder("orders")
            .column("key", IntColumn::new().primary_key())
            .column("line", IntColumn::new().primary_key())
            .build()
            .unwrap();
        let collection = Collection::builder("shop")
            .member("users", users)
            .member("orders", orders)
            .filter("linked", OneToAtLeastOne::new("users", "orders"))
            .build()
            .unwrap();

        let request = CollectionSampleRequest::new()
            .rows(3)
            .seed(21)
            .preprocess(|requests, _generator| {
                let Some(OverrideValues::Int(keys)) =
                    requests["users"].overrides().get("key").cloned()
                else {
                    return;
                };
                let repeated: Vec<Option<i64>> =
                    keys.iter().flat_map(|key| [*key, *key]).collect();
                let rows = repeated.len();
                requests.insert(
                    "orders".to_string(),
                    SampleRequest::new()
                        .rows(rows)
                        .override_column("key", OverrideValues::Int(repeated)),
                );
            });
        let members = collection.sample(request).await.unwrap();

        assert_eq!(members["users"].num_rows(), 3);
        assert_eq!(members["orders"].num_rows(), 6);
        let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
        for key in int_values(&members["orders"], 0) {
            *counts.entry(key).or_insert(0) += 1;
        }
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|count| *count == 2));
    }
}
