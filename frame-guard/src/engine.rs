//! Rule evaluation engine.
//!
//! Compiles every constraint and rule of a schema into a single SQL
//! projection of boolean columns, executes it on DataFusion over an in-memory
//! registration of the input batches, and partitions the rows by the combined
//! outcome. Each rule stays a separate column until the very end so failures
//! remain attributable to individual rule names.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, Int64Array};
use arrow::compute::{concat_batches, filter_record_batch};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::prelude::*;
use tracing::{debug, info, instrument};

use crate::error::{GuardError, Result};
use crate::report::FailureReport;
use crate::schema::Schema;

/// Index column appended to the input so output order survives joins.
pub(crate) const ROW_INDEX_COLUMN: &str = "__fg_rowid";

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn scratch_table_name() -> String {
    format!("__fg_{}", SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Quotes a column reference from the input schema. Unlike schema-declared
/// identifiers, passthrough column names are not pre-validated, so embedded
/// quotes are escaped.
pub(crate) fn quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Outcome of evaluating a schema against input batches. Both partitions
/// carry the input columns (including passthrough columns absent from the
/// schema) in input row order.
#[derive(Debug)]
pub(crate) struct Evaluation {
    pub(crate) valid: RecordBatch,
    pub(crate) report: FailureReport,
}

/// Evaluates all rules of `schema` against `batches` and partitions the rows.
#[instrument(skip(schema, batches), fields(schema = %schema.name()))]
pub(crate) async fn evaluate(schema: &Schema, batches: &[RecordBatch]) -> Result<Evaluation> {
    let source_schema: SchemaRef = match batches.first() {
        Some(batch) => batch.schema(),
        None => schema.arrow_schema(),
    };
    check_input_schema(schema, &source_schema)?;

    let total_rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
    if total_rows == 0 {
        let empty = RecordBatch::new_empty(source_schema);
        return Ok(Evaluation {
            valid: empty.clone(),
            report: FailureReport::empty(empty),
        });
    }

    let scratch = scratch_table_name();
    let (sql, rule_names) = synthesize_sql(schema, &source_schema, &scratch);
    debug!(sql = %sql, rules = rule_names.len(), "synthesized validation query");

    let ctx = SessionContext::new();
    register_with_row_index(&ctx, &scratch, &source_schema, batches)?;

    let df = ctx.sql(&sql).await?;
    let result = df.collect().await?;
    let combined = match result.first() {
        Some(first) => concat_batches(&first.schema(), &result)?,
        None => {
            return Err(GuardError::internal(
                "validation query returned no batches for a non-empty input",
            ))
        }
    };

    let evaluation = partition(&combined, &source_schema, &rule_names)?;
    info!(
        rows = total_rows,
        invalid = evaluation.report.num_invalid(),
        "validation complete"
    );
    Ok(evaluation)
}

/// Verifies that every schema column is present in the input with the
/// declared Arrow type. Surfaced before any row is scanned.
fn check_input_schema(schema: &Schema, source_schema: &ArrowSchema) -> Result<()> {
    let mut problems = Vec::new();
    for (name, column) in schema.columns() {
        match source_schema.fields().iter().find(|f| f.name() == name) {
            None => problems.push(format!("missing column '{name}'")),
            Some(field) if field.data_type() != &column.data_type() => {
                problems.push(format!(
                    "column '{name}' expected {} but found {}",
                    column.data_type(),
                    field.data_type()
                ));
            }
            Some(_) => {}
        }
    }
    if source_schema
        .fields()
        .iter()
        .any(|f| f.name() == ROW_INDEX_COLUMN)
    {
        problems.push(format!("input column '{ROW_INDEX_COLUMN}' is reserved"));
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(GuardError::definition(format!(
            "input does not match schema '{}': {}",
            schema.name(),
            problems.join("; ")
        )))
    }
}

/// Registers the input under `scratch` with an appended row index column,
/// numbered continuously across batches.
pub(crate) fn register_with_row_index(
    ctx: &SessionContext,
    scratch: &str,
    source_schema: &SchemaRef,
    batches: &[RecordBatch],
) -> Result<()> {
    let mut fields: Vec<Arc<Field>> = source_schema.fields().iter().cloned().collect();
    fields.push(Arc::new(Field::new(ROW_INDEX_COLUMN, DataType::Int64, false)));
    let augmented_schema = Arc::new(ArrowSchema::new(fields));

    let mut augmented = Vec::with_capacity(batches.len());
    let mut offset = 0_i64;
    for batch in batches {
        let rows = batch.num_rows() as i64;
        let row_index: ArrayRef = Arc::new(Int64Array::from_iter_values(offset..offset + rows));
        offset += rows;
        let mut columns = batch.columns().to_vec();
        columns.push(row_index);
        augmented.push(RecordBatch::try_new(augmented_schema.clone(), columns)?);
    }

    let provider = MemTable::try_new(augmented_schema, vec![augmented])?;
    ctx.register_table(scratch, Arc::new(provider))?;
    Ok(())
}

/// Builds the validation query: one boolean output column per rule, the
/// input columns and row index passed through, ordered by the row index.
/// Returns the query together with the rule names in output column order.
fn synthesize_sql(
    schema: &Schema,
    source_schema: &ArrowSchema,
    scratch: &str,
) -> (String, Vec<String>) {
    let mut rule_names: Vec<String> = Vec::new();
    let mut rule_exprs: Vec<String> = Vec::new();
    let mut joins: Vec<String> = Vec::new();
    let table = quoted(scratch);

    for (name, column) in schema.columns() {
        let target = format!("t.{}", quoted(name));
        let options = column.options();
        if !options.effective_nullable() {
            rule_names.push(format!("{name}|nullability"));
            rule_exprs.push(format!("{target} IS NOT NULL"));
        }
        for predicate in column.constraint_predicates(&target) {
            rule_names.push(format!("{name}|{}", predicate.name));
            rule_exprs.push(predicate.sql);
        }
        if options.unique() && !options.primary_key() {
            rule_names.push(format!("{name}|unique"));
            rule_exprs.push(format!(
                "({target} IS NULL OR COUNT(*) OVER (PARTITION BY {target}) = 1)"
            ));
        }
        for (check_name, predicate) in options.checks() {
            rule_names.push(format!("{name}|check_{check_name}"));
            rule_exprs.push(format!("COALESCE(({predicate}), FALSE)"));
        }
    }

    let primary_key = schema.primary_key();
    if !primary_key.is_empty() {
        let partition: Vec<String> = primary_key
            .iter()
            .map(|key| format!("t.{}", quoted(key)))
            .collect();
        rule_names.push("primary_key".to_string());
        rule_exprs.push(format!(
            "COUNT(*) OVER (PARTITION BY {}) = 1",
            partition.join(", ")
        ));
    }

    let mut group_index = 0_usize;
    for rule in schema.rules() {
        match rule.group_by() {
            None => {
                rule_names.push(rule.name().to_string());
                rule_exprs.push(format!("COALESCE(({}), FALSE)", rule.predicate()));
            }
            Some(keys) => {
                let alias = format!("g{group_index}");
                let mut key_selects = Vec::with_capacity(keys.len());
                let mut on_clauses = Vec::with_capacity(keys.len());
                let mut group_by = Vec::with_capacity(keys.len());
                for (key_index, key) in keys.iter().enumerate() {
                    let key_alias = format!("\"__fg_g{group_index}_k{key_index}\"");
                    key_selects.push(format!("{} AS {key_alias}", quoted(key)));
                    on_clauses.push(format!(
                        "t.{} IS NOT DISTINCT FROM {alias}.{key_alias}",
                        quoted(key)
                    ));
                    group_by.push(quoted(key));
                }
                joins.push(format!(
                    "LEFT JOIN (SELECT {}, COALESCE(({}), FALSE) AS \"__fg_ok\" \
                     FROM {table} GROUP BY {}) {alias} ON {}",
                    key_selects.join(", "),
                    rule.predicate(),
                    group_by.join(", "),
                    on_clauses.join(" AND ")
                ));
                rule_names.push(rule.name().to_string());
                rule_exprs.push(format!("COALESCE({alias}.\"__fg_ok\", FALSE)"));
                group_index += 1;
            }
        }
    }

    let mut select: Vec<String> = source_schema
        .fields()
        .iter()
        .map(|field| format!("t.{}", quoted(field.name())))
        .collect();
    select.push(format!("t.{}", quoted(ROW_INDEX_COLUMN)));
    for (index, expr) in rule_exprs.iter().enumerate() {
        select.push(format!("{expr} AS \"__fg_r{index}\""));
    }

    let mut sql = format!("SELECT {} FROM {table} t", select.join(", "));
    for join in &joins {
        sql.push(' ');
        sql.push_str(join);
    }
    sql.push_str(&format!(" ORDER BY t.{}", quoted(ROW_INDEX_COLUMN)));
    (sql, rule_names)
}

/// Splits the query result into passing and failing input rows and derives
/// the failure report from the per-rule columns.
fn partition(
    combined: &RecordBatch,
    source_schema: &ArrowSchema,
    rule_names: &[String],
) -> Result<Evaluation> {
    let input_columns = source_schema.fields().len();
    let total = combined.num_rows();

    let mut masks: Vec<&BooleanArray> = Vec::with_capacity(rule_names.len());
    for (index, name) in rule_names.iter().enumerate() {
        let column = combined.column(input_columns + 1 + index);
        let mask = column
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| {
                GuardError::internal(format!("rule '{name}' did not produce a boolean column"))
            })?;
        masks.push(mask);
    }

    let mut pass = Vec::with_capacity(total);
    for row in 0..total {
        pass.push(masks.iter().all(|m| m.is_valid(row) && m.value(row)));
    }
    let fail_mask = BooleanArray::from(pass.iter().map(|p| !p).collect::<Vec<bool>>());
    let pass_mask = BooleanArray::from(pass);

    let input_indices: Vec<usize> = (0..input_columns).collect();
    let projected = combined.project(&input_indices)?;
    let valid = filter_record_batch(&projected, &pass_mask)?;
    let invalid = filter_record_batch(&projected, &fail_mask)?;

    let rule_indices: Vec<usize> = (0..rule_names.len())
        .map(|index| input_columns + 1 + index)
        .collect();
    let failed_rules = filter_record_batch(&combined.project(&rule_indices)?, &fail_mask)?;
    let results: Vec<BooleanArray> = failed_rules
        .columns()
        .iter()
        .map(|column| {
            column
                .as_any()
                .downcast_ref::<BooleanArray>()
                .cloned()
                .ok_or_else(|| GuardError::internal("rule column lost its boolean type"))
        })
        .collect::<Result<_>>()?;

    Ok(Evaluation {
        valid,
        report: FailureReport::new(invalid, rule_names, &results),
    })
}

#[cfg(test)]
mod tests {
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema as ArrowSchema};

    use super::*;
    use crate::schema::{IntColumn, Rule, Schema, StringColumn};

    fn scores_batch(ids: Vec<Option<i64>>, scores: Vec<Option<i64>>) -> RecordBatch {
        let arrow_schema = Arc::new(ArrowSchema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("score", DataType::Int64, true),
        ]));
        RecordBatch::try_new(
            arrow_schema,
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(Int64Array::from(scores)),
            ],
        )
        .unwrap()
    }

    fn scores_schema() -> Schema {
        Schema::builder("scores")
            .column("id", IntColumn::new().primary_key())
            .column("score", IntColumn::new().min(0).max(100))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_partitions_by_bounds() {
        let schema = scores_schema();
        let batch = scores_batch(
            vec![Some(1), Some(2), Some(3)],
            vec![Some(50), Some(-1), Some(101)],
        );
        let evaluation = evaluate(&schema, &[batch]).await.unwrap();

        assert_eq!(evaluation.valid.num_rows(), 1);
        assert_eq!(evaluation.report.num_invalid(), 2);
        assert_eq!(evaluation.report.counts().get("score|min"), Some(&1));
        assert_eq!(evaluation.report.counts().get("score|max"), Some(&1));
    }

    #[tokio::test]
    async fn test_null_fails_nullability_only() {
        let schema = scores_schema();
        let batch = scores_batch(vec![None, Some(2)], vec![Some(10), Some(20)]);
        let evaluation = evaluate(&schema, &[batch]).await.unwrap();

        assert_eq!(evaluation.valid.num_rows(), 1);
        assert_eq!(evaluation.report.counts().get("id|nullability"), Some(&1));
        assert!(!evaluation.report.counts().contains_key("score|min"));
    }

    #[tokio::test]
    async fn test_null_fails_user_rule() {
        let schema = Schema::builder("scores")
            .column("score", IntColumn::new())
            .rule(Rule::new("positive", "score > 0"))
            .build()
            .unwrap();
        let batch = scores_batch(vec![Some(1), Some(2)], vec![None, Some(5)]);
        let batch = batch.project(&[1]).unwrap();
        let evaluation = evaluate(&schema, &[batch]).await.unwrap();

        assert_eq!(evaluation.report.counts().get("positive"), Some(&1));
        assert_eq!(evaluation.valid.num_rows(), 1);
    }

    #[tokio::test]
    async fn test_primary_key_duplicates() {
        let schema = scores_schema();
        let batch = scores_batch(
            vec![Some(1), Some(1), Some(2)],
            vec![Some(10), Some(20), Some(30)],
        );
        let evaluation = evaluate(&schema, &[batch]).await.unwrap();

        assert_eq!(evaluation.report.counts().get("primary_key"), Some(&2));
        assert_eq!(evaluation.valid.num_rows(), 1);
    }

    #[tokio::test]
    async fn test_unique_column_exempts_nulls() {
        let schema = Schema::builder("tags")
            .column("tag", StringColumn::new().unique())
            .build()
            .unwrap();
        let arrow_schema = Arc::new(ArrowSchema::new(vec![Field::new(
            "tag",
            DataType::Utf8,
            true,
        )]));
        let batch = RecordBatch::try_new(
            arrow_schema,
            vec![Arc::new(StringArray::from(vec![
                Some("a"),
                Some("a"),
                None,
                None,
            ]))],
        )
        .unwrap();
        let evaluation = evaluate(&schema, &[batch]).await.unwrap();

        assert_eq!(evaluation.report.counts().get("tag|unique"), Some(&2));
        assert_eq!(evaluation.valid.num_rows(), 2);
    }

    #[tokio::test]
    async fn test_grouped_rule_broadcasts_to_rows() {
        let schema = Schema::builder("pairs")
            .column("id", IntColumn::new())
            .column("score", IntColumn::new())
            .rule(Rule::grouped(
                "complete_pair",
                vec!["id".to_string()],
                "COUNT(*) = 2",
            ))
            .build()
            .unwrap();
        let batch = scores_batch(
            vec![Some(1), Some(1), Some(2)],
            vec![Some(10), Some(20), Some(30)],
        );
        let evaluation = evaluate(&schema, &[batch]).await.unwrap();

        assert_eq!(evaluation.valid.num_rows(), 2);
        assert_eq!(evaluation.report.counts().get("complete_pair"), Some(&1));
    }

    #[test]
    fn test_synthesized_names_match_schema_rule_names() {
        let schema = Schema::builder("orders")
            .column("id", IntColumn::new().primary_key())
            .column(
                "qty",
                IntColumn::new().min(1).max(99).check("odd", "qty % 2 = 1"),
            )
            .column("tag", StringColumn::new().unique())
            .rule(Rule::new("small_order", "qty < 50"))
            .rule(Rule::grouped("has_pair", vec!["tag".to_string()], "COUNT(*) = 2"))
            .build()
            .unwrap();
        let (_, names) = synthesize_sql(&schema, &schema.arrow_schema(), "__fg_test");
        assert_eq!(names, schema.rule_names());
    }

    #[tokio::test]
    async fn test_missing_column_is_definition_error() {
        let schema = scores_schema();
        let arrow_schema = Arc::new(ArrowSchema::new(vec![Field::new(
            "id",
            DataType::Int64,
            true,
        )]));
        let batch = RecordBatch::try_new(
            arrow_schema,
            vec![Arc::new(Int64Array::from(vec![Some(1)]))],
        )
        .unwrap();
        let err = evaluate(&schema, &[batch]).await.unwrap_err();
        assert!(matches!(err, GuardError::Definition { .. }));
        assert!(err.to_string().contains("missing column 'score'"));
    }

    #[tokio::test]
    async fn test_dtype_mismatch_is_definition_error() {
        let schema = scores_schema();
        let arrow_schema = Arc::new(ArrowSchema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("score", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            arrow_schema,
            vec![
                Arc::new(Int64Array::from(vec![Some(1)])),
                Arc::new(StringArray::from(vec![Some("high")])),
            ],
        )
        .unwrap();
        let err = evaluate(&schema, &[batch]).await.unwrap_err();
        assert!(err.to_string().contains("expected Int64"));
    }

    #[tokio::test]
    async fn test_empty_input_passes() {
        let schema = scores_schema();
        let evaluation = evaluate(&schema, &[]).await.unwrap();
        assert_eq!(evaluation.valid.num_rows(), 0);
        assert!(evaluation.report.is_empty());
    }

    #[tokio::test]
    async fn test_row_order_preserved_across_batches() {
        let schema = Schema::builder("scores")
            .column("score", IntColumn::new().min(0))
            .build()
            .unwrap();
        let arrow_schema = Arc::new(ArrowSchema::new(vec![Field::new(
            "score",
            DataType::Int64,
            true,
        )]));
        let first = RecordBatch::try_new(
            arrow_schema.clone(),
            vec![Arc::new(Int64Array::from(vec![Some(3), Some(-1), Some(7)]))],
        )
        .unwrap();
        let second = RecordBatch::try_new(
            arrow_schema,
            vec![Arc::new(Int64Array::from(vec![Some(11), Some(-5)]))],
        )
        .unwrap();
        let evaluation = evaluate(&schema, &[first, second]).await.unwrap();

        let valid = evaluation
            .valid
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        let values: Vec<i64> = (0..valid.len()).map(|i| valid.value(i)).collect();
        assert_eq!(values, vec![3, 7, 11]);

        let invalid = evaluation.report.invalid();
        let invalid_scores = invalid
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        let values: Vec<i64> = (0..invalid_scores.len())
            .map(|i| invalid_scores.value(i))
            .collect();
        assert_eq!(values, vec![-1, -5]);
    }

    #[tokio::test]
    async fn test_passthrough_columns_survive() {
        let schema = Schema::builder("scores")
            .column("score", IntColumn::new().min(0))
            .build()
            .unwrap();
        let arrow_schema = Arc::new(ArrowSchema::new(vec![
            Field::new("score", DataType::Int64, true),
            Field::new("note", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            arrow_schema,
            vec![
                Arc::new(Int64Array::from(vec![Some(1), Some(-1)])),
                Arc::new(StringArray::from(vec![Some("keep"), Some("drop")])),
            ],
        )
        .unwrap();
        let evaluation = evaluate(&schema, &[batch]).await.unwrap();

        assert_eq!(evaluation.valid.num_columns(), 2);
        let notes = evaluation
            .valid
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(notes.value(0), "keep");
    }

    #[tokio::test]
    async fn test_reserved_input_column_rejected() {
        let schema = Schema::builder("scores")
            .column("score", IntColumn::new())
            .build()
            .unwrap();
        let arrow_schema = Arc::new(ArrowSchema::new(vec![
            Field::new("score", DataType::Int64, true),
            Field::new(ROW_INDEX_COLUMN, DataType::Int64, true),
        ]));
        let batch = RecordBatch::try_new(
            arrow_schema,
            vec![
                Arc::new(Int64Array::from(vec![Some(1)])),
                Arc::new(Int64Array::from(vec![Some(0)])),
            ],
        )
        .unwrap();
        let err = evaluate(&schema, &[batch]).await.unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }
}
