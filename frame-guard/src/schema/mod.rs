//! Schema definition and the validation surface built on it.
//!
//! A [`Schema`] names a table shape: typed columns with constraints, an
//! optional composite primary key, and user-defined rules. Built schemas are
//! immutable; all definition checks run once in [`SchemaBuilder::build`], so
//! every later failure is attributable to the data, not the declaration.

use std::sync::Arc;

use arrow::datatypes::{Field, Schema as ArrowSchema, SchemaRef};
use arrow::record_batch::RecordBatch;
use tracing::instrument;

use crate::engine;
use crate::error::{GuardError, Result};
use crate::report::FailureReport;
use crate::sample::SampleRequest;
use crate::security;

mod column;
mod rule;

pub use column::{
    BoolColumn, ColumnDef, ColumnOptions, DateColumn, FloatColumn, IntColumn, NamedPredicate,
    StringColumn,
};
pub(crate) use column::{date_from_epoch_days, epoch_days};
pub use rule::Rule;

/// An immutable table schema: named typed columns plus validation rules.
#[derive(Debug)]
pub struct Schema {
    name: String,
    columns: Vec<(String, Arc<dyn ColumnDef>)>,
    rules: Vec<Rule>,
}

impl Schema {
    /// Starts building a schema with the given name.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            columns: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &dyn ColumnDef)> + '_ {
        self.columns
            .iter()
            .map(|(name, column)| (name.as_str(), column.as_ref()))
    }

    pub fn column(&self, name: &str) -> Option<&dyn ColumnDef> {
        self.columns
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, column)| column.as_ref())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Primary key columns in declaration order. Empty when no column is
    /// marked as part of the key.
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, column)| column.options().primary_key())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Every rule name the engine evaluates, in evaluation order: synthesized
    /// per-column constraints (named `{column}|{constraint}`), the composite
    /// `primary_key` rule if any column is part of the key, then user rules.
    pub fn rule_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (name, column) in self.columns() {
            let options = column.options();
            if !options.effective_nullable() {
                names.push(format!("{name}|nullability"));
            }
            for predicate in column.constraint_predicates(name) {
                names.push(format!("{name}|{}", predicate.name));
            }
            if options.unique() && !options.primary_key() {
                names.push(format!("{name}|unique"));
            }
            for (check_name, _) in options.checks() {
                names.push(format!("{name}|check_{check_name}"));
            }
        }
        if !self.primary_key().is_empty() {
            names.push("primary_key".to_string());
        }
        names.extend(self.rules.iter().map(|rule| rule.name().to_string()));
        names
    }

    /// The Arrow schema of conforming tables. Field nullability follows the
    /// column declarations; primary key columns are non-nullable.
    pub fn arrow_schema(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|(name, column)| {
                Field::new(
                    name,
                    column.data_type(),
                    column.options().effective_nullable(),
                )
            })
            .collect();
        Arc::new(ArrowSchema::new(fields))
    }

    /// An empty batch conforming to this schema.
    pub fn create_empty(&self) -> RecordBatch {
        RecordBatch::new_empty(self.arrow_schema())
    }

    /// Evaluates every rule and splits the input into the passing rows and a
    /// failure report carrying the rest. Row order is preserved on both
    /// sides.
    #[instrument(skip(self, batches), fields(schema = %self.name))]
    pub async fn filter(&self, batches: &[RecordBatch]) -> Result<(RecordBatch, FailureReport)> {
        let evaluation = engine::evaluate(self, batches).await?;
        Ok((evaluation.valid, evaluation.report))
    }

    /// Like [`Schema::filter`], but any failing row is an error.
    pub async fn validate(&self, batches: &[RecordBatch]) -> Result<RecordBatch> {
        let (valid, report) = self.filter(batches).await?;
        if report.is_empty() {
            Ok(valid)
        } else {
            Err(GuardError::RuleValidation {
                schema: self.name.clone(),
                failures: report.to_rule_failures(),
            })
        }
    }

    /// Whether every row of the input passes every rule.
    pub async fn is_valid(&self, batches: &[RecordBatch]) -> Result<bool> {
        let (_, report) = self.filter(batches).await?;
        Ok(report.is_empty())
    }

    /// Draws a batch of rows satisfying this schema. See [`SampleRequest`]
    /// for sizing, seeding, and override options.
    pub async fn sample(&self, request: SampleRequest) -> Result<RecordBatch> {
        crate::sample::sample_schema(self, request).await
    }
}

/// Builder for [`Schema`]. Column and rule names must be unique across the
/// whole effective set, bases included; a collision is a definition error at
/// [`build`](SchemaBuilder::build) time.
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    columns: Vec<(String, Arc<dyn ColumnDef>)>,
    rules: Vec<Rule>,
}

impl SchemaBuilder {
    /// Declares a column.
    pub fn column(
        mut self,
        name: impl Into<String>,
        column: impl Into<Arc<dyn ColumnDef>>,
    ) -> Self {
        self.columns.push((name.into(), column.into()));
        self
    }

    /// Declares a rule.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Inherits all columns and rules of `base`, before any declared on this
    /// builder and in the base's declaration order. A derived schema may add
    /// definitions but not redefine inherited ones; base schemas are
    /// flattened here, so the built schema carries no reference back.
    pub fn extends(mut self, base: &Schema) -> Self {
        let own_columns = std::mem::take(&mut self.columns);
        let own_rules = std::mem::take(&mut self.rules);

        self.columns = base.columns.clone();
        self.columns.extend(own_columns);
        self.rules = base.rules.clone();
        self.rules.extend(own_rules);
        self
    }

    /// Validates every declaration and produces the schema.
    pub fn build(self) -> Result<Schema> {
        security::validate_identifier(&self.name)?;
        let mut seen_columns = std::collections::HashSet::new();
        for (name, column) in &self.columns {
            security::validate_identifier(name)?;
            column.validate_definition(name)?;
            if !seen_columns.insert(name.as_str()) {
                return Err(GuardError::definition(format!(
                    "duplicate column '{name}' in schema '{}'",
                    self.name
                )));
            }
        }
        let column_names: Vec<String> = self
            .columns
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        let mut seen_rules = std::collections::HashSet::new();
        for rule in &self.rules {
            rule.validate_definition(&column_names)?;
            if !seen_rules.insert(rule.name()) {
                return Err(GuardError::definition(format!(
                    "duplicate rule '{}' in schema '{}'",
                    rule.name(),
                    self.name
                )));
            }
        }
        Ok(Schema {
            name: self.name,
            columns: self.columns,
            rules: self.rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::Int64Array;
    use arrow::datatypes::DataType;

    use super::*;

    fn base_schema() -> Schema {
        Schema::builder("events")
            .column("id", IntColumn::new().primary_key())
            .column("score", IntColumn::new().min(0).max(100))
            .rule(Rule::new("nonzero", "score <> 0"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_introspection() {
        let schema = base_schema();
        assert_eq!(schema.name(), "events");
        assert_eq!(schema.column_names(), vec!["id", "score"]);
        assert_eq!(schema.primary_key(), vec!["id"]);
        assert_eq!(schema.rules().len(), 1);
        assert!(schema.column("score").is_some());
        assert!(schema.column("missing").is_none());
    }

    #[test]
    fn test_rule_names_list_the_effective_set() {
        let schema = base_schema();
        assert_eq!(
            schema.rule_names(),
            vec![
                "id|nullability",
                "score|min",
                "score|max",
                "primary_key",
                "nonzero"
            ]
        );
    }

    #[test]
    fn test_arrow_schema_nullability() {
        let schema = base_schema();
        let arrow_schema = schema.arrow_schema();
        assert!(!arrow_schema.field(0).is_nullable());
        assert!(arrow_schema.field(1).is_nullable());
        assert_eq!(arrow_schema.field(1).data_type(), &DataType::Int64);
    }

    #[test]
    fn test_create_empty_matches_schema() {
        let schema = base_schema();
        let empty = schema.create_empty();
        assert_eq!(empty.num_rows(), 0);
        assert_eq!(empty.num_columns(), 2);
    }

    #[test]
    fn test_invalid_column_definition_fails_build() {
        let result = Schema::builder("events")
            .column("score", IntColumn::new().min(10).max(0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_schema_name_fails_build() {
        let result = Schema::builder("my schema")
            .column("a", IntColumn::new())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let err = Schema::builder("events")
            .column("a", IntColumn::new().min(0))
            .column("b", IntColumn::new())
            .column("a", IntColumn::new().min(5))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate column 'a'"));
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let err = Schema::builder("events")
            .column("a", IntColumn::new())
            .rule(Rule::new("positive", "a > 0"))
            .rule(Rule::new("positive", "a >= 0"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate rule 'positive'"));
    }

    #[test]
    fn test_extends_flattens_the_base() {
        let base = base_schema();
        let child = Schema::builder("events_v2")
            .extends(&base)
            .column("label", StringColumn::new())
            .rule(Rule::new("labeled_or_low", "label IS NOT NULL OR score < 10"))
            .build()
            .unwrap();

        assert_eq!(child.column_names(), vec!["id", "score", "label"]);
        assert_eq!(child.primary_key(), vec!["id"]);
        assert_eq!(child.rules().len(), 2);
    }

    #[test]
    fn test_extends_collision_rejected() {
        let base = base_schema();
        let err = Schema::builder("events_v2")
            .extends(&base)
            .column("score", IntColumn::new().min(10).max(100))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate column 'score'"));
    }

    #[tokio::test]
    async fn test_validate_surfaces_rule_failures() {
        let schema = base_schema();
        let batch = RecordBatch::try_new(
            schema.arrow_schema(),
            vec![
                Arc::new(Int64Array::from(vec![Some(1), Some(2)])),
                Arc::new(Int64Array::from(vec![Some(0), Some(50)])),
            ],
        )
        .unwrap();

        let err = schema.validate(&[batch]).await.unwrap_err();
        match err {
            GuardError::RuleValidation { schema, failures } => {
                assert_eq!(schema, "events");
                assert_eq!(failures.counts().get("nonzero"), Some(&1));
                assert_eq!(failures.total(), 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_is_valid_round_trip() {
        let schema = base_schema();
        let batch = RecordBatch::try_new(
            schema.arrow_schema(),
            vec![
                Arc::new(Int64Array::from(vec![Some(1)])),
                Arc::new(Int64Array::from(vec![Some(10)])),
            ],
        )
        .unwrap();
        assert!(schema.is_valid(&[batch]).await.unwrap());
    }
}
