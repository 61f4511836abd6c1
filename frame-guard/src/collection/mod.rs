//! Collections of schema-bound tables validated together.
//!
//! A collection names a set of members, each carrying its own [`Schema`],
//! plus an ordered list of cross-member filters. Validation first runs every
//! member through its schema, then evaluates the filters in declaration
//! order against the currently retained rows; rows a filter drops are
//! attributed to that filter's name in the member's failure report. Filters
//! run in a single pass, so a row removed by a later filter is never
//! reconsidered by an earlier one.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use arrow::array::{Array, BooleanArray};
use arrow::compute::{concat_batches, filter_record_batch};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::prelude::*;
use tracing::{debug, info, instrument};

use crate::engine;
use crate::error::{GuardError, Result, RuleFailures};
use crate::report::FailureReport;
use crate::sample::CollectionSampleRequest;
use crate::schema::Schema;
use crate::security::{quote_identifier, validate_identifier};

mod filters;

pub use filters::{CollectionFilter, FilterContext, OneToAtLeastOne, OneToOne};

#[derive(Debug)]
struct Member {
    name: String,
    schema: Schema,
    filtered: bool,
}

/// A named set of members, each bound to a schema, related by filters.
///
/// Built through [`Collection::builder`]. The members passed to
/// [`filter`](Collection::filter) and [`validate`](Collection::validate)
/// must exactly match the declared member names.
#[derive(Debug)]
pub struct Collection {
    name: String,
    members: Vec<Member>,
    filters: Vec<(String, Arc<dyn CollectionFilter>)>,
    common_primary_key: Vec<String>,
}

impl Collection {
    /// Starts building a collection with the given name.
    pub fn builder(name: impl Into<String>) -> CollectionBuilder {
        CollectionBuilder {
            name: name.into(),
            members: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// The collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Member names in declaration order.
    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }

    /// Members and their schemas in declaration order.
    pub fn members(&self) -> impl Iterator<Item = (&str, &Schema)> + '_ {
        self.members.iter().map(|m| (m.name.as_str(), &m.schema))
    }

    /// The schema of a member, if declared.
    pub fn member_schema(&self, name: &str) -> Option<&Schema> {
        self.members
            .iter()
            .find(|m| m.name == name)
            .map(|m| &m.schema)
    }

    /// Filter names in declaration (and evaluation) order.
    pub fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub(crate) fn filtered_member_names(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| m.filtered)
            .map(|m| m.name.as_str())
            .collect()
    }

    /// Primary key columns shared by all filtered members, in the first
    /// filtered member's declaration order.
    pub fn common_primary_key(&self) -> &[String] {
        &self.common_primary_key
    }

    /// Validates every member and applies the collection filters, returning
    /// the retained rows and a failure report per member.
    ///
    /// Schema failures and filter drops land in the same report, keyed by
    /// rule name and filter name respectively.
    #[instrument(skip(self, members), fields(collection = %self.name))]
    pub async fn filter(
        &self,
        members: BTreeMap<String, Vec<RecordBatch>>,
    ) -> Result<(BTreeMap<String, RecordBatch>, BTreeMap<String, FailureReport>)> {
        self.check_member_set(&members)?;

        let mut valid: BTreeMap<String, RecordBatch> = BTreeMap::new();
        let mut reports: BTreeMap<String, FailureReport> = BTreeMap::new();
        for member in &self.members {
            let batches = members.get(&member.name).map(Vec::as_slice).unwrap_or(&[]);
            let evaluation = engine::evaluate(&member.schema, batches).await?;
            valid.insert(member.name.clone(), evaluation.valid);
            reports.insert(member.name.clone(), evaluation.report);
        }

        if !self.filters.is_empty() {
            self.apply_filters(&mut valid, &mut reports).await?;
        }

        let invalid: usize = reports.values().map(FailureReport::num_invalid).sum();
        info!(
            members = self.members.len(),
            invalid, "collection validation complete"
        );
        Ok((valid, reports))
    }

    /// Like [`filter`](Collection::filter), but raises a
    /// [`MemberValidation`](GuardError::MemberValidation) error when any
    /// member has invalid rows. Members with none are omitted from the error.
    pub async fn validate(
        &self,
        members: BTreeMap<String, Vec<RecordBatch>>,
    ) -> Result<BTreeMap<String, RecordBatch>> {
        let (valid, reports) = self.filter(members).await?;
        let failing: BTreeMap<String, RuleFailures> = reports
            .into_iter()
            .filter(|(_, report)| !report.is_empty())
            .map(|(name, report)| (name, report.to_rule_failures()))
            .collect();
        if failing.is_empty() {
            Ok(valid)
        } else {
            Err(GuardError::MemberValidation {
                collection: self.name.clone(),
                members: failing,
            })
        }
    }

    /// Whether every row of every member passes validation.
    pub async fn is_valid(&self, members: BTreeMap<String, Vec<RecordBatch>>) -> Result<bool> {
        let (_, reports) = self.filter(members).await?;
        Ok(reports.values().all(FailureReport::is_empty))
    }

    /// Generates a collection of synthetic members that validates cleanly.
    pub async fn sample(
        &self,
        request: CollectionSampleRequest,
    ) -> Result<BTreeMap<String, RecordBatch>> {
        crate::sample::sample_collection(self, request).await
    }

    /// Runs the declared filters in order over the currently valid rows,
    /// pruning every filtered member to each filter's retained keys.
    async fn apply_filters(
        &self,
        valid: &mut BTreeMap<String, RecordBatch>,
        reports: &mut BTreeMap<String, FailureReport>,
    ) -> Result<()> {
        let session = SessionContext::new();
        for member in &self.members {
            if let Some(batch) = valid.get(&member.name) {
                let table = MemTable::try_new(batch.schema(), vec![vec![batch.clone()]])?;
                session.register_table(member.name.as_str(), Arc::new(table))?;
            }
        }
        let context = FilterContext::new(
            session.clone(),
            self.members.iter().map(|m| m.name.clone()).collect(),
            self.common_primary_key.clone(),
        );

        for (filter_name, filter) in &self.filters {
            let keys = filter.keys_to_keep(&context).await?;
            let missing: Vec<&str> = self
                .common_primary_key
                .iter()
                .filter(|column| {
                    !keys
                        .schema()
                        .fields()
                        .iter()
                        .any(|field| field.name() == *column)
                })
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(GuardError::definition(format!(
                    "filter '{filter_name}' returned keys missing primary key column(s): {}",
                    missing.join(", ")
                )));
            }

            let key_batches = keys.collect().await?;
            let total_keys: usize = key_batches.iter().map(RecordBatch::num_rows).sum();
            debug!(filter = %filter_name, keys = total_keys, "evaluated collection filter");

            let keys_table = match key_batches.first() {
                Some(first) if total_keys > 0 => {
                    let schema = first.schema();
                    let name = engine::scratch_table_name();
                    let table = MemTable::try_new(schema, vec![key_batches])?;
                    session.register_table(name.as_str(), Arc::new(table))?;
                    Some(name)
                }
                _ => None,
            };

            for member in self.members.iter().filter(|m| m.filtered) {
                let Some(current) = valid.get(&member.name).cloned() else {
                    continue;
                };
                if current.num_rows() == 0 {
                    continue;
                }
                let (kept, dropped) = match &keys_table {
                    Some(table) => {
                        prune_member(&session, &current, table, &self.common_primary_key).await?
                    }
                    None => (RecordBatch::new_empty(current.schema()), current),
                };
                if dropped.num_rows() == 0 {
                    continue;
                }

                let drop_report = FailureReport::from_single_rule(dropped, filter_name);
                match reports.remove(&member.name) {
                    Some(previous) => {
                        reports.insert(member.name.clone(), previous.merge(drop_report)?);
                    }
                    None => {
                        reports.insert(member.name.clone(), drop_report);
                    }
                }

                session.deregister_table(member.name.as_str())?;
                let table = MemTable::try_new(kept.schema(), vec![vec![kept.clone()]])?;
                session.register_table(member.name.as_str(), Arc::new(table))?;
                valid.insert(member.name.clone(), kept);
            }

            if let Some(table) = keys_table {
                session.deregister_table(table.as_str())?;
            }
        }
        Ok(())
    }

    fn check_member_set(&self, members: &BTreeMap<String, Vec<RecordBatch>>) -> Result<()> {
        let declared: BTreeSet<&str> = self.members.iter().map(|m| m.name.as_str()).collect();
        let provided: BTreeSet<&str> = members.keys().map(String::as_str).collect();
        if declared == provided {
            return Ok(());
        }
        let mut problems = Vec::new();
        for name in declared.difference(&provided) {
            problems.push(format!("missing member '{name}'"));
        }
        for name in provided.difference(&declared) {
            problems.push(format!("unexpected member '{name}'"));
        }
        Err(GuardError::definition(format!(
            "input does not match collection '{}': {}",
            self.name,
            problems.join("; ")
        )))
    }
}

/// Prunes `current` to the rows whose common key columns appear in the keys
/// table, preserving row order. Returns the kept and dropped partitions.
async fn prune_member(
    session: &SessionContext,
    current: &RecordBatch,
    keys_table: &str,
    key_columns: &[String],
) -> Result<(RecordBatch, RecordBatch)> {
    let scratch = engine::scratch_table_name();
    let source_schema = current.schema();
    engine::register_with_row_index(
        session,
        &scratch,
        &source_schema,
        std::slice::from_ref(current),
    )?;

    let columns: Vec<String> = source_schema
        .fields()
        .iter()
        .map(|field| format!("t.{}", engine::quoted(field.name())))
        .collect();
    let keys: Vec<String> = key_columns.iter().map(|key| quote_identifier(key)).collect();
    let join: Vec<String> = keys
        .iter()
        .map(|key| format!("t.{key} IS NOT DISTINCT FROM h.{key}"))
        .collect();
    let sql = format!(
        "SELECT {columns}, (h.\"__fg_hit\" IS NOT NULL) AS \"__fg_keep\" \
         FROM \"{scratch}\" t \
         LEFT JOIN (SELECT DISTINCT {key_list}, TRUE AS \"__fg_hit\" FROM \"{keys_table}\") h \
         ON {join} \
         ORDER BY t.\"{row_index}\"",
        columns = columns.join(", "),
        key_list = keys.join(", "),
        join = join.join(" AND "),
        row_index = engine::ROW_INDEX_COLUMN,
    );
    debug!(sql = %sql, "synthesized member prune query");

    let result = session.sql(&sql).await?.collect().await?;
    session.deregister_table(scratch.as_str())?;
    let combined = match result.first() {
        Some(first) => concat_batches(&first.schema(), &result)?,
        None => {
            return Err(GuardError::internal(
                "prune query returned no batches for a non-empty member",
            ))
        }
    };

    let mask = combined.column(combined.num_columns() - 1);
    let mask = match mask.as_any().downcast_ref::<BooleanArray>() {
        Some(mask) => mask,
        None => {
            return Err(GuardError::internal(
                "prune query did not produce a boolean keep column",
            ))
        }
    };
    let mut keep = Vec::with_capacity(combined.num_rows());
    for row in 0..combined.num_rows() {
        keep.push(mask.is_valid(row) && mask.value(row));
    }
    let discard: Vec<bool> = keep.iter().map(|kept| !kept).collect();

    let input_indices: Vec<usize> = (0..combined.num_columns() - 1).collect();
    let projected = combined.project(&input_indices)?;
    let kept = filter_record_batch(&projected, &BooleanArray::from(keep))?;
    let dropped = filter_record_batch(&projected, &BooleanArray::from(discard))?;
    Ok((kept, dropped))
}

fn common_key_columns(members: &[Member]) -> Vec<String> {
    let mut filtered = members.iter().filter(|member| member.filtered);
    let Some(first) = filtered.next() else {
        return Vec::new();
    };
    let mut common: Vec<String> = first
        .schema
        .primary_key()
        .iter()
        .map(|column| column.to_string())
        .collect();
    for member in filtered {
        let keys: HashSet<&str> = member.schema.primary_key().into_iter().collect();
        common.retain(|column| keys.contains(column.as_str()));
    }
    common
}

/// Builder for [`Collection`].
#[derive(Debug)]
pub struct CollectionBuilder {
    name: String,
    members: Vec<Member>,
    filters: Vec<(String, Arc<dyn CollectionFilter>)>,
}

impl CollectionBuilder {
    /// Adds a member bound to `schema`. Filters prune its rows.
    pub fn member(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.members.push(Member {
            name: name.into(),
            schema,
            filtered: true,
        });
        self
    }

    /// Adds a member that filters may read but never prune. Its primary key
    /// does not participate in the common key computation.
    pub fn unfiltered_member(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.members.push(Member {
            name: name.into(),
            schema,
            filtered: false,
        });
        self
    }

    /// Registers a filter under `name`. Filters run in registration order.
    pub fn filter(
        mut self,
        name: impl Into<String>,
        filter: impl CollectionFilter + 'static,
    ) -> Self {
        self.filters.push((name.into(), Arc::new(filter)));
        self
    }

    /// Validates the definition and builds the collection.
    pub fn build(self) -> Result<Collection> {
        validate_identifier(&self.name)?;
        if self.members.is_empty() {
            return Err(GuardError::definition(format!(
                "collection '{}' declares no members",
                self.name
            )));
        }

        let mut member_names = BTreeSet::new();
        for member in &self.members {
            validate_identifier(&member.name)?;
            if !member_names.insert(member.name.as_str()) {
                return Err(GuardError::definition(format!(
                    "duplicate member '{}'",
                    member.name
                )));
            }
        }

        let mut filter_names = BTreeSet::new();
        for (name, _) in &self.filters {
            validate_identifier(name)?;
            if name == "primary_key" {
                return Err(GuardError::definition(
                    "filter name 'primary_key' is reserved",
                ));
            }
            if !filter_names.insert(name.as_str()) {
                return Err(GuardError::definition(format!("duplicate filter '{name}'")));
            }
            for member in &self.members {
                if member.schema.column(name).is_some() {
                    return Err(GuardError::definition(format!(
                        "filter '{name}' collides with column '{name}' of member '{}'",
                        member.name
                    )));
                }
                if member.schema.rules().iter().any(|rule| rule.name() == name) {
                    return Err(GuardError::definition(format!(
                        "filter '{name}' collides with rule '{name}' of member '{}'",
                        member.name
                    )));
                }
            }
        }

        let common_primary_key = common_key_columns(&self.members);
        if !self.filters.is_empty() && common_primary_key.is_empty() {
            return Err(GuardError::definition(format!(
                "collection '{}' declares filters but its filtered members \
                 share no primary key columns",
                self.name
            )));
        }

        Ok(Collection {
            name: self.name,
            members: self.members,
            filters: self.filters,
            common_primary_key,
        })
    }
}
