//! Failure reporting for validation runs.

use std::collections::BTreeMap;
use std::fmt;

use arrow::array::{Array, BooleanArray};
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use serde::Serialize;

use crate::error::{Result, RuleFailures};

/// The failing side of a validation run.
///
/// Holds the invalid rows together with per-rule failure counts and the
/// distinct failing rule combinations. Counts are computed once at
/// construction; a row failing several rules is counted once per rule but
/// once overall.
#[derive(Debug, Clone)]
pub struct FailureReport {
    invalid: RecordBatch,
    counts: BTreeMap<String, usize>,
    cooccurrences: BTreeMap<Vec<String>, usize>,
}

impl FailureReport {
    /// Builds a report from the invalid rows and the per-rule outcome masks
    /// restricted to those rows. `results[i]` holds the outcome of
    /// `rule_names[i]` for each invalid row, true meaning the rule passed.
    /// A NULL outcome counts as failing.
    pub(crate) fn new(
        invalid: RecordBatch,
        rule_names: &[String],
        results: &[BooleanArray],
    ) -> Self {
        debug_assert_eq!(rule_names.len(), results.len());
        let rows = invalid.num_rows();

        let mut counts = BTreeMap::new();
        let mut cooccurrences = BTreeMap::new();
        for row in 0..rows {
            let mut failed = Vec::new();
            for (name, result) in rule_names.iter().zip(results) {
                let passed = result.is_valid(row) && result.value(row);
                if !passed {
                    failed.push(name.clone());
                }
            }
            for name in &failed {
                *counts.entry(name.clone()).or_insert(0) += 1;
            }
            *cooccurrences.entry(failed).or_insert(0) += 1;
        }

        Self {
            invalid,
            counts,
            cooccurrences,
        }
    }

    /// A report with no failing rows, sharing the given (empty) batch layout.
    pub(crate) fn empty(invalid: RecordBatch) -> Self {
        Self {
            invalid,
            counts: BTreeMap::new(),
            cooccurrences: BTreeMap::new(),
        }
    }

    /// A report where every row failed the same single rule. Used for rows
    /// dropped by a collection filter.
    pub(crate) fn from_single_rule(invalid: RecordBatch, rule: &str) -> Self {
        let rows = invalid.num_rows();
        let mut counts = BTreeMap::new();
        let mut cooccurrences = BTreeMap::new();
        if rows > 0 {
            counts.insert(rule.to_string(), rows);
            cooccurrences.insert(vec![rule.to_string()], rows);
        }
        Self {
            invalid,
            counts,
            cooccurrences,
        }
    }

    /// Combines two reports over batches of identical layout. The other
    /// report's rows are appended after this one's.
    pub(crate) fn merge(self, other: FailureReport) -> Result<FailureReport> {
        if other.is_empty() {
            return Ok(self);
        }
        if self.is_empty() {
            return Ok(other);
        }
        let schema = self.invalid.schema();
        let invalid = concat_batches(&schema, [&self.invalid, &other.invalid])?;
        let mut counts = self.counts;
        for (rule, count) in other.counts {
            *counts.entry(rule).or_insert(0) += count;
        }
        let mut cooccurrences = self.cooccurrences;
        for (set, count) in other.cooccurrences {
            *cooccurrences.entry(set).or_insert(0) += count;
        }
        Ok(FailureReport {
            invalid,
            counts,
            cooccurrences,
        })
    }

    /// The rows that failed at least one rule, in input order, carrying the
    /// original input columns.
    pub fn invalid(&self) -> &RecordBatch {
        &self.invalid
    }

    /// Consumes the report, returning the invalid rows.
    pub fn into_invalid(self) -> RecordBatch {
        self.invalid
    }

    pub fn num_invalid(&self) -> usize {
        self.invalid.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.invalid.num_rows() == 0
    }

    /// Failure count per rule name. Rules that never failed are absent.
    pub fn counts(&self) -> &BTreeMap<String, usize> {
        &self.counts
    }

    /// Count per distinct set of rules failing together on a row. Keys list
    /// the failing rule names in rule evaluation order.
    pub fn cooccurrence_counts(&self) -> &BTreeMap<Vec<String>, usize> {
        &self.cooccurrences
    }

    pub(crate) fn to_rule_failures(&self) -> RuleFailures {
        RuleFailures::new(self.counts.clone(), self.num_invalid())
    }

    /// A serializable snapshot of the counts, without the invalid rows.
    pub fn summary(&self) -> FailureSummary {
        FailureSummary {
            num_invalid: self.num_invalid(),
            counts: self.counts.clone(),
            cooccurrences: self
                .cooccurrences
                .iter()
                .map(|(rules, count)| Cooccurrence {
                    rules: rules.clone(),
                    count: *count,
                })
                .collect(),
        }
    }
}

/// Counts of a [`FailureReport`] in a form suitable for logs or APIs.
#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    /// Number of rows that failed at least one rule.
    pub num_invalid: usize,
    /// Failure count per rule name.
    pub counts: BTreeMap<String, usize>,
    /// Count per distinct set of rules failing together.
    pub cooccurrences: Vec<Cooccurrence>,
}

/// One distinct combination of rules failing together.
#[derive(Debug, Clone, Serialize)]
pub struct Cooccurrence {
    pub rules: Vec<String>,
    pub count: usize,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "all rows passed validation");
        }
        write!(
            f,
            "{} row(s) failed validation:{}",
            self.num_invalid(),
            self.to_rule_failures()
        )
    }
}
