//! Prelude for commonly used types and traits in frame-guard.

pub use crate::collection::{
    Collection, CollectionFilter, FilterContext, OneToAtLeastOne, OneToOne,
};
pub use crate::error::{GuardError, Result, RuleFailures};
pub use crate::logging::LoggingConfig;
pub use crate::report::{FailureReport, FailureSummary};
pub use crate::sample::{CollectionSampleRequest, Generator, OverrideValues, SampleRequest};
pub use crate::schema::{
    BoolColumn, ColumnDef, DateColumn, FloatColumn, IntColumn, Rule, Schema, StringColumn,
};
