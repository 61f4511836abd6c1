//! Cross-member filters for collections.
//!
//! A filter inspects the currently retained rows of every member and returns
//! the key combinations that survive. The two relationship helpers cover the
//! common foreign key shapes; anything else implements [`CollectionFilter`]
//! directly and builds its own query through the [`FilterContext`].

use std::fmt;

use async_trait::async_trait;
use datafusion::prelude::*;

use crate::error::{GuardError, Result};
use crate::security::quote_identifier;

/// A collection-level rule deciding which primary key combinations survive.
///
/// Implementations receive a [`FilterContext`] exposing every member of the
/// collection as a registered table and return a table of keys to keep. The
/// returned columns must include all common primary key columns; extra
/// columns are ignored. Every filtered member is then pruned to the returned
/// keys, and rows dropped this way are attributed to the name under which
/// the filter was registered.
#[async_trait]
pub trait CollectionFilter: fmt::Debug + Send + Sync {
    /// Computes the key combinations that remain valid under this filter.
    async fn keys_to_keep(&self, ctx: &FilterContext) -> Result<DataFrame>;
}

/// Evaluation context handed to collection filters.
///
/// Each member is registered as a table under its member name, reflecting
/// all pruning done by earlier filters in the same pass.
pub struct FilterContext {
    session: SessionContext,
    member_names: Vec<String>,
    common_primary_key: Vec<String>,
}

impl FilterContext {
    pub(crate) fn new(
        session: SessionContext,
        member_names: Vec<String>,
        common_primary_key: Vec<String>,
    ) -> Self {
        Self {
            session,
            member_names,
            common_primary_key,
        }
    }

    /// The session with every member registered under its name.
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Names of all members of the collection.
    pub fn member_names(&self) -> &[String] {
        &self.member_names
    }

    /// Primary key columns shared by all filtered members.
    pub fn common_primary_key(&self) -> &[String] {
        &self.common_primary_key
    }

    /// Runs a query against the member tables.
    pub async fn sql(&self, query: &str) -> Result<DataFrame> {
        Ok(self.session.sql(query).await?)
    }

    /// Returns the quoted table reference for a member, or a definition
    /// error if no such member exists.
    pub fn member_table(&self, member: &str) -> Result<String> {
        if self.member_names.iter().any(|name| name == member) {
            Ok(quote_identifier(member))
        } else {
            Err(GuardError::definition(format!(
                "filter references unknown member '{member}'"
            )))
        }
    }
}

/// Keeps keys where the left and the right member each contain exactly one
/// matching row.
#[derive(Debug, Clone)]
pub struct OneToOne {
    left: String,
    right: String,
}

impl OneToOne {
    /// Relates `left` and `right` one to one on the common primary key.
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }
}

#[async_trait]
impl CollectionFilter for OneToOne {
    async fn keys_to_keep(&self, ctx: &FilterContext) -> Result<DataFrame> {
        let sql = relationship_sql(
            ctx,
            &self.left,
            &self.right,
            "l.\"__fg_n\" = 1 AND r.\"__fg_n\" = 1",
        )?;
        ctx.sql(&sql).await
    }
}

/// Keeps keys where the left member contains exactly one matching row and
/// the right member contains at least one.
#[derive(Debug, Clone)]
pub struct OneToAtLeastOne {
    left: String,
    right: String,
}

impl OneToAtLeastOne {
    /// Relates one row of `left` to one or more rows of `right` on the
    /// common primary key.
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }
}

#[async_trait]
impl CollectionFilter for OneToAtLeastOne {
    async fn keys_to_keep(&self, ctx: &FilterContext) -> Result<DataFrame> {
        let sql = relationship_sql(ctx, &self.left, &self.right, "l.\"__fg_n\" = 1")?;
        ctx.sql(&sql).await
    }
}

/// Builds the grouped join shared by the relationship filters: count rows
/// per key on each side, join the key sets null-safely, keep keys passing
/// `predicate`.
fn relationship_sql(
    ctx: &FilterContext,
    left: &str,
    right: &str,
    predicate: &str,
) -> Result<String> {
    let left_table = ctx.member_table(left)?;
    let right_table = ctx.member_table(right)?;
    let keys: Vec<String> = ctx
        .common_primary_key()
        .iter()
        .map(|key| quote_identifier(key))
        .collect();
    if keys.is_empty() {
        return Err(GuardError::definition(format!(
            "relationship filter between '{left}' and '{right}' requires \
             common primary key columns"
        )));
    }
    let key_list = keys.join(", ");
    let select: Vec<String> = keys.iter().map(|key| format!("l.{key} AS {key}")).collect();
    let join: Vec<String> = keys
        .iter()
        .map(|key| format!("l.{key} IS NOT DISTINCT FROM r.{key}"))
        .collect();
    Ok(format!(
        "SELECT {select} FROM \
         (SELECT {key_list}, COUNT(*) AS \"__fg_n\" FROM {left_table} GROUP BY {key_list}) l \
         JOIN \
         (SELECT {key_list}, COUNT(*) AS \"__fg_n\" FROM {right_table} GROUP BY {key_list}) r \
         ON {join} \
         WHERE {predicate}",
        select = select.join(", "),
        join = join.join(" AND "),
    ))
}
