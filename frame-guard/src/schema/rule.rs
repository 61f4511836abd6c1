//! User-defined validation rules.

use crate::error::{GuardError, Result};
use crate::security;

/// A named SQL predicate evaluated against every row of a table.
///
/// Plain rules see one row at a time. Grouped rules partition the table by
/// one or more columns, evaluate the predicate once per group (aggregates
/// allowed), and attribute the outcome to every row of the group. A NULL
/// predicate result counts as failing in both forms.
#[derive(Debug, Clone)]
pub struct Rule {
    name: String,
    predicate: String,
    group_by: Option<Vec<String>>,
}

impl Rule {
    /// A row-level rule.
    pub fn new(name: impl Into<String>, predicate: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            predicate: predicate.into(),
            group_by: None,
        }
    }

    /// A group-level rule partitioned by `group_by`.
    pub fn grouped(
        name: impl Into<String>,
        group_by: Vec<String>,
        predicate: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: predicate.into(),
            group_by: Some(group_by),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn predicate(&self) -> &str {
        &self.predicate
    }

    pub fn group_by(&self) -> Option<&[String]> {
        self.group_by.as_deref()
    }

    pub fn is_grouped(&self) -> bool {
        self.group_by.is_some()
    }

    pub(crate) fn validate_definition(&self, columns: &[String]) -> Result<()> {
        security::validate_identifier(&self.name)?;
        if self.name == "primary_key" {
            return Err(GuardError::definition(
                "rule name 'primary_key' is reserved",
            ));
        }
        security::validate_predicate(&self.predicate)?;
        if let Some(group_by) = &self.group_by {
            if group_by.is_empty() {
                return Err(GuardError::definition(format!(
                    "group rule '{}' must name at least one grouping column",
                    self.name
                )));
            }
            for key in group_by {
                if !columns.contains(key) {
                    return Err(GuardError::definition(format!(
                        "group rule '{}' references unknown column '{key}'",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    #[test]
    fn test_plain_rule_accepted() {
        let rule = Rule::new("a_before_b", "a < b");
        assert!(rule.validate_definition(&columns()).is_ok());
        assert!(!rule.is_grouped());
    }

    #[test]
    fn test_rule_name_with_separator_rejected() {
        let rule = Rule::new("a|min", "a > 0");
        assert!(rule.validate_definition(&columns()).is_err());
    }

    #[test]
    fn test_reserved_rule_name_rejected() {
        let rule = Rule::new("primary_key", "a > 0");
        assert!(rule.validate_definition(&columns()).is_err());
    }

    #[test]
    fn test_forbidden_keyword_rejected() {
        let rule = Rule::new("bad", "a > 0; DROP TABLE users");
        assert!(rule.validate_definition(&columns()).is_err());
    }

    #[test]
    fn test_grouped_rule_unknown_column_rejected() {
        let rule = Rule::grouped("per_group", vec!["missing".to_string()], "COUNT(*) > 1");
        assert!(rule.validate_definition(&columns()).is_err());
    }

    #[test]
    fn test_grouped_rule_empty_keys_rejected() {
        let rule = Rule::grouped("per_group", vec![], "COUNT(*) > 1");
        assert!(rule.validate_definition(&columns()).is_err());
    }

    #[test]
    fn test_grouped_rule_accepted() {
        let rule = Rule::grouped("pairs", vec!["a".to_string()], "COUNT(*) = 2");
        assert!(rule.validate_definition(&columns()).is_ok());
        assert_eq!(rule.group_by(), Some(&["a".to_string()][..]));
    }
}
