//! SQL safety utilities for schema and rule definitions.
//!
//! Column, rule, member, and filter names all end up inside generated SQL, as
//! do user-authored rule predicates. This module validates those inputs at
//! definition time so the query synthesis in the engine never has to worry
//! about injection or malformed identifiers.

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{GuardError, Result};

/// Maximum length for user-supplied identifiers.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Maximum length for user-supplied regex patterns.
const MAX_PATTERN_LENGTH: usize = 1_000;

/// Maximum length for user-supplied SQL predicates.
const MAX_PREDICATE_LENGTH: usize = 5_000;

/// Keywords that must not appear in a rule predicate. Predicates are boolean
/// expressions, so any statement-level keyword is a definition defect.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "INSERT", "UPDATE", "CREATE", "ALTER", "TRUNCATE", "GRANT", "REVOKE",
    "EXECUTE", "EXEC", "CALL", "MERGE", "COMMIT", "ROLLBACK", "TRANSACTION", "LOCK",
];

/// Cache for compiled word-boundary regexes to avoid recompiling.
static REGEX_CACHE: Lazy<RwLock<HashMap<String, Regex>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

static IDENTIFIER_REGEX: Lazy<Regex> = Lazy::new(|| {
    // Must start with a letter or underscore, no dots: identifiers here are
    // bare column/rule/member names, never qualified paths.
    #[allow(clippy::expect_used)]
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("hard-coded regex pattern should be valid")
});

/// Validates a user-supplied identifier (column, rule, member, or filter name).
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() || identifier.trim().is_empty() {
        return Err(GuardError::definition(
            "identifier cannot be empty or whitespace-only",
        ));
    }
    if identifier.len() > MAX_IDENTIFIER_LENGTH {
        let prefix: String = identifier.chars().take(32).collect();
        return Err(GuardError::definition(format!(
            "identifier '{prefix}...' is too long (max {MAX_IDENTIFIER_LENGTH} characters)"
        )));
    }
    if identifier.contains('\0') {
        return Err(GuardError::definition(
            "identifier cannot contain null bytes",
        ));
    }
    if !IDENTIFIER_REGEX.is_match(identifier) {
        return Err(GuardError::definition(format!(
            "invalid identifier '{identifier}': identifiers must start with a letter or \
             underscore and contain only letters, numbers, and underscores"
        )));
    }
    if identifier.starts_with("__fg_") {
        return Err(GuardError::definition(format!(
            "identifier '{identifier}' uses the reserved '__fg_' prefix"
        )));
    }
    Ok(())
}

/// Quotes a validated identifier for embedding in generated SQL.
pub fn quote_identifier(identifier: &str) -> String {
    // Identifiers pass `validate_identifier` before reaching SQL, so there are
    // no embedded quotes to escape; quoting preserves case and reserved words.
    format!("\"{identifier}\"")
}

/// Escapes a string literal for embedding in generated SQL.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Validates a regex pattern and returns it escaped for SQL embedding.
pub fn validate_pattern(pattern: &str) -> Result<String> {
    if pattern.len() > MAX_PATTERN_LENGTH {
        return Err(GuardError::definition(format!(
            "regex pattern is too long (max {MAX_PATTERN_LENGTH} characters)"
        )));
    }
    if pattern.contains('\0') {
        return Err(GuardError::definition(
            "regex pattern cannot contain null bytes",
        ));
    }
    if let Err(e) = Regex::new(pattern) {
        return Err(GuardError::definition(format!("invalid regex pattern: {e}")));
    }
    Ok(escape_literal(pattern))
}

/// Validates a user-authored SQL boolean predicate.
///
/// Predicates appear inside a generated `SELECT`, so statement keywords,
/// statement separators, and comment sequences are all rejected.
pub fn validate_predicate(predicate: &str) -> Result<()> {
    if predicate.trim().is_empty() {
        return Err(GuardError::definition("predicate cannot be empty"));
    }
    if predicate.len() > MAX_PREDICATE_LENGTH {
        return Err(GuardError::definition(format!(
            "predicate is too long (max {MAX_PREDICATE_LENGTH} characters)"
        )));
    }
    if predicate.contains(';') {
        return Err(GuardError::definition(
            "predicate cannot contain semicolons",
        ));
    }
    if predicate.contains("--") || predicate.contains("/*") || predicate.contains("*/") {
        return Err(GuardError::definition("predicate cannot contain comments"));
    }

    let upper = predicate.to_uppercase();
    for keyword in FORBIDDEN_KEYWORDS {
        // Word boundaries avoid false positives like "UPDATED_AT".
        let pattern = format!(r"\b{keyword}\b");
        if cached_is_match(&pattern, &upper)? {
            return Err(GuardError::definition(format!(
                "predicate contains forbidden keyword: {keyword}"
            )));
        }
    }
    Ok(())
}

fn cached_is_match(pattern: &str, text: &str) -> Result<bool> {
    {
        let cache = REGEX_CACHE
            .read()
            .map_err(|_| GuardError::internal("failed to acquire read lock on regex cache"))?;
        if let Some(regex) = cache.get(pattern) {
            return Ok(regex.is_match(text));
        }
    }

    let mut cache = REGEX_CACHE
        .write()
        .map_err(|_| GuardError::internal("failed to acquire write lock on regex cache"))?;
    let regex = Regex::new(pattern)
        .map_err(|e| GuardError::internal(format!("failed to compile regex pattern: {e}")))?;
    let is_match = regex.is_match(text);
    cache.insert(pattern.to_string(), regex);
    Ok(is_match)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_identifier("customer_id").is_ok());
        assert!(validate_identifier("_private").is_ok());
        assert!(validate_identifier("a1").is_ok());
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("   ").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("a-b").is_err());
        assert!(validate_identifier("a.b").is_err());
        assert!(validate_identifier("id; DROP TABLE users--").is_err());
        assert!(validate_identifier(&"x".repeat(200)).is_err());
        assert!(validate_identifier("__fg_scratch").is_err());
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("amount"), "\"amount\"");
    }

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal("it's"), "it''s");
        assert_eq!(escape_literal("plain"), "plain");
    }

    #[test]
    fn test_validate_pattern() {
        assert_eq!(validate_pattern("^[a-z]+$").unwrap(), "^[a-z]+$");
        assert!(validate_pattern("([unclosed").is_err());
        assert!(validate_pattern(&"a".repeat(2_000)).is_err());
    }

    #[test]
    fn test_validate_predicate_accepts_boolean_expressions() {
        assert!(validate_predicate("price > 0 AND price < 1000000").is_ok());
        assert!(validate_predicate("updated_at IS NOT NULL").is_ok());
        assert!(validate_predicate("status IN ('active', 'pending')").is_ok());
    }

    #[test]
    fn test_validate_predicate_rejects_statements() {
        assert!(validate_predicate("1 = 1; DROP TABLE t").is_err());
        assert!(validate_predicate("DELETE FROM t").is_err());
        assert!(validate_predicate("a > 0 -- comment").is_err());
        assert!(validate_predicate("").is_err());
    }
}
