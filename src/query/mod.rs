//! Parameterised-query templates.
//!
//! Templates carry `{{identifier}}` placeholders in value positions.
//! Compilation replaces every distinct name with one positional
//! placeholder (`?N` in the shipped `SQLite` dialect), reusing the same
//! `?N` for repeated occurrences, and returns the names in binding order.

mod runtime;

pub use runtime::QueryExecutor;

use crate::models::ParameterDef;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// `{{identifier}}` with the identifier rules from the template syntax.
static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_]*)\}\}").unwrap_or_else(|_| unreachable!())
});

/// Any `{{...}}` span, used to catch malformed placeholder bodies.
static ANY_BRACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{.*?\}\}").unwrap_or_else(|_| unreachable!()));

/// Keywords after which a placeholder would be an identifier position
/// (table or column name), which is rejected at save time.
const IDENTIFIER_POSITION_KEYWORDS: &[&str] = &["from", "join", "into", "update", "table"];

/// A compiled template ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTemplate {
    /// SQL with positional placeholders.
    pub sql: String,
    /// Distinct parameter names in binding order: the value array for
    /// execution is built in this order.
    pub binding_order: Vec<String>,
}

/// Extracts the distinct placeholder names of a template, in order of
/// first occurrence.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for a malformed placeholder body.
pub fn extract_placeholders(template: &str) -> Result<Vec<String>> {
    // Every {{...}} span must be a well-formed identifier.
    for span in ANY_BRACE_RE.find_iter(template) {
        if !PLACEHOLDER_RE.is_match(span.as_str()) {
            return Err(Error::InvalidInput(format!(
                "malformed placeholder {}",
                span.as_str()
            )));
        }
    }
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for capture in PLACEHOLDER_RE.captures_iter(template) {
        let name = capture[1].to_string();
        if seen.insert(name.clone()) {
            names.push(name);
        }
    }
    Ok(names)
}

/// Validates a template at save time: placeholder syntax, value positions
/// only, every placeholder defined, and the statement itself well formed.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] on any violation.
pub fn validate_template(template: &str, parameters: &[ParameterDef]) -> Result<()> {
    validate_statement(template)?;
    let names = extract_placeholders(template)?;
    let defined: HashSet<&str> = parameters.iter().map(|p| p.name.as_str()).collect();
    for name in &names {
        if !defined.contains(name.as_str()) {
            return Err(Error::InvalidInput(format!(
                "placeholder '{{{{{name}}}}}' has no parameter definition"
            )));
        }
    }
    reject_identifier_positions(template)?;
    Ok(())
}

/// Rejects placeholders in identifier positions (after FROM, JOIN, a dot,
/// and similar).
fn reject_identifier_positions(template: &str) -> Result<()> {
    for found in PLACEHOLDER_RE.find_iter(template) {
        let before = template[..found.start()].trim_end();
        if before.is_empty() {
            return Err(Error::InvalidInput(
                "placeholder cannot start the statement".to_string(),
            ));
        }
        if before.ends_with('.') {
            return Err(Error::InvalidInput(
                "placeholder in identifier position".to_string(),
            ));
        }
        let last_word = before
            .rsplit(|c: char| !c.is_alphanumeric() && c != '_')
            .find(|w| !w.is_empty())
            .unwrap_or_default()
            .to_lowercase();
        if IDENTIFIER_POSITION_KEYWORDS.contains(&last_word.as_str()) {
            return Err(Error::InvalidInput(format!(
                "placeholder in identifier position after '{last_word}'"
            )));
        }
    }
    Ok(())
}

/// Compiles a template to positional SQL. Repeated occurrences of one
/// name reuse the same positional placeholder.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for malformed placeholders.
pub fn compile_template(template: &str) -> Result<CompiledTemplate> {
    let binding_order = extract_placeholders(template)?;
    let mut sql = template.to_string();
    for (index, name) in binding_order.iter().enumerate() {
        let placeholder = format!("{{{{{name}}}}}");
        let positional = format!("?{}", index + 1);
        sql = sql.replace(&placeholder, &positional);
    }
    Ok(CompiledTemplate {
        sql,
        binding_order,
    })
}

/// Validates that SQL is a single, balanced statement.
///
/// Checks: non-empty, starts with SELECT or WITH, balanced single and
/// double quotes and parentheses, and no second statement after a
/// semicolon.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] on any violation.
pub fn validate_statement(sql: &str) -> Result<()> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("empty sql".to_string()));
    }
    let lower = trimmed.to_lowercase();
    if !lower.starts_with("select") && !lower.starts_with("with") {
        return Err(Error::InvalidInput(
            "statement must be a SELECT".to_string(),
        ));
    }

    let mut depth: i64 = 0;
    let mut in_single = false;
    let mut in_double = false;
    let mut statement_ended = false;
    for c in trimmed.chars() {
        if statement_ended && !c.is_whitespace() {
            return Err(Error::InvalidInput(
                "multiple statements are not allowed".to_string(),
            ));
        }
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '(' if !in_single && !in_double => depth += 1,
            ')' if !in_single && !in_double => {
                depth -= 1;
                if depth < 0 {
                    return Err(Error::InvalidInput(
                        "unbalanced parentheses".to_string(),
                    ));
                }
            },
            ';' if !in_single && !in_double => statement_ended = true,
            _ => {},
        }
    }
    if in_single || in_double {
        return Err(Error::InvalidInput("unbalanced quotes".to_string()));
    }
    if depth != 0 {
        return Err(Error::InvalidInput("unbalanced parentheses".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParamType;

    fn param(name: &str) -> ParameterDef {
        ParameterDef {
            name: name.to_string(),
            param_type: ParamType::String,
            description: None,
            required: true,
            default: None,
        }
    }

    #[test]
    fn test_extract_placeholders_ordered_distinct() {
        let names = extract_placeholders(
            "SELECT * FROM t WHERE a = {{x}} AND b = {{y}} AND c = {{x}}",
        )
        .unwrap();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn test_extract_rejects_malformed() {
        assert!(extract_placeholders("SELECT {{9bad}}").is_err());
        assert!(extract_placeholders("SELECT {{a b}}").is_err());
        assert!(extract_placeholders("SELECT {{}}").is_err());
    }

    #[test]
    fn test_compile_reuses_positional_for_repeats() {
        let compiled = compile_template(
            "SELECT * FROM orders WHERE from_id = {{uid}} OR to_id = {{uid}} AND x = {{other}}",
        )
        .unwrap();
        assert_eq!(compiled.binding_order, vec!["uid", "other"]);
        assert_eq!(compiled.sql.matches("?1").count(), 2);
        assert_eq!(compiled.sql.matches("?2").count(), 1);
        assert!(!compiled.sql.contains("{{"));
    }

    #[test]
    fn test_validate_template_undefined_placeholder() {
        let err = validate_template(
            "SELECT * FROM t WHERE a = {{missing}}",
            &[param("present")],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_validate_template_identifier_positions_rejected() {
        for template in [
            "SELECT * FROM {{table}}",
            "SELECT * FROM users JOIN {{other}} ON 1=1",
            "SELECT t.{{column}} FROM t",
        ] {
            let err = validate_template(template, &[param("table"), param("other"), param("column")])
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{template}");
        }
    }

    #[test]
    fn test_validate_template_value_positions_accepted() {
        validate_template(
            "SELECT * FROM orders WHERE email = {{email}} AND total > {{min_total}}",
            &[param("email"), param("min_total")],
        )
        .unwrap();
    }

    #[test]
    fn test_validate_statement() {
        validate_statement("SELECT 1").unwrap();
        validate_statement("WITH x AS (SELECT 1) SELECT * FROM x").unwrap();
        validate_statement("SELECT 1;").unwrap();

        assert!(validate_statement("").is_err());
        assert!(validate_statement("DELETE FROM t").is_err());
        assert!(validate_statement("SELECT 1; SELECT 2").is_err());
        assert!(validate_statement("SELECT 'unterminated").is_err());
        assert!(validate_statement("SELECT (1").is_err());
        assert!(validate_statement("SELECT 1)").is_err());
    }

    #[test]
    fn test_semicolon_inside_string_is_fine() {
        validate_statement("SELECT 'a;b' AS x").unwrap();
    }
}
