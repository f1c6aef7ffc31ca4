//! Approved-query execution.
//!
//! The pipeline fails at the first failing step: definition validation,
//! supply validation, type coercion, injection scan, substitution, and
//! only then execution against the datasource with a clamped row limit.
//! Success increments the query's usage count and writes an audit event;
//! an injection hit writes a critical audit event and never reaches the
//! database.

use super::{compile_template, extract_placeholders};
use crate::datasource::{Datasource, ResultSet, SqlValue};
use crate::models::{ApprovedQuery, ParamType, ParameterDef};
use crate::security::{classify, AuditEvent, AuditSink, InjectionVerdict, Severity};
use crate::storage::TenantSession;
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Hard ceiling on returned rows.
const MAX_ROW_LIMIT: usize = 1000;

/// Executes approved queries against a datasource.
pub struct QueryExecutor {
    datasource: Arc<dyn Datasource>,
    sink: Arc<dyn AuditSink>,
}

impl QueryExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(datasource: Arc<dyn Datasource>, sink: Arc<dyn AuditSink>) -> Self {
        Self { datasource, sink }
    }

    /// Runs the full execution pipeline for `query`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for undefined placeholders, missing
    ///   required values, or uncoercible values.
    /// - [`Error::InjectionSuspected`] when a string value matches the
    ///   injection classifier (a critical audit event is emitted; no
    ///   database call is made).
    /// - [`Error::External`] when the datasource fails.
    pub fn execute(
        &self,
        session: &TenantSession,
        query: &ApprovedQuery,
        supplied: &HashMap<String, Value>,
        limit: Option<usize>,
    ) -> Result<ResultSet> {
        let span = tracing::info_span!(
            "query.execute",
            query = %query.name,
            project = %session.project_id()
        );
        let _enter = span.enter();

        // 1. Every placeholder has a definition.
        let placeholders = extract_placeholders(&query.sql_template)?;
        let defs: HashMap<&str, &ParameterDef> = query
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), p))
            .collect();
        for name in &placeholders {
            if !defs.contains_key(name.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "parameter '{name}' is not defined"
                )));
            }
        }

        // 2, 3, 4. Resolve, coerce, and scan each bound parameter.
        let mut resolved: HashMap<String, SqlValue> = HashMap::new();
        for name in &placeholders {
            let def = defs[name.as_str()];
            let raw = supplied.get(name).or(def.default.as_ref());
            let Some(raw) = raw else {
                if def.required {
                    return Err(Error::InvalidInput(format!(
                        "required parameter '{name}' has no value"
                    )));
                }
                resolved.insert(name.clone(), SqlValue::Null);
                continue;
            };
            self.scan_for_injection(session, query, def, raw)?;
            let value = coerce_param(name, def.param_type, raw)?;
            resolved.insert(name.clone(), value);
        }

        // 5. Substitute to positional placeholders and order the values.
        let compiled = compile_template(&query.sql_template)?;
        let values: Vec<SqlValue> = compiled
            .binding_order
            .iter()
            .map(|name| resolved.remove(name).unwrap_or(SqlValue::Null))
            .collect();

        // 6. Execute with the clamped row limit.
        let row_limit = limit.unwrap_or(MAX_ROW_LIMIT).clamp(1, MAX_ROW_LIMIT);
        let result = self
            .datasource
            .execute_with_params(&compiled.sql, &values, row_limit)?;

        // 7. Audit and count usage.
        session.record_query_usage(query.id)?;
        self.sink.emit(
            &AuditEvent::new("query_executed", Severity::Info)
                .with_project(session.project_id())
                .with_query(query.id)
                .with_details(serde_json::json!({
                    "rows": result.rows.len(),
                    "row_limit": row_limit,
                })),
        );
        metrics::counter!("approved_query_executions_total").increment(1);
        Ok(result)
    }

    /// Step 4: string-typed values (and string-array elements) go through
    /// the injection classifier.
    fn scan_for_injection(
        &self,
        session: &TenantSession,
        query: &ApprovedQuery,
        def: &ParameterDef,
        raw: &Value,
    ) -> Result<()> {
        let mut texts: Vec<&str> = Vec::new();
        match def.param_type {
            ParamType::String => {
                if let Value::String(s) = raw {
                    texts.push(s);
                }
            },
            ParamType::StringArray => {
                if let Value::Array(items) = raw {
                    for item in items {
                        if let Value::String(s) = item {
                            texts.push(s);
                        }
                    }
                }
            },
            _ => return Ok(()),
        }

        for text in texts {
            if let InjectionVerdict::Suspicious {
                fingerprint,
                digest,
            } = classify(text)
            {
                self.sink.emit(
                    &AuditEvent::new("injection_blocked", Severity::Critical)
                        .with_project(session.project_id())
                        .with_query(query.id)
                        .with_details(serde_json::json!({
                            "parameter": def.name,
                            "fingerprint": &fingerprint,
                            "digest": &digest,
                        })),
                );
                metrics::counter!("injection_rejections_total").increment(1);
                tracing::warn!(
                    parameter = %def.name,
                    fingerprint = %fingerprint,
                    "injection suspected, execution blocked"
                );
                return Err(Error::InjectionSuspected {
                    parameter: def.name.clone(),
                    fingerprint,
                });
            }
        }
        Ok(())
    }
}

/// Step 3: coerces a supplied JSON value to its declared type's binding.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when the value cannot be coerced.
pub fn coerce_param(name: &str, param_type: ParamType, raw: &Value) -> Result<SqlValue> {
    let type_error = |detail: &str| {
        Error::InvalidInput(format!(
            "parameter '{name}' is not a valid {param_type}: {detail}"
        ))
    };

    match param_type {
        ParamType::String => match raw {
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            other => Err(type_error(&other.to_string())),
        },
        ParamType::Integer => match raw {
            Value::Number(n) if n.is_i64() => {
                Ok(SqlValue::Integer(n.as_i64().unwrap_or_default()))
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(SqlValue::Integer)
                .map_err(|e| type_error(&e.to_string())),
            other => Err(type_error(&other.to_string())),
        },
        ParamType::Decimal => match raw {
            Value::Number(n) => Ok(SqlValue::Real(n.as_f64().unwrap_or_default())),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(SqlValue::Real)
                .map_err(|e| type_error(&e.to_string())),
            other => Err(type_error(&other.to_string())),
        },
        ParamType::Boolean => match raw {
            Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" => Ok(SqlValue::Integer(1)),
                "false" | "0" => Ok(SqlValue::Integer(0)),
                other => Err(type_error(other)),
            },
            other => Err(type_error(&other.to_string())),
        },
        ParamType::Date => match raw {
            Value::String(s) => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|_| SqlValue::Text(s.clone()))
                .map_err(|e| type_error(&e.to_string())),
            other => Err(type_error(&other.to_string())),
        },
        ParamType::Timestamp => match raw {
            Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|_| SqlValue::Text(s.clone()))
                .map_err(|e| type_error(&e.to_string())),
            other => Err(type_error(&other.to_string())),
        },
        ParamType::Uuid => match raw {
            Value::String(s) => uuid::Uuid::parse_str(s)
                .map(|u| SqlValue::Text(u.to_string()))
                .map_err(|e| type_error(&e.to_string())),
            other => Err(type_error(&other.to_string())),
        },
        ParamType::StringArray => match raw {
            Value::Array(items) => {
                let mut strings = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => strings.push(s.clone()),
                        other => return Err(type_error(&other.to_string())),
                    }
                }
                // Arrays bind as JSON text; templates unpack them with
                // json_each.
                serde_json::to_string(&strings)
                    .map(SqlValue::Text)
                    .map_err(|e| type_error(&e.to_string()))
            },
            other => Err(type_error(&other.to_string())),
        },
        ParamType::IntegerArray => match raw {
            Value::Array(items) => {
                let mut ints = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Number(n) if n.is_i64() => {
                            ints.push(n.as_i64().unwrap_or_default());
                        },
                        Value::String(s) => {
                            ints.push(s.trim().parse::<i64>().map_err(|e| {
                                type_error(&e.to_string())
                            })?);
                        },
                        other => return Err(type_error(&other.to_string())),
                    }
                }
                serde_json::to_string(&ints)
                    .map(SqlValue::Text)
                    .map_err(|e| type_error(&e.to_string()))
            },
            other => Err(type_error(&other.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_string() {
        assert_eq!(
            coerce_param("p", ParamType::String, &json!("hello")).unwrap(),
            SqlValue::Text("hello".to_string())
        );
        assert!(coerce_param("p", ParamType::String, &json!(42)).is_err());
    }

    #[test]
    fn test_coerce_integer() {
        assert_eq!(
            coerce_param("p", ParamType::Integer, &json!(42)).unwrap(),
            SqlValue::Integer(42)
        );
        assert_eq!(
            coerce_param("p", ParamType::Integer, &json!("42")).unwrap(),
            SqlValue::Integer(42)
        );
        assert!(coerce_param("p", ParamType::Integer, &json!("4.2")).is_err());
    }

    #[test]
    fn test_coerce_boolean() {
        assert_eq!(
            coerce_param("p", ParamType::Boolean, &json!(true)).unwrap(),
            SqlValue::Integer(1)
        );
        assert_eq!(
            coerce_param("p", ParamType::Boolean, &json!("false")).unwrap(),
            SqlValue::Integer(0)
        );
        assert!(coerce_param("p", ParamType::Boolean, &json!("maybe")).is_err());
    }

    #[test]
    fn test_coerce_date_and_timestamp() {
        assert!(coerce_param("p", ParamType::Date, &json!("2026-01-31")).is_ok());
        assert!(coerce_param("p", ParamType::Date, &json!("31/01/2026")).is_err());
        assert!(
            coerce_param("p", ParamType::Timestamp, &json!("2026-01-31T12:00:00Z")).is_ok()
        );
        assert!(coerce_param("p", ParamType::Timestamp, &json!("noon")).is_err());
    }

    #[test]
    fn test_coerce_uuid() {
        assert!(coerce_param(
            "p",
            ParamType::Uuid,
            &json!("7f0c0d38-4a2d-4c5e-9e1f-0a8b9b1c2d3e")
        )
        .is_ok());
        assert!(coerce_param("p", ParamType::Uuid, &json!("not-a-uuid")).is_err());
    }

    #[test]
    fn test_coerce_arrays_bind_as_json_text() {
        let value = coerce_param("p", ParamType::StringArray, &json!(["a", "b"])).unwrap();
        assert_eq!(value, SqlValue::Text("[\"a\",\"b\"]".to_string()));

        let value = coerce_param("p", ParamType::IntegerArray, &json!([1, "2"])).unwrap();
        assert_eq!(value, SqlValue::Text("[1,2]".to_string()));

        assert!(coerce_param("p", ParamType::IntegerArray, &json!(["x"])).is_err());
        assert!(coerce_param("p", ParamType::StringArray, &json!("notarray")).is_err());
    }
}
