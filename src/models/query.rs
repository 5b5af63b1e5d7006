//! Query-related data models.
//!
//! This module defines the SELECT request shape and the statement produced by
//! the builder.

use super::value::Value;
use serde::Serialize;

/// A full SELECT request.
///
/// Every optional clause is a caller-owned SQL fragment; empty strings are
/// treated the same as absent clauses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub table: String,
    pub distinct: bool,
    /// Projected columns. `None` (or only blank entries) selects `*`.
    pub columns: Option<Vec<String>>,
    /// Filter expression containing positional markers.
    pub where_clause: Option<String>,
    /// Arguments for the markers in `where_clause`, in order.
    pub where_args: Vec<Value>,
    pub group_by: Option<String>,
    /// Only legal together with `group_by`.
    pub having: Option<String>,
    pub order_by: Option<String>,
    /// `count` or `offset,count`.
    pub limit: Option<String>,
}

impl QuerySpec {
    /// Create a `SELECT * FROM table` request.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    /// Set the projected columns.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Set the filter expression and its arguments.
    pub fn filter<I, V>(mut self, where_clause: impl Into<String>, where_args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.where_clause = Some(where_clause.into());
        self.where_args = where_args.into_iter().map(Into::into).collect();
        self
    }

    pub fn group_by(mut self, group_by: impl Into<String>) -> Self {
        self.group_by = Some(group_by.into());
        self
    }

    pub fn having(mut self, having: impl Into<String>) -> Self {
        self.having = Some(having.into());
        self
    }

    pub fn order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn limit(mut self, limit: impl Into<String>) -> Self {
        self.limit = Some(limit.into());
        self
    }

    /// Projected columns with blank entries removed.
    pub fn projected_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .flatten()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect()
    }
}

/// SQL text plus its positional arguments.
///
/// The number of markers in `sql` equals `args.len()`, and `args[i]` binds to
/// the i-th marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }

    /// A statement without arguments.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_spec_defaults() {
        let spec = QuerySpec::new("emp_test");
        assert_eq!(spec.table, "emp_test");
        assert!(!spec.distinct);
        assert!(spec.columns.is_none());
        assert!(spec.where_args.is_empty());
        assert!(spec.projected_columns().is_empty());
    }

    #[test]
    fn test_query_spec_builder() {
        let spec = QuerySpec::new("emp_test")
            .distinct(true)
            .columns(["job", " ", "count(*)"])
            .filter("salary > ?", [5000])
            .group_by("job")
            .having("count(*) > 1")
            .order_by("job DESC")
            .limit("0,10");

        assert!(spec.distinct);
        assert_eq!(spec.projected_columns(), vec!["job", "count(*)"]);
        assert_eq!(spec.where_clause.as_deref(), Some("salary > ?"));
        assert_eq!(spec.where_args, vec![Value::Int(5000)]);
        assert_eq!(spec.limit.as_deref(), Some("0,10"));
    }

    #[test]
    fn test_statement_raw_has_no_args() {
        let stmt = Statement::raw("SELECT 1");
        assert!(stmt.args.is_empty());
        assert_eq!(stmt.sql, "SELECT 1");
    }
}
