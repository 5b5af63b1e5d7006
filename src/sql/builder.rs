//! Statement builder.
//!
//! Turns a table name plus column-keyed values into parameterized SQL. Values
//! never appear in the generated text; they travel as positional arguments
//! whose order matches the markers.

use super::validator;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, PlaceholderStyle, QuerySpec, Statement, Value, ValueMap};
use tracing::warn;

/// Kind of data-modifying statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Name used when a whole-table mutation is refused.
    pub fn full_table_operation(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE without WHERE",
            Self::Delete => "DELETE without WHERE",
        }
    }

    pub fn full_table_reason(&self) -> &'static str {
        match self {
            Self::Insert => "",
            Self::Update => "This will update all rows in the table",
            Self::Delete => "This will delete all rows from the table",
        }
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds statements in the marker syntax of one backend.
#[derive(Debug, Clone, Copy)]
pub struct StatementBuilder {
    style: PlaceholderStyle,
}

impl StatementBuilder {
    pub fn new(db_type: DatabaseType) -> Self {
        Self {
            style: db_type.placeholder_style(),
        }
    }

    pub fn placeholder_style(&self) -> PlaceholderStyle {
        self.style
    }

    /// `INSERT INTO <table> (c1, c2) VALUES (?, ?)`.
    pub fn build_insert(&self, table: &str, values: &ValueMap) -> DbResult<Statement> {
        check_identifier(table, "table")?;
        check_values(values)?;

        let sql = self.insert_sql(table, values.keys());
        Ok(Statement::new(sql, values.values().cloned().collect()))
    }

    /// One INSERT text and one argument vector per row.
    ///
    /// The first row fixes the column set and order; every other row must
    /// carry exactly the same keys and is reordered to match.
    pub fn build_insert_all(
        &self,
        table: &str,
        rows: &[ValueMap],
    ) -> DbResult<(String, Vec<Vec<Value>>)> {
        check_identifier(table, "table")?;
        let first = rows
            .first()
            .ok_or_else(|| DbError::invalid_input("Batch insert requires at least one row"))?;
        check_values(first)?;

        let columns: Vec<&str> = first.keys().collect();
        let mut arg_rows = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DbError::invalid_input(format!(
                    "Row {} has {} columns, expected {}",
                    idx,
                    row.len(),
                    columns.len()
                )));
            }
            let args = columns
                .iter()
                .map(|col| {
                    row.get(col).cloned().ok_or_else(|| {
                        DbError::invalid_input(format!("Row {} is missing column '{}'", idx, col))
                    })
                })
                .collect::<DbResult<Vec<_>>>()?;
            arg_rows.push(args);
        }

        Ok((self.insert_sql(table, columns.into_iter()), arg_rows))
    }

    /// `UPDATE <table> SET c1 = ?, c2 = ? [WHERE a = ? AND b = ?]`.
    ///
    /// Without where-values the statement targets every row of the table.
    pub fn build_update(
        &self,
        table: &str,
        values: &ValueMap,
        where_values: Option<&ValueMap>,
    ) -> DbResult<Statement> {
        check_identifier(table, "table")?;
        check_values(values)?;

        let assignments = values
            .keys()
            .enumerate()
            .map(|(i, col)| format!("{} = {}", col, self.style.marker(i)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("UPDATE {} SET {}", table, assignments);
        let mut args: Vec<Value> = values.values().cloned().collect();

        match where_values.filter(|w| !w.is_empty()) {
            Some(where_values) => {
                check_keys(where_values)?;
                let (fragment, where_args) = self.build_where_equals(where_values, args.len());
                sql.push_str(" WHERE ");
                sql.push_str(&fragment);
                args.extend(where_args);
            }
            None => warn!(table = %table, "UPDATE without WHERE affects every row"),
        }

        Ok(Statement::new(sql, args))
    }

    /// `DELETE FROM <table> [WHERE a = ? AND b = ?]`.
    pub fn build_delete(&self, table: &str, where_values: Option<&ValueMap>) -> DbResult<Statement> {
        check_identifier(table, "table")?;

        let mut sql = format!("DELETE FROM {}", table);
        let mut args = Vec::new();
        match where_values.filter(|w| !w.is_empty()) {
            Some(where_values) => {
                check_keys(where_values)?;
                let (fragment, where_args) = self.build_where_equals(where_values, 0);
                sql.push_str(" WHERE ");
                sql.push_str(&fragment);
                args = where_args;
            }
            None => warn!(table = %table, "DELETE without WHERE affects every row"),
        }

        Ok(Statement::new(sql, args))
    }

    /// Build the `a = ? AND b = ?` fragment.
    ///
    /// `first_index` is the 0-based position of the first marker within the
    /// enclosing statement; it only matters for numbered markers.
    pub fn build_where_equals(
        &self,
        where_values: &ValueMap,
        first_index: usize,
    ) -> (String, Vec<Value>) {
        let fragment = where_values
            .keys()
            .enumerate()
            .map(|(i, col)| format!("{} = {}", col, self.style.marker(first_index + i)))
            .collect::<Vec<_>>()
            .join(" AND ");
        (fragment, where_values.values().cloned().collect())
    }

    /// `SELECT * FROM <table> [WHERE a = ? AND ...]`.
    pub fn build_select_where(&self, table: &str, where_values: &ValueMap) -> DbResult<Statement> {
        check_identifier(table, "table")?;
        check_keys(where_values)?;

        let mut sql = format!("SELECT * FROM {}", table);
        let (fragment, args) = self.build_where_equals(where_values, 0);
        if !fragment.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&fragment);
        }
        Ok(Statement::new(sql, args))
    }

    /// Assemble a full SELECT.
    ///
    /// Clauses are validated first; empty clauses are omitted. The where
    /// clause is caller SQL and must already use this backend's markers.
    pub fn build_select(&self, spec: &QuerySpec) -> DbResult<Statement> {
        let group_by = clause(&spec.group_by);
        let having = clause(&spec.having);
        let limit = clause(&spec.limit);
        validator::validate(group_by, having, limit)?;
        check_identifier(&spec.table, "table")?;

        let mut sql = String::from("SELECT ");
        if spec.distinct {
            sql.push_str("DISTINCT ");
        }
        let columns = spec.projected_columns();
        if columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&columns.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&spec.table);

        append_clause(&mut sql, "WHERE", clause(&spec.where_clause));
        append_clause(&mut sql, "GROUP BY", group_by);
        append_clause(&mut sql, "HAVING", having);
        append_clause(&mut sql, "ORDER BY", clause(&spec.order_by));
        if !limit.is_empty() {
            sql.push_str(" LIMIT ");
            sql.push_str(&self.render_limit(limit));
        }

        Ok(Statement::new(sql, spec.where_args.clone()))
    }

    /// PostgreSQL has no `LIMIT offset,count` form.
    fn render_limit(&self, limit: &str) -> String {
        match (self.style, validator::parse_limit(limit)) {
            (PlaceholderStyle::Numbered, Some((Some(offset), count))) => {
                format!("{} OFFSET {}", count, offset)
            }
            _ => limit.trim().to_string(),
        }
    }

    fn insert_sql<'a>(&self, table: &str, columns: impl Iterator<Item = &'a str>) -> String {
        let columns: Vec<&str> = columns.collect();
        let markers = (0..columns.len())
            .map(|i| self.style.marker(i))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            markers
        )
    }
}

fn clause(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn append_clause(sql: &mut String, keyword: &str, body: &str) {
    if !body.is_empty() {
        sql.push(' ');
        sql.push_str(keyword);
        sql.push(' ');
        sql.push_str(body);
    }
}

fn check_values(values: &ValueMap) -> DbResult<()> {
    if values.is_empty() {
        return Err(DbError::invalid_input("At least one column value is required"));
    }
    check_keys(values)
}

fn check_keys(values: &ValueMap) -> DbResult<()> {
    values
        .keys()
        .try_for_each(|column| check_identifier(column, "column"))
}

/// Accept plain identifiers (`[A-Za-z0-9_.$]`) or fully quoted ones.
pub fn check_identifier(name: &str, what: &str) -> DbResult<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(DbError::invalid_input(format!(
            "Invalid {} name: '{}'",
            what, name
        )))
    }
}

pub fn is_valid_identifier(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    for quote in ['"', '`'] {
        if let Some(inner) = name
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return !inner.is_empty() && !inner.contains(quote);
        }
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    fn sqlite() -> StatementBuilder {
        StatementBuilder::new(DatabaseType::SQLite)
    }

    fn postgres() -> StatementBuilder {
        StatementBuilder::new(DatabaseType::PostgreSQL)
    }

    #[test]
    fn test_insert_columns_match_args() {
        let values = ValueMap::new()
            .with("emp_id", 1013)
            .with("name", "JDBCUtil")
            .with("salary", 10000);
        let stmt = sqlite().build_insert("emp_test", &values).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO emp_test (emp_id, name, salary) VALUES (?, ?, ?)"
        );
        assert_eq!(
            stmt.args,
            vec![Value::Int(1013), Value::from("JDBCUtil"), Value::Int(10000)]
        );
    }

    #[test]
    fn test_insert_numbered_markers() {
        let values = ValueMap::new().with("a", 1).with("b", 2);
        let stmt = postgres().build_insert("t", &values).unwrap();
        assert_eq!(stmt.sql, "INSERT INTO t (a, b) VALUES ($1, $2)");
    }

    #[test]
    fn test_insert_empty_values_rejected() {
        let err = sqlite().build_insert("t", &ValueMap::new()).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_insert_bad_identifiers_rejected() {
        let values = ValueMap::new().with("a", 1);
        assert!(sqlite().build_insert("t; DROP TABLE x", &values).is_err());
        let bad_key = ValueMap::new().with("a) VALUES (1); --", 1);
        assert!(sqlite().build_insert("t", &bad_key).is_err());
    }

    #[test]
    fn test_update_with_where() {
        let values = ValueMap::new().with("salary", 12000).with("job", "lead");
        let where_values = ValueMap::new().with("emp_id", 1013).with("dept", 10);
        let stmt = sqlite()
            .build_update("emp_test", &values, Some(&where_values))
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE emp_test SET salary = ?, job = ? WHERE emp_id = ? AND dept = ?"
        );
        assert_eq!(
            stmt.args,
            vec![
                Value::Int(12000),
                Value::from("lead"),
                Value::Int(1013),
                Value::Int(10)
            ]
        );
    }

    #[test]
    fn test_update_numbered_where_continues_numbering() {
        let values = ValueMap::new().with("a", 1).with("b", 2);
        let where_values = ValueMap::new().with("id", 3);
        let stmt = postgres()
            .build_update("t", &values, Some(&where_values))
            .unwrap();
        assert_eq!(stmt.sql, "UPDATE t SET a = $1, b = $2 WHERE id = $3");
    }

    #[test]
    fn test_update_without_where_targets_whole_table() {
        let values = ValueMap::new().with("a", 1);
        let none = sqlite().build_update("t", &values, None).unwrap();
        let empty = sqlite()
            .build_update("t", &values, Some(&ValueMap::new()))
            .unwrap();
        assert_eq!(none.sql, "UPDATE t SET a = ?");
        assert_eq!(none, empty);
    }

    #[test]
    fn test_delete() {
        let where_values = ValueMap::new().with("emp_id", 1013);
        let stmt = sqlite().build_delete("emp_test", Some(&where_values)).unwrap();
        assert_eq!(stmt.sql, "DELETE FROM emp_test WHERE emp_id = ?");
        assert_eq!(stmt.args, vec![Value::Int(1013)]);

        let all = sqlite().build_delete("emp_test", None).unwrap();
        assert_eq!(all.sql, "DELETE FROM emp_test");
        assert!(all.args.is_empty());
    }

    #[test]
    fn test_insert_all_reorders_rows() {
        let rows = vec![
            ValueMap::new().with("a", 1).with("b", "x"),
            ValueMap::new().with("b", "y").with("a", 2),
        ];
        let (sql, args) = sqlite().build_insert_all("t", &rows).unwrap();
        assert_eq!(sql, "INSERT INTO t (a, b) VALUES (?, ?)");
        assert_eq!(args[1], vec![Value::Int(2), Value::from("y")]);
    }

    #[test]
    fn test_insert_all_rejects_mismatched_rows() {
        let rows = vec![
            ValueMap::new().with("a", 1).with("b", 2),
            ValueMap::new().with("a", 1).with("c", 2),
        ];
        assert!(sqlite().build_insert_all("t", &rows).is_err());
        assert!(sqlite().build_insert_all("t", &[]).is_err());
    }

    #[test]
    fn test_select_all_clauses() {
        let spec = QuerySpec::new("emp_test")
            .distinct(true)
            .columns(["job", "count(*) AS n"])
            .filter("salary > ?", [5000])
            .group_by("job")
            .having("count(*) > 1")
            .order_by("job")
            .limit("0,10");
        let stmt = sqlite().build_select(&spec).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT DISTINCT job, count(*) AS n FROM emp_test WHERE salary > ? \
             GROUP BY job HAVING count(*) > 1 ORDER BY job LIMIT 0,10"
        );
        assert_eq!(stmt.args, vec![Value::Int(5000)]);
    }

    #[test]
    fn test_select_postgres_limit_offset() {
        let spec = QuerySpec::new("t").limit("20, 10");
        let stmt = postgres().build_select(&spec).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM t LIMIT 10 OFFSET 20");

        let spec = QuerySpec::new("t").limit(" 5 ");
        assert_eq!(postgres().build_select(&spec).unwrap().sql, "SELECT * FROM t LIMIT 5");
    }

    #[test]
    fn test_select_omits_empty_clauses() {
        let spec = QuerySpec::new("t")
            .columns(["", "  "])
            .group_by("")
            .order_by("");
        assert_eq!(sqlite().build_select(&spec).unwrap().sql, "SELECT * FROM t");
    }

    #[test]
    fn test_select_validation_runs_first() {
        let spec = QuerySpec::new("t").having("count(*) > 1");
        let err = sqlite().build_select(&spec).unwrap_err();
        assert!(matches!(
            err,
            DbError::Validation(ValidationError::InvalidClauseCombination { .. })
        ));

        let spec = QuerySpec::new("t").limit("abc");
        let err = sqlite().build_select(&spec).unwrap_err();
        assert!(matches!(
            err,
            DbError::Validation(ValidationError::InvalidLimitSyntax { .. })
        ));
    }

    #[test]
    fn test_select_postgres_overflowing_offset_rejected() {
        let spec = QuerySpec::new("t").limit("99999999999999999999999,10");
        let err = postgres().build_select(&spec).unwrap_err();
        assert!(matches!(
            err,
            DbError::Validation(ValidationError::InvalidLimitSyntax { .. })
        ));

        let spec = QuerySpec::new("t").limit("\u{665},\u{661}\u{660}");
        assert!(postgres().build_select(&spec).is_err());
    }

    #[test]
    fn test_select_where() {
        let where_values = ValueMap::new().with("name", "JDBCUtil").with("job", "dev");
        let stmt = postgres().build_select_where("emp_test", &where_values).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM emp_test WHERE name = $1 AND job = $2"
        );
        let all = sqlite().build_select_where("emp_test", &ValueMap::new()).unwrap();
        assert_eq!(all.sql, "SELECT * FROM emp_test");
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_valid_identifier("emp_test"));
        assert!(is_valid_identifier("public.emp_test"));
        assert!(is_valid_identifier("\"Order Details\""));
        assert!(is_valid_identifier("`order`"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("\"\""));
        assert!(!is_valid_identifier("a b"));
        assert!(!is_valid_identifier("\"a\"b\""));
    }
}
