//! Caller-facing table access API.
//!
//! [`Database`] ties the statement builder to the execution engine: callers
//! hand over a table name and column-keyed values and get back affected row
//! counts or decoded rows.
//!
//! ```no_run
//! use table_gateway::{Database, DatabaseConfig, ValueMap};
//!
//! # async fn demo() -> table_gateway::error::DbResult<()> {
//! let db = Database::new(DatabaseConfig::parse("sqlite:emp.db?mode=rwc")?)?;
//! let values = ValueMap::new().with("emp_id", 7369).with("name", "SMITH");
//! db.insert("emp_test", &values).await?;
//! let rows = db
//!     .query_where("emp_test", &ValueMap::new().with("emp_id", 7369))
//!     .await?;
//! assert_eq!(rows.len(), 1);
//! db.close().await;
//! # Ok(())
//! # }
//! ```

use crate::config::DatabaseConfig;
use crate::db::connection::SqlxConnectionManager;
use crate::db::executor::QueryExecutor;
use crate::db::pool::{Pool, PoolStatus};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QuerySpec, Row, Value, ValueMap};
use crate::sql::{MutationKind, StatementBuilder};
use tracing::info;

/// Behaviour switches for a [`Database`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Refuse UPDATE/DELETE without where-values instead of touching every row.
    pub guard_full_table_mutations: bool,
}

/// Table-oriented access to one database through one connection pool.
///
/// Cloning is cheap and every clone shares the pool.
#[derive(Debug, Clone)]
pub struct Database {
    executor: QueryExecutor,
    builder: StatementBuilder,
    options: DatabaseOptions,
    db_type: DatabaseType,
}

impl Database {
    /// Create a database handle. No connection is opened until first use.
    pub fn new(config: DatabaseConfig) -> DbResult<Self> {
        Self::with_options(config, DatabaseOptions::default())
    }

    pub fn with_options(config: DatabaseConfig, options: DatabaseOptions) -> DbResult<Self> {
        let manager = SqlxConnectionManager::new(&config)?;
        let pool = Pool::new(manager, config.pool_options.to_pool_config())?;
        Ok(Self::from_pool(pool, options))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool<SqlxConnectionManager>, options: DatabaseOptions) -> Self {
        let db_type = pool.manager().db_type();
        Self {
            executor: QueryExecutor::new(pool),
            builder: StatementBuilder::new(db_type),
            options,
            db_type,
        }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn options(&self) -> DatabaseOptions {
        self.options
    }

    pub fn builder(&self) -> &StatementBuilder {
        &self.builder
    }

    pub fn pool(&self) -> &Pool<SqlxConnectionManager> {
        self.executor.pool()
    }

    pub fn status(&self) -> PoolStatus {
        self.pool().status()
    }

    /// Insert one row. Returns the affected row count.
    pub async fn insert(&self, table: &str, values: &ValueMap) -> DbResult<u64> {
        let statement = self.builder.build_insert(table, values)?;
        let rows_affected = self
            .executor
            .execute_mutation(&statement.sql, &statement.args)
            .await?;
        log_mutation(MutationKind::Insert, table, rows_affected);
        Ok(rows_affected)
    }

    /// Insert many rows with one statement text in one transaction.
    ///
    /// Every row must carry the same columns as the first one. Either all
    /// rows are inserted or none are.
    pub async fn insert_all(&self, table: &str, rows: &[ValueMap]) -> DbResult<u64> {
        let (sql, arg_rows) = self.builder.build_insert_all(table, rows)?;
        let rows_affected = self.executor.execute_batch(&sql, &arg_rows).await?;
        log_mutation(MutationKind::Insert, table, rows_affected);
        Ok(rows_affected)
    }

    /// Update the rows matching every where-value.
    ///
    /// `None` or an empty map updates every row, unless the full-table guard
    /// is on.
    pub async fn update(
        &self,
        table: &str,
        values: &ValueMap,
        where_values: Option<&ValueMap>,
    ) -> DbResult<u64> {
        self.check_full_table(MutationKind::Update, where_values)?;
        let statement = self.builder.build_update(table, values, where_values)?;
        let rows_affected = self
            .executor
            .execute_mutation(&statement.sql, &statement.args)
            .await?;
        log_mutation(MutationKind::Update, table, rows_affected);
        Ok(rows_affected)
    }

    /// Delete the rows matching every where-value.
    ///
    /// `None` or an empty map deletes every row, unless the full-table guard
    /// is on.
    pub async fn delete(&self, table: &str, where_values: Option<&ValueMap>) -> DbResult<u64> {
        self.check_full_table(MutationKind::Delete, where_values)?;
        let statement = self.builder.build_delete(table, where_values)?;
        let rows_affected = self
            .executor
            .execute_mutation(&statement.sql, &statement.args)
            .await?;
        log_mutation(MutationKind::Delete, table, rows_affected);
        Ok(rows_affected)
    }

    /// Run caller-written SQL as a query.
    ///
    /// The text is sent as is; never build it from untrusted input.
    pub async fn query_raw(&self, sql: &str) -> DbResult<Vec<Row>> {
        let rows = self.executor.execute_query(sql, &[]).await?;
        info!(rows = rows.len(), "Raw query complete");
        Ok(rows)
    }

    /// `SELECT * FROM table WHERE a = ? AND b = ?` over the where-values.
    pub async fn query_where(&self, table: &str, where_values: &ValueMap) -> DbResult<Vec<Row>> {
        let statement = self.builder.build_select_where(table, where_values)?;
        let rows = self
            .executor
            .execute_query(&statement.sql, &statement.args)
            .await?;
        log_query(table, rows.len());
        Ok(rows)
    }

    /// `SELECT * FROM table WHERE <where_clause>`.
    ///
    /// `where_clause` uses this backend's positional markers; an empty clause
    /// selects every row.
    pub async fn query_with(
        &self,
        table: &str,
        where_clause: &str,
        where_args: &[Value],
    ) -> DbResult<Vec<Row>> {
        let spec = QuerySpec::new(table).filter(where_clause, where_args.iter().cloned());
        self.query(&spec).await
    }

    /// Run a full SELECT request.
    ///
    /// Clause combinations are validated before any database contact.
    pub async fn query(&self, spec: &QuerySpec) -> DbResult<Vec<Row>> {
        let statement = self.builder.build_select(spec)?;
        let rows = self
            .executor
            .execute_query(&statement.sql, &statement.args)
            .await?;
        log_query(&spec.table, rows.len());
        Ok(rows)
    }

    /// Run caller-written SQL as a mutation inside a transaction.
    ///
    /// The text is sent as is; never build it from untrusted input. `args`
    /// bind to the statement's positional markers.
    pub async fn execute_raw(&self, sql: &str, args: &[Value]) -> DbResult<u64> {
        let rows_affected = self.executor.execute_mutation(sql, args).await?;
        info!(rows_affected, "Raw statement complete");
        Ok(rows_affected)
    }

    /// Shut the pool down. Later calls fail with [`DbError::PoolClosed`].
    pub async fn close(&self) {
        self.pool().shutdown().await;
    }

    fn check_full_table(&self, kind: MutationKind, where_values: Option<&ValueMap>) -> DbResult<()> {
        let unrestricted = where_values.is_none_or(ValueMap::is_empty);
        if self.options.guard_full_table_mutations && unrestricted {
            return Err(DbError::dangerous_operation_blocked(
                kind.full_table_operation(),
                kind.full_table_reason(),
            ));
        }
        Ok(())
    }
}

fn log_mutation(kind: MutationKind, table: &str, rows_affected: u64) {
    info!(operation = %kind, table = %table, rows_affected, "Mutation complete");
}

fn log_query(table: &str, rows: usize) {
    info!(table = %table, rows, "Query complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guarded() -> Database {
        let config = DatabaseConfig::parse("sqlite::memory:").unwrap();
        Database::with_options(
            config,
            DatabaseOptions {
                guard_full_table_mutations: true,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_new_is_lazy() {
        let db = Database::new(DatabaseConfig::parse("sqlite::memory:").unwrap()).unwrap();
        assert_eq!(db.db_type(), DatabaseType::SQLite);
        assert_eq!(db.status().total, 0);
        assert_eq!(db.status().max, 15);
    }

    #[tokio::test]
    async fn test_guard_blocks_unrestricted_delete() {
        let db = guarded();
        let err = db.delete("emp_test", None).await.unwrap_err();
        assert!(matches!(err, DbError::DangerousOperationBlocked { .. }));

        let err = db
            .delete("emp_test", Some(&ValueMap::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("DELETE without WHERE"));
        // Refused before the pool was touched
        assert_eq!(db.status().total, 0);
    }

    #[tokio::test]
    async fn test_guard_blocks_unrestricted_update() {
        let db = guarded();
        let values = ValueMap::new().with("job", "CLERK");
        let err = db.update("emp_test", &values, None).await.unwrap_err();
        assert!(err.to_string().contains("UPDATE without WHERE"));
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_invalid_clauses_rejected_before_connecting() {
        let db = Database::new(DatabaseConfig::parse("sqlite::memory:").unwrap()).unwrap();
        let err = db
            .query(&QuerySpec::new("emp_test").having("COUNT(*) > 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
        assert_eq!(db.pool().state(), crate::db::pool::PoolState::Uninitialized);
    }
}
