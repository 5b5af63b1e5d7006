//! Statement execution engine.
//!
//! Runs statements on pooled connections:
//! - Mutations run inside a transaction that commits on success and rolls
//!   back on any failure
//! - Batches run every argument set in one transaction
//! - Queries stream the cursor to the end and decode each row
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific query and write operations
//! - `postgres`: PostgreSQL-specific query and write operations
//! - `sqlite`: SQLite-specific query and write operations
//!
//! Each submodule provides identical functionality adapted to the database's type system.
//! The connection is always returned to the pool before the result is.

use crate::db::connection::{DbConnection, SqlxConnectionManager};
use crate::db::pool::Pool;
use crate::db::types::RowToValues;
use crate::error::{DbError, DbResult};
use crate::models::{PlaceholderStyle, Row, Value};
use crate::sql::format_trace;
use futures_util::TryStreamExt;
use std::time::Instant;
use tracing::{debug, warn};

/// Executes statements against a connection pool.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pool: Pool<SqlxConnectionManager>,
    style: PlaceholderStyle,
}

impl QueryExecutor {
    pub fn new(pool: Pool<SqlxConnectionManager>) -> Self {
        let style = pool.manager().db_type().placeholder_style();
        Self { pool, style }
    }

    pub fn pool(&self) -> &Pool<SqlxConnectionManager> {
        &self.pool
    }

    /// Run one INSERT/UPDATE/DELETE (or DDL) in its own transaction.
    ///
    /// Returns the affected row count.
    pub async fn execute_mutation(&self, sql: &str, args: &[Value]) -> DbResult<u64> {
        self.execute_in_transaction(sql, &[args]).await
    }

    /// Run one statement once per argument set, all in one transaction.
    ///
    /// Returns the sum of affected row counts.
    pub async fn execute_batch(&self, sql: &str, batches: &[Vec<Value>]) -> DbResult<u64> {
        let batches: Vec<&[Value]> = batches.iter().map(Vec::as_slice).collect();
        self.execute_in_transaction(sql, &batches).await
    }

    /// Run a SELECT and decode every row.
    pub async fn execute_query(&self, sql: &str, args: &[Value]) -> DbResult<Vec<Row>> {
        let start = Instant::now();
        debug!(
            sql = %format_trace(sql, args, self.style),
            params = args.len(),
            "Executing query"
        );

        let mut conn = self.pool.acquire().await?;
        let result = match &mut *conn {
            DbConnection::MySql(c) => mysql::fetch_rows(c, sql, args).await,
            DbConnection::Postgres(c) => postgres::fetch_rows(c, sql, args).await,
            DbConnection::SQLite(c) => sqlite::fetch_rows(c, sql, args).await,
        };
        conn.release().await;

        if let Ok(rows) = &result {
            debug!(
                rows = rows.len(),
                execution_time_ms = start.elapsed().as_millis() as u64,
                "Query complete"
            );
        }
        result
    }

    async fn execute_in_transaction(&self, sql: &str, batches: &[&[Value]]) -> DbResult<u64> {
        let start = Instant::now();
        for args in batches {
            debug!(
                sql = %format_trace(sql, args, self.style),
                params = args.len(),
                "Executing statement"
            );
        }

        let mut conn = self.pool.acquire().await?;
        let result = match &mut *conn {
            DbConnection::MySql(c) => mysql::execute(c, sql, batches).await,
            DbConnection::Postgres(c) => postgres::execute(c, sql, batches).await,
            DbConnection::SQLite(c) => sqlite::execute(c, sql, batches).await,
        };
        conn.release().await;

        if let Ok(rows_affected) = &result {
            debug!(
                rows_affected = *rows_affected,
                batches = batches.len(),
                execution_time_ms = start.elapsed().as_millis() as u64,
                "Transaction committed"
            );
        }
        result
    }
}

// =============================================================================
// Common Helper Functions
// =============================================================================

async fn rollback<DB: sqlx::Database>(tx: sqlx::Transaction<'_, DB>, cause: &sqlx::Error) {
    debug!(error = %cause, "Rolling back transaction");
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "Failed to roll back transaction");
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_all;
    use sqlx::mysql::MySqlConnection;
    use sqlx::{Connection, Executor};

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        batches: &[&[Value]],
    ) -> DbResult<u64> {
        let mut tx = conn.begin().await.map_err(DbError::execution)?;
        let mut rows_affected = 0;
        for args in batches {
            // When params is empty, execute raw SQL directly to avoid prepared statement issues
            let result = if args.is_empty() {
                (&mut *tx).execute(sql).await
            } else {
                bind_mysql_all(sql, args).execute(&mut *tx).await
            };
            match result {
                Ok(r) => rows_affected += r.rows_affected(),
                Err(e) => {
                    rollback(tx, &e).await;
                    return Err(DbError::execution(e));
                }
            }
        }
        tx.commit().await.map_err(DbError::execution)?;
        Ok(rows_affected)
    }

    pub async fn fetch_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        args: &[Value],
    ) -> DbResult<Vec<Row>> {
        let mut rows = Vec::new();
        if args.is_empty() {
            let mut stream = conn.fetch(sql);
            while let Some(row) = stream.try_next().await.map_err(DbError::execution)? {
                rows.push(row.to_row());
            }
        } else {
            let mut stream = bind_mysql_all(sql, args).fetch(conn);
            while let Some(row) = stream.try_next().await.map_err(DbError::execution)? {
                rows.push(row.to_row());
            }
        }
        Ok(rows)
    }
}

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_all;
    use sqlx::postgres::PgConnection;
    use sqlx::{Connection, Executor};

    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        batches: &[&[Value]],
    ) -> DbResult<u64> {
        let mut tx = conn.begin().await.map_err(DbError::execution)?;
        let mut rows_affected = 0;
        for args in batches {
            let result = if args.is_empty() {
                (&mut *tx).execute(sql).await
            } else {
                bind_postgres_all(sql, args).execute(&mut *tx).await
            };
            match result {
                Ok(r) => rows_affected += r.rows_affected(),
                Err(e) => {
                    rollback(tx, &e).await;
                    return Err(DbError::execution(e));
                }
            }
        }
        tx.commit().await.map_err(DbError::execution)?;
        Ok(rows_affected)
    }

    pub async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        args: &[Value],
    ) -> DbResult<Vec<Row>> {
        let mut rows = Vec::new();
        if args.is_empty() {
            let mut stream = conn.fetch(sql);
            while let Some(row) = stream.try_next().await.map_err(DbError::execution)? {
                rows.push(row.to_row());
            }
        } else {
            let mut stream = bind_postgres_all(sql, args).fetch(conn);
            while let Some(row) = stream.try_next().await.map_err(DbError::execution)? {
                rows.push(row.to_row());
            }
        }
        Ok(rows)
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_all;
    use sqlx::sqlite::SqliteConnection;
    use sqlx::{Connection, Executor};

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        batches: &[&[Value]],
    ) -> DbResult<u64> {
        let mut tx = conn.begin().await.map_err(DbError::execution)?;
        let mut rows_affected = 0;
        for args in batches {
            let result = if args.is_empty() {
                (&mut *tx).execute(sql).await
            } else {
                bind_sqlite_all(sql, args).execute(&mut *tx).await
            };
            match result {
                Ok(r) => rows_affected += r.rows_affected(),
                Err(e) => {
                    rollback(tx, &e).await;
                    return Err(DbError::execution(e));
                }
            }
        }
        tx.commit().await.map_err(DbError::execution)?;
        Ok(rows_affected)
    }

    pub async fn fetch_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        args: &[Value],
    ) -> DbResult<Vec<Row>> {
        let mut rows = Vec::new();
        if args.is_empty() {
            let mut stream = conn.fetch(sql);
            while let Some(row) = stream.try_next().await.map_err(DbError::execution)? {
                rows.push(row.to_row());
            }
        } else {
            let mut stream = bind_sqlite_all(sql, args).fetch(conn);
            while let Some(row) = stream.try_next().await.map_err(DbError::execution)? {
                rows.push(row.to_row());
            }
        }
        Ok(rows)
    }
}
