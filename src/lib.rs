//! Table Gateway Library
//!
//! Builds parameterized INSERT/UPDATE/DELETE/SELECT statements from a table
//! name and column-keyed values, and runs them over a managed connection pool
//! (SQLite, PostgreSQL, MySQL).

pub mod config;
pub mod database;
pub mod db;
pub mod error;
pub mod models;
pub mod sql;

pub use config::{Config, DatabaseConfig, PoolOptions};
pub use database::{Database, DatabaseOptions};
pub use error::{DbError, DbResult, ValidationError};
pub use models::{DatabaseType, QuerySpec, Row, Statement, Value, ValueMap};
