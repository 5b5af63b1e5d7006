//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool management
//! - Physical connections for each backend
//! - Parameter binding and row decoding
//! - Statement execution

pub mod connection;
pub mod executor;
pub mod params;
pub mod pool;
pub mod types;

pub use connection::{DbConnection, SqlxConnectionManager};
pub use executor::QueryExecutor;
pub use pool::{ManageConnection, Pool, PoolConfig, PoolState, PoolStatus, PooledConnection};
