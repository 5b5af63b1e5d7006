//! Data models for the table gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;
pub mod value;

// Re-export commonly used types
pub use connection::{DatabaseType, PlaceholderStyle, masked_connection_string};
pub use query::{QuerySpec, Statement};
pub use value::{Row, Value, ValueMap};
