//! SQL text generation.
//!
//! - Clause validation for SELECT requests
//! - Statement building with backend-specific positional markers
//! - Diagnostic traces with arguments rendered inline

pub mod builder;
pub mod trace;
pub mod validator;

pub use builder::{MutationKind, StatementBuilder};
pub use trace::format_trace;
pub use validator::validate;
