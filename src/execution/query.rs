//! The query execution service seam.
//!
//! Tasks carry an opaque query string. The engine never interprets it; it
//! hands it to a [`QueryService`] and records the outcome.

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by a query service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The service ran the query and reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The service broke in an unexpected way (crash, panic, spawn failure).
    #[error("{0}")]
    Fault(String),
}

impl QueryError {
    /// Whether this is an unexpected fault rather than a reported failure.
    pub fn is_fault(&self) -> bool {
        matches!(self, QueryError::Fault(_))
    }
}

/// Executes task queries against some external system.
///
/// Returns the number of rows affected or processed on success.
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn execute(&self, query: &str) -> Result<u64, QueryError>;
}
