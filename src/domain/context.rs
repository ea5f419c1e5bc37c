//! Operation Context
//!
//! Identifies who is acting and correlates the work done for one request
//! across logs and the events it produces.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context for an operation, used for ownership checks and tracing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    /// Acting user; transactions and accounts of other users are invisible
    pub user_id: Uuid,

    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl OperationContext {
    /// Create a context for the given user
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            correlation_id: None,
        }
    }

    /// Create context with correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}
