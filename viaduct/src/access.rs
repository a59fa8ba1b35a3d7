//! Pluggable per-field access checks.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    executor::{FieldError, FieldResult},
    resolver::Coordinate,
};

/// Decision of an access check.
#[derive(Clone, Debug, PartialEq)]
pub enum CheckResult {
    /// The field may resolve.
    Allowed,
    /// The field is denied; the given error is written to its cell.
    /// Non-fatal: the rest of the request proceeds.
    Denied(FieldError),
}

/// Runs the access checks for one field coordinate.
#[async_trait]
pub trait CheckerExecutor: Send + Sync {
    /// Checks whether the field at `coordinate` may resolve for this request.
    async fn execute(&self, coordinate: &Coordinate) -> FieldResult<CheckResult>;
}

/// Builds the per-request checker from the request context, if the
/// application installs one.
pub trait CheckerExecutorFactory: Send + Sync {
    /// Creates the checker executor for one request. `None` disables checks
    /// for that request.
    fn create(&self) -> Option<Arc<dyn CheckerExecutor>>;
}

impl<F> CheckerExecutorFactory for F
where
    F: Fn() -> Option<Arc<dyn CheckerExecutor>> + Send + Sync,
{
    fn create(&self) -> Option<Arc<dyn CheckerExecutor>> {
        self()
    }
}
