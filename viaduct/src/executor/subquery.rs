//! Handle-based re-entry: running a selection against a live request from
//! outside the resolver call stack.

use std::{
    fmt,
    sync::{
        Mutex, OnceLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use fnv::FnvHashMap;

use crate::{
    executor::{
        EngineExecutionContext, ExecutionParameters, RequestShared,
        context::SubqueryOptions,
        eod::EngineObjectData,
        error::{ErrorKind, FieldError},
    },
    selections::RawSelectionSet,
};

/// Opaque per-request token letting sub-selections rejoin the live request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ExecutionHandle(u64);

/// A sub-selection could not be executed: invalid handle, root-type mismatch,
/// plan build failure, or a failure setting up field resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubqueryExecutionException {
    message: String,
}

impl SubqueryExecutionException {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// This exception as a classified field error.
    pub fn into_field_error(self) -> FieldError {
        FieldError::new(self.message, ErrorKind::SubqueryExecution)
    }
}

impl fmt::Display for SubqueryExecutionException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subquery execution failed: {}", self.message)
    }
}

impl std::error::Error for SubqueryExecutionException {}

struct HandleRegistry {
    live: Mutex<FnvHashMap<u64, Weak<RequestShared>>>,
    next: AtomicU64,
}

fn registry() -> &'static HandleRegistry {
    static REGISTRY: OnceLock<HandleRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| HandleRegistry {
        live: Mutex::new(FnvHashMap::default()),
        next: AtomicU64::new(1),
    })
}

/// Issues the handle for a request. When handle-based execution is disabled,
/// the handle is minted but never registered, so resolving it fails.
pub(crate) fn register(shared: Weak<RequestShared>, enabled: bool) -> ExecutionHandle {
    let registry = registry();
    let id = registry.next.fetch_add(1, Ordering::Relaxed);
    if enabled {
        registry
            .live
            .lock()
            .expect("handle registry poisoned")
            .insert(id, shared);
    }
    ExecutionHandle(id)
}

pub(crate) fn unregister(handle: ExecutionHandle) {
    registry()
        .live
        .lock()
        .expect("handle registry poisoned")
        .remove(&handle.0);
}

/// Executes `selection` as a root `Query` selection of the live request
/// identified by `handle`.
///
/// This is the bridge the tenant runtime calls after converting a typed
/// selection set; it recovers the request state from the handle and builds
/// child execution parameters for the selection.
pub async fn execute_selection_set(
    handle: ExecutionHandle,
    selection: &RawSelectionSet,
    options: SubqueryOptions,
) -> Result<EngineObjectData, SubqueryExecutionException> {
    let shared = registry()
        .live
        .lock()
        .expect("handle registry poisoned")
        .get(&handle.0)
        .cloned()
        .and_then(|weak| weak.upgrade())
        .ok_or_else(|| {
            SubqueryExecutionException::new("invalid or expired execution handle")
        })?;

    // Rebuild scope parameters from the shared request state; the plan and
    // variables come solely from the selection.
    let params = ExecutionParameters {
        active_schema: shared.full_schema.clone(),
        plan: crate::plan::QueryPlan::build_from_selections(
            selection,
            crate::plan::PlanOperation::Subquery,
            &shared.full_schema,
        )
        .map_err(|e| SubqueryExecutionException::new(format!("plan build failed: {e}")))?,
        variables: std::sync::Arc::new(crate::executor::Variables::new()),
        root_oer: shared.root_query_oer,
        shared,
    };

    EngineExecutionContext { params }
        .execute_selection_set(selection, options)
        .await
}
