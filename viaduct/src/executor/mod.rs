//! The execution engine: drives resolvers over a query plan with batching,
//! per-request memoization, and structured error accumulation.

pub(crate) mod arguments;
pub(crate) mod batching;
mod cancel;
mod context;
pub(crate) mod engine;
mod eod;
mod error;
pub(crate) mod oer;
pub(crate) mod serialize;
pub(crate) mod subquery;

use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, Mutex},
};

use fnv::FnvHashMap;

use crate::{
    access::CheckerExecutor,
    ast::InputValue,
    global_id::{GlobalId, SharedGlobalIdCodec},
    instrumentation::Instrumentation,
    plan::{PlanOperation, QueryPlan},
    resolver::ResolverRegistry,
    schema::ViaductSchema,
    selections::RawSelectionSet,
    value::BackingMap,
};

pub use self::{
    arguments::{ArgumentValues, ConstValue},
    cancel::CancellationToken,
    context::{
        EngineExecutionContext, FieldExecutionContext, NodeExecutionContext, SubqueryOptions,
    },
    eod::EngineObjectData,
    error::{
        ErrorAccumulator, ErrorKind, ExecutionError, FieldError, FieldResult, PathSegment,
        ResponsePath,
    },
    oer::{EngineValue, OerId},
    subquery::{ExecutionHandle, SubqueryExecutionException, execute_selection_set},
};

pub(crate) use self::oer::{NodeSlot, OerArena};

/// The map of variables used for substitution during query execution.
pub type Variables = HashMap<String, InputValue>;

/// Resolved engine feature flags for one service instance.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct EngineFlags {
    /// `ENABLE_SUBQUERY_EXECUTION_VIA_HANDLE`.
    pub subquery_via_handle: bool,
    /// `EXECUTE_ACCESS_CHECKS_IN_MODSTRAT`.
    pub access_checks_in_modstrat: bool,
}

/// State owned by one request and shared by every execution scope inside it
/// (the top-level operation and all of its sub-selections).
pub(crate) struct RequestShared {
    pub full_schema: Arc<ViaductSchema>,
    pub registry: Arc<ResolverRegistry>,
    pub arena: OerArena,
    pub errors: ErrorAccumulator,
    pub instrumentation: Arc<dyn Instrumentation>,
    pub checker: Option<Arc<dyn CheckerExecutor>>,
    pub codec: SharedGlobalIdCodec,
    pub flags: EngineFlags,
    pub cancellation: CancellationToken,
    /// Per-request memoization of node materializations.
    pub node_cache: Mutex<FnvHashMap<GlobalId, NodeSlot>>,
    /// The request's root query object; required query fragments resolve
    /// against it.
    pub root_query_oer: OerId,
    pub request_context: Option<Arc<dyn Any + Send + Sync>>,
    pub handle: ExecutionHandle,
}

impl Drop for RequestShared {
    fn drop(&mut self) {
        subquery::unregister(self.handle);
    }
}

/// The per-execution-scope state: one plan over one root source, sharing the
/// request's [`RequestShared`].
///
/// Created per request; sub-selection execution creates children carrying a
/// different plan, root source, and (by default) a fresh memoization result.
#[derive(Clone)]
pub struct ExecutionParameters {
    pub(crate) shared: Arc<RequestShared>,
    /// The scope-filtered schema the request was validated and planned
    /// against. Execution and sub-selections use the full schema.
    pub(crate) active_schema: Arc<ViaductSchema>,
    pub(crate) plan: Arc<QueryPlan>,
    pub(crate) variables: Arc<Variables>,
    pub(crate) root_oer: OerId,
}

impl ExecutionParameters {
    /// Creates the parameters for a fresh request.
    #[allow(clippy::too_many_arguments, reason = "assembled in one place, the service")]
    pub(crate) fn new_request(
        full_schema: Arc<ViaductSchema>,
        active_schema: Arc<ViaductSchema>,
        registry: Arc<ResolverRegistry>,
        instrumentation: Arc<dyn Instrumentation>,
        checker: Option<Arc<dyn CheckerExecutor>>,
        codec: SharedGlobalIdCodec,
        flags: EngineFlags,
        cancellation: CancellationToken,
        request_context: Option<Arc<dyn Any + Send + Sync>>,
        plan: Arc<QueryPlan>,
        variables: Variables,
    ) -> Self {
        let arena = OerArena::new();
        let root_oer = arena.allocate(plan.root_type.clone(), None, BackingMap::new());
        let root_query_oer = if plan.operation == PlanOperation::Mutation {
            arena.allocate(
                full_schema.query_type_name().clone(),
                None,
                BackingMap::new(),
            )
        } else {
            root_oer
        };

        let shared = Arc::new_cyclic(|weak| RequestShared {
            full_schema,
            registry,
            arena,
            errors: ErrorAccumulator::new(),
            instrumentation,
            checker,
            codec,
            flags,
            cancellation,
            node_cache: Mutex::new(FnvHashMap::default()),
            root_query_oer,
            request_context,
            handle: subquery::register(weak.clone(), flags.subquery_via_handle),
        });

        Self {
            shared,
            active_schema,
            plan,
            variables: Arc::new(variables),
            root_oer,
        }
    }

    /// Builds child parameters that run `selection` as a root selection of
    /// the live request.
    ///
    /// The child always uses the **full** schema, takes its variables solely
    /// from `variables`, and gets a fresh root unless `target_oer` opts into
    /// sharing memoization with an existing object.
    pub(crate) fn for_subquery(
        &self,
        selection: &RawSelectionSet,
        operation: PlanOperation,
        variables: Variables,
        target_oer: Option<OerId>,
    ) -> Result<Self, SubqueryExecutionException> {
        let schema = &self.shared.full_schema;

        let expected_root = match operation {
            PlanOperation::Mutation => schema.mutation_type_name().ok_or_else(|| {
                SubqueryExecutionException::new("schema has no mutation type")
            })?,
            _ => schema.query_type_name(),
        };
        if selection.type_condition != *expected_root {
            return Err(SubqueryExecutionException::new(format!(
                "selection targets \"{}\" but the root type is \"{expected_root}\"",
                selection.type_condition,
            )));
        }

        let plan = QueryPlan::build_from_selections(selection, operation, schema)
            .map_err(|e| SubqueryExecutionException::new(format!("plan build failed: {e}")))?;

        let root_oer = match target_oer {
            Some(oer) => oer,
            None => self.shared.arena.allocate(
                plan.root_type.clone(),
                None,
                BackingMap::new(),
            ),
        };

        Ok(Self {
            shared: Arc::clone(&self.shared),
            active_schema: Arc::clone(schema),
            plan,
            variables: Arc::new(variables),
            root_oer,
        })
    }

    /// Derives parameters for executing `plan` against `root_oer` with
    /// `variables`, sharing everything else. Used for required-selection-set
    /// resolution.
    pub(crate) fn for_fragment(
        &self,
        plan: Arc<QueryPlan>,
        variables: Arc<Variables>,
        root_oer: OerId,
    ) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            active_schema: Arc::clone(&self.shared.full_schema),
            plan,
            variables,
            root_oer,
        }
    }

    /// The full (unfiltered) schema execution runs against.
    pub(crate) fn schema(&self) -> &Arc<ViaductSchema> {
        &self.shared.full_schema
    }

    /// Runs this scope's plan to completion, populating the memoization
    /// arena and the error accumulator.
    pub(crate) async fn run(&self) {
        engine::execute(self).await;
    }
}
