//! The contexts handed to resolvers: typed access to their declared data and
//! the sub-selection re-entry points.

use std::{any::Any, sync::Arc};

use arcstr::ArcStr;

use crate::{
    executor::{
        ExecutionParameters, Variables,
        arguments::ArgumentValues,
        eod::EngineObjectData,
        error::{ExecutionError, FieldError, ResponsePath},
        subquery::SubqueryExecutionException,
    },
    global_id::{GlobalId, SharedGlobalIdCodec},
    plan::{PlanOperation, QueryPlan},
    resolver::Coordinate,
    schema::ViaductSchema,
    selections::RawSelectionSet,
};

/// Options for one sub-selection execution.
#[derive(Default)]
pub struct SubqueryOptions {
    /// Variables the selection closes over. The outer request's variables
    /// are never inherited.
    pub variables: Variables,
    /// Share the parent request's root memoization instead of using a fresh
    /// object-engine result.
    pub share_memoization: bool,
}

/// The engine surface every resolver context exposes: sub-selection
/// execution against the live request, plus request-scoped services.
#[derive(Clone)]
pub struct EngineExecutionContext {
    pub(crate) params: ExecutionParameters,
}

impl EngineExecutionContext {
    /// Runs `source` as a top-level `Query` selection of this request with a
    /// fresh memoization result.
    pub async fn query(
        &self,
        source: &str,
    ) -> Result<EngineObjectData, SubqueryExecutionException> {
        let raw = self.parse_on(self.params.schema().query_type_name().clone(), source)?;
        self.execute_selection_set(&raw, SubqueryOptions::default())
            .await
    }

    /// Runs a prepared selection as a top-level `Query` selection.
    pub async fn execute_selection_set(
        &self,
        selection: &RawSelectionSet,
        options: SubqueryOptions,
    ) -> Result<EngineObjectData, SubqueryExecutionException> {
        self.run_subquery(selection, PlanOperation::Subquery, options)
            .await
    }

    /// Runs `source` as a top-level `Mutation` selection. Callable only from
    /// mutation resolvers.
    pub async fn mutation(
        &self,
        source: &str,
    ) -> Result<EngineObjectData, SubqueryExecutionException> {
        let root = self
            .params
            .schema()
            .mutation_type_name()
            .ok_or_else(|| SubqueryExecutionException::new("schema has no mutation type"))?
            .clone();
        let raw = self.parse_on(root, source)?;
        self.execute_mutation_selection_set(&raw, SubqueryOptions::default())
            .await
    }

    /// Runs a prepared selection as a top-level `Mutation` selection.
    pub async fn execute_mutation_selection_set(
        &self,
        selection: &RawSelectionSet,
        options: SubqueryOptions,
    ) -> Result<EngineObjectData, SubqueryExecutionException> {
        if self.params.plan.operation != PlanOperation::Mutation {
            return Err(SubqueryExecutionException::new(
                "mutation sub-selections are only callable from mutation resolvers",
            ));
        }
        self.run_subquery(selection, PlanOperation::Mutation, options)
            .await
    }

    async fn run_subquery(
        &self,
        selection: &RawSelectionSet,
        operation: PlanOperation,
        options: SubqueryOptions,
    ) -> Result<EngineObjectData, SubqueryExecutionException> {
        selection
            .validate(self.params.schema())
            .map_err(|e| SubqueryExecutionException::new(e.to_string()))?;

        // Memoization sharing targets the request's root query object; a
        // fresh result is the default.
        let target = (options.share_memoization && operation != PlanOperation::Mutation)
            .then(|| self.params.shared.root_query_oer);

        let child =
            self.params
                .for_subquery(selection, operation, options.variables, target)?;
        child.run().await;
        Ok(EngineObjectData::new(
            child.clone(),
            child.root_oer,
            Arc::clone(&child.plan),
        ))
    }

    fn parse_on(
        &self,
        root: ArcStr,
        source: &str,
    ) -> Result<RawSelectionSet, SubqueryExecutionException> {
        RawSelectionSet::parse(root, source, Vec::<&str>::new())
            .map_err(|e| SubqueryExecutionException::new(e.to_string()))
    }

    /// The opaque handle sub-selections can use to rejoin this request.
    pub fn handle(&self) -> crate::executor::ExecutionHandle {
        self.params.shared.handle
    }

    /// The full schema this request executes against.
    pub fn schema(&self) -> &Arc<ViaductSchema> {
        self.params.schema()
    }

    /// The scoped schema view the request was validated and planned against.
    /// Sub-selections are not limited to it.
    pub fn active_schema(&self) -> &Arc<ViaductSchema> {
        &self.params.active_schema
    }

    /// The request's global ID codec.
    pub fn global_id_codec(&self) -> &SharedGlobalIdCodec {
        &self.params.shared.codec
    }

    /// The request's cancellation signal.
    pub fn cancellation(&self) -> &crate::executor::CancellationToken {
        &self.params.shared.cancellation
    }

    /// The application request context, if one was supplied and is of type
    /// `T`.
    pub fn request_context<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.params
            .shared
            .request_context
            .as_ref()?
            .downcast_ref::<T>()
    }
}

/// Everything a field resolver sees: its coerced arguments, the declared
/// slices of parent and root data, and the engine surface.
#[derive(Clone)]
pub struct FieldExecutionContext {
    pub(crate) engine: EngineExecutionContext,
    pub(crate) coordinate: Coordinate,
    pub(crate) object: EngineObjectData,
    pub(crate) query_data: Option<EngineObjectData>,
    pub(crate) args: ArgumentValues,
    pub(crate) variables: Variables,
    pub(crate) path: Arc<ResponsePath>,
}

impl FieldExecutionContext {
    /// The coordinate this resolver is bound to.
    pub fn coordinate(&self) -> &Coordinate {
        &self.coordinate
    }

    /// The canonical coerced argument record.
    pub fn args(&self) -> &ArgumentValues {
        &self.args
    }

    /// The resolver's resolved variables.
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// The parent object, restricted to the declared `objectFragment`.
    pub fn object(&self) -> &EngineObjectData {
        &self.object
    }

    /// The query root, restricted to the declared `queryFragment`; `None`
    /// when the resolver declared none.
    pub fn query_data(&self) -> Option<&EngineObjectData> {
        self.query_data.as_ref()
    }

    /// The engine surface: sub-selections, codec, cancellation.
    pub fn execution(&self) -> &EngineExecutionContext {
        &self.engine
    }

    /// Shorthand for [`EngineExecutionContext::query`].
    pub async fn query(
        &self,
        source: &str,
    ) -> Result<EngineObjectData, SubqueryExecutionException> {
        self.engine.query(source).await
    }

    /// Shorthand for [`EngineExecutionContext::mutation`].
    pub async fn mutation(
        &self,
        source: &str,
    ) -> Result<EngineObjectData, SubqueryExecutionException> {
        self.engine.mutation(source).await
    }

    /// Shorthand for the request's global ID codec.
    pub fn global_id_codec(&self) -> &SharedGlobalIdCodec {
        self.engine.global_id_codec()
    }

    /// Shorthand for the full schema.
    pub fn schema(&self) -> &Arc<ViaductSchema> {
        self.engine.schema()
    }

    /// Records a non-fatal error at this field's response path.
    pub fn push_error(&self, error: FieldError) {
        self.engine.params.shared.errors.push(ExecutionError::new(
            None,
            self.path.segments(),
            error,
        ));
    }
}

/// Everything a node resolver sees: the decoded global identity and the
/// selections the request wants from the node.
#[derive(Clone)]
pub struct NodeExecutionContext {
    pub(crate) engine: EngineExecutionContext,
    pub(crate) id: GlobalId,
    pub(crate) selections: Arc<QueryPlan>,
    pub(crate) path: Arc<ResponsePath>,
}

impl NodeExecutionContext {
    /// The decoded global identity being resolved.
    pub fn global_id(&self) -> &GlobalId {
        &self.id
    }

    /// The tenant-internal id within the node type.
    pub fn local_id(&self) -> &str {
        &self.id.local_id
    }

    /// The concrete node type name.
    pub fn type_name(&self) -> &ArcStr {
        &self.id.type_name
    }

    /// The response keys the request selects on this node, so selective
    /// resolvers can fetch only what is needed.
    pub fn selection_keys(&self) -> Vec<&str> {
        self.selections
            .steps
            .iter()
            .map(|s| s.response_key.as_str())
            .collect()
    }

    /// The engine surface: sub-selections, codec, cancellation.
    pub fn execution(&self) -> &EngineExecutionContext {
        &self.engine
    }

    /// Records a non-fatal error at this node's response path.
    pub fn push_error(&self, error: FieldError) {
        self.engine.params.shared.errors.push(ExecutionError::new(
            None,
            self.path.segments(),
            error,
        ));
    }
}
