//! Typed read access to resolved objects.

use std::{fmt, sync::Arc};

use arcstr::ArcStr;

use crate::{
    executor::{
        ExecutionParameters, engine,
        error::{FieldError, FieldResult, ResponsePath},
        oer::{EngineValue, NodeSlot, OerId},
    },
    global_id::GlobalId,
    plan::{FieldStep, PlanOperation, QueryPlan},
    selections::RawSelectionSet,
    value::DataValue,
};

/// A handle to one resolved object, scoped to the selections its holder
/// declared.
///
/// Reads outside the declared selection set fail with `UnsetSelection`; reads
/// of in-flight cells suspend until the cell settles.
#[derive(Clone)]
pub struct EngineObjectData {
    params: ExecutionParameters,
    oer: OerId,
    /// The selections the holder may read.
    view: Arc<QueryPlan>,
    path: Arc<ResponsePath>,
}

impl fmt::Debug for EngineObjectData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineObjectData")
            .field("type", &self.graphql_object_type())
            .finish_non_exhaustive()
    }
}

impl EngineObjectData {
    pub(crate) fn new(params: ExecutionParameters, oer: OerId, view: Arc<QueryPlan>) -> Self {
        Self {
            params,
            oer,
            view,
            path: ResponsePath::root(),
        }
    }

    pub(crate) fn with_path(mut self, path: Arc<ResponsePath>) -> Self {
        self.path = path;
        self
    }

    pub(crate) fn oer_id(&self) -> OerId {
        self.oer
    }

    /// The concrete object type, after any type narrowing.
    pub fn graphql_object_type(&self) -> ArcStr {
        self.params.shared.arena.get(self.oer).type_name().clone()
    }

    /// The node identity of this object, when it was produced by a node
    /// resolver.
    pub fn node_id(&self) -> Option<GlobalId> {
        self.params.shared.arena.get(self.oer).node_id().cloned()
    }

    /// Reads one selection, suspending while it is in flight.
    ///
    /// Fails with `UnsetSelection` when `selection` is not part of this
    /// handle's declared selections.
    pub async fn fetch(&self, selection: &str) -> FieldResult<DataValue> {
        let step = self
            .view
            .step(selection)
            .ok_or_else(|| FieldError::unset_selection(selection))?;

        let oer = self.params.shared.arena.get(self.oer);
        if step.is_typename() {
            return Ok(DataValue::Scalar(oer.type_name().as_str().into()));
        }

        let cell = oer.cell(&step.response_key);
        let outcome = match cell.settled().await {
            Some(outcome) => outcome,
            None => {
                engine::resolve_step_on_demand(
                    &self.params,
                    self.oer,
                    &self.path,
                    step,
                )
                .await
            }
        };
        self.to_data_value(outcome?, step)
    }

    /// Reads one selection, mapping any failure to [`DataValue::Null`].
    pub async fn fetch_or_null(&self, selection: &str) -> DataValue {
        self.fetch(selection).await.unwrap_or(DataValue::Null)
    }

    /// Ensures a batch of selections on this object is resolved. Returns
    /// whether anything actually had to be computed.
    pub async fn resolve_data(&self, selections: &RawSelectionSet) -> FieldResult<bool> {
        let plan = QueryPlan::build_from_selections(
            selections,
            PlanOperation::Subquery,
            self.params.schema(),
        )?;

        let oer = self.params.shared.arena.get(self.oer);
        let computed = plan.steps.iter().any(|step| {
            oer.existing_cell(&step.response_key)
                .is_none_or(|cell| cell.terminal().is_none())
        });

        let fragment_params = self.params.for_fragment(
            Arc::clone(&plan),
            Arc::clone(&self.params.variables),
            self.oer,
        );
        engine::fetch_object_set(
            &fragment_params,
            vec![(self.oer, Arc::clone(&self.path))],
            &plan,
        )
        .await;

        Ok(computed)
    }

    /// Converts a settled engine value into the holder-facing form, scoping
    /// nested objects to the step's child selections.
    fn to_data_value(&self, value: EngineValue, step: &FieldStep) -> FieldResult<DataValue> {
        Ok(match value {
            EngineValue::Null => DataValue::Null,
            EngineValue::Scalar(s) => DataValue::Scalar(s),
            EngineValue::Enum(e) => DataValue::Enum(e),
            EngineValue::List(items) => DataValue::List(
                items
                    .into_iter()
                    .map(|v| self.to_data_value(v, step))
                    .collect::<FieldResult<_>>()?,
            ),
            EngineValue::Object(id) => {
                let view = step
                    .child
                    .as_ref()
                    .map(Arc::clone)
                    .unwrap_or_else(|| empty_view(self.params.schema().query_type_name()));
                DataValue::Object(
                    EngineObjectData::new(self.params.clone(), id, view)
                        .with_path(self.path.key(step.response_key.as_str())),
                )
            }
            EngineValue::NodeRef(gid) => {
                let slot = self
                    .params
                    .shared
                    .node_cache
                    .lock()
                    .expect("node cache poisoned")
                    .get(&gid)
                    .cloned();
                match (slot, &step.child) {
                    (Some(NodeSlot::Ready(id)), Some(child)) => DataValue::Object(
                        EngineObjectData::new(self.params.clone(), id, Arc::clone(child))
                            .with_path(self.path.key(step.response_key.as_str())),
                    ),
                    // Unresolved node references expose only `id`.
                    _ => DataValue::NodeRef(gid),
                }
            }
        })
    }
}

fn empty_view(root_type: &ArcStr) -> Arc<QueryPlan> {
    Arc::new(QueryPlan {
        root_type: root_type.clone(),
        operation: PlanOperation::Subquery,
        steps: Vec::new(),
        is_root_query_plan: false,
    })
}
