//! The serialization pass: walks the plan over the settled object-engine
//! results and produces the response value, bubbling nulls to the nearest
//! nullable ancestor.

use std::sync::Arc;

use crate::{
    executor::{
        ExecutionParameters,
        engine::step_included,
        error::{ErrorKind, ExecutionError, FieldError, ResponsePath},
        oer::{EngineValue, NodeSlot, OerId},
    },
    plan::{FieldStep, QueryPlan},
    schema::TypeExpr,
    value::{Object, Value},
};

/// Serializes the scope's root object. `None` means a non-null violation
/// reached the root: `data` is null.
pub(crate) fn serialize_response(params: &ExecutionParameters) -> Option<Value> {
    let plan = Arc::clone(&params.plan);
    serialize_object(params, params.root_oer, &plan, &ResponsePath::root())
}

fn serialize_object(
    params: &ExecutionParameters,
    oer_id: OerId,
    plan: &Arc<QueryPlan>,
    path: &Arc<ResponsePath>,
) -> Option<Value> {
    let oer = params.shared.arena.get(oer_id);
    let type_name = oer.type_name().clone();

    let mut object = Object::with_capacity(plan.steps.len());
    for step in &plan.steps {
        if !step_included(params, step) || !step.applies_to(params.schema(), &type_name) {
            continue;
        }
        // Disjoint condition steps can share a response key; the applicable
        // one that serialized first answers it.
        if object.contains_field(&step.response_key) {
            continue;
        }

        if step.is_typename() {
            object.add_field(step.response_key.as_str(), Value::scalar(type_name.as_str()));
            continue;
        }

        let field_path = path.key(step.response_key.as_str());
        let outcome = oer
            .existing_cell(&step.response_key)
            .and_then(|cell| cell.terminal());

        let value = match outcome {
            Some(Ok(value)) => {
                serialize_value(params, value, &step.field_type, step, &field_path)
            }
            // The failure was recorded when the cell settled; here it only
            // decides nulling.
            Some(Err(_)) => nullable_or_bubble(&step.field_type),
            // Never resolved (e.g. left to a selective resolver that chose
            // not to): absent, not an error.
            None => nullable_or_bubble(&step.field_type),
        };

        match value {
            Some(v) => {
                object.add_field(step.response_key.as_str(), v);
            }
            None => return None,
        }
    }

    Some(Value::Object(object))
}

fn nullable_or_bubble(expr: &TypeExpr) -> Option<Value> {
    expr.is_nullable().then(Value::null)
}

fn serialize_value(
    params: &ExecutionParameters,
    value: EngineValue,
    expr: &TypeExpr,
    step: &FieldStep,
    path: &Arc<ResponsePath>,
) -> Option<Value> {
    match value {
        EngineValue::Null => {
            if expr.is_nullable() {
                Some(Value::Null)
            } else {
                record_non_null_violation(params, step, path);
                None
            }
        }
        EngineValue::Scalar(s) => Some(Value::Scalar(s)),
        EngineValue::Enum(e) => Some(Value::scalar(e.as_str())),
        EngineValue::List(items) => {
            let inner = if expr.is_list() {
                expr.unwrap_list()
            } else {
                expr.clone()
            };
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                match serialize_value(params, item, &inner, step, &path.index(i)) {
                    Some(v) => out.push(v),
                    // A non-nullable element exploded: the whole list goes.
                    None => return nullable_or_bubble(expr),
                }
            }
            Some(Value::List(out))
        }
        EngineValue::Object(id) => {
            let Some(child) = &step.child else {
                return nullable_or_bubble(expr);
            };
            match serialize_object(params, id, child, path) {
                Some(v) => Some(v),
                None => nullable_or_bubble(expr),
            }
        }
        EngineValue::NodeRef(gid) => {
            let slot = params
                .shared
                .node_cache
                .lock()
                .expect("node cache poisoned")
                .get(&gid)
                .cloned();
            match slot {
                Some(NodeSlot::Ready(id)) => {
                    let Some(child) = &step.child else {
                        return nullable_or_bubble(expr);
                    };
                    match serialize_object(params, id, child, path) {
                        Some(v) => Some(v),
                        None => nullable_or_bubble(expr),
                    }
                }
                // The node never materialized (null node, failed resolver, or
                // an identity-only selection): identity fields still answer.
                _ => serialize_identity_only(params, &gid, step, path),
            }
        }
    }
}

/// An unmaterialized node reference serializes its identity selections only;
/// anything deeper is null.
fn serialize_identity_only(
    params: &ExecutionParameters,
    gid: &crate::global_id::GlobalId,
    step: &FieldStep,
    path: &Arc<ResponsePath>,
) -> Option<Value> {
    let Some(child) = &step.child else {
        return nullable_or_bubble(&step.field_type);
    };

    let mut object = Object::with_capacity(child.steps.len());
    for child_step in &child.steps {
        if !step_included(params, child_step)
            || !child_step.applies_to(params.schema(), &gid.type_name)
        {
            continue;
        }
        if child_step.is_typename() {
            object.add_field(
                child_step.response_key.as_str(),
                Value::scalar(gid.type_name.as_str()),
            );
        } else if child_step.field_name == "id" {
            object.add_field(
                child_step.response_key.as_str(),
                Value::scalar(params.shared.codec.serialize(gid)),
            );
        } else if child_step.field_type.is_nullable() {
            object.add_field(child_step.response_key.as_str(), Value::Null);
        } else {
            return nullable_or_bubble(&step.field_type);
        }
    }
    Some(Value::Object(object))
}

fn record_non_null_violation(
    params: &ExecutionParameters,
    step: &FieldStep,
    path: &Arc<ResponsePath>,
) {
    params.shared.errors.push(ExecutionError::new(
        Some(step.span.start),
        path.segments(),
        FieldError::new(
            format!(
                "Cannot return null for non-nullable field of type \"{}\"",
                step.field_type,
            ),
            ErrorKind::DataFetching,
        ),
    ));
}
