//! The field-resolution pipeline: plan traversal, required selection sets,
//! batching coordination, and node materialization.

use std::sync::Arc;

use arcstr::ArcStr;
use compact_str::CompactString;
use futures::{FutureExt as _, channel::oneshot, future::BoxFuture};
use tracing::debug;

use crate::{
    ast::InputValue,
    executor::{
        EngineExecutionContext, ExecutionParameters, FieldExecutionContext,
        NodeExecutionContext, Variables,
        arguments::{ArgumentValues, coerce_arguments},
        batching::{BatchCollector, BatchEntry, dispatch},
        eod::EngineObjectData,
        error::{ErrorKind, ExecutionError, FieldError, FieldResult, ResponsePath},
        oer::{CellClaim, CellOutcome, EngineValue, NodeSlot, OerId, join_outcome},
    },
    global_id::GlobalId,
    parser::Span,
    plan::{FieldStep, PlanOperation, QueryPlan},
    resolver::{Coordinate, VariableSource, registry::{FieldExecutorKind, FieldRuntime}},
    schema::meta::TypeDef,
    selections::RawSelectionSet,
    value::{BackingMap, ResolvedValue},
};

/// One object to resolve a plan against, with its response location.
pub(crate) type Parent = (OerId, Arc<ResponsePath>);

/// Runs the scope's plan to completion against its root source.
pub(crate) async fn execute(params: &ExecutionParameters) {
    let plan = Arc::clone(&params.plan);
    let root: Parent = (params.root_oer, ResponsePath::root());
    match plan.operation {
        PlanOperation::Mutation => execute_mutation(params, root, &plan).await,
        _ => fetch_object_set(params, vec![root], &plan).await,
    }
}

/// Resolves `plan` over a set of sibling parents.
///
/// Runs level-synchronized: every parent's own cells settle first (phase A,
/// concurrently, with batch groups collected across the whole sibling set),
/// then each step's children are gathered from all parents and traversed
/// together (phase B) so sibling batching extends down the tree.
pub(crate) fn fetch_object_set<'a>(
    params: &'a ExecutionParameters,
    parents: Vec<Parent>,
    plan: &'a QueryPlan,
) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        if parents.is_empty() || plan.steps.is_empty() {
            return;
        }
        let arena = &params.shared.arena;

        // Applicability of each step to each parent, by type condition and
        // `@skip`/`@include`.
        let mut applicable: Vec<Vec<usize>> = vec![Vec::new(); plan.steps.len()];
        let types: Vec<ArcStr> = parents
            .iter()
            .map(|(id, _)| arena.get(*id).type_name().clone())
            .collect();
        for (s_idx, step) in plan.steps.iter().enumerate() {
            if !step_included(params, step) {
                continue;
            }
            for (p_idx, type_name) in types.iter().enumerate() {
                if step.applies_to(params.schema(), type_name) {
                    applicable[s_idx].push(p_idx);
                }
            }
        }

        // Expected batch contributors, per (step, concrete type).
        let collector = BatchCollector::new();
        for (s_idx, step) in plan.steps.iter().enumerate() {
            let mut per_type: Vec<(&ArcStr, usize)> = Vec::new();
            for &p_idx in &applicable[s_idx] {
                let type_name = &types[p_idx];
                match per_type.iter_mut().find(|(t, _)| *t == type_name) {
                    Some((_, n)) => *n += 1,
                    None => per_type.push((type_name, 1)),
                }
            }
            for (type_name, count) in per_type {
                if is_batch_backed(params, type_name, step) {
                    collector.expect(batch_key(s_idx, type_name), count);
                }
            }
        }

        let fetches = parents.iter().enumerate().map(|(p_idx, parent)| {
            let step_indices: Vec<usize> = (0..plan.steps.len())
                .filter(|s| applicable[*s].contains(&p_idx))
                .collect();
            fetch_object_fields(params, parent, plan, step_indices, &collector)
        });
        futures::future::join_all(fetches).await;

        for (s_idx, step) in plan.steps.iter().enumerate() {
            let Some(child_plan) = &step.child else {
                continue;
            };
            let mut children = Vec::new();
            for &p_idx in &applicable[s_idx] {
                let (oer_id, path) = &parents[p_idx];
                collect_children(params, *oer_id, path, step, child_plan, &mut children).await;
            }
            fetch_object_set(params, children, child_plan).await;
        }
    })
}

/// Serial execution of a mutation root: each top-level step, including its
/// whole child tree and completion hooks, finishes before the next begins.
/// Child fields of a mutation payload revert to concurrent resolution.
async fn execute_mutation(params: &ExecutionParameters, root: Parent, plan: &QueryPlan) {
    let arena = &params.shared.arena;
    let type_name = arena.get(root.0).type_name().clone();
    let completion = params
        .shared
        .instrumentation
        .begin_fetch_object_serially(&type_name);

    for (s_idx, step) in plan.steps.iter().enumerate() {
        if !step_included(params, step) || !step.applies_to(params.schema(), &type_name) {
            continue;
        }
        settle_denials(params, &root, plan, &[s_idx]).await;
        let collector = BatchCollector::new();
        if is_batch_backed(params, &type_name, step) {
            collector.expect(batch_key(s_idx, &type_name), 1);
        }
        resolve_field(params, &root, plan, s_idx, &collector).await;

        if let Some(child_plan) = &step.child {
            let mut children = Vec::new();
            collect_children(params, root.0, &root.1, step, child_plan, &mut children).await;
            fetch_object_set(params, children, child_plan).await;
        }
    }

    completion();
}

/// Phase A for one parent: resolve every applicable step's cell, firing the
/// object-fetch instrumentation hooks around the whole set.
async fn fetch_object_fields(
    params: &ExecutionParameters,
    parent: &Parent,
    plan: &QueryPlan,
    step_indices: Vec<usize>,
    collector: &BatchCollector,
) {
    let type_name = params.shared.arena.get(parent.0).type_name().clone();
    let completion = params.shared.instrumentation.begin_fetch_object(&type_name);

    settle_denials(params, parent, plan, &step_indices).await;

    let resolutions = step_indices
        .iter()
        .map(|&s_idx| resolve_field(params, parent, plan, s_idx, collector));
    futures::future::join_all(resolutions).await;

    completion();
}

/// Separate-pass access checks: settle denials into cells before field
/// resolution, so both checker placements produce identical cell outcomes.
async fn settle_denials(
    params: &ExecutionParameters,
    parent: &Parent,
    plan: &QueryPlan,
    step_indices: &[usize],
) {
    if params.shared.checker.is_none() || params.shared.flags.access_checks_in_modstrat {
        return;
    }
    let oer = params.shared.arena.get(parent.0);
    let type_name = oer.type_name().clone();

    for &s_idx in step_indices {
        let step = &plan.steps[s_idx];
        if step.is_typename()
            || params
                .shared
                .registry
                .field(&type_name, &step.field_name)
                .is_none()
        {
            continue;
        }
        let coordinate = Coordinate::new(type_name.clone(), step.field_name.as_str());
        if let Err(e) = check_access(params, &coordinate).await {
            let cell = oer.cell(&step.response_key);
            if let CellClaim::Claimed(writer) = cell.claim() {
                record_error(
                    params,
                    &parent.1.key(step.response_key.as_str()),
                    step.span,
                    e.clone(),
                );
                writer.complete(Err(e));
            }
        }
    }
}

/// Resolves one field cell for one parent, joining an existing resolution
/// when the cell is already claimed.
async fn resolve_field(
    params: &ExecutionParameters,
    parent: &Parent,
    plan: &QueryPlan,
    s_idx: usize,
    collector: &BatchCollector,
) {
    let step = &plan.steps[s_idx];
    let oer = params.shared.arena.get(parent.0);
    let type_name = oer.type_name().clone();
    let runtime = params.shared.registry.field(&type_name, &step.field_name);
    let batch_executor = match runtime.map(|r| &r.executor) {
        Some(FieldExecutorKind::Batch(b)) => Some(Arc::clone(b)),
        _ => None,
    };
    let key = batch_key(s_idx, &type_name);

    let cell = oer.cell(&step.response_key);
    let writer = match cell.claim() {
        CellClaim::Done(_) => {
            if let Some(b) = &batch_executor {
                if let Some(ready) = collector.withdraw(key) {
                    dispatch(params, b, ready).await;
                }
            }
            return;
        }
        CellClaim::Pending(shared) => {
            if let Some(b) = &batch_executor {
                if let Some(ready) = collector.withdraw(batch_key(s_idx, &type_name)) {
                    dispatch(params, b, ready).await;
                }
            }
            let _ = join_outcome(shared).await;
            return;
        }
        CellClaim::Claimed(writer) => writer,
    };

    let coordinate = Coordinate::new(type_name.clone(), step.field_name.as_str());
    let completion = params
        .shared
        .instrumentation
        .begin_field_resolve(&coordinate);

    let mut submitted = false;
    let outcome = resolve_field_value(
        params,
        parent,
        &type_name,
        step,
        s_idx,
        runtime,
        collector,
        &coordinate,
        &mut submitted,
    )
    .await;

    // A counted batch contributor that never submitted must withdraw so the
    // rest of its group can fire.
    if !submitted {
        if let Some(b) = &batch_executor {
            if let Some(ready) = collector.withdraw(key) {
                dispatch(params, b, ready).await;
            }
        }
    }

    if let Err(e) = &outcome {
        record_error(
            params,
            &parent.1.key(step.response_key.as_str()),
            step.span,
            e.clone(),
        );
    }
    writer.complete(outcome);
    completion();
}

#[allow(clippy::too_many_arguments, reason = "single pipeline call site")]
async fn resolve_field_value(
    params: &ExecutionParameters,
    parent: &Parent,
    type_name: &ArcStr,
    step: &FieldStep,
    s_idx: usize,
    runtime: Option<&FieldRuntime>,
    collector: &BatchCollector,
    coordinate: &Coordinate,
    submitted: &mut bool,
) -> CellOutcome {
    if params.shared.cancellation.is_cancelled() {
        return Err(FieldError::cancelled());
    }

    if step.is_typename() {
        return Ok(EngineValue::Scalar(type_name.as_str().into()));
    }

    let field_path = parent.1.key(step.response_key.as_str());

    let Some(runtime) = runtime else {
        // No registered resolver: plain property resolution from the data
        // the producing resolver seeded.
        let oer = params.shared.arena.get(parent.0);
        return match oer.backing_value(&step.field_name) {
            Some(value) => convert_resolved(params, value, &step.field_type),
            None if step.field_type.is_nullable() => Ok(EngineValue::Null),
            None => Err(FieldError::new(
                format!("No resolver or data for \"{coordinate}\""),
                ErrorKind::DataFetching,
            )),
        };
    };

    if params.shared.checker.is_some() && params.shared.flags.access_checks_in_modstrat {
        check_access(params, coordinate).await?;
    }

    let args = coerce_arguments(
        params.schema(),
        params.shared.codec.as_ref(),
        &step.arguments,
        &params.variables,
    )?;
    let variables = resolve_bindings(params, parent, runtime, &args).await?;
    let variables_arc = Arc::new(variables.clone());

    // The declared required selection sets settle before the resolver runs.
    let object = match &runtime.object_fragment {
        Some(fragment) => {
            let fragment_params = params.for_fragment(
                Arc::clone(&fragment.plan),
                Arc::clone(&variables_arc),
                parent.0,
            );
            fetch_object_set(
                &fragment_params,
                vec![(parent.0, Arc::clone(&parent.1))],
                &fragment.plan,
            )
            .await;
            EngineObjectData::new(fragment_params, parent.0, Arc::clone(&fragment.plan))
                .with_path(Arc::clone(&parent.1))
        }
        None => EngineObjectData::new(params.clone(), parent.0, empty_plan(type_name))
            .with_path(Arc::clone(&parent.1)),
    };

    let query_data = match &runtime.query_fragment {
        Some(fragment) => {
            let root = params.shared.root_query_oer;
            let fragment_params = params.for_fragment(
                Arc::clone(&fragment.plan),
                Arc::clone(&variables_arc),
                root,
            );
            fetch_object_set(
                &fragment_params,
                vec![(root, ResponsePath::root())],
                &fragment.plan,
            )
            .await;
            Some(EngineObjectData::new(
                fragment_params,
                root,
                Arc::clone(&fragment.plan),
            ))
        }
        None => None,
    };

    let ctx = FieldExecutionContext {
        engine: EngineExecutionContext {
            params: params.clone(),
        },
        coordinate: coordinate.clone(),
        object,
        query_data,
        args: args.clone(),
        variables,
        path: Arc::clone(&field_path),
    };

    let resolved = match &runtime.executor {
        FieldExecutorKind::Resolve(resolver) => resolver.resolve(&ctx).await?,
        FieldExecutorKind::Batch(resolver) => {
            let (tx, rx) = oneshot::channel();
            let entry = BatchEntry {
                class_key: format!("{coordinate}({})", args.canonical_key()),
                ctx,
                tx,
            };
            *submitted = true;
            if let Some(ready) = collector.submit(batch_key(s_idx, type_name), entry) {
                dispatch(params, resolver, ready).await;
            }
            match rx.await {
                Ok(result) => result?,
                Err(oneshot::Canceled) => return Err(FieldError::cancelled()),
            }
        }
    };

    convert_resolved(params, resolved, &step.field_type)
}

/// Resolves a single step outside a plan traversal, e.g. for a lazy
/// `EngineObjectData::fetch` of a cell nothing has touched yet.
pub(crate) async fn resolve_step_on_demand(
    params: &ExecutionParameters,
    oer_id: OerId,
    path: &Arc<ResponsePath>,
    step: &FieldStep,
) -> CellOutcome {
    let type_name = params.shared.arena.get(oer_id).type_name().clone();
    let collector = BatchCollector::new();
    if is_batch_backed(params, &type_name, step) {
        collector.expect(batch_key(0, &type_name), 1);
    }
    let single_step_plan = QueryPlan {
        root_type: type_name,
        operation: PlanOperation::Subquery,
        steps: vec![step.clone()],
        is_root_query_plan: false,
    };
    let parent: Parent = (oer_id, Arc::clone(path));
    resolve_field(params, &parent, &single_step_plan, 0, &collector).await;

    params
        .shared
        .arena
        .get(oer_id)
        .cell(&step.response_key)
        .terminal()
        .unwrap_or_else(|| Err(FieldError::cancelled()))
}

/// Whether the step's `@skip`/`@include` conditions admit it under the
/// current variables.
pub(crate) fn step_included(params: &ExecutionParameters, step: &FieldStep) -> bool {
    use crate::plan::IncludeCondition;

    fn holds(params: &ExecutionParameters, condition: &IncludeCondition) -> bool {
        let actual = condition
            .value
            .clone()
            .into_const(&params.variables)
            .and_then(|v| match v {
                InputValue::Scalar(s) => s.as_boolean(),
                _ => None,
            })
            .unwrap_or(false);
        actual == condition.expect
    }

    step.include_groups.is_empty()
        || step
            .include_groups
            .iter()
            .any(|group| group.iter().all(|c| holds(params, c)))
}

fn is_batch_backed(params: &ExecutionParameters, type_name: &ArcStr, step: &FieldStep) -> bool {
    matches!(
        params
            .shared
            .registry
            .field(type_name, &step.field_name)
            .map(|r| &r.executor),
        Some(FieldExecutorKind::Batch(_)),
    )
}

fn batch_key(s_idx: usize, type_name: &ArcStr) -> (usize, ArcStr) {
    (s_idx, type_name.clone())
}

async fn check_access(
    params: &ExecutionParameters,
    coordinate: &Coordinate,
) -> FieldResult<()> {
    use crate::access::CheckResult;

    let Some(checker) = &params.shared.checker else {
        return Ok(());
    };
    match checker.execute(coordinate).await? {
        CheckResult::Allowed => Ok(()),
        CheckResult::Denied(e) => Err(e),
    }
}

/// Resolves the variable bindings a resolver declared, in declaration order.
async fn resolve_bindings(
    params: &ExecutionParameters,
    parent: &Parent,
    runtime: &FieldRuntime,
    args: &ArgumentValues,
) -> FieldResult<Variables> {
    let mut variables = Variables::new();
    for binding in &runtime.variables {
        match &binding.source {
            VariableSource::FromArgument(argument) => {
                let value = args
                    .get(argument)
                    .map(|v| v.to_input_value(params.shared.codec.as_ref()))
                    .unwrap_or(InputValue::Null);
                variables.insert(binding.name.to_string(), value);
            }
            VariableSource::FromObjectField(path) => {
                let value = read_field_path(params, parent, path).await?;
                variables.insert(binding.name.to_string(), value);
            }
            VariableSource::FromQueryField(path) => {
                let root: Parent = (params.shared.root_query_oer, ResponsePath::root());
                let value = read_field_path(params, &root, path).await?;
                variables.insert(binding.name.to_string(), value);
            }
            VariableSource::Provider(provider) => {
                variables.extend(provider.provide(args).await?);
            }
        }
    }
    Ok(variables)
}

/// Reads a dot-separated field path off an object, resolving the fields on
/// the way if needed.
async fn read_field_path(
    params: &ExecutionParameters,
    start: &Parent,
    path: &str,
) -> FieldResult<InputValue> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(FieldError::new(
            "Empty variable binding path",
            ErrorKind::Validation,
        ));
    }

    // `a.b.c` becomes the selection `a { b { c } }` rooted at the object.
    let mut source = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            source.push_str(" { ");
        }
        source.push_str(segment);
    }
    for _ in 1..segments.len() {
        source.push_str(" }");
    }

    let type_name = params.shared.arena.get(start.0).type_name().clone();
    let raw = RawSelectionSet::parse(type_name, &source, Vec::<&str>::new())
        .map_err(|e| FieldError::new(e, ErrorKind::Validation))?;
    let plan = QueryPlan::build_from_selections(&raw, PlanOperation::Subquery, params.schema())?;
    let fragment_params =
        params.for_fragment(Arc::clone(&plan), Arc::clone(&params.variables), start.0);
    fetch_object_set(
        &fragment_params,
        vec![(start.0, Arc::clone(&start.1))],
        &plan,
    )
    .await;

    // Walk the settled cells down the path.
    let mut oer_id = start.0;
    for (i, segment) in segments.iter().enumerate() {
        let oer = params.shared.arena.get(oer_id);
        let value = match oer.existing_cell(segment).and_then(|c| c.terminal()) {
            Some(outcome) => outcome?,
            None => EngineValue::Null,
        };
        if i + 1 == segments.len() {
            return engine_value_to_input(params, value);
        }
        match value {
            EngineValue::Object(id) => {
                oer_id = id;
            }
            EngineValue::Null => return Ok(InputValue::Null),
            _ => {
                return Err(FieldError::new(
                    format!("Variable binding path \"{path}\" crosses a non-object value"),
                    ErrorKind::Validation,
                ));
            }
        }
    }
    unreachable!("loop returns on the last segment")
}

fn engine_value_to_input(
    params: &ExecutionParameters,
    value: EngineValue,
) -> FieldResult<InputValue> {
    Ok(match value {
        EngineValue::Null => InputValue::Null,
        EngineValue::Scalar(s) => InputValue::Scalar(s),
        EngineValue::Enum(e) => InputValue::Enum(e),
        EngineValue::List(items) => InputValue::list(
            items
                .into_iter()
                .map(|v| engine_value_to_input(params, v))
                .collect::<FieldResult<_>>()?,
        ),
        EngineValue::NodeRef(gid) => InputValue::scalar(params.shared.codec.serialize(&gid)),
        EngineValue::Object(_) => {
            return Err(FieldError::new(
                "Cannot bind a composite value to a variable",
                ErrorKind::Validation,
            ));
        }
    })
}

/// Converts a resolver's return value into the engine representation,
/// allocating object-engine results for composite values.
pub(crate) fn convert_resolved(
    params: &ExecutionParameters,
    value: ResolvedValue,
    expr: &crate::schema::TypeExpr,
) -> FieldResult<EngineValue> {
    Ok(match value {
        ResolvedValue::Null => EngineValue::Null,
        ResolvedValue::Scalar(s) => EngineValue::Scalar(s),
        ResolvedValue::Enum(e) => EngineValue::Enum(e),
        ResolvedValue::List(items) => {
            let inner = if expr.is_list() {
                expr.unwrap_list()
            } else {
                expr.clone()
            };
            EngineValue::List(
                items
                    .into_iter()
                    .map(|v| convert_resolved(params, v, &inner))
                    .collect::<FieldResult<_>>()?,
            )
        }
        ResolvedValue::Object(backing) => {
            let concrete = concrete_type_of(params, expr.base(), &backing)?;
            let id = params.shared.arena.allocate(concrete, None, backing);
            EngineValue::Object(id)
        }
        ResolvedValue::NodeRef(gid) => EngineValue::NodeRef(gid),
        ResolvedValue::Data(data) => EngineValue::Object(data.oer_id()),
    })
}

/// The concrete object type of a composite resolver result: the declared base
/// for object-typed fields, `__typename` narrowing for abstract ones.
fn concrete_type_of(
    params: &ExecutionParameters,
    base: &ArcStr,
    backing: &BackingMap,
) -> FieldResult<ArcStr> {
    match params.schema().type_def(base) {
        Some(TypeDef::Object(_)) => Ok(base.clone()),
        Some(TypeDef::Interface(_)) | Some(TypeDef::Union(_)) => {
            let typename = backing
                .get("__typename")
                .and_then(|v| match v {
                    ResolvedValue::Scalar(s) => s.as_str(),
                    ResolvedValue::Enum(e) => Some(e.as_str()),
                    _ => None,
                })
                .ok_or_else(|| {
                    FieldError::new(
                        format!(
                            "Resolver returned an object for abstract type \"{base}\" without \"__typename\"",
                        ),
                        ErrorKind::DataFetching,
                    )
                })?;
            if !params.schema().object_matches_condition(typename, base) {
                return Err(FieldError::new(
                    format!("\"{typename}\" is not a possible type of \"{base}\""),
                    ErrorKind::DataFetching,
                ));
            }
            Ok(ArcStr::from(typename))
        }
        _ => Err(FieldError::new(
            format!("Field type \"{base}\" is not a composite type"),
            ErrorKind::DataFetching,
        )),
    }
}

/// Gathers the child objects a settled step value contributes, materializing
/// node references whose selections reach beyond identity.
async fn collect_children(
    params: &ExecutionParameters,
    oer_id: OerId,
    path: &Arc<ResponsePath>,
    step: &FieldStep,
    child_plan: &Arc<QueryPlan>,
    out: &mut Vec<Parent>,
) {
    let oer = params.shared.arena.get(oer_id);
    let Some(cell) = oer.existing_cell(&step.response_key) else {
        return;
    };
    let Some(Ok(value)) = cell.terminal() else {
        return;
    };

    let base = path.key(step.response_key.as_str());
    let mut stack: Vec<(EngineValue, Arc<ResponsePath>)> = vec![(value, base)];
    while let Some((value, at)) = stack.pop() {
        match value {
            EngineValue::Object(id) => out.push((id, at)),
            EngineValue::List(items) => {
                for (i, item) in items.into_iter().enumerate() {
                    stack.push((item, at.index(i)));
                }
            }
            EngineValue::NodeRef(gid) => {
                if plan_reaches_beyond_identity(child_plan) {
                    if let Some(id) = materialize_node(params, gid, child_plan, &at).await {
                        out.push((id, at));
                    }
                }
            }
            _ => {}
        }
    }
}

fn plan_reaches_beyond_identity(plan: &QueryPlan) -> bool {
    plan.steps
        .iter()
        .any(|s| s.field_name != "id" && !s.is_typename())
}

/// Runs the node resolver for `gid` once per request, memoized through the
/// node cache.
pub(crate) async fn materialize_node(
    params: &ExecutionParameters,
    gid: GlobalId,
    selections: &Arc<QueryPlan>,
    path: &Arc<ResponsePath>,
) -> Option<OerId> {
    enum Role {
        Join(futures::future::Shared<oneshot::Receiver<Option<OerId>>>),
        Drive(oneshot::Sender<Option<OerId>>),
    }

    let role = {
        let mut cache = params
            .shared
            .node_cache
            .lock()
            .expect("node cache poisoned");
        match cache.get(&gid) {
            Some(NodeSlot::Ready(id)) => return Some(*id),
            Some(NodeSlot::Failed) => return None,
            Some(NodeSlot::Pending(shared)) => Role::Join(shared.clone()),
            None => {
                let (tx, rx) = oneshot::channel();
                cache.insert(gid.clone(), NodeSlot::Pending(rx.shared()));
                Role::Drive(tx)
            }
        }
    };

    match role {
        Role::Join(shared) => shared.await.ok().flatten(),
        Role::Drive(tx) => {
            let result = run_node_resolver(params, &gid, selections, path).await;
            {
                let mut cache = params
                    .shared
                    .node_cache
                    .lock()
                    .expect("node cache poisoned");
                cache.insert(
                    gid.clone(),
                    match result {
                        Some(id) => NodeSlot::Ready(id),
                        None => NodeSlot::Failed,
                    },
                );
            }
            let _ = tx.send(result);
            result
        }
    }
}

async fn run_node_resolver(
    params: &ExecutionParameters,
    gid: &GlobalId,
    selections: &Arc<QueryPlan>,
    path: &Arc<ResponsePath>,
) -> Option<OerId> {
    let record = |e: FieldError| {
        params
            .shared
            .errors
            .push(ExecutionError::new(None, path.segments(), e));
    };

    let Some(resolver) = params.shared.registry.node(&gid.type_name) else {
        record(FieldError::new(
            format!("No node resolver registered for \"{}\"", gid.type_name),
            ErrorKind::InvalidGlobalId,
        ));
        return None;
    };
    let resolver = Arc::clone(resolver);

    if params.shared.cancellation.is_cancelled() {
        record(FieldError::cancelled());
        return None;
    }

    let ctx = NodeExecutionContext {
        engine: EngineExecutionContext {
            params: params.clone(),
        },
        id: gid.clone(),
        selections: Arc::clone(selections),
        path: Arc::clone(path),
    };

    debug!(node = %gid, "materializing node");
    match resolver.resolve_node(&ctx).await {
        Ok(ResolvedValue::Null) => None,
        Ok(ResolvedValue::Object(mut backing)) => {
            // A node's `id` is always readable, even if the resolver did not
            // include it.
            backing
                .entry(CompactString::from("id"))
                .or_insert_with(|| {
                    ResolvedValue::scalar(params.shared.codec.serialize(gid))
                });
            let id = params
                .shared
                .arena
                .allocate(gid.type_name.clone(), Some(gid.clone()), backing);
            Some(id)
        }
        Ok(ResolvedValue::Data(data)) => Some(data.oer_id()),
        Ok(_) => {
            record(FieldError::new(
                format!(
                    "Node resolver for \"{}\" returned a non-object value",
                    gid.type_name,
                ),
                ErrorKind::DataFetching,
            ));
            None
        }
        Err(e) => {
            record(e);
            None
        }
    }
}

fn record_error(
    params: &ExecutionParameters,
    path: &Arc<ResponsePath>,
    span: Span,
    error: FieldError,
) {
    params.shared.errors.push(ExecutionError::new(
        Some(span.start),
        path.segments(),
        error,
    ));
}

fn empty_plan(type_name: &ArcStr) -> Arc<QueryPlan> {
    Arc::new(QueryPlan {
        root_type: type_name.clone(),
        operation: PlanOperation::Subquery,
        steps: Vec::new(),
        is_root_query_plan: false,
    })
}
