//! Query planning: turning a selection IR into the immutable step tree the
//! engine executes.

pub mod cache;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arcstr::ArcStr;
use derive_more::with_trait::{Display, Error};
use indexmap::IndexMap;

use crate::{
    ast::{
        Arguments, Directive, Field, FragmentDefinition, InputValue, Name, Operation,
        OperationKind, Selection,
    },
    parser::{Span, Spanning},
    schema::{TypeExpr, ViaductSchema, meta::FieldMeta},
};

pub use self::cache::{PlanCache, PlanCacheKey};

/// How a plan's top-level steps are scheduled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PlanOperation {
    /// Concurrent field resolution.
    Query,
    /// Serial top-level resolution in source order.
    Mutation,
    /// A plan built from raw selections inside a live request; scheduled like
    /// a query.
    Subquery,
}

/// A planning failure. At bootstrap this is fatal; for request documents it
/// surfaces as a validation error.
#[derive(Clone, Debug, Display, Eq, Error, PartialEq)]
pub enum PlanError {
    #[display("Cannot query field \"{field_name}\" on type \"{type_name}\"")]
    UnknownField {
        #[error(not(source))]
        type_name: ArcStr,
        field_name: Name,
    },

    #[display("Unknown argument \"{argument}\" on \"{type_name}.{field_name}\"")]
    UnknownArgument {
        #[error(not(source))]
        type_name: ArcStr,
        field_name: Name,
        argument: Name,
    },

    #[display("Fields under response key \"{response_key}\" conflict: {reason}")]
    Unmergeable {
        #[error(not(source))]
        response_key: Name,
        reason: String,
    },

    #[display("Unknown fragment \"{_0}\"")]
    UnknownFragment(#[error(not(source))] Name),

    #[display("Unknown type \"{_0}\" in fragment condition")]
    UnknownTypeCondition(#[error(not(source))] Name),

    #[display("Type \"{_0}\" is not a composite type")]
    NotComposite(#[error(not(source))] ArcStr),

    #[display("Schema has no mutation type")]
    NoMutationType,
}

/// One canonical argument of a planned field: schema defaults already applied,
/// variables still symbolic (values are bound at execution time).
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedArgument {
    pub name: ArcStr,
    pub value: InputValue,
    pub arg_type: TypeExpr,
    /// The node type whose global IDs this `ID` argument carries, from
    /// `@idOf`.
    pub id_of: Option<ArcStr>,
}

/// An `@include`/`@skip` application: the step runs only if `value` (after
/// variable substitution) matches `expect`.
#[derive(Clone, Debug, PartialEq)]
pub struct IncludeCondition {
    pub value: InputValue,
    pub expect: bool,
}

/// One field of a plan: everything the engine needs to fill a response key.
#[derive(Clone, Debug)]
pub struct FieldStep {
    pub response_key: Name,
    pub field_name: Name,
    pub arguments: Vec<PlannedArgument>,
    /// Attached only when applicability is narrower than the plan's carrier
    /// type.
    pub type_condition: Option<ArcStr>,
    pub field_type: TypeExpr,
    pub child: Option<Arc<QueryPlan>>,
    /// Disjunction of conjunctions: the step is taken when any group's
    /// conditions all hold. Empty means always.
    pub include_groups: Vec<Vec<IncludeCondition>>,
    pub span: Span,
}

impl FieldStep {
    /// Whether this step applies to a concrete object type.
    pub fn applies_to(&self, schema: &ViaductSchema, object_type: &str) -> bool {
        match &self.type_condition {
            Some(cond) => schema.object_matches_condition(object_type, cond),
            None => true,
        }
    }

    /// Whether this is the meta `__typename` selection.
    pub fn is_typename(&self) -> bool {
        self.field_name == "__typename"
    }
}

/// An immutable, cacheable execution plan rooted at a composite type.
#[derive(Clone, Debug)]
pub struct QueryPlan {
    pub root_type: ArcStr,
    pub operation: PlanOperation,
    pub steps: Vec<FieldStep>,
    /// Whether this is the request's root query plan; sub-selection plans and
    /// child plans are not.
    pub is_root_query_plan: bool,
}

impl QueryPlan {
    /// Builds a plan for a parsed operation of a request document.
    pub fn build_operation(
        operation: &Operation,
        fragments: &HashMap<Name, FragmentDefinition>,
        schema: &ViaductSchema,
    ) -> Result<Arc<Self>, PlanError> {
        let (root_type, plan_op) = match operation.kind {
            OperationKind::Query => (schema.query_type_name().clone(), PlanOperation::Query),
            OperationKind::Mutation => (
                schema
                    .mutation_type_name()
                    .ok_or(PlanError::NoMutationType)?
                    .clone(),
                PlanOperation::Mutation,
            ),
            OperationKind::Subscription => {
                // Rejected before planning; treated as a query if it ever
                // gets here.
                (schema.query_type_name().clone(), PlanOperation::Query)
            }
        };

        let builder = PlanBuilder { schema, fragments };
        let steps = builder.plan_selections(&root_type, &operation.selection_set)?;
        Ok(Arc::new(Self {
            root_type,
            operation: plan_op,
            steps,
            is_root_query_plan: plan_op == PlanOperation::Query,
        }))
    }

    /// Builds a plan from raw selections, skipping document parsing. Used for
    /// required-selection sets and sub-selection execution.
    pub fn build_from_selections(
        raw: &crate::selections::RawSelectionSet,
        operation: PlanOperation,
        schema: &ViaductSchema,
    ) -> Result<Arc<Self>, PlanError> {
        if schema
            .type_def(&raw.type_condition)
            .is_none_or(|t| !t.is_composite())
        {
            return Err(PlanError::NotComposite(raw.type_condition.clone()));
        }
        let builder = PlanBuilder {
            schema,
            fragments: &raw.fragments,
        };
        let steps = builder.plan_selections(&raw.type_condition, &raw.selections)?;
        Ok(Arc::new(Self {
            root_type: raw.type_condition.clone(),
            operation,
            steps,
            is_root_query_plan: false,
        }))
    }

    /// The step answering `response_key`, if the plan has one.
    pub fn step(&self, response_key: &str) -> Option<&FieldStep> {
        self.steps.iter().find(|s| s.response_key == response_key)
    }
}

/// A field occurrence flattened out of the fragment structure.
struct FlatField<'a> {
    field: &'a Field,
    condition: Option<ArcStr>,
    includes: Vec<IncludeCondition>,
}

struct PlanBuilder<'a> {
    schema: &'a ViaductSchema,
    fragments: &'a HashMap<Name, FragmentDefinition>,
}

impl PlanBuilder<'_> {
    fn plan_selections<'s>(
        &'s self,
        carrier: &ArcStr,
        selections: &'s [Selection],
    ) -> Result<Vec<FieldStep>, PlanError> {
        let mut flat = Vec::new();
        let mut spread_guard = HashSet::new();
        self.flatten(
            carrier,
            selections,
            None,
            &Vec::new(),
            &mut flat,
            &mut spread_guard,
        )?;

        // Group by response key, preserving first-appearance order.
        let mut groups: IndexMap<&Name, Vec<FlatField<'s>>> = IndexMap::new();
        for f in flat {
            groups.entry(f.field.response_key()).or_default().push(f);
        }

        let mut steps = Vec::with_capacity(groups.len());
        for (response_key, group) in groups {
            steps.extend(self.collapse_group(carrier, response_key, group)?);
        }
        Ok(steps)
    }

    /// Expands fragments into a flat field list, narrowing type conditions
    /// and accumulating `@skip`/`@include` conditions on the way down.
    fn flatten<'s>(
        &'s self,
        carrier: &ArcStr,
        selections: &'s [Selection],
        condition: Option<&ArcStr>,
        includes: &[IncludeCondition],
        out: &mut Vec<FlatField<'s>>,
        spread_guard: &mut HashSet<&'s Name>,
    ) -> Result<(), PlanError> {
        for selection in selections {
            match selection {
                Selection::Field(f) => {
                    let mut field_includes = includes.to_vec();
                    collect_conditions(f.item.directives.as_deref(), &mut field_includes);
                    out.push(FlatField {
                        field: &f.item,
                        condition: condition.cloned(),
                        includes: field_includes,
                    });
                }
                Selection::InlineFragment(frag) => {
                    let mut sub_includes = includes.to_vec();
                    collect_conditions(frag.item.directives.as_deref(), &mut sub_includes);
                    let narrowed = self.narrow(
                        carrier,
                        condition,
                        frag.item.type_condition.as_ref().map(|c| &c.item),
                    )?;
                    self.flatten(
                        carrier,
                        &frag.item.selection_set,
                        narrowed.as_ref(),
                        &sub_includes,
                        out,
                        spread_guard,
                    )?;
                }
                Selection::FragmentSpread(spread) => {
                    let def = self
                        .fragments
                        .get(&spread.item.name.item)
                        .ok_or_else(|| PlanError::UnknownFragment(spread.item.name.item.clone()))?;
                    if !spread_guard.insert(&spread.item.name.item) {
                        // A cycle through named fragments; the first expansion
                        // already contributed these fields.
                        continue;
                    }
                    let mut sub_includes = includes.to_vec();
                    collect_conditions(spread.item.directives.as_deref(), &mut sub_includes);
                    let narrowed =
                        self.narrow(carrier, condition, Some(&def.type_condition.item))?;
                    self.flatten(
                        carrier,
                        &def.selection_set,
                        narrowed.as_ref(),
                        &sub_includes,
                        out,
                        spread_guard,
                    )?;
                    spread_guard.remove(&spread.item.name.item);
                }
            }
        }
        Ok(())
    }

    /// Keeps a fragment condition only when it narrows applicability relative
    /// to the carrier (and the already-active condition).
    fn narrow(
        &self,
        carrier: &ArcStr,
        current: Option<&ArcStr>,
        fragment_type: Option<&Name>,
    ) -> Result<Option<ArcStr>, PlanError> {
        let Some(fragment_type) = fragment_type else {
            return Ok(current.cloned());
        };
        if self
            .schema
            .type_def(fragment_type)
            .is_none_or(|t| !t.is_composite())
        {
            return Err(PlanError::UnknownTypeCondition(fragment_type.clone()));
        }

        let effective_carrier = current.unwrap_or(carrier);
        let carrier_objects: HashSet<&str> = self
            .schema
            .possible_objects(effective_carrier)
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        let fragment_objects: HashSet<&str> = self
            .schema
            .possible_objects(fragment_type)
            .iter()
            .map(|m| m.name.as_str())
            .collect();

        if carrier_objects.is_subset(&fragment_objects) {
            // Same set or wider: not narrower, keep what we had.
            Ok(current.cloned())
        } else {
            Ok(Some(ArcStr::from(fragment_type.as_str())))
        }
    }

    /// Collapses one response-key group into field steps: occurrences whose
    /// conditions can apply to the same concrete object merge (and must
    /// agree); mutually exclusive occurrences become separate steps.
    fn collapse_group<'s>(
        &self,
        carrier: &ArcStr,
        response_key: &Name,
        group: Vec<FlatField<'s>>,
    ) -> Result<Vec<FieldStep>, PlanError> {
        let mut clusters: Vec<Vec<FlatField<'s>>> = Vec::new();
        for f in group {
            let overlapping = clusters.iter_mut().find(|cluster| {
                cluster
                    .iter()
                    .any(|other| self.conditions_overlap(&other.condition, &f.condition))
            });
            match overlapping {
                Some(cluster) => cluster.push(f),
                None => clusters.push(vec![f]),
            }
        }

        clusters
            .into_iter()
            .map(|cluster| self.build_step(carrier, response_key, cluster))
            .collect()
    }

    fn conditions_overlap(&self, a: &Option<ArcStr>, b: &Option<ArcStr>) -> bool {
        match (a, b) {
            (None, _) | (_, None) => true,
            (Some(a), Some(b)) => self.schema.is_spreadable(a, b),
        }
    }

    fn build_step<'s>(
        &self,
        carrier: &ArcStr,
        response_key: &Name,
        cluster: Vec<FlatField<'s>>,
    ) -> Result<FieldStep, PlanError> {
        let first = &cluster[0];
        let field_name = &first.field.name.item;

        for other in &cluster[1..] {
            if other.field.name.item != *field_name {
                return Err(PlanError::Unmergeable {
                    response_key: response_key.clone(),
                    reason: format!(
                        "selects both \"{field_name}\" and \"{}\"",
                        other.field.name.item,
                    ),
                });
            }
            if !arguments_equivalent(first.field.arguments.as_ref(), other.field.arguments.as_ref())
            {
                return Err(PlanError::Unmergeable {
                    response_key: response_key.clone(),
                    reason: "same field selected with different arguments".into(),
                });
            }
        }

        // Merged applicability: the widest condition present in the cluster.
        let type_condition = if cluster.iter().any(|f| f.condition.is_none()) {
            None
        } else {
            let mut widest = first.condition.clone();
            for f in &cluster[1..] {
                let cand = f.condition.as_ref().expect("checked above");
                let widest_name = widest.as_ref().expect("checked above");
                let widest_set = self.schema.possible_objects(widest_name).len();
                if self.schema.possible_objects(cand).len() > widest_set {
                    widest = f.condition.clone();
                }
            }
            widest
        };

        // The type the field is looked up on.
        let lookup_type = type_condition.as_ref().unwrap_or(carrier);

        if field_name == "__typename" {
            return Ok(FieldStep {
                response_key: response_key.clone(),
                field_name: field_name.clone(),
                arguments: Vec::new(),
                type_condition,
                field_type: TypeExpr::named("String", false),
                child: None,
                include_groups: include_groups_of(&cluster),
                span: first.field.name.span,
            });
        }

        let meta = self
            .schema
            .field_of(lookup_type, field_name)
            .or_else(|| {
                // A merged condition may be an interface while the field
                // lives on the concrete members; fall back to the carrier.
                self.schema.field_of(carrier, field_name)
            })
            .ok_or_else(|| PlanError::UnknownField {
                type_name: lookup_type.clone(),
                field_name: field_name.clone(),
            })?;

        let arguments = self.canonicalize_arguments(lookup_type, field_name, meta, &cluster)?;

        // Children: union of every occurrence's sub-selections, planned
        // against the field's base composite type.
        let child_selections: Vec<Selection> = cluster
            .iter()
            .filter_map(|f| f.field.selection_set.as_ref())
            .flatten()
            .cloned()
            .collect();
        let child = if child_selections.is_empty() {
            None
        } else {
            let base = meta.field_type.base().clone();
            let steps = self.plan_selections(&base, &child_selections)?;
            Some(Arc::new(QueryPlan {
                root_type: base,
                operation: PlanOperation::Query,
                steps,
                is_root_query_plan: false,
            }))
        };

        Ok(FieldStep {
            response_key: response_key.clone(),
            field_name: field_name.clone(),
            arguments,
            type_condition,
            field_type: meta.field_type.clone(),
            child,
            include_groups: include_groups_of(&cluster),
            span: first.field.name.span,
        })
    }

    /// Produces the canonical argument record: schema argument order, schema
    /// defaults applied, `@idOf` metadata attached.
    fn canonicalize_arguments(
        &self,
        type_name: &ArcStr,
        field_name: &Name,
        meta: &FieldMeta,
        cluster: &[FlatField<'_>],
    ) -> Result<Vec<PlannedArgument>, PlanError> {
        let supplied = cluster[0].field.arguments.as_ref();

        if let Some(args) = supplied {
            for (name, _) in args.item.iter() {
                if meta.argument(&name.item).is_none() {
                    return Err(PlanError::UnknownArgument {
                        type_name: type_name.clone(),
                        field_name: field_name.clone(),
                        argument: name.item.clone(),
                    });
                }
            }
        }

        let mut out = Vec::with_capacity(meta.arguments.len());
        for decl in &meta.arguments {
            let supplied_value = supplied
                .and_then(|args| args.item.get(&decl.name))
                .map(|v| v.item.clone());
            let value = match supplied_value {
                Some(v) => v,
                None => match &decl.default_value {
                    Some(d) => d.clone(),
                    None => continue,
                },
            };
            out.push(PlannedArgument {
                name: decl.name.clone(),
                value,
                arg_type: decl.arg_type.clone(),
                id_of: decl.id_of.clone(),
            });
        }
        Ok(out)
    }
}

fn include_groups_of(cluster: &[FlatField<'_>]) -> Vec<Vec<IncludeCondition>> {
    if cluster.iter().any(|f| f.includes.is_empty()) {
        // At least one unconditional occurrence: the step always runs.
        Vec::new()
    } else {
        cluster.iter().map(|f| f.includes.clone()).collect()
    }
}

fn collect_conditions(
    directives: Option<&[Spanning<Directive>]>,
    out: &mut Vec<IncludeCondition>,
) {
    let Some(directives) = directives else {
        return;
    };
    for d in directives {
        let expect = match d.item.name.item.as_str() {
            "include" => true,
            "skip" => false,
            _ => continue,
        };
        let value = d
            .item
            .arguments
            .as_ref()
            .and_then(|args| args.item.get("if"))
            .map(|v| v.item.clone())
            .unwrap_or(InputValue::Null);
        out.push(IncludeCondition { value, expect });
    }
}

fn arguments_equivalent(a: Option<&Spanning<Arguments>>, b: Option<&Spanning<Arguments>>) -> bool {
    let empty = |args: Option<&Spanning<Arguments>>| args.is_none_or(|a| a.item.is_empty());
    match (a, b) {
        (None, None) => true,
        (a, b) if empty(a) && empty(b) => true,
        (Some(a), Some(b)) => {
            a.item.len() == b.item.len()
                && a.item.iter().all(|(name, value)| {
                    b.item
                        .get(&name.item)
                        .is_some_and(|other| value.item.unlocated_eq(&other.item))
                })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::{
        ast::{Definition, OperationKind},
        parser::parse_document_source,
        schema::{SchemaOptions, ViaductSchema, build_schema},
        selections::RawSelectionSet,
    };

    use super::{PlanError, PlanOperation, QueryPlan};

    fn schema() -> ViaductSchema {
        build_schema(
            &[(
                "test".into(),
                r#"
                type Query { hero: Character search: [SearchResult] }
                interface Character { id: ID! name: String! friends(limit: Int = 5): [Character!] }
                type Human implements Character {
                    id: ID! name: String! friends(limit: Int = 5): [Character!] homePlanet: String
                }
                type Droid implements Character {
                    id: ID! name: String! friends(limit: Int = 5): [Character!] primaryFunction: String
                }
                union SearchResult = Human | Droid
                "#
                .into(),
            )],
            &SchemaOptions::default(),
        )
        .unwrap()
    }

    fn plan(doc: &str) -> Result<std::sync::Arc<QueryPlan>, PlanError> {
        let schema = schema();
        let document = parse_document_source(doc).unwrap();
        let mut fragments = HashMap::new();
        let mut operation = None;
        for def in document {
            match def {
                Definition::Operation(op) => operation = Some(op.item),
                Definition::Fragment(f) => {
                    fragments.insert(f.item.name.item.clone(), f.item);
                }
            }
        }
        let operation = operation.unwrap();
        assert_eq!(operation.kind, OperationKind::Query);
        QueryPlan::build_operation(&operation, &fragments, &schema)
    }

    #[test]
    fn steps_follow_source_order_of_response_keys() {
        let plan = plan("{ hero { name id ... on Human { homePlanet } } }").unwrap();
        let hero = plan.step("hero").unwrap();
        let child = hero.child.as_ref().unwrap();
        let keys: Vec<_> = child.steps.iter().map(|s| s.response_key.as_str()).collect();
        assert_eq!(keys, ["name", "id", "homePlanet"]);
    }

    #[test]
    fn conditions_attach_only_when_narrower() {
        let plan = plan(
            "{ hero { ... on Character { id } ... on Human { homePlanet } } }",
        )
        .unwrap();
        let child = plan.step("hero").unwrap().child.as_ref().unwrap();
        // `Character` condition matches the carrier, so it is dropped.
        assert_eq!(child.step("id").unwrap().type_condition, None);
        assert_eq!(
            child.step("homePlanet").unwrap().type_condition.as_deref(),
            Some("Human"),
        );
    }

    #[test]
    fn overlapping_occurrences_merge_children() {
        let plan = plan(
            "{ hero { friends(limit: 5) { id } ... on Human { friends(limit: 5) { name } } } }",
        )
        .unwrap();
        let child = plan.step("hero").unwrap().child.as_ref().unwrap();
        assert_eq!(child.steps.len(), 1);
        let friends = child.step("friends").unwrap();
        assert_eq!(friends.type_condition, None);
        let merged = friends.child.as_ref().unwrap();
        assert!(merged.step("id").is_some());
        assert!(merged.step("name").is_some());
    }

    #[test]
    fn disjoint_conditions_stay_separate_steps() {
        let plan = plan(
            "{ search { ... on Human { kind: homePlanet } ... on Droid { kind: primaryFunction } } }",
        )
        .unwrap();
        let child = plan.step("search").unwrap().child.as_ref().unwrap();
        assert_eq!(child.steps.len(), 2);
    }

    #[test]
    fn conflicting_arguments_are_rejected() {
        let err = plan("{ hero { friends(limit: 1) { id } friends(limit: 2) { id } } }")
            .unwrap_err();
        assert!(matches!(err, PlanError::Unmergeable { .. }));
    }

    #[test]
    fn defaults_are_canonicalized_into_the_record() {
        let plan = plan("{ hero { friends { id } } }").unwrap();
        let friends = plan.step("hero").unwrap().child.as_ref().unwrap().step("friends").unwrap();
        assert_eq!(friends.arguments.len(), 1);
        assert_eq!(friends.arguments[0].name, "limit");
    }

    #[test]
    fn build_from_selections_skips_document_parsing() {
        let schema = schema();
        let raw = RawSelectionSet::parse("Character", "id name", Vec::<&str>::new()).unwrap();
        let plan = QueryPlan::build_from_selections(&raw, PlanOperation::Subquery, &schema).unwrap();
        assert_eq!(plan.operation, PlanOperation::Subquery);
        assert_eq!(plan.root_type, "Character");
        assert!(!plan.is_root_query_plan);
        assert_eq!(plan.steps.len(), 2);
    }

    #[test]
    fn unknown_field_is_a_plan_error() {
        assert!(matches!(
            plan("{ hero { nope } }").unwrap_err(),
            PlanError::UnknownField { .. },
        ));
    }
}
