//! The bootstrap-built registry mapping coordinates to resolver executors.

use std::sync::Arc;

use arcstr::ArcStr;
use fnv::FnvHashMap;
use tracing::warn;

use crate::{
    GraphQLBuildError,
    plan::{PlanOperation, QueryPlan},
    resolver::{
        BatchFieldResolver, Coordinate, FieldResolver, FieldResolverDescriptor, NodeResolver,
        NodeResolverDescriptor, VariableBinding,
    },
    schema::{ViaductSchema, meta::TypeDef},
    selections::RawSelectionSet,
};

/// Exactly one resolution capability per coordinate.
#[derive(Clone)]
pub(crate) enum FieldExecutorKind {
    Resolve(Arc<dyn FieldResolver>),
    Batch(Arc<dyn BatchFieldResolver>),
}

/// A validated, plan-compiled required selection set.
#[derive(Clone)]
pub(crate) struct CompiledFragment {
    #[allow(dead_code, reason = "kept for the typed tenant layer's introspection")]
    pub selections: RawSelectionSet,
    pub plan: Arc<QueryPlan>,
}

/// The runtime form of one registered field resolver.
#[derive(Clone)]
pub(crate) struct FieldRuntime {
    pub executor: FieldExecutorKind,
    pub object_fragment: Option<CompiledFragment>,
    pub query_fragment: Option<CompiledFragment>,
    pub variables: Vec<VariableBinding>,
    #[allow(dead_code, reason = "carried for the typed tenant layer")]
    pub selective: bool,
}

/// Registry of every resolver executor, built once at bootstrap. Keyed by
/// type name, then field name.
pub struct ResolverRegistry {
    fields: FnvHashMap<ArcStr, FnvHashMap<ArcStr, FieldRuntime>>,
    nodes: FnvHashMap<ArcStr, Arc<dyn NodeResolver>>,
}

/// Options governing registry validation.
#[derive(Clone, Debug, Default)]
pub struct RegistryOptions {
    /// Warn and skip on duplicate *field* resolver coordinates instead of
    /// failing the build. Node resolver duplicates always fail.
    pub lenient_field_discovery: bool,
    /// Install the engine-provided `node`/`nodes` query resolvers.
    pub enable_node_resolvers: bool,
}

impl ResolverRegistry {
    /// Builds and validates the registry against the **full** schema.
    pub fn build(
        schema: &ViaductSchema,
        field_descriptors: Vec<FieldResolverDescriptor>,
        node_descriptors: Vec<NodeResolverDescriptor>,
        options: &RegistryOptions,
    ) -> Result<Self, GraphQLBuildError> {
        let mut fields: FnvHashMap<ArcStr, FnvHashMap<ArcStr, FieldRuntime>> =
            FnvHashMap::default();
        let mut nodes: FnvHashMap<ArcStr, Arc<dyn NodeResolver>> = FnvHashMap::default();

        for descriptor in node_descriptors {
            let Some(object) = schema.object(&descriptor.type_name) else {
                warn!(
                    type_name = %descriptor.type_name,
                    "node resolver bound to a type that is not an object; skipping",
                );
                continue;
            };
            if !object.is_node() {
                warn!(
                    type_name = %descriptor.type_name,
                    "node resolver bound to a non-node object; skipping",
                );
                continue;
            }
            if nodes
                .insert(descriptor.type_name.clone(), descriptor.resolver)
                .is_some()
            {
                return Err(GraphQLBuildError::DuplicateNodeResolver {
                    type_name: descriptor.type_name,
                });
            }
        }

        for descriptor in field_descriptors {
            let coordinate = descriptor.coordinate.clone();

            let executor = match (&descriptor.resolve, &descriptor.batch_resolve) {
                (Some(r), None) => FieldExecutorKind::Resolve(Arc::clone(r)),
                (None, Some(b)) => FieldExecutorKind::Batch(Arc::clone(b)),
                (Some(_), Some(_)) => {
                    return Err(GraphQLBuildError::AmbiguousResolver { coordinate });
                }
                (None, None) => {
                    return Err(GraphQLBuildError::MissingCapability { coordinate });
                }
            };

            // Resolvers only attach to `@resolver` fields of object types;
            // anything else is discovery noise.
            let field_meta = match schema.type_def(&coordinate.type_name) {
                Some(TypeDef::Object(object)) => object.field_by_name(&coordinate.field_name),
                _ => {
                    warn!(%coordinate, "resolver bound to a non-object type; skipping");
                    continue;
                }
            };
            let Some(field_meta) = field_meta else {
                warn!(%coordinate, "resolver bound to an unknown field; skipping");
                continue;
            };
            if !field_meta.has_resolver {
                warn!(
                    %coordinate,
                    "resolver bound to a field without @resolver; skipping",
                );
                continue;
            }

            let per_type = fields.entry(coordinate.type_name.clone()).or_default();
            if per_type.contains_key(&coordinate.field_name) {
                if options.lenient_field_discovery {
                    warn!(%coordinate, "duplicate field resolver; keeping the first");
                    continue;
                }
                return Err(GraphQLBuildError::DuplicateResolver { coordinate });
            }

            let declared: Vec<ArcStr> = descriptor
                .variables
                .iter()
                .map(|b| b.name.clone())
                .collect();

            let object_fragment = descriptor
                .object_fragment
                .map(|f| compile_fragment(schema, &coordinate, f, &declared))
                .transpose()?;
            let query_fragment = descriptor
                .query_fragment
                .map(|f| compile_fragment(schema, &coordinate, f, &declared))
                .transpose()?;

            fields
                .get_mut(&coordinate.type_name)
                .expect("entry created above")
                .insert(
                    coordinate.field_name.clone(),
                    FieldRuntime {
                        executor,
                        object_fragment,
                        query_fragment,
                        variables: descriptor.variables,
                        selective: descriptor.selective,
                    },
                );
        }

        if options.enable_node_resolvers {
            install_builtin_node_resolvers(schema, &mut fields);
        }

        let registry = Self { fields, nodes };

        if options.enable_node_resolvers {
            registry.validate_node_coverage(schema)?;
        }
        registry.validate_query_coverage(schema)?;

        Ok(registry)
    }

    /// Every object marked as a node through an object-level `@resolver`
    /// must have its node resolver registered.
    fn validate_node_coverage(&self, schema: &ViaductSchema) -> Result<(), GraphQLBuildError> {
        for object in schema.node_implementors() {
            if object.has_resolver && !self.nodes.contains_key(&object.name) {
                return Err(GraphQLBuildError::MissingNodeResolver {
                    type_name: object.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Every scalar field of the query root must be resolvable.
    fn validate_query_coverage(&self, schema: &ViaductSchema) -> Result<(), GraphQLBuildError> {
        let query = schema
            .object(schema.query_type_name())
            .expect("schema validation guarantees the query root");
        for field in &query.fields {
            let leaf = schema
                .type_def(field.field_type.base())
                .is_some_and(TypeDef::is_leaf);
            if leaf && self.field(&query.name, &field.name).is_none() {
                return Err(GraphQLBuildError::MissingQueryResolver {
                    field_name: field.name.as_str().into(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldRuntime> {
        self.fields.get(type_name)?.get(field_name)
    }

    pub(crate) fn node(&self, type_name: &str) -> Option<&Arc<dyn NodeResolver>> {
        self.nodes.get(type_name)
    }

    /// Number of registered field resolvers.
    pub fn field_count(&self) -> usize {
        self.fields.values().map(FnvHashMap::len).sum()
    }
}

/// Installs the engine-provided `node`/`nodes` executors on the query root.
/// Tenant-registered resolvers for the same coordinates win.
fn install_builtin_node_resolvers(
    schema: &ViaductSchema,
    fields: &mut FnvHashMap<ArcStr, FnvHashMap<ArcStr, FieldRuntime>>,
) {
    use crate::resolver::node::{NodeFieldResolver, NodesFieldResolver};

    let query_name = schema.query_type_name().clone();
    let builtin = |executor: FieldExecutorKind| FieldRuntime {
        executor,
        object_fragment: None,
        query_fragment: None,
        variables: Vec::new(),
        selective: false,
    };

    if schema.field_of(&query_name, "node").is_some() {
        fields
            .entry(query_name.clone())
            .or_default()
            .entry("node".into())
            .or_insert_with(|| {
                builtin(FieldExecutorKind::Resolve(Arc::new(NodeFieldResolver)))
            });
    }
    if schema.field_of(&query_name, "nodes").is_some() {
        fields
            .entry(query_name)
            .or_default()
            .entry("nodes".into())
            .or_insert_with(|| {
                builtin(FieldExecutorKind::Resolve(Arc::new(NodesFieldResolver)))
            });
    }
}

fn compile_fragment(
    schema: &ViaductSchema,
    coordinate: &Coordinate,
    mut fragment: RawSelectionSet,
    declared: &[ArcStr],
) -> Result<CompiledFragment, GraphQLBuildError> {
    for name in declared {
        if !fragment.variables.iter().any(|v| v == name.as_str()) {
            fragment.variables.push(name.as_str().into());
        }
    }

    fragment
        .validate(schema)
        .map_err(|source| GraphQLBuildError::RequiredSelectionsAreInvalid {
            coordinate: coordinate.clone(),
            source,
        })?;

    let plan = QueryPlan::build_from_selections(&fragment, PlanOperation::Subquery, schema)
        .map_err(|e| GraphQLBuildError::RequiredSelectionsAreInvalid {
            coordinate: coordinate.clone(),
            source: crate::selections::RequiredSelectionsAreInvalid {
                errors: vec![e.to_string()],
            },
        })?;

    Ok(CompiledFragment {
        selections: fragment,
        plan,
    })
}
