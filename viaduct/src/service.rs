//! The transport-agnostic execution entrypoint and its builder.

use std::{
    any::Any,
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::{Serialize, Serializer, ser::SerializeMap as _};
use tracing::debug;

use crate::{
    GraphQLBuildError,
    access::{CheckerExecutor, CheckerExecutorFactory},
    ast::{Definition, FragmentDefinition, Name, Operation},
    executor::{
        CancellationToken, EngineFlags, ErrorKind, ExecutionError, ExecutionParameters,
        FieldError, Variables, serialize::serialize_response,
    },
    global_id::{Base64GlobalIdCodec, SharedGlobalIdCodec},
    instrumentation::{ChainedInstrumentation, Instrumentation, MeterRegistry, NoopInstrumentation},
    parser::parse_document_source,
    plan::{PlanCache, PlanCacheKey, QueryPlan},
    resolver::{
        FieldResolverDescriptor, NodeResolverDescriptor, TenantBootstrapper,
        registry::{RegistryOptions, ResolverRegistry},
    },
    schema::{SchemaOptions, ViaductSchema, build_schema},
    validation::validate_document,
    value::Value,
};

/// Feature-flag lookup installed at build time.
pub trait FlagManager: Send + Sync {
    /// Whether the named flag is on.
    fn flag(&self, name: &str) -> bool;
}

impl<F> FlagManager for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn flag(&self, name: &str) -> bool {
        self(name)
    }
}

/// Gates handle-based sub-selection execution.
pub const ENABLE_SUBQUERY_EXECUTION_VIA_HANDLE: &str = "ENABLE_SUBQUERY_EXECUTION_VIA_HANDLE";
/// Moves access checks into the field-resolution strategy.
pub const EXECUTE_ACCESS_CHECKS_IN_MODSTRAT: &str = "EXECUTE_ACCESS_CHECKS_IN_MODSTRAT";

/// One execution request.
#[derive(Default)]
pub struct ExecutionInput {
    /// Selects the scoped schema; `None` executes against the full schema.
    pub schema_id: Option<String>,
    /// The document source. Exactly one of `document`/`persisted_query` must
    /// be set.
    pub document: Option<String>,
    /// A persisted-query id resolved through the configured lookup.
    pub persisted_query: Option<String>,
    pub operation_name: Option<String>,
    pub variables: Variables,
    /// Opaque application state resolvers can downcast to.
    pub request_context: Option<Arc<dyn Any + Send + Sync>>,
    /// Implementation-defined extensions, merged into the response.
    pub extensions: Option<serde_json::Value>,
    /// Cancellation signal; a fresh token is used when absent.
    pub cancellation: Option<CancellationToken>,
}

impl ExecutionInput {
    /// An input executing `document` with no variables.
    pub fn document(document: impl Into<String>) -> Self {
        Self {
            document: Some(document.into()),
            ..Self::default()
        }
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn schema_id(mut self, schema_id: impl Into<String>) -> Self {
        self.schema_id = Some(schema_id.into());
        self
    }

    pub fn request_context(mut self, context: Arc<dyn Any + Send + Sync>) -> Self {
        self.request_context = Some(context);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// The result of one execution: data, deterministically-sorted errors, and
/// merged extensions.
#[derive(Debug)]
pub struct ExecutionResponse {
    pub data: Option<Value>,
    pub errors: Vec<ExecutionError>,
    pub extensions: Option<serde_json::Value>,
}

impl ExecutionResponse {
    fn failure(error: FieldError) -> Self {
        Self {
            data: None,
            errors: vec![ExecutionError::at_origin(error)],
            extensions: None,
        }
    }

    fn failures(errors: Vec<ExecutionError>) -> Self {
        let mut errors = errors;
        errors.sort();
        Self {
            data: None,
            errors,
            extensions: None,
        }
    }
}

impl Serialize for ExecutionResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("data", &self.data)?;
        if !self.errors.is_empty() {
            map.serialize_entry("errors", &self.errors)?;
        }
        if let Some(extensions) = &self.extensions {
            map.serialize_entry("extensions", extensions)?;
        }
        map.end()
    }
}

/// Lookup for persisted-query ids.
pub type PersistedQueryLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Builder for a [`Viaduct`] service instance.
pub struct ViaductBuilder {
    sdl_sources: Vec<(String, String)>,
    scope_bindings: HashMap<String, HashSet<String>>,
    bootstrappers: Vec<Arc<dyn TenantBootstrapper>>,
    checker_factory: Option<Arc<dyn CheckerExecutorFactory>>,
    flag_manager: Option<Arc<dyn FlagManager>>,
    instrumentation: Vec<Arc<dyn Instrumentation>>,
    meter_registry: Option<Arc<dyn MeterRegistry>>,
    codec: SharedGlobalIdCodec,
    allow_subscriptions: bool,
    enable_node_resolvers: bool,
    lenient_field_discovery: bool,
    plan_cache_capacity: usize,
    persisted_queries: Option<PersistedQueryLookup>,
}

impl Default for ViaductBuilder {
    fn default() -> Self {
        Self {
            sdl_sources: Vec::new(),
            scope_bindings: HashMap::new(),
            bootstrappers: Vec::new(),
            checker_factory: None,
            flag_manager: None,
            instrumentation: Vec::new(),
            meter_registry: None,
            codec: Arc::new(Base64GlobalIdCodec),
            allow_subscriptions: false,
            enable_node_resolvers: true,
            lenient_field_discovery: false,
            plan_cache_capacity: 512,
            persisted_queries: None,
        }
    }
}

impl ViaductBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers SDL sources and the scope bindings selecting per-schema-id
    /// views.
    pub fn schema_configuration(
        mut self,
        sdl_sources: Vec<(String, String)>,
        scope_bindings: HashMap<String, HashSet<String>>,
    ) -> Self {
        self.sdl_sources = sdl_sources;
        self.scope_bindings = scope_bindings;
        self
    }

    /// Adds one SDL source.
    pub fn schema_source(mut self, name: impl Into<String>, sdl: impl Into<String>) -> Self {
        self.sdl_sources.push((name.into(), sdl.into()));
        self
    }

    /// Registers a package of resolvers.
    pub fn tenant_bootstrapper(mut self, bootstrapper: Arc<dyn TenantBootstrapper>) -> Self {
        self.bootstrappers.push(bootstrapper);
        self
    }

    /// Installs the access-check plug-in.
    pub fn checker_executor_factory(mut self, factory: Arc<dyn CheckerExecutorFactory>) -> Self {
        self.checker_factory = Some(factory);
        self
    }

    /// Installs the feature-flag lookup.
    pub fn flag_manager(mut self, manager: Arc<dyn FlagManager>) -> Self {
        self.flag_manager = Some(manager);
        self
    }

    /// Adds a resolver instrumentation.
    pub fn instrumentation(mut self, instrumentation: Arc<dyn Instrumentation>) -> Self {
        self.instrumentation.push(instrumentation);
        self
    }

    /// Installs the counter sink.
    pub fn meter_registry(mut self, registry: Arc<dyn MeterRegistry>) -> Self {
        self.meter_registry = Some(registry);
        self
    }

    /// Overrides the global ID codec.
    pub fn global_id_codec(mut self, codec: SharedGlobalIdCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Permits a `Subscription` type in the schema (test-only escape hatch;
    /// subscription operations still do not execute).
    pub fn allow_subscriptions(mut self, allow: bool) -> Self {
        self.allow_subscriptions = allow;
        self
    }

    /// Disables the engine-provided `node`/`nodes` resolvers.
    pub fn enable_node_resolvers(mut self, enable: bool) -> Self {
        self.enable_node_resolvers = enable;
        self
    }

    /// Restores warn-and-skip behavior for duplicate field resolvers during
    /// discovery. Node resolver duplicates always fail.
    pub fn lenient_field_discovery(mut self, lenient: bool) -> Self {
        self.lenient_field_discovery = lenient;
        self
    }

    /// Bounds the shared plan cache.
    pub fn plan_cache_capacity(mut self, capacity: usize) -> Self {
        self.plan_cache_capacity = capacity;
        self
    }

    /// Installs the persisted-query lookup.
    pub fn persisted_queries(mut self, lookup: PersistedQueryLookup) -> Self {
        self.persisted_queries = Some(lookup);
        self
    }

    /// Builds the service. Configuration failures abort startup.
    pub fn build(self) -> Result<Viaduct, GraphQLBuildError> {
        if self.sdl_sources.is_empty() {
            return Err(GraphQLBuildError::Configuration(
                "no schema sources configured".into(),
            ));
        }

        let schema_options = SchemaOptions {
            allow_subscriptions: self.allow_subscriptions,
            enable_node_resolvers: self.enable_node_resolvers,
        };
        let full_schema = Arc::new(build_schema(&self.sdl_sources, &schema_options)?);

        let mut scoped = HashMap::with_capacity(self.scope_bindings.len());
        for (schema_id, scopes) in &self.scope_bindings {
            scoped.insert(
                schema_id.clone(),
                Arc::new(full_schema.scoped_to(scopes)),
            );
        }

        let mut field_descriptors: Vec<FieldResolverDescriptor> = Vec::new();
        let mut node_descriptors: Vec<NodeResolverDescriptor> = Vec::new();
        for bootstrapper in &self.bootstrappers {
            field_descriptors.extend(bootstrapper.field_resolvers());
            node_descriptors.extend(bootstrapper.node_resolvers());
        }

        let registry = Arc::new(ResolverRegistry::build(
            &full_schema,
            field_descriptors,
            node_descriptors,
            &RegistryOptions {
                lenient_field_discovery: self.lenient_field_discovery,
                enable_node_resolvers: self.enable_node_resolvers,
            },
        )?);

        let flags = match &self.flag_manager {
            Some(manager) => EngineFlags {
                subquery_via_handle: manager.flag(ENABLE_SUBQUERY_EXECUTION_VIA_HANDLE),
                access_checks_in_modstrat: manager.flag(EXECUTE_ACCESS_CHECKS_IN_MODSTRAT),
            },
            None => EngineFlags::default(),
        };

        let instrumentation: Arc<dyn Instrumentation> = match self.instrumentation.len() {
            0 => Arc::new(NoopInstrumentation),
            1 => Arc::clone(&self.instrumentation[0]),
            _ => Arc::new(ChainedInstrumentation::new(self.instrumentation)),
        };

        debug!(
            schema_digest = full_schema.digest(),
            resolvers = registry.field_count(),
            "viaduct service built",
        );

        Ok(Viaduct {
            full_schema,
            scoped,
            registry,
            plan_cache: Arc::new(PlanCache::new(self.plan_cache_capacity)),
            instrumentation,
            meter_registry: self.meter_registry,
            checker_factory: self.checker_factory,
            codec: self.codec,
            flags,
            persisted_queries: self.persisted_queries,
        })
    }
}

/// The execution service: schema, resolvers, plan cache, and the
/// per-request pipeline.
pub struct Viaduct {
    full_schema: Arc<ViaductSchema>,
    scoped: HashMap<String, Arc<ViaductSchema>>,
    registry: Arc<ResolverRegistry>,
    plan_cache: Arc<PlanCache>,
    instrumentation: Arc<dyn Instrumentation>,
    meter_registry: Option<Arc<dyn MeterRegistry>>,
    checker_factory: Option<Arc<dyn CheckerExecutorFactory>>,
    codec: SharedGlobalIdCodec,
    flags: EngineFlags,
    persisted_queries: Option<PersistedQueryLookup>,
}

impl Viaduct {
    fn count(&self, metric: &str, value: u64) {
        if let Some(meter) = &self.meter_registry {
            meter.increment(metric, value);
        }
    }
}

impl Viaduct {
    /// Starts a builder.
    pub fn builder() -> ViaductBuilder {
        ViaductBuilder::new()
    }

    /// The full schema this service executes against.
    pub fn schema(&self) -> &Arc<ViaductSchema> {
        &self.full_schema
    }

    /// Executes one request: parse, validate, plan (through the shared
    /// cache), execute, serialize.
    pub async fn execute(&self, input: ExecutionInput) -> ExecutionResponse {
        self.count("viaduct.execute.requests", 1);

        let active_schema = match &input.schema_id {
            Some(id) => match self.scoped.get(id) {
                Some(schema) => Arc::clone(schema),
                None => {
                    return ExecutionResponse::failure(FieldError::new(
                        format!("Unknown schema id \"{id}\""),
                        ErrorKind::Validation,
                    ));
                }
            },
            None => Arc::clone(&self.full_schema),
        };

        let source = match (&input.document, &input.persisted_query) {
            (Some(document), _) => document.clone(),
            (None, Some(id)) => {
                let resolved = self
                    .persisted_queries
                    .as_ref()
                    .and_then(|lookup| lookup(id));
                match resolved {
                    Some(document) => document,
                    None => {
                        return ExecutionResponse::failure(FieldError::new(
                            format!("Unknown persisted query \"{id}\""),
                            ErrorKind::Validation,
                        ));
                    }
                }
            }
            (None, None) => {
                return ExecutionResponse::failure(FieldError::new(
                    "No document or persisted query provided",
                    ErrorKind::Validation,
                ));
            }
        };

        let document = match parse_document_source(&source) {
            Ok(document) => document,
            Err(e) => {
                return ExecutionResponse::failure(FieldError::new(e, ErrorKind::Validation));
            }
        };

        let rule_errors = validate_document(&active_schema, &document);
        if !rule_errors.is_empty() {
            return ExecutionResponse::failures(
                rule_errors
                    .into_iter()
                    .map(|e| {
                        ExecutionError::new(
                            e.locations().first().copied(),
                            Vec::new(),
                            FieldError::new(e.message(), ErrorKind::Validation),
                        )
                    })
                    .collect(),
            );
        }

        let mut fragments: HashMap<Name, FragmentDefinition> = HashMap::new();
        for def in &document {
            if let Definition::Fragment(f) = def {
                fragments.insert(f.item.name.item.clone(), f.item.clone());
            }
        }

        let operation = match select_operation(&document, input.operation_name.as_deref()) {
            Ok(operation) => operation,
            Err(message) => {
                return ExecutionResponse::failure(FieldError::new(
                    message,
                    ErrorKind::Validation,
                ));
            }
        };

        // Plans are cached on the selection text and schema build; variable
        // values never enter the key.
        let cache_key = PlanCacheKey {
            schema_digest: active_schema.digest(),
            selection_text: match &input.operation_name {
                Some(name) => format!("{source}#{name}"),
                None => source.clone(),
            },
            execute_access_checks_in_modstrat: self.flags.access_checks_in_modstrat,
        };
        let plan = match self.plan_cache.get_or_build(cache_key, || {
            self.count("viaduct.plan_cache.miss", 1);
            QueryPlan::build_operation(operation, &fragments, &active_schema)
        }) {
            Ok(plan) => plan,
            Err(e) => {
                return ExecutionResponse::failure(FieldError::new(e, ErrorKind::Validation));
            }
        };

        let variables = variables_with_defaults(operation, input.variables);
        let checker: Option<Arc<dyn CheckerExecutor>> = self
            .checker_factory
            .as_ref()
            .and_then(|factory| factory.create());

        let params = ExecutionParameters::new_request(
            Arc::clone(&self.full_schema),
            active_schema,
            Arc::clone(&self.registry),
            Arc::clone(&self.instrumentation),
            checker,
            Arc::clone(&self.codec),
            self.flags,
            input.cancellation.unwrap_or_default(),
            input.request_context,
            plan,
            variables,
        );

        params.run().await;

        let data = serialize_response(&params);
        let errors = params.shared.errors.sorted_snapshot();
        if !errors.is_empty() {
            self.count("viaduct.execute.errors", errors.len() as u64);
        }

        ExecutionResponse {
            data,
            errors,
            extensions: input.extensions,
        }
    }
}

/// Applies default values of the operation's variable definitions.
fn variables_with_defaults(operation: &Operation, mut variables: Variables) -> Variables {
    if let Some(defs) = &operation.variable_definitions {
        for (name, def) in defs.item.iter() {
            if let Some(default) = &def.default_value {
                variables
                    .entry(name.item.to_string())
                    .or_insert_with(|| default.item.clone());
            }
        }
    }
    variables
}

/// Picks the operation the request names, mirroring the GraphQL rules for
/// anonymous and named operations.
fn select_operation<'a>(
    document: &'a [Definition],
    operation_name: Option<&str>,
) -> Result<&'a Operation, String> {
    let mut operation = None;
    for def in document {
        if let Definition::Operation(op) = def {
            if operation_name.is_none() && operation.is_some() {
                return Err("Multiple operations provided without an operation name".into());
            }
            let matches = operation_name
                .is_none_or(|name| op.item.name.as_ref().map(|n| n.item.as_str()) == Some(name));
            if matches {
                operation = Some(&op.item);
            }
        }
    }
    operation.ok_or_else(|| match operation_name {
        Some(name) => format!("Unknown operation \"{name}\""),
        None => "No operation provided".into(),
    })
}
