use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use pretty_assertions::assert_eq;

use crate::{
    ENABLE_SUBQUERY_EXECUTION_VIA_HANDLE, ExecutionHandle, FieldExecutionContext,
    FieldResolver, FieldResolverDescriptor, FieldResult, RawSelectionSet, ResolvedValue,
    SubqueryOptions, TenantBootstrapper, Viaduct, execute_selection_set,
};

use super::{as_json, run, test_service};

#[tokio::test]
async fn default_subqueries_use_fresh_memoization() {
    let (service, _) = test_service();
    let response = run(&service, "{ counterFresh }").await;
    // Two independent sub-selections, two resolutions of `config`.
    assert_eq!(
        as_json(&response)["data"],
        serde_json::json!({ "counterFresh": 2 }),
    );
}

#[tokio::test]
async fn shared_memoization_short_circuits_the_second_call() {
    let (service, _) = test_service();
    let response = run(&service, "{ counterShared }").await;
    assert_eq!(
        as_json(&response)["data"],
        serde_json::json!({ "counterShared": 1 }),
    );
}

#[tokio::test]
async fn subquery_variables_are_isolated_from_the_request() {
    let (service, _) = test_service();
    let response = service
        .execute(
            crate::ExecutionInput::document("query Outer($m: String) { relay }").variables(
                crate::Variables::from([(
                    "m".to_string(),
                    crate::InputValue::scalar("outer"),
                )]),
            ),
        )
        .await;
    // The sub-selection closed over its own `$m`.
    assert_eq!(
        as_json(&response)["data"],
        serde_json::json!({ "relay": "inner" }),
    );
}

#[tokio::test]
async fn nested_subqueries_are_supported() {
    // `peek` issues a sub-selection for `secret`; `counterFresh` issues two
    // for `config`; one request can carry both.
    let (service, _) = test_service();
    let response = run(&service, "{ peek counterFresh }").await;
    let json = as_json(&response);
    assert_eq!(json["data"]["peek"], "s3cr3t");
    assert_eq!(json["data"]["counterFresh"], 2);
}

/// A resolver reporting what happens when it calls back into the engine.
struct ProbeResolver {
    mode: ProbeMode,
    observed: Arc<AtomicU64>,
}

enum ProbeMode {
    /// Re-enter through the opaque handle, as an out-of-stack runtime would.
    ViaHandle,
    /// Issue a mutation sub-selection from a query resolver.
    MutationFromQuery,
}

#[async_trait::async_trait]
impl FieldResolver for ProbeResolver {
    async fn resolve(&self, ctx: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        match self.mode {
            ProbeMode::ViaHandle => {
                let handle: ExecutionHandle = ctx.execution().handle();
                let raw =
                    RawSelectionSet::parse("Query", "config { flag }", Vec::<&str>::new())
                        .expect("selection parses");
                match execute_selection_set(handle, &raw, SubqueryOptions::default()).await {
                    Ok(data) => {
                        let flag = data.fetch("config").await?;
                        self.observed.fetch_add(1, Ordering::SeqCst);
                        Ok(ResolvedValue::scalar(if flag.is_null() {
                            "missing"
                        } else {
                            "ok"
                        }))
                    }
                    Err(e) => Ok(ResolvedValue::scalar(format!("error: {}", e.message()))),
                }
            }
            ProbeMode::MutationFromQuery => {
                match ctx.mutation("setX(v: 9) { value }").await {
                    Err(e) => Ok(ResolvedValue::scalar(e.message().to_owned())),
                    Ok(_) => Ok(ResolvedValue::scalar("unexpectedly allowed")),
                }
            }
        }
    }
}

struct ConfigResolver;

#[async_trait::async_trait]
impl FieldResolver for ConfigResolver {
    async fn resolve(&self, _: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        Ok(ResolvedValue::object([(
            "flag",
            ResolvedValue::scalar(true),
        )]))
    }
}

struct ProbeTenant {
    mode: fn() -> ProbeMode,
    observed: Arc<AtomicU64>,
}

impl TenantBootstrapper for ProbeTenant {
    fn field_resolvers(&self) -> Vec<FieldResolverDescriptor> {
        vec![
            FieldResolverDescriptor::for_coordinate("Query", "probe").resolver(Arc::new(
                ProbeResolver {
                    mode: (self.mode)(),
                    observed: Arc::clone(&self.observed),
                },
            )),
            FieldResolverDescriptor::for_coordinate("Query", "config")
                .resolver(Arc::new(ConfigResolver)),
        ]
    }
}

const PROBE_SCHEMA: &str = "
    schema { query: Query mutation: Mutation }
    type Query {
        probe: String @resolver
        config: Config @resolver
    }
    type Config { flag: Boolean }
    type Mutation { noop: Int @resolver }
";

struct NoopMutation;

#[async_trait::async_trait]
impl FieldResolver for NoopMutation {
    async fn resolve(&self, _: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        Ok(ResolvedValue::scalar(0))
    }
}

struct NoopMutationTenant;

impl TenantBootstrapper for NoopMutationTenant {
    fn field_resolvers(&self) -> Vec<FieldResolverDescriptor> {
        vec![
            FieldResolverDescriptor::for_coordinate("Mutation", "noop")
                .resolver(Arc::new(NoopMutation)),
        ]
    }
}

fn probe_service(mode: fn() -> ProbeMode, handle_flag: bool) -> (Viaduct, Arc<AtomicU64>) {
    let observed = Arc::new(AtomicU64::new(0));
    let service = Viaduct::builder()
        .schema_source("probe.graphql", PROBE_SCHEMA)
        .tenant_bootstrapper(Arc::new(ProbeTenant {
            mode,
            observed: Arc::clone(&observed),
        }))
        .tenant_bootstrapper(Arc::new(NoopMutationTenant))
        .flag_manager(Arc::new(move |name: &str| {
            handle_flag && name == ENABLE_SUBQUERY_EXECUTION_VIA_HANDLE
        }))
        .build()
        .unwrap();
    (service, observed)
}

#[tokio::test]
async fn handles_rejoin_the_live_request_when_enabled() {
    let (service, observed) = probe_service(|| ProbeMode::ViaHandle, true);
    let response = run(&service, "{ probe }").await;
    assert_eq!(as_json(&response)["data"], serde_json::json!({ "probe": "ok" }));
    assert_eq!(observed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handles_are_invalid_when_the_flag_is_off() {
    let (service, observed) = probe_service(|| ProbeMode::ViaHandle, false);
    let response = run(&service, "{ probe }").await;
    let json = as_json(&response);
    let value = json["data"]["probe"].as_str().unwrap();
    assert!(value.starts_with("error:"), "got {value}");
    assert_eq!(observed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn mutation_subqueries_are_refused_outside_mutations() {
    let (service, _) = probe_service(|| ProbeMode::MutationFromQuery, false);
    let response = run(&service, "{ probe }").await;
    let value = as_json(&response)["data"]["probe"]
        .as_str()
        .unwrap()
        .to_owned();
    assert!(value.contains("only callable from mutation resolvers"), "got {value}");
}
