//! Engine-level scenario tests, driven through the public service surface.

mod access_checks;
mod batching;
mod errors;
mod mutations;
mod nodes;
mod scopes;
mod subqueries;

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use crate::{
    BatchFieldResolver, ErrorKind, ExecutionInput, ExecutionResponse, FieldExecutionContext,
    FieldResolver, FieldResolverDescriptor, FieldResult, NodeExecutionContext, NodeResolver,
    NodeResolverDescriptor, RawSelectionSet, ResolvedValue, SubqueryOptions, TenantBootstrapper,
    Viaduct, ViaductBuilder, Variables,
};

const SCHEMA: &str = r#"
    schema { query: Query mutation: Mutation }

    interface Node { id: ID! }

    type Query {
        user: User @resolver
        config: Config @resolver
        counter: Int @resolver
        counterFresh: Int @resolver
        counterShared: Int @resolver
        relay: String @resolver
        echo(msg: String): String @resolver
        allCharacters(limit: Int = 10): [Character!] @resolver
        secret: String @resolver @scope(to: ["internal"])
        peek: String @resolver
        boomA: Int @resolver
        boomB: Int @resolver
    }

    type Mutation {
        setX(v: Int!): Payload @resolver
    }

    type Payload { value: Int }

    type User {
        first: String
        last: String
        email: String
        displayName: String @resolver
        badDisplayName: String @resolver
    }

    type Config { flag: Boolean }

    type Character implements Node {
        id: ID!
        name: String
        filmCount: Int @resolver
        badCount: Int @resolver
    }

    type Film implements Node @resolver {
        id: ID!
        title: String!
    }
"#;

/// Shared observable state of the test tenant.
#[derive(Default)]
pub(crate) struct TenantState {
    pub config_invocations: AtomicUsize,
    pub film_count_invocations: AtomicUsize,
    pub set_x: Mutex<i32>,
    pub set_x_log: Mutex<Vec<String>>,
    pub nodes_seen: Mutex<Vec<String>>,
}

pub(crate) struct TestTenant {
    state: Arc<TenantState>,
}

struct UserResolver;

#[async_trait]
impl FieldResolver for UserResolver {
    async fn resolve(&self, _: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        Ok(ResolvedValue::object([
            ("first", ResolvedValue::scalar("Ada")),
            ("last", ResolvedValue::scalar("Lovelace")),
            ("email", ResolvedValue::scalar("ada@example.com")),
        ]))
    }
}

struct DisplayNameResolver;

#[async_trait]
impl FieldResolver for DisplayNameResolver {
    async fn resolve(&self, ctx: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        let first = ctx.object().fetch("first").await?;
        let last = ctx.object().fetch("last").await?;
        Ok(ResolvedValue::scalar(format!(
            "{} {}",
            first.as_str().unwrap_or_default(),
            last.as_str().unwrap_or_default(),
        )))
    }
}

struct BadDisplayNameResolver;

#[async_trait]
impl FieldResolver for BadDisplayNameResolver {
    async fn resolve(&self, ctx: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        // `email` is outside the declared required selection set.
        let email = ctx.object().fetch("email").await?;
        Ok(ResolvedValue::scalar(email.as_str().unwrap_or_default()))
    }
}

struct ConfigResolver {
    state: Arc<TenantState>,
}

#[async_trait]
impl FieldResolver for ConfigResolver {
    async fn resolve(&self, _: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        self.state.config_invocations.fetch_add(1, Ordering::SeqCst);
        Ok(ResolvedValue::object([(
            "flag",
            ResolvedValue::scalar(true),
        )]))
    }
}

struct CounterResolver;

#[async_trait]
impl FieldResolver for CounterResolver {
    async fn resolve(&self, _: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        Ok(ResolvedValue::scalar(7))
    }
}

struct CounterFreshResolver {
    state: Arc<TenantState>,
}

#[async_trait]
impl FieldResolver for CounterFreshResolver {
    async fn resolve(&self, ctx: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        for _ in 0..2 {
            ctx.query("config { flag }")
                .await
                .map_err(|e| e.into_field_error())?;
        }
        Ok(ResolvedValue::scalar(
            self.state.config_invocations.load(Ordering::SeqCst) as i32,
        ))
    }
}

struct CounterSharedResolver {
    state: Arc<TenantState>,
}

#[async_trait]
impl FieldResolver for CounterSharedResolver {
    async fn resolve(&self, ctx: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        let raw = RawSelectionSet::parse("Query", "config { flag }", Vec::<&str>::new())
            .expect("selection parses");
        for _ in 0..2 {
            ctx.execution()
                .execute_selection_set(
                    &raw,
                    SubqueryOptions {
                        share_memoization: true,
                        ..SubqueryOptions::default()
                    },
                )
                .await
                .map_err(|e| e.into_field_error())?;
        }
        Ok(ResolvedValue::scalar(
            self.state.config_invocations.load(Ordering::SeqCst) as i32,
        ))
    }
}

struct RelayResolver;

#[async_trait]
impl FieldResolver for RelayResolver {
    async fn resolve(&self, ctx: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        // The sub-selection's variables are closed over the provided map;
        // the outer request's `$m` must not leak in.
        let raw = RawSelectionSet::parse("Query", "echo(msg: $m)", ["m"])
            .expect("selection parses");
        let mut variables = Variables::new();
        variables.insert("m".into(), crate::InputValue::scalar("inner"));
        let data = ctx
            .execution()
            .execute_selection_set(
                &raw,
                SubqueryOptions {
                    variables,
                    ..SubqueryOptions::default()
                },
            )
            .await
            .map_err(|e| e.into_field_error())?;
        let echoed = data.fetch("echo").await?;
        Ok(ResolvedValue::scalar(
            echoed.as_str().unwrap_or_default().to_owned(),
        ))
    }
}

struct EchoResolver;

#[async_trait]
impl FieldResolver for EchoResolver {
    async fn resolve(&self, ctx: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        Ok(match ctx.args().get_str("msg") {
            Some(msg) => ResolvedValue::scalar(msg.to_owned()),
            None => ResolvedValue::Null,
        })
    }
}

struct AllCharactersResolver;

#[async_trait]
impl FieldResolver for AllCharactersResolver {
    async fn resolve(&self, ctx: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        let limit = ctx.args().get_int("limit").unwrap_or(10).max(0) as usize;
        let characters = (0..limit)
            .map(|i| {
                ResolvedValue::object([
                    // ids grow in length so film counts are distinguishable.
                    ("id", ResolvedValue::scalar("1".repeat(i + 1))),
                    ("name", ResolvedValue::scalar(format!("Character {i}"))),
                ])
            })
            .collect();
        Ok(ResolvedValue::List(characters))
    }
}

struct FilmCountResolver {
    state: Arc<TenantState>,
}

#[async_trait]
impl BatchFieldResolver for FilmCountResolver {
    async fn batch_resolve(
        &self,
        ctxs: &[FieldExecutionContext],
    ) -> FieldResult<Vec<FieldResult<ResolvedValue>>> {
        self.state
            .film_count_invocations
            .fetch_add(1, Ordering::SeqCst);
        let mut out = Vec::with_capacity(ctxs.len());
        for ctx in ctxs {
            let id = ctx.object().fetch("id").await?;
            let count = id.as_str().map(str::len).unwrap_or(0) as i32;
            out.push(Ok(ResolvedValue::scalar(count)));
        }
        Ok(out)
    }
}

struct BadCountResolver;

#[async_trait]
impl BatchFieldResolver for BadCountResolver {
    async fn batch_resolve(
        &self,
        ctxs: &[FieldExecutionContext],
    ) -> FieldResult<Vec<FieldResult<ResolvedValue>>> {
        // One result short: every cell in the batch must fail.
        Ok(ctxs
            .iter()
            .skip(1)
            .map(|_| Ok(ResolvedValue::scalar(0)))
            .collect())
    }
}

struct SetXResolver {
    state: Arc<TenantState>,
}

#[async_trait]
impl FieldResolver for SetXResolver {
    async fn resolve(&self, ctx: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        let v = ctx
            .args()
            .get_int("v")
            .ok_or("missing v argument")
            .map_err(crate::FieldError::from)?;
        self.state.set_x_log.lock().unwrap().push(format!("start:{v}"));
        // The first mutation dawdles; serial execution must still finish it
        // (and its hooks) before the second begins.
        if v == 1 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        *self.state.set_x.lock().unwrap() = v;
        self.state.set_x_log.lock().unwrap().push(format!("end:{v}"));
        Ok(ResolvedValue::object([(
            "value",
            ResolvedValue::scalar(v),
        )]))
    }
}

struct SecretResolver;

#[async_trait]
impl FieldResolver for SecretResolver {
    async fn resolve(&self, _: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        Ok(ResolvedValue::scalar("s3cr3t"))
    }
}

struct PeekResolver;

#[async_trait]
impl FieldResolver for PeekResolver {
    async fn resolve(&self, ctx: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        // Sub-selections always see the full schema, scoped request or not.
        let data = ctx
            .query("secret")
            .await
            .map_err(|e| e.into_field_error())?;
        let secret = data.fetch("secret").await?;
        Ok(ResolvedValue::scalar(
            secret.as_str().unwrap_or_default().to_owned(),
        ))
    }
}

struct BoomResolver {
    message: &'static str,
}

#[async_trait]
impl FieldResolver for BoomResolver {
    async fn resolve(&self, _: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        Err(crate::FieldError::new(self.message, ErrorKind::DataFetching))
    }
}

struct FilmNodeResolver {
    state: Arc<TenantState>,
}

#[async_trait]
impl NodeResolver for FilmNodeResolver {
    async fn resolve_node(&self, ctx: &NodeExecutionContext) -> FieldResult<ResolvedValue> {
        self.state
            .nodes_seen
            .lock()
            .unwrap()
            .push(ctx.local_id().to_owned());
        Ok(ResolvedValue::object([(
            "title",
            ResolvedValue::scalar(format!("Film {}", ctx.local_id())),
        )]))
    }
}

impl TenantBootstrapper for TestTenant {
    fn field_resolvers(&self) -> Vec<FieldResolverDescriptor> {
        let object_fragment = |source: &str| {
            RawSelectionSet::parse("User", source, Vec::<&str>::new()).expect("fragment parses")
        };
        vec![
            FieldResolverDescriptor::for_coordinate("Query", "user")
                .resolver(Arc::new(UserResolver)),
            FieldResolverDescriptor::for_coordinate("User", "displayName")
                .resolver(Arc::new(DisplayNameResolver))
                .object_fragment(object_fragment("first last")),
            FieldResolverDescriptor::for_coordinate("User", "badDisplayName")
                .resolver(Arc::new(BadDisplayNameResolver))
                .object_fragment(object_fragment("first")),
            FieldResolverDescriptor::for_coordinate("Query", "config")
                .resolver(Arc::new(ConfigResolver {
                    state: Arc::clone(&self.state),
                })),
            FieldResolverDescriptor::for_coordinate("Query", "counter")
                .resolver(Arc::new(CounterResolver)),
            FieldResolverDescriptor::for_coordinate("Query", "counterFresh")
                .resolver(Arc::new(CounterFreshResolver {
                    state: Arc::clone(&self.state),
                })),
            FieldResolverDescriptor::for_coordinate("Query", "counterShared")
                .resolver(Arc::new(CounterSharedResolver {
                    state: Arc::clone(&self.state),
                })),
            FieldResolverDescriptor::for_coordinate("Query", "relay")
                .resolver(Arc::new(RelayResolver)),
            FieldResolverDescriptor::for_coordinate("Query", "echo")
                .resolver(Arc::new(EchoResolver)),
            FieldResolverDescriptor::for_coordinate("Query", "allCharacters")
                .resolver(Arc::new(AllCharactersResolver)),
            FieldResolverDescriptor::for_coordinate("Character", "filmCount")
                .batch_resolver(Arc::new(FilmCountResolver {
                    state: Arc::clone(&self.state),
                }))
                .object_fragment(
                    RawSelectionSet::parse("Character", "id", Vec::<&str>::new())
                        .expect("fragment parses"),
                ),
            FieldResolverDescriptor::for_coordinate("Character", "badCount")
                .batch_resolver(Arc::new(BadCountResolver)),
            FieldResolverDescriptor::for_coordinate("Mutation", "setX")
                .resolver(Arc::new(SetXResolver {
                    state: Arc::clone(&self.state),
                })),
            FieldResolverDescriptor::for_coordinate("Query", "secret")
                .resolver(Arc::new(SecretResolver)),
            FieldResolverDescriptor::for_coordinate("Query", "peek")
                .resolver(Arc::new(PeekResolver)),
            FieldResolverDescriptor::for_coordinate("Query", "boomA")
                .resolver(Arc::new(BoomResolver { message: "boom A" })),
            FieldResolverDescriptor::for_coordinate("Query", "boomB")
                .resolver(Arc::new(BoomResolver { message: "boom B" })),
        ]
    }

    fn node_resolvers(&self) -> Vec<NodeResolverDescriptor> {
        vec![NodeResolverDescriptor::new(
            "Film",
            Arc::new(FilmNodeResolver {
                state: Arc::clone(&self.state),
            }),
        )]
    }
}

/// Builds the standard test service plus a handle on its observable state.
pub(crate) fn test_service() -> (Viaduct, Arc<TenantState>) {
    let (builder, state) = test_builder();
    (builder.build().expect("service builds"), state)
}

/// The standard builder, for tests that tweak configuration.
pub(crate) fn test_builder() -> (ViaductBuilder, Arc<TenantState>) {
    let state = Arc::new(TenantState::default());
    let scope_bindings: HashMap<String, HashSet<String>> = HashMap::from([
        ("public".to_string(), HashSet::from(["public".to_string()])),
        (
            "internal".to_string(),
            HashSet::from(["internal".to_string()]),
        ),
    ]);
    let builder = Viaduct::builder()
        .schema_configuration(
            vec![("main.graphql".to_string(), SCHEMA.to_string())],
            scope_bindings,
        )
        .tenant_bootstrapper(Arc::new(TestTenant {
            state: Arc::clone(&state),
        }));
    (builder, state)
}

/// Serializes a response the way a transport would.
pub(crate) fn as_json(response: &ExecutionResponse) -> serde_json::Value {
    serde_json::to_value(response).expect("response serializes")
}

pub(crate) async fn run(service: &Viaduct, document: &str) -> ExecutionResponse {
    service.execute(ExecutionInput::document(document)).await
}

#[tokio::test]
async fn display_name_combines_declared_parent_fields() {
    let (service, _) = test_service();
    let response = run(&service, "{ user { displayName } }").await;
    assert_eq!(
        as_json(&response),
        serde_json::json!({
            "data": { "user": { "displayName": "Ada Lovelace" } }
        }),
    );
}

#[tokio::test]
async fn reading_outside_the_required_set_is_unset_selection() {
    let (service, _) = test_service();
    let response = run(&service, "{ user { badDisplayName } }").await;
    let json = as_json(&response);
    assert_eq!(json["data"], serde_json::json!({ "user": { "badDisplayName": null } }));
    assert_eq!(
        json["errors"][0]["extensions"]["classification"],
        "UnsetSelection",
    );
    assert_eq!(json["errors"][0]["path"], serde_json::json!(["user", "badDisplayName"]));
}

#[tokio::test]
async fn merged_selections_resolve_once() {
    let (service, state) = test_service();
    let response = run(&service, "{ config { flag } config { flag } }").await;
    assert_eq!(
        as_json(&response)["data"],
        serde_json::json!({ "config": { "flag": true } }),
    );
    assert_eq!(state.config_invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn plain_fields_resolve_from_backing_data() {
    let (service, _) = test_service();
    let response = run(&service, "{ user { first renamed: last } }").await;
    assert_eq!(
        as_json(&response)["data"],
        serde_json::json!({ "user": { "first": "Ada", "renamed": "Lovelace" } }),
    );
}

#[tokio::test]
async fn meters_count_requests_and_plan_misses() {
    #[derive(Default)]
    struct CountingMeter(Mutex<HashMap<String, u64>>);

    impl crate::instrumentation::MeterRegistry for CountingMeter {
        fn increment(&self, metric: &str, value: u64) {
            *self.0.lock().unwrap().entry(metric.into()).or_default() += value;
        }
    }

    let (builder, _) = test_builder();
    let meter = Arc::new(CountingMeter::default());
    let service = builder.meter_registry(Arc::clone(&meter) as _).build().unwrap();

    run(&service, "{ counter }").await;
    run(&service, "{ counter }").await;

    let counts = meter.0.lock().unwrap();
    assert_eq!(counts["viaduct.execute.requests"], 2);
    // The second request hit the plan cache.
    assert_eq!(counts["viaduct.plan_cache.miss"], 1);
}

#[tokio::test]
async fn cancellation_settles_cells_with_cancelled_errors() {
    let (service, _) = test_service();
    let token = crate::CancellationToken::new();
    token.cancel();
    let response = service
        .execute(ExecutionInput::document("{ counter }").cancellation(token))
        .await;
    let json = as_json(&response);
    assert_eq!(json["data"], serde_json::json!({ "counter": null }));
    assert_eq!(json["errors"][0]["extensions"]["classification"], "Cancelled");
}
