use std::sync::Arc;

use pretty_assertions::assert_eq;

use crate::{
    ErrorKind, FieldError, FieldExecutionContext, FieldResolver, FieldResolverDescriptor,
    FieldResult, ResolvedValue, TenantBootstrapper, Viaduct,
};

use super::{as_json, run, test_service};

#[tokio::test]
async fn errors_sort_by_path_then_message() {
    let (service, _) = test_service();
    // Alias order inverts source order; the sort must not care.
    let response = run(&service, "{ z: boomB a: boomA }").await;
    let json = as_json(&response);

    assert_eq!(
        json["data"],
        serde_json::json!({ "z": null, "a": null }),
    );
    let errors = json["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0]["path"], serde_json::json!(["a"]));
    assert_eq!(errors[0]["message"], "boom A");
    assert_eq!(errors[1]["path"], serde_json::json!(["z"]));
    assert_eq!(errors[1]["message"], "boom B");
}

#[tokio::test]
async fn resolver_errors_carry_their_classification_and_location() {
    let (service, _) = test_service();
    let response = run(&service, "{ boomA }").await;
    let json = as_json(&response);
    assert_eq!(
        json["errors"][0]["extensions"]["classification"],
        "DataFetchingException",
    );
    assert!(json["errors"][0]["locations"][0]["line"].is_u64());
}

struct ThrowingX;

#[async_trait::async_trait]
impl FieldResolver for ThrowingX {
    async fn resolve(&self, _: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        Err(FieldError::new("x is broken", ErrorKind::DataFetching))
    }
}

struct QuietY;

#[async_trait::async_trait]
impl FieldResolver for QuietY {
    async fn resolve(&self, _: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        Ok(ResolvedValue::scalar("fine"))
    }
}

struct PartialTenant;

impl TenantBootstrapper for PartialTenant {
    fn field_resolvers(&self) -> Vec<FieldResolverDescriptor> {
        vec![
            FieldResolverDescriptor::for_coordinate("Query", "x").resolver(Arc::new(ThrowingX)),
            FieldResolverDescriptor::for_coordinate("Query", "y").resolver(Arc::new(QuietY)),
        ]
    }
}

fn partial_failure_service() -> Viaduct {
    Viaduct::builder()
        .schema_source(
            "partial.graphql",
            "type Query { x: Int! @resolver y: String @resolver }",
        )
        .tenant_bootstrapper(Arc::new(PartialTenant))
        .build()
        .unwrap()
}

#[tokio::test]
async fn non_null_errors_propagate_to_the_root() {
    let service = partial_failure_service();
    let response = run(&service, "{ x y }").await;
    let json = as_json(&response);

    // `x` is non-null, so its failure nulls `data` entirely.
    assert_eq!(json["data"], serde_json::Value::Null);
    assert_eq!(json["errors"][0]["path"], serde_json::json!(["x"]));
    assert_eq!(json["errors"][0]["message"], "x is broken");
}

#[tokio::test]
async fn nullable_siblings_survive_partial_failure() {
    let service = partial_failure_service();
    let response = run(&service, "{ y }").await;
    assert_eq!(
        as_json(&response),
        serde_json::json!({ "data": { "y": "fine" } }),
    );
}

#[tokio::test]
async fn unknown_fields_fail_validation_before_execution() {
    let (service, state) = test_service();
    let response = run(&service, "{ config { flag } wingspan }").await;
    let json = as_json(&response);

    assert_eq!(json["data"], serde_json::Value::Null);
    assert_eq!(
        json["errors"][0]["extensions"]["classification"],
        "ValidationError",
    );
    // Validation failed the request before any resolver ran.
    assert_eq!(
        state
            .config_invocations
            .load(std::sync::atomic::Ordering::SeqCst),
        0,
    );
}
