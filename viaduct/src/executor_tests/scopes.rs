use pretty_assertions::assert_eq;

use crate::ExecutionInput;

use super::{as_json, test_service};

#[tokio::test]
async fn scoped_requests_cannot_select_out_of_scope_fields() {
    let (service, _) = test_service();
    let response = service
        .execute(ExecutionInput::document("{ secret }").schema_id("public"))
        .await;
    let json = as_json(&response);

    assert_eq!(json["data"], serde_json::Value::Null);
    assert_eq!(
        json["errors"][0]["extensions"]["classification"],
        "ValidationError",
    );
    assert!(
        json["errors"][0]["message"]
            .as_str()
            .unwrap()
            .contains("secret"),
    );
}

#[tokio::test]
async fn the_matching_scope_sees_the_field() {
    let (service, _) = test_service();
    let response = service
        .execute(ExecutionInput::document("{ secret }").schema_id("internal"))
        .await;
    assert_eq!(
        as_json(&response)["data"],
        serde_json::json!({ "secret": "s3cr3t" }),
    );
}

#[tokio::test]
async fn sub_selections_always_use_the_full_schema() {
    let (service, _) = test_service();
    // `peek` reads `secret` through a sub-selection; the scoped request
    // cannot, but the sub-selection can.
    let response = service
        .execute(ExecutionInput::document("{ peek }").schema_id("public"))
        .await;
    assert_eq!(
        as_json(&response)["data"],
        serde_json::json!({ "peek": "s3cr3t" }),
    );
}

#[tokio::test]
async fn unknown_schema_ids_are_rejected() {
    let (service, _) = test_service();
    let response = service
        .execute(ExecutionInput::document("{ counter }").schema_id("nope"))
        .await;
    let json = as_json(&response);
    assert_eq!(json["data"], serde_json::Value::Null);
    assert!(
        json["errors"][0]["message"]
            .as_str()
            .unwrap()
            .contains("Unknown schema id"),
    );
}

#[tokio::test]
async fn scoped_plans_do_not_collide_in_the_cache() {
    let (service, _) = test_service();
    // The same selection text against two scoped views must not share a
    // plan: `secret` exists in one and not the other.
    let internal = service
        .execute(ExecutionInput::document("{ secret }").schema_id("internal"))
        .await;
    assert!(internal.errors.is_empty());

    let public = service
        .execute(ExecutionInput::document("{ secret }").schema_id("public"))
        .await;
    assert!(!public.errors.is_empty());
}
