use pretty_assertions::assert_eq;

use crate::{Base64GlobalIdCodec, GlobalId, GlobalIdCodec as _};

use super::{as_json, run, test_service};

// `base64("Film:42")`, the documented wire form.
const FILM_42: &str = "RmlsbTo0Mg==";

#[test]
fn film_42_token_matches_the_wire_format() {
    assert_eq!(
        Base64GlobalIdCodec.serialize(&GlobalId::new("Film", "42")),
        FILM_42,
    );
}

#[tokio::test]
async fn node_dispatches_to_the_node_resolver() {
    let (service, state) = test_service();
    let response = run(
        &service,
        &format!("{{ node(id: \"{FILM_42}\") {{ ... on Film {{ title }} }} }}"),
    )
    .await;

    assert_eq!(
        as_json(&response)["data"],
        serde_json::json!({ "node": { "title": "Film 42" } }),
    );
    assert_eq!(*state.nodes_seen.lock().unwrap(), ["42"]);
}

#[tokio::test]
async fn identity_selections_skip_the_node_resolver() {
    let (service, state) = test_service();
    let response = run(&service, &format!("{{ node(id: \"{FILM_42}\") {{ id }} }}")).await;

    assert_eq!(
        as_json(&response)["data"],
        serde_json::json!({ "node": { "id": FILM_42 } }),
    );
    assert!(state.nodes_seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn nodes_resolves_each_id() {
    let (service, state) = test_service();
    let a = Base64GlobalIdCodec.serialize(&GlobalId::new("Film", "1"));
    let b = Base64GlobalIdCodec.serialize(&GlobalId::new("Film", "2"));
    let response = run(
        &service,
        &format!("{{ nodes(ids: [\"{a}\", \"{b}\"]) {{ ... on Film {{ title }} }} }}"),
    )
    .await;

    assert_eq!(
        as_json(&response)["data"],
        serde_json::json!({
            "nodes": [{ "title": "Film 1" }, { "title": "Film 2" }]
        }),
    );
    let mut seen = state.nodes_seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, ["1", "2"]);
}

#[tokio::test]
async fn undecodable_ids_are_invalid_global_ids() {
    let (service, _) = test_service();
    let response = run(&service, "{ node(id: \"!!not-a-token!!\") { id } }").await;

    let json = as_json(&response);
    assert_eq!(json["data"], serde_json::json!({ "node": null }));
    assert_eq!(
        json["errors"][0]["extensions"]["classification"],
        "InvalidGlobalID",
    );
}

#[tokio::test]
async fn ids_of_non_node_types_are_rejected() {
    let (service, _) = test_service();
    // `User` is a real type, but not a node.
    let token = Base64GlobalIdCodec.serialize(&GlobalId::new("User", "1"));
    let response = run(&service, &format!("{{ node(id: \"{token}\") {{ id }} }}")).await;

    let json = as_json(&response);
    assert_eq!(json["data"], serde_json::json!({ "node": null }));
    assert_eq!(
        json["errors"][0]["extensions"]["classification"],
        "InvalidGlobalID",
    );
}

#[tokio::test]
async fn repeated_references_materialize_once() {
    let (service, state) = test_service();
    let response = run(
        &service,
        &format!(
            "{{ a: node(id: \"{FILM_42}\") {{ ... on Film {{ title }} }} \
               b: node(id: \"{FILM_42}\") {{ ... on Film {{ title }} }} }}"
        ),
    )
    .await;

    assert_eq!(
        as_json(&response)["data"],
        serde_json::json!({
            "a": { "title": "Film 42" },
            "b": { "title": "Film 42" },
        }),
    );
    assert_eq!(*state.nodes_seen.lock().unwrap(), ["42"]);
}
