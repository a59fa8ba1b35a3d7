use std::sync::atomic::Ordering;

use pretty_assertions::assert_eq;

use super::{as_json, run, test_service};

#[tokio::test]
async fn siblings_batch_into_one_invocation() {
    let (service, state) = test_service();
    let response = run(&service, "{ allCharacters(limit: 3) { filmCount } }").await;

    assert_eq!(
        as_json(&response)["data"],
        serde_json::json!({
            "allCharacters": [
                { "filmCount": 1 },
                { "filmCount": 2 },
                { "filmCount": 3 },
            ]
        }),
    );
    assert_eq!(state.film_count_invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn a_larger_sibling_set_still_batches_once() {
    let (service, state) = test_service();
    let response = run(&service, "{ allCharacters(limit: 100) { filmCount } }").await;

    let data = as_json(&response);
    let characters = data["data"]["allCharacters"].as_array().unwrap();
    assert_eq!(characters.len(), 100);
    for (i, character) in characters.iter().enumerate() {
        assert_eq!(character["filmCount"], (i + 1) as i64);
    }
    assert_eq!(state.film_count_invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn single_parents_use_the_same_protocol() {
    let (service, state) = test_service();
    let response = run(&service, "{ allCharacters(limit: 1) { filmCount name } }").await;
    assert_eq!(
        as_json(&response)["data"],
        serde_json::json!({
            "allCharacters": [{ "filmCount": 1, "name": "Character 0" }]
        }),
    );
    assert_eq!(state.film_count_invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn size_mismatch_fails_every_cell_in_the_batch() {
    let (service, _) = test_service();
    let response = run(&service, "{ allCharacters(limit: 3) { badCount } }").await;

    let json = as_json(&response);
    assert_eq!(
        json["data"],
        serde_json::json!({
            "allCharacters": [
                { "badCount": null },
                { "badCount": null },
                { "badCount": null },
            ]
        }),
    );
    let errors = json["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 3);
    for error in errors {
        assert_eq!(error["extensions"]["classification"], "BatchSizeMismatch");
    }
}

#[tokio::test]
async fn memoized_cells_do_not_hold_up_the_group() {
    let (service, state) = test_service();
    // `filmCount` is selected twice under one key; the plan merges them, so
    // the batch still sees exactly one contributor per character.
    let response = run(
        &service,
        "{ allCharacters(limit: 2) { filmCount filmCount } }",
    )
    .await;
    assert_eq!(
        as_json(&response)["data"]["allCharacters"],
        serde_json::json!([{ "filmCount": 1 }, { "filmCount": 2 }]),
    );
    assert_eq!(state.film_count_invocations.load(Ordering::SeqCst), 1);
}
