use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use crate::{
    Coordinate, EXECUTE_ACCESS_CHECKS_IN_MODSTRAT, ErrorKind, FieldError, FieldResult, Viaduct,
    access::{CheckResult, CheckerExecutor},
};

use super::{as_json, run, test_builder};

/// Denies exactly one coordinate.
struct DenyOne {
    denied: Coordinate,
}

#[async_trait]
impl CheckerExecutor for DenyOne {
    async fn execute(&self, coordinate: &Coordinate) -> FieldResult<CheckResult> {
        if *coordinate == self.denied {
            Ok(CheckResult::Denied(FieldError::new(
                format!("access to \"{coordinate}\" denied"),
                ErrorKind::AccessDenied,
            )))
        } else {
            Ok(CheckResult::Allowed)
        }
    }
}

fn checked_service(modstrat: bool) -> Viaduct {
    let (builder, _) = test_builder();
    builder
        .checker_executor_factory(Arc::new(|| {
            Some(Arc::new(DenyOne {
                denied: Coordinate::new("Query", "secret"),
            }) as Arc<dyn CheckerExecutor>)
        }))
        .flag_manager(Arc::new(move |name: &str| {
            modstrat && name == EXECUTE_ACCESS_CHECKS_IN_MODSTRAT
        }))
        .build()
        .unwrap()
}

async fn denied_outcome(service: &Viaduct) -> serde_json::Value {
    as_json(&run(service, "{ secret counter }").await)
}

#[tokio::test]
async fn denial_is_per_field_and_non_fatal() {
    let service = checked_service(false);
    let json = denied_outcome(&service).await;

    assert_eq!(
        json["data"],
        serde_json::json!({ "secret": null, "counter": 7 }),
    );
    assert_eq!(json["errors"][0]["extensions"]["classification"], "AccessDenied");
    assert_eq!(json["errors"][0]["path"], serde_json::json!(["secret"]));
}

#[tokio::test]
async fn both_checker_placements_produce_identical_outcomes() {
    let separate_pass = denied_outcome(&checked_service(false)).await;
    let modstrat = denied_outcome(&checked_service(true)).await;
    assert_eq!(separate_pass, modstrat);
}
