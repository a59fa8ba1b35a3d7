use std::sync::{Arc, Mutex};

use arcstr::ArcStr;
use pretty_assertions::assert_eq;

use crate::{Coordinate, ExecutionInput, instrumentation::{Completion, Instrumentation}};

use super::{as_json, run, test_builder, test_service};

#[tokio::test]
async fn mutation_roots_run_serially_in_source_order() {
    let (service, state) = test_service();
    let response = run(
        &service,
        "mutation { a: setX(v: 1) { value } b: setX(v: 2) { value } }",
    )
    .await;

    assert_eq!(
        as_json(&response)["data"],
        serde_json::json!({
            "a": { "value": 1 },
            "b": { "value": 2 },
        }),
    );
    // The first invocation sleeps; only serial scheduling yields this log.
    assert_eq!(
        *state.set_x_log.lock().unwrap(),
        ["start:1", "end:1", "start:2", "end:2"],
    );
    assert_eq!(*state.set_x.lock().unwrap(), 2);
}

/// Records every hook firing, in order.
#[derive(Default)]
struct RecordingInstrumentation {
    events: Arc<Mutex<Vec<String>>>,
}

impl Instrumentation for RecordingInstrumentation {
    fn begin_fetch_object(&self, type_name: &ArcStr) -> Completion {
        let events = Arc::clone(&self.events);
        events.lock().unwrap().push(format!("fetch:{type_name}"));
        let type_name = type_name.clone();
        Box::new(move || {
            events.lock().unwrap().push(format!("fetched:{type_name}"));
        })
    }

    fn begin_fetch_object_serially(&self, type_name: &ArcStr) -> Completion {
        let events = Arc::clone(&self.events);
        events.lock().unwrap().push(format!("serial:{type_name}"));
        let type_name = type_name.clone();
        Box::new(move || {
            events.lock().unwrap().push(format!("serialed:{type_name}"));
        })
    }

    fn begin_field_resolve(&self, coordinate: &Coordinate) -> Completion {
        let events = Arc::clone(&self.events);
        events.lock().unwrap().push(format!("field:{coordinate}"));
        let coordinate = coordinate.clone();
        Box::new(move || {
            events.lock().unwrap().push(format!("resolved:{coordinate}"));
        })
    }
}

#[tokio::test]
async fn object_fetch_completion_fires_after_every_field_completion() {
    let (builder, _) = test_builder();
    let recorder = Arc::new(RecordingInstrumentation::default());
    let events = Arc::clone(&recorder.events);
    let service = builder.instrumentation(recorder).build().unwrap();

    run(&service, "{ counter }").await;

    assert_eq!(
        *events.lock().unwrap(),
        [
            "fetch:Query",
            "field:Query.counter",
            "resolved:Query.counter",
            "fetched:Query",
        ],
    );
}

#[tokio::test]
async fn each_mutation_root_completes_before_the_next_begins() {
    let (builder, _) = test_builder();
    let recorder = Arc::new(RecordingInstrumentation::default());
    let events = Arc::clone(&recorder.events);
    let service = builder.instrumentation(recorder).build().unwrap();

    run(
        &service,
        "mutation { a: setX(v: 1) { value } b: setX(v: 2) { value } }",
    )
    .await;

    let events = events.lock().unwrap();
    let first_done = events
        .iter()
        .position(|e| e == "resolved:Mutation.setX")
        .expect("first root completed");
    let second_begun = events
        .iter()
        .rposition(|e| e == "field:Mutation.setX")
        .expect("second root begun");
    assert!(
        first_done < second_begun,
        "first mutation root must complete before the second begins: {events:?}",
    );
}

#[tokio::test]
async fn mutations_cannot_run_without_a_mutation_type() {
    let service = crate::Viaduct::builder()
        .schema_source("main", "type Query { a: Int @resolver }")
        .tenant_bootstrapper(Arc::new(OnlyA))
        .build()
        .unwrap();
    let response = service
        .execute(ExecutionInput::document("mutation { x }"))
        .await;
    let json = as_json(&response);
    assert_eq!(json["data"], serde_json::Value::Null);
    assert_eq!(json["errors"][0]["message"], "Schema has no mutation type");
}

struct OnlyA;

#[async_trait::async_trait]
impl crate::FieldResolver for OnlyA {
    async fn resolve(
        &self,
        _: &crate::FieldExecutionContext,
    ) -> crate::FieldResult<crate::ResolvedValue> {
        Ok(crate::ResolvedValue::scalar(1))
    }
}

impl crate::TenantBootstrapper for OnlyA {
    fn field_resolvers(&self) -> Vec<crate::FieldResolverDescriptor> {
        vec![
            crate::FieldResolverDescriptor::for_coordinate("Query", "a")
                .resolver(Arc::new(OnlyA)),
        ]
    }
}
