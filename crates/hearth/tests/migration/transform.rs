use std::sync::Arc;

use hearth::migration::{conform_record, TransformOutcome, TransformRegistry};
use hearth::schema::Catalog;
use hearth::types::EPOCH_ISO;
use proptest::prelude::*;
use serde_json::{json, Map, Value};

fn registry() -> TransformRegistry {
    TransformRegistry::with_app_upgrades(Arc::new(Catalog::default_app()))
}

fn accept(outcome: TransformOutcome) -> Value {
    match outcome {
        TransformOutcome::Accept(v) => v,
        TransformOutcome::Reject(reason) => panic!("unexpected reject: {reason}"),
    }
}

// ============================================================================
// Defaults and coercion
// ============================================================================

#[test]
fn missing_required_field_gets_default_not_rejection() {
    let out = accept(registry().transform(
        "tasks",
        &json!({"id": "t1", "rawInput": "buy milk", "updatedAt": "2024-01-01T00:00:00Z"}),
    ));
    assert_eq!(out["sourceThoughtId"], "");
    assert_eq!(out["rawInput"], "buy milk");
    assert_eq!(out["done"], false);
    assert_eq!(out["priority"], 0);
    assert_eq!(out["projectId"], Value::Null);
    // Missing dates fall back to the record's own timestamp.
    assert_eq!(out["createdAt"], "2024-01-01T00:00:00Z");
}

#[test]
fn scalars_are_coerced() {
    let out = accept(registry().transform(
        "tasks",
        &json!({
            "id": 42,
            "updatedAt": 1704067200000i64,
            "title": 7,
            "done": "true",
            "priority": "3",
            "dueDate": "not a date"
        }),
    ));
    assert_eq!(out["id"], "42");
    assert_eq!(out["updatedAt"], "2024-01-01T00:00:00.000Z");
    assert_eq!(out["title"], "7");
    assert_eq!(out["done"], true);
    assert_eq!(out["priority"], 3);
    assert_eq!(out["dueDate"], Value::Null);
}

#[test]
fn missing_timestamp_becomes_epoch() {
    let out = accept(registry().transform("projects", &json!({"id": "p1", "name": "home"})));
    assert_eq!(out["updatedAt"], EPOCH_ISO);
    assert_eq!(out["archived"], false);
}

#[test]
fn scalar_is_wrapped_for_array_field() {
    let out = accept(registry().transform(
        "thoughts",
        &json!({"id": "th1", "rawInput": "x", "tags": "errand"}),
    ));
    assert_eq!(out["tags"], json!(["errand"]));
}

#[test]
fn bookkeeping_keys_are_stripped_and_unknown_fields_kept() {
    let out = accept(registry().transform(
        "projects",
        &json!({"id": "p1", "_rev": 3, "_deleted": false, "legacyColor": "red"}),
    ));
    assert!(out.get("_rev").is_none());
    assert!(out.get("_deleted").is_none());
    assert_eq!(out["legacyColor"], "red");
}

#[test]
fn record_without_primary_key_is_rejected() {
    for record in [json!({"title": "x"}), json!({"id": ""}), json!({"id": {"a": 1}}), json!([1, 2])] {
        assert!(
            !registry().transform("tasks", &record).is_accept(),
            "{record} should be rejected"
        );
    }
}

#[test]
fn uncoercible_value_is_rejected() {
    let outcome = registry().transform("tasks", &json!({"id": "t1", "done": "maybe"}));
    match outcome {
        TransformOutcome::Reject(reason) => assert!(reason.contains("done"), "{reason}"),
        TransformOutcome::Accept(v) => panic!("accepted {v}"),
    }
}

// ============================================================================
// Custom transforms
// ============================================================================

#[test]
fn app_upgrades_rename_historical_fields() {
    let registry = registry();
    let thought = accept(registry.transform("thoughts", &json!({"id": "th1", "content": "idea"})));
    assert_eq!(thought["rawInput"], "idea");
    assert!(thought.get("content").is_none());

    let task = accept(registry.transform("tasks", &json!({"id": "t1", "text": "call mum"})));
    assert_eq!(task["title"], "call mum");
}

#[test]
fn rename_does_not_clobber_existing_field() {
    let task = accept(registry().transform(
        "tasks",
        &json!({"id": "t1", "text": "old", "title": "current"}),
    ));
    assert_eq!(task["title"], "current");
}

#[test]
fn custom_output_still_passes_schema_pass() {
    let registry = TransformRegistry::new(Arc::new(Catalog::default_app()))
        .with("projects", |_| TransformOutcome::Accept(json!({"id": "p1", "archived": 1})));
    let out = accept(registry.transform("projects", &json!({})));
    assert_eq!(out["archived"], true);
    assert_eq!(out["name"], "");
}

#[test]
fn custom_reject_is_final() {
    let registry = TransformRegistry::new(Arc::new(Catalog::default_app()))
        .with("tasks", |_| TransformOutcome::Reject("spam".to_string()));
    assert_eq!(
        registry.transform("tasks", &json!({"id": "t1"})),
        TransformOutcome::Reject("spam".to_string())
    );
}

#[test]
fn panicking_custom_transform_rejects_record() {
    let registry = TransformRegistry::new(Arc::new(Catalog::default_app()))
        .with("tasks", |_| panic!("boom"));
    assert!(!registry.transform("tasks", &json!({"id": "t1"})).is_accept());
}

#[test]
#[should_panic(expected = "unknown collection")]
fn registering_for_unknown_collection_panics() {
    let mut registry = TransformRegistry::new(Arc::new(Catalog::default_app()));
    registry.register("notes", |v| TransformOutcome::Accept(v.clone()));
}

#[test]
fn unknown_collection_is_rejected_not_panicked() {
    assert!(!registry().transform("notes", &json!({"id": "n1"})).is_accept());
}

#[test]
fn conform_record_is_idempotent_on_valid_records() {
    let catalog = Catalog::default_app();
    let schema = catalog.get("tasks").unwrap();
    let once = conform_record(schema, json!({"id": "t1", "done": 1})).accepted().unwrap();
    let twice = conform_record(schema, once.clone()).accepted().unwrap();
    assert_eq!(once, twice);
}

// ============================================================================
// Totality
// ============================================================================

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        (-1.0e9f64..1.0e9).prop_map(Value::from),
        "[a-z0-9:T.-]{0,24}".prop_map(Value::String),
        Just(Value::String("2024-01-01T00:00:00Z".to_string())),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-zA-Z_]{1,10}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

fn arb_record() -> impl Strategy<Value = Value> {
    let field = prop_oneof![
        Just("id"),
        Just("updatedAt"),
        Just("title"),
        Just("rawInput"),
        Just("done"),
        Just("priority"),
        Just("sourceThoughtId"),
        Just("projectId"),
        Just("dueDate"),
        Just("createdAt"),
        Just("tags"),
        Just("_rev"),
    ];
    prop::collection::vec((field, arb_json()), 0..10).prop_map(|pairs| {
        Value::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<Map<_, _>>(),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn every_input_is_accepted_valid_or_rejected(record in arb_record()) {
        let catalog = Arc::new(Catalog::default_app());
        let registry = TransformRegistry::with_app_upgrades(catalog.clone());
        for schema in catalog.iter() {
            if let TransformOutcome::Accept(out) = registry.transform(&schema.name, &record) {
                prop_assert!(schema.validate(&out).is_ok(), "{} produced invalid {}", schema.name, out);
                prop_assert!(out.as_object().unwrap().keys().all(|k| !k.starts_with('_')));
            }
        }
    }

    #[test]
    fn arbitrary_values_never_panic(value in arb_json()) {
        let registry = registry();
        for name in ["thoughts", "projects", "tasks"] {
            let _ = registry.transform(name, &value);
        }
    }
}
