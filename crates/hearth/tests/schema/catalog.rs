use hearth::schema::{t, Catalog, CollectionSchema, SchemaNode};

#[test]
fn auto_fields_are_injected() {
    let schema = CollectionSchema::new("notes", 1, [("body", t::string())]);
    assert_eq!(schema.fields.get("id"), Some(&SchemaNode::Key));
    assert_eq!(schema.fields.get("updatedAt"), Some(&SchemaNode::UpdatedAt));
    assert_eq!(schema.fields.get("body"), Some(&SchemaNode::String));
}

#[test]
#[should_panic(expected = "reserved")]
fn shadowing_an_auto_field_panics() {
    CollectionSchema::new("notes", 1, [("updatedAt", t::string())]);
}

#[test]
#[should_panic(expected = "Invalid collection name")]
fn invalid_collection_name_panics() {
    CollectionSchema::new("my-notes", 1, []);
}

#[test]
#[should_panic(expected = "Duplicate collection")]
fn duplicate_collections_panic() {
    Catalog::new(vec![
        CollectionSchema::new("notes", 1, []),
        CollectionSchema::new("notes", 2, []),
    ]);
}

#[test]
fn default_app_is_ordered_by_dependency() {
    let catalog = Catalog::default_app();
    assert_eq!(catalog.names(), vec!["thoughts", "projects", "tasks"]);
}

#[test]
fn versions_map_names_to_schema_versions() {
    let versions = Catalog::default_app().versions();
    assert_eq!(versions.get("thoughts"), Some(&2));
    assert_eq!(versions.get("projects"), Some(&2));
    assert_eq!(versions.get("tasks"), Some(&3));
}
