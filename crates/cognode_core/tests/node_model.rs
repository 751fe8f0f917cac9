use cognode_core::{GraphError, NewNode, Node, NodeMetadata, NodeStatus, Tier};
use serde_json::json;
use std::thread::sleep;
use std::time::Duration;

fn metadata(value: serde_json::Value) -> NodeMetadata {
    value.as_object().cloned().unwrap()
}

#[test]
fn new_node_sets_defaults() {
    let node = Node::new(NewNode::new("Physics", Tier::Domain)).unwrap();

    assert!(!node.id().is_empty());
    assert_eq!(node.tier(), Tier::Domain);
    assert_eq!(node.name(), "Physics");
    assert_eq!(node.description(), "");
    assert_eq!(node.status(), NodeStatus::Planned);
    assert_eq!(node.parent_id(), None);
    assert!(node.children_ids().is_empty());
    assert!(node.created_at().is_some());
    assert_eq!(node.created_at(), node.updated_at());
}

#[test]
fn new_node_rejects_blank_name() {
    let err = Node::new(NewNode::new("   ", Tier::Topic)).unwrap_err();
    assert!(matches!(err, GraphError::InvalidNodeData { field: "name", .. }));
}

#[test]
fn generated_ids_are_unique() {
    let a = Node::new(NewNode::new("a", Tier::Domain)).unwrap();
    let b = Node::new(NewNode::new("b", Tier::Domain)).unwrap();
    assert_ne!(a.id(), b.id());
}

#[test]
fn create_enforces_parent_rules_for_every_tier() {
    for tier in Tier::ALL {
        let with_parent = Node::create(NewNode::new("n", tier).with_parent("p-1"));
        let without_parent = Node::create(NewNode::new("n", tier));
        if tier.is_root() {
            assert!(matches!(
                with_parent,
                Err(GraphError::InvalidParent { expected_parent_tier: None, .. })
            ));
            assert!(without_parent.is_ok());
        } else {
            assert!(with_parent.is_ok(), "tier {tier} should accept a parent");
            assert!(matches!(
                without_parent,
                Err(GraphError::InvalidParent { expected_parent_tier: Some(expected), .. })
                    if Some(expected) == tier.parent_tier()
            ));
        }
    }
}

#[test]
fn child_set_has_set_semantics_and_touches_timestamp() {
    let mut node = Node::new(NewNode::new("parent", Tier::Field).with_parent("root")).unwrap();
    let before = node.updated_at().unwrap().to_string();
    sleep(Duration::from_millis(5));

    assert!(node.add_child("c1"));
    assert!(!node.add_child("c1"));
    assert_eq!(node.child_count(), 1);
    assert_ne!(node.updated_at().unwrap(), before);

    assert!(node.remove_child("c1"));
    assert!(!node.remove_child("c1"));
    assert!(node.children_ids().is_empty());
}

#[test]
fn update_metadata_merges_and_keeps_created_at() {
    let mut node = Node::new(
        NewNode::new("n", Tier::Concept)
            .with_parent("p")
            .with_metadata(metadata(json!({"type": "x", "keep": true}))),
    )
    .unwrap();
    let created_at = node.created_at().unwrap().to_string();
    let updated_at = node.updated_at().unwrap().to_string();
    sleep(Duration::from_millis(5));

    node.update_metadata(metadata(json!({
        "type": "y",
        "extra": [1, 2],
        "created_at": "1999-01-01T00:00:00Z"
    })));

    assert_eq!(node.metadata()["type"], "y");
    assert_eq!(node.metadata()["keep"], true);
    assert_eq!(node.metadata()["extra"], json!([1, 2]));
    assert_eq!(node.created_at().unwrap(), created_at);
    assert_ne!(node.updated_at().unwrap(), updated_at);
}

#[test]
fn update_status_and_rename_refresh_updated_at() {
    let mut node = Node::new(NewNode::new("n", Tier::Domain)).unwrap();
    let first = node.updated_at().unwrap().to_string();
    sleep(Duration::from_millis(5));
    node.update_status(NodeStatus::Blocked);
    let second = node.updated_at().unwrap().to_string();
    assert_ne!(first, second);
    assert_eq!(node.status(), NodeStatus::Blocked);

    sleep(Duration::from_millis(5));
    node.rename("  renamed  ").unwrap();
    assert_eq!(node.name(), "renamed");
    assert_ne!(node.updated_at().unwrap(), second);

    assert!(node.rename("").is_err());
    assert_eq!(node.name(), "renamed");
}

#[test]
fn record_roundtrip_preserves_every_field() {
    let mut node = Node::new(
        NewNode::new("Mechanics", Tier::Field)
            .with_id("field-1")
            .with_parent("domain-1")
            .with_description("classical mechanics")
            .with_status(NodeStatus::InProgress)
            .with_metadata(metadata(json!({"type": "x", "weight": 0.5}))),
    )
    .unwrap();
    node.add_child("discipline-1");
    node.add_child("discipline-2");

    let record = node.to_record();
    assert_eq!(record["id"], "field-1");
    assert_eq!(record["tier"], "field");
    assert_eq!(record["tier_level"], 2);
    assert_eq!(record["status"], "in_progress");
    assert_eq!(record["parent_id"], "domain-1");
    assert_eq!(record["children_ids"], json!(["discipline-1", "discipline-2"]));

    let decoded = Node::from_record(&record).unwrap();
    assert_eq!(decoded, node);
}

#[test]
fn root_record_serializes_null_parent() {
    let node = Node::new(NewNode::new("root", Tier::Domain)).unwrap();
    let record = node.to_record();
    assert!(record["parent_id"].is_null());
    assert_eq!(Node::from_record(&record).unwrap(), node);
}

#[test]
fn from_record_names_first_missing_required_field() {
    let cases = [
        (json!({"name": "n", "tier": "domain"}), "id"),
        (json!({"id": "a", "tier": "domain"}), "name"),
        (json!({"id": "a", "name": "n"}), "tier"),
        (json!({}), "id"),
    ];
    for (value, expected) in cases {
        let record = value.as_object().cloned().unwrap();
        let err = Node::from_record(&record).unwrap_err();
        match err {
            GraphError::InvalidNodeData { field, .. } => assert_eq!(field, expected),
            other => panic!("unexpected error: {other}"),
        }
    }
}

#[test]
fn from_record_accepts_numeric_tier_and_checks_ordinal() {
    let numeric = json!({"id": "a", "name": "n", "tier": 4}).as_object().cloned().unwrap();
    assert_eq!(Node::from_record(&numeric).unwrap().tier(), Tier::Subject);

    let mismatched = json!({"id": "a", "name": "n", "tier": "subject", "tier_level": 5})
        .as_object()
        .cloned()
        .unwrap();
    let err = Node::from_record(&mismatched).unwrap_err();
    assert!(matches!(err, GraphError::InvalidNodeData { field: "tier_level", .. }));
}

#[test]
fn from_record_rejects_unknown_status_and_bad_shapes() {
    let status = json!({"id": "a", "name": "n", "tier": "domain", "status": "lost"})
        .as_object()
        .cloned()
        .unwrap();
    assert!(matches!(
        Node::from_record(&status),
        Err(GraphError::InvalidNodeData { field: "status", .. })
    ));

    let children = json!({"id": "a", "name": "n", "tier": "domain", "children_ids": "b"})
        .as_object()
        .cloned()
        .unwrap();
    assert!(matches!(
        Node::from_record(&children),
        Err(GraphError::InvalidNodeData { field: "children_ids", .. })
    ));
}

#[test]
fn serde_uses_record_form() {
    let node = Node::new(NewNode::new("n", Tier::Element).with_parent("p")).unwrap();
    let json = serde_json::to_value(&node).unwrap();
    assert_eq!(json["tier"], "element");
    assert_eq!(json["tier_level"], 10);

    let decoded: Node = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, node);

    let err = serde_json::from_value::<Node>(json!({"id": "a", "tier": "domain"})).unwrap_err();
    assert!(err.to_string().contains("name"), "unexpected error: {err}");
}
