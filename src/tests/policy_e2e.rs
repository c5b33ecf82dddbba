//! End-to-end policy tests.
//!
//! A single policy file defines three domains; each test loads it, builds
//! the registry against the fixture catalog and checks decisions or
//! compiled specifications.
//!
//! # Example
//!
//! ```ignore
//! #[rstest]
//! #[case::viewer_lists_plain("viewer", "list", parent(2), true)]
//! fn test_parent_decisions(
//!     registry: PolicyRegistry,
//!     #[case] domain: &str,
//!     #[case] action: &str,
//!     #[case] object: Parent,
//!     #[case] expected: bool,
//! ) {
//!     assert_eq!(registry.allows(domain, action, &object).unwrap(), expected);
//! }
//! ```

use std::{sync::Arc, thread};

use rstest::{fixture, rstest};
use serde_json::json;

use super::fixtures::{Child, Parent, child, parent};
use crate::{Catalog, PolicyConfig, PolicyRegistry};

const POLICY: &str = r#"
[actions]
moderate = ["update", "delete"]

[aliases]
list = "read"

[[domains]]
name = "admin"

[[domains.rules]]
actions = ["manage"]
resource = "Parent"

[[domains.rules]]
actions = ["manage"]
resource = "Child"

[[domains]]
name = "viewer"

[[domains.rules]]
actions = ["read"]
resource = "Parent"
when = [ "not", { field = "label", value = "hidden" } ]

[[domains.rules]]
actions = ["read"]
resource = "Child"
when = [ { field = "parent.label", value = "public" } ]

[[domains]]
name = "moderator"

[[domains.rules]]
actions = ["moderate"]
resource = "Parent"
when = [ { field = "children.tags", value = "flagged" }, "and", "not", { field = "id", value = 1 } ]

[[domains.rules]]
effect = "deny"
actions = ["moderate"]
resource = "Parent"
when = [ { field = "label", value = "pinned" } ]

[[domains]]
name = "anonymous"
"#;

#[fixture]
fn registry() -> PolicyRegistry {
    let catalog = Catalog::new().with::<Parent>().with::<Child>();
    PolicyConfig::from_str(POLICY)
        .unwrap()
        .build(&catalog)
        .unwrap()
}

fn flagged(id: i64) -> Parent {
    parent(id).with_children(vec![
        child(10, "a"),
        child(11, "b").with_tags(vec!["flagged"]),
    ])
}

#[rstest]
#[case::admin_reads("admin", "read", parent(2), true)]
#[case::admin_deletes("admin", "delete", parent(3).with_label("hidden"), true)]
#[case::admin_custom_action("admin", "archive", parent(2), true)]
#[case::viewer_lists_plain("viewer", "list", parent(2), true)]
#[case::viewer_shows_plain("viewer", "show", parent(2), true)]
#[case::viewer_hidden("viewer", "read", parent(3).with_label("hidden"), false)]
#[case::viewer_cannot_update("viewer", "update", parent(2), false)]
#[case::moderator_updates_flagged("moderator", "update", flagged(4), true)]
#[case::moderator_deletes_flagged("moderator", "delete", flagged(4), true)]
#[case::moderator_skips_first("moderator", "update", flagged(1), false)]
#[case::moderator_skips_unflagged("moderator", "update", parent(4), false)]
#[case::moderator_pinned("moderator", "delete", flagged(5).with_label("pinned"), false)]
#[case::moderator_cannot_read("moderator", "read", flagged(4), false)]
#[case::anonymous_defaults("anonymous", "read", parent(2), true)]
fn test_parent_decisions(
    registry: PolicyRegistry,
    #[case] domain: &str,
    #[case] action: &str,
    #[case] object: Parent,
    #[case] expected: bool,
) {
    assert_eq!(
        registry.allows(domain, action, &object).unwrap(),
        expected,
        "{domain} {action} {object:?}"
    );
}

#[rstest]
fn test_child_through_parent(registry: PolicyRegistry) {
    let public = child(1, "a").with_parent(parent(2).with_label("public"));
    let private = child(2, "b").with_parent(parent(3).with_label("private"));
    let orphan = child(3, "c");

    assert!(registry.allows("viewer", "read", &public).unwrap());
    assert!(!registry.allows("viewer", "read", &private).unwrap());
    assert!(!registry.allows("viewer", "read", &orphan).unwrap());
    assert!(registry.allows("admin", "update", &orphan).unwrap());
}

#[rstest]
fn test_any_role(registry: PolicyRegistry) {
    let object = flagged(4);
    assert!(registry.allows_any(&["viewer", "moderator"], "update", &object).unwrap());
    assert!(!registry.allows_any(&["viewer", "guest"], "update", &object).unwrap());
}

#[rstest]
fn test_explain(registry: PolicyRegistry) {
    let decision = registry.explain("moderator", "delete", &flagged(4)).unwrap();
    assert_eq!(
        serde_json::to_value(&decision).unwrap(),
        json!({
            "allowed": true,
            "action": "delete",
            "canonical_action": "delete",
            "resource": "Parent",
            "matched_actions": ["moderate"],
            "defaulted": false
        })
    );

    let decision = registry.explain("anonymous", "list", &parent(1)).unwrap();
    assert!(decision.allowed);
    assert!(decision.defaulted);
    assert_eq!(decision.canonical_action, "read");
}

#[rstest]
#[case::viewer_parent(
    "viewer",
    "list",
    "FROM Parent WHERE (FALSE) OR (NOT (label = 'hidden'))"
)]
#[case::admin_parent("admin", "read", "FROM Parent WHERE (FALSE) OR (TRUE)")]
#[case::moderator_delete(
    "moderator",
    "delete",
    "FROM Parent JOIN Parent.children AS j1 WHERE \
     ((FALSE) OR ((j1.tags = 'flagged') AND (NOT (id = 1)))) AND ((FALSE) OR (NOT (label = 'pinned')))"
)]
#[case::moderator_read("moderator", "read", "FROM Parent WHERE FALSE")]
#[case::anonymous_read("anonymous", "read", "FROM Parent WHERE TRUE")]
fn test_parent_specifications(
    registry: PolicyRegistry,
    #[case] domain: &str,
    #[case] action: &str,
    #[case] expected: &str,
) {
    let spec = registry.to_specification::<Parent>(domain, action).unwrap();
    assert_eq!(spec.to_string(), expected);
}

#[rstest]
fn test_child_specification_json(registry: PolicyRegistry) {
    let spec = registry.to_specification::<Child>("viewer", "read").unwrap();
    assert_eq!(
        spec.to_string(),
        "FROM Child JOIN Child.parent AS j1 WHERE (FALSE) OR (j1.label = 'public')"
    );
    assert_eq!(
        spec.to_json().unwrap(),
        json!({
            "resource": "Child",
            "joins": [{"alias": "j1", "field": "parent"}],
            "filter": {
                "type": "or",
                "filters": [
                    {"type": "or", "filters": []},
                    {"type": "equals", "field": {"alias": "j1", "field": "label"}, "value": "public"}
                ]
            }
        })
    );
}

#[rstest]
fn test_registry_shared_across_threads(registry: PolicyRegistry) {
    let registry = Arc::new(registry);
    let handles: Vec<_> = ["admin", "viewer", "moderator", "anonymous"]
        .into_iter()
        .map(|domain| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.allows(domain, "update", &flagged(4)).unwrap())
        })
        .collect();

    let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, vec![true, false, true, true]);
}
