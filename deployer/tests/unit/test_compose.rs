//! Compose assembler tests

use wsdeploy::deploy::compose::{merge, replicate, validate};
use wsdeploy::errors::DeployError;
use wsdeploy::models::{MergeMode, StackDefinition};

fn stack(yaml: &str) -> StackDefinition {
    StackDefinition::from_yaml(yaml).unwrap()
}

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn a() -> StackDefinition {
    stack(
        r#"
services:
  db:
    image: postgres:16
  web:
    image: nginx:1
volumes:
  data: {}
"#,
    )
}

fn b() -> StackDefinition {
    stack(
        r#"
services:
  web:
    image: nginx:2
  api:
    image: api:1
networks:
  kasm_default_network: {}
"#,
    )
}

fn c() -> StackDefinition {
    stack(
        r#"
services:
  api:
    image: api:2
  worker:
    image: worker:1
volumes:
  data:
    driver: local
"#,
    )
}

#[test]
fn test_keep_first_merge_is_associative() {
    let left = merge(&merge(&a(), &b(), MergeMode::KeepFirst).unwrap(), &c(), MergeMode::KeepFirst).unwrap();
    let right = merge(&a(), &merge(&b(), &c(), MergeMode::KeepFirst).unwrap(), MergeMode::KeepFirst).unwrap();

    assert_eq!(left, right);
    assert_eq!(left.service_names(), vec!["api", "db", "web", "worker"]);
    assert_eq!(left.services["web"].image.as_deref(), Some("nginx:1"));
    assert_eq!(left.services["api"].image.as_deref(), Some("api:1"));
    assert!(left.volumes.contains_key("data"));
    assert!(left.networks.contains_key("kasm_default_network"));
}

#[test]
fn test_keep_first_merge_key_sets_commute() {
    let ab = merge(&a(), &b(), MergeMode::KeepFirst).unwrap();
    let ba = merge(&b(), &a(), MergeMode::KeepFirst).unwrap();

    assert_eq!(ab.service_names(), ba.service_names());
    assert_eq!(ab.volumes.keys().collect::<Vec<_>>(), ba.volumes.keys().collect::<Vec<_>>());
}

#[test]
fn test_keep_first_merge_with_itself_is_identity() {
    let merged = merge(&a(), &a(), MergeMode::KeepFirst).unwrap();
    assert_eq!(merged, a());
}

#[test]
fn test_strict_merge_rejects_any_shared_key() {
    // shared service
    assert!(matches!(
        merge(&a(), &b(), MergeMode::Strict),
        Err(DeployError::ConflictError(_))
    ));
    // shared volume only
    let volumes_only = stack("services:\n  other:\n    image: x\nvolumes:\n  data: {}\n");
    assert!(merge(&c(), &volumes_only, MergeMode::Strict).is_err());
}

#[test]
fn test_strict_merge_of_disjoint_stacks() {
    let merged = merge(&a(), &stack("services:\n  cache:\n    image: redis:7\n"), MergeMode::Strict).unwrap();
    assert_eq!(merged.service_names(), vec!["cache", "db", "web"]);
}

#[test]
fn test_merge_does_not_modify_inputs() {
    let first = a();
    let second = b();
    let _ = merge(&first, &second, MergeMode::KeepFirst).unwrap();

    assert_eq!(first, a());
    assert_eq!(second, b());
}

#[test]
fn test_replicate_with_base_name() {
    let mut s = stack("services:\n  svc:\n    image: desktop:1\n    ports:\n      - \"6901\"\n");
    replicate(&mut s, "svc", 3, &names(&["svc"])).unwrap();

    assert_eq!(s.service_names(), vec!["svc-1", "svc-2", "svc-3"]);
    assert!(!s.services.contains_key("svc"));
    for (name, service) in &s.services {
        assert_eq!(service.container_name.as_deref(), Some(name.as_str()));
        assert_eq!(service.image.as_deref(), Some("desktop:1"));
        assert!(service.extra.contains_key("ports"));
    }
}

#[test]
fn test_replicate_single_copy_with_template_name() {
    let mut s = stack("services:\n  web:\n    image: nginx:1\n");
    replicate(&mut s, "web", 1, &names(&["web"])).unwrap();

    assert_eq!(s.service_names(), vec!["web-1"]);
    assert_eq!(s.services["web-1"].container_name.as_deref(), Some("web-1"));
}

#[test]
fn test_replicate_with_explicit_names() {
    let mut s = stack("services:\n  svc:\n    image: desktop:1\n");
    replicate(&mut s, "svc", 2, &names(&["alice", "bob"])).unwrap();

    assert_eq!(s.service_names(), vec!["alice", "bob"]);
}

#[test]
fn test_replicate_output_shape() {
    for count in 1..=5 {
        let mut s = stack("services:\n  template:\n    image: desktop:1\n");
        replicate(&mut s, "template", count, &names(&["replica"])).unwrap();

        assert_eq!(s.services.len(), count);
        assert!(!s.services.contains_key("template"));
    }
}

#[test]
fn test_replicate_count_mismatch_leaves_stack_untouched() {
    let original = stack("services:\n  svc:\n    image: desktop:1\n");
    let mut s = original.clone();

    let result = replicate(&mut s, "svc", 2, &names(&["a", "b", "c"]));

    assert!(matches!(result, Err(DeployError::ConflictError(_))));
    assert_eq!(s, original);
}

#[test]
fn test_replicate_needs_exactly_the_named_service() {
    let mut two = a();
    assert!(replicate(&mut two, "db", 2, &names(&["db"])).is_err());
    assert_eq!(two, a());

    let mut other = stack("services:\n  svc:\n    image: desktop:1\n");
    assert!(replicate(&mut other, "missing", 2, &names(&["x"])).is_err());
}

#[test]
fn test_validate_reports_unknown_top_level_field() {
    let s = stack("services:\n  web:\n    image: nginx\nservicez:\n  api:\n    image: api\n");

    match validate(&s) {
        Err(DeployError::ValidationError(violations)) => {
            assert!(violations.iter().any(|v| v.contains("servicez")));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_validate_aggregates_violations() {
    let s = stack(
        r#"
services:
  web:
    image: nginx
    restart_policy: always
  api:
    build: ./api
    ports: "8080:80"
unknown_root: true
"#,
    );

    let err = validate(&s).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("services.web.restart_policy"));
    assert!(message.contains("services.api.ports"));
    assert!(message.contains("unknown_root"));
}

#[test]
fn test_validate_accepts_merged_stack() {
    let merged = merge(&a(), &b(), MergeMode::KeepFirst).unwrap();
    assert!(validate(&merged).is_ok());
}
