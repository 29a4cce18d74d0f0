//! Declarative source write-back tests

use std::collections::BTreeMap;

use tokio_test::{assert_err, assert_ok};

use wsdeploy::filesys::file::File;
use wsdeploy::storage::source::{load_source, persist_ids, FieldUpdate, IdUpdate};

const SOURCE: &str = r#"workspaces:
  desktop:
    image: registry.local/desktop:1.0
    friendly_name: Desktop
users:
- username: alice
  first_name: Alice
  workspace: desktop
  environment:
    LANG: en_US.UTF-8
  custom_note: keep me
- username: bob
  workspace: desktop
  user_id: u-bob
  kasm_id: old-session
"#;

fn write_source(dir: &tempfile::TempDir) -> File {
    let file = File::new(dir.path().join("users.yml"));
    std::fs::write(file.path(), SOURCE).unwrap();
    file
}

#[tokio::test]
async fn test_persist_sets_and_clears_ids() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_source(&dir);

    let mut updates = BTreeMap::new();
    updates.insert(
        "alice".to_string(),
        IdUpdate {
            user_id: FieldUpdate::Set("u-alice".to_string()),
            kasm_id: FieldUpdate::Set("k-alice".to_string()),
        },
    );
    updates.insert(
        "bob".to_string(),
        IdUpdate {
            kasm_id: FieldUpdate::Clear,
            ..Default::default()
        },
    );
    assert_ok!(persist_ids(&file, &updates).await);

    let source = load_source(&file).await.unwrap();
    assert_eq!(source.users[0].user_id.as_deref(), Some("u-alice"));
    assert_eq!(source.users[0].kasm_id.as_deref(), Some("k-alice"));
    assert_eq!(source.users[1].user_id.as_deref(), Some("u-bob"));
    assert!(source.users[1].kasm_id.is_none());
}

#[tokio::test]
async fn test_persist_keeps_unknown_fields() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_source(&dir);

    let mut updates = BTreeMap::new();
    updates.insert(
        "alice".to_string(),
        IdUpdate {
            user_id: FieldUpdate::Set("u-alice".to_string()),
            ..Default::default()
        },
    );
    assert_ok!(persist_ids(&file, &updates).await);

    let contents = std::fs::read_to_string(file.path()).unwrap();
    assert!(contents.contains("custom_note: keep me"));
    assert!(contents.contains("friendly_name: Desktop"));
    assert!(contents.contains("LANG: en_US.UTF-8"));
}

#[tokio::test]
async fn test_persist_without_changes_leaves_file_alone() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_source(&dir);

    let mut updates = BTreeMap::new();
    updates.insert(
        "bob".to_string(),
        IdUpdate {
            user_id: FieldUpdate::Set("u-bob".to_string()),
            kasm_id: FieldUpdate::Keep,
        },
    );
    updates.insert(
        "nobody".to_string(),
        IdUpdate {
            user_id: FieldUpdate::Set("u-nobody".to_string()),
            ..Default::default()
        },
    );
    assert_ok!(persist_ids(&file, &updates).await);

    assert_eq!(std::fs::read_to_string(file.path()).unwrap(), SOURCE);
}

#[tokio::test]
async fn test_load_source_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = File::new(dir.path().join("missing.yml"));

    let err = assert_err!(load_source(&missing).await);
    assert!(err.to_string().contains("missing.yml"));
}

#[tokio::test]
async fn test_persist_rejects_malformed_users() {
    let dir = tempfile::tempdir().unwrap();
    let file = File::new(dir.path().join("users.yml"));
    std::fs::write(file.path(), "users:\n  alice: {}\n").unwrap();

    let mut updates = BTreeMap::new();
    updates.insert("alice".to_string(), IdUpdate::default());
    assert_err!(persist_ids(&file, &updates).await);
}
