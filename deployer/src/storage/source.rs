//! Loading the declarative source and writing provisioned ids back into it.
//!
//! Write-back edits the parsed YAML tree rather than re-serializing the typed
//! model, so fields this tool does not know about are left as they were.

use std::collections::BTreeMap;

use serde_yaml_ng::{Mapping, Value};
use tracing::debug;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::user::DeclarativeSource;

/// Load the declarative source document
pub async fn load_source(file: &File) -> Result<DeclarativeSource, DeployError> {
    file.read_yaml().await.map_err(|e| {
        DeployError::SourceError(format!("{}: {}", file.path().display(), e))
    })
}

/// Change applied to one persisted field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldUpdate {
    #[default]
    Keep,
    Set(String),
    Clear,
}

/// Identifier changes for one user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdUpdate {
    pub user_id: FieldUpdate,
    pub kasm_id: FieldUpdate,
}

/// Apply `updates` (keyed by username) to a parsed source document.
///
/// Returns the number of user entries changed.
pub fn apply_ids(
    document: &mut Value,
    updates: &BTreeMap<String, IdUpdate>,
) -> Result<usize, DeployError> {
    let users = match document.get_mut("users") {
        Some(Value::Sequence(users)) => users,
        Some(_) => {
            return Err(DeployError::SourceError(
                "users: expected a sequence".to_string(),
            ))
        }
        None => return Ok(0),
    };

    let mut changed = 0;
    for user in users.iter_mut() {
        let Some(entry) = user.as_mapping_mut() else {
            continue;
        };
        let Some(username) = entry.get("username").and_then(Value::as_str) else {
            continue;
        };
        let Some(update) = updates.get(username) else {
            continue;
        };

        let before = entry.clone();
        apply_field(entry, "user_id", &update.user_id);
        apply_field(entry, "kasm_id", &update.kasm_id);
        if *entry != before {
            changed += 1;
        }
    }

    Ok(changed)
}

fn apply_field(entry: &mut Mapping, key: &str, update: &FieldUpdate) {
    match update {
        FieldUpdate::Keep => {}
        FieldUpdate::Set(value) => {
            entry.insert(Value::String(key.to_string()), Value::String(value.clone()));
        }
        FieldUpdate::Clear => {
            entry.remove(key);
        }
    }
}

/// Rewrite the source file with updated identifiers
pub async fn persist_ids(
    file: &File,
    updates: &BTreeMap<String, IdUpdate>,
) -> Result<(), DeployError> {
    if updates.is_empty() {
        return Ok(());
    }

    let contents = file.read_string().await?;
    let mut document: Value = serde_yaml_ng::from_str(&contents)?;

    let changed = apply_ids(&mut document, updates)?;
    if changed == 0 {
        debug!("Declarative source already up to date");
        return Ok(());
    }
    let rendered = serde_yaml_ng::to_string(&document)?;
    file.write_atomic(rendered.as_bytes()).await?;
    debug!("Persisted identifiers of {} user(s)", changed);
    Ok(())
}
