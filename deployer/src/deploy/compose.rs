//! Compose stack assembly: merge, replicate and validate

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::deploy::schema;
use crate::errors::DeployError;
use crate::models::stack::{MergeMode, StackDefinition};

/// Merge two stack definitions into a new one.
///
/// Neither input is modified. In strict mode every key present in both inputs
/// is reported in one conflict error; in keep-first mode the first
/// definition's value wins.
pub fn merge(
    a: &StackDefinition,
    b: &StackDefinition,
    mode: MergeMode,
) -> Result<StackDefinition, DeployError> {
    let version = match (&a.version, &b.version) {
        (Some(va), Some(vb)) if va != vb => {
            return Err(DeployError::ConflictError(format!(
                "version mismatch: '{}' vs '{}'",
                va, vb
            )));
        }
        (Some(v), _) | (None, Some(v)) => Some(v.clone()),
        (None, None) => None,
    };

    let mut collisions = Vec::new();
    let merged = StackDefinition {
        version,
        services: merge_section("services", &a.services, &b.services, mode, &mut collisions),
        networks: merge_section("networks", &a.networks, &b.networks, mode, &mut collisions),
        volumes: merge_section("volumes", &a.volumes, &b.volumes, mode, &mut collisions),
        secrets: merge_section("secrets", &a.secrets, &b.secrets, mode, &mut collisions),
        configs: merge_section("configs", &a.configs, &b.configs, mode, &mut collisions),
        extra: merge_section("", &a.extra, &b.extra, mode, &mut collisions),
    };

    if !collisions.is_empty() {
        return Err(DeployError::ConflictError(format!(
            "defined in both stacks: {}",
            collisions.join(", ")
        )));
    }

    debug!(
        "Merged stacks into {} service(s): {}",
        merged.services.len(),
        merged.service_names().join(", ")
    );
    Ok(merged)
}

fn merge_section<V: Clone>(
    section: &str,
    first: &BTreeMap<String, V>,
    second: &BTreeMap<String, V>,
    mode: MergeMode,
    collisions: &mut Vec<String>,
) -> BTreeMap<String, V> {
    let mut merged = first.clone();
    for (key, value) in second {
        if merged.contains_key(key) {
            if mode == MergeMode::Strict {
                collisions.push(if section.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", section, key)
                });
            }
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Replica names for `count` copies of the service `template`.
///
/// `names` is used verbatim when it has `count` entries; a single entry is a
/// base name expanded to `base-1 .. base-count`. A single entry naming the
/// template itself is always a base name.
pub fn replica_names(
    template: &str,
    count: usize,
    names: &[String],
) -> Result<Vec<String>, DeployError> {
    if count == 0 {
        return Err(DeployError::ConflictError(
            "replica count must be at least 1".to_string(),
        ));
    }

    let base_is_template = names.len() == 1 && names[0] == template;
    let replicas: Vec<String> = if names.len() == count && !base_is_template {
        names.to_vec()
    } else if names.len() == 1 {
        (1..=count).map(|i| format!("{}-{}", names[0], i)).collect()
    } else {
        return Err(DeployError::ConflictError(format!(
            "{} replica name(s) given for {} replica(s): {}",
            names.len(),
            count,
            names.join(", ")
        )));
    };

    let mut seen = BTreeSet::new();
    for name in &replicas {
        if name.trim().is_empty() {
            return Err(DeployError::ConflictError(
                "replica names must not be empty".to_string(),
            ));
        }
        if !seen.insert(name.as_str()) {
            return Err(DeployError::ConflictError(format!(
                "duplicate replica name '{}'",
                name
            )));
        }
    }

    Ok(replicas)
}

/// Replace the single service `service` of `stack` with `count` named copies.
///
/// Each copy differs from the template only in its container name. On error
/// the stack is left untouched.
pub fn replicate(
    stack: &mut StackDefinition,
    service: &str,
    count: usize,
    names: &[String],
) -> Result<(), DeployError> {
    if stack.services.len() != 1 || !stack.services.contains_key(service) {
        return Err(DeployError::ConflictError(format!(
            "replication needs a stack with exactly the service '{}', found: {}",
            service,
            stack.service_names().join(", ")
        )));
    }

    let replicas = replica_names(service, count, names)?;
    if replicas.iter().any(|name| name == service) {
        return Err(DeployError::ConflictError(format!(
            "replica name '{}' is the name of the template service",
            service
        )));
    }

    let Some(template) = stack.services.remove(service) else {
        return Err(DeployError::Internal(format!("service '{}' vanished", service)));
    };
    for name in replicas {
        let mut replica = template.clone();
        replica.container_name = Some(name.clone());
        stack.services.insert(name, replica);
    }

    debug!("Replicated {} into {} service(s)", service, count);
    Ok(())
}

/// Check a stack against the fixed schema, reporting every violation at once
pub fn validate(stack: &StackDefinition) -> Result<(), DeployError> {
    let document = serde_yaml_ng::to_value(stack)?;
    let violations = schema::check(&document);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(DeployError::ValidationError(violations))
    }
}
