//! Fixed schema for stack documents.
//!
//! Checks the serialized document rather than the typed model, so fields the
//! model captures in its `extra` maps are checked too. Every violation is
//! collected; nothing stops at the first one.

use serde_yaml_ng::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// String, number or bool
    Scalar,
    Bool,
    Sequence,
    Mapping,
}

impl Kind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Kind::Scalar => matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)),
            Kind::Bool => value.is_bool(),
            Kind::Sequence => value.is_sequence(),
            Kind::Mapping => value.is_mapping(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Kind::Scalar => "scalar",
            Kind::Bool => "boolean",
            Kind::Sequence => "sequence",
            Kind::Mapping => "mapping",
        }
    }
}

use Kind::*;

const TOP_LEVEL: &[(&str, &[Kind])] = &[
    ("version", &[Scalar]),
    ("name", &[Scalar]),
    ("services", &[Mapping]),
    ("networks", &[Mapping]),
    ("volumes", &[Mapping]),
    ("secrets", &[Mapping]),
    ("configs", &[Mapping]),
];

const RESOURCE_SECTIONS: &[&str] = &["networks", "volumes", "secrets", "configs"];

const SERVICE: &[(&str, &[Kind])] = &[
    ("image", &[Scalar]),
    ("build", &[Scalar, Mapping]),
    ("container_name", &[Scalar]),
    ("hostname", &[Scalar]),
    ("command", &[Scalar, Sequence]),
    ("entrypoint", &[Scalar, Sequence]),
    ("environment", &[Mapping, Sequence]),
    ("env_file", &[Scalar, Sequence]),
    ("ports", &[Sequence]),
    ("expose", &[Sequence]),
    ("volumes", &[Sequence]),
    ("tmpfs", &[Scalar, Sequence]),
    ("depends_on", &[Sequence, Mapping]),
    ("links", &[Sequence]),
    ("restart", &[Scalar]),
    ("networks", &[Sequence, Mapping]),
    ("network_mode", &[Scalar]),
    ("extra_hosts", &[Sequence, Mapping]),
    ("dns", &[Scalar, Sequence]),
    ("labels", &[Mapping, Sequence]),
    ("cap_add", &[Sequence]),
    ("cap_drop", &[Sequence]),
    ("security_opt", &[Sequence]),
    ("devices", &[Sequence]),
    ("privileged", &[Bool]),
    ("read_only", &[Bool]),
    ("init", &[Bool]),
    ("stdin_open", &[Bool]),
    ("tty", &[Bool]),
    ("user", &[Scalar]),
    ("group_add", &[Sequence]),
    ("working_dir", &[Scalar]),
    ("shm_size", &[Scalar]),
    ("mem_limit", &[Scalar]),
    ("cpus", &[Scalar]),
    ("ulimits", &[Mapping]),
    ("sysctls", &[Mapping, Sequence]),
    ("healthcheck", &[Mapping]),
    ("deploy", &[Mapping]),
    ("logging", &[Mapping]),
    ("secrets", &[Sequence]),
    ("configs", &[Sequence]),
    ("pid", &[Scalar]),
    ("ipc", &[Scalar]),
    ("runtime", &[Scalar]),
    ("platform", &[Scalar]),
    ("pull_policy", &[Scalar]),
    ("profiles", &[Sequence]),
    ("stop_signal", &[Scalar]),
    ("stop_grace_period", &[Scalar]),
];

/// Extension fields are allowed anywhere the compose format allows them
fn is_extension(key: &str) -> bool {
    key.starts_with("x-")
}

fn check_fields(
    path: &str,
    mapping: &serde_yaml_ng::Mapping,
    allowed: &[(&str, &[Kind])],
    violations: &mut Vec<String>,
) {
    for (key, value) in mapping {
        let Some(key) = key.as_str() else {
            violations.push(format!("{}: non-string key {:?}", path, key));
            continue;
        };
        if is_extension(key) {
            continue;
        }
        let field = if path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", path, key)
        };

        match allowed.iter().find(|(name, _)| *name == key) {
            None => violations.push(format!("{}: unknown field", field)),
            Some((_, kinds)) => {
                if !value.is_null() && !kinds.iter().any(|k| k.matches(value)) {
                    let expected: Vec<&str> = kinds.iter().map(|k| k.name()).collect();
                    violations.push(format!("{}: expected {}", field, expected.join(" or ")));
                }
            }
        }
    }
}

/// Check a serialized stack document, returning every violated field path
pub fn check(document: &Value) -> Vec<String> {
    let mut violations = Vec::new();

    let Some(root) = document.as_mapping() else {
        violations.push("document: expected a mapping".to_string());
        return violations;
    };

    check_fields("", root, TOP_LEVEL, &mut violations);

    match root.get("services") {
        None | Some(Value::Null) => violations.push("services: required".to_string()),
        Some(Value::Mapping(services)) => {
            if services.is_empty() {
                violations.push("services: must define at least one service".to_string());
            }
            for (name, service) in services {
                let name = name.as_str().unwrap_or_default();
                let path = format!("services.{}", name);
                match service.as_mapping() {
                    Some(fields) => {
                        check_fields(&path, fields, SERVICE, &mut violations);
                        if !fields.contains_key("image") && !fields.contains_key("build") {
                            violations.push(format!("{}: one of image or build is required", path));
                        }
                    }
                    None => violations.push(format!("{}: expected mapping", path)),
                }
            }
        }
        // already reported as a type error
        Some(_) => {}
    }

    for section in RESOURCE_SECTIONS {
        if let Some(Value::Mapping(entries)) = root.get(*section) {
            for (name, entry) in entries {
                if !entry.is_null() && !entry.is_mapping() {
                    violations.push(format!(
                        "{}.{}: expected mapping",
                        section,
                        name.as_str().unwrap_or_default()
                    ));
                }
            }
        }
    }

    violations
}
