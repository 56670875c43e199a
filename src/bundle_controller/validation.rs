//! Admission-time validation of Bundle objects.
//!
//! Every rule is checked and every violation reported, so a user fixing a
//! Bundle sees the complete list at once instead of one error per round trip.

use std::collections::BTreeSet;
use std::fmt;

use super::types::Bundle;
use crate::{Error, Result};

/// A single violation anchored to a spec or status field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrorList(pub Vec<FieldError>);

impl FieldErrorList {
    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FieldErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", rendered.join(", "))
    }
}

/// Outcome of validating a Bundle: all violations plus advisory warnings.
#[derive(Debug, Default)]
pub struct Validation {
    pub warnings: Vec<String>,
    pub errors: FieldErrorList,
}

impl Validation {
    /// Collapse into the reconciler-facing result, keeping warnings on success.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(Error::ValidationError(self.errors))
        }
    }
}

/// Check every invariant of the Bundle data model. Pure and total: no I/O,
/// same output for the same input.
pub fn validate_bundle(bundle: &Bundle) -> Validation {
    let mut v = Validation::default();
    let target_key = bundle.target_key();

    let mut source_count = 0;
    let mut default_cas_requests = 0;

    for (i, source) in bundle.spec.sources.iter().enumerate() {
        let path = format!("spec.sources[{i}]");
        let mut union_count = 0;

        if let Some(config_map) = &source.config_map {
            source_count += 1;
            union_count += 1;
            if config_map.name.is_empty() {
                v.errors.push(
                    format!("{path}.configMap.name"),
                    "source configMap name must be defined",
                );
            }
            if config_map.key.is_empty() {
                v.errors.push(
                    format!("{path}.configMap.key"),
                    "source configMap key must be defined",
                );
            }
            // A Bundle reading its own projected target would feed on itself.
            let bundle_name = bundle.metadata.name.as_deref().unwrap_or_default();
            if !target_key.is_empty()
                && config_map.name == bundle_name
                && config_map.key == target_key
            {
                v.errors.push(
                    format!("{path}.configMap"),
                    "cannot define the same source as target",
                );
            }
        }

        if let Some(secret) = &source.secret {
            source_count += 1;
            union_count += 1;
            if secret.name.is_empty() {
                v.errors.push(
                    format!("{path}.secret.name"),
                    "source secret name must be defined",
                );
            }
            if secret.key.is_empty() {
                v.errors.push(
                    format!("{path}.secret.key"),
                    "source secret key must be defined",
                );
            }
        }

        if source.in_line.is_some() {
            source_count += 1;
            union_count += 1;
        }

        if let Some(use_default_cas) = source.use_default_cas {
            union_count += 1;
            // Every appearance counts toward the once-or-not-at-all rule,
            // even a false one.
            default_cas_requests += 1;
            if use_default_cas {
                source_count += 1;
            } else {
                v.warnings
                    .push(format!("{path}.useDefaultCAs: false is a no-op"));
            }
        }

        if union_count != 1 {
            v.errors.push(
                path,
                format!(
                    "must define exactly one source type for each item but found {union_count} defined types"
                ),
            );
        }
    }

    if source_count == 0 {
        v.errors
            .push("spec.sources", "must define at least one source");
    }

    if default_cas_requests > 1 {
        v.errors.push(
            "spec.sources",
            format!(
                "must request default CAs either once or not at all but got {default_cas_requests} requests"
            ),
        );
    }

    match &bundle.spec.target.config_map {
        None => v
            .errors
            .push("spec.target.configMap", "target configMap must be defined"),
        Some(config_map) if config_map.key.is_empty() => v.errors.push(
            "spec.target.configMap.key",
            "target configMap key must be defined",
        ),
        Some(_) => {}
    }

    if let Some(jks_key) = bundle.jks_key()
        && !target_key.is_empty()
        && jks_key == target_key
    {
        v.errors.push(
            "spec.target.additionalFormats.jks.key",
            "target JKS key must be different to configMap key",
        );
    }

    if let Some(selector) = &bundle.spec.target.namespace_selector {
        for (key, value) in selector.match_labels.iter().flatten() {
            if !is_qualified_name(key) {
                v.errors.push(
                    "spec.target.namespaceSelector.matchLabels",
                    format!(
                        "key \"{key}\": name part must consist of alphanumeric characters, '-', '_' or '.', and must start and end with an alphanumeric character"
                    ),
                );
            }
            if !is_label_value(value) {
                v.errors.push(
                    "spec.target.namespaceSelector.matchLabels",
                    format!(
                        "value \"{value}\": must be no more than 63 characters of alphanumerics, '-', '_' or '.', starting and ending with an alphanumeric character"
                    ),
                );
            }
        }
    }

    if let Some(conditions) = bundle.status.as_ref().and_then(|s| s.conditions.as_ref()) {
        let mut seen = BTreeSet::new();
        for (i, condition) in conditions.iter().enumerate() {
            if !seen.insert(condition.type_.as_str()) {
                v.errors.push(
                    format!("status.conditions[{i}]"),
                    "condition type already present on Bundle",
                );
            }
        }
    }

    v
}

/// Label key syntax: an optional DNS subdomain prefix and a name part.
fn is_qualified_name(key: &str) -> bool {
    match key.split_once('/') {
        Some((prefix, name)) => is_dns_subdomain(prefix) && is_label_name(name),
        None => is_label_name(key),
    }
}

fn is_label_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 63 {
        return false;
    }
    let bytes = name.as_bytes();
    bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

fn is_label_value(value: &str) -> bool {
    value.is_empty() || is_label_name(value)
}

fn is_dns_subdomain(subdomain: &str) -> bool {
    if subdomain.is_empty() || subdomain.len() > 253 {
        return false;
    }
    subdomain.split('.').all(|label| {
        let bytes = label.as_bytes();
        !label.is_empty()
            && label.len() <= 63
            && (bytes[0].is_ascii_lowercase() || bytes[0].is_ascii_digit())
            && (bytes[bytes.len() - 1].is_ascii_lowercase() || bytes[bytes.len() - 1].is_ascii_digit())
            && bytes
                .iter()
                .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    })
}
