//! Secret descriptors and the set the resolver builds.
//!
//! Values live only in memory inside [`SecretValue`], which zeroes itself on
//! drop and prints `[REDACTED]`. Nothing in this module serializes a value.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A secret value with automatic memory zeroing on drop.
#[derive(Clone)]
pub struct SecretValue {
    inner: SecretString,
}

impl SecretValue {
    /// Move a string into secure storage.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: SecretString::from(value.into()),
        }
    }

    /// Expose the value.
    ///
    /// The caller must not log, print or persist the returned string; it is
    /// meant for handing to the secret store over stdin.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.inner.expose_secret()
    }

    /// Whether the value is empty, without exposing it.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.expose_secret().is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Where a secret's name came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretOrigin {
    /// Derived from provisioned infrastructure or configuration
    InfrastructureDerived,
    /// Read by the project's source code
    RuntimeDetected,
    /// Supplied by the operator without being detected
    UserSupplied,
}

impl fmt::Display for SecretOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InfrastructureDerived => "infrastructure-derived",
            Self::RuntimeDetected => "runtime-detected",
            Self::UserSupplied => "user-supplied",
        })
    }
}

/// Metadata about one named secret, plus its value when known.
#[derive(Debug, Clone, Serialize)]
pub struct SecretDescriptor {
    /// Secret name as it appears in the store and in workflows
    pub name: String,
    /// Where the name came from
    pub origin: SecretOrigin,
    /// Whether the pipeline cannot run without it
    pub required: bool,
    #[serde(skip)]
    value: Option<SecretValue>,
}

impl SecretDescriptor {
    /// Descriptor with a known value.
    #[must_use]
    pub fn resolved(name: impl Into<String>, origin: SecretOrigin, value: SecretValue) -> Self {
        Self {
            name: name.into(),
            origin,
            required: true,
            value: Some(value),
        }
    }

    /// Required descriptor whose value has not been supplied.
    #[must_use]
    pub fn unresolved(name: impl Into<String>, origin: SecretOrigin) -> Self {
        Self {
            name: name.into(),
            origin,
            required: true,
            value: None,
        }
    }

    /// The value, if known.
    #[must_use]
    pub const fn value(&self) -> Option<&SecretValue> {
        self.value.as_ref()
    }

    /// Whether a value is known.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.value.is_some()
    }
}

/// Descriptors keyed and ordered by name. Names are unique.
#[derive(Debug, Clone, Default)]
pub struct SecretSet {
    descriptors: BTreeMap<String, SecretDescriptor>,
}

#[derive(Serialize)]
struct Manifest<'a> {
    secrets: Vec<&'a SecretDescriptor>,
}

impl SecretSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor, returning the one it replaced.
    pub fn insert(&mut self, descriptor: SecretDescriptor) -> Option<SecretDescriptor> {
        self.descriptors.insert(descriptor.name.clone(), descriptor)
    }

    /// Descriptor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SecretDescriptor> {
        self.descriptors.get(name)
    }

    /// Whether a descriptor with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    /// Descriptors in name order.
    pub fn iter(&self) -> impl Iterator<Item = &SecretDescriptor> {
        self.descriptors.values()
    }

    /// Number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Every name.
    #[must_use]
    pub fn names(&self) -> BTreeSet<String> {
        self.descriptors.keys().cloned().collect()
    }

    /// Names whose value is known.
    #[must_use]
    pub fn resolved_names(&self) -> BTreeSet<String> {
        self.iter()
            .filter(|d| d.is_resolved())
            .map(|d| d.name.clone())
            .collect()
    }

    /// Required descriptors that still lack a value.
    #[must_use]
    pub fn unresolved(&self) -> Vec<&SecretDescriptor> {
        self.iter()
            .filter(|d| d.required && !d.is_resolved())
            .collect()
    }

    /// YAML manifest listing name, origin and required flag of every
    /// descriptor. Values are never included.
    ///
    /// # Errors
    ///
    /// Returns an error if YAML serialization fails.
    pub fn manifest_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&Manifest {
            secrets: self.iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_is_redacted() {
        let value = SecretValue::new("hunter2");
        assert_eq!(format!("{value:?}"), "[REDACTED]");
        assert_eq!(format!("{value}"), "[REDACTED]");
        assert_eq!(value.expose(), "hunter2");

        let descriptor =
            SecretDescriptor::resolved("API_KEY", SecretOrigin::RuntimeDetected, value);
        assert!(!format!("{descriptor:?}").contains("hunter2"));
    }

    #[test]
    fn test_set_is_ordered_and_unique() {
        let mut set = SecretSet::new();
        set.insert(SecretDescriptor::unresolved("ZETA", SecretOrigin::RuntimeDetected));
        set.insert(SecretDescriptor::unresolved("ALPHA", SecretOrigin::RuntimeDetected));
        let replaced = set.insert(SecretDescriptor::resolved(
            "ZETA",
            SecretOrigin::UserSupplied,
            SecretValue::new("z"),
        ));

        assert!(replaced.is_some());
        assert_eq!(set.len(), 2);
        let names: Vec<_> = set.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["ALPHA", "ZETA"]);
        assert_eq!(set.resolved_names(), BTreeSet::from(["ZETA".to_string()]));
        assert_eq!(set.unresolved().len(), 1);
    }

    #[test]
    fn test_manifest_omits_values() {
        let mut set = SecretSet::new();
        set.insert(SecretDescriptor::resolved(
            "GCP_PROJECT_ID",
            SecretOrigin::InfrastructureDerived,
            SecretValue::new("very-secret-project"),
        ));
        set.insert(SecretDescriptor::unresolved("API_KEY", SecretOrigin::RuntimeDetected));

        let yaml = set.manifest_yaml().unwrap();
        assert!(!yaml.contains("very-secret-project"));
        assert!(yaml.contains("name: API_KEY"));
        assert!(yaml.contains("origin: infrastructure-derived"));
        assert!(yaml.contains("required: true"));
        assert!(yaml.find("API_KEY") < yaml.find("GCP_PROJECT_ID"));
    }
}
