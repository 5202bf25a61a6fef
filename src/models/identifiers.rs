use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of a deployable application package
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PackageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of an orchestrator instance taking part in a collaboration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Token linking an asynchronous request to its eventual response
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Namespace-qualified name, rendered as `{namespace}localPart`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    pub namespace: String,
    pub local_part: String,
}

impl QualifiedName {
    pub fn new(namespace: impl Into<String>, local_part: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local_part: local_part.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.local_part)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local_part)
        }
    }
}

impl std::str::FromStr for QualifiedName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix('{') {
            Some(rest) => {
                let (namespace, local_part) = rest
                    .split_once('}')
                    .ok_or_else(|| format!("Invalid qualified name: {s}"))?;
                if local_part.is_empty() {
                    return Err(format!("Qualified name without local part: {s}"));
                }
                Ok(Self::new(namespace, local_part))
            }
            None if s.is_empty() => Err("Empty qualified name".to_string()),
            None => Ok(Self::new("", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name_display_and_parse() {
        let name = QualifiedName::new("http://example.org/plans", "BuildPlan");
        assert_eq!(name.to_string(), "{http://example.org/plans}BuildPlan");
        assert_eq!(name.to_string().parse::<QualifiedName>().unwrap(), name);

        let bare: QualifiedName = "Terminate".parse().unwrap();
        assert_eq!(bare.namespace, "");
        assert_eq!(bare.to_string(), "Terminate");
    }

    #[test]
    fn test_qualified_name_rejects_malformed() {
        assert!("{ns-without-close".parse::<QualifiedName>().is_err());
        assert!("{ns}".parse::<QualifiedName>().is_err());
        assert!("".parse::<QualifiedName>().is_err());
    }

    #[test]
    fn test_generated_correlation_ids_differ() {
        assert_ne!(CorrelationId::generate(), CorrelationId::generate());
    }
}
