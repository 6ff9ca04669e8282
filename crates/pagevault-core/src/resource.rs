//! Resource identifiers and deployment environments
//!
//! A resource is addressed by the pair `(collection, resource)`. Both halves
//! become path components on disk and in the secret store, so they are
//! validated once here and never concatenated by hand elsewhere.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Suffix appended to a blob path while an edit is in flight
pub const BACKUP_SUFFIX: &str = "-backup";

/// Maximum identifier length in bytes
const MAX_ID_LEN: usize = 128;

/// Validated collection identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionId(String);

impl CollectionId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_component("collection", &id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CollectionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CollectionId> for String {
    fn from(id: CollectionId) -> Self {
        id.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structured identity of one encrypted resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    collection: CollectionId,
    resource: String,
}

impl ResourceId {
    /// Build a resource id, validating both components
    pub fn new(collection: impl Into<String>, resource: impl Into<String>) -> Result<Self> {
        let collection = CollectionId::new(collection)?;
        Self::in_collection(collection, resource)
    }

    /// Build a resource id inside an already-validated collection
    pub fn in_collection(collection: CollectionId, resource: impl Into<String>) -> Result<Self> {
        let resource = resource.into();
        validate_component("resource", &resource)?;
        if resource.ends_with(BACKUP_SUFFIX) {
            return Err(Error::invalid_identifier(
                "resource",
                resource,
                "reserved suffix '-backup'",
            ));
        }
        Ok(Self {
            collection,
            resource,
        })
    }

    pub fn collection(&self) -> &CollectionId {
        &self.collection
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Label bound into the key envelope: `<collection>/<resource>`
    pub fn label(&self) -> String {
        format!("{}/{}", self.collection, self.resource)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.resource)
    }
}

fn validate_component(kind: &'static str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::invalid_identifier(kind, id, "must not be empty"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(Error::invalid_identifier(kind, id, "longer than 128 bytes"));
    }
    if id == "." || id == ".." {
        return Err(Error::invalid_identifier(kind, id, "relative path component"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(Error::invalid_identifier(
            kind,
            id,
            "only ASCII letters, digits, '-', '_' and '.' are allowed",
        ));
    }
    Ok(())
}

/// Deployment environment
///
/// Qualifies the AppRole role name, the secret-store prefix and both transit
/// key names (see `PagevaultConfig::{role_name, data_key_name, aux_key_name}`)
/// so that development and production never share key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Deployment {
    #[default]
    #[serde(alias = "dev")]
    Development,
    #[serde(alias = "prod")]
    Production,
}

impl Deployment {
    pub fn is_production(&self) -> bool {
        matches!(self, Deployment::Production)
    }

    /// Qualify a namespace for this environment (`notes` -> `notes-dev`)
    pub fn qualify(&self, name: &str) -> String {
        match self {
            Deployment::Development => format!("{}-dev", name),
            Deployment::Production => name.to_string(),
        }
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deployment::Development => write!(f, "dev"),
            Deployment::Production => write!(f, "prod"),
        }
    }
}

impl FromStr for Deployment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Deployment::Development),
            "prod" | "production" => Ok(Deployment::Production),
            _ => Err(Error::invalid_deployment(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_label() {
        let id = ResourceId::new("nb1", "p1").unwrap();
        assert_eq!(id.label(), "nb1/p1");
        assert_eq!(id.to_string(), "nb1/p1");
        assert_eq!(id.collection().as_str(), "nb1");
        assert_eq!(id.resource(), "p1");
    }

    #[test]
    fn test_rejects_path_traversal() {
        assert!(ResourceId::new("..", "p1").is_err());
        assert!(ResourceId::new("nb1", "../etc").is_err());
        assert!(ResourceId::new("nb1/evil", "p1").is_err());
        assert!(ResourceId::new("nb1", "").is_err());
    }

    #[test]
    fn test_rejects_backup_suffix() {
        let err = ResourceId::new("nb1", "p1-backup").unwrap_err();
        assert!(err.to_string().contains("-backup"));
    }

    #[test]
    fn test_rejects_overlong_identifier() {
        let long = "a".repeat(MAX_ID_LEN + 1);
        assert!(CollectionId::new(long).is_err());
    }

    #[test]
    fn test_collection_id_serde_validates() {
        let ok: CollectionId = serde_yaml_ng::from_str("nb1").unwrap();
        assert_eq!(ok.as_str(), "nb1");
        assert!(serde_yaml_ng::from_str::<CollectionId>("'a/b'").is_err());
    }

    #[test]
    fn test_deployment_parse_and_qualify() {
        assert_eq!("dev".parse::<Deployment>().unwrap(), Deployment::Development);
        assert_eq!("PROD".parse::<Deployment>().unwrap(), Deployment::Production);
        assert!("staging".parse::<Deployment>().is_err());

        assert_eq!(Deployment::Development.qualify("notes"), "notes-dev");
        assert_eq!(Deployment::Production.qualify("notes"), "notes");
    }
}
