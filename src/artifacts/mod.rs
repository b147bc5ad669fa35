//! Versioned artifact store
//!
//! Every stage reads its inputs from, and publishes its outputs to, an
//! [`ArtifactStore`]. Artifacts are addressed as `name:qualifier` where the
//! qualifier is `latest`, an explicit version (`v3`) or an alias (`prod`).
//! Publishing the same name again creates a new version unless the content
//! is identical to the current latest version.

#[cfg(feature = "sqlite")]
pub mod local;

#[cfg(feature = "sqlite")]
pub use local::LocalArtifactStore;

use crate::data::{DataError, Dataset};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Alias that always tracks the newest version and cannot be assigned
pub const LATEST: &str = "latest";

/// Errors raised by artifact stores
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact '{0}' not found")]
    NotFound(String),

    #[error("invalid artifact reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "sqlite")]
    #[error("artifact registry error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("artifact '{name}' is corrupt: {reason}")]
    Corrupt { name: String, reason: String },
}

/// Version selector of a reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Qualifier {
    Latest,
    Version(u32),
    Alias(String),
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::Latest => f.write_str(LATEST),
            Qualifier::Version(v) => write!(f, "v{}", v),
            Qualifier::Alias(alias) => f.write_str(alias),
        }
    }
}

/// A `name:qualifier` reference to an artifact version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub qualifier: Qualifier,
}

impl ArtifactRef {
    /// Parse `name`, `name:latest`, `name:v3` or `name:alias`.
    ///
    /// The name may itself contain dots (`clean_sample.csv`); only the last
    /// `:` separates the qualifier.
    pub fn parse(reference: &str) -> Result<Self, ArtifactError> {
        let invalid = |reason: &str| ArtifactError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = reference.trim();
        let (name, qualifier) = match trimmed.rsplit_once(':') {
            Some((name, qualifier)) => (name, Some(qualifier)),
            None => (trimmed, None),
        };

        if name.is_empty() {
            return Err(invalid("empty name"));
        }
        if name.contains(':') {
            return Err(invalid("name contains ':'"));
        }

        let qualifier = match qualifier {
            None => Qualifier::Latest,
            Some("") => return Err(invalid("empty qualifier")),
            Some(LATEST) => Qualifier::Latest,
            Some(q) => match parse_version(q) {
                Some(version) => Qualifier::Version(version),
                None => Qualifier::Alias(q.to_string()),
            },
        };

        Ok(Self {
            name: name.to_string(),
            qualifier,
        })
    }

    pub fn latest(name: &str) -> Self {
        Self {
            name: name.to_string(),
            qualifier: Qualifier::Latest,
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.qualifier)
    }
}

fn parse_version(qualifier: &str) -> Option<u32> {
    qualifier.strip_prefix('v')?.parse().ok()
}

/// An artifact about to be published
#[derive(Debug, Clone)]
pub struct ArtifactDraft {
    pub name: String,
    pub artifact_type: String,
    pub description: String,
    pub payload: Vec<u8>,
}

impl ArtifactDraft {
    pub fn new(
        name: impl Into<String>,
        artifact_type: impl Into<String>,
        description: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            artifact_type: artifact_type.into(),
            description: description.into(),
            payload,
        }
    }

    /// Serialize a dataset as CSV
    pub fn from_dataset(
        name: impl Into<String>,
        artifact_type: impl Into<String>,
        description: impl Into<String>,
        dataset: &Dataset,
    ) -> Result<Self, DataError> {
        Ok(Self::new(name, artifact_type, description, dataset.to_csv_bytes()?))
    }

    pub fn digest(&self) -> String {
        digest(&self.payload)
    }
}

/// Metadata of a published version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub name: String,
    /// Starts at 1 and increases by one per distinct publish
    pub version: u32,
    pub artifact_type: String,
    pub description: String,
    /// Hex SHA-256 of the payload
    pub digest: String,
    pub size_bytes: u64,
    /// Aliases other than `latest` currently pointing here
    pub aliases: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Run that published this version
    pub run_id: Option<Uuid>,
}

impl ArtifactVersion {
    /// `name:vN`
    pub fn tag(&self) -> String {
        format!("{}:v{}", self.name, self.version)
    }
}

/// A materialized artifact
#[derive(Debug, Clone)]
pub struct Artifact {
    pub meta: ArtifactVersion,
    pub payload: Vec<u8>,
}

impl Artifact {
    /// Decode the payload as a CSV dataset
    pub fn dataset(&self) -> Result<Dataset, DataError> {
        Dataset::from_csv_bytes(&self.payload)
    }

    /// Write the payload to `dir`, named after the artifact
    pub fn write_into(&self, dir: &Path) -> Result<PathBuf, std::io::Error> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.meta.name);
        std::fs::write(&path, &self.payload)?;
        Ok(path)
    }
}

/// Hex SHA-256 of a payload
pub fn digest(payload: &[u8]) -> String {
    let hash = Sha256::digest(payload);
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Trait for artifact store backends
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Publish a new version, or return the latest one unchanged when its
    /// digest, type and description all match the draft. A reused version
    /// keeps the run id of the run that first published it.
    async fn publish(
        &self,
        draft: ArtifactDraft,
        run_id: Option<Uuid>,
    ) -> Result<ArtifactVersion, ArtifactError>;

    /// Resolve a reference to version metadata
    async fn resolve(&self, reference: &ArtifactRef) -> Result<ArtifactVersion, ArtifactError>;

    /// Resolve a reference and load its payload
    async fn fetch(&self, reference: &ArtifactRef) -> Result<Artifact, ArtifactError>;

    /// Point `alias` at the version `reference` resolves to, moving it off
    /// any other version of the same name
    async fn set_alias(
        &self,
        reference: &ArtifactRef,
        alias: &str,
    ) -> Result<ArtifactVersion, ArtifactError>;

    /// Every version, optionally for one name, ordered by name then version
    async fn list_versions(&self, name: Option<&str>) -> Result<Vec<ArtifactVersion>, ArtifactError>;

    /// Fetch a reference and write it into `dest_dir`, returning the local path
    async fn use_artifact(
        &self,
        reference: &ArtifactRef,
        dest_dir: &Path,
    ) -> Result<PathBuf, ArtifactError> {
        let artifact = self.fetch(reference).await?;
        Ok(artifact.write_into(dest_dir)?)
    }
}

pub(crate) fn check_alias(alias: &str) -> Result<(), ArtifactError> {
    let invalid = |reason: &str| ArtifactError::InvalidReference {
        reference: alias.to_string(),
        reason: reason.to_string(),
    };
    if alias.is_empty() || alias.contains(':') {
        return Err(invalid("aliases must be non-empty and contain no ':'"));
    }
    if alias == LATEST {
        return Err(invalid("'latest' is managed by the store"));
    }
    if parse_version(alias).is_some() {
        return Err(invalid("aliases must not look like versions"));
    }
    Ok(())
}

/// In-memory artifact store (for testing or ephemeral use)
pub struct InMemoryArtifactStore {
    versions: RwLock<HashMap<String, Vec<Artifact>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self {
            versions: RwLock::new(HashMap::new()),
        }
    }

    fn find<'a>(
        versions: &'a HashMap<String, Vec<Artifact>>,
        reference: &ArtifactRef,
    ) -> Result<&'a Artifact, ArtifactError> {
        let not_found = || ArtifactError::NotFound(reference.to_string());
        let history = versions.get(&reference.name).ok_or_else(not_found)?;
        let found = match &reference.qualifier {
            Qualifier::Latest => history.last(),
            Qualifier::Version(v) => history.iter().find(|a| a.meta.version == *v),
            Qualifier::Alias(alias) => history.iter().find(|a| a.meta.aliases.contains(alias)),
        };
        found.ok_or_else(not_found)
    }
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn publish(
        &self,
        draft: ArtifactDraft,
        run_id: Option<Uuid>,
    ) -> Result<ArtifactVersion, ArtifactError> {
        let digest = draft.digest();
        let mut versions = self.versions.write().await;
        let history = versions.entry(draft.name.clone()).or_default();

        if let Some(latest) = history.last() {
            if latest.meta.digest == digest
                && latest.meta.artifact_type == draft.artifact_type
                && latest.meta.description == draft.description
            {
                tracing::debug!("{}:v{} unchanged, not republished", draft.name, latest.meta.version);
                return Ok(latest.meta.clone());
            }
        }

        let meta = ArtifactVersion {
            name: draft.name,
            version: history.last().map(|a| a.meta.version + 1).unwrap_or(1),
            artifact_type: draft.artifact_type,
            description: draft.description,
            digest,
            size_bytes: draft.payload.len() as u64,
            aliases: Vec::new(),
            created_at: Utc::now(),
            run_id,
        };
        history.push(Artifact {
            meta: meta.clone(),
            payload: draft.payload,
        });
        Ok(meta)
    }

    async fn resolve(&self, reference: &ArtifactRef) -> Result<ArtifactVersion, ArtifactError> {
        let versions = self.versions.read().await;
        Ok(Self::find(&versions, reference)?.meta.clone())
    }

    async fn fetch(&self, reference: &ArtifactRef) -> Result<Artifact, ArtifactError> {
        let versions = self.versions.read().await;
        Ok(Self::find(&versions, reference)?.clone())
    }

    async fn set_alias(
        &self,
        reference: &ArtifactRef,
        alias: &str,
    ) -> Result<ArtifactVersion, ArtifactError> {
        check_alias(alias)?;
        let mut versions = self.versions.write().await;
        let target = Self::find(&versions, reference)?.meta.version;

        let history = versions
            .get_mut(&reference.name)
            .ok_or_else(|| ArtifactError::NotFound(reference.to_string()))?;
        let mut updated = None;
        for artifact in history.iter_mut() {
            artifact.meta.aliases.retain(|a| a != alias);
            if artifact.meta.version == target {
                artifact.meta.aliases.push(alias.to_string());
                artifact.meta.aliases.sort();
                updated = Some(artifact.meta.clone());
            }
        }
        updated.ok_or_else(|| ArtifactError::NotFound(reference.to_string()))
    }

    async fn list_versions(&self, name: Option<&str>) -> Result<Vec<ArtifactVersion>, ArtifactError> {
        let versions = self.versions.read().await;
        let mut listed: Vec<ArtifactVersion> = versions
            .iter()
            .filter(|(key, _)| name.map_or(true, |n| n == key.as_str()))
            .flat_map(|(_, history)| history.iter().map(|a| a.meta.clone()))
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name).then(a.version.cmp(&b.version)));
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str, body: &str) -> ArtifactDraft {
        ArtifactDraft::new(name, "raw_data", "test", body.as_bytes().to_vec())
    }

    #[test]
    fn test_parse_references() {
        let r = ArtifactRef::parse("clean_sample.csv:latest").unwrap();
        assert_eq!(r.name, "clean_sample.csv");
        assert_eq!(r.qualifier, Qualifier::Latest);

        let r = ArtifactRef::parse("random_forest_export:prod").unwrap();
        assert_eq!(r.qualifier, Qualifier::Alias("prod".to_string()));

        let r = ArtifactRef::parse("raw_data.csv:v3").unwrap();
        assert_eq!(r.qualifier, Qualifier::Version(3));
        assert_eq!(r.to_string(), "raw_data.csv:v3");

        assert_eq!(ArtifactRef::parse("bare").unwrap().qualifier, Qualifier::Latest);
        assert!(ArtifactRef::parse(":latest").is_err());
        assert!(ArtifactRef::parse("name:").is_err());
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        assert_eq!(
            digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_publish_versions_and_dedup() {
        let store = InMemoryArtifactStore::new();
        let v1 = store.publish(draft("raw.csv", "a\n1\n"), None).await.unwrap();
        let again = store.publish(draft("raw.csv", "a\n1\n"), None).await.unwrap();
        let v2 = store.publish(draft("raw.csv", "a\n2\n"), None).await.unwrap();

        assert_eq!(v1.version, 1);
        assert_eq!(again.version, 1);
        assert_eq!(v2.version, 2);

        let latest = store.fetch(&ArtifactRef::latest("raw.csv")).await.unwrap();
        assert_eq!(latest.payload, b"a\n2\n");
        let first = store.fetch(&ArtifactRef::parse("raw.csv:v1").unwrap()).await.unwrap();
        assert_eq!(first.payload, b"a\n1\n");
    }

    #[tokio::test]
    async fn test_changed_metadata_is_a_new_version() {
        let store = InMemoryArtifactStore::new();
        let first_run = Uuid::new_v4();
        store.publish(draft("raw.csv", "a\n1\n"), Some(first_run)).await.unwrap();

        let retyped = ArtifactDraft::new("raw.csv", "clean_data", "test", b"a\n1\n".to_vec());
        let second_run = Uuid::new_v4();
        let v2 = store.publish(retyped, Some(second_run)).await.unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.artifact_type, "clean_data");
        assert_eq!(v2.run_id, Some(second_run));

        let redescribed = ArtifactDraft::new("raw.csv", "clean_data", "rerun", b"a\n1\n".to_vec());
        let v3 = store.publish(redescribed, None).await.unwrap();
        assert_eq!(v3.version, 3);
        assert_eq!(v3.description, "rerun");
    }

    #[tokio::test]
    async fn test_alias_moves_between_versions() {
        let store = InMemoryArtifactStore::new();
        store.publish(draft("model", "one"), None).await.unwrap();
        store.publish(draft("model", "two"), None).await.unwrap();

        store
            .set_alias(&ArtifactRef::parse("model:v1").unwrap(), "prod")
            .await
            .unwrap();
        let prod = ArtifactRef::parse("model:prod").unwrap();
        assert_eq!(store.resolve(&prod).await.unwrap().version, 1);

        store.set_alias(&ArtifactRef::latest("model"), "prod").await.unwrap();
        assert_eq!(store.resolve(&prod).await.unwrap().version, 2);

        let listed = store.list_versions(Some("model")).await.unwrap();
        assert!(listed[0].aliases.is_empty());
        assert_eq!(listed[1].aliases, vec!["prod"]);
    }

    #[tokio::test]
    async fn test_reserved_aliases_rejected() {
        let store = InMemoryArtifactStore::new();
        store.publish(draft("model", "one"), None).await.unwrap();
        let r = ArtifactRef::latest("model");
        assert!(store.set_alias(&r, "latest").await.is_err());
        assert!(store.set_alias(&r, "v2").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_reference_is_not_found() {
        let store = InMemoryArtifactStore::new();
        let err = store.fetch(&ArtifactRef::latest("nothing")).await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_use_artifact_writes_file() {
        let store = InMemoryArtifactStore::new();
        store.publish(draft("raw.csv", "a\n1\n"), None).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = store
            .use_artifact(&ArtifactRef::latest("raw.csv"), dir.path())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a\n1\n");
    }
}
