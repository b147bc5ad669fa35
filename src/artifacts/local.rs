//! Filesystem-backed artifact store with a SQLite registry

use crate::artifacts::{
    check_alias, digest, Artifact, ArtifactDraft, ArtifactError, ArtifactRef, ArtifactStore,
    ArtifactVersion, Qualifier,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Content-addressed blobs under `root/blobs`, version metadata in
/// `root/registry.db`
pub struct LocalArtifactStore {
    root: PathBuf,
    pool: SqlitePool,
}

impl LocalArtifactStore {
    /// Open (or create) a store rooted at `root`
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self, ArtifactError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join("blobs")).await?;

        let options = SqliteConnectOptions::new()
            .filename(root.join("registry.db"))
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        let store = Self { root, pool };
        store.init().await?;
        Ok(store)
    }

    /// Store under the platform data directory
    pub async fn with_default_path() -> Result<Self, ArtifactError> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::open(data_dir.join("rental-pipeline").join("artifacts")).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn init(&self) -> Result<(), ArtifactError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artifact_versions (
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                artifact_type TEXT NOT NULL,
                description TEXT NOT NULL,
                digest TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                run_id TEXT,
                PRIMARY KEY (name, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artifact_aliases (
                name TEXT NOT NULL,
                alias TEXT NOT NULL,
                version INTEGER NOT NULL,
                PRIMARY KEY (name, alias)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        let prefix = digest.get(..2).unwrap_or("00");
        self.root.join("blobs").join(prefix).join(digest)
    }

    /// Write a blob once; a blob already on disk has the same content
    async fn write_blob(&self, digest: &str, payload: &[u8]) -> Result<(), ArtifactError> {
        let path = self.blob_path(digest);
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn aliases_for(&self, name: &str, version: u32) -> Result<Vec<String>, ArtifactError> {
        let rows = sqlx::query(
            "SELECT alias FROM artifact_aliases WHERE name = ?1 AND version = ?2 ORDER BY alias",
        )
        .bind(name)
        .bind(version as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|row| row.get("alias")).collect())
    }

    async fn version_from_row(&self, row: &SqliteRow) -> Result<ArtifactVersion, ArtifactError> {
        let name: String = row.get("name");
        let version = row.get::<i64, _>("version") as u32;
        let run_id = match row.get::<Option<String>, _>("run_id") {
            Some(raw) => Some(Uuid::parse_str(&raw).map_err(|e| ArtifactError::Corrupt {
                name: name.clone(),
                reason: e.to_string(),
            })?),
            None => None,
        };
        let aliases = self.aliases_for(&name, version).await?;

        Ok(ArtifactVersion {
            artifact_type: row.get("artifact_type"),
            description: row.get("description"),
            digest: row.get("digest"),
            size_bytes: row.get::<i64, _>("size_bytes") as u64,
            created_at: from_naive(row.get("created_at")),
            aliases,
            run_id,
            name,
            version,
        })
    }

    async fn resolve_version(&self, reference: &ArtifactRef) -> Result<u32, ArtifactError> {
        let row = match &reference.qualifier {
            Qualifier::Latest => {
                sqlx::query("SELECT MAX(version) AS version FROM artifact_versions WHERE name = ?1")
                    .bind(&reference.name)
                    .fetch_one(&self.pool)
                    .await?
            }
            Qualifier::Version(v) => {
                sqlx::query(
                    "SELECT version FROM artifact_versions WHERE name = ?1 AND version = ?2",
                )
                .bind(&reference.name)
                .bind(*v as i64)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| ArtifactError::NotFound(reference.to_string()))?
            }
            Qualifier::Alias(alias) => {
                sqlx::query("SELECT version FROM artifact_aliases WHERE name = ?1 AND alias = ?2")
                    .bind(&reference.name)
                    .bind(alias)
                    .fetch_optional(&self.pool)
                    .await?
                    .ok_or_else(|| ArtifactError::NotFound(reference.to_string()))?
            }
        };

        row.get::<Option<i64>, _>("version")
            .map(|v| v as u32)
            .ok_or_else(|| ArtifactError::NotFound(reference.to_string()))
    }

    async fn load_version(&self, name: &str, version: u32) -> Result<ArtifactVersion, ArtifactError> {
        let row = sqlx::query(
            r#"
            SELECT name, version, artifact_type, description, digest, size_bytes, created_at, run_id
            FROM artifact_versions
            WHERE name = ?1 AND version = ?2
            "#,
        )
        .bind(name)
        .bind(version as i64)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ArtifactError::NotFound(format!("{}:v{}", name, version)))?;

        self.version_from_row(&row).await
    }
}

fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(dt, Utc)
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn publish(
        &self,
        draft: ArtifactDraft,
        run_id: Option<Uuid>,
    ) -> Result<ArtifactVersion, ArtifactError> {
        let digest = draft.digest();
        self.write_blob(&digest, &draft.payload).await?;

        let mut tx = self.pool.begin().await?;

        let latest = sqlx::query(
            r#"
            SELECT version, digest, artifact_type, description FROM artifact_versions
            WHERE name = ?1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(&draft.name)
        .fetch_optional(&mut *tx)
        .await?;

        let next_version = match &latest {
            Some(row) => {
                let version = row.get::<i64, _>("version") as u32;
                let unchanged = row.get::<String, _>("digest") == digest
                    && row.get::<String, _>("artifact_type") == draft.artifact_type
                    && row.get::<String, _>("description") == draft.description;
                if unchanged {
                    tx.commit().await?;
                    tracing::debug!("{}:v{} unchanged, not republished", draft.name, version);
                    return self.load_version(&draft.name, version).await;
                }
                version + 1
            }
            None => 1,
        };

        sqlx::query(
            r#"
            INSERT INTO artifact_versions
            (name, version, artifact_type, description, digest, size_bytes, created_at, run_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&draft.name)
        .bind(next_version as i64)
        .bind(&draft.artifact_type)
        .bind(&draft.description)
        .bind(&digest)
        .bind(draft.payload.len() as i64)
        .bind(Utc::now().naive_utc())
        .bind(run_id.map(|id| id.to_string()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.load_version(&draft.name, next_version).await
    }

    async fn resolve(&self, reference: &ArtifactRef) -> Result<ArtifactVersion, ArtifactError> {
        let version = self.resolve_version(reference).await?;
        self.load_version(&reference.name, version).await
    }

    async fn fetch(&self, reference: &ArtifactRef) -> Result<Artifact, ArtifactError> {
        let meta = self.resolve(reference).await?;
        let payload = tokio::fs::read(self.blob_path(&meta.digest)).await?;
        if digest(&payload) != meta.digest {
            return Err(ArtifactError::Corrupt {
                name: meta.tag(),
                reason: "payload digest does not match registry".to_string(),
            });
        }
        Ok(Artifact { meta, payload })
    }

    async fn set_alias(
        &self,
        reference: &ArtifactRef,
        alias: &str,
    ) -> Result<ArtifactVersion, ArtifactError> {
        check_alias(alias)?;
        let version = self.resolve_version(reference).await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO artifact_aliases (name, alias, version)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(&reference.name)
        .bind(alias)
        .bind(version as i64)
        .execute(&self.pool)
        .await?;

        self.load_version(&reference.name, version).await
    }

    async fn list_versions(&self, name: Option<&str>) -> Result<Vec<ArtifactVersion>, ArtifactError> {
        let rows = match name {
            Some(name) => {
                sqlx::query(
                    r#"
                    SELECT name, version, artifact_type, description, digest, size_bytes, created_at, run_id
                    FROM artifact_versions
                    WHERE name = ?1
                    ORDER BY name ASC, version ASC
                    "#,
                )
                .bind(name)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT name, version, artifact_type, description, digest, size_bytes, created_at, run_id
                    FROM artifact_versions
                    ORDER BY name ASC, version ASC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut versions = Vec::with_capacity(rows.len());
        for row in &rows {
            versions.push(self.version_from_row(row).await?);
        }
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(body: &str) -> ArtifactDraft {
        ArtifactDraft::new("clean_sample.csv", "clean_data", "test", body.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_local_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path()).await.unwrap();
        let run_id = Uuid::new_v4();

        let v1 = store.publish(draft("price\n10\n"), Some(run_id)).await.unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v1.run_id, Some(run_id));

        let same = store.publish(draft("price\n10\n"), None).await.unwrap();
        assert_eq!(same.version, 1);

        let v2 = store.publish(draft("price\n20\n"), None).await.unwrap();
        assert_eq!(v2.version, 2);

        let fetched = store
            .fetch(&ArtifactRef::parse("clean_sample.csv:v1").unwrap())
            .await
            .unwrap();
        assert_eq!(fetched.payload, b"price\n10\n");
        assert_eq!(fetched.dataset().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_store_versions_changed_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path()).await.unwrap();

        store.publish(draft("price\n10\n"), None).await.unwrap();
        let run_id = Uuid::new_v4();
        let retyped =
            ArtifactDraft::new("clean_sample.csv", "reference_data", "test", b"price\n10\n".to_vec());
        let v2 = store.publish(retyped, Some(run_id)).await.unwrap();

        assert_eq!(v2.version, 2);
        assert_eq!(v2.artifact_type, "reference_data");
        assert_eq!(v2.run_id, Some(run_id));
    }

    #[tokio::test]
    async fn test_local_store_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalArtifactStore::open(dir.path()).await.unwrap();
            store.publish(draft("price\n10\n"), None).await.unwrap();
            store
                .set_alias(&ArtifactRef::latest("clean_sample.csv"), "reference")
                .await
                .unwrap();
        }

        let store = LocalArtifactStore::open(dir.path()).await.unwrap();
        let meta = store
            .resolve(&ArtifactRef::parse("clean_sample.csv:reference").unwrap())
            .await
            .unwrap();
        assert_eq!(meta.version, 1);
        assert_eq!(meta.aliases, vec!["reference"]);
    }

    #[tokio::test]
    async fn test_local_store_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path()).await.unwrap();
        let meta = store.publish(draft("price\n10\n"), None).await.unwrap();

        std::fs::write(store.blob_path(&meta.digest), b"tampered").unwrap();
        let err = store.fetch(&ArtifactRef::latest("clean_sample.csv")).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path()).await.unwrap();
        let err = store.resolve(&ArtifactRef::latest("missing")).await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(_)));
    }
}
