use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::db;
use crate::models::ApplicationRecord;

/// Where application records are read from.
pub enum RecordSource {
    /// A JSON array of records in the camelCase wire shape.
    File(PathBuf),
    Postgres(PgPool),
}

/// Cheap stamp that changes whenever the stored records do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreVersion {
    File {
        modified: SystemTime,
        len: u64,
    },
    Postgres {
        rows: i64,
        updated_at: Option<DateTime<Utc>>,
    },
}

impl RecordSource {
    pub async fn version(&self) -> anyhow::Result<StoreVersion> {
        match self {
            RecordSource::File(path) => {
                let metadata = tokio::fs::metadata(path)
                    .await
                    .with_context(|| format!("failed to stat {}", path.display()))?;
                Ok(StoreVersion::File {
                    modified: metadata.modified()?,
                    len: metadata.len(),
                })
            }
            RecordSource::Postgres(pool) => {
                let (rows, updated_at) = db::store_version(pool).await?;
                Ok(StoreVersion::Postgres { rows, updated_at })
            }
        }
    }

    pub async fn load(&self) -> anyhow::Result<Vec<ApplicationRecord>> {
        match self {
            RecordSource::File(path) => {
                let contents = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_str(&contents)
                    .with_context(|| format!("{} is not a JSON array of applications", path.display()))
            }
            RecordSource::Postgres(pool) => db::fetch_applications(pool).await,
        }
    }
}

/// The latest loaded records together with the version they were read at.
///
/// Records keep their identity until the store version changes, so an
/// unchanged store never forces a dashboard rebuild.
pub struct RecordSnapshot {
    source: RecordSource,
    version: Option<StoreVersion>,
    records: Arc<Vec<ApplicationRecord>>,
}

impl RecordSnapshot {
    pub fn new(source: RecordSource) -> Self {
        Self {
            source,
            version: None,
            records: Arc::new(Vec::new()),
        }
    }

    pub async fn load(source: RecordSource) -> anyhow::Result<Self> {
        let mut snapshot = Self::new(source);
        snapshot.refresh().await?;
        Ok(snapshot)
    }

    pub fn records(&self) -> &Arc<Vec<ApplicationRecord>> {
        &self.records
    }

    /// Reloads the records if the store changed. Returns whether it did.
    pub async fn refresh(&mut self) -> anyhow::Result<bool> {
        let version = self.source.version().await?;
        if self.version.as_ref() == Some(&version) {
            return Ok(false);
        }

        let records = self.source.load().await?;
        tracing::info!(count = records.len(), "loaded applications");
        self.records = Arc::new(records);
        self.version = Some(version);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ONE_RECORD: &str =
        r#"[{"id":"1","jobTitle":"SRE","company":"Acme","date":"2024-03-04","status":"applied"}]"#;
    const TWO_RECORDS: &str = r#"[
        {"id":"1","jobTitle":"SRE","company":"Acme","date":"2024-03-04","status":"applied"},
        {"id":"2","jobTitle":"DBA","company":"Globex","date":"oops","status":"offer",
         "statusHistory":[{"status":"interview","timestamp":"2024-03-08T10:00:00Z"}]}
    ]"#;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn unchanged_file_keeps_record_identity() {
        let file = write_file(ONE_RECORD);
        let mut snapshot = RecordSnapshot::load(RecordSource::File(file.path().to_path_buf()))
            .await
            .unwrap();
        let before = Arc::clone(snapshot.records());

        assert!(!snapshot.refresh().await.unwrap());
        assert!(Arc::ptr_eq(&before, snapshot.records()));
        assert_eq!(before.len(), 1);
    }

    #[tokio::test]
    async fn rewritten_file_is_reloaded() {
        let file = write_file(ONE_RECORD);
        let mut snapshot = RecordSnapshot::load(RecordSource::File(file.path().to_path_buf()))
            .await
            .unwrap();

        std::fs::write(file.path(), TWO_RECORDS).unwrap();
        assert!(snapshot.refresh().await.unwrap());

        let records = snapshot.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].status_history.as_ref().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn null_date_keeps_the_rest_of_the_collection() {
        let file = write_file(
            r#"[
            {"id":"1","jobTitle":"SRE","company":"Acme","date":"2024-03-04","status":"applied"},
            {"id":"2","jobTitle":"DBA","company":"Globex","date":null,"status":"offer"}
        ]"#,
        );
        let snapshot = RecordSnapshot::load(RecordSource::File(file.path().to_path_buf()))
            .await
            .unwrap();

        let records = snapshot.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].date, "");
        assert_eq!(records[1].stage(), Some(crate::models::Stage::Offer));
    }

    #[tokio::test]
    async fn invalid_json_is_reported() {
        let file = write_file("{\"not\": \"a list\"}");
        let result = RecordSnapshot::load(RecordSource::File(file.path().to_path_buf())).await;
        assert!(result.is_err());
    }
}
