use std::path::PathBuf;

use anyhow::Context;

use crate::services::scratch::ScratchFile;
use crate::services::stage::{PutOptions, StageListing, StageLocation};
use crate::services::table::Table;
use crate::services::warehouse::{WarehouseError, WarehouseSession};

/// Result of one upload attempt. Failures inside the routine end up here
/// instead of being returned as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Transferred, and the verification listing shows the object.
    Verified { filename: String },
    /// Transferred, but the verification listing did not show the object.
    NotListed { filename: String },
    /// A step failed; `message` is meant for the user.
    Failed { filename: String, message: String },
}

impl UploadOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }

    pub fn filename(&self) -> &str {
        match self {
            Self::Verified { filename }
            | Self::NotListed { filename }
            | Self::Failed { filename, .. } => filename,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Failed { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Writes a table to a scratch file, PUTs it to the stage and checks the
/// stage listing for it.
#[derive(Debug, Clone, Default)]
pub struct UploadService {
    stage: StageLocation,
    scratch_root: Option<PathBuf>,
}

impl UploadService {
    pub fn new(stage: StageLocation, scratch_root: Option<PathBuf>) -> Self {
        Self {
            stage,
            scratch_root,
        }
    }

    pub fn stage(&self) -> &StageLocation {
        &self.stage
    }

    pub async fn upload(
        &self,
        session: &dyn WarehouseSession,
        filename: &str,
        table: &Table,
    ) -> UploadOutcome {
        let filename_owned = filename.to_string();
        match self.try_upload(session, filename, table).await {
            Ok(true) => {
                tracing::info!("✅ {} verified on {}", filename, self.stage.as_str());
                UploadOutcome::Verified {
                    filename: filename_owned,
                }
            }
            Ok(false) => {
                tracing::warn!(
                    "{} was transferred but is not listed on {}",
                    filename,
                    self.stage.as_str()
                );
                UploadOutcome::NotListed {
                    filename: filename_owned,
                }
            }
            Err(e) => {
                tracing::error!("❌ Upload of {} failed: {:#}", filename, e);
                UploadOutcome::Failed {
                    filename: filename_owned,
                    message: format!("Upload error: {:#}", e),
                }
            }
        }
    }

    async fn try_upload(
        &self,
        session: &dyn WarehouseSession,
        filename: &str,
        table: &Table,
    ) -> anyhow::Result<bool> {
        let scratch = ScratchFile::write(self.scratch_root.as_deref(), filename, table).await?;

        let transfer = session
            .put(scratch.path(), &self.stage, PutOptions::REPLACE_UNCOMPRESSED)
            .await
            .context("transfer to stage failed")?;
        tracing::info!("📤 {} -> {}", transfer.source, transfer.target);

        let rows = session
            .query(&self.stage.list_matching_sql(filename))
            .await
            .context("stage verification failed")?;

        Ok(StageListing::from_rows(rows).contains_file(filename))
    }

    pub async fn list_stage(
        &self,
        session: &dyn WarehouseSession,
    ) -> Result<StageListing, WarehouseError> {
        let rows = session.query(&self.stage.list_sql()).await?;
        Ok(StageListing::from_rows(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarehouseCredentials;
    use crate::services::memory_warehouse::InMemoryWarehouse;
    use crate::services::warehouse::{Row, TransferResult, WarehouseConnector};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    fn credentials() -> WarehouseCredentials {
        WarehouseCredentials {
            account: "local".to_string(),
            user: "tester".to_string(),
            password: "pw".to_string(),
            warehouse: "WH".to_string(),
            database: "DB".to_string(),
            schema: None,
        }
    }

    fn sales() -> Table {
        Table::from_csv_bytes(b"id,amount\n1,10\n2,20\n3,30\n4,40\n5,50\n").unwrap()
    }

    fn assert_no_scratch_left(root: &Path) {
        assert_eq!(std::fs::read_dir(root).unwrap().count(), 0);
    }

    /// Fails every transfer; records whether the scratch file existed at the time.
    struct FailingTransfer {
        saw_file: Mutex<bool>,
    }

    #[async_trait]
    impl WarehouseSession for FailingTransfer {
        async fn put(
            &self,
            local_path: &Path,
            _stage: &StageLocation,
            _options: PutOptions,
        ) -> Result<TransferResult, WarehouseError> {
            *self.saw_file.lock().unwrap() = local_path.exists();
            Err(WarehouseError::Transfer("network unreachable".to_string()))
        }

        async fn query(&self, _sql: &str) -> Result<Vec<Row>, WarehouseError> {
            panic!("listing must not run after a failed transfer");
        }

        async fn close(&mut self) -> Result<(), WarehouseError> {
            Ok(())
        }
    }

    /// Accepts transfers without storing them; listings come from `inner`.
    struct DiscardingTransfer {
        inner: Box<dyn WarehouseSession>,
    }

    #[async_trait]
    impl WarehouseSession for DiscardingTransfer {
        async fn put(
            &self,
            local_path: &Path,
            stage: &StageLocation,
            _options: PutOptions,
        ) -> Result<TransferResult, WarehouseError> {
            Ok(TransferResult {
                source: local_path.display().to_string(),
                target: stage.as_str().to_string(),
            })
        }

        async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
            self.inner.query(sql).await
        }

        async fn close(&mut self) -> Result<(), WarehouseError> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_upload_verifies_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let warehouse = InMemoryWarehouse::new();
        let session = warehouse.connect(&credentials()).await.unwrap();
        let service = UploadService::new(StageLocation::default(), Some(root.path().into()));

        let outcome = service.upload(session.as_ref(), "sales.csv", &sales()).await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.filename(), "sales.csv");
        assert_eq!(
            warehouse.object_bytes(service.stage(), "sales.csv").unwrap(),
            sales().to_csv_bytes().unwrap()
        );
        assert_no_scratch_left(root.path());
    }

    #[tokio::test]
    async fn test_second_upload_overwrites() {
        let root = tempfile::tempdir().unwrap();
        let warehouse = InMemoryWarehouse::new();
        let session = warehouse.connect(&credentials()).await.unwrap();
        let service = UploadService::new(StageLocation::default(), Some(root.path().into()));

        assert!(service.upload(session.as_ref(), "sales.csv", &sales()).await.succeeded());
        assert!(service.upload(session.as_ref(), "sales.csv", &sales()).await.succeeded());

        let listing = service.list_stage(session.as_ref()).await.unwrap();
        assert_eq!(listing.names(), vec!["my_files/sales.csv"]);
        assert_no_scratch_left(root.path());
    }

    #[tokio::test]
    async fn test_transfer_failure_returns_false_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let session = FailingTransfer {
            saw_file: Mutex::new(false),
        };
        let service = UploadService::new(StageLocation::default(), Some(root.path().into()));

        let outcome = service.upload(&session, "sales.csv", &sales()).await;

        assert!(!outcome.succeeded());
        let message = outcome.error_message().unwrap();
        assert!(message.starts_with("Upload error:"));
        assert!(message.contains("network unreachable"));
        assert!(*session.saw_file.lock().unwrap());
        assert_no_scratch_left(root.path());
    }

    #[tokio::test]
    async fn test_missing_object_is_not_confirmed_by_similar_names() {
        let root = tempfile::tempdir().unwrap();
        let warehouse = InMemoryWarehouse::new();
        let seed = warehouse.connect(&credentials()).await.unwrap();
        let service = UploadService::new(StageLocation::default(), Some(root.path().into()));
        assert!(service.upload(seed.as_ref(), "aab.csv", &sales()).await.succeeded());
        assert!(service.upload(seed.as_ref(), "olda+b.csv", &sales()).await.succeeded());

        let session = DiscardingTransfer {
            inner: warehouse.connect(&credentials()).await.unwrap(),
        };
        let outcome = service.upload(&session, "a+b.csv", &sales()).await;

        assert_eq!(
            outcome,
            UploadOutcome::NotListed {
                filename: "a+b.csv".to_string()
            }
        );
        assert!(!outcome.succeeded());
        assert!(outcome.error_message().is_none());
        assert_no_scratch_left(root.path());
    }

    #[tokio::test]
    async fn test_unwritable_scratch_root_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("does-not-exist");
        let warehouse = InMemoryWarehouse::new();
        let session = warehouse.connect(&credentials()).await.unwrap();
        let service = UploadService::new(StageLocation::default(), Some(missing.clone()));

        let outcome = service.upload(session.as_ref(), "sales.csv", &sales()).await;

        assert!(!outcome.succeeded());
        assert!(outcome.error_message().unwrap().contains("scratch directory"));
        assert!(!missing.exists());
        assert!(warehouse.object_names(service.stage()).is_empty());
    }
}
