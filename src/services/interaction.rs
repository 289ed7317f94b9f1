//! The select → preview → upload flow of the form.
//!
//! Every browser interaction is one request. What the form remembers between
//! the preview and the upload request is a [`Draft`]: the parsed table, kept
//! under a random id until it expires.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::error::AppError;
use crate::config::AppConfig;
use crate::services::session::SessionProvisioner;
use crate::services::stage::{StageListing, StageLocation};
use crate::services::table::{Table, TablePreview};
use crate::services::upload_service::UploadService;
use crate::utils::validation::validate_upload;

/// A file as received from the browser.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content: Bytes,
}

#[derive(Debug, Clone)]
pub struct Draft {
    pub filename: String,
    pub table: Arc<Table>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionState {
    Idle,
    FileSelected {
        filename: String,
    },
    Previewed {
        draft_id: Uuid,
        filename: String,
        preview: TablePreview,
    },
    Uploading {
        draft_id: Uuid,
        filename: String,
    },
    Done {
        filename: String,
        stage_files: StageListing,
    },
    Failed {
        filename: String,
        error: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionEvent {
    SelectFile { filename: String },
    Parsed { draft_id: Uuid, preview: TablePreview },
    RequestUpload,
    Uploaded { stage_files: StageListing },
    UploadFailed { error: Option<String> },
}

#[derive(Debug, Error)]
#[error("cannot apply '{event}' in state '{state}'")]
pub struct TransitionError {
    pub state: &'static str,
    pub event: &'static str,
}

impl InteractionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::FileSelected { .. } => "file_selected",
            Self::Previewed { .. } => "previewed",
            Self::Uploading { .. } => "uploading",
            Self::Done { .. } => "done",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn apply(self, event: InteractionEvent) -> Result<Self, TransitionError> {
        use InteractionEvent as E;
        use InteractionState as S;

        match (self, event) {
            (
                S::Idle | S::Previewed { .. } | S::Done { .. } | S::Failed { .. },
                E::SelectFile { filename },
            ) => Ok(S::FileSelected { filename }),
            (S::FileSelected { filename }, E::Parsed { draft_id, preview }) => Ok(S::Previewed {
                draft_id,
                filename,
                preview,
            }),
            (S::Previewed { draft_id, filename, .. }, E::RequestUpload) => {
                Ok(S::Uploading { draft_id, filename })
            }
            (S::Uploading { filename, .. }, E::Uploaded { stage_files }) => Ok(S::Done {
                filename,
                stage_files,
            }),
            (S::Uploading { filename, .. }, E::UploadFailed { error }) => {
                Ok(S::Failed { filename, error })
            }
            (state, event) => Err(TransitionError {
                state: state.name(),
                event: event.name(),
            }),
        }
    }
}

impl InteractionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SelectFile { .. } => "select_file",
            Self::Parsed { .. } => "parsed",
            Self::RequestUpload => "request_upload",
            Self::Uploaded { .. } => "uploaded",
            Self::UploadFailed { .. } => "upload_failed",
        }
    }
}

/// Sequences session provisioning, intake and the upload routine.
pub struct InteractionController {
    provisioner: SessionProvisioner,
    uploader: UploadService,
    drafts: DashMap<Uuid, Draft>,
    preview_rows: usize,
    max_file_size: usize,
    draft_ttl: Duration,
    max_drafts: usize,
    // One interaction at a time.
    turn: Mutex<()>,
}

impl InteractionController {
    pub fn new(provisioner: SessionProvisioner, uploader: UploadService, config: &AppConfig) -> Self {
        Self {
            provisioner,
            uploader,
            drafts: DashMap::new(),
            preview_rows: config.preview_rows,
            max_file_size: config.max_file_size,
            draft_ttl: i64::try_from(config.draft_ttl_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
            max_drafts: config.max_drafts.max(1),
            turn: Mutex::new(()),
        }
    }

    pub fn provisioner(&self) -> &SessionProvisioner {
        &self.provisioner
    }

    pub fn preview_rows(&self) -> usize {
        self.preview_rows
    }

    pub fn stage(&self) -> &StageLocation {
        self.uploader.stage()
    }

    /// Validates and parses a selected file and keeps it as a draft.
    ///
    /// Ends in [`InteractionState::Previewed`] showing `rows` rows (the
    /// configured preview size when `None`).
    pub async fn select_file(
        &self,
        file: UploadedFile,
        rows: Option<usize>,
    ) -> Result<InteractionState, AppError> {
        validate_upload(&file.filename, &file.content, self.max_file_size)?;

        let _turn = self.turn.lock().await;
        let state = InteractionState::Idle.apply(InteractionEvent::SelectFile {
            filename: file.filename.clone(),
        })?;
        tracing::info!("📄 {} selected ({} bytes)", file.filename, file.content.len());

        let handle = self.provisioner.open().await?;
        let parsed = parse_table(file.content).await;
        handle.close().await;
        let table = parsed?;

        let preview = table.head(rows.unwrap_or(self.preview_rows));
        self.sweep_expired();
        self.evict_oldest(self.max_drafts - 1);
        let draft_id = Uuid::new_v4();
        self.drafts.insert(
            draft_id,
            Draft {
                filename: file.filename,
                table: Arc::new(table),
                created_at: Utc::now(),
            },
        );

        Ok(state.apply(InteractionEvent::Parsed { draft_id, preview })?)
    }

    /// Uploads a previewed draft and, on success, lists the stage.
    ///
    /// Ends in [`InteractionState::Done`] or [`InteractionState::Failed`].
    /// Session and listing errors are returned instead.
    pub async fn upload(&self, draft_id: Uuid) -> Result<InteractionState, AppError> {
        let _turn = self.turn.lock().await;
        let draft = self.draft(draft_id)?;

        let state = InteractionState::Previewed {
            draft_id,
            filename: draft.filename.clone(),
            preview: draft.table.head(self.preview_rows),
        }
        .apply(InteractionEvent::RequestUpload)?;
        tracing::info!("⏫ Uploading {} to {}", draft.filename, self.uploader.stage().as_str());

        let handle = self.provisioner.open().await?;
        let outcome = self
            .uploader
            .upload(handle.session(), &draft.filename, &draft.table)
            .await;
        let listing = if outcome.succeeded() {
            Some(self.uploader.list_stage(handle.session()).await)
        } else {
            None
        };
        handle.close().await;

        let event = match (outcome, listing) {
            (_, Some(listing)) => InteractionEvent::Uploaded {
                stage_files: listing?,
            },
            (outcome, None) => InteractionEvent::UploadFailed {
                error: outcome.error_message().map(str::to_string),
            },
        };
        Ok(state.apply(event)?)
    }

    /// Selects and uploads in one step, without keeping a draft.
    pub async fn upload_file(&self, file: UploadedFile) -> Result<InteractionState, AppError> {
        let previewed = self.select_file(file, None).await?;
        let InteractionState::Previewed { draft_id, .. } = previewed else {
            return Err(AppError::Internal(format!(
                "selection ended in state '{}'",
                previewed.name()
            )));
        };

        let result = self.upload(draft_id).await;
        self.drafts.remove(&draft_id);
        result
    }

    /// Current stage contents, in a session of its own.
    pub async fn stage_listing(&self) -> Result<StageListing, AppError> {
        let _turn = self.turn.lock().await;
        let handle = self.provisioner.open().await?;
        let listing = self.uploader.list_stage(handle.session()).await;
        handle.close().await;
        Ok(listing?)
    }

    pub fn draft(&self, draft_id: Uuid) -> Result<Draft, AppError> {
        let draft = self
            .drafts
            .get(&draft_id)
            .map(|d| d.value().clone())
            .ok_or_else(|| AppError::NotFound("Unknown preview, select the file again".to_string()))?;

        if self.is_expired(&draft, Utc::now()) {
            self.drafts.remove(&draft_id);
            return Err(AppError::NotFound(
                "Preview expired, select the file again".to_string(),
            ));
        }
        Ok(draft)
    }

    pub fn draft_count(&self) -> usize {
        self.drafts.len()
    }

    fn is_expired(&self, draft: &Draft, now: DateTime<Utc>) -> bool {
        now - draft.created_at > self.draft_ttl
    }

    fn sweep_expired(&self) {
        let now = Utc::now();
        let before = self.drafts.len();
        self.drafts.retain(|_, draft| now - draft.created_at <= self.draft_ttl);
        let swept = before.saturating_sub(self.drafts.len());
        if swept > 0 {
            tracing::debug!("Swept {} expired drafts", swept);
        }
    }

    fn evict_oldest(&self, keep: usize) {
        while self.drafts.len() > keep {
            let oldest = self
                .drafts
                .iter()
                .min_by_key(|entry| entry.value().created_at)
                .map(|entry| *entry.key());
            let Some(draft_id) = oldest else {
                break;
            };
            self.drafts.remove(&draft_id);
            tracing::debug!("Evicted draft {} to stay within {} drafts", draft_id, self.max_drafts);
        }
    }
}

async fn parse_table(content: Bytes) -> Result<Table, AppError> {
    tokio::task::spawn_blocking(move || Table::from_csv_bytes(&content))
        .await
        .map_err(|e| AppError::Internal(format!("CSV parser task failed: {}", e)))?
        .map_err(AppError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{WarehouseConfig, WarehouseCredentials};
    use crate::services::memory_warehouse::InMemoryWarehouse;
    use crate::services::stage::{PutOptions, StageLocation};
    use crate::services::warehouse::{
        Row, TransferResult, WarehouseConnector, WarehouseError, WarehouseSession,
    };

    fn warehouse_config() -> WarehouseConfig {
        WarehouseConfig {
            account: Some("acct".to_string()),
            user: Some("user".to_string()),
            password: Some("pw".to_string()),
            warehouse: Some("WH".to_string()),
            database: Some("DB".to_string()),
            schema: Some("PUBLIC".to_string()),
        }
    }

    fn controller(
        warehouse: &InMemoryWarehouse,
        config: WarehouseConfig,
        scratch: &std::path::Path,
    ) -> InteractionController {
        let provisioner = SessionProvisioner::new(Arc::new(warehouse.clone()), config);
        let uploader = UploadService::new(StageLocation::default(), Some(scratch.to_path_buf()));
        InteractionController::new(provisioner, uploader, &AppConfig::development())
    }

    fn sales_file() -> UploadedFile {
        UploadedFile {
            filename: "sales.csv".to_string(),
            content: Bytes::from_static(b"id,amount\n1,10\n2,20\n3,30\n4,40\n5,50\n"),
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let preview = Table::from_csv_bytes(b"a\n1\n").unwrap().head(3);
        let draft_id = Uuid::new_v4();

        let state = InteractionState::Idle
            .apply(InteractionEvent::SelectFile {
                filename: "a.csv".to_string(),
            })
            .unwrap();
        assert_eq!(state.name(), "file_selected");

        let state = state
            .apply(InteractionEvent::Parsed { draft_id, preview })
            .unwrap();
        assert_eq!(state.name(), "previewed");

        let state = state.apply(InteractionEvent::RequestUpload).unwrap();
        assert_eq!(
            state,
            InteractionState::Uploading {
                draft_id,
                filename: "a.csv".to_string()
            }
        );

        let state = state
            .apply(InteractionEvent::UploadFailed { error: None })
            .unwrap();
        assert_eq!(state.name(), "failed");
    }

    #[test]
    fn test_invalid_transitions() {
        let err = InteractionState::Idle
            .apply(InteractionEvent::RequestUpload)
            .unwrap_err();
        assert_eq!(err.state, "idle");
        assert_eq!(err.event, "request_upload");

        assert!(
            InteractionState::FileSelected {
                filename: "a.csv".to_string()
            }
            .apply(InteractionEvent::RequestUpload)
            .is_err()
        );
    }

    #[tokio::test]
    async fn test_select_then_upload() {
        let scratch = tempfile::tempdir().unwrap();
        let warehouse = InMemoryWarehouse::new();
        let controller = controller(&warehouse, warehouse_config(), scratch.path());

        let state = controller.select_file(sales_file(), None).await.unwrap();
        let InteractionState::Previewed {
            draft_id, preview, ..
        } = state
        else {
            panic!("expected preview, got {:?}", state);
        };
        assert_eq!(preview.rows.len(), 3);
        assert_eq!(preview.total_rows, 5);

        let state = controller.upload(draft_id).await.unwrap();
        match state {
            InteractionState::Done {
                filename,
                stage_files,
            } => {
                assert_eq!(filename, "sales.csv");
                assert_eq!(stage_files.names(), vec!["my_files/sales.csv"]);
            }
            other => panic!("expected done, got {:?}", other),
        }

        // The draft survives so the same file can be uploaded again.
        assert!(controller.upload(draft_id).await.is_ok());
        assert_eq!(
            warehouse.object_names(&StageLocation::default()),
            vec!["my_files/sales.csv"]
        );
    }

    #[tokio::test]
    async fn test_missing_password_stops_before_preview() {
        let scratch = tempfile::tempdir().unwrap();
        let warehouse = InMemoryWarehouse::new();
        let controller = controller(
            &warehouse,
            WarehouseConfig {
                password: None,
                ..warehouse_config()
            },
            scratch.path(),
        );

        let err = controller.select_file(sales_file(), None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Warehouse(crate::services::warehouse::WarehouseError::MissingConfig(
                "SNOWFLAKE_PASSWORD"
            ))
        ));
        assert_eq!(controller.draft_count(), 0);
        assert!(warehouse.object_names(&StageLocation::default()).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_draft() {
        let scratch = tempfile::tempdir().unwrap();
        let warehouse = InMemoryWarehouse::new();
        let controller = controller(&warehouse, warehouse_config(), scratch.path());

        let err = controller.upload(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_expired_draft_is_rejected() {
        let scratch = tempfile::tempdir().unwrap();
        let warehouse = InMemoryWarehouse::new();
        let provisioner = SessionProvisioner::new(Arc::new(warehouse.clone()), warehouse_config());
        let config = AppConfig {
            draft_ttl_secs: 0,
            ..AppConfig::development()
        };
        let controller = InteractionController::new(
            provisioner,
            UploadService::new(StageLocation::default(), Some(scratch.path().to_path_buf())),
            &config,
        );

        let InteractionState::Previewed { draft_id, .. } =
            controller.select_file(sales_file(), None).await.unwrap()
        else {
            panic!("expected preview");
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let err = controller.upload(draft_id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(controller.draft_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_csv_is_unrecovered() {
        let scratch = tempfile::tempdir().unwrap();
        let warehouse = InMemoryWarehouse::new();
        let controller = controller(&warehouse, warehouse_config(), scratch.path());

        let err = controller
            .select_file(
                UploadedFile {
                    filename: "broken.csv".to_string(),
                    content: Bytes::from_static(b"a,b\n1,2,3\n"),
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidCsv(_)));
    }

    #[tokio::test]
    async fn test_one_step_upload_discards_draft() {
        let scratch = tempfile::tempdir().unwrap();
        let warehouse = InMemoryWarehouse::new();
        let controller = controller(&warehouse, warehouse_config(), scratch.path());

        let state = controller.upload_file(sales_file()).await.unwrap();
        assert_eq!(state.name(), "done");
        assert_eq!(controller.draft_count(), 0);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_drafts_are_capped_oldest_first() {
        let scratch = tempfile::tempdir().unwrap();
        let warehouse = InMemoryWarehouse::new();
        let provisioner = SessionProvisioner::new(Arc::new(warehouse.clone()), warehouse_config());
        let config = AppConfig {
            max_drafts: 2,
            ..AppConfig::development()
        };
        let controller = InteractionController::new(
            provisioner,
            UploadService::new(StageLocation::default(), Some(scratch.path().to_path_buf())),
            &config,
        );

        let mut ids = Vec::new();
        for _ in 0..5 {
            let InteractionState::Previewed { draft_id, .. } =
                controller.select_file(sales_file(), None).await.unwrap()
            else {
                panic!("expected preview");
            };
            ids.push(draft_id);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        assert_eq!(controller.draft_count(), 2);
        assert!(matches!(controller.draft(ids[0]), Err(AppError::NotFound(_))));
        assert!(controller.draft(ids[3]).is_ok());
        assert!(controller.draft(ids[4]).is_ok());
    }

    /// Counts closed sessions; every transfer hangs.
    #[derive(Default)]
    struct StalledConnector {
        closed: Arc<std::sync::atomic::AtomicUsize>,
    }

    struct StalledSession {
        closed: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl WarehouseConnector for StalledConnector {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn connect(
            &self,
            _credentials: &WarehouseCredentials,
        ) -> Result<Box<dyn WarehouseSession>, WarehouseError> {
            Ok(Box::new(StalledSession {
                closed: self.closed.clone(),
            }))
        }
    }

    #[async_trait::async_trait]
    impl WarehouseSession for StalledSession {
        async fn put(
            &self,
            _local_path: &std::path::Path,
            _stage: &StageLocation,
            _options: PutOptions,
        ) -> Result<TransferResult, WarehouseError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Err(WarehouseError::Transfer("timed out".to_string()))
        }

        async fn query(&self, _sql: &str) -> Result<Vec<Row>, WarehouseError> {
            Ok(Vec::new())
        }

        async fn close(&mut self) -> Result<(), WarehouseError> {
            self.closed
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancelled_upload_still_closes_session() {
        use std::sync::atomic::Ordering;

        let scratch = tempfile::tempdir().unwrap();
        let connector = Arc::new(StalledConnector::default());
        let closed = connector.closed.clone();
        let controller = InteractionController::new(
            SessionProvisioner::new(connector, warehouse_config()),
            UploadService::new(StageLocation::default(), Some(scratch.path().to_path_buf())),
            &AppConfig::development(),
        );

        let InteractionState::Previewed { draft_id, .. } =
            controller.select_file(sales_file(), None).await.unwrap()
        else {
            panic!("expected preview");
        };
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            controller.upload(draft_id),
        )
        .await;
        assert!(cancelled.is_err());

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while closed.load(Ordering::SeqCst) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("upload session was not closed after cancellation");
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);

        // The interaction lock was released with the cancelled future.
        assert!(controller.stage_listing().await.is_ok());
    }
}
