use axum::{
    Json,
    extract::{Multipart, Query, State},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::intake::read_csv_upload;
use crate::AppState;
use crate::api::error::AppError;
use crate::services::interaction::InteractionState;
use crate::services::stage::{StageListing, StageObject};

#[derive(Debug, Deserialize, Validate)]
pub struct PreviewQuery {
    #[validate(range(min = 1, max = 100, message = "rows must be between 1 and 100"))]
    pub rows: Option<usize>,
}

#[derive(Serialize, ToSchema)]
pub struct PreviewResponse {
    pub draft_id: Uuid,
    pub filename: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub total_rows: usize,
}

#[derive(Serialize, ToSchema)]
pub struct StageFileResponse {
    pub name: String,
    pub size: Option<u64>,
    pub md5: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    pub filename: String,
    pub uploaded: bool,
    pub message: String,
    pub error: Option<String>,
    pub stage_files: Vec<StageFileResponse>,
}

#[derive(Serialize, ToSchema)]
pub struct StageListingResponse {
    pub stage: String,
    pub files: Vec<StageFileResponse>,
}

impl From<StageObject> for StageFileResponse {
    fn from(object: StageObject) -> Self {
        Self {
            name: object.name,
            size: object.size,
            md5: object.md5,
            last_modified: object.last_modified,
        }
    }
}

fn stage_files(listing: StageListing) -> Vec<StageFileResponse> {
    listing.objects.into_iter().map(Into::into).collect()
}

#[utoipa::path(
    post,
    path = "/api/preview",
    request_body(content = Multipart, description = "CSV file in the `file` field"),
    params(
        ("rows" = Option<usize>, Query, description = "Rows to preview (1-100, default 3)")
    ),
    responses(
        (status = 200, description = "File parsed", body = PreviewResponse),
        (status = 400, description = "Invalid file or filename"),
        (status = 413, description = "File too large"),
        (status = 422, description = "File is not valid CSV"),
        (status = 502, description = "Warehouse session could not be opened")
    ),
    tag = "uploads"
)]
pub async fn preview_csv(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
    mut multipart: Multipart,
) -> Result<Json<PreviewResponse>, AppError> {
    query
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let file = read_csv_upload(&mut multipart).await?;
    match state.controller.select_file(file, query.rows).await? {
        InteractionState::Previewed {
            draft_id,
            filename,
            preview,
        } => Ok(Json(PreviewResponse {
            draft_id,
            filename,
            columns: preview.columns,
            rows: preview.rows,
            total_rows: preview.total_rows,
        })),
        other => Err(AppError::Internal(format!(
            "preview ended in state '{}'",
            other.name()
        ))),
    }
}

#[utoipa::path(
    post,
    path = "/api/upload",
    request_body(content = Multipart, description = "CSV file in the `file` field"),
    responses(
        (status = 200, description = "Upload attempted; see `uploaded`", body = UploadResponse),
        (status = 400, description = "Invalid file or filename"),
        (status = 413, description = "File too large"),
        (status = 422, description = "File is not valid CSV"),
        (status = 500, description = "Warehouse settings missing"),
        (status = 502, description = "Warehouse session or listing failed")
    ),
    tag = "uploads"
)]
pub async fn upload_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let file = read_csv_upload(&mut multipart).await?;

    let response = match state.controller.upload_file(file).await? {
        InteractionState::Done {
            filename,
            stage_files: listing,
        } => UploadResponse {
            message: format!("Uploaded as: {}", filename),
            filename,
            uploaded: true,
            error: None,
            stage_files: stage_files(listing),
        },
        InteractionState::Failed { filename, error } => UploadResponse {
            filename,
            uploaded: false,
            message: "Upload failed".to_string(),
            error,
            stage_files: Vec::new(),
        },
        other => {
            return Err(AppError::Internal(format!(
                "upload ended in state '{}'",
                other.name()
            )));
        }
    };

    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/api/stage",
    responses(
        (status = 200, description = "Files currently in the stage", body = StageListingResponse),
        (status = 500, description = "Warehouse settings missing"),
        (status = 502, description = "Warehouse session or listing failed")
    ),
    tag = "uploads"
)]
pub async fn list_stage(
    State(state): State<AppState>,
) -> Result<Json<StageListingResponse>, AppError> {
    let listing = state.controller.stage_listing().await?;

    Ok(Json(StageListingResponse {
        stage: state.controller.stage().as_str().to_string(),
        files: stage_files(listing),
    }))
}
