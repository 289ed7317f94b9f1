//! Browser form: pick a file, preview it, upload it.

use axum::{
    Form,
    extract::{Multipart, State},
    response::Html,
};
use serde::Deserialize;
use uuid::Uuid;

use super::intake::read_csv_upload;
use crate::AppState;
use crate::api::error::PageError;
use crate::api::views;

#[derive(Debug, Deserialize)]
pub struct UploadForm {
    pub draft_id: Uuid,
}

pub async fn index() -> Html<String> {
    Html(views::index_page())
}

pub async fn preview(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Html<String>, PageError> {
    let file = read_csv_upload(&mut multipart).await?;
    let state = state.controller.select_file(file, None).await?;
    Ok(Html(views::state_page(&state)))
}

pub async fn upload(
    State(state): State<AppState>,
    Form(form): Form<UploadForm>,
) -> Result<Html<String>, PageError> {
    let state = state.controller.upload(form.draft_id).await?;
    Ok(Html(views::state_page(&state)))
}
