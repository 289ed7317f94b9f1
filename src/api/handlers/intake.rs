use axum::extract::Multipart;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;

use crate::api::error::AppError;
use crate::services::interaction::UploadedFile;

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(e.body_text())
    }
}

/// Reads the `file` field of a multipart form. Other fields are ignored.
pub async fn read_csv_upload(multipart: &mut Multipart) -> Result<UploadedFile, AppError> {
    let result: Result<UploadedFile, AppError> = async {
        let mut upload = None;

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            if field.name() != Some("file") {
                continue;
            }

            let filename = field.file_name().unwrap_or_default().to_string();
            let content = field.bytes().await.map_err(multipart_error)?;
            upload = Some(UploadedFile { filename, content });
        }

        upload.ok_or_else(|| AppError::BadRequest("No file provided".to_string()))
    }
    .await;

    if let Err(e) = &result {
        // Drain what is left so the browser sees our response, not a reset.
        tracing::warn!("Upload rejected early: {}. Consuming remaining stream...", e);
        while let Ok(Some(mut field)) = multipart.next_field().await {
            while let Ok(Some(_)) = field.chunk().await {}
        }
    }

    result
}
