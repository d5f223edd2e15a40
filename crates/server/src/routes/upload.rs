use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use dispatchd_core::files::{file_ext, upload_file_path};

use super::error::ApiError;
use crate::state::AppState;

/// Store a multipart upload (`data`, `message`, `files[]`) under a fresh
/// job-scoped directory, keeping only each file's extension.
pub async fn upload_files(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let job_id = Uuid::new_v4().to_string();
    let prefix = format!("uploadFiles[{job_id}]");

    let mut data = String::new();
    let mut message = String::new();
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return Err(ApiError::job(
                    &prefix,
                    &job_id,
                    StatusCode::UNPROCESSABLE_ENTITY,
                    format!("malformed multipart body: {err}"),
                ));
            }
        };
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("data") => {
                data = field
                    .text()
                    .await
                    .map_err(|err| ApiError::internal(&prefix, &job_id, err))?;
            }
            Some("message") => {
                message = field
                    .text()
                    .await
                    .map_err(|err| ApiError::internal(&prefix, &job_id, err))?;
            }
            Some("files") => {
                let file_name = field.file_name().unwrap_or("unknown.dat").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::internal(&prefix, &job_id, err))?;
                files.push((file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }
    debug!("{prefix} nFiles={}", files.len());

    let base_dir = PathBuf::from(&state.settings.out_dir)
        .join("uploads")
        .join(&job_id);
    tokio::fs::create_dir_all(&base_dir)
        .await
        .map_err(|err| ApiError::internal(&prefix, &job_id, err))?;

    let mut out_files = Vec::with_capacity(files.len());
    for (idx, (file_name, bytes)) in files.iter().enumerate() {
        let ext =
            file_ext(file_name).map_err(|err| ApiError::internal(&prefix, &job_id, err))?;
        let out_path = upload_file_path(&base_dir, idx + 1, ext);
        debug!("{prefix} fileSize={}", bytes.len());
        tokio::fs::write(&out_path, bytes)
            .await
            .map_err(|err| ApiError::internal(&prefix, &job_id, err))?;
        debug!("{prefix} fileWritten={}", out_path.display());
        out_files.push(json!([file_name, out_path.to_string_lossy()]));
    }

    Ok(Json(json!({
        "data": {
            "id": job_id,
            "result": {
                "data": data,
                "message": message,
                "nFiles": files.len(),
                "outFiles": out_files,
            },
        }
    })))
}
