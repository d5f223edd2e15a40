use axum::Json;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::error;

use super::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct DataBody {
    pub data: String,
}

/// Echo endpoint; answers GET and POST alike.
pub async fn hello(Json(body): Json<DataBody>) -> Json<Value> {
    Json(json!({ "data": format!("received data={}!", body.data) }))
}

/// Echo with a server-side check: anything but `hello` is a failure.
pub async fn get_info(Json(body): Json<DataBody>) -> Result<Json<Value>, ApiError> {
    if body.data != "hello" {
        error!("getInfo data is not hello");
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "data is not hello",
        ));
    }
    Ok(Json(json!({ "data": format!("received data={}!", body.data) })))
}
