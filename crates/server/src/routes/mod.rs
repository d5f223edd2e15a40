//! HTTP surface of the dispatch server.

pub mod dispatch;
pub mod error;
pub mod simple;
pub mod upload;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::state::AppState;

/// Build the application router over the shared dispatch state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/hello", get(simple::hello).post(simple::hello))
        .route("/getInfo", post(simple::get_info))
        .route("/multiThread", post(dispatch::multi_thread))
        .route("/uploadFiles", post(upload::upload_files))
        .with_state(state)
}
