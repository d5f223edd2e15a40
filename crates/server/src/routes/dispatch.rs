use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use rand::Rng as _;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error};
use uuid::Uuid;

use dispatchd_engine::{CompletionWaiter, EnqueueError, Job, JobKind, least_busy_queue};

use super::error::ApiError;
use crate::state::AppState;

/// Deadline for a message job's result.
const MESSAGE_WAIT: Duration = Duration::from_secs(5);
/// Deadline for a pdf2image job's result; conversion is slow.
const PDF_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
pub struct DispatchBody {
    pub data: String,
    #[serde(rename = "jobType", default = "default_job_type")]
    pub job_type: String,
}

fn default_job_type() -> String {
    JobKind::Message.as_str().to_string()
}

/// Submit one job to a worker pool and wait synchronously for its result.
pub async fn multi_thread(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DispatchBody>,
) -> Result<Json<Value>, ApiError> {
    let job_id = Uuid::new_v4().to_string();
    let prefix = format!("multiThread[{job_id}]");

    // Infrastructure invariants were breached earlier; refuse all traffic.
    if !state.is_healthy() {
        return Err(ApiError::internal(
            &prefix,
            &job_id,
            "server unhealthy after invariant breach, refusing job",
        ));
    }

    let Some(kind) = JobKind::parse(&body.job_type) else {
        return Err(ApiError::job(
            &prefix,
            &job_id,
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("invalid job type={}", body.job_type),
        ));
    };

    let (waiter, wait) = match kind {
        JobKind::Message => {
            let random_no: u8 = rand::rng().random_range(1..=10);
            let suffix = &job_id[job_id.len() - 4..];
            let (job, waiter) = Job::message(
                job_id.clone(),
                random_no,
                format!("{}-{suffix}", body.data),
            );

            let queue = state.message_worker.queue();
            debug!("{prefix} putting job to queue, count={}...", queue.len());
            if queue.offer(job).is_err() {
                return Err(service_unavailable(&prefix, &job_id));
            }
            debug!("{prefix} job successfully submitted, count={}", queue.len());
            (waiter, MESSAGE_WAIT)
        }
        JobKind::Pdf2Image => {
            let (job, waiter) =
                Job::pdf2image(job_id.clone(), state.settings.pdf_sample_path.clone());

            let isolated = state
                .process_manager
                .as_ref()
                .filter(|_| state.settings.pdf_isolation);
            if let Some(manager) = isolated {
                match manager.enqueue(job) {
                    Ok(()) => {}
                    Err(EnqueueError::QueueFull(_)) => {
                        return Err(service_unavailable(&prefix, &job_id));
                    }
                    // Duplicate handle ids (or a manager already poisoned by
                    // one) break the reconciliation invariant: latch the
                    // server unhealthy so later requests are refused too.
                    Err(err) => {
                        state.mark_unhealthy();
                        return Err(ApiError::internal(&prefix, &job_id, err));
                    }
                }
            } else {
                let Some(queue) = least_busy_queue(&state.pdf_workers) else {
                    return Err(ApiError::internal(&prefix, &job_id, "no pdf workers running"));
                };
                debug!("{prefix} putting job to queue, count={}...", queue.len());
                if queue.offer(job).is_err() {
                    return Err(service_unavailable(&prefix, &job_id));
                }
                debug!("{prefix} job successfully submitted, count={}", queue.len());
            }
            (waiter, PDF_WAIT)
        }
    };

    await_result(&prefix, &job_id, waiter, wait).await
}

fn service_unavailable(prefix: &str, job_id: &str) -> ApiError {
    ApiError::job(
        prefix,
        job_id,
        StatusCode::SERVICE_UNAVAILABLE,
        "Service unavailable (job queue full)",
    )
}

async fn await_result(
    prefix: &str,
    job_id: &str,
    waiter: CompletionWaiter,
    wait: Duration,
) -> Result<Json<Value>, ApiError> {
    let result = match tokio::time::timeout(wait, waiter).await {
        // Deadline expired; the job keeps running and the worker will find
        // the handle abandoned.
        Err(_) => {
            return Err(ApiError::job(
                prefix,
                job_id,
                StatusCode::GATEWAY_TIMEOUT,
                "gateway timeout (async await)",
            ));
        }
        Ok(Err(_)) => {
            error!("{prefix} completion handle dropped without a result");
            return Err(ApiError::internal(prefix, job_id, "completion handle lost"));
        }
        Ok(Ok(result)) => result,
    };

    debug!(
        "{prefix} result worker={} err={:?} totalMs={}",
        result.worker_name, result.err_code, result.total_elapsed_ms
    );
    if result.is_err() {
        return Err(ApiError::job(
            prefix,
            job_id,
            StatusCode::INTERNAL_SERVER_ERROR,
            &result.err,
        ));
    }
    Ok(Json(json!({ "data": { "id": job_id, "result": result } })))
}
