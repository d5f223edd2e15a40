//! Wire records crossing the driver/worker process boundary.
//!
//! Completion handles are not serialisable, so a job travelling to a worker
//! process carries its handle by identifier only; the driver keeps the real
//! handle in a registry and reconciles it when the matching result frame
//! comes back.

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobKind, JobPayload, JobResult};

/// Job record shipped to a worker process, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    /// Wall-clock construction time of the job (epoch milliseconds).
    pub create_epoch_ms: i64,
    /// Job id.
    pub id: String,
    /// Kind tag; always matches the payload variant.
    pub kind: JobKind,
    /// Payload of the job.
    pub payload: JobPayload,
    /// Identifier standing in for the completion handle (equals the job id).
    pub handle_id: String,
}

impl JobDescriptor {
    /// Descriptor for `job`, with the handle carried by id.
    pub fn from_job(job: &Job) -> Self {
        Self {
            create_epoch_ms: job.create_epoch_ms(),
            id: job.id().to_string(),
            kind: job.kind(),
            payload: job.payload().clone(),
            handle_id: job.id().to_string(),
        }
    }
}

/// Result record travelling back from a worker process, one JSON object per
/// line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultFrame {
    /// The handle id of the job this result belongs to.
    pub handle_id: String,
    /// The populated result.
    pub result: JobResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_uses_wire_field_names() {
        let (job, _waiter) = Job::pdf2image("abc-123".to_string(), "./x.pdf".to_string());
        let desc = JobDescriptor::from_job(&job);
        assert_eq!(desc.handle_id, "abc-123");

        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["kind"], "pdf2image");
        assert_eq!(json["handleId"], "abc-123");
        assert_eq!(json["payload"]["tag"], "pdf2image");
        assert_eq!(json["payload"]["pdfFilePath"], "./x.pdf");
        assert!(json["createEpochMs"].is_i64());
    }

    #[test]
    fn frames_round_trip() {
        let frame = ResultFrame {
            handle_id: "h1".to_string(),
            result: JobResult::empty("procWorker1"),
        };
        let line = serde_json::to_string(&frame).unwrap();
        let back: ResultFrame = serde_json::from_str(&line).unwrap();
        assert_eq!(back, frame);
    }
}
