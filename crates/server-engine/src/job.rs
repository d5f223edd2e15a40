//! Job and result records plus the one-shot completion rendezvous.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use dispatchd_core::clock::epoch_ms;

/// Discriminates the kinds of work the dispatch core accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    /// Simulated CPU-bound task carrying a text message.
    #[serde(rename = "message")]
    Message,
    /// PDF-to-image conversion of a file on disk.
    #[serde(rename = "pdf2image")]
    Pdf2Image,
}

impl JobKind {
    /// Parse the wire string (`"message"` / `"pdf2image"`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "message" => Some(Self::Message),
            "pdf2image" => Some(Self::Pdf2Image),
            _ => None,
        }
    }

    /// The wire string for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Pdf2Image => "pdf2image",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload variant of a job. The tag always matches the job's [`JobKind`];
/// [`Job`] constructors are the only way to pair them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag")]
pub enum JobPayload {
    /// Payload of a [`JobKind::Message`] job.
    #[serde(rename = "message")]
    Message {
        /// Draw in `1..=10`; `>= 8` selects the long simulated load.
        #[serde(rename = "randomNo")]
        random_no: u8,
        /// Free-form text attached by the submitter.
        message: String,
    },
    /// Payload of a [`JobKind::Pdf2Image`] job.
    #[serde(rename = "pdf2image")]
    Pdf2Image {
        /// Path of the PDF file to convert.
        #[serde(rename = "pdfFilePath")]
        pdf_file_path: String,
    },
}

/// Outcome of a processed job. An empty `err_code` means success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    /// Error code; empty on success.
    pub err_code: String,
    /// Human-readable error message.
    pub err: String,
    /// Name of the worker that executed the job.
    pub worker_name: String,
    /// Free-form result payload.
    pub data: String,
    /// Milliseconds the job sat on the queue before pickup.
    pub dequeue_elapsed_ms: i64,
    /// Milliseconds spent executing the job body.
    pub process_elapsed_ms: i64,
    /// Milliseconds from job construction to completion.
    pub total_elapsed_ms: i64,
}

impl JobResult {
    /// A zeroed result attributed to `worker_name`, to be filled in as the
    /// job progresses.
    pub fn empty(worker_name: &str) -> Self {
        Self {
            err_code: String::new(),
            err: String::new(),
            worker_name: worker_name.to_string(),
            data: String::new(),
            dequeue_elapsed_ms: 0,
            process_elapsed_ms: 0,
            total_elapsed_ms: 0,
        }
    }

    /// Whether this result records a failure.
    pub fn is_err(&self) -> bool {
        !self.err_code.is_empty()
    }
}

/// Producer half of the completion rendezvous. Fulfilment is exactly-once by
/// construction: [`Completion::fulfill`] consumes the handle.
#[derive(Debug)]
pub struct Completion(oneshot::Sender<JobResult>);

/// Consumer half, awaited by the submitting request handler (usually under a
/// deadline).
pub type CompletionWaiter = oneshot::Receiver<JobResult>;

/// A fresh, unfulfilled completion pair.
pub fn completion() -> (Completion, CompletionWaiter) {
    let (tx, rx) = oneshot::channel();
    (Completion(tx), rx)
}

impl Completion {
    /// True when the consumer stopped waiting (deadline expiry or drop).
    /// Producers use this to skip the rendezvous safely.
    pub fn is_abandoned(&self) -> bool {
        self.0.is_closed()
    }

    /// Fulfil the handle. Returns the result back when the consumer is gone.
    pub fn fulfill(self, result: JobResult) -> Result<(), JobResult> {
        self.0.send(result)
    }
}

/// A unit of work travelling through a queue. Immutable once enqueued; the
/// queue owns it in transit and the executing worker borrows it until the
/// completion handle is fulfilled.
#[derive(Debug)]
pub struct Job {
    id: String,
    create_epoch_ms: i64,
    kind: JobKind,
    payload: JobPayload,
    completion: Completion,
}

impl Job {
    /// Build a message job and the waiter for its result.
    pub fn message(id: String, random_no: u8, message: String) -> (Self, CompletionWaiter) {
        let (completion, waiter) = completion();
        let job = Self {
            id,
            create_epoch_ms: epoch_ms(),
            kind: JobKind::Message,
            payload: JobPayload::Message { random_no, message },
            completion,
        };
        (job, waiter)
    }

    /// Build a pdf2image job and the waiter for its result.
    pub fn pdf2image(id: String, pdf_file_path: String) -> (Self, CompletionWaiter) {
        let (completion, waiter) = completion();
        let job = Self {
            id,
            create_epoch_ms: epoch_ms(),
            kind: JobKind::Pdf2Image,
            payload: JobPayload::Pdf2Image { pdf_file_path },
            completion,
        };
        (job, waiter)
    }

    /// Globally unique job id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wall-clock construction time (epoch milliseconds).
    pub fn create_epoch_ms(&self) -> i64 {
        self.create_epoch_ms
    }

    /// The job's kind tag.
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// The payload matching [`Job::kind`].
    pub fn payload(&self) -> &JobPayload {
        &self.payload
    }

    /// Whether the submitter already gave up on this job.
    pub fn is_abandoned(&self) -> bool {
        self.completion.is_abandoned()
    }

    /// Fulfil the job's completion handle with `result`. Returns the result
    /// back when the consumer already timed out.
    pub fn complete(self, result: JobResult) -> Result<(), JobResult> {
        self.completion.fulfill(result)
    }

    /// Strip the completion handle, e.g. before shipping the job fields
    /// across a process boundary where the handle cannot follow.
    pub(crate) fn into_completion(self) -> Completion {
        self.completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_wire_strings() {
        assert_eq!(JobKind::parse("message"), Some(JobKind::Message));
        assert_eq!(JobKind::parse("pdf2image"), Some(JobKind::Pdf2Image));
        assert_eq!(JobKind::parse("bogus"), None);
        assert_eq!(JobKind::Pdf2Image.as_str(), "pdf2image");
    }

    #[test]
    fn result_serialises_with_wire_field_names() {
        let mut result = JobResult::empty("messageWorker");
        result.data = "done".to_string();
        result.total_elapsed_ms = 42;
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["errCode"], "");
        assert_eq!(json["workerName"], "messageWorker");
        assert_eq!(json["totalElapsedMs"], 42);
        assert_eq!(json["dequeueElapsedMs"], 0);
    }

    #[test]
    fn payload_tag_matches_kind() {
        let (job, _waiter) = Job::pdf2image("j1".to_string(), "./a.pdf".to_string());
        assert_eq!(job.kind(), JobKind::Pdf2Image);
        assert!(matches!(job.payload(), JobPayload::Pdf2Image { .. }));
    }

    #[test]
    fn completion_is_exactly_once_and_observes_abandonment() {
        let (handle, waiter) = completion();
        assert!(!handle.is_abandoned());
        drop(waiter);
        assert!(handle.is_abandoned());
        assert!(handle.fulfill(JobResult::empty("w")).is_err());
    }

    #[tokio::test]
    async fn completion_delivers_result() {
        let (job, waiter) = Job::message("j2".to_string(), 3, "hi".to_string());
        let mut result = JobResult::empty("w");
        result.data = "ok".to_string();
        job.complete(result).unwrap();
        let got = waiter.await.unwrap();
        assert_eq!(got.data, "ok");
    }
}
