use certstore_core::{InventoryEntry, JobOutcome, JobStatus};
use serde::Serialize;

/// Numeric status codes the scheduler understands.
pub fn status_code(status: JobStatus) -> u8 {
    match status {
        JobStatus::Success => 2,
        JobStatus::Warning => 3,
        JobStatus::Failure => 4,
    }
}

/// Job result as reported back to the scheduler.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport<'a> {
    pub status_code: u8,
    pub message: &'a str,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub entries: &'a [InventoryEntry],
}

impl<'a> From<&'a JobOutcome> for CompletionReport<'a> {
    fn from(outcome: &'a JobOutcome) -> Self {
        Self {
            status_code: status_code(outcome.status),
            message: &outcome.message,
            entries: &outcome.entries,
        }
    }
}
