//! Captured subprocess output

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One captured line of subprocess output.
///
/// Records are append-only. Per-stream order matches the order lines
/// were produced; stdout and stderr interleave only by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub time: chrono::DateTime<chrono::Utc>,
    pub stream: OutputStream,
    pub line: String,
}

impl OutputRecord {
    pub fn now(job_id: Uuid, stream: OutputStream, line: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            time: chrono::Utc::now(),
            stream,
            line: line.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStream {
    Stdout,
    Stderr,
}
