use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::stage::StageKind;

use super::bbox::Bbox;
use super::layers::LayerDescriptor;

/// Lifecycle state of one conversion job.
///
/// Transitions are forward-only; `done`, `error` and `cancelled` are
/// terminal and freeze the whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Converting,
    Packaging,
    Publishing,
    Done,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error | JobStatus::Cancelled)
    }

    /// The running status a job enters when the given stage starts.
    pub fn for_stage(stage: StageKind) -> Self {
        match stage {
            StageKind::Convert => JobStatus::Converting,
            StageKind::Package => JobStatus::Packaging,
            StageKind::Publish => JobStatus::Publishing,
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    /// No transition re-enters `queued` or revisits a completed stage.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match self {
            Queued => matches!(next, Converting | Cancelled),
            Converting => matches!(next, Packaging | Error | Cancelled),
            Packaging => matches!(next, Publishing | Error | Cancelled),
            Publishing => matches!(next, Done | Error | Cancelled),
            Done | Error | Cancelled => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Converting => "converting",
            JobStatus::Packaging => "packaging",
            JobStatus::Publishing => "publishing",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Reference produced by a successful Convert stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertOutput {
    pub dxf_path: String,
}

/// References produced by a successful Package stage. Layer descriptors are
/// the derived metadata computed once here and cached; they stay available
/// whatever the Publish outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageOutput {
    pub gpkg_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Bbox>,
    #[serde(default)]
    pub layers: Vec<LayerDescriptor>,
}

/// References produced by a successful Publish stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutput {
    pub layer_name: String,
    pub mvt_url: String,
    pub raster_url: String,
    pub wmts_url: String,
}

/// Per-stage output references. Each field is set at most once, on that
/// stage's successful completion, and never removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutputs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convert: Option<ConvertOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishOutput>,
}

/// Failing stage and reason; present only when `status = error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub stage: StageKind,
    pub message: String,
}

/// Authoritative state of one conversion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Opaque unique identifier, assigned at submission, sole lookup key.
    pub id: String,
    /// Original upload filename, informational only.
    pub source_name: String,
    pub status: JobStatus,
    /// 0–100, monotonically non-decreasing while the job is non-terminal.
    pub progress: u8,
    /// Latest human-readable status line.
    pub message: String,
    /// Append-only log; consecutive duplicates are coalesced.
    #[serde(default)]
    pub message_log: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outputs: StageOutputs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl JobRecord {
    pub fn new(id: impl Into<String>, source_name: impl Into<String>) -> Self {
        let mut record = Self {
            id: id.into(),
            source_name: source_name.into(),
            status: JobStatus::Queued,
            progress: 0,
            message: String::new(),
            message_log: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
            outputs: StageOutputs::default(),
            error: None,
        };
        record.push_message("Queued for conversion");
        record
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Sets the latest message, appending to the log unless it repeats the
    /// previous entry.
    pub fn push_message(&mut self, message: &str) {
        if self.message_log.last().map(String::as_str) == Some(message) {
            return;
        }
        self.message = message.to_string();
        self.message_log.push(message.to_string());
    }

    /// Raises progress to `value`, never lowering it.
    pub fn raise_progress(&mut self, value: u8) {
        let value = value.min(100);
        if value > self.progress {
            self.progress = value;
        }
    }

    /// Marks the job terminally failed at `stage`.
    pub fn fail(&mut self, stage: StageKind, message: String) {
        self.status = JobStatus::Error;
        self.push_message(&message);
        self.error = Some(JobError { stage, message });
        self.completed_at = Some(Utc::now());
    }

    /// Marks the job cancelled. Never reported as an error.
    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.push_message("Cancelled by user");
        self.completed_at = Some(Utc::now());
    }

    /// Marks the job successfully completed.
    pub fn finish(&mut self) {
        self.status = JobStatus::Done;
        self.raise_progress(100);
        self.push_message("Conversion and publish complete");
        self.completed_at = Some(Utc::now());
    }
}
