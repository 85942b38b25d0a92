use std::sync::Arc;

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::job::{JobStatus, JobStore};

use super::stage::StageKind;

/// Band-scoped progress reporting handed to a running stage.
///
/// `fraction` is the stage's own 0.0-1.0 completion estimate; mapping into
/// the job-wide percentage happens behind this trait.
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f64, message: &str);
}

/// No-op sink for unit tests.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _fraction: f64, _message: &str) {}
}

/// Per-job progress writer. Owns the band arithmetic and routes every update
/// through the store (which enforces monotonicity and message dedup) before
/// mirroring it to the broadcast channel.
pub struct ProgressHandle {
    store: Arc<JobStore>,
    broadcaster: JobProgressBroadcaster,
    job_id: String,
}

impl ProgressHandle {
    pub fn new(store: Arc<JobStore>, broadcaster: JobProgressBroadcaster, job_id: &str) -> Self {
        Self {
            store,
            broadcaster,
            job_id: job_id.to_string(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Moves the job into the given stage's running status, snapping progress
    /// to the stage's band start. Returns `false` when the record refused the
    /// transition (missing, terminal, or out-of-order), in which case the
    /// stage must not run.
    pub fn enter_stage(&self, stage: StageKind) -> bool {
        let next = JobStatus::for_stage(stage);
        let mut entered = false;
        let updated = self.store.update(&self.job_id, |record| {
            if !record.status.can_transition_to(next) {
                log::warn!(
                    "Job {}: refusing transition {} -> {}",
                    record.id,
                    record.status,
                    next
                );
                return;
            }
            record.status = next;
            record.raise_progress(stage.band().0);
            record.push_message(stage.start_message());
            entered = true;
        });
        if updated && entered {
            self.broadcast_current();
        }
        updated && entered
    }

    /// Returns a sink that maps stage-local fractions into this stage's band.
    pub fn stage_sink(&self, stage: StageKind) -> StageProgress<'_> {
        StageProgress {
            handle: self,
            stage,
        }
    }

    /// Applies a terminal or message-only mutation and mirrors the result.
    pub fn update<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut crate::job::JobRecord),
    {
        let updated = self.store.update(&self.job_id, mutate);
        if updated {
            self.broadcast_current();
        }
        updated
    }

    fn broadcast_current(&self) {
        if let Some(record) = self.store.get(&self.job_id) {
            self.broadcaster.send(JobProgressEvent::new(
                &record.id,
                record.status,
                record.progress,
                &record.message,
            ));
        }
    }
}

/// [`ProgressSink`] view of a [`ProgressHandle`] restricted to one stage band.
pub struct StageProgress<'a> {
    handle: &'a ProgressHandle,
    stage: StageKind,
}

impl ProgressSink for StageProgress<'_> {
    fn report(&self, fraction: f64, message: &str) {
        let (start, end) = self.stage.band();
        let width = (end - start) as f64;
        let value = start + (fraction.clamp(0.0, 1.0) * width).floor() as u8;
        self.handle.update(|record| {
            record.raise_progress(value);
            record.push_message(message);
        });
    }
}
