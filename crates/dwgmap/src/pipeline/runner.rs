use tracing::{info_span, warn};

use crate::job::{ConvertOutput, PackageOutput};

use super::context::PipelineContext;
use super::progress::ProgressHandle;
use super::stage::{CancelToken, StageAdapter, StageKind};

/// Drives the stages of one job in order, recording outputs and the terminal
/// state in the job store through the progress handle.
pub struct PipelineExecutor {
    stages: Vec<Box<dyn StageAdapter>>,
}

impl PipelineExecutor {
    pub fn new(stages: Vec<Box<dyn StageAdapter>>) -> Self {
        Self { stages }
    }

    /// Runs the pipeline to a terminal state. Cancellation is honored at
    /// stage boundaries; a failing stage ends the job with its stage and
    /// message recorded. Outputs of completed stages survive later failures.
    pub fn run(&self, ctx: &mut PipelineContext, handle: &ProgressHandle, cancel: &CancelToken) {
        let _pipeline_span = info_span!("pipeline",
            job_id = %ctx.job_id,
            source = %ctx.source_name,
        )
        .entered();

        for stage in &self.stages {
            let kind = stage.kind();

            if cancel.is_cancelled() {
                handle.update(|record| record.cancel());
                return;
            }

            if !handle.enter_stage(kind) {
                // Record vanished or went terminal (queued-cancel race).
                warn!(job_id = %ctx.job_id, stage = %kind, "Stage entry refused, stopping");
                return;
            }

            let _step = info_span!("stage", name = %kind).entered();
            let sink = handle.stage_sink(kind);
            // A panicking stage must not take the worker thread down; it is
            // folded into the record like any other stage failure.
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                stage.execute(ctx, &sink)
            }));
            match result {
                Ok(Ok(())) => self.record_outputs(kind, ctx, handle),
                Ok(Err(e)) => {
                    let message = format!("{} stage failed: {}", kind, e);
                    warn!(job_id = %ctx.job_id, stage = %kind, error = %e, "Stage failed");
                    handle.update(|record| record.fail(kind, message));
                    return;
                }
                Err(_) => {
                    let message = format!("{} stage failed: internal error", kind);
                    warn!(job_id = %ctx.job_id, stage = %kind, "Stage panicked");
                    handle.update(|record| record.fail(kind, message));
                    return;
                }
            }
        }

        handle.update(|record| record.finish());
    }

    /// Copies a completed stage's products from the context into the record.
    /// Each output slot is written once and never cleared.
    fn record_outputs(&self, kind: StageKind, ctx: &PipelineContext, handle: &ProgressHandle) {
        handle.update(|record| match kind {
            StageKind::Convert => {
                if record.outputs.convert.is_none() {
                    if let Some(dxf) = &ctx.dxf_path {
                        record.outputs.convert = Some(ConvertOutput {
                            dxf_path: dxf.display().to_string(),
                        });
                    }
                }
            }
            StageKind::Package => {
                if record.outputs.package.is_none() {
                    if let Some(gpkg) = &ctx.gpkg_path {
                        record.outputs.package = Some(PackageOutput {
                            gpkg_path: gpkg.display().to_string(),
                            bbox: ctx.bbox,
                            layers: ctx.layers.clone(),
                        });
                    }
                }
            }
            StageKind::Publish => {
                if record.outputs.publish.is_none() {
                    record.outputs.publish = ctx.publish.clone();
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::broadcast::JobProgressBroadcaster;
    use crate::error::StageError;
    use crate::job::{JobRecord, JobStatus, JobStore, LayerDescriptor, PublishOutput};
    use crate::pipeline::progress::ProgressSink;

    /// Scripted stage for executor tests.
    struct FakeStage {
        kind: StageKind,
        fail_with: Option<String>,
        calls: Arc<AtomicUsize>,
    }

    impl FakeStage {
        fn ok(kind: StageKind, calls: Arc<AtomicUsize>) -> Box<dyn StageAdapter> {
            Box::new(Self {
                kind,
                fail_with: None,
                calls,
            })
        }

        fn failing(
            kind: StageKind,
            detail: &str,
            calls: Arc<AtomicUsize>,
        ) -> Box<dyn StageAdapter> {
            Box::new(Self {
                kind,
                fail_with: Some(detail.to_string()),
                calls,
            })
        }
    }

    impl StageAdapter for FakeStage {
        fn kind(&self) -> StageKind {
            self.kind
        }

        fn execute(
            &self,
            ctx: &mut PipelineContext,
            progress: &dyn ProgressSink,
        ) -> Result<(), StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            progress.report(0.5, "working");
            if let Some(detail) = &self.fail_with {
                return Err(StageError::ToolFailed {
                    tool: self.kind.as_str().to_string(),
                    detail: detail.clone(),
                });
            }
            match self.kind {
                StageKind::Convert => ctx.dxf_path = Some(ctx.job_dir.join("plan.dxf")),
                StageKind::Package => {
                    ctx.gpkg_path = Some(ctx.job_dir.join("plan.gpkg"));
                    ctx.layers = vec![LayerDescriptor::new("WALLS", "#FF0000")];
                }
                StageKind::Publish => {
                    ctx.publish = Some(PublishOutput {
                        layer_name: "layer_j1".to_string(),
                        mvt_url: "http://example/mvt".to_string(),
                        raster_url: "http://example/wms".to_string(),
                        wmts_url: "http://example/wmts".to_string(),
                    });
                }
            }
            Ok(())
        }
    }

    fn setup(job_id: &str) -> (Arc<JobStore>, ProgressHandle, PipelineContext) {
        let store = Arc::new(JobStore::new(10));
        store.insert(JobRecord::new(job_id, "plan.dwg"));
        let handle = ProgressHandle::new(store.clone(), JobProgressBroadcaster::new(8), job_id);
        let ctx = PipelineContext::new(
            job_id,
            "plan.dwg",
            PathBuf::from("/tmp/plan.dwg"),
            PathBuf::from("/tmp/job"),
        );
        (store, handle, ctx)
    }

    fn counted(kinds: &[StageKind], calls: &Arc<AtomicUsize>) -> Vec<Box<dyn StageAdapter>> {
        kinds
            .iter()
            .map(|k| FakeStage::ok(*k, calls.clone()))
            .collect()
    }

    #[test]
    fn test_happy_path_runs_all_stages_to_done() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = PipelineExecutor::new(counted(&StageKind::ALL, &calls));
        let (store, handle, mut ctx) = setup("j1");

        executor.run(&mut ctx, &handle, &CancelToken::new());

        let record = store.get("j1").unwrap();
        assert_eq!(record.status, JobStatus::Done);
        assert_eq!(record.progress, 100);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(record.outputs.convert.is_some());
        assert!(record.outputs.package.is_some());
        assert_eq!(record.outputs.publish.as_ref().unwrap().layer_name, "layer_j1");
        assert_eq!(record.message, "Conversion and publish complete");
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn test_convert_failure_stops_pipeline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = PipelineExecutor::new(vec![
            FakeStage::failing(StageKind::Convert, "corrupt header", calls.clone()),
            FakeStage::ok(StageKind::Package, calls.clone()),
            FakeStage::ok(StageKind::Publish, calls.clone()),
        ]);
        let (store, handle, mut ctx) = setup("j1");

        executor.run(&mut ctx, &handle, &CancelToken::new());

        let record = store.get("j1").unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = record.error.as_ref().unwrap();
        assert_eq!(err.stage, StageKind::Convert);
        assert!(err.message.contains("corrupt header"));
        assert!(record.outputs.convert.is_none());
    }

    #[test]
    fn test_publish_failure_keeps_package_outputs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = PipelineExecutor::new(vec![
            FakeStage::ok(StageKind::Convert, calls.clone()),
            FakeStage::ok(StageKind::Package, calls.clone()),
            FakeStage::failing(StageKind::Publish, "geoserver unreachable", calls.clone()),
        ]);
        let (store, handle, mut ctx) = setup("j1");

        executor.run(&mut ctx, &handle, &CancelToken::new());

        let record = store.get("j1").unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.error.as_ref().unwrap().stage, StageKind::Publish);
        // Partial success: the packaged container and its layers stay usable.
        let package = record.outputs.package.as_ref().unwrap();
        assert!(package.gpkg_path.ends_with("plan.gpkg"));
        assert_eq!(package.layers.len(), 1);
        assert!(record.outputs.publish.is_none());
    }

    #[test]
    fn test_cancel_before_first_stage() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = PipelineExecutor::new(counted(&StageKind::ALL, &calls));
        let (store, handle, mut ctx) = setup("j1");

        let cancel = CancelToken::new();
        cancel.cancel();
        executor.run(&mut ctx, &handle, &cancel);

        let record = store.get("j1").unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
        assert_eq!(record.message, "Cancelled by user");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_between_stages() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancelToken::new();

        /// Cancels the shared token while "running", simulating a cancel
        /// request arriving mid-stage.
        struct CancellingStage {
            inner: FakeStage,
            cancel: CancelToken,
        }

        impl StageAdapter for CancellingStage {
            fn kind(&self) -> StageKind {
                self.inner.kind
            }

            fn execute(
                &self,
                ctx: &mut PipelineContext,
                progress: &dyn ProgressSink,
            ) -> Result<(), StageError> {
                self.cancel.cancel();
                self.inner.execute(ctx, progress)
            }
        }

        let executor = PipelineExecutor::new(vec![
            Box::new(CancellingStage {
                inner: FakeStage {
                    kind: StageKind::Convert,
                    fail_with: None,
                    calls: calls.clone(),
                },
                cancel: cancel.clone(),
            }),
            FakeStage::ok(StageKind::Package, calls.clone()),
            FakeStage::ok(StageKind::Publish, calls.clone()),
        ]);
        let (store, handle, mut ctx) = setup("j1");

        executor.run(&mut ctx, &handle, &cancel);

        let record = store.get("j1").unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
        // Convert ran to completion and its output was kept.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(record.outputs.convert.is_some());
        assert!(record.outputs.package.is_none());
    }

    #[test]
    fn test_panicking_stage_becomes_job_error() {
        struct PanickingStage;

        impl StageAdapter for PanickingStage {
            fn kind(&self) -> StageKind {
                StageKind::Convert
            }

            fn execute(
                &self,
                _ctx: &mut PipelineContext,
                _progress: &dyn ProgressSink,
            ) -> Result<(), StageError> {
                panic!("boom");
            }
        }

        let executor = PipelineExecutor::new(vec![Box::new(PanickingStage)]);
        let (store, handle, mut ctx) = setup("j1");
        executor.run(&mut ctx, &handle, &CancelToken::new());

        let record = store.get("j1").unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.error.as_ref().unwrap().stage, StageKind::Convert);
    }

    #[test]
    fn test_refused_entry_stops_without_running_stage() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = PipelineExecutor::new(counted(&StageKind::ALL, &calls));
        let (store, handle, mut ctx) = setup("j1");

        // Cancelled while still queued; the worker must skip it.
        store.update("j1", |r| r.cancel());
        executor.run(&mut ctx, &handle, &CancelToken::new());

        assert_eq!(store.get("j1").unwrap().status, JobStatus::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
