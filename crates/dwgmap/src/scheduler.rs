//! FIFO job scheduler with a fixed worker pool.
//!
//! Concurrency is capped by the number of worker threads; everything else
//! waits in submission order on the channel.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info};

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::error::SubmitError;
use crate::geoserver::GeoServerClient;
use crate::job::{JobRecord, JobStatus, JobStore};
use crate::pipeline::{CancelToken, PipelineContext, PipelineExecutor, ProgressHandle};
use crate::settings::Settings;
use crate::stages::{ConvertStage, PackageStage, PublishStage};

/// One accepted submission waiting for a worker.
pub struct QueuedJob {
    pub job_id: String,
    pub source_name: String,
    pub dwg_path: PathBuf,
    pub job_dir: PathBuf,
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The flag was set; the job stops at its next stage boundary (or
    /// immediately, if it was still queued).
    Accepted,
    /// The job already reached a terminal state; nothing to do.
    AlreadyTerminal,
    NotFound,
}

type CancelRegistry = Arc<Mutex<HashMap<String, CancelToken>>>;

pub struct JobScheduler {
    job_sender: Sender<QueuedJob>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    store: Arc<JobStore>,
    broadcaster: JobProgressBroadcaster,
    cancels: CancelRegistry,
}

impl JobScheduler {
    /// Starts `settings.worker_count` worker threads.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<JobStore>,
        broadcaster: JobProgressBroadcaster,
        geoserver: Arc<GeoServerClient>,
    ) -> Self {
        assert!(settings.worker_count > 0, "worker_count must be > 0");
        let (job_sender, job_receiver) = unbounded::<QueuedJob>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let cancels: CancelRegistry = Arc::new(Mutex::new(HashMap::new()));

        let mut workers = Vec::with_capacity(settings.worker_count);
        for worker_id in 0..settings.worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_settings = Arc::clone(&settings);
            let worker_store = Arc::clone(&store);
            let worker_broadcaster = broadcaster.clone();
            let worker_geoserver = Arc::clone(&geoserver);
            let worker_cancels = Arc::clone(&cancels);

            let handle = thread::spawn(move || {
                run_worker(
                    worker_id,
                    job_rx,
                    shutdown_flag,
                    worker_settings,
                    worker_store,
                    worker_broadcaster,
                    worker_geoserver,
                    worker_cancels,
                );
            });
            workers.push(handle);
        }

        info!("Started {} conversion workers", settings.worker_count);

        Self {
            job_sender,
            workers: Mutex::new(workers),
            shutdown,
            store,
            broadcaster,
            cancels,
        }
    }

    /// Creates the job record and enqueues the job. The record is visible to
    /// status polling before this returns.
    pub fn submit(&self, job: QueuedJob) -> Result<(), SubmitError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(SubmitError::Shutdown);
        }

        let record = JobRecord::new(&job.job_id, &job.source_name);
        self.broadcaster.send(JobProgressEvent::new(
            &record.id,
            record.status,
            record.progress,
            &record.message,
        ));
        self.store.insert(record);

        if let Ok(mut cancels) = self.cancels.lock() {
            cancels.insert(job.job_id.clone(), CancelToken::new());
        }

        self.job_sender.send(job).map_err(|_| SubmitError::Shutdown)
    }

    /// Requests cancellation of a job.
    ///
    /// A queued job is marked cancelled immediately; a running one stops at
    /// its next stage boundary with all completed-stage outputs kept.
    pub fn cancel(&self, job_id: &str) -> CancelOutcome {
        let Some(record) = self.store.get(job_id) else {
            return CancelOutcome::NotFound;
        };
        if record.is_terminal() {
            return CancelOutcome::AlreadyTerminal;
        }

        if let Ok(cancels) = self.cancels.lock() {
            if let Some(token) = cancels.get(job_id) {
                token.cancel();
            }
        }

        if record.status == JobStatus::Queued {
            // Not picked up yet; finalize here. The worker skips it on
            // dequeue because the record is terminal.
            if self.store.update(job_id, |r| r.cancel()) {
                if let Some(r) = self.store.get(job_id) {
                    self.broadcaster.send(JobProgressEvent::new(
                        &r.id, r.status, r.progress, &r.message,
                    ));
                }
            }
        } else {
            self.store
                .update(job_id, |r| r.push_message("Cancellation requested"));
        }
        debug!("Cancellation requested for job {}", job_id);
        CancelOutcome::Accepted
    }

    pub fn shutdown(&self) {
        info!("Shutting down scheduler...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Joins the worker threads. Call [`JobScheduler::shutdown`] first;
    /// workers notice the flag within their receive timeout.
    pub fn wait(&self) {
        let workers = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        info!("All workers have stopped");
    }
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<QueuedJob>,
    shutdown: Arc<AtomicBool>,
    settings: Arc<Settings>,
    store: Arc<JobStore>,
    broadcaster: JobProgressBroadcaster,
    geoserver: Arc<GeoServerClient>,
    cancels: CancelRegistry,
) {
    debug!("Worker {} started", worker_id);

    let executor = PipelineExecutor::new(vec![
        Box::new(ConvertStage::new(
            &settings.dwg2dxf_cmd,
            settings.timeouts.convert(),
        )),
        Box::new(PackageStage::new(
            &settings.ogr2ogr_cmd,
            &settings.source_srs,
            &settings.target_srs,
            settings.timeouts.package(),
        )),
        Box::new(PublishStage::new(geoserver)),
    ]);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(job) => {
                debug!("Worker {} picked up job {}", worker_id, job.job_id);

                let cancel = cancels
                    .lock()
                    .ok()
                    .and_then(|c| c.get(&job.job_id).cloned())
                    .unwrap_or_default();

                let handle = ProgressHandle::new(
                    Arc::clone(&store),
                    broadcaster.clone(),
                    &job.job_id,
                );
                let mut ctx = PipelineContext::new(
                    &job.job_id,
                    &job.source_name,
                    job.dwg_path,
                    job.job_dir,
                );
                executor.run(&mut ctx, &handle, &cancel);

                if let Ok(mut c) = cancels.lock() {
                    c.remove(&job.job_id);
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} exiting, channel closed", worker_id);
                break;
            }
        }
    }
}
