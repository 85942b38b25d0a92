pub mod api;
pub mod broadcast;
pub mod error;
pub mod geoserver;
pub mod job;
pub mod pipeline;
pub mod scheduler;
pub mod settings;
pub mod stages;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use error::{DwgmapError, GeoServerError, Result, SettingsError, StageError, SubmitError};
pub use geoserver::GeoServerClient;
pub use job::{JobRecord, JobStatus, JobStore};
pub use pipeline::{PipelineContext, PipelineExecutor};
pub use scheduler::{CancelOutcome, JobScheduler, QueuedJob};
pub use settings::Settings;
