//! Stage-driven conversion pipeline.

pub mod context;
pub mod progress;
pub mod runner;
pub mod stage;

pub use context::PipelineContext;
pub use progress::{NoopProgress, ProgressHandle, ProgressSink};
pub use runner::PipelineExecutor;
pub use stage::{CancelToken, StageAdapter, StageKind};
