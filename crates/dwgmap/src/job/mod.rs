//! Job records, status lifecycle and the in-memory store.

pub mod bbox;
pub mod layers;
pub mod record;
pub mod store;

pub use bbox::Bbox;
pub use layers::{normalize_layers, LayerDescriptor, LayerEntry, DEFAULT_LAYER_COLOR};
pub use record::{
    ConvertOutput, JobError, JobRecord, JobStatus, PackageOutput, PublishOutput, StageOutputs,
};
pub use store::JobStore;
