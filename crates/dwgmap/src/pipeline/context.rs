use std::path::PathBuf;

use crate::job::{Bbox, LayerDescriptor, PublishOutput};

/// Mutable state threaded through the stages of one job.
pub struct PipelineContext {
    // Input
    pub job_id: String,
    pub source_name: String,
    /// Uploaded drawing, stored under the per-job directory.
    pub dwg_path: PathBuf,
    /// Per-job scratch directory; all products land here.
    pub job_dir: PathBuf,

    // Convert result — guaranteed Some after the convert stage
    pub dxf_path: Option<PathBuf>,

    // Package results — guaranteed Some after the package stage
    pub gpkg_path: Option<PathBuf>,
    pub bbox: Option<Bbox>,
    pub layers: Vec<LayerDescriptor>,

    // Publish result
    pub publish: Option<PublishOutput>,
}

impl PipelineContext {
    pub fn new(
        job_id: impl Into<String>,
        source_name: impl Into<String>,
        dwg_path: PathBuf,
        job_dir: PathBuf,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            source_name: source_name.into(),
            dwg_path,
            job_dir,
            dxf_path: None,
            gpkg_path: None,
            bbox: None,
            layers: Vec::new(),
            publish: None,
        }
    }
}
