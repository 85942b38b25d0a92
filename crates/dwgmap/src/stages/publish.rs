//! Publish stage: registers the GeoPackage with GeoServer and records the
//! tile URL templates clients use to display the layer.

use std::sync::Arc;

use crate::error::StageError;
use crate::geoserver::GeoServerClient;
use crate::job::PublishOutput;
use crate::pipeline::{PipelineContext, ProgressSink, StageAdapter, StageKind};

pub struct PublishStage {
    client: Arc<GeoServerClient>,
}

impl PublishStage {
    pub fn new(client: Arc<GeoServerClient>) -> Self {
        Self { client }
    }

    pub fn store_name(job_id: &str) -> String {
        format!("dwg_{job_id}")
    }

    pub fn layer_name(job_id: &str) -> String {
        format!("layer_{job_id}")
    }
}

impl StageAdapter for PublishStage {
    fn kind(&self) -> StageKind {
        StageKind::Publish
    }

    fn execute(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressSink,
    ) -> Result<(), StageError> {
        let gpkg_path = ctx
            .gpkg_path
            .clone()
            .ok_or_else(|| StageError::MissingOutput(ctx.job_dir.join("missing.gpkg")))?;

        let store_name = Self::store_name(&ctx.job_id);
        let layer_name = Self::layer_name(&ctx.job_id);
        self.client
            .publish_gpkg(&gpkg_path, &store_name, &layer_name)?;

        progress.report(0.9, "Building tile URL templates");
        ctx.publish = Some(PublishOutput {
            mvt_url: self.client.mvt_url(&layer_name),
            raster_url: self.client.raster_url(&layer_name),
            wmts_url: self.client.wmts_capabilities_url(),
            layer_name,
        });
        progress.report(1.0, "Layer published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_layer_naming() {
        assert_eq!(PublishStage::store_name("abc123"), "dwg_abc123");
        assert_eq!(PublishStage::layer_name("abc123"), "layer_abc123");
    }
}
