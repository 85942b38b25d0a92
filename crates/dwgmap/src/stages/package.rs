//! Package stage: DXF to GeoPackage via GDAL's ogr2ogr, plus layer and
//! extent introspection of the produced container.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use crate::error::StageError;
use crate::job::{Bbox, LayerDescriptor, DEFAULT_LAYER_COLOR};
use crate::pipeline::{PipelineContext, ProgressSink, StageAdapter, StageKind};

use super::tool::run_tool;

/// Table name ogr2ogr gives the single DXF vector layer.
const ENTITIES_TABLE: &str = "entities";

pub struct PackageStage {
    ogr2ogr_cmd: String,
    source_srs: String,
    target_srs: String,
    timeout: Duration,
}

impl PackageStage {
    pub fn new(
        ogr2ogr_cmd: impl Into<String>,
        source_srs: impl Into<String>,
        target_srs: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            ogr2ogr_cmd: ogr2ogr_cmd.into(),
            source_srs: source_srs.into(),
            target_srs: target_srs.into(),
            timeout,
        }
    }

    fn args(&self, gpkg: &Path, dxf: &Path) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        // DXF driver tuning: keep block geometries separate entities, inline
        // block references, and carry attributes through.
        for (key, value) in [
            ("DXF_ENCODING", "UTF-8"),
            ("DXF_MERGE_BLOCK_GEOMETRIES", "FALSE"),
            ("DXF_INLINE_BLOCKS", "TRUE"),
            ("DXF_ATTRIBUTES", "TRUE"),
        ] {
            args.push("--config".to_string());
            args.push(key.to_string());
            args.push(value.to_string());
        }
        args.extend([
            "-f".to_string(),
            "GPKG".to_string(),
            gpkg.display().to_string(),
            dxf.display().to_string(),
            "-s_srs".to_string(),
            self.source_srs.clone(),
            "-t_srs".to_string(),
            self.target_srs.clone(),
            "-skipfailures".to_string(),
            "-lco".to_string(),
            "GEOMETRY_NAME=geom".to_string(),
        ]);
        args
    }
}

impl StageAdapter for PackageStage {
    fn kind(&self) -> StageKind {
        StageKind::Package
    }

    fn execute(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressSink,
    ) -> Result<(), StageError> {
        let dxf_path = ctx
            .dxf_path
            .clone()
            .ok_or_else(|| StageError::MissingOutput(ctx.job_dir.join("missing.dxf")))?;
        let stem = dxf_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "drawing".to_string());
        let gpkg_path = ctx.job_dir.join(format!("{stem}.gpkg"));

        run_tool(&self.ogr2ogr_cmd, &self.args(&gpkg_path, &dxf_path), self.timeout)?;

        if !gpkg_path.exists() {
            return Err(StageError::MissingOutput(gpkg_path));
        }

        progress.report(0.8, "Reading layer metadata");
        let conn = Connection::open(&gpkg_path)?;
        ctx.layers = read_layers(&conn)?;
        ctx.bbox = read_bbox(&conn)?;
        debug!(
            job_id = %ctx.job_id,
            layers = ctx.layers.len(),
            bbox = ?ctx.bbox,
            "GeoPackage introspected"
        );

        progress.report(1.0, "GeoPackage ready");
        ctx.gpkg_path = Some(gpkg_path);
        Ok(())
    }
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Distinct drawing layers with each layer's most frequent line color.
/// Layers without any color fall back to a neutral default.
pub(crate) fn read_layers(conn: &Connection) -> Result<Vec<LayerDescriptor>, rusqlite::Error> {
    if !table_exists(conn, ENTITIES_TABLE)? {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT e.\"Layer\", (
            SELECT e2.line_color FROM entities e2
            WHERE e2.\"Layer\" = e.\"Layer\" AND e2.line_color IS NOT NULL
            GROUP BY e2.line_color ORDER BY COUNT(*) DESC LIMIT 1
         )
         FROM entities e
         WHERE e.\"Layer\" IS NOT NULL
         GROUP BY e.\"Layer\"
         ORDER BY e.\"Layer\"",
    )?;
    let rows = stmt.query_map([], |row| {
        let name: String = row.get(0)?;
        let color: Option<String> = row.get(1)?;
        Ok(LayerDescriptor::new(
            name,
            color.unwrap_or_else(|| DEFAULT_LAYER_COLOR.to_string()),
        ))
    })?;
    rows.collect()
}

/// Extent of the entities layer as recorded by the GPKG driver. Absent or
/// partial extents yield `None`; geographic validation is a consumer concern.
pub(crate) fn read_bbox(conn: &Connection) -> Result<Option<Bbox>, rusqlite::Error> {
    if !table_exists(conn, "gpkg_contents")? {
        return Ok(None);
    }
    let result = conn.query_row(
        "SELECT min_x, min_y, max_x, max_y FROM gpkg_contents WHERE table_name = ?1",
        [ENTITIES_TABLE],
        |row| {
            let min_x: Option<f64> = row.get(0)?;
            let min_y: Option<f64> = row.get(1)?;
            let max_x: Option<f64> = row.get(2)?;
            let max_y: Option<f64> = row.get(3)?;
            Ok(match (min_x, min_y, max_x, max_y) {
                (Some(a), Some(b), Some(c), Some(d)) => Some(Bbox::new(a, b, c, d)),
                _ => None,
            })
        },
    );
    match result {
        Ok(bbox) => Ok(bbox),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}
