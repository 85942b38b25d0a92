use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::SettingsError;

/// Runtime configuration, read from `DWGMAP_`-prefixed environment variables
/// with defaults suitable for a local GeoServer setup.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Uploads and conversion products live under `<work_dir>/jobs/<job_id>/`.
    pub work_dir: PathBuf,
    /// LibreDWG dwg2dxf executable (PATH lookup or absolute).
    pub dwg2dxf_cmd: String,
    /// GDAL ogr2ogr executable (PATH lookup or absolute).
    pub ogr2ogr_cmd: String,
    /// Spatial reference the drawings are assumed to be in.
    pub source_srs: String,
    /// Spatial reference of the packaged output (web maps expect EPSG:3857).
    pub target_srs: String,
    pub geoserver: GeoServerSettings,
    /// Maximum number of concurrently running jobs; submissions beyond the
    /// cap stay queued in FIFO order.
    pub worker_count: usize,
    pub timeouts: StageTimeouts,
    /// Terminal-record history cap for the in-memory store.
    pub max_history: usize,
    pub listen_addr: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoServerSettings {
    pub url: String,
    pub user: String,
    pub password: String,
    pub workspace: String,
    /// Base URL handed to browsers in tile templates; defaults to `url`.
    pub public_url: Option<String>,
}

impl GeoServerSettings {
    pub fn public_base(&self) -> &str {
        self.public_url.as_deref().unwrap_or(&self.url)
    }
}

/// Per-stage timeouts. Expiry is a stage failure, not a cancellation.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StageTimeouts {
    pub convert_secs: u64,
    pub package_secs: u64,
    pub publish_secs: u64,
}

impl StageTimeouts {
    pub fn convert(&self) -> Duration {
        Duration::from_secs(self.convert_secs)
    }

    pub fn package(&self) -> Duration {
        Duration::from_secs(self.package_secs)
    }

    pub fn publish(&self) -> Duration {
        Duration::from_secs(self.publish_secs)
    }
}

impl Default for StageTimeouts {
    fn default() -> Self {
        // Large drawings can keep ogr2ogr busy for a long time.
        Self {
            convert_secs: 300,
            package_secs: 3600,
            publish_secs: 120,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./data"),
            dwg2dxf_cmd: "dwg2dxf".to_string(),
            ogr2ogr_cmd: "ogr2ogr".to_string(),
            source_srs: "EPSG:3857".to_string(),
            target_srs: "EPSG:3857".to_string(),
            geoserver: GeoServerSettings {
                url: "http://localhost:8080/geoserver".to_string(),
                user: "admin".to_string(),
                password: "geoserver".to_string(),
                workspace: "dwg".to_string(),
                public_url: None,
            },
            worker_count: num_cpus::get().max(1),
            timeouts: StageTimeouts::default(),
            max_history: 200,
            listen_addr: "127.0.0.1:8000".parse().expect("valid default addr"),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> std::result::Result<Option<T>, SettingsError>
where
    T::Err: std::fmt::Display,
{
    match env_var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| SettingsError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

impl Settings {
    /// Loads settings from the environment, applying defaults for anything
    /// unset, and ensures the work directory exists.
    pub fn from_env() -> std::result::Result<Self, SettingsError> {
        let mut s = Settings::default();

        if let Some(v) = env_var("DWGMAP_WORK_DIR") {
            s.work_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("DWGMAP_DWG2DXF_CMD") {
            s.dwg2dxf_cmd = v;
        }
        if let Some(v) = env_var("DWGMAP_OGR2OGR_CMD") {
            s.ogr2ogr_cmd = v;
        }
        if let Some(v) = env_var("DWGMAP_SOURCE_SRS") {
            s.source_srs = v;
        }
        if let Some(v) = env_var("DWGMAP_TARGET_SRS") {
            s.target_srs = v;
        }
        if let Some(v) = env_var("DWGMAP_GEOSERVER_URL") {
            s.geoserver.url = v;
        }
        if let Some(v) = env_var("DWGMAP_GEOSERVER_USER") {
            s.geoserver.user = v;
        }
        if let Some(v) = env_var("DWGMAP_GEOSERVER_PASSWORD") {
            s.geoserver.password = v;
        }
        if let Some(v) = env_var("DWGMAP_GEOSERVER_WORKSPACE") {
            s.geoserver.workspace = v;
        }
        if let Some(v) = env_var("DWGMAP_GEOSERVER_PUBLIC_URL") {
            s.geoserver.public_url = Some(v);
        }
        if let Some(v) = parse_env::<usize>("DWGMAP_WORKER_COUNT")? {
            s.worker_count = v.max(1);
        }
        if let Some(v) = parse_env::<u64>("DWGMAP_CONVERT_TIMEOUT_SECS")? {
            s.timeouts.convert_secs = v;
        }
        if let Some(v) = parse_env::<u64>("DWGMAP_PACKAGE_TIMEOUT_SECS")? {
            s.timeouts.package_secs = v;
        }
        if let Some(v) = parse_env::<u64>("DWGMAP_PUBLISH_TIMEOUT_SECS")? {
            s.timeouts.publish_secs = v;
        }
        if let Some(v) = parse_env::<usize>("DWGMAP_MAX_HISTORY")? {
            s.max_history = v;
        }
        if let Some(v) = parse_env::<SocketAddr>("DWGMAP_LISTEN_ADDR")? {
            s.listen_addr = v;
        }

        std::fs::create_dir_all(&s.work_dir).map_err(|source| SettingsError::WorkDir {
            path: s.work_dir.clone(),
            source,
        })?;

        Ok(s)
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.work_dir.join("jobs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.target_srs, "EPSG:3857");
        assert_eq!(s.geoserver.workspace, "dwg");
        assert!(s.worker_count >= 1);
        assert_eq!(s.timeouts.package().as_secs(), 3600);
        assert_eq!(s.max_history, 200);
    }

    #[test]
    fn test_public_base_falls_back_to_url() {
        let mut s = Settings::default();
        assert_eq!(s.geoserver.public_base(), "http://localhost:8080/geoserver");
        s.geoserver.public_url = Some("https://maps.example.com/geoserver".to_string());
        assert_eq!(s.geoserver.public_base(), "https://maps.example.com/geoserver");
    }

    #[test]
    fn test_jobs_dir_is_under_work_dir() {
        let s = Settings::default();
        assert!(s.jobs_dir().starts_with(&s.work_dir));
    }
}
