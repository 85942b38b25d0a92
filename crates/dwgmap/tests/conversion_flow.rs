//! End-to-end flow against fake external tools: a stub dwg2dxf and a stub
//! ogr2ogr that copies a prebuilt GeoPackage into place. GeoServer points at
//! an unreachable address, so every run exercises the partial-success path.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dwgmap::api::{self, AppState};
use dwgmap::scheduler::QueuedJob;
use dwgmap::{
    GeoServerClient, JobProgressBroadcaster, JobScheduler, JobStatus, JobStore, Settings,
};

#[cfg(unix)]
fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Minimal GeoPackage-shaped SQLite file with two layers and an extent.
fn write_gpkg_fixture(path: &Path) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE entities (\"Layer\" TEXT, line_color TEXT, geom BLOB);
         INSERT INTO entities VALUES ('WALLS', '#FF0000', NULL);
         INSERT INTO entities VALUES ('WALLS', '#FF0000', NULL);
         INSERT INTO entities VALUES ('AXES', NULL, NULL);
         CREATE TABLE gpkg_contents (
            table_name TEXT, data_type TEXT,
            min_x REAL, min_y REAL, max_x REAL, max_y REAL
         );
         INSERT INTO gpkg_contents VALUES ('entities', 'features', 11.5, 48.1, 11.6, 48.2);",
    )
    .unwrap();
}

struct Harness {
    _dir: tempfile::TempDir,
    state: AppState,
}

#[cfg(unix)]
fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();

    let fixture = dir.path().join("fixture.gpkg");
    write_gpkg_fixture(&fixture);

    // dwg2dxf stub: args are `-y -o <dxf> <dwg>`.
    let dwg2dxf = bin.join("dwg2dxf");
    write_script(&dwg2dxf, "shift; shift\necho 'SECTION' > \"$1\"");

    // ogr2ogr stub: the gpkg target is the argument after `GPKG`.
    let ogr2ogr = bin.join("ogr2ogr");
    write_script(
        &ogr2ogr,
        &format!(
            "prev=''\nfor a in \"$@\"; do\n  if [ \"$prev\" = GPKG ]; then cp {} \"$a\"; exit 0; fi\n  prev=\"$a\"\ndone\nexit 1",
            fixture.display()
        ),
    );

    let mut settings = Settings::default();
    settings.work_dir = dir.path().join("work");
    std::fs::create_dir_all(&settings.work_dir).unwrap();
    settings.dwg2dxf_cmd = dwg2dxf.display().to_string();
    settings.ogr2ogr_cmd = ogr2ogr.display().to_string();
    settings.worker_count = 2;
    // Unroutable address so publish fails fast instead of hanging.
    settings.geoserver.url = "http://127.0.0.1:1/geoserver".to_string();
    settings.timeouts.publish_secs = 2;
    let settings = Arc::new(settings);

    let store = Arc::new(JobStore::new(settings.max_history));
    let geoserver = Arc::new(GeoServerClient::from_settings(&settings).unwrap());
    let broadcaster = JobProgressBroadcaster::new(64);
    let scheduler = Arc::new(JobScheduler::new(
        Arc::clone(&settings),
        Arc::clone(&store),
        broadcaster.clone(),
        geoserver,
    ));

    Harness {
        _dir: dir,
        state: AppState {
            settings,
            store,
            scheduler,
            broadcaster,
        },
    }
}

fn submit(h: &Harness, id: &str) {
    let job_dir = h.state.settings.jobs_dir().join(id);
    std::fs::create_dir_all(&job_dir).unwrap();
    let dwg_path = job_dir.join("plan.dwg");
    std::fs::write(&dwg_path, b"fake dwg").unwrap();
    h.state
        .scheduler
        .submit(QueuedJob {
            job_id: id.to_string(),
            source_name: "plan.dwg".to_string(),
            dwg_path,
            job_dir,
        })
        .unwrap();
}

fn wait_terminal(h: &Harness, id: &str) -> dwgmap::JobRecord {
    for _ in 0..200 {
        if let Some(r) = h.state.store.get(id) {
            if r.is_terminal() {
                return r;
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("job {id} never finished");
}

#[cfg(unix)]
#[test]
fn converts_and_packages_then_fails_publish_keeping_outputs() {
    let h = harness();
    submit(&h, "flow1");
    let record = wait_terminal(&h, "flow1");

    // Publish cannot reach GeoServer, so the job ends in error...
    assert_eq!(record.status, JobStatus::Error);
    let err = record.error.as_ref().unwrap();
    assert_eq!(err.stage, dwgmap::pipeline::StageKind::Publish);

    // ...but every earlier product is recorded and on disk.
    let convert = record.outputs.convert.as_ref().unwrap();
    assert!(Path::new(&convert.dxf_path).exists());
    let package = record.outputs.package.as_ref().unwrap();
    assert!(Path::new(&package.gpkg_path).exists());
    assert_eq!(package.layers.len(), 2);
    assert_eq!(package.layers[1].name, "WALLS");
    assert_eq!(package.layers[1].color, "#FF0000");
    assert_eq!(package.layers[0].color, "#9ca3af");
    let bbox = package.bbox.unwrap();
    assert!(bbox.is_geographic());
    assert!(record.outputs.publish.is_none());

    // Progress reached at least the package band before failing in publish.
    assert!(record.progress >= 70);

    h.state.scheduler.shutdown();
    h.state.scheduler.wait();
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn layers_endpoint_serves_packaged_layers_after_publish_failure() {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    let h = tokio::task::spawn_blocking(|| {
        let h = harness();
        submit(&h, "flow2");
        wait_terminal(&h, "flow2");
        h
    })
    .await
    .unwrap();

    let app = api::router(h.state.clone());
    let response = app
        .oneshot(
            Request::get("/api/layers/flow2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let layers: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(layers.as_array().unwrap().len(), 2);

    h.state.scheduler.shutdown();
    h.state.scheduler.wait();
}

#[cfg(unix)]
#[test]
fn fifo_jobs_all_reach_terminal_states() {
    let h = harness();
    for id in ["q1", "q2", "q3", "q4"] {
        submit(&h, id);
    }
    for id in ["q1", "q2", "q3", "q4"] {
        let record = wait_terminal(&h, id);
        assert!(record.is_terminal());
        assert!(record.outputs.package.is_some());
    }
    h.state.scheduler.shutdown();
    h.state.scheduler.wait();
}
