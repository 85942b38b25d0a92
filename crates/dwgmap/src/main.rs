use std::sync::Arc;

use tracing::{error, info};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use dwgmap::api::{self, AppState};
use dwgmap::{
    GeoServerClient, JobProgressBroadcaster, JobScheduler, JobStore, Result, Settings,
};

fn init_tracing() {
    // Route log-crate records (crossbeam workers, store) into tracing.
    let _ = LogTracer::init();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let settings = Arc::new(Settings::from_env()?);
    let geoserver = Arc::new(GeoServerClient::from_settings(&settings)?);

    let store = Arc::new(JobStore::new(settings.max_history));
    let broadcaster = JobProgressBroadcaster::default();
    let scheduler = Arc::new(JobScheduler::new(
        Arc::clone(&settings),
        Arc::clone(&store),
        broadcaster.clone(),
        geoserver,
    ));

    let app = api::router(AppState {
        settings: Arc::clone(&settings),
        store,
        scheduler: Arc::clone(&scheduler),
        broadcaster,
    });

    let listener = tokio::net::TcpListener::bind(settings.listen_addr).await?;
    info!("Listening on http://{}", settings.listen_addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    });
    let served = server.await;

    scheduler.shutdown();
    tokio::task::spawn_blocking(move || scheduler.wait())
        .await
        .ok();
    served?;
    info!("Bye");
    Ok(())
}
