mod config;
mod error;
mod routes;
mod secrets;
mod state;

use axum::routing::{get, post};
use axum::Router;
use config::ServerConfig;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use workforge_platform::{CloudWorkerAdapter, MobileAdapter, PlatformAdapter, ServerAdapter};
use workforge_runtime::{
    CancellationRegistry, ExecutionService, InMemoryBroadcaster, InMemoryRunStore, InMemoryWorkflowStore, NatsBroadcaster, PgRunStore,
    PgWorkflowStore, RateLimiter, RunBroadcaster, RunStore, WorkflowStore,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!(platform = %config.platform, "loaded configuration");

    let (workflows, runs): (Arc<dyn WorkflowStore>, Arc<dyn RunStore>) = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await
                .expect("failed to connect to database");
            tracing::info!("running database migrations");
            sqlx::migrate!("./migrations").run(&pool).await.expect("failed to run migrations");
            (Arc::new(PgWorkflowStore::new(pool.clone())), Arc::new(PgRunStore::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores (not durable across restarts)");
            (Arc::new(InMemoryWorkflowStore::default()), Arc::new(InMemoryRunStore::default()))
        }
    };

    let broadcaster: Arc<dyn RunBroadcaster> = match &config.nats_url {
        Some(nats_url) => {
            tracing::info!("connecting to nats for run event broadcast");
            let client = async_nats::connect(nats_url).await.expect("failed to connect to nats");
            Arc::new(NatsBroadcaster::new(client))
        }
        None => {
            tracing::warn!("NATS_URL not set, broadcasting run events in-process only");
            Arc::new(InMemoryBroadcaster::default())
        }
    };

    let adapter: Box<dyn PlatformAdapter> = match config.platform.as_str() {
        "mobile" => Box::new(MobileAdapter::new(None)),
        "cloud-worker" => Box::new(CloudWorkerAdapter),
        _ => Box::new(ServerAdapter::new(std::path::PathBuf::from(&config.fs_root))),
    };
    let mut registry = workforge_interpreter::BlockHandlerRegistry::new();
    adapter.register_blocks(&mut registry);
    if let Some(missing) = registry.missing_required().into_iter().next() {
        panic!("platform adapter '{}' did not register a handler for required block type {missing:?}", adapter.platform());
    }

    let service = Arc::new(ExecutionService {
        workflows,
        runs,
        broadcaster,
        cancellations: Arc::new(CancellationRegistry::new()),
        rate_limiter: Arc::new(RateLimiter::new()),
        registry: Arc::new(registry),
    });

    let state = AppState { service };

    let app = Router::new()
        .route("/workflows/{id}/trigger", post(routes::trigger))
        .route("/runs/{id}/cancel", post(routes::cancel_run))
        .route("/runs/{id}/actions", post(routes::submit_action))
        .route("/runs/{id}/live", get(routes::live))
        .route("/w/{slug}/run", post(routes::trigger_public))
        .route("/w/{slug}/runs/{run_id}/actions", post(routes::submit_action_public))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await.expect("failed to bind to address");
    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .expect("server error");
}
