//! # Server Configuration
//!
//! Router assembly, shared state, and the `serve` lifecycle: migrations,
//! background tasks, and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use metrics::counter;
use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::db;
use crate::handlers;
use crate::purger::HookPurger;
use crate::repositories::{HookRepository, VcsProviderRepository};
use crate::service::ConnectionService;
use crate::telemetry::trace_context_middleware;
use crate::vcs::provider::VcsProviderService;
use crate::vcs::{EventParsers, VcsEvent, VcsProviderResolver};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub hooks: HookRepository,
    pub connections: ConnectionService,
    pub providers: VcsProviderRepository,
    pub parsers: EventParsers,
    /// Outbound conduit for accepted deliveries; handlers only send.
    pub events: mpsc::Sender<VcsEvent>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<DatabaseConnection>,
        crypto_key: CryptoKey,
        resolver: Arc<dyn VcsProviderResolver>,
        events: mpsc::Sender<VcsEvent>,
    ) -> Self {
        let hooks = HookRepository::new(config.public_hostname.trim());
        Self {
            connections: ConnectionService::new(db.clone(), hooks.clone(), resolver),
            providers: VcsProviderRepository::new(db.clone(), crypto_key),
            parsers: EventParsers::default(),
            hooks,
            config,
            db,
            events,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let operator_routes = Router::new()
        .route(
            "/vcs-providers",
            post(handlers::vcs_providers::create_vcs_provider),
        )
        .route(
            "/vcs-providers/{id}",
            get(handlers::vcs_providers::get_vcs_provider)
                .delete(handlers::vcs_providers::delete_vcs_provider),
        )
        .route("/connections", post(handlers::connections::connect))
        .route(
            "/connections/{resource_type}/{resource_id}",
            delete(handlers::connections::disconnect),
        )
        .route_layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route(
            "/webhooks/{webhook_id}",
            post(handlers::webhooks::receive_webhook),
        )
        .merge(operator_routes)
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Drains the event conduit, logging each event.
pub async fn log_events(mut events: mpsc::Receiver<VcsEvent>) {
    while let Some(event) = events.recv().await {
        counter!("vcs_hooks_events_consumed_total", "cloud" => event.cloud.as_str()).increment(1);
        tracing::info!(
            hook_id = %event.hook_id,
            cloud = %event.cloud,
            repo = %event.repo,
            commit_sha = %event.commit_sha,
            payload = ?event.payload,
            "vcs event received"
        );
    }
    tracing::debug!("event conduit closed");
}

/// Connects to the database and applies pending migrations.
pub async fn run_migrations(config: &AppConfig) -> Result<DatabaseConnection> {
    let db = db::init_pool(config).await?;
    Migrator::up(&db, None)
        .await
        .context("failed to apply migrations")?;
    tracing::info!("Database migrations applied");
    Ok(db)
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig) -> Result<()> {
    config.validate()?;
    let crypto_key = CryptoKey::new(config.crypto_key.clone().unwrap_or_default())
        .context("invalid crypto key")?;
    let addr = config.bind_addr().context("invalid server address")?;

    let db = Arc::new(run_migrations(&config).await?);
    let config = Arc::new(config);

    let resolver = VcsProviderService::new(
        VcsProviderRepository::new(db.clone(), crypto_key.clone()),
        &config,
    );
    let (events_tx, events_rx) = mpsc::channel(config.event_buffer_size);
    let state = AppState::new(
        config.clone(),
        db,
        crypto_key,
        Arc::new(resolver),
        events_tx,
    );

    let shutdown = CancellationToken::new();
    let consumer_handle = tokio::spawn(log_events(events_rx));
    let purger_handle = if config.hook_purge.enabled {
        let purger = HookPurger::new(state.connections.clone(), &config.hook_purge);
        let token = shutdown.clone();
        Some(tokio::spawn(async move { purger.run(token).await }))
    } else {
        tracing::info!("Hook purger disabled");
        None
    };

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped accepting connections, cleaning up");
    shutdown.cancel();
    if let Some(handle) = purger_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    // the router held the last sender; the consumer drains and exits
    let _ = tokio::time::timeout(Duration::from_secs(5), consumer_handle).await;
    tracing::info!("Graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::webhooks::receive_webhook,
        crate::handlers::connections::connect,
        crate::handlers::connections::disconnect,
        crate::handlers::vcs_providers::create_vcs_provider,
        crate::handlers::vcs_providers::get_vcs_provider,
        crate::handlers::vcs_providers::delete_vcs_provider,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::error::ApiError,
            crate::repositories::Connection,
            crate::repositories::ResourceType,
            crate::service::ConnectOptions,
            crate::handlers::connections::DisconnectResponse,
            crate::handlers::vcs_providers::CreateVcsProviderRequest,
            crate::handlers::vcs_providers::DeleteVcsProviderResponse,
            crate::vcs::VcsProvider,
            crate::vcs::Cloud,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "VCS Hooks API",
        description = "Repository connections and webhook lifecycle",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
