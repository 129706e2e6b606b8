//! WikiDraft API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Rate limiting
//! - Request routing to the pipeline stages
//! - The background reconciliation sweep
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{signal, sync::watch};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wikidraft_common::{
    config::{AppConfig, ObservabilityConfig},
    jobs::{JobTracker, RetryPolicy, Sweeper, SweeperConfig},
    llm::create_job_client,
    metrics::{register_metrics, LATENCY_BUCKETS, RECONCILE_BUCKETS},
    Pipeline, Repository,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Pipeline,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.observability);

    info!("Starting WikiDraft API Gateway v{}", wikidraft_common::VERSION);

    // Initialize metrics
    init_metrics(config.observability.metrics_port)?;

    // Open the record stores
    info!(data_dir = %config.storage.data_dir.display(), "Opening record stores...");
    let repo = Repository::open(&config.storage.data_dir).await?;

    let client = create_job_client(&config.llm)?;
    info!(provider = client.provider(), "Job client ready");
    let tracker = JobTracker::new(client, RetryPolicy::from_config(&config.jobs));
    let pipeline = Pipeline::new(repo, tracker, config.prompts.clone());

    // Background reconciliation
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = match config.sweep_interval() {
        Some(interval) => {
            let sweeper = Sweeper::new(Arc::new(pipeline.clone()), SweeperConfig { interval });
            Some(tokio::spawn(sweeper.run(shutdown_rx)))
        }
        None => {
            info!("Background sweep disabled");
            None
        }
    };

    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        pipeline,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the sweep; an in-progress pass gets the shutdown timeout to finish
    let _ = shutdown_tx.send(true);
    if let Some(handle) = sweeper {
        if tokio::time::timeout(config.shutdown_timeout(), handle).await.is_err() {
            warn!("Sweeper did not stop within the shutdown timeout");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Plain or JSON output; `RUST_LOG` overrides the configured level
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Prometheus listener on its own port (0 disables)
fn init_metrics(port: u16) -> anyhow::Result<()> {
    if port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Suffix("request_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("reconcile_duration_seconds".to_string()),
            RECONCILE_BUCKETS,
        )?
        .install()
        .context("Failed to install Prometheus exporter")?;

    register_metrics();
    info!(port, "Metrics exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let mut api_routes = Router::new()
        // Entity endpoints
        .route(
            "/entities",
            post(handlers::entities::create_entity).get(handlers::entities::list_entities),
        )
        .route(
            "/entities/{id}",
            get(handlers::entities::get_entity).delete(handlers::entities::delete_entity),
        )
        .route(
            "/entities/{id}/status",
            axum::routing::patch(handlers::entities::update_status),
        )

        // Extraction endpoint
        .route("/extraction", post(handlers::extraction::extract))

        // Notability endpoints
        .route(
            "/notability",
            post(handlers::notability::upsert_notability).get(handlers::notability::list_notability),
        )
        .route("/notability/{id}", get(handlers::notability::get_notability))
        .route(
            "/notability/{id}/sources",
            axum::routing::put(handlers::notability::replace_sources),
        )
        .route("/notability/{id}/recalculate", post(handlers::notability::recalculate))
        .route("/notability/{id}/research", post(handlers::notability::start_research))
        .route(
            "/notability/{id}/research/progress",
            get(handlers::notability::research_progress),
        )

        // Section research endpoints
        .route("/research", get(handlers::research::list_drafts))
        .route(
            "/research/{id}",
            post(handlers::research::start_draft).get(handlers::research::get_draft),
        )
        .route("/research/{id}/progress", get(handlers::research::draft_progress))

        // Writing endpoints
        .route(
            "/writing/{id}",
            post(handlers::writing::start_writing).get(handlers::writing::get_writing),
        )
        .route("/writing/{id}/progress", get(handlers::writing::writing_progress))

        // Article endpoints
        .route("/articles", get(handlers::articles::list_articles))
        .route("/articles/{id}", get(handlers::articles::get_article))
        .route("/articles/{id}/draft", post(handlers::articles::draft_article))
        .route(
            "/articles/{id}/status",
            axum::routing::patch(handlers::articles::update_status),
        );

    let rate_limit = &state.config.rate_limit;
    if rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            rate_limit.requests_per_second,
            rate_limit.burst,
        );
        let limit = rate_limit.requests_per_second;
        api_routes = api_routes.layer(axum::middleware::from_fn(
            move |request: axum::extract::Request, next: axum::middleware::Next| {
                middleware::rate_limit::rate_limit_middleware(request, next, limiter.clone(), limit)
            },
        ));
    }

    // Compose the app
    Router::new()
        // Health endpoints (not rate limited)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(axum::middleware::from_fn(middleware::metrics::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
