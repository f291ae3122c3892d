//! SiTeJo API Gateway
//!
//! The HTTP entry point of the correspondence ticketing service.
//! Handles:
//! - Authentication and role checks
//! - Login rate limiting
//! - Request routing into the ticket workflow
//! - Observability (logging, metrics, request IDs)

mod handlers;
mod middleware;


use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use sitejo_common::{
    auth::{AuthState, JwtManager},
    config::AppConfig,
    db::{create_schema, DbPool, Repository},
    metrics,
    storage::{BlobStore, LocalBlobStore},
    workflow::{DocumentManager, LetterNumberGenerator, RandomSuffix, SystemClock, TicketWorkflow},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::middleware::rate_limit::{self, GlobalRateLimiter};

/// Extra room on top of the upload limit for multipart framing
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub repo: Repository,
    pub jwt: Arc<JwtManager>,
    pub tickets: TicketWorkflow,
    pub documents: DocumentManager,
    pub blobs: Arc<dyn BlobStore>,
    pub login_limiter: Option<Arc<GlobalRateLimiter>>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        db: DbPool,
        blobs: Arc<dyn BlobStore>,
        jwt_secret: &str,
    ) -> Self {
        let clock = Arc::new(SystemClock);
        let letters = LetterNumberGenerator::new(clock.clone(), Arc::new(RandomSuffix));

        let login_limiter = config.rate_limit.enabled.then(|| {
            rate_limit::create_rate_limiter(
                config.rate_limit.requests_per_second,
                config.rate_limit.burst,
            )
        });

        Self {
            repo: Repository::new(db.clone()),
            jwt: Arc::new(JwtManager::new(jwt_secret, config.auth.jwt_expiration_secs)),
            tickets: TicketWorkflow::new(db.clone(), clock.clone(), letters, blobs.clone()),
            documents: DocumentManager::new(
                db.clone(),
                blobs.clone(),
                clock,
                config.storage.max_upload_bytes,
            ),
            blobs,
            login_limiter,
            config,
            db,
        }
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        AuthState {
            jwt: state.jwt.clone(),
            repo: state.repo.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load()?);

    init_tracing(&config);

    info!("Starting SiTeJo API Gateway v{}", sitejo_common::VERSION);

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .set_buckets(metrics::LATENCY_BUCKETS)?
            .install()?;
        info!(%addr, "Prometheus exporter listening");
    }
    metrics::register_metrics();

    let jwt_secret = config
        .auth
        .jwt_secret
        .clone()
        .ok_or("auth.jwt_secret must be configured (APP__AUTH__JWT_SECRET)")?;

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    if config.database.auto_migrate {
        create_schema(db.write()).await?;
        info!("Database schema ensured");
    }

    let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(&config.storage.root));
    info!(root = %config.storage.root.display(), "Document storage ready");

    let state = AppState::new(config.clone(), db, blobs, &jwt_secret);

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
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

    let upload_limit = state.config.storage.max_upload_bytes + MULTIPART_OVERHEAD;

    let login = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit::login_rate_limit,
        ));

    // API routes
    let api_routes = Router::new()
        // Authentication
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/profile", put(handlers::auth::update_profile))
        .route("/auth/change-password", put(handlers::auth::change_password))

        // Tickets
        .route(
            "/tickets",
            get(handlers::tickets::list_tickets).post(handlers::tickets::create_ticket),
        )
        .route("/tickets/statistics", get(handlers::tickets::statistics))
        .route("/tickets/lecturers", get(handlers::tickets::lecturers))
        .route(
            "/tickets/{id}",
            get(handlers::tickets::get_ticket)
                .put(handlers::tickets::update_ticket)
                .delete(handlers::tickets::delete_ticket),
        )
        .route("/tickets/{id}/send-to-lecturer", post(handlers::tickets::send_to_lecturer))
        .route("/tickets/{id}/review", post(handlers::tickets::review))
        .route("/tickets/{id}/approve", post(handlers::tickets::approve))
        .route("/tickets/{id}/reject", post(handlers::tickets::reject))
        .route("/tickets/{id}/complete", post(handlers::tickets::complete))

        // Documents
        .route(
            "/tickets/{id}/documents",
            get(handlers::documents::list_documents)
                .post(handlers::documents::upload_document)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/documents/{id}/download", get(handlers::documents::download_document))
        .route("/documents/{id}", axum::routing::delete(handlers::documents::delete_document))

        // User administration
        .route(
            "/users",
            get(handlers::users::list_users).post(handlers::users::create_user),
        )
        .route(
            "/users/{id}",
            get(handlers::users::get_user)
                .put(handlers::users::update_user)
                .delete(handlers::users::delete_user),
        )

        // Public letter verification
        .route("/verify-letter", get(handlers::verify::verify_letter_query))
        .route("/verify-letter/{*code}", get(handlers::verify::verify_letter))
        .merge(login);

    // Compose the app
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/api", api_routes)
        .layer(axum::middleware::from_fn(crate::middleware::track_metrics))
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
