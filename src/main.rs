use actix_web::{middleware::Compress, App, HttpServer};
use actix_cors::Cors;
use utoipa_swagger_ui::SwaggerUi;

mod access;
mod auth;
mod error;
mod mail;
mod models;
mod openapi;
mod rate_limit;
mod repo;
mod routes;
mod security;
mod validate;

use mail::build_mailer;
use openapi::ApiDoc;
use rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
use repo::inmem::InMemRepo;
use routes::{config, AppState};
use security::SecurityHeaders;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Environment variables must be set externally (shell, systemd, Docker).
    // Load .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    validate_env_vars();

    // Structured logging initialisation
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("bootstrapping revu server");

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let sock: std::net::SocketAddr = addr
            .parse()
            .expect("METRICS_ADDR must be a host:port socket address");
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(sock)
            .install()
            .expect("failed to install Prometheus exporter");
        info!("Prometheus exporter listening on {sock}");
    }

    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    let repo = InMemRepo::new();
    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    info!("using in-memory repository backend");

    #[cfg(feature = "postgres-store")]
    let repo = {
        use sqlx::postgres::PgPoolOptions;
        let db_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres-store");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .expect("failed to create Pg pool");
        sqlx::migrate!()
            .run(&pool)
            .await
            .expect("failed to run migrations");
        info!("using Postgres repository backend");
        repo::pg::PgRepo::new(pool)
    };

    let mailer = build_mailer();
    let rate_limiter = if std::env::var("REVU_RL_DISABLED").map(|v| v == "1").unwrap_or(false) {
        None
    } else {
        Some(RateLimiterFacade::new(
            InMemoryRateLimiter::new(),
            RateLimitConfig::from_env(),
        ))
    };

    let openapi = ApiDoc::openapi();
    info!("OpenAPI spec generated");

    let bind = std::env::var("REVU_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PATCH", "DELETE", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            if let Ok(front) = std::env::var("FRONTEND_URL") {
                c = c.allowed_origin(&front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::from_env())
            .wrap(cors)
            .configure(config)
            .service(SwaggerUi::new("/docs").url("/docs/openapi.json", openapi.clone()))
            .app_data(actix_web::web::Data::new(AppState {
                repo: Arc::new(repo.clone()),
                mailer: mailer.clone(),
                rate_limiter: rate_limiter.clone(),
            }))
    })
    .bind(&bind)?;

    info!("listening on http://{bind}");

    server.run().await
}

/// Validate that required environment variables are set
fn validate_env_vars() {
    use std::env;

    if env::var("JWT_SECRET").is_err() {
        eprintln!("Missing required environment variable JWT_SECRET");
        std::process::exit(1);
    }
    if let Ok(secret) = env::var("JWT_SECRET") {
        if secret.len() < 32 {
            eprintln!("JWT_SECRET must be at least 32 characters long for security");
            std::process::exit(1);
        }
    }

    if env::var("MAIL_WEBHOOK_URL").is_err() {
        eprintln!("Warning: MAIL_WEBHOOK_URL not set; confirmation codes will only be logged");
    }
}
