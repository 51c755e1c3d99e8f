// prodtrack - production floor tracking service
use actix_web::{
    middleware::{Compress, DefaultHeaders, Logger},
    web, App, HttpServer,
};
use actix_web_httpauth::middleware::HttpAuthentication;
use actix_web::http::header;
use actix_cors::Cors;
use anyhow::Context;
use chrono::FixedOffset;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Sqlite, SqlitePool,
};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Module declarations
mod auth;
mod auth_handlers;
mod barcode;
mod checklist;
mod checklist_handlers;
mod config;
mod db;
mod error;
mod handlers;
mod line_handlers;
mod lines;
mod models;
mod monitoring;
mod production_handlers;
mod reports;
pub mod repositories;
mod scan_handlers;
mod scans;
mod shift;
mod stream;
mod tokens;

use auth::{AuthService, jwt_middleware};
use auth_handlers::*;
use barcode::{BarcodeRenderer, Code128Renderer};
use checklist::ChecklistSchema;
use config::{load_config, Config};
use lines::LineDefinition;
use monitoring::{Metrics, RequestLogger};
use repositories::{SqliteRepository, TrackingRepository};
use shift::ShiftCalendar;

pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
    pub repo: Arc<dyn TrackingRepository>,
    pub renderer: Arc<dyn BarcodeRenderer>,
    pub calendar: ShiftCalendar<FixedOffset>,
    pub lines: Vec<LineDefinition>,
    pub checklist_schema: ChecklistSchema,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, config: Config, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let calendar = config.tracking.calendar()?;
        let lines = config.tracking.lines.iter().map(LineDefinition::from).collect();
        let checklist_schema = ChecklistSchema::new(config.tracking.checklist_fields.clone());

        Ok(Self {
            repo: Arc::new(SqliteRepository::new(db_pool.clone())),
            renderer: Arc::new(Code128Renderer::default()),
            db_pool,
            config,
            calendar,
            lines,
            checklist_schema,
            metrics,
        })
    }
}

// ==================== MAIN ====================

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (this calls load_env_file internally)
    let mut config = load_config()?;

    setup_logging(&config)?;

    if config.is_production() {
        validate_production_config(&config)?;
    } else if config.auth.jwt_secret == config::AuthConfig::default().jwt_secret {
        log::warn!("JWT_SECRET not set, using a random secret; sessions end on restart");
        config.auth.jwt_secret = config::generate_jwt_secret();
    }

    config.print_startup_info();

    setup_database(&config.database.url).await?;
    let pool = create_database_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    let auth_service = Arc::new(AuthService::new(
        &config.auth.jwt_secret,
        config.auth.token_expiration_hours,
        config.auth.bcrypt_cost,
    ));

    if let Some(password) = auth::ensure_default_admin(
        &pool,
        &auth_service,
        env::var("DEFAULT_ADMIN_PASSWORD").ok(),
    ).await? {
        log::warn!("Default admin password: {} (change it after first login)", password);
    }

    let metrics = Arc::new(Metrics::new());
    let app_state = Arc::new(AppState::new(pool.clone(), config.clone(), metrics.clone())?);

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server at http://{}", bind_address);

    let server_config = config.clone();
    let mut server = HttpServer::new(move || {
        let cors = setup_cors(&server_config.security.allowed_origins, server_config.is_production());
        let security_headers = setup_security_headers(&server_config.security);

        App::new()
            .wrap(cors)
            .wrap(security_headers)
            .wrap(Logger::default())
            .wrap(Compress::default())
            .wrap(RequestLogger::new(metrics.clone()))
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(metrics.clone()))
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::JsonConfig::default().limit(server_config.security.max_request_size))
            .configure(configure_routes)
    })
        .keep_alive(Duration::from_secs(config.server.keep_alive))
        .client_request_timeout(Duration::from_secs(config.server.client_timeout))
        .client_disconnect_timeout(Duration::from_secs(config.server.client_shutdown));

    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server
        .bind(&bind_address)?
        .run()
        .await
        .context("Server failed to run")?;

    Ok(())
}

// ==================== ROUTES ====================

/// Public health/login routes plus the bearer-protected `/api/v1` scope.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    let auth_middleware = HttpAuthentication::bearer(jwt_middleware);

    cfg
        // Health check and metrics (no auth)
        .service(
            web::scope("/health")
                .route("", web::get().to(monitoring::health_check))
                .route("/ready", web::get().to(monitoring::readiness_check))
                .route("/metrics", web::get().to(monitoring::metrics_endpoint))
        )
        // Auth endpoints (no authentication required)
        .service(
            web::scope("/auth")
                .route("/login", web::post().to(login))
        )
        // Protected API endpoints
        .service(
            web::scope("/api/v1")
                .wrap(auth_middleware)
                .service(
                    web::scope("/auth")
                        .route("/profile", web::get().to(get_profile))
                        .route("/users", web::get().to(get_users))
                        .route("/users", web::post().to(create_user))
                        .route("/users/{id}", web::put().to(update_user))
                        .route("/users/{id}", web::delete().to(delete_user))
                )
                .service(
                    web::scope("/productions")
                        .route("", web::get().to(production_handlers::get_productions))
                        .route("", web::post().to(production_handlers::create_production))
                        .route("/{id}", web::delete().to(production_handlers::delete_production))
                        .route("/{id}/units", web::get().to(production_handlers::get_production_units))
                )
                .service(
                    web::scope("/units")
                        .route("", web::get().to(production_handlers::get_units_with_tokens))
                        .route("/{id}/tokens", web::get().to(production_handlers::get_unit_tokens))
                )
                .service(
                    web::scope("/tokens")
                        .route("/generate", web::post().to(production_handlers::generate_tokens))
                        .route("/generate/bulk", web::post().to(production_handlers::generate_tokens_bulk))
                )
                .service(
                    web::scope("/scans")
                        .route("", web::post().to(scan_handlers::commit_scan))
                        .route("/preview", web::post().to(scan_handlers::preview_scan))
                        .route("/log", web::get().to(scan_handlers::get_unit_scan_log))
                        .route("/log/stream", web::get().to(scan_handlers::stream_unit_scan_log))
                )
                .service(
                    web::scope("/checklists")
                        .route("", web::get().to(checklist_handlers::get_checklist_units))
                        .route("", web::post().to(checklist_handlers::apply_checklist))
                )
                .service(
                    web::scope("/lines")
                        .route("", web::get().to(line_handlers::get_line_summary))
                        .route("/stream", web::get().to(line_handlers::stream_line_summary))
                        .route("/log", web::get().to(line_handlers::get_line_log))
                        .route("/log/stream", web::get().to(line_handlers::stream_line_log))
                )
                .service(
                    web::scope("/charts")
                        .route("/months", web::get().to(line_handlers::get_chart_months))
                        .route("/weekly", web::get().to(line_handlers::get_weekly_completion))
                        .route("/weekly/stream", web::get().to(line_handlers::stream_weekly_completion))
                )
        );
}

// ==================== HELPER FUNCTIONS ====================

pub fn setup_cors(allowed_origins: &[String], is_production: bool) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::CACHE_CONTROL,
        ])
        .expose_headers(vec![header::CONTENT_LENGTH])
        .max_age(3600);

    if allowed_origins.iter().any(|o| o == "*") && !is_production {
        log::warn!("Using wildcard CORS (*) in development mode");
        return cors.allow_any_origin().allow_any_header().allow_any_method();
    }

    for origin in allowed_origins.iter().filter(|o| !o.is_empty() && o.as_str() != "*") {
        cors = cors.allowed_origin(origin);
    }
    cors
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(())
}

fn validate_production_config(config: &Config) -> anyhow::Result<()> {
    if config.auth.jwt_secret == config::AuthConfig::default().jwt_secret {
        anyhow::bail!("JWT_SECRET must be set in production");
    }

    if config.security.allowed_origins.iter().any(|o| o == "*") {
        anyhow::bail!("Wildcard CORS origins not allowed in production!");
    }

    Ok(())
}

async fn setup_database(database_url: &str) -> anyhow::Result<()> {
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        log::info!("Creating database: {}", database_url);
        Sqlite::create_database(database_url).await?;
    }
    Ok(())
}

async fn create_database_pool(db_config: &config::DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&db_config.url)
        .with_context(|| format!("Invalid database url: {}", db_config.url))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .acquire_timeout(Duration::from_secs(db_config.connect_timeout))
        .idle_timeout(Duration::from_secs(db_config.idle_timeout))
        .connect_with(options)
        .await
        .context("Failed to connect to database")?;

    Ok(pool)
}

fn setup_security_headers(config: &config::SecurityConfig) -> DefaultHeaders {
    let mut headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

    if config.require_https {
        headers = headers.add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains"
        ));
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{User, UserRole};
    use crate::config::LineConfig;
    use crate::db::testing;
    use crate::models::Process;
    use actix_web::{http::StatusCode, test};
    use serde_json::{json, Value};

    fn kit_config() -> Config {
        let mut config = Config::default();
        config.tracking.pipelines.insert("kit".to_string(), vec![Process::Inv, Process::Scc]);
        config.tracking.lines = vec![LineConfig {
            name: "KIT".to_string(),
            processes: vec![Process::Inv, Process::Scc],
        }];
        config
    }

    macro_rules! app {
        () => {{
            let pool = testing::memory_pool().await;
            let auth_service = Arc::new(AuthService::new(&"k".repeat(32), 12, 4));
            auth::ensure_default_admin(&pool, &auth_service, Some("admin-pass-1".to_string()))
                .await
                .unwrap();
            User::create(&pool, 7, "Budi", UserRole::Operator, "operator-pass-1", &auth_service)
                .await
                .unwrap();

            let metrics = Arc::new(Metrics::new());
            let state = Arc::new(AppState::new(pool.clone(), kit_config(), metrics.clone()).unwrap());

            test::init_service(
                App::new()
                    .app_data(web::Data::new(state))
                    .app_data(web::Data::new(auth_service))
                    .app_data(web::Data::new(metrics))
                    .app_data(web::Data::new(pool))
                    .configure(configure_routes),
            )
            .await
        }};
    }

    macro_rules! login {
        ($app:expr, $badge:expr, $password:expr) => {{
            let req = test::TestRequest::post()
                .uri("/auth/login")
                .set_json(json!({ "badge_code": $badge, "password": $password }))
                .to_request();
            let body: Value = test::call_and_read_body_json($app, req).await;
            body["data"]["token"].as_str().unwrap().to_string()
        }};
    }

    // Middleware rejections surface as errors rather than responses
    macro_rules! status_of {
        ($app:expr, $req:expr) => {
            match test::try_call_service($app, $req).await {
                Ok(resp) => resp.status(),
                Err(err) => err.as_response_error().status_code(),
            }
        };
    }

    fn bearer(token: &str) -> (header::HeaderName, String) {
        (header::AUTHORIZATION, format!("Bearer {}", token))
    }

    #[actix_rt::test]
    async fn test_floor_flow_over_http() {
        let app = app!();
        let admin = login!(&app, 0, "admin-pass-1");
        let operator = login!(&app, 7, "operator-pass-1");

        let req = test::TestRequest::post()
            .uri("/api/v1/productions")
            .insert_header(bearer(&admin))
            .set_json(json!({ "name": "Batch-A", "quantity": 2 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["units"][0]["code"], "P0001-001");
        assert_eq!(body["data"]["units"][1]["code"], "P0001-002");

        let req = test::TestRequest::post()
            .uri("/api/v1/tokens/generate")
            .insert_header(bearer(&admin))
            .set_json(json!({ "unit_code": "P0001-001", "pipeline": "kit" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let tokens = body["data"].as_array().unwrap();
        assert_eq!(tokens.len(), 2);
        let code_for = |process: &str| {
            tokens
                .iter()
                .find(|t| t["process"] == process)
                .and_then(|t| t["scan_code"].as_str())
                .unwrap()
                .to_string()
        };
        let (inv_code, scc_code) = (code_for("INV"), code_for("SCC"));

        let scan = |code: String| {
            test::TestRequest::post()
                .uri("/api/v1/scans")
                .insert_header(bearer(&operator))
                .set_json(json!({ "code": code }))
                .to_request()
        };
        let lines = || {
            test::TestRequest::get()
                .uri("/api/v1/lines")
                .insert_header(bearer(&operator))
                .to_request()
        };

        let body: Value = test::call_and_read_body_json(&app, scan(inv_code)).await;
        assert_eq!(body["data"]["first_completion"], true);
        assert_eq!(body["data"]["worker"], "Budi");

        let body: Value = test::call_and_read_body_json(&app, lines()).await;
        assert_eq!(body["data"]["lines"]["KIT"], json!({ "units": 0, "personnel": 0 }));

        test::call_service(&app, scan(scc_code)).await;
        let body: Value = test::call_and_read_body_json(&app, lines()).await;
        assert_eq!(body["data"]["lines"]["KIT"], json!({ "units": 1, "personnel": 1 }));

        let req = test::TestRequest::get()
            .uri("/api/v1/scans/log?unit_code=P0001-001")
            .insert_header(bearer(&operator))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let req = test::TestRequest::get()
            .uri("/api/v1/charts/months")
            .insert_header(bearer(&operator))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let months = body["data"].as_array().unwrap();
        assert_eq!(months.len(), 12);
        assert!(months[0].as_str().unwrap().ends_with("-01"));
    }

    #[actix_rt::test]
    async fn test_access_rules() {
        let app = app!();
        let operator = login!(&app, 7, "operator-pass-1");

        let req = test::TestRequest::get().uri("/api/v1/productions").to_request();
        assert_eq!(status_of!(&app, req), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/api/v1/productions")
            .insert_header(bearer(&operator))
            .set_json(json!({ "name": "Batch-A", "quantity": 2 }))
            .to_request();
        assert_eq!(status_of!(&app, req), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/api/v1/scans")
            .insert_header(bearer(&operator))
            .set_json(json!({ "code": "P9999-001-INV-0101" }))
            .to_request();
        assert_eq!(status_of!(&app, req), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get()
            .uri("/api/v1/scans/log")
            .insert_header(bearer(&operator))
            .to_request();
        assert_eq!(status_of!(&app, req), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(json!({ "badge_code": 7, "password": "wrong-password" }))
            .to_request();
        assert_eq!(status_of!(&app, req), StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn test_stream_endpoint_headers() {
        let app = app!();
        let operator = login!(&app, 7, "operator-pass-1");

        let req = test::TestRequest::get()
            .uri("/api/v1/lines/stream")
            .insert_header(bearer(&operator))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "text/event-stream");
        assert_eq!(resp.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache");
    }
}
