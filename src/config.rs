// src/config.rs - Configuration management
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fs;
use std::path::Path;
use anyhow::{Context, Result};
use chrono::FixedOffset;
use rand::{thread_rng, Rng, distributions::Alphanumeric};

use crate::models::Process;
use crate::shift::{parse_utc_offset, ShiftCalendar};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub tracking: TrackingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub keep_alive: u64,
    pub client_timeout: u64,
    pub client_shutdown: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiration_hours: i64,
    pub bcrypt_cost: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub max_request_size: usize,
    pub require_https: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LineConfig {
    pub name: String,
    pub processes: Vec<Process>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrackingConfig {
    /// Deployment time zone as a fixed UTC offset, e.g. "+07:00".
    pub utc_offset: String,
    pub day_start_hour: u32,
    pub summary_interval_secs: u64,
    pub log_interval_secs: u64,
    pub unit_code_prefix: String,
    pub default_pipeline: String,
    pub pipelines: BTreeMap<String, Vec<Process>>,
    pub lines: Vec<LineConfig>,
    pub checklist_fields: Vec<String>,
}

// Dummy defaults for tests (no ENV read here)
impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dummy_32_chars_for_tests_only!!!".to_string(),
            token_expiration_hours: 12,
            bcrypt_cost: 10,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: None,
            keep_alive: 30,
            client_timeout: 30,
            client_shutdown: 5,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:prodtrack.db".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: 30,
            idle_timeout: 600,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
                "http://localhost:8080".to_string(),
                "http://127.0.0.1:8080".to_string(),
            ],
            max_request_size: 1024 * 1024,
            require_https: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        use Process::*;

        let mut pipelines = BTreeMap::new();
        pipelines.insert("full".to_string(), vec![Inv, Scc, Batt, Pd, Pb, Wd, Wb, Qc, Pack]);
        pipelines.insert("assy".to_string(), vec![Inv, Scc, Batt, Pd, Pb]);

        Self {
            utc_offset: "+07:00".to_string(),
            day_start_hour: 6,
            summary_interval_secs: 5,
            log_interval_secs: 2,
            unit_code_prefix: "P".to_string(),
            default_pipeline: "full".to_string(),
            pipelines,
            lines: vec![
                LineConfig { name: "ASSY".to_string(), processes: vec![Inv, Scc, Batt, Pd, Pb] },
                LineConfig { name: "WIRING".to_string(), processes: vec![Wd, Wb] },
                LineConfig { name: "QC".to_string(), processes: vec![Qc] },
                LineConfig { name: "PACK".to_string(), processes: vec![Pack] },
            ],
            checklist_fields: ["uji_input", "uji_output", "uji_ac", "uji_kabel", "labelling"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
        }
    }
}

impl TrackingConfig {
    pub fn offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.utc_offset).map_err(|e| anyhow::anyhow!(e))
    }

    pub fn calendar(&self) -> Result<ShiftCalendar<FixedOffset>> {
        Ok(ShiftCalendar::new(self.offset()?, self.day_start_hour))
    }

    pub fn pipeline(&self, name: Option<&str>) -> Option<&[Process]> {
        let name = name.unwrap_or(self.default_pipeline.as_str());
        self.pipelines.get(name).map(|p| p.as_slice())
    }

    fn validate(&self) -> Result<()> {
        self.offset().context("tracking.utc_offset")?;

        if self.day_start_hour > 23 {
            return Err(anyhow::anyhow!(
                "tracking.day_start_hour must be 0..=23 (current: {})",
                self.day_start_hour
            ));
        }
        if self.summary_interval_secs == 0 || self.log_interval_secs == 0 {
            return Err(anyhow::anyhow!("Stream intervals must be at least one second"));
        }
        if self.unit_code_prefix.contains(char::is_whitespace) {
            return Err(anyhow::anyhow!("tracking.unit_code_prefix must not contain whitespace"));
        }

        for (name, processes) in &self.pipelines {
            if processes.is_empty() {
                return Err(anyhow::anyhow!("Pipeline '{}' has no processes", name));
            }
            let unique: HashSet<_> = processes.iter().collect();
            if unique.len() != processes.len() {
                return Err(anyhow::anyhow!("Pipeline '{}' lists a process twice", name));
            }
        }
        if !self.pipelines.contains_key(&self.default_pipeline) {
            return Err(anyhow::anyhow!(
                "Default pipeline '{}' is not defined",
                self.default_pipeline
            ));
        }

        let mut line_names = HashSet::new();
        for line in &self.lines {
            if line.processes.is_empty() {
                return Err(anyhow::anyhow!("Line '{}' has no processes", line.name));
            }
            if !line_names.insert(line.name.as_str()) {
                return Err(anyhow::anyhow!("Line '{}' is defined twice", line.name));
            }
        }

        let mut fields = HashSet::new();
        for field in &self.checklist_fields {
            if field.trim().is_empty() {
                return Err(anyhow::anyhow!("Checklist field names must not be empty"));
            }
            if !fields.insert(field.as_str()) {
                return Err(anyhow::anyhow!("Checklist field '{}' is listed twice", field));
            }
        }

        Ok(())
    }
}

// Генерация безопасного JWT секрета
pub fn generate_jwt_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

pub fn load_config() -> Result<Config> {
    load_env_file()?;

    let mut config = match env::var("CONFIG_FILE") {
        Ok(config_file) => load_from_file(Path::new(&config_file))?,
        Err(_) => Config::default(),
    };

    override_with(&mut config, |key| env::var(key).ok());

    config.validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

pub fn load_from_file(path: &Path) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Applies environment overrides. `lookup` is `std::env::var` outside tests.
fn override_with<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("BIND_ADDRESS") {
        config.server.host = host;
    }
    if let Some(port) = lookup("PRODTRACK_PORT").and_then(|v| v.parse::<u16>().ok()) {
        config.server.port = port;
    }
    if let Some(workers) = lookup("PRODTRACK_WORKERS").and_then(|v| v.parse::<usize>().ok()) {
        config.server.workers = Some(workers);
    }
    if let Some(jwt_secret) = lookup("JWT_SECRET") {
        config.auth.jwt_secret = jwt_secret;
    }
    if let Some(url) = lookup("DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(max_conn) = lookup("DATABASE_MAX_CONNECTIONS").and_then(|v| v.parse::<u32>().ok()) {
        config.database.max_connections = max_conn;
    }
    if let Some(origins_str) = lookup("ALLOWED_ORIGINS") {
        config.security.allowed_origins = origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Some(level) = lookup("RUST_LOG") {
        config.logging.level = level;
    }
    if let Some(offset) = lookup("APP_UTC_OFFSET") {
        config.tracking.utc_offset = offset;
    }
    if let Some(hour) = lookup("DAY_START_HOUR").and_then(|v| v.parse::<u32>().ok()) {
        config.tracking.day_start_hour = hour;
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 characters long (current: {})",
                self.auth.jwt_secret.len()
            ));
        }

        if self.database.max_connections < self.database.min_connections {
            return Err(anyhow::anyhow!(
                "max_connections ({}) must be >= min_connections ({})",
                self.database.max_connections,
                self.database.min_connections
            ));
        }

        self.tracking.validate()
    }

    pub fn is_production(&self) -> bool {
        env::var("PRODTRACK_ENV").map(|v| v == "production").unwrap_or(false)
    }

    pub fn print_startup_info(&self) {
        log::info!("🏭 prodtrack starting up...");
        log::info!("🌐 Server: {}:{}", self.server.host, self.server.port);
        log::info!("💾 Database: {}", self.database.url);
        log::info!("🔒 Auth: JWT ({}h expiration)", self.auth.token_expiration_hours);
        log::info!(
            "🕕 Production day starts {:02}:00 at UTC{}",
            self.tracking.day_start_hour,
            self.tracking.utc_offset
        );
        log::info!(
            "📊 Lines: {}",
            self.tracking.lines.iter().map(|l| l.name.as_str()).collect::<Vec<_>>().join(", ")
        );

        if !self.is_production() {
            log::warn!("🚧 Running in development mode");
        }
        if !self.security.require_https && self.is_production() {
            log::warn!("⚠️  HTTPS not required in production mode");
        }
    }
}

pub fn load_env_file() -> Result<()> {
    if let Ok(env_file) = env::var("ENV_FILE") {
        dotenvy::from_filename(&env_file)
            .with_context(|| format!("Failed to load environment file: {}", env_file))?;
    } else if Path::new(".env").exists() {
        dotenvy::dotenv().context("Failed to load .env file")?;
    }
    Ok(())
}
