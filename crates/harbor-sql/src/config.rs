use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://harbor.db?mode=rwc";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_LEASE_DURATION_MS: i64 = 60_000;
pub const DEFAULT_QUERY_PAGE_SIZE: u32 = 50;

// Connection pool settings for the shared SQL backend.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    // postgres:// or sqlite: URL. May carry credentials; never log it.
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LeaseConfig {
    // Identity recorded as `leased_by` when this process claims work.
    pub holder_id: String,
    pub duration_ms: i64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            holder_id: default_holder_id(),
            duration_ms: DEFAULT_LEASE_DURATION_MS,
        }
    }
}

// Store settings sourced from environment variables.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub database: DatabaseConfig,
    pub lease: LeaseConfig,
    // Rows fetched per round trip by lazy query streams.
    pub query_page_size: u32,
    // Create missing tables on connect.
    pub create_schema: bool,
}

#[derive(Debug, Deserialize)]
struct StoreSettingsOverride {
    database_url: Option<String>,
    max_connections: Option<u32>,
    connect_timeout_ms: Option<u64>,
    acquire_timeout_ms: Option<u64>,
    lease_holder: Option<String>,
    lease_duration_ms: Option<i64>,
    query_page_size: Option<u32>,
    create_schema: Option<bool>,
}

impl StoreSettings {
    pub fn new(database: DatabaseConfig) -> Self {
        Self {
            database,
            lease: LeaseConfig::default(),
            query_page_size: DEFAULT_QUERY_PAGE_SIZE,
            create_schema: true,
        }
    }

    pub fn from_env() -> Result<Self> {
        let url = std::env::var("HARBOR_DATABASE_URL")
            .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let max_connections = env_number("HARBOR_DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS);
        let connect_timeout_ms =
            env_number("HARBOR_DB_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS);
        let acquire_timeout_ms =
            env_number("HARBOR_DB_ACQUIRE_TIMEOUT_MS", DEFAULT_ACQUIRE_TIMEOUT_MS);
        let holder_id = std::env::var("HARBOR_LEASE_HOLDER")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(default_holder_id);
        let duration_ms = env_number("HARBOR_LEASE_DURATION_MS", DEFAULT_LEASE_DURATION_MS);
        let query_page_size = env_number("HARBOR_QUERY_PAGE_SIZE", DEFAULT_QUERY_PAGE_SIZE);
        let create_schema = std::env::var("HARBOR_CREATE_SCHEMA")
            .ok()
            .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
            .unwrap_or(true);
        Ok(Self {
            database: DatabaseConfig {
                url,
                max_connections,
                connect_timeout_ms,
                acquire_timeout_ms,
            },
            lease: LeaseConfig {
                holder_id,
                duration_ms,
            },
            query_page_size,
            create_schema,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut settings = Self::from_env()?;
        if let Ok(path) = std::env::var("HARBOR_STORE_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read HARBOR_STORE_CONFIG: {path}"))?;
            let override_cfg: StoreSettingsOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse store config yaml")?;
            settings.apply(override_cfg);
        }
        Ok(settings)
    }

    fn apply(&mut self, override_cfg: StoreSettingsOverride) {
        if let Some(value) = override_cfg.database_url {
            self.database.url = value;
        }
        if let Some(value) = override_cfg.max_connections
            && value > 0
        {
            self.database.max_connections = value;
        }
        if let Some(value) = override_cfg.connect_timeout_ms
            && value > 0
        {
            self.database.connect_timeout_ms = value;
        }
        if let Some(value) = override_cfg.acquire_timeout_ms
            && value > 0
        {
            self.database.acquire_timeout_ms = value;
        }
        if let Some(value) = override_cfg.lease_holder
            && !value.trim().is_empty()
        {
            self.lease.holder_id = value;
        }
        if let Some(value) = override_cfg.lease_duration_ms
            && value > 0
        {
            self.lease.duration_ms = value;
        }
        if let Some(value) = override_cfg.query_page_size
            && value > 0
        {
            self.query_page_size = value;
        }
        if let Some(value) = override_cfg.create_schema {
            self.create_schema = value;
        }
    }
}

// Zero and unparsable values fall back to the default.
fn env_number<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default,
{
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .filter(|value| *value > T::default())
        .unwrap_or(default)
}

fn default_holder_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| format!("harbor-{}", uuid::Uuid::new_v4()))
}
