use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8001;
const DEFAULT_STORAGE_DIR: &str = "./data/uploads";
const DEFAULT_DATABASE_URL: &str = "sqlite://./data/meta/folio.db";
const DEFAULT_CV_URL: &str = "https://example.com/profile.pdf";
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Root for staged chunks (`tmp/`) and assembled uploads (`files/`).
    pub storage_dir: String,
    pub database_url: String,
    /// Target of the `GET /api/cv` redirect.
    pub cv_url: String,
    /// Allowed CORS origins; empty allows any origin.
    pub cors_origins: Vec<String>,
    /// Request body cap, applied to chunk uploads.
    pub max_body_bytes: usize,
    /// Reap upload sessions older than this many seconds. Unset disables reaping.
    pub reap_after_secs: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            storage_dir: DEFAULT_STORAGE_DIR.into(),
            database_url: DEFAULT_DATABASE_URL.into(),
            cv_url: DEFAULT_CV_URL.into(),
            cors_origins: Vec::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            reap_after_secs: None,
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Portfolio backend with chunked file uploads")]
pub struct Args {
    /// Host to bind to (overrides FOLIO_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FOLIO_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for staged chunks and assembled files (overrides FOLIO_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FOLIO_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// CV redirect target (overrides FOLIO_CV_URL)
    #[arg(long)]
    pub cv_url: Option<String>,

    /// Comma-separated CORS origins (overrides FOLIO_CORS_ORIGINS)
    #[arg(long)]
    pub cors_origins: Option<String>,

    /// Maximum request body size in bytes (overrides FOLIO_MAX_BODY_BYTES)
    #[arg(long)]
    pub max_body_bytes: Option<usize>,

    /// Reap abandoned upload sessions after this many seconds (overrides FOLIO_REAP_AFTER_SECS)
    #[arg(long)]
    pub reap_after_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let defaults = Self::default();

        // --- Environment fallback ---
        let env_host = env::var("FOLIO_HOST").unwrap_or(defaults.host);
        let env_port = env_parse("FOLIO_PORT")?.unwrap_or(defaults.port);
        let env_storage = env::var("FOLIO_STORAGE_DIR").unwrap_or(defaults.storage_dir);
        let env_db = env::var("FOLIO_DATABASE_URL").unwrap_or(defaults.database_url);
        let env_cv = env::var("FOLIO_CV_URL").unwrap_or(defaults.cv_url);
        let env_cors = env::var("FOLIO_CORS_ORIGINS").ok();
        let env_body = env_parse("FOLIO_MAX_BODY_BYTES")?.unwrap_or(defaults.max_body_bytes);
        let env_reap = env_parse("FOLIO_REAP_AFTER_SECS")?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            cv_url: args.cv_url.unwrap_or(env_cv),
            cors_origins: args
                .cors_origins
                .or(env_cors)
                .map(|raw| split_origins(&raw))
                .unwrap_or_default(),
            max_body_bytes: args.max_body_bytes.unwrap_or(env_body),
            reap_after_secs: args.reap_after_secs.or(env_reap),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an optional environment variable.
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_trimmed_and_blank_entries_dropped() {
        assert_eq!(
            split_origins(" https://a.dev, ,https://b.dev ,"),
            vec!["https://a.dev".to_string(), "https://b.dev".to_string()]
        );
        assert!(split_origins("").is_empty());
    }

    #[test]
    fn defaults_disable_reaping() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.reap_after_secs, None);
        assert_eq!(cfg.addr(), "0.0.0.0:8001");
    }
}
