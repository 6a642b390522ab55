//! Server configuration loaded from the environment.
//!
//! Every variable has a documented default so the server starts cleanly
//! against an empty `.env`; only `MEDIA_DIR` has no sane default and its
//! absence is a configuration error (exit code 1).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use viewer_config::duration_from_env;

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Read-only root of the media tree.
    pub media_dir: PathBuf,
    /// Root of the thumbnail/transcode cache (`{CACHE_DIR}/thumbnails`, `{CACHE_DIR}/transcoded`).
    pub cache_dir: PathBuf,
    /// Directory holding `media.db`.
    pub database_dir: PathBuf,
    /// HTTP listen port.
    pub port: u16,
    /// Prometheus exposition port. Same as `port` when `METRICS_ENABLED` is false.
    pub metrics_port: u16,
    /// Whether `/metrics` is served at all.
    pub metrics_enabled: bool,
    /// Full indexer cycle interval.
    pub index_interval: Duration,
    /// Poll indexer cycle interval.
    pub poll_interval: Duration,
    /// Background thumbnail sweep interval.
    pub thumbnail_interval: Duration,
    /// Indexer worker pool size.
    pub index_workers: usize,
    /// Sliding session lifetime.
    pub session_duration: Duration,
    /// Expired-session reaper interval.
    pub session_cleanup: Duration,
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_level: String,
    /// Whether static file responses are logged.
    pub log_static_files: bool,
    /// Whether `/health`, `/livez`, `/readyz` are logged.
    pub log_health_checks: bool,
    /// Explicit heap limit in bytes, if set (`GOMEMLIMIT`). Takes precedence
    /// over `container_limit_bytes`.
    pub memory_limit_bytes: Option<u64>,
    /// A container memory limit in bytes, if set (`MEMORY_LIMIT`). Scaled by
    /// `memory_ratio` to derive the heap limit when no explicit limit is set.
    pub container_limit_bytes: Option<u64>,
    /// Ratio applied to a container memory limit when no explicit limit is set.
    pub memory_ratio: f64,
    /// WebAuthn relying party id.
    pub webauthn_rp_id: String,
    /// WebAuthn relying party display name.
    pub webauthn_rp_name: String,
    /// Allowed WebAuthn origins.
    pub webauthn_origins: Vec<String>,
}

/// Configuration could not be resolved: an unwritable directory, an invalid
/// port, or a required variable missing its only non-defaultable value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `MEDIA_DIR` was not set.
    #[error("MEDIA_DIR must be set")]
    MissingMediaDir,
    /// A directory could not be created or is not writable.
    #[error("cannot prepare directory {path}: {source}")]
    Directory {
        /// The offending path.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A numeric env var failed to parse.
    #[error("invalid value for {var}: {raw:?}")]
    InvalidValue {
        /// The variable name.
        var: &'static str,
        /// The raw, unparseable value.
        raw: String,
    },
    /// A duration env var failed to parse.
    #[error(transparent)]
    Duration(#[from] viewer_config::DurationEnvError),
}

impl Config {
    /// Load configuration from the process environment, applying `.env` via
    /// `dotenvy` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let media_dir = env::var("MEDIA_DIR")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::MissingMediaDir)?;

        let cache_dir = env_path("CACHE_DIR", "./cache");
        let database_dir = env_path("DATABASE_DIR", "./data");

        let port = env_parsed("PORT", 8080u16)?;
        let metrics_enabled = env_bool("METRICS_ENABLED", true);
        let metrics_port = env_parsed("METRICS_PORT", port)?;

        let index_interval = duration_from_env("INDEX_INTERVAL", Duration::from_secs(30 * 60))?;
        let poll_interval = duration_from_env("POLL_INTERVAL", Duration::from_secs(30))?;
        let thumbnail_interval =
            duration_from_env("THUMBNAIL_INTERVAL", Duration::from_secs(6 * 60 * 60))?;
        let index_workers = env_parsed("INDEX_WORKERS", 3usize)?;

        let session_duration = duration_from_env("SESSION_DURATION", Duration::from_secs(24 * 60 * 60))?;
        let session_cleanup = duration_from_env("SESSION_CLEANUP", Duration::from_secs(60 * 60))?;

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_static_files = env_bool("LOG_STATIC_FILES", false);
        let log_health_checks = env_bool("LOG_HEALTH_CHECKS", false);

        let memory_limit_bytes = env::var("GOMEMLIMIT")
            .ok()
            .map(|raw| parse_byte_size(&raw))
            .transpose()
            .map_err(|raw| ConfigError::InvalidValue { var: "GOMEMLIMIT", raw })?;
        let container_limit_bytes = env::var("MEMORY_LIMIT")
            .ok()
            .map(|raw| parse_byte_size(&raw))
            .transpose()
            .map_err(|raw| ConfigError::InvalidValue { var: "MEMORY_LIMIT", raw })?;
        let memory_ratio = env_parsed("MEMORY_RATIO", 0.85f64)?.clamp(f64::EPSILON, 1.0);

        let webauthn_rp_id = env::var("WEBAUTHN_RP_ID").unwrap_or_else(|_| "localhost".to_string());
        let webauthn_rp_name =
            env::var("WEBAUTHN_RP_NAME").unwrap_or_else(|_| "Media Viewer".to_string());
        let webauthn_origins = env::var("WEBAUTHN_ORIGINS")
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|_| vec![format!("http://localhost:{port}")]);

        Ok(Self {
            media_dir,
            cache_dir,
            database_dir,
            port,
            metrics_port,
            metrics_enabled,
            index_interval,
            poll_interval,
            thumbnail_interval,
            index_workers,
            session_duration,
            session_cleanup,
            log_level,
            log_static_files,
            log_health_checks,
            memory_limit_bytes,
            container_limit_bytes,
            memory_ratio,
            webauthn_rp_id,
            webauthn_rp_name,
            webauthn_origins,
        })
    }

    /// Create the cache and database directories if they don't exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [
            &self.cache_dir,
            &self.cache_dir.join("thumbnails"),
            &self.cache_dir.join("transcoded"),
            &self.database_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Directory {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Path to the SQLite database file.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database_dir.join("media.db")
    }

    /// Path to the thumbnail cache root.
    #[must_use]
    pub fn thumbnail_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("thumbnails")
    }

    /// `session_duration` as a `chrono::Duration`, for sliding-renewal
    /// comparisons against timestamp fields.
    #[must_use]
    pub fn session_duration_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.session_duration).unwrap_or(chrono::Duration::hours(24))
    }
}

fn env_path(var: &str, default: &str) -> PathBuf {
    env::var(var).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn env_bool(var: &str, default: bool) -> bool {
    env::var(var)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue { var, raw }),
        Err(_) => Ok(default),
    }
}

fn parse_byte_size(raw: &str) -> Result<u64, String> {
    let raw = raw.trim();
    let (num, mult): (&str, u64) = if let Some(n) = raw.strip_suffix("GiB").or_else(|| raw.strip_suffix("G")) {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = raw.strip_suffix("MiB").or_else(|| raw.strip_suffix("M")) {
        (n, 1024 * 1024)
    } else if let Some(n) = raw.strip_suffix("KiB").or_else(|| raw.strip_suffix("K")) {
        (n, 1024)
    } else {
        (raw, 1)
    };
    num.trim().parse::<u64>().map(|v| v * mult).map_err(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_parses_suffixes() {
        assert_eq!(parse_byte_size("512").unwrap(), 512);
        assert_eq!(parse_byte_size("2GiB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_byte_size("256MiB").unwrap(), 256 * 1024 * 1024);
    }

    #[test]
    fn byte_size_rejects_garbage() {
        assert!(parse_byte_size("not-a-size").is_err());
    }
}
