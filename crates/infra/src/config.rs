//! Application configuration.
//!
//! Resolution order:
//!
//! 1. Built-in defaults.
//! 2. `config/<env>.toml`, where `<env>` is `WARDEN_ENV` (default `local`).
//!    A missing file is not an error.
//! 3. `WARDEN_*` environment variables, e.g. `WARDEN_APP_PORT=9000`,
//!    `WARDEN_CACHE_BACKEND=redis`, `WARDEN_DATABASE_URL=postgres://...`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const ENV_PREFIX: &str = "WARDEN";

const DEV_SECRET: &str = "warden-insecure-dev-secret";

/// Upper bound for every TTL setting (ten years).
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid value for {var}: {message}")]
    InvalidEnvVar { var: String, message: String },

    #[error("invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Order of handler execution relative to the authorization stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOrder {
    /// Run the handler, then decide whether its result may be returned.
    #[default]
    ExecuteThenAuthorize,
    /// Gate first; the handler only runs for authorized calls.
    AuthorizeThenExecute,
}

/// What to do when permission rules cannot be loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupFailurePolicy {
    /// Treat every procedure as public.
    #[default]
    FailOpen,
    /// Reject every call as unavailable.
    FailClosed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

macro_rules! impl_from_str_snake {
    ($ty:ty { $($text:literal => $variant:expr),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($variant),)+
                    other => Err(format!("unknown value '{other}'")),
                }
            }
        }
    };
}

impl_from_str_snake!(ExecutionOrder {
    "execute_then_authorize" => ExecutionOrder::ExecuteThenAuthorize,
    "authorize_then_execute" => ExecutionOrder::AuthorizeThenExecute,
});

impl_from_str_snake!(LookupFailurePolicy {
    "fail_open" => LookupFailurePolicy::FailOpen,
    "fail_closed" => LookupFailurePolicy::FailClosed,
});

impl_from_str_snake!(CacheBackend {
    "memory" => CacheBackend::Memory,
    "redis" => CacheBackend::Redis,
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// HMAC key for credential signing.
    pub secret: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "warden".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            secret: DEV_SECRET.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub leeway_secs: u64,
    pub track_sessions: bool,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            access_ttl_secs: 3600,
            refresh_ttl_secs: 86400,
            leeway_secs: 0,
            track_sessions: false,
        }
    }
}

impl AuthSection {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorSection {
    pub order: ExecutionOrder,
    pub on_lookup_failure: LookupFailurePolicy,
    pub single_flight: bool,
    pub audit: bool,
    pub audit_queue_capacity: usize,
}

impl Default for InterceptorSection {
    fn default() -> Self {
        Self {
            order: ExecutionOrder::default(),
            on_lookup_failure: LookupFailurePolicy::default(),
            single_flight: false,
            audit: true,
            audit_queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub backend: CacheBackend,
    pub redis_url: String,
    pub permissions_ttl_secs: u64,
    pub store_timeout_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            redis_url: "redis://localhost:6379".to_string(),
            permissions_ttl_secs: 7 * 24 * 60 * 60,
            store_timeout_ms: 2000,
        }
    }
}

impl CacheSection {
    pub fn permissions_ttl(&self) -> Duration {
        Duration::from_secs(self.permissions_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// Postgres URL; in-memory stores are used when absent.
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub filter: String,
    pub json: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub auth: AuthSection,
    pub interceptor: InterceptorSection,
    pub cache: CacheSection,
    pub database: DatabaseSection,
    pub log: LogSection,
}

impl AppConfig {
    /// Load `config/<WARDEN_ENV>.toml` (if present) and apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var(format!("{ENV_PREFIX}_ENV")).unwrap_or_else(|_| "local".to_string());
        let path = PathBuf::from("config").join(format!("{env}.toml"));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        config.warn_on_weak_secret();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Apply `WARDEN_<SECTION>_<FIELD>` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| format!("{ENV_PREFIX}_{name}");
        let get = |name: &str| lookup(&var(name));

        if let Some(v) = get("APP_NAME") {
            self.app.name = v;
        }
        if let Some(v) = get("APP_HOST") {
            self.app.host = v;
        }
        if let Some(v) = get("APP_PORT") {
            self.app.port = parse(&var("APP_PORT"), &v)?;
        }
        if let Some(v) = get("APP_SECRET") {
            self.app.secret = v;
        }

        if let Some(v) = get("AUTH_ACCESS_TTL_SECS") {
            self.auth.access_ttl_secs = parse(&var("AUTH_ACCESS_TTL_SECS"), &v)?;
        }
        if let Some(v) = get("AUTH_REFRESH_TTL_SECS") {
            self.auth.refresh_ttl_secs = parse(&var("AUTH_REFRESH_TTL_SECS"), &v)?;
        }
        if let Some(v) = get("AUTH_LEEWAY_SECS") {
            self.auth.leeway_secs = parse(&var("AUTH_LEEWAY_SECS"), &v)?;
        }
        if let Some(v) = get("AUTH_TRACK_SESSIONS") {
            self.auth.track_sessions = parse(&var("AUTH_TRACK_SESSIONS"), &v)?;
        }

        if let Some(v) = get("INTERCEPTOR_ORDER") {
            self.interceptor.order = parse(&var("INTERCEPTOR_ORDER"), &v)?;
        }
        if let Some(v) = get("INTERCEPTOR_ON_LOOKUP_FAILURE") {
            self.interceptor.on_lookup_failure = parse(&var("INTERCEPTOR_ON_LOOKUP_FAILURE"), &v)?;
        }
        if let Some(v) = get("INTERCEPTOR_SINGLE_FLIGHT") {
            self.interceptor.single_flight = parse(&var("INTERCEPTOR_SINGLE_FLIGHT"), &v)?;
        }
        if let Some(v) = get("INTERCEPTOR_AUDIT") {
            self.interceptor.audit = parse(&var("INTERCEPTOR_AUDIT"), &v)?;
        }
        if let Some(v) = get("INTERCEPTOR_AUDIT_QUEUE_CAPACITY") {
            self.interceptor.audit_queue_capacity =
                parse(&var("INTERCEPTOR_AUDIT_QUEUE_CAPACITY"), &v)?;
        }

        if let Some(v) = get("CACHE_BACKEND") {
            self.cache.backend = parse(&var("CACHE_BACKEND"), &v)?;
        }
        if let Some(v) = get("CACHE_REDIS_URL") {
            self.cache.redis_url = v;
        }
        if let Some(v) = get("CACHE_PERMISSIONS_TTL_SECS") {
            self.cache.permissions_ttl_secs = parse(&var("CACHE_PERMISSIONS_TTL_SECS"), &v)?;
        }
        if let Some(v) = get("CACHE_STORE_TIMEOUT_MS") {
            self.cache.store_timeout_ms = parse(&var("CACHE_STORE_TIMEOUT_MS"), &v)?;
        }

        if let Some(v) = get("DATABASE_URL") {
            self.database.url = (!v.trim().is_empty()).then_some(v);
        }

        if let Some(v) = get("LOG_FILTER") {
            self.log.filter = v;
        }
        if let Some(v) = get("LOG_JSON") {
            self.log.json = parse(&var("LOG_JSON"), &v)?;
        }

        Ok(())
    }

    /// Reject TTLs outside `1..=MAX_TTL_SECS`; larger values overflow
    /// timestamp arithmetic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ttl("auth.access_ttl_secs", self.auth.access_ttl_secs)?;
        check_ttl("auth.refresh_ttl_secs", self.auth.refresh_ttl_secs)?;
        check_ttl("cache.permissions_ttl_secs", self.cache.permissions_ttl_secs)?;
        if self.auth.leeway_secs > MAX_TTL_SECS {
            return Err(ConfigError::Invalid {
                field: "auth.leeway_secs",
                message: format!("must not exceed {MAX_TTL_SECS}"),
            });
        }
        Ok(())
    }

    pub fn has_dev_secret(&self) -> bool {
        self.app.secret == DEV_SECRET
    }

    fn warn_on_weak_secret(&self) {
        if self.has_dev_secret() {
            warn!("{ENV_PREFIX}_APP_SECRET not set; using insecure dev default");
        } else if self.app.secret.len() < 32 {
            warn!(len = self.app.secret.len(), "app secret is shorter than 32 bytes");
        }
    }
}

fn check_ttl(field: &'static str, secs: u64) -> Result<(), ConfigError> {
    if (1..=MAX_TTL_SECS).contains(&secs) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            message: format!("{secs} is outside 1..={MAX_TTL_SECS}"),
        })
    }
}

fn parse<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.auth.access_ttl(), Duration::from_secs(3600));
        assert_eq!(config.auth.refresh_ttl(), Duration::from_secs(86400));
        assert_eq!(config.cache.permissions_ttl(), Duration::from_secs(604800));
        assert_eq!(config.cache.store_timeout(), Duration::from_secs(2));
        assert_eq!(config.interceptor.order, ExecutionOrder::ExecuteThenAuthorize);
        assert_eq!(config.interceptor.on_lookup_failure, LookupFailurePolicy::FailOpen);
        assert!(config.database.url.is_none());
        assert!(config.has_dev_secret());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [app]
            port = 9090
            secret = "from-file"

            [interceptor]
            order = "authorize_then_execute"
            on_lookup_failure = "fail_closed"

            [cache]
            backend = "redis"
            "#,
        )
        .unwrap();

        assert_eq!(config.app.port, 9090);
        assert_eq!(config.app.name, "warden");
        assert_eq!(config.interceptor.order, ExecutionOrder::AuthorizeThenExecute);
        assert_eq!(config.interceptor.on_lookup_failure, LookupFailurePolicy::FailClosed);
        assert_eq!(config.cache.backend, CacheBackend::Redis);
        assert_eq!(config.auth.access_ttl_secs, 3600);
    }

    #[test]
    fn unknown_enum_value_is_a_parse_error() {
        assert!(AppConfig::from_toml("[interceptor]\norder = \"sometimes\"").is_err());
    }

    #[test]
    fn env_overrides_win() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(env(&[
                ("WARDEN_APP_PORT", "9000"),
                ("WARDEN_APP_SECRET", "s3cret"),
                ("WARDEN_AUTH_TRACK_SESSIONS", "true"),
                ("WARDEN_INTERCEPTOR_ON_LOOKUP_FAILURE", "FAIL_CLOSED"),
                ("WARDEN_DATABASE_URL", "postgres://localhost/warden"),
            ]))
            .unwrap();

        assert_eq!(config.app.port, 9000);
        assert_eq!(config.app.secret, "s3cret");
        assert!(config.auth.track_sessions);
        assert_eq!(config.interceptor.on_lookup_failure, LookupFailurePolicy::FailClosed);
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/warden"));
    }

    #[test]
    fn invalid_override_names_the_variable() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(env(&[("WARDEN_APP_PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { ref var, .. } if var == "WARDEN_APP_PORT"));
    }

    #[test]
    fn defaults_pass_validation() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn oversized_ttls_are_rejected() {
        for (var, field) in [
            ("WARDEN_AUTH_ACCESS_TTL_SECS", "auth.access_ttl_secs"),
            ("WARDEN_AUTH_REFRESH_TTL_SECS", "auth.refresh_ttl_secs"),
            ("WARDEN_CACHE_PERMISSIONS_TTL_SECS", "cache.permissions_ttl_secs"),
        ] {
            let mut config = AppConfig::default();
            config
                .apply_overrides(env(&[(var, "18446744073709551615")]))
                .unwrap();
            let err = config.validate().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { field: f, .. } if f == field));
        }
    }

    #[test]
    fn zero_ttl_is_rejected_and_max_is_accepted() {
        let mut config = AppConfig::default();
        config.auth.access_ttl_secs = 0;
        assert!(config.validate().is_err());

        config.auth.access_ttl_secs = MAX_TTL_SECS;
        config.auth.leeway_secs = MAX_TTL_SECS;
        config.validate().unwrap();

        config.auth.leeway_secs = MAX_TTL_SECS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_database_url_means_in_memory() {
        let mut config = AppConfig::default();
        config.apply_overrides(env(&[("WARDEN_DATABASE_URL", " ")])).unwrap();
        assert!(config.database.url.is_none());
    }
}
