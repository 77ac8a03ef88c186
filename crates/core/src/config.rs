use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub llm: LlmConfig,
    pub auth: AuthConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: SecretString,
    pub issuer: String,
    pub audience: String,
    pub token_ttl_days: i64,
    pub guest_cookie_name: String,
    pub guest_cookie_ttl_days: i64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Memory,
    Redis,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Mistral,
    Ollama,
    Anthropic,
    Gemini,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Mistral => "mistral",
            Self::Ollama => "ollama",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Mistral => "https://api.mistral.ai/v1",
            Self::Ollama => "http://localhost:11434/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

impl LlmConfig {
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub cache_backend: Option<CacheBackend>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub jwt_secret: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://bazaar.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            cache: CacheConfig { backend: CacheBackend::Memory, redis_url: None },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: None,
                model: "llama3.1".to_string(),
                timeout_secs: 60,
                temperature: 0.3,
            },
            auth: AuthConfig {
                jwt_secret: String::new().into(),
                issuer: "bazaar".to_string(),
                audience: "bazaar-clients".to_string(),
                token_ttl_days: 7,
                guest_cookie_name: "guestId".to_string(),
                guest_cookie_ttl_days: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "mistral" => Ok(Self::Mistral),
            "ollama" => Ok(Self::Ollama),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|mistral|ollama|anthropic|gemini)"
            ))),
        }
    }
}

impl std::str::FromStr for CacheBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::Validation(format!(
                "unsupported cache backend `{other}` (expected memory|redis)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("bazaar.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(cache) = patch.cache {
            if let Some(backend) = cache.backend {
                self.cache.backend = backend;
            }
            if let Some(redis_url) = cache.redis_url {
                self.cache.redis_url = Some(redis_url);
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
        }

        if let Some(auth) = patch.auth {
            if let Some(jwt_secret_value) = auth.jwt_secret {
                self.auth.jwt_secret = secret_value(jwt_secret_value);
            }
            if let Some(issuer) = auth.issuer {
                self.auth.issuer = issuer;
            }
            if let Some(audience) = auth.audience {
                self.auth.audience = audience;
            }
            if let Some(token_ttl_days) = auth.token_ttl_days {
                self.auth.token_ttl_days = token_ttl_days;
            }
            if let Some(guest_cookie_name) = auth.guest_cookie_name {
                self.auth.guest_cookie_name = guest_cookie_name;
            }
            if let Some(guest_cookie_ttl_days) = auth.guest_cookie_ttl_days {
                self.auth.guest_cookie_ttl_days = guest_cookie_ttl_days;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("BAZAAR_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("BAZAAR_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("BAZAAR_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("BAZAAR_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("BAZAAR_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("BAZAAR_CACHE_BACKEND") {
            self.cache.backend = value.parse()?;
        }
        if let Some(value) = read_env("BAZAAR_CACHE_REDIS_URL").or_else(|| read_env("REDIS_URL")) {
            self.cache.redis_url = Some(value);
        }

        if let Some(value) = read_env("BAZAAR_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("BAZAAR_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("BAZAAR_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("BAZAAR_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("BAZAAR_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("BAZAAR_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("BAZAAR_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("BAZAAR_LLM_TEMPERATURE", &value)?;
        }

        if let Some(value) = read_env("BAZAAR_AUTH_JWT_SECRET") {
            self.auth.jwt_secret = secret_value(value);
        }
        if let Some(value) = read_env("BAZAAR_AUTH_ISSUER") {
            self.auth.issuer = value;
        }
        if let Some(value) = read_env("BAZAAR_AUTH_AUDIENCE") {
            self.auth.audience = value;
        }
        if let Some(value) = read_env("BAZAAR_AUTH_TOKEN_TTL_DAYS") {
            self.auth.token_ttl_days = parse_i64("BAZAAR_AUTH_TOKEN_TTL_DAYS", &value)?;
        }
        if let Some(value) = read_env("BAZAAR_AUTH_GUEST_COOKIE_NAME") {
            self.auth.guest_cookie_name = value;
        }
        if let Some(value) = read_env("BAZAAR_AUTH_GUEST_COOKIE_TTL_DAYS") {
            self.auth.guest_cookie_ttl_days =
                parse_i64("BAZAAR_AUTH_GUEST_COOKIE_TTL_DAYS", &value)?;
        }

        if let Some(value) = read_env("BAZAAR_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("BAZAAR_SERVER_PORT") {
            self.server.port = parse_u16("BAZAAR_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("BAZAAR_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("BAZAAR_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("BAZAAR_LOGGING_LEVEL").or_else(|| read_env("BAZAAR_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("BAZAAR_LOGGING_FORMAT").or_else(|| read_env("BAZAAR_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(cache_backend) = overrides.cache_backend {
            self.cache.backend = cache_backend;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(jwt_secret) = overrides.jwt_secret {
            self.auth.jwt_secret = secret_value(jwt_secret);
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_cache(&self.cache)?;
        validate_llm(&self.llm)?;
        validate_auth(&self.auth)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }

    /// Flat key/value view with secrets masked, for operator output.
    pub fn redacted_entries(&self) -> Vec<(&'static str, String)> {
        let mask = |present: bool| if present { "<redacted>" } else { "<unset>" }.to_string();
        vec![
            ("database.url", self.database.url.clone()),
            ("database.max_connections", self.database.max_connections.to_string()),
            ("database.timeout_secs", self.database.timeout_secs.to_string()),
            (
                "cache.backend",
                match self.cache.backend {
                    CacheBackend::Memory => "memory".to_string(),
                    CacheBackend::Redis => "redis".to_string(),
                },
            ),
            ("cache.redis_url", self.cache.redis_url.clone().unwrap_or_else(|| "<unset>".into())),
            ("llm.provider", self.llm.provider.as_str().to_string()),
            ("llm.base_url", self.llm.effective_base_url()),
            ("llm.model", self.llm.model.clone()),
            ("llm.api_key", mask(self.llm.api_key.is_some())),
            ("llm.timeout_secs", self.llm.timeout_secs.to_string()),
            ("llm.temperature", self.llm.temperature.to_string()),
            ("auth.jwt_secret", mask(!self.auth.jwt_secret.expose_secret().is_empty())),
            ("auth.issuer", self.auth.issuer.clone()),
            ("auth.audience", self.auth.audience.clone()),
            ("auth.token_ttl_days", self.auth.token_ttl_days.to_string()),
            ("auth.guest_cookie_name", self.auth.guest_cookie_name.clone()),
            ("server.bind_address", self.server.bind_address.clone()),
            ("server.port", self.server.port.to_string()),
            ("logging.level", self.logging.level.clone()),
        ]
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("bazaar.toml"), PathBuf::from("config/bazaar.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_cache(cache: &CacheConfig) -> Result<(), ConfigError> {
    if cache.backend == CacheBackend::Redis {
        let url = cache.redis_url.as_deref().map(str::trim).unwrap_or_default();
        if url.is_empty() {
            return Err(ConfigError::Validation(
                "cache.redis_url is required when cache.backend is redis".to_string(),
            ));
        }
        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(ConfigError::Validation(
                "cache.redis_url must start with redis:// or rediss://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if llm.provider.requires_api_key() {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(format!(
                "llm.api_key is required for the {} provider",
                llm.provider.as_str()
            )));
        }
    }

    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ConfigError> {
    let secret = auth.jwt_secret.expose_secret();
    if secret.trim().is_empty() {
        return Err(ConfigError::Validation(
            "auth.jwt_secret is required (set BAZAAR_AUTH_JWT_SECRET)".to_string(),
        ));
    }
    if secret.len() < 32 {
        return Err(ConfigError::Validation(
            "auth.jwt_secret must be at least 32 characters".to_string(),
        ));
    }

    if auth.issuer.trim().is_empty() || auth.audience.trim().is_empty() {
        return Err(ConfigError::Validation(
            "auth.issuer and auth.audience must not be empty".to_string(),
        ));
    }

    if auth.token_ttl_days <= 0 || auth.guest_cookie_ttl_days <= 0 {
        return Err(ConfigError::Validation(
            "auth token and guest cookie lifetimes must be positive".to_string(),
        ));
    }

    if auth.guest_cookie_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "auth.guest_cookie_name must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    cache: Option<CachePatch>,
    llm: Option<LlmPatch>,
    auth: Option<AuthPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CachePatch {
    backend: Option<CacheBackend>,
    redis_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthPatch {
    jwt_secret: Option<String>,
    issuer: Option<String>,
    audience: Option<String>,
    token_ttl_days: Option<i64>,
    guest_cookie_name: Option<String>,
    guest_cookie_ttl_days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        AppConfig, CacheBackend, ConfigError, ConfigOverrides, LlmProvider, LoadOptions,
        LogFormat,
    };

    const SECRET: &str = "test-secret-with-at-least-32-characters";

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_BAZAAR_JWT", SECRET);
        env::set_var("TEST_BAZAAR_LLM_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("bazaar.toml");
            fs::write(
                &path,
                r#"
[auth]
jwt_secret = "${TEST_BAZAAR_JWT}"

[llm]
provider = "mistral"
api_key = "${TEST_BAZAAR_LLM_KEY}"
model = "mistral-small-latest"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.auth.jwt_secret.expose_secret() == SECRET,
                "jwt secret should be interpolated from environment",
            )?;
            ensure(config.llm.provider == LlmProvider::Mistral, "provider should come from file")?;
            ensure(
                config.llm.effective_base_url() == "https://api.mistral.ai/v1",
                "mistral should default to its public endpoint",
            )?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string())
                    == Some("sk-from-env".to_string()),
                "api key should be interpolated from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_BAZAAR_JWT", "TEST_BAZAAR_LLM_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BAZAAR_AUTH_JWT_SECRET", SECRET);
        env::set_var("BAZAAR_LOG_LEVEL", "warn");
        env::set_var("BAZAAR_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["BAZAAR_AUTH_JWT_SECRET", "BAZAAR_LOG_LEVEL", "BAZAAR_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BAZAAR_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("BAZAAR_AUTH_ISSUER", "issuer-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("bazaar.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[auth]
jwt_secret = "file-secret-with-at-least-32-characters"
issuer = "issuer-from-file"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.auth.issuer == "issuer-from-env", "env issuer should win over file")?;
            ensure(
                config.auth.jwt_secret.expose_secret() == "file-secret-with-at-least-32-characters",
                "file secret should win over defaults",
            )?;
            ensure(config.auth.token_ttl_days == 7, "token lifetime defaults to seven days")?;
            ensure(config.llm.timeout_secs == 60, "llm timeout defaults to sixty seconds")?;
            Ok(())
        })();

        clear_vars(&["BAZAAR_DATABASE_URL", "BAZAAR_AUTH_ISSUER"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BAZAAR_AUTH_JWT_SECRET", "short");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("auth.jwt_secret")
            );
            ensure(has_message, "validation failure should mention auth.jwt_secret")
        })();

        clear_vars(&["BAZAAR_AUTH_JWT_SECRET"]);
        result
    }

    #[test]
    fn redis_backend_requires_url_and_hosted_providers_require_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BAZAAR_AUTH_JWT_SECRET", SECRET);

        let result = (|| -> Result<(), String> {
            let redis = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    cache_backend: Some(CacheBackend::Redis),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            });
            ensure(
                matches!(redis, Err(ConfigError::Validation(ref m)) if m.contains("cache.redis_url")),
                "redis backend without url should fail",
            )?;

            let hosted = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    llm_provider: Some(LlmProvider::Anthropic),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            });
            ensure(
                matches!(hosted, Err(ConfigError::Validation(ref m)) if m.contains("llm.api_key")),
                "anthropic without api key should fail",
            )?;
            Ok(())
        })();

        clear_vars(&["BAZAAR_AUTH_JWT_SECRET"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BAZAAR_AUTH_JWT_SECRET", "super-secret-signing-key-value-0123456789");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("super-secret-signing-key-value"),
                "debug output should not contain jwt secret",
            )?;
            ensure(
                config
                    .redacted_entries()
                    .iter()
                    .all(|(_, value)| !value.contains("super-secret-signing-key-value")),
                "redacted entries should mask jwt secret",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["BAZAAR_AUTH_JWT_SECRET"]);
        result
    }
}
