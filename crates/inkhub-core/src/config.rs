// Configuration loading and parsing (server.toml, credentials.toml).

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub ws_port: u16,
    pub db_path: String,
    pub public_url: String,
    pub uploads: UploadsConfig,
    pub auth: AuthConfig,
    pub payments: PaymentsConfig,
    pub credentials: CredentialsConfig,
}

// ---------------------------------------------------------------------------
// server.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire server.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ServerFile {
    http: HttpSection,
    websocket: WebsocketSection,
    database: DatabaseSection,
    app: AppSection,
    uploads: UploadsConfig,
    auth: AuthConfig,
    payments: PaymentsConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct HttpSection {
    port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct WebsocketSection {
    port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AppSection {
    public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadsConfig {
    pub dir: String,
    pub max_kb: u64,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub verification_code_ttl_hours: i64,
    pub backfill_code_ttl_days: i64,
    pub password_reset_ttl_minutes: i64,
    pub page_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    pub down_payment_percent: u8,
    pub currency: String,
    pub base_url: String,
    pub payment_methods: Vec<String>,
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub paymongo_secret_key: Option<String>,
    pub paymongo_webhook_secret: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Read `config/server.toml` and, when present, `config/credentials.toml`
/// under `base_dir`, then validate. Never touches `defaults/`.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let dir = base_dir.join("config");
    let server: ServerFile = parse_toml(&dir.join("server.toml"))?;

    let credentials_path = dir.join("credentials.toml");
    let credentials = if credentials_path.is_file() {
        parse_toml(&credentials_path)?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        http_port: server.http.port,
        ws_port: server.websocket.port,
        db_path: server.database.path,
        public_url: server.app.public_url,
        uploads: server.uploads,
        auth: server.auth,
        payments: server.payments,
        credentials,
    };
    validate(&config)?;
    Ok(config)
}

/// Seed `config/` from `defaults/`. Existing files are left alone and
/// `*.example` templates are never copied. Returns the files written.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults.is_dir() {
        if config_dir.is_dir() {
            return Ok(Vec::new());
        }
        return Err(copy_failed(format!(
            "no defaults/ or config/ under {}",
            base_dir.display()
        )));
    }
    std::fs::create_dir_all(&config_dir)
        .map_err(|e| copy_failed(format!("cannot create {}: {e}", config_dir.display())))?;

    let listing = std::fs::read_dir(&defaults)
        .map_err(|e| copy_failed(format!("cannot list {}: {e}", defaults.display())))?;
    let mut sources: Vec<PathBuf> = listing
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) != Some("example"))
        .collect();
    sources.sort();

    let mut written = Vec::new();
    for source in sources {
        let Some(name) = source.file_name() else {
            continue;
        };
        let target = config_dir.join(name);
        if copy_if_absent(&source, &target)? {
            written.push(target);
        }
    }
    Ok(written)
}

/// Copy `source` to `target` unless `target` already exists.
fn copy_if_absent(source: &Path, target: &Path) -> Result<bool, ConfigError> {
    use std::io::Write;

    let mut file = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(copy_failed(format!("cannot create {}: {e}", target.display()))),
    };
    let bytes = std::fs::read(source)
        .map_err(|e| copy_failed(format!("cannot read {}: {e}", source.display())))?;
    file.write_all(&bytes)
        .map_err(|e| copy_failed(format!("cannot write {}: {e}", target.display())))?;
    Ok(true)
}

/// [`ensure_config_files`] then [`load_config_from`].
pub fn load_config(base_dir: &Path) -> Result<Config, ConfigError> {
    ensure_config_files(base_dir)?;
    load_config_from(base_dir)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseError {
        path: path.to_path_buf(),
        source,
    })
}

fn copy_failed(message: String) -> ConfigError {
    ConfigError::DefaultsCopyError { message }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.http_port == 0 {
        return Err(invalid("http.port", "must be greater than 0"));
    }
    if config.ws_port == 0 {
        return Err(invalid("websocket.port", "must be greater than 0"));
    }
    if config.http_port == config.ws_port {
        return Err(invalid(
            "websocket.port",
            format!("must differ from http.port ({})", config.http_port),
        ));
    }

    let pct = config.payments.down_payment_percent;
    if !(1..=99).contains(&pct) {
        return Err(invalid(
            "payments.down_payment_percent",
            format!("must be between 1 and 99 inclusive, got {pct}"),
        ));
    }

    if config.uploads.max_kb == 0 {
        return Err(invalid("uploads.max_kb", "must be > 0"));
    }
    if config.uploads.allowed_extensions.is_empty() {
        return Err(invalid("uploads.allowed_extensions", "must not be empty"));
    }

    let auth = &config.auth;
    let ttl_fields: &[(&str, i64)] = &[
        ("auth.verification_code_ttl_hours", auth.verification_code_ttl_hours),
        ("auth.backfill_code_ttl_days", auth.backfill_code_ttl_days),
        ("auth.password_reset_ttl_minutes", auth.password_reset_ttl_minutes),
    ];
    for (name, val) in ttl_fields {
        if *val <= 0 {
            return Err(invalid(name, format!("must be > 0, got {val}")));
        }
    }
    if auth.page_size == 0 {
        return Err(invalid("auth.page_size", "must be > 0"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
