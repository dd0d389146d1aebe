//! Run configuration, read once from the environment at startup.
//!
//! Settings come from the environment here and nowhere else: the engine, the record sources
//! and the report writer all receive the pieces of [`AppConfig`] they need
//! by reference.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::SetupError;
use crate::util::env::{env_flag, env_opt, env_parse_strict};

pub const DEFAULT_MAX_CONCURRENCY: usize = 10;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 1_000;
pub const DEFAULT_REQUEST_DELAY_SECS: f64 = 1.0;
pub const DEFAULT_RECORD_LIMIT: u32 = 100;
pub const DEFAULT_DB_PORT: u16 = 1433;
pub const DEFAULT_TENANT_ID: &str = "2";
/// Media resource whose images are migrated when `MEDIA_RESOURCE_ID` is unset.
pub const DEFAULT_MEDIA_RESOURCE_ID: &str = "68920485-d222-4ff0-b947-e0340d77b56a";

/// Knobs of the transfer engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferConfig {
    /// Records allowed in flight at once.
    pub max_concurrency: usize,
    /// Download+upload cycles per record, first one included.
    pub max_attempts: u32,
    /// Per-request timeout, download and upload alike.
    pub request_timeout: Duration,
    /// Delay after the first failed attempt; doubles each further attempt.
    pub base_backoff: Duration,
    /// Sleep before every outbound request.
    pub request_delay: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            base_backoff: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
            request_delay: Duration::from_secs_f64(DEFAULT_REQUEST_DELAY_SECS),
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.max_concurrency == 0 {
            return Err(SetupError::config("MAX_CONCURRENCY must be greater than 0"));
        }
        if self.max_attempts == 0 {
            return Err(SetupError::config("MAX_ATTEMPTS must be at least 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(SetupError::config("REQUEST_TIMEOUT_MS must be greater than 0"));
        }
        Ok(())
    }
}

/// SQL Server connection settings.
#[derive(Clone, PartialEq)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub trust_cert: bool,
}

// Keep the password out of logs.
impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("trust_cert", &self.trust_cert)
            .finish()
    }
}

impl DbConfig {
    fn from_env() -> Result<Self, SetupError> {
        let server = required("DB_SERVER")?;
        let (host, port) = split_server(&server)?;
        let port = match port {
            Some(p) => p,
            None => env_parse_strict("DB_PORT", DEFAULT_DB_PORT).map_err(config_err)?,
        };
        Ok(Self {
            host,
            port,
            database: required("DB_DATABASE")?,
            username: required("DB_USERNAME")?,
            password: required("DB_PASSWORD")?,
            trust_cert: env_flag("DB_TRUST_CERT", true),
        })
    }
}

/// Destination storage API.
#[derive(Clone, PartialEq)]
pub struct UploadConfig {
    pub url: Url,
    pub api_key: String,
    pub tenant_id: String,
}

impl fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadConfig")
            .field("url", &self.url.as_str())
            .field("api_key", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// `None` when records come from somewhere other than SQL Server.
    pub database: Option<DbConfig>,
    pub upload: UploadConfig,
    pub transfer: TransferConfig,
    pub download_path: PathBuf,
    pub report_path: PathBuf,
    pub log_file: PathBuf,
    pub record_limit: u32,
    /// Filters the SQL Server query.
    pub media_resource_id: String,
}

impl AppConfig {
    /// Read every setting from the environment (after `.env` loading).
    ///
    /// Database keys are only required when `require_database` is set; a
    /// run fed from a CSV file needs no SQL Server credentials.
    pub fn from_env(require_database: bool) -> Result<Self, SetupError> {
        let database = if require_database {
            Some(DbConfig::from_env()?)
        } else {
            None
        };

        let raw_url = required("UPLOAD_URL")?;
        let url = parse_upload_url(&raw_url)?;
        let upload = UploadConfig {
            url,
            api_key: required("API_KEY")?,
            tenant_id: env_opt("TENANT_ID").unwrap_or_else(|| DEFAULT_TENANT_ID.to_string()),
        };

        let request_delay_secs: f64 =
            env_parse_strict("REQUEST_DELAY", DEFAULT_REQUEST_DELAY_SECS).map_err(config_err)?;
        let request_delay = Duration::try_from_secs_f64(request_delay_secs).map_err(|_| {
            SetupError::config(format!(
                "REQUEST_DELAY {request_delay_secs} is out of range (non-negative seconds expected)"
            ))
        })?;

        let transfer = TransferConfig {
            max_concurrency: env_parse_strict("MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY)
                .map_err(config_err)?,
            max_attempts: env_parse_strict("MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)
                .map_err(config_err)?,
            request_timeout: Duration::from_millis(
                env_parse_strict("REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)
                    .map_err(config_err)?,
            ),
            base_backoff: Duration::from_millis(
                env_parse_strict("BASE_BACKOFF_MS", DEFAULT_BASE_BACKOFF_MS).map_err(config_err)?,
            ),
            request_delay,
        };

        let download_path = env_opt("IMAGE_DOWNLOAD_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("images"));

        Ok(Self {
            database,
            upload,
            transfer,
            download_path,
            report_path: env_opt("REPORT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("output.csv")),
            log_file: log_file_from_env(),
            record_limit: env_parse_strict("RECORD_LIMIT", DEFAULT_RECORD_LIMIT)
                .map_err(config_err)?,
            media_resource_id: env_opt("MEDIA_RESOURCE_ID")
                .unwrap_or_else(|| DEFAULT_MEDIA_RESOURCE_ID.to_string()),
        })
    }

    /// Cross-field checks, run after CLI overrides have been applied.
    pub fn validate(&self) -> Result<(), SetupError> {
        self.transfer.validate()?;
        if self.record_limit == 0 {
            return Err(SetupError::config("RECORD_LIMIT must be greater than 0"));
        }
        if self.media_resource_id.trim().is_empty() {
            return Err(SetupError::config("MEDIA_RESOURCE_ID must not be blank"));
        }
        Ok(())
    }
}

/// `LOG_FILE`, read on its own so logging can start before full config loading.
pub fn log_file_from_env() -> PathBuf {
    env_opt("LOG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("process.log"))
}

fn required(key: &str) -> Result<String, SetupError> {
    env_opt(key).ok_or_else(|| SetupError::config(format!("missing required env var {key}")))
}

fn config_err(e: anyhow::Error) -> SetupError {
    SetupError::Config(e.to_string())
}

/// Accepts only absolute http(s) URLs.
pub fn parse_upload_url(raw: &str) -> Result<Url, SetupError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| SetupError::config(format!("UPLOAD_URL {raw:?} is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(SetupError::config(format!(
            "UPLOAD_URL must use http or https, got {other}"
        ))),
    }
}

/// `DB_SERVER` may carry the port SQL Server style: `host,1433`.
fn split_server(raw: &str) -> Result<(String, Option<u16>), SetupError> {
    let raw = raw.trim();
    match raw.split_once(',') {
        Some((host, port)) => {
            let port = port.trim().parse::<u16>().map_err(|_| {
                SetupError::config(format!("DB_SERVER {raw:?} has an invalid port"))
            })?;
            Ok((host.trim().to_string(), Some(port)))
        }
        None => Ok((raw.to_string(), None)),
    }
}
