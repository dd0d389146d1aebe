//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in each binary (or rely on lazy Once).
use std::str::FromStr;
use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

/// Load .env exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        if dotenv::dotenv().is_ok() {
            return;
        }
        // Fallback to the project root so `cargo run` from a subdirectory still works.
        let candidate = format!("{}/.env", env!("CARGO_MANIFEST_DIR"));
        let _ = dotenv::from_filename(candidate);
    });
}

/// Common bootstrap for CLI binaries:
///   * initialize dotenv/env once
///   * log which upload endpoint and staging directory the run will use
pub fn bootstrap_cli(bin_name: &str) {
    init_env();

    match env_opt("UPLOAD_URL") {
        Some(url) => info!(target = "bootstrap", bin = bin_name, upload_url = %url, "upload endpoint configured"),
        None => warn!(target = "bootstrap", bin = bin_name, "UPLOAD_URL not set"),
    }
    if env_opt("IMAGE_DOWNLOAD_PATH").is_none() {
        info!(
            target = "bootstrap",
            bin = bin_name,
            "IMAGE_DOWNLOAD_PATH not set; staging into ./images"
        );
    }
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Parsed value with default fallback; a present but unparsable value is an error.
pub fn env_parse_strict<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
{
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("env var {key} has invalid value {raw:?}")),
        None => Ok(default),
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    init_env();
    match std::env::var(key) {
        Ok(raw) => {
            let v = raw.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "on" | "yes")
        }
        Err(_) => default,
    }
}
