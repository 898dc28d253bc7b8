use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, warn};

const DEFAULT_API_BASE_URL: &str = "https://api.werkbank.app";
const DEFAULT_VAT_RATE: f64 = 0.19;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_config_path() -> PathBuf {
    PathBuf::from("offerkern.toml")
}

// ─── GuardConfig ──────────────────────────────────────────────────────────────

/// Revenue guard configuration (`[guard]` in offerkern.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Re-run the guard check automatically after every ledger change.
    /// Default: true.  When false, hosts trigger checks explicitly.
    pub auto_recheck: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self { auto_recheck: true }
    }
}

// ─── TOML file layer ──────────────────────────────────────────────────────────

/// Shape of the optional `offerkern.toml` file.  All fields optional; the
/// precedence logic in [`CoreConfig::new`] fills the gaps.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    /// Base URL of the offer backend.
    api_base_url: Option<String>,
    /// Bearer token for the backend.  Prefer the env var in shared setups.
    api_token: Option<String>,
    /// VAT rate applied to the net total (0.19 = 19%).
    vat_rate: Option<f64>,
    /// Per-request timeout for backend round trips, in seconds.
    request_timeout_secs: Option<u64>,
    /// Log filter ("info", "offerkern=debug", ...).
    log: Option<String>,
    /// Log output format: "pretty" or "json".
    log_format: Option<String>,
    /// Revenue guard settings (`[guard]`).
    guard: Option<GuardConfig>,
}

fn load_toml(path: &Path) -> Option<TomlConfig> {
    let contents = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse offerkern.toml — using defaults");
            None
        }
    }
}

// ─── CoreConfig ───────────────────────────────────────────────────────────────

/// Resolved configuration of the offer core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Base URL of the offer backend, no trailing slash.
    pub api_base_url: String,
    /// Bearer token for the backend.  None = unauthenticated (dev backends).
    pub api_token: Option<String>,
    /// VAT rate applied to the net total.
    pub vat_rate: f64,
    /// Per-request timeout for backend round trips.
    pub request_timeout_secs: u64,
    /// Log filter.
    pub log: String,
    /// Log output format: "pretty" or "json".
    pub log_format: String,
    /// Revenue guard settings.
    pub guard: GuardConfig,
}

impl CoreConfig {
    /// Build config from CLI args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env, passed as `Some(value)` from clap
    ///   2. TOML file (`--config` path or ./offerkern.toml)
    ///   3. Built-in defaults
    pub fn new(
        config_path: Option<PathBuf>,
        api_base_url: Option<String>,
        api_token: Option<String>,
        vat_rate: Option<f64>,
        log: Option<String>,
        log_format: Option<String>,
    ) -> Self {
        let config_path = config_path.unwrap_or_else(default_config_path);

        // TOML is the middle priority layer.
        let toml = load_toml(&config_path).unwrap_or_default();

        let api_base_url = api_base_url
            .or_else(|| std::env::var("OFFERKERN_API_URL").ok().filter(|s| !s.is_empty()))
            .or(toml.api_base_url)
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let api_base_url = api_base_url.trim_end_matches('/').to_string();

        let api_token = api_token
            .or_else(|| std::env::var("OFFERKERN_API_TOKEN").ok().filter(|s| !s.is_empty()))
            .or(toml.api_token);

        let vat_rate = vat_rate
            .or_else(parse_vat_env)
            .or(toml.vat_rate)
            .unwrap_or(DEFAULT_VAT_RATE);

        let request_timeout_secs = toml.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);

        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let log_format = log_format
            .or_else(|| std::env::var("OFFERKERN_LOG_FORMAT").ok().filter(|s| !s.is_empty()))
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let guard = toml.guard.unwrap_or_default();

        Self {
            api_base_url,
            api_token,
            vat_rate,
            request_timeout_secs,
            log,
            log_format,
            guard,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            vat_rate: DEFAULT_VAT_RATE,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            log: "info".to_string(),
            log_format: "pretty".to_string(),
            guard: GuardConfig::default(),
        }
    }
}

fn parse_vat_env() -> Option<f64> {
    let raw = std::env::var("OFFERKERN_VAT_RATE").ok().filter(|s| !s.is_empty())?;
    match raw.parse::<f64>() {
        Ok(rate) if (0.0..1.0).contains(&rate) => Some(rate),
        _ => {
            warn!(value = %raw, "OFFERKERN_VAT_RATE is not a rate between 0 and 1 — ignoring");
            None
        }
    }
}
