use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};

pub mod defaults;
pub mod duration_serde;

use defaults::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Outbound HTTP client settings shared by every probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent sent to stream servers; some reject unknown agents
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// TCP/TLS connect timeout (a probe's own budget still applies on top)
    #[serde(default = "default_connect_timeout", with = "duration_serde::duration")]
    pub connect_timeout: Duration,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    /// Ceiling on simultaneous outbound probe connections across all batches
    #[serde(default = "default_max_concurrent_connections")]
    pub max_concurrent_connections: usize,
}

/// Verification policy knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Entries past this count are silently dropped from a batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Probes run concurrently inside a sub-batch of this width
    #[serde(default = "default_sub_batch_width")]
    pub sub_batch_width: usize,
    /// Per-URL budget for bulk/background checks
    #[serde(default = "default_batch_timeout", with = "duration_serde::duration")]
    pub batch_timeout: Duration,
    /// Per-URL budget for a foreground single-station check
    #[serde(default = "default_single_timeout", with = "duration_serde::duration")]
    pub single_timeout: Duration,
    /// Budget for fetching an indirection playlist
    #[serde(default = "default_resolver_timeout", with = "duration_serde::duration")]
    pub resolver_timeout: Duration,
    /// Body bytes read on the ranged GET stage
    #[serde(default = "default_ranged_probe_bytes")]
    pub ranged_probe_bytes: usize,
    /// Body bytes read on the last-resort streaming GET stage
    #[serde(default = "default_stream_probe_bytes")]
    pub stream_probe_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of the human formatter
    #[serde(default)]
    pub json: bool,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_max_redirects() -> usize {
    DEFAULT_MAX_REDIRECTS
}

fn default_pool_max_idle_per_host() -> usize {
    DEFAULT_POOL_MAX_IDLE_PER_HOST
}

fn default_max_concurrent_connections() -> usize {
    DEFAULT_MAX_CONCURRENT_CONNECTIONS
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_sub_batch_width() -> usize {
    DEFAULT_SUB_BATCH_WIDTH
}

fn default_batch_timeout() -> Duration {
    DEFAULT_BATCH_TIMEOUT
}

fn default_single_timeout() -> Duration {
    DEFAULT_SINGLE_TIMEOUT
}

fn default_resolver_timeout() -> Duration {
    DEFAULT_RESOLVER_TIMEOUT
}

fn default_ranged_probe_bytes() -> usize {
    DEFAULT_RANGED_PROBE_BYTES
}

fn default_stream_probe_bytes() -> usize {
    DEFAULT_STREAM_PROBE_BYTES
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout: default_connect_timeout(),
            max_redirects: default_max_redirects(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            max_concurrent_connections: default_max_concurrent_connections(),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            sub_batch_width: default_sub_batch_width(),
            batch_timeout: default_batch_timeout(),
            single_timeout: default_single_timeout(),
            resolver_timeout: default_resolver_timeout(),
            ranged_probe_bytes: default_ranged_probe_bytes(),
            stream_probe_bytes: default_stream_probe_bytes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl VerificationConfig {
    /// Reject settings the verifier cannot honour
    pub fn validate(&self) -> Result<(), String> {
        if self.max_batch_size == 0 {
            return Err("verification.max_batch_size must be greater than 0".into());
        }
        if self.sub_batch_width == 0 {
            return Err("verification.sub_batch_width must be greater than 0".into());
        }
        for (name, value) in [
            ("batch_timeout", self.batch_timeout),
            ("single_timeout", self.single_timeout),
            ("resolver_timeout", self.resolver_timeout),
        ] {
            if value.is_zero() {
                return Err(format!("verification.{name} must be non-zero"));
            }
        }
        if self.ranged_probe_bytes == 0 || self.stream_probe_bytes == 0 {
            return Err("verification probe byte ceilings must be greater than 0".into());
        }
        Ok(())
    }
}

impl Config {
    /// Defaults, then the TOML file if it exists, then `STATION_VERIFY_*` env vars
    /// (`__` separates nesting, e.g. `STATION_VERIFY_VERIFICATION__SUB_BATCH_WIDTH=3`).
    pub fn load_from_file(config_file: impl AsRef<Path>) -> AppResult<Self> {
        let path = config_file.as_ref();
        if path.exists() {
            debug!("Loading configuration from {}", path.display());
        } else {
            debug!("Config file {} not found, using defaults", path.display());
        }

        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Effective configuration rendered back to TOML
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| AppError::internal(e.to_string()))
    }

    pub fn validate(&self) -> AppResult<()> {
        self.verification.validate().map_err(AppError::configuration)?;
        if self.http.max_concurrent_connections == 0 {
            return Err(AppError::configuration(
                "http.max_concurrent_connections must be greater than 0",
            ));
        }
        if self.http.max_concurrent_connections < self.verification.sub_batch_width {
            warn!(
                "http.max_concurrent_connections ({}) is below verification.sub_batch_width ({}); \
                 probes will queue for connection permits",
                self.http.max_concurrent_connections, self.verification.sub_batch_width
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.verification.max_batch_size, 50);
        assert_eq!(config.verification.sub_batch_width, 5);
        assert_eq!(config.verification.batch_timeout, Duration::from_secs(8));
        assert_eq!(config.verification.single_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let mut verification = VerificationConfig::default();
        verification.sub_batch_width = 0;
        assert!(verification.validate().is_err());

        let mut verification = VerificationConfig::default();
        verification.max_batch_size = 0;
        assert!(verification.validate().is_err());

        let mut verification = VerificationConfig::default();
        verification.batch_timeout = Duration::ZERO;
        assert!(verification.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load_from_file("/nonexistent/station-verify.toml").unwrap();
        assert_eq!(config.verification.sub_batch_width, DEFAULT_SUB_BATCH_WIDTH);
        assert_eq!(config.http.max_redirects, DEFAULT_MAX_REDIRECTS);
    }

    #[test]
    fn test_load_partial_file_overrides() {
        let path = std::env::temp_dir().join(format!(
            "station-verify-config-test-{}.toml",
            std::process::id()
        ));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(
                file,
                "[verification]\nsub_batch_width = 3\nbatch_timeout = \"5s\"\n\n[logging]\njson = true"
            )
            .unwrap();
        }

        let config = Config::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.verification.sub_batch_width, 3);
        assert_eq!(config.verification.batch_timeout, Duration::from_secs(5));
        assert_eq!(config.verification.max_batch_size, 50);
        assert!(config.logging.json);
    }

    #[test]
    fn test_rendered_toml_loads_back() {
        let mut config = Config::default();
        config.verification.batch_timeout = Duration::from_millis(2500);
        config.http.max_concurrent_connections = 7;

        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("batch_timeout = \"2s 500ms\""));

        let path = std::env::temp_dir().join(format!(
            "station-verify-config-rendered-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, rendered).unwrap();
        let loaded = Config::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.verification.batch_timeout, Duration::from_millis(2500));
        assert_eq!(loaded.http.max_concurrent_connections, 7);
    }

    #[test]
    fn test_invalid_file_is_configuration_error() {
        let path = std::env::temp_dir().join(format!(
            "station-verify-config-invalid-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[verification]\nsub_batch_width = 0\n").unwrap();

        let result = Config::load_from_file(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }
}
