/// Configuration default values
///
/// All default values for configuration options, kept in one place.
use std::time::Duration;

// Outbound HTTP defaults
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36 VLC/3.0.20";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_REDIRECTS: usize = 10;
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 2;
pub const DEFAULT_MAX_CONCURRENT_CONNECTIONS: usize = 20;

// Verification defaults
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;
pub const DEFAULT_SUB_BATCH_WIDTH: usize = 5;
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(8);
pub const DEFAULT_SINGLE_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_RESOLVER_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RANGED_PROBE_BYTES: usize = 512;
pub const DEFAULT_STREAM_PROBE_BYTES: usize = 4096;

// Logging defaults
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_CONFIG_FILE: &str = "station-verify.toml";
pub const ENV_PREFIX: &str = "STATION_VERIFY_";
