//! Configuration for entity transfer

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use transit_types::ProtocolVersion;

/// Tunables for teleports, crossings and child agents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Wait for the destination to confirm arrival before finalizing a
    /// multi-step teleport
    #[serde(default = "default_true")]
    pub wait_for_callback: bool,

    /// Ignore client cancel requests and tell the client so
    #[serde(default)]
    pub disable_cancellation: bool,

    /// Bound on waiting for the destination's arrival confirmation
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    /// How long a single-round-trip teleport waits for the release callback
    /// before closing a far-away source agent
    #[serde(default = "default_release_wait")]
    pub release_wait_secs: u64,

    /// Deadline for each call to a destination region
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Lifetime of a cached access refusal
    #[serde(default = "default_banned_ttl")]
    pub banned_ttl_secs: u64,

    /// Lifetime of a cached empty grid cell
    #[serde(default = "default_not_found_ttl")]
    pub not_found_ttl_secs: u64,

    /// Lifetime of the cached neighbor list
    #[serde(default = "default_neighbor_cache")]
    pub neighbor_cache_secs: u64,

    /// Lowest outbound version that uses the single-round-trip teleport
    #[serde(default = "default_v2_min_version")]
    pub v2_min_version: f32,

    /// Lowest outbound version whose destination closes out-of-range child
    /// agents on its own
    #[serde(default = "default_local_close_min_version")]
    pub local_close_min_version: f32,

    /// Clearance kept between the ground and the avatar's feet on landing
    #[serde(default = "default_landing_height_margin")]
    pub landing_height_margin: f32,

    /// Half height used when the avatar's appearance is unknown
    #[serde(default = "default_half_height")]
    pub default_half_height: f32,

    /// Seconds of velocity added to the position when probing a crossing
    #[serde(default = "default_crossing_lookahead")]
    pub crossing_lookahead_secs: f32,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            wait_for_callback: true,
            disable_cancellation: false,
            confirmation_timeout_secs: default_confirmation_timeout(),
            release_wait_secs: default_release_wait(),
            rpc_timeout_secs: default_rpc_timeout(),
            banned_ttl_secs: default_banned_ttl(),
            not_found_ttl_secs: default_not_found_ttl(),
            neighbor_cache_secs: default_neighbor_cache(),
            v2_min_version: default_v2_min_version(),
            local_close_min_version: default_local_close_min_version(),
            landing_height_margin: default_landing_height_margin(),
            default_half_height: default_half_height(),
            crossing_lookahead_secs: default_crossing_lookahead(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_confirmation_timeout() -> u64 {
    20
}

fn default_release_wait() -> u64 {
    15
}

fn default_rpc_timeout() -> u64 {
    8
}

fn default_banned_ttl() -> u64 {
    60
}

fn default_not_found_ttl() -> u64 {
    30
}

fn default_neighbor_cache() -> u64 {
    30
}

fn default_v2_min_version() -> f32 {
    0.2
}

fn default_local_close_min_version() -> f32 {
    0.7
}

fn default_landing_height_margin() -> f32 {
    0.1
}

fn default_half_height() -> f32 {
    0.8
}

fn default_crossing_lookahead() -> f32 {
    0.2
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TransferConfig {
    /// Load configuration from defaults, an optional file and `TRANSIT_*`
    /// environment variables, in that order of precedence.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&TransferConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TRANSIT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: TransferConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_timeout_secs == 0 {
            return Err(ConfigError::Invalid("rpc_timeout_secs must be positive".into()));
        }
        if self.confirmation_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "confirmation_timeout_secs must be positive".into(),
            ));
        }
        if self.crossing_lookahead_secs.is_nan() || self.crossing_lookahead_secs < 0.0 {
            return Err(ConfigError::Invalid(
                "crossing_lookahead_secs must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Upper bound on waiting for the destination to confirm arrival.
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    /// How long a closing source waits for the release callback.
    pub fn release_wait(&self) -> Duration {
        Duration::from_secs(self.release_wait_secs)
    }

    /// Deadline for a single simulation call.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// How long a refusing destination is left alone.
    pub fn banned_ttl(&self) -> Duration {
        Duration::from_secs(self.banned_ttl_secs)
    }

    /// Lifetime of an empty grid cell entry.
    pub fn not_found_ttl(&self) -> Duration {
        Duration::from_secs(self.not_found_ttl_secs)
    }

    /// Lifetime of the cached neighbor list.
    pub fn neighbor_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.neighbor_cache_secs)
    }

    /// Lowest version that takes the single round-trip handshake.
    pub fn v2_min_version(&self) -> ProtocolVersion {
        ProtocolVersion::new(self.v2_min_version)
    }

    /// Below this version the source closes stale child agents itself.
    pub fn local_close_min_version(&self) -> ProtocolVersion {
        ProtocolVersion::new(self.local_close_min_version)
    }
}
