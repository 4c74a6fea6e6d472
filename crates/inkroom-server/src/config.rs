//! Server configuration from command-line flags and environment.

use std::net::SocketAddr;

use clap::Parser;
use inkroom_core::{DEFAULT_EPSILON, KEEP_SUFFIX, Limits, LimitsError, MAX_LOG_SIZE};
use thiserror::Error;

use crate::room::RoomSettings;

/// Configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid log bounds: {0}")]
    Limits(#[from] LimitsError),
    #[error("simplify epsilon must be a finite, non-negative number, got {0}")]
    InvalidEpsilon(f64),
}

/// Command-line arguments for inkroom-server.
#[derive(Debug, Clone, Parser)]
#[command(name = "inkroom-server")]
#[command(about = "WebSocket relay for InkRoom shared canvases")]
#[command(version)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "INKROOM_BIND", default_value = "0.0.0.0:3030")]
    pub bind: SocketAddr,

    /// Log length that triggers a trim
    #[arg(long, env = "INKROOM_MAX_LOG_SIZE", default_value_t = MAX_LOG_SIZE)]
    pub max_log_size: usize,

    /// Entries kept when a log is trimmed
    #[arg(long, env = "INKROOM_KEEP_SUFFIX", default_value_t = KEEP_SUFFIX)]
    pub keep_suffix: usize,

    /// Tolerance in pixels when simplifying batched strokes
    #[arg(long, env = "INKROOM_SIMPLIFY_EPSILON", default_value_t = DEFAULT_EPSILON)]
    pub simplify_epsilon: f64,
}

impl ServerConfig {
    /// Check the flags and build the per-room settings.
    pub fn room_settings(&self) -> Result<RoomSettings, ConfigError> {
        let limits = Limits::new(self.max_log_size, self.keep_suffix)?;
        if !self.simplify_epsilon.is_finite() || self.simplify_epsilon < 0.0 {
            return Err(ConfigError::InvalidEpsilon(self.simplify_epsilon));
        }
        Ok(RoomSettings {
            limits,
            epsilon: self.simplify_epsilon,
        })
    }
}
