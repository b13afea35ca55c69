// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node configuration: CLI flags, environment variables, and the supervisor
//! config file that overrides station identity.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::central::LinkConfig;
use crate::error::NodeError;
use crate::model::Station;
use crate::reconcile::ShipperConfig;

/// Station-local node of the transport dispatch platform.
#[derive(Debug, Clone, Parser)]
#[command(name = "gare", version, about)]
pub struct Config {
    /// Central server HTTP base URL.
    #[arg(long, env = "CENTRAL_SERVER_URL", default_value = "http://localhost:5000")]
    pub central_server_url: String,

    /// Central server WebSocket endpoint.
    #[arg(long, env = "CENTRAL_SERVER_WS_URL", default_value = "ws://localhost:5000/ws")]
    pub central_server_ws_url: String,

    /// Bearer secret for the central HTTP API.
    #[arg(long, env = "API_SECRET")]
    pub api_secret: Option<String>,

    /// Advertised port of the node's client surface.
    #[arg(long, env = "PORT", default_value = "4000")]
    pub port: u16,

    /// Station identity. Overridden by the supervisor config file.
    #[arg(long, env = "STATION_ID", default_value = "")]
    pub station_id: String,

    #[arg(long, env = "STATION_NAME", default_value = "")]
    pub station_name: String,

    #[arg(long, env = "GOVERNORATE", default_value = "")]
    pub governorate: String,

    #[arg(long, env = "DELEGATION", default_value = "")]
    pub delegation: String,

    /// HMAC secret for locally issued tokens.
    #[arg(long, env = "JWT_SECRET", default_value = "")]
    pub jwt_secret: String,

    /// Token lifetime: `<n>h`, `<n>d`, or bare hours.
    #[arg(long, env = "JWT_EXPIRES_IN", default_value = "24h")]
    pub jwt_expires_in: String,

    /// Idle session cutoff.
    #[arg(long, env = "SESSION_TIMEOUT_HOURS", default_value = "8")]
    pub session_timeout_hours: u64,

    /// Bootstrap sync-request cadence while the vehicle table is empty.
    #[arg(long, env = "SYNC_INTERVAL_SECONDS", default_value = "30")]
    pub sync_interval_seconds: u64,

    /// Bootstrap sync requests per connected session.
    #[arg(long, env = "MAX_RETRY_ATTEMPTS", default_value = "3")]
    pub max_retry_attempts: u32,

    /// Trips shipped per drain cycle.
    #[arg(long, env = "BATCH_SYNC_SIZE", default_value = "50")]
    pub batch_sync_size: usize,

    /// Trip drain cycle period.
    #[arg(long, env = "TRIP_SYNC_INTERVAL_MS", default_value = "30000")]
    pub trip_sync_interval_ms: u64,

    /// Central connection-test period.
    #[arg(long, env = "CONNECTION_CHECK_INTERVAL_MS", default_value = "60000")]
    pub connection_check_interval_ms: u64,

    /// Upload attempts per trip before FAILED.
    #[arg(long, env = "MAX_SYNC_RETRY_ATTEMPTS", default_value = "3")]
    pub max_sync_retry_attempts: u32,

    /// Pause between trip upload attempts.
    #[arg(long, env = "SYNC_RETRY_DELAY_MS", default_value = "5000")]
    pub sync_retry_delay_ms: u64,

    /// Store snapshot file. Unset runs the store in memory only.
    #[arg(long, env = "GARE_SNAPSHOT_PATH")]
    pub snapshot_path: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "GARE_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "GARE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Supervisor-provisioned station identity file.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorFile {
    pub station_info: SupervisorStationInfo,
    /// Supervisor CIN, recorded for provisioning audits.
    #[serde(default)]
    pub cin: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorStationInfo {
    pub station_id: String,
    pub station_name: String,
    pub delegation: String,
    pub governorate: String,
}

/// Well-known per-OS location of the supervisor config file.
pub fn supervisor_config_path() -> PathBuf {
    #[cfg(windows)]
    {
        let base = std::env::var("PROGRAMDATA").unwrap_or_else(|_| "C:\\ProgramData".to_owned());
        Path::new(&base).join("gare").join("station.json")
    }
    #[cfg(not(windows))]
    {
        PathBuf::from("/etc/gare/station.json")
    }
}

impl Config {
    /// Overlay station identity from the supervisor file, when present.
    /// Returns whether an override was applied.
    pub fn apply_supervisor_file(&mut self, path: &Path) -> anyhow::Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let contents = std::fs::read_to_string(path)?;
        let file: SupervisorFile = serde_json::from_str(&contents)?;
        self.station_id = file.station_info.station_id;
        self.station_name = file.station_info.station_name;
        self.delegation = file.station_info.delegation;
        self.governorate = file.station_info.governorate;
        Ok(true)
    }

    /// Validate the configuration after parsing and file overlay.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.station_id.is_empty() {
            return Err(NodeError::ConfigInvalid(
                "station id missing: set STATION_ID or provision the supervisor file".into(),
            ));
        }
        if self.jwt_secret.is_empty() {
            return Err(NodeError::ConfigInvalid("JWT_SECRET must be set".into()));
        }
        if !self.central_server_url.starts_with("http://")
            && !self.central_server_url.starts_with("https://")
        {
            return Err(NodeError::ConfigInvalid(format!(
                "CENTRAL_SERVER_URL must be http(s): {}",
                self.central_server_url
            )));
        }
        if !self.central_server_ws_url.starts_with("ws://")
            && !self.central_server_ws_url.starts_with("wss://")
        {
            return Err(NodeError::ConfigInvalid(format!(
                "CENTRAL_SERVER_WS_URL must be ws(s): {}",
                self.central_server_ws_url
            )));
        }
        if parse_lifetime(&self.jwt_expires_in).is_none() {
            return Err(NodeError::ConfigInvalid(format!(
                "JWT_EXPIRES_IN not parseable: {}",
                self.jwt_expires_in
            )));
        }
        if self.log_format != "json" && self.log_format != "text" {
            return Err(NodeError::ConfigInvalid(format!(
                "log format must be json or text: {}",
                self.log_format
            )));
        }
        Ok(())
    }

    pub fn station(&self) -> Station {
        Station {
            station_id: self.station_id.clone(),
            station_name: self.station_name.clone(),
            delegation: self.delegation.clone(),
            governorate: self.governorate.clone(),
        }
    }

    /// Token/session lifetime. Configuration is authoritative.
    pub fn token_ttl(&self) -> Duration {
        parse_lifetime(&self.jwt_expires_in).unwrap_or(Duration::from_secs(24 * 3600))
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_hours * 3600)
    }

    pub fn link_config(&self) -> LinkConfig {
        let mut link = LinkConfig::new(
            self.central_server_url.clone(),
            self.central_server_ws_url.clone(),
            self.station_id.clone(),
            self.station_name.clone(),
        );
        link.connection_test_interval = Duration::from_millis(self.connection_check_interval_ms);
        link
    }

    pub fn shipper_config(&self) -> ShipperConfig {
        let mut shipper =
            ShipperConfig::new(self.central_server_url.clone(), self.api_secret.clone());
        shipper.drain_interval = Duration::from_millis(self.trip_sync_interval_ms);
        shipper.batch_size = self.batch_sync_size;
        shipper.retry_cap = self.max_sync_retry_attempts;
        shipper.retry_delay = Duration::from_millis(self.sync_retry_delay_ms);
        shipper
    }
}

/// Parse `"24h"`, `"7d"`, `"90m"`, or bare hours into a duration.
pub fn parse_lifetime(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let (number, unit) = match text.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => text.split_at(split),
        None => (text, "h"),
    };
    let n: u64 = number.parse().ok()?;
    match unit {
        "m" => Some(Duration::from_secs(n * 60)),
        "h" => Some(Duration::from_secs(n * 3600)),
        "d" => Some(Duration::from_secs(n * 24 * 3600)),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
