//! Gateway wire payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::config::ClientConfig;
use crate::models::User;

/// The envelope every gateway frame decodes into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    /// Opcode
    pub op: u8,

    /// Opcode-specific payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,

    /// Sequence number, present on dispatches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event name, present on dispatches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

/// Hello payload: the server's heartbeat cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,

    /// Server trace
    #[serde(default, rename = "_trace")]
    pub trace: Vec<String>,
}

/// Identify payload, sent to start a fresh session.
#[derive(Debug, Clone, Serialize)]
pub struct Identify {
    /// Credential
    pub token: String,

    /// Connection properties
    pub properties: Properties,

    /// Ask the server to compress dispatch payloads
    pub compress: bool,

    /// Offline-member suppression threshold
    pub large_threshold: u32,

    /// `[shard_id, shard_count]`
    pub shard: [u32; 2],
}

/// Connection properties reported in Identify.
#[derive(Debug, Clone, Serialize)]
pub struct Properties {
    #[serde(rename = "$os")]
    pub os: String,
    #[serde(rename = "$browser")]
    pub browser: String,
    #[serde(rename = "$device")]
    pub device: String,
    #[serde(rename = "$referrer")]
    pub referrer: String,
    #[serde(rename = "$referring_domain")]
    pub referring_domain: String,
}

impl Default for Properties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: concat!("lanyard/", env!("CARGO_PKG_VERSION")).to_string(),
            device: concat!("lanyard/", env!("CARGO_PKG_VERSION")).to_string(),
            referrer: String::new(),
            referring_domain: String::new(),
        }
    }
}

impl Identify {
    /// Build an Identify from configuration, clamping out-of-range values.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        let large_threshold = if (50..=250).contains(&config.large_threshold) {
            config.large_threshold
        } else {
            let clamped = config.large_threshold.clamp(50, 250);
            warn!(
                requested = config.large_threshold,
                clamped, "large_threshold out of range"
            );
            clamped
        };

        let shard = match config.shard {
            Some(shard) if shard.is_valid() => [shard.shard_id, shard.shard_count],
            Some(shard) => {
                warn!(
                    shard_id = shard.shard_id,
                    shard_count = shard.shard_count,
                    "invalid shard descriptor, using [0, 1]"
                );
                [0, 1]
            }
            None => [0, 1],
        };

        Self {
            token: config.token.clone(),
            properties: Properties::default(),
            compress: config.compress,
            large_threshold,
            shard,
        }
    }
}

/// Resume payload, sent to re-enter a previous session.
#[derive(Debug, Clone, Serialize)]
pub struct Resume {
    /// Credential
    pub token: String,

    /// Session to resume
    pub session_id: String,

    /// Last observed sequence
    pub seq: Option<u64>,
}

/// READY dispatch payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    /// The bot's own user
    pub user: User,

    /// Gateway-assigned session id
    pub session_id: String,

    /// Initial guilds (unavailable stubs)
    #[serde(default)]
    pub guilds: Vec<Value>,

    /// Open DM channels
    #[serde(default)]
    pub private_channels: Vec<Value>,

    /// Server trace
    #[serde(default, rename = "_trace")]
    pub trace: Vec<String>,
}
