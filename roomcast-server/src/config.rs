//! Server configuration.
//!
//! Loaded from environment variables with defaults matching a single-host
//! deployment.

use roomcast_core::RtpCodecCapability;
use std::collections::HashMap;
use std::env;
use thiserror::Error;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

pub const DEFAULT_RTC_MIN_PORT: u16 = 2000;

pub const DEFAULT_RTC_MAX_PORT: u16 = 2020;

/// What happens to a room's routing context when its last peer leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomRetention {
    /// Close the routing context and forget the room.
    #[default]
    Release,
    /// Keep the room dormant so a later join reuses the routing context.
    Keep,
}

/// Options for WebRTC transports created by the media engine.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub listen_ip: String,
    pub announced_ip: Option<String>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_ip: "0.0.0.0".to_owned(),
            announced_ip: None,
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
            rtc_min_port: DEFAULT_RTC_MIN_PORT,
            rtc_max_port: DEFAULT_RTC_MAX_PORT,
        }
    }
}

impl TransportConfig {
    /// Address advertised in ICE candidates.
    pub fn candidate_ip(&self) -> &str {
        self.announced_ip.as_deref().unwrap_or(&self.listen_ip)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub transport: TransportConfig,
    pub room_retention: RoomRetention,
    /// Codec profile every routing context is created with.
    pub media_codecs: Vec<RtpCodecCapability>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_owned(),
            transport: TransportConfig::default(),
            room_retention: RoomRetention::default(),
            media_codecs: default_media_codecs(),
        }
    }
}

/// Opus stereo and VP8.
pub fn default_media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability::audio("audio/opus", 48000, 2),
        RtpCodecCapability::video("video/VP8", 90000).with_parameter("x-google-start-bitrate", 1000),
    ]
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = match (vars.get("ROOMCAST_BIND_ADDRESS"), vars.get("PORT")) {
            (Some(addr), _) => addr.clone(),
            (None, Some(port)) => {
                let port: u16 = port
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(format!("PORT={port}")))?;
                format!("0.0.0.0:{port}")
            }
            (None, None) => DEFAULT_BIND_ADDRESS.to_owned(),
        };

        let announced_ip = vars.get("ANNOUNCEDIP").filter(|s| !s.is_empty()).cloned();

        let rtc_min_port = parse_port(vars, "ROOMCAST_RTC_MIN_PORT", DEFAULT_RTC_MIN_PORT)?;
        let rtc_max_port = parse_port(vars, "ROOMCAST_RTC_MAX_PORT", DEFAULT_RTC_MAX_PORT)?;
        if rtc_min_port > rtc_max_port {
            return Err(ConfigError::InvalidValue(format!(
                "RTC port range {rtc_min_port}-{rtc_max_port} is empty"
            )));
        }

        let room_retention = match vars.get("ROOMCAST_ROOM_RETENTION").map(String::as_str) {
            None | Some("release") => RoomRetention::Release,
            Some("keep") => RoomRetention::Keep,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "ROOMCAST_ROOM_RETENTION={other}"
                )));
            }
        };

        Ok(Self {
            bind_address,
            transport: TransportConfig {
                announced_ip,
                rtc_min_port,
                rtc_max_port,
                ..TransportConfig::default()
            },
            room_retention,
            media_codecs: default_media_codecs(),
        })
    }
}

fn parse_port(vars: &HashMap<String, String>, key: &str, default: u16) -> Result<u16, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}
