//! Bridge configuration.
//!
//! The bridge consumes a JSON configuration object with camelCase keys.
//! Every field has a default, unknown keys are ignored, and a missing
//! config file yields the defaults. Validation of the HTTP target (base
//! URL, method) happens when the poster is built and is fatal at startup.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{BridgeError, Result};

/// Top-level configuration surface.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub post: PostConfig,
    pub decoder: DecoderConfig,
    pub defaults: DefaultsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a JSON file. A missing file yields the
    /// defaults; a present-but-invalid file is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }
}

/// HTTP delivery settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostConfig {
    /// When false the bridge runs dry: records are logged and dropped.
    pub enabled: bool,
    pub base_url: String,
    pub path: String,
    pub method: String,
    pub timeout_ms: u64,
    /// Inline retry attempts after the initial POST.
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff_multiplier: f64,
    pub queue_drain_max_per_tick: usize,
    /// Seconds between periodic queue drains.
    pub queue_drain_interval_secs: u64,
    /// Path of the persistent retry queue file.
    pub queue_file: String,
    pub headers: BTreeMap<String, String>,
}

impl Default for PostConfig {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            enabled: false,
            base_url: "http://127.0.0.1:8080".to_string(),
            path: "/passings".to_string(),
            method: "POST".to_string(),
            timeout_ms: 8000,
            retries: 5,
            retry_delay_ms: 500,
            retry_backoff_multiplier: 2.0,
            queue_drain_max_per_tick: 5,
            queue_drain_interval_secs: 30,
            queue_file: "p3-bridge-queue.json".to_string(),
            headers,
        }
    }
}

/// Decoder-side settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecoderConfig {
    pub reconnect: ReconnectConfig,
}

/// TCP reconnect behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter_ratio: f64,
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 1.8,
            jitter_ratio: 0.2,
            connect_timeout_ms: 8000,
        }
    }
}

/// Transport selection and addresses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DefaultsConfig {
    pub mode: Mode,
    pub tcp_host: String,
    pub tcp_port: u16,
    pub udp_listen_port: u16,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Tcp,
            tcp_host: "127.0.0.1".to_string(),
            tcp_port: 5403,
            udp_listen_port: 5303,
        }
    }
}

/// Which transport carries decoder bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Tcp,
    Udp,
}

/// Log shaping.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Drop status records (`tor == 0x0002`) after parse, before logging
    /// and delivery.
    pub suppress_status: bool,
}

impl Config {
    /// Full record-endpoint URL (base + path).
    pub fn post_url(&self) -> String {
        format!(
            "{}{}",
            self.post.base_url.trim_end_matches('/'),
            self.post.path
        )
    }

    /// Validate the parts of the config that are fatal when wrong.
    pub fn validate(&self) -> Result<()> {
        let url = self.post_url();
        let uri: hyper::Uri = url
            .parse()
            .map_err(|e| BridgeError::Config(format!("invalid post URL {url:?}: {e}")))?;
        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            other => {
                return Err(BridgeError::Config(format!(
                    "unsupported post URL scheme {:?} in {url:?}",
                    other.unwrap_or("")
                )))
            }
        }
        hyper::Method::from_bytes(self.post.method.as_bytes())
            .map_err(|e| BridgeError::Config(format!("invalid method {:?}: {e}", self.post.method)))?;
        Ok(())
    }
}
