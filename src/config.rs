use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::{CaptureConfig, DEFAULT_CAPTURE_DEVICE, DEFAULT_CAPTURE_TIMEOUT};
use crate::upload::{
    Destination, UploadConfig, DEFAULT_DESTINATION, DEFAULT_UPLOAD_ENDPOINT,
    DEFAULT_UPLOAD_TIMEOUT,
};

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RelayConfigFile {
    capture: Option<CaptureConfigFile>,
    upload: Option<UploadConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaptureConfigFile {
    device: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct UploadConfigFile {
    endpoint: Option<String>,
    destination: Option<String>,
    content_type: Option<String>,
    token_path: Option<PathBuf>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    pub capture: CaptureConfig,
    pub upload: UploadConfig,
}

impl RelayConfig {
    /// Load from the file named by `RELAY_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RELAY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (if any), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Result<Self> {
        let capture = file.capture.unwrap_or_default();
        let upload = file.upload.unwrap_or_default();

        let capture = CaptureConfig {
            device: capture
                .device
                .unwrap_or_else(|| DEFAULT_CAPTURE_DEVICE.to_string()),
            timeout: capture
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_CAPTURE_TIMEOUT),
        };
        let destination = Destination::parse(
            upload
                .destination
                .as_deref()
                .unwrap_or(DEFAULT_DESTINATION),
        )?;
        let upload = UploadConfig {
            endpoint: upload
                .endpoint
                .unwrap_or_else(|| DEFAULT_UPLOAD_ENDPOINT.to_string()),
            destination,
            content_type: upload.content_type.filter(|ct| !ct.trim().is_empty()),
            token_path: upload.token_path,
            timeout: upload
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_UPLOAD_TIMEOUT),
        };
        Ok(Self { capture, upload })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = non_empty_env("RELAY_CAPTURE_DEVICE") {
            self.capture.device = device;
        }
        if let Some(timeout) = non_empty_env("RELAY_CAPTURE_TIMEOUT_MS") {
            self.capture.timeout = parse_millis("RELAY_CAPTURE_TIMEOUT_MS", &timeout)?;
        }
        if let Some(endpoint) = non_empty_env("RELAY_UPLOAD_ENDPOINT") {
            self.upload.endpoint = endpoint;
        }
        if let Some(destination) = non_empty_env("RELAY_DESTINATION") {
            self.upload.destination = Destination::parse(&destination)?;
        }
        if let Some(path) = non_empty_env("RELAY_UPLOAD_TOKEN_PATH") {
            self.upload.token_path = Some(PathBuf::from(path));
        }
        if let Some(timeout) = non_empty_env("RELAY_UPLOAD_TIMEOUT_MS") {
            self.upload.timeout = parse_millis("RELAY_UPLOAD_TIMEOUT_MS", &timeout)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.capture.device = self.capture.device.trim().to_string();
        self.upload.endpoint = self.upload.endpoint.trim().to_string();
        if self.capture.device.is_empty() {
            return Err(anyhow!("capture device must not be empty"));
        }
        if self.upload.endpoint.is_empty() {
            return Err(anyhow!("upload endpoint must not be empty"));
        }
        if self.capture.timeout.is_zero() {
            return Err(anyhow!("capture timeout must be greater than zero"));
        }
        if self.upload.timeout.is_zero() {
            return Err(anyhow!("upload timeout must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    let millis: u64 = value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be an integer number of milliseconds", key))?;
    Ok(Duration::from_millis(millis))
}
