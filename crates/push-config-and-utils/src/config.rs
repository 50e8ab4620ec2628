//! Client configuration.

use crate::{ConfigError, ConfigResult, Endpoint, Environment, Paths, Service};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Settings shared by every connection, engine and worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Gateway environment (production or sandbox).
    pub environment: Environment,
    /// PEM file holding the provider certificate and its private key.
    pub certificate_path: Option<PathBuf>,
    /// Passphrase for an encrypted private key.
    pub certificate_passphrase: Option<String>,
    /// Root CA bundle. When set, the gateway certificate is verified against it.
    pub root_ca_path: Option<PathBuf>,
    /// Replaces the notification gateway endpoint (`host:port`).
    pub gateway_override: Option<String>,
    /// Replaces the feedback endpoint (`host:port`).
    pub feedback_override: Option<String>,
    /// TCP connect + TLS handshake timeout.
    pub connect_timeout_ms: u64,
    /// Extra connect attempts after the first one fails.
    pub connect_retry_times: u32,
    /// Pause between connect attempts.
    pub connect_retry_interval_ms: u64,
    /// Pause after each notification write.
    pub write_interval_ms: u64,
    /// Readiness wait used when polling for error and feedback frames.
    pub socket_select_timeout_ms: u64,
    /// Errors a notification may accumulate before it is given up on.
    pub send_retry_times: u32,
    /// Worker processes started by the fan-out server.
    pub processes: usize,
    /// Idle sleep of a fan-out worker with nothing to send.
    pub poll_interval_ms: u64,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Sandbox,
            certificate_path: None,
            certificate_passphrase: None,
            root_ca_path: None,
            gateway_override: None,
            feedback_override: None,
            connect_timeout_ms: 10_000,
            connect_retry_times: 3,
            connect_retry_interval_ms: 1_000,
            write_interval_ms: 10,
            socket_select_timeout_ms: 1_000,
            send_retry_times: 3,
            processes: 3,
            poll_interval_ms: 200,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the default file (if present), then apply
    /// environment variable overrides.
    pub fn load(paths: &Paths) -> ConfigResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the default file.
    pub fn save(&self, paths: &Paths) -> ConfigResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from `PUSHGATE_*` environment variables.
    pub fn load_from_env(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(non_empty);

        if let Some(env) = get("PUSHGATE_ENVIRONMENT") {
            self.environment = env.parse()?;
        }
        if let Some(path) = get("PUSHGATE_CERTIFICATE") {
            self.certificate_path = Some(PathBuf::from(path));
        }
        if let Some(passphrase) = get("PUSHGATE_CERTIFICATE_PASSPHRASE") {
            self.certificate_passphrase = Some(passphrase);
        }
        if let Some(path) = get("PUSHGATE_ROOT_CA") {
            self.root_ca_path = Some(PathBuf::from(path));
        }
        if let Some(level) = get("PUSHGATE_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(raw) = get("PUSHGATE_PROCESSES") {
            self.processes = raw.parse().map_err(|_| ConfigError::InvalidValue {
                field: "processes",
                reason: format!("'{}' is not a positive integer", raw),
            })?;
        }
        Ok(())
    }

    /// Check the settings that would otherwise fail at connect time.
    pub fn validate(&self) -> ConfigResult<()> {
        let certificate = self
            .certificate_path
            .as_ref()
            .ok_or(ConfigError::MissingCertificate)?;
        check_readable("certificate", certificate)?;

        if let Some(ca) = &self.root_ca_path {
            check_readable("root CA", ca)?;
        }

        if self.processes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "processes",
                reason: "at least one worker process is required".to_string(),
            });
        }
        if self.send_retry_times == 0 {
            return Err(ConfigError::InvalidValue {
                field: "send_retry_times",
                reason: "must allow at least one attempt".to_string(),
            });
        }

        self.endpoint(Service::Push)?;
        self.endpoint(Service::Feedback)?;
        Ok(())
    }

    /// Endpoint for a service, honoring overrides.
    pub fn endpoint(&self, service: Service) -> ConfigResult<Endpoint> {
        let override_ = match service {
            Service::Push => self.gateway_override.as_deref(),
            Service::Feedback => self.feedback_override.as_deref(),
        };
        match override_ {
            Some(raw) => Endpoint::parse(raw),
            None => Ok(Endpoint::for_service(service, self.environment)),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_interval_ms)
    }

    pub fn write_interval(&self) -> Duration {
        Duration::from_millis(self.write_interval_ms)
    }

    pub fn socket_select_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_select_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn check_readable(kind: &'static str, path: &Path) -> ConfigResult<()> {
    std::fs::File::open(path)
        .map(|_| ())
        .map_err(|source| ConfigError::UnreadableFile {
            kind,
            path: path.to_path_buf(),
            source,
        })
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
