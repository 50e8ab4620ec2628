//! Gateway environments and their fixed endpoints.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which gateway cluster to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Sandbox,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "sandbox" | "development" | "dev" => Ok(Environment::Sandbox),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }
}

/// The two services exposed by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Notification gateway (binary notification frames in, error frames out).
    Push,
    /// Feedback stream (read-only tuples of uninstalled device tokens).
    Feedback,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Push => f.write_str("push"),
            Service::Feedback => f.write_str("feedback"),
        }
    }
}

/// A resolved `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Fixed endpoint for a service in an environment.
    pub fn for_service(service: Service, environment: Environment) -> Self {
        match (service, environment) {
            (Service::Push, Environment::Production) => Self::new("gateway.push.apple.com", 2195),
            (Service::Push, Environment::Sandbox) => {
                Self::new("gateway.sandbox.push.apple.com", 2195)
            }
            (Service::Feedback, Environment::Production) => {
                Self::new("feedback.push.apple.com", 2196)
            }
            (Service::Feedback, Environment::Sandbox) => {
                Self::new("feedback.sandbox.push.apple.com", 2196)
            }
        }
    }

    /// Parse a `host:port` string.
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        let (host, port) = raw
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidEndpoint(raw.to_string()))?;
        if host.is_empty() {
            return Err(ConfigError::InvalidEndpoint(raw.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidEndpoint(raw.to_string()))?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
