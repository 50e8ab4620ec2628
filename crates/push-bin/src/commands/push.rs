use std::process::ExitCode;

use anyhow::Context;
use clap::Args;
use push_config_and_utils::{ClientConfig, Service, TracingLogger};
use push_connection::Connection;
use push_delivery::{DeliveryEngine, DeliverySettings, Message, DEFAULT_EXPIRY_SECONDS};
use push_wire::Priority;
use serde_json::Value;
use tracing::info;

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Device token as 64 hex characters; repeat for several devices
    #[arg(short, long = "token", required = true)]
    pub tokens: Vec<String>,

    /// Alert text
    #[arg(long)]
    pub text: Option<String>,

    #[arg(long)]
    pub badge: Option<u32>,

    #[arg(long)]
    pub sound: Option<String>,

    #[arg(long)]
    pub category: Option<String>,

    /// Custom property as key=json; plain text is sent as a string
    #[arg(long = "custom", value_parser = parse_custom)]
    pub custom: Vec<(String, Value)>,

    /// Seconds the gateway keeps trying; 0 means do not store
    #[arg(long, default_value_t = DEFAULT_EXPIRY_SECONDS)]
    pub expiry: u32,

    /// 10 (immediate) or 5 (conserve power)
    #[arg(long, default_value = "10", value_parser = parse_priority)]
    pub priority: Priority,

    /// Label carried through logs and error reports
    #[arg(long)]
    pub identifier: Option<String>,
}

impl PushArgs {
    pub fn to_message(&self) -> anyhow::Result<Message> {
        let mut message = Message::new()
            .with_expiry(self.expiry)
            .with_priority(self.priority);
        for token in &self.tokens {
            message
                .add_recipient(token)
                .with_context(|| format!("token '{}'", token))?;
        }
        message.text = self.text.clone();
        message.badge = self.badge;
        message.sound = self.sound.clone();
        message.category = self.category.clone();
        message.custom_identifier = self.identifier.clone();
        for (name, value) in &self.custom {
            message.set_custom_property(name, value.clone())?;
        }
        Ok(message)
    }
}

pub fn run(config: ClientConfig, args: PushArgs) -> anyhow::Result<ExitCode> {
    config.validate()?;
    let message = args.to_message()?;

    let logger = TracingLogger::shared();
    let connection = Connection::new(Service::Push, &config, logger.clone())?;
    let mut engine = DeliveryEngine::new(connection, DeliverySettings::from(&config), logger);

    engine.connect()?;
    engine.enqueue(&message)?;
    let summary = engine.send();
    engine.disconnect();
    let summary = summary?;

    info!(
        runs = summary.runs,
        delivered = summary.delivered,
        failed = summary.failed,
        "Push finished"
    );

    let failures = engine.take_errors();
    super::print_failures(&failures)?;
    if failures.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn parse_custom(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if name.is_empty() {
        return Err("custom property name is empty".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
    Ok((name.to_string(), value))
}

fn parse_priority(raw: &str) -> Result<Priority, String> {
    let value: u8 = raw.parse().map_err(|_| format!("'{}' is not a number", raw))?;
    Priority::try_from(value).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOKEN: &str = "abababababababababababababababababababababababababababababababab";

    fn args() -> PushArgs {
        PushArgs {
            tokens: vec![TOKEN.to_string()],
            text: Some("Hi".to_string()),
            badge: Some(2),
            sound: None,
            category: None,
            custom: vec![("order".to_string(), json!(42))],
            expiry: 0,
            priority: Priority::ConservePower,
            identifier: Some("order-42".to_string()),
        }
    }

    #[test]
    fn test_parse_custom() {
        assert_eq!(parse_custom("n=1").unwrap(), ("n".to_string(), json!(1)));
        assert_eq!(
            parse_custom("obj={\"a\":true}").unwrap(),
            ("obj".to_string(), json!({"a": true}))
        );
        assert_eq!(
            parse_custom("label=hello world").unwrap(),
            ("label".to_string(), json!("hello world"))
        );
        assert!(parse_custom("novalue").is_err());
        assert!(parse_custom("=1").is_err());
    }

    #[test]
    fn test_parse_priority() {
        assert_eq!(parse_priority("10").unwrap(), Priority::Immediate);
        assert_eq!(parse_priority("5").unwrap(), Priority::ConservePower);
        assert!(parse_priority("7").is_err());
        assert!(parse_priority("high").is_err());
    }

    #[test]
    fn test_to_message() {
        let message = args().to_message().unwrap();
        assert_eq!(message.recipients[0].to_hex(), TOKEN);
        assert_eq!(message.expiry_seconds, 0);
        assert_eq!(message.priority, Priority::ConservePower);
        assert_eq!(message.custom_properties["order"], json!(42));
        assert_eq!(message.custom_identifier.as_deref(), Some("order-42"));
    }

    #[test]
    fn test_to_message_rejects_bad_input() {
        let mut bad_token = args();
        bad_token.tokens.push("zz".to_string());
        assert!(bad_token.to_message().is_err());

        let mut reserved = args();
        reserved.custom.push(("aps".to_string(), json!({})));
        assert!(reserved.to_message().is_err());
    }
}
