use std::process::ExitCode;

use push_config_and_utils::{ClientConfig, TracingLogger};
use push_feedback::FeedbackReader;

pub fn run(config: ClientConfig) -> anyhow::Result<ExitCode> {
    config.validate()?;

    let mut reader = FeedbackReader::from_config(&config, TracingLogger::shared())?;
    reader.connect()?;
    let tuples = reader.receive();
    reader.disconnect();

    for tuple in tuples? {
        println!("{}", serde_json::to_string(&tuple)?);
    }
    Ok(ExitCode::SUCCESS)
}
