use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::mpsc::{self, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use clap::Args;
use push_config_and_utils::{ClientConfig, Service, TracingLogger};
use push_connection::Connection;
use push_delivery::Message;
use push_fanout::FanoutServer;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Worker processes. Overrides the config file
    #[arg(short, long)]
    pub processes: Option<usize>,

    /// Seconds workers get to finish after stdin closes before SIGTERM
    #[arg(long, default_value_t = 30)]
    pub linger_secs: u64,
}

pub fn run(mut config: ClientConfig, args: ServeArgs) -> anyhow::Result<ExitCode> {
    if let Some(processes) = args.processes {
        config.processes = processes;
    }
    config.validate()?;

    let logger = TracingLogger::shared();
    let mut server = FanoutServer::new(&config, logger.clone())?;
    server.start(|_| Connection::new(Service::Push, &config, logger.clone()))?;

    // After the fork, so no worker inherits the reader thread.
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || read_messages(io::stdin().lock(), tx));

    let linger = Duration::from_secs(args.linger_secs);
    let mut input_closed = false;
    let mut deadline: Option<Instant> = None;
    let mut failed = 0;

    loop {
        loop {
            match rx.try_recv() {
                Ok(message) => {
                    if let Err(e) = server.add(message) {
                        warn!(error = %e, "Rejected message");
                        failed += 1;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !input_closed {
                        input_closed = true;
                        server.close();
                        deadline = Some(Instant::now() + linger);
                        info!("Input closed, waiting for workers to finish");
                    }
                    break;
                }
            }
        }

        let running = server.run()?;
        let failures = server.take_errors()?;
        failed += failures.len();
        super::print_failures(&failures)?;
        if !running {
            break;
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            warn!(
                linger_secs = args.linger_secs,
                "Workers still running, sending SIGTERM"
            );
            server.stop()?;
            deadline = None;
        }
        thread::sleep(config.poll_interval());
    }

    let failures = server.take_errors()?;
    failed += failures.len();
    super::print_failures(&failures)?;
    if !server.queue().is_empty() {
        warn!(
            undelivered = server.queue().len(),
            "Messages were never handed to a worker"
        );
    }

    info!(failed, "Serve finished");
    if failed == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Forward one `Message` per JSON line until the input ends.
fn read_messages<R: BufRead>(reader: R, tx: Sender<Message>) {
    for (index, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Unable to read input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(&line) {
            Ok(message) => {
                if tx.send(message).is_err() {
                    break;
                }
            }
            Err(e) => warn!(line = index + 1, error = %e, "Skipping invalid message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_messages_skips_blank_and_invalid_lines() {
        let token = "cd".repeat(32);
        let input = format!(
            "{{\"recipients\":[\"{token}\"],\"text\":\"one\"}}\n\n not json\n{{\"recipients\":[\"{token}\"],\"text\":\"two\",\"badge\":1}}\n"
        );
        let (tx, rx) = mpsc::channel();
        read_messages(Cursor::new(input), tx);

        let messages: Vec<Message> = rx.iter().collect();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text.as_deref(), Some("one"));
        assert_eq!(messages[1].badge, Some(1));
        assert_eq!(messages[1].recipients[0].to_hex(), token);
    }
}
