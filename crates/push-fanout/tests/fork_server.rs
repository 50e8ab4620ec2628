//! Forks real worker processes over mock transports.
//!
//! Everything lives in one test so that no other test thread is running
//! while the harness forks.

use push_config_and_utils::NoopLogger;
use push_connection::mock::MockTransport;
use push_connection::ConnectionError;
use push_delivery::{DeliverySettings, Message};
use push_fanout::{FanoutError, FanoutServer};
use push_wire::{DeviceToken, StatusCode};
use std::io;
use std::time::{Duration, Instant};

fn settings() -> DeliverySettings {
    DeliverySettings {
        send_retry_times: 3,
        write_interval: Duration::ZERO,
        socket_select_timeout: Duration::ZERO,
    }
}

fn server(processes: usize) -> FanoutServer {
    FanoutServer::with_settings(
        processes,
        settings(),
        Duration::from_millis(5),
        NoopLogger::shared(),
    )
    .unwrap()
}

fn message(n: u8) -> Message {
    let mut message = Message::new()
        .with_text(format!("message {}", n))
        .with_custom_identifier(format!("m{}", n));
    message.recipients.push(DeviceToken::from_bytes([n; 32]));
    message
}

#[test]
fn test_fanout_lifecycle() {
    // ========================================================================
    // Factory errors surface before anything is forked
    // ========================================================================
    let mut broken = server(2);
    let err = broken
        .start(|_| -> Result<MockTransport, ConnectionError> {
            Err(io::Error::other("no certificate").into())
        })
        .unwrap_err();
    assert!(matches!(err, FanoutError::Connection(_)));
    assert!(broken.worker_pids().is_empty());
    assert!(matches!(
        broken.start(|_| Ok(MockTransport::new())),
        Err(FanoutError::AlreadyStarted)
    ));

    // ========================================================================
    // Round-robin delivery with one rejected notification
    // ========================================================================
    let mut fanout = server(3);
    fanout
        .start(|index| {
            let mock = MockTransport::new();
            if index == 0 {
                // First notification this worker sends is message 1.
                mock.reject(1, 8);
            }
            Ok(mock)
        })
        .unwrap();
    assert_eq!(fanout.worker_pids().len(), 3);
    assert_eq!(fanout.running_processes(), 3);

    for n in 1..=6 {
        fanout.add(message(n)).unwrap();
    }
    assert_eq!(fanout.queue().len(), 6);

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut errors = Vec::new();
    while errors.is_empty() && Instant::now() < deadline {
        assert!(fanout.run().unwrap());
        errors = fanout.take_errors().unwrap();
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(fanout.queue().is_empty());
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].sequence_id, 1);
    assert_eq!(errors[0].device_token, DeviceToken::from_bytes([1; 32]));
    assert_eq!(errors[0].custom_identifier.as_deref(), Some("m1"));
    assert_eq!(
        errors[0].last_error().map(|e| e.status_code),
        Some(StatusCode::INVALID_TOKEN)
    );

    fanout.stop().unwrap();
    assert!(fanout.wait(Duration::from_secs(10)).unwrap());
    assert_eq!(fanout.running_processes(), 0);
    assert!(!fanout.run().unwrap());

    // ========================================================================
    // Workers that cannot connect exit on their own
    // ========================================================================
    let mut unreachable = server(2);
    unreachable
        .start(|_| {
            let mock = MockTransport::new();
            mock.fail_next_connects(1);
            Ok(mock)
        })
        .unwrap();
    assert!(unreachable.wait(Duration::from_secs(10)).unwrap());
    assert_eq!(unreachable.running_processes(), 0);

    // ========================================================================
    // close() lets workers finish; their failures are still collected
    // ========================================================================
    let mut closing = server(2);
    closing
        .start(|index| {
            let mock = MockTransport::new();
            if index == 1 {
                mock.reject(1, 8);
            }
            Ok(mock)
        })
        .unwrap();
    for n in 1..=4 {
        closing.add(message(n)).unwrap();
    }
    closing.close();
    assert!(closing.queue().is_empty());
    assert!(closing.wait(Duration::from_secs(10)).unwrap());
    let errors = closing.take_errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].device_token, DeviceToken::from_bytes([2; 32]));

    // ========================================================================
    // A flood of failures flowing back while the parent is still handing
    // out messages does not stall either side
    // ========================================================================
    const FLOOD: u32 = 3000;
    let mut flooded = server(1);
    flooded
        .start(|_| {
            let mock = MockTransport::new();
            for id in 1..=FLOOD {
                mock.reject(id, 8);
            }
            Ok(mock)
        })
        .unwrap();
    for n in 1..=FLOOD {
        let mut message = Message::new()
            .with_text(format!("flood {}", n))
            .with_custom_identifier(format!("f{}", n));
        message.recipients.push(DeviceToken::from_bytes([7; 32]));
        flooded.add(message).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(60);
    let mut errors = Vec::new();
    while errors.len() < FLOOD as usize && Instant::now() < deadline {
        flooded.run().unwrap();
        errors.extend(flooded.take_errors().unwrap());
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(flooded.queue().is_empty());
    let ids: Vec<u32> = errors.iter().map(|n| n.sequence_id).collect();
    assert_eq!(ids, (1..=FLOOD).collect::<Vec<_>>());
    flooded.close();
    assert!(flooded.wait(Duration::from_secs(10)).unwrap());

    // ========================================================================
    // Dropping the server closes the channels; workers drain and exit
    // ========================================================================
    let mut dropped = server(1);
    dropped.start(|_| Ok(MockTransport::new())).unwrap();
    let pid = dropped.worker_pids()[0];
    dropped.add(message(9)).unwrap();
    dropped.run().unwrap();
    drop(dropped);

    let status = nix::sys::wait::waitpid(pid, None).unwrap();
    assert_eq!(status, nix::sys::wait::WaitStatus::Exited(pid, 0));
}
