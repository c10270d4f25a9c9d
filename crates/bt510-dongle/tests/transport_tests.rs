//! Integration tests for the AT transport
//!
//! A duplex pipe stands in for the dongle's serial port: the test plays
//! the dongle's side of the conversation and asserts on what the
//! transport writes.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::{sleep, timeout};

use bt510_core::DongleConfig;
use bt510_dongle::{AtTransport, ConnectionState, DongleError};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

fn start_transport(config: DongleConfig) -> (AtTransport, DuplexStream) {
    let (host, device) = tokio::io::duplex(1024);
    let (reader, writer) = tokio::io::split(host);
    (AtTransport::start(reader, writer, config), device)
}

/// Config with timings scaled down for tests.
fn fast_config() -> DongleConfig {
    let mut config = DongleConfig::default();
    config.pairing_step_secs = 0.05;
    config.disconnect_timeout_secs = 0.2;
    config.connection_timeout_secs = 0.1;
    config.escape_delay_ms = 10;
    config
}

/// Read one `\r`-terminated command from the host.
async fn read_command(device: &mut DuplexStream) -> String {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = timeout(Duration::from_secs(2), device.read(&mut byte))
            .await
            .expect("timed out waiting for a command")
            .expect("device read failed");
        assert!(n > 0, "stream closed while reading a command");
        if byte[0] == b'\r' {
            break;
        }
        out.push(byte[0]);
    }
    String::from_utf8(out).expect("command was not UTF-8")
}

async fn expect_no_command(device: &mut DuplexStream) {
    let mut byte = [0u8; 1];
    let result = timeout(Duration::from_millis(100), device.read(&mut byte)).await;
    assert!(result.is_err(), "unexpected bytes from the host");
}

// ----------------------------------------------------------------------------
// Command Correlation
// ----------------------------------------------------------------------------

#[tokio::test]
async fn command_collects_lines_until_success_prefix() {
    let (transport, mut device) = start_transport(DongleConfig::default());

    let device_task = tokio::spawn(async move {
        assert_eq!(read_command(&mut device).await, "ATI 0");
        device.write_all(b"BUSY\rOK\r").await.unwrap();
        device
    });

    let lines = transport
        .command("ATI 0", "OK", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(lines, vec!["BUSY".to_string(), "OK".to_string()]);

    device_task.await.unwrap();
    transport.stop().await;
}

#[tokio::test]
async fn error_line_is_terminal_but_not_an_error() {
    let (transport, mut device) = start_transport(DongleConfig::default());

    let device_task = tokio::spawn(async move {
        read_command(&mut device).await;
        device.write_all(b"ERROR 14\r").await.unwrap();
        device
    });

    let lines = transport
        .command("ATZ", "OK", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(lines, vec!["ERROR 14".to_string()]);

    device_task.await.unwrap();
    transport.stop().await;
}

#[tokio::test]
async fn silent_device_times_out() {
    let (transport, mut device) = start_transport(DongleConfig::default());

    let err = transport
        .command("ATZ", "OK", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, DongleError::CommandTimeout { command } if command == "ATZ"));

    expect_no_command(&mut device).await;
    transport.stop().await;
}

#[tokio::test]
async fn concurrent_commands_are_serialized() {
    let (transport, mut device) = start_transport(DongleConfig::default());
    let transport = Arc::new(transport);

    let device_task = tokio::spawn(async move {
        // One command at a time: the second write must not arrive until
        // the first exchange finished.
        let first = read_command(&mut device).await;
        expect_no_command(&mut device).await;
        device.write_all(b"OK\r").await.unwrap();
        let second = read_command(&mut device).await;
        device.write_all(b"OK\r").await.unwrap();
        (first, second)
    });

    let a = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.command("ATI 3", "OK", Duration::from_secs(2)).await })
    };
    let b = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.command("ATI 4", "OK", Duration::from_secs(2)).await })
    };

    assert!(a.await.unwrap().is_ok());
    assert!(b.await.unwrap().is_ok());

    let (first, second) = device_task.await.unwrap();
    let mut seen = vec![first, second];
    seen.sort();
    assert_eq!(seen, vec!["ATI 3".to_string(), "ATI 4".to_string()]);

    match Arc::try_unwrap(transport) {
        Ok(transport) => transport.stop().await,
        Err(_) => panic!("transport still shared"),
    }
}

// ----------------------------------------------------------------------------
// Message Routing
// ----------------------------------------------------------------------------

#[tokio::test]
async fn advertisements_and_json_reach_their_queues() {
    let (transport, mut device) = start_transport(DongleConfig::default());

    device
        .write_all(b"AD 01C13A7E4118A2 -60 0201061BFF\r")
        .await
        .unwrap();
    // Give the reader a chance to flush the line before the braces arrive;
    // a line sharing a feed with an unbalanced brace would be deferred.
    sleep(Duration::from_millis(100)).await;
    device
        .write_all(br#"{"jsonrpc": "2.0", "id": 1, "result": "ok"}"#)
        .await
        .unwrap();

    let ad = transport
        .get_scan(Duration::from_secs(1))
        .await
        .expect("advertisement line");
    assert!(ad.starts_with("AD "));

    let packet = transport
        .get_json(Duration::from_secs(1))
        .await
        .expect("JSON packet");
    assert_eq!(packet["result"], "ok");

    transport.stop().await;
}

#[tokio::test]
async fn passkey_prompt_is_answered_automatically() {
    let (transport, mut device) = start_transport(DongleConfig::default());

    device.write_all(b"passkey?\r").await.unwrap();
    assert_eq!(read_command(&mut device).await, "AT+PRSP 1,123456");
    device.write_all(b"OK\r").await.unwrap();

    // The dispatcher must survive the exchange and stay responsive.
    device.write_all(b"passkey?\r").await.unwrap();
    assert_eq!(read_command(&mut device).await, "AT+PRSP 1,123456");
    // No answer this time: the failure is logged, not fatal.

    transport.stop().await;
}

#[tokio::test]
async fn vsp_send_without_link_is_refused() {
    let (transport, mut device) = start_transport(DongleConfig::default());

    let err = transport.send_vsp("{}").await.unwrap_err();
    assert!(matches!(err, DongleError::TransportUnavailable));
    expect_no_command(&mut device).await;

    transport.stop().await;
}

// ----------------------------------------------------------------------------
// Connection Sequence
// ----------------------------------------------------------------------------

#[tokio::test]
async fn connect_pairs_once_then_retries_secure_mode() {
    let (transport, mut device) = start_transport(fast_config());

    let device_task = tokio::spawn(async move {
        let mut commands = Vec::new();

        // Direct secure attempt: stay silent so it times out.
        commands.push(read_command(&mut device).await);

        // Plain-mode fallback.
        commands.push(read_command(&mut device).await);
        device.write_all(b"connect 1\r").await.unwrap();

        commands.push(read_command(&mut device).await);
        device.write_all(b"OK\rencrypt:0\r").await.unwrap();

        commands.push(read_command(&mut device).await);
        device.write_all(b"OK\rNOCARRIER 01AABB\r").await.unwrap();

        // Second and final secure attempt succeeds.
        commands.push(read_command(&mut device).await);
        device.write_all(b"CONNECT\r").await.unwrap();

        (commands, device)
    });

    transport
        .connect("01c13a7e4118a2", Duration::from_millis(100))
        .await
        .expect("connect should succeed after pairing");
    assert!(transport.is_connected());
    assert_eq!(transport.state(), ConnectionState::SecureConnected);

    let (commands, _device) = device_task.await.unwrap();
    assert_eq!(
        commands,
        vec![
            "ATD 01c13a7e4118a2".to_string(),
            "AT+LCON 01c13a7e4118a2".to_string(),
            "AT+PAIR 1".to_string(),
            "AT+LDSC 1".to_string(),
            "ATD 01c13a7e4118a2".to_string(),
        ]
    );
    // Secure mode was re-attempted exactly once.
    assert_eq!(commands.iter().filter(|c| c.starts_with("ATD")).count(), 2);

    transport.stop().await;
}

#[tokio::test]
async fn pairing_fallback_is_consumed_after_one_attempt() {
    let (transport, mut device) = start_transport(fast_config());

    // First call: secure times out, plain-mode times out.
    let err = transport
        .connect("01aabb", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, DongleError::CommandTimeout { .. }));

    // Second call: straight to failure, no plain-mode attempt.
    let err = transport
        .connect("01aabb", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, DongleError::CommandTimeout { .. }));
    assert_eq!(transport.state(), ConnectionState::Failed);
    assert!(!transport.is_connected());

    // The device saw the fallback exactly once.
    assert_eq!(read_command(&mut device).await, "ATD 01aabb");
    assert_eq!(read_command(&mut device).await, "AT+LCON 01aabb");
    assert_eq!(read_command(&mut device).await, "ATD 01aabb");
    expect_no_command(&mut device).await;

    // allow_pairing re-arms the fallback for the next sensor.
    transport.allow_pairing();
    let err = transport
        .connect("01ccdd", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, DongleError::CommandTimeout { .. }));
    assert_eq!(read_command(&mut device).await, "ATD 01ccdd");
    assert_eq!(read_command(&mut device).await, "AT+LCON 01ccdd");

    transport.stop().await;
}

#[tokio::test]
async fn disconnect_writes_escape_sequence_and_waits() {
    let (transport, mut device) = start_transport(fast_config());

    let device_task = tokio::spawn(async move {
        // Fast secure connect.
        assert_eq!(read_command(&mut device).await, "ATD 01aabb");
        device.write_all(b"CONNECT\r").await.unwrap();

        // Escape sequence: four carets, no terminator.
        let mut escapes = [0u8; 4];
        timeout(Duration::from_secs(2), device.read_exact(&mut escapes))
            .await
            .expect("timed out waiting for escapes")
            .unwrap();
        assert_eq!(&escapes, b"^^^^");
        device.write_all(b"NOCARRIER 01aabb\r").await.unwrap();
        device
    });

    transport
        .connect("01aabb", Duration::from_millis(200))
        .await
        .unwrap();
    assert!(transport.is_connected());

    transport.disconnect().await;
    assert!(!transport.is_connected());
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    device_task.await.unwrap();
    transport.stop().await;
}

#[tokio::test]
async fn stop_shuts_both_tasks_down() {
    let (transport, device) = start_transport(DongleConfig::default());
    // stop() must return even with the device silent and no traffic.
    timeout(Duration::from_secs(1), transport.stop())
        .await
        .expect("stop did not complete");
    drop(device);
}
