//! Integration tests for the JSON-RPC commander over the bench UART
//! transport

use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;

use bt510_core::CommanderConfig;
use bt510_dongle::{Commander, DongleError, JsonSerialTransport};

fn fast_config() -> CommanderConfig {
    let mut config = CommanderConfig::default();
    config.inter_message_delay_secs = 0.0;
    config.response_timeout_secs = 1.0;
    config.reset_after_write_delay_secs = 0.0;
    config.reset_delay_secs = 0.0;
    config
}

fn start_commander(device_side: DuplexStream) -> Commander<JsonSerialTransport> {
    let (reader, writer) = tokio::io::split(device_side);
    Commander::new(JsonSerialTransport::start(reader, writer), fast_config())
}

/// Read one JSON-RPC request off the wire.
async fn read_request(device: &mut DuplexStream) -> Value {
    let mut buf = [0u8; 512];
    let n = timeout(Duration::from_secs(2), device.read(&mut buf))
        .await
        .expect("timed out waiting for a request")
        .expect("device read failed");
    serde_json::from_slice(&buf[..n]).expect("request was not JSON")
}

#[tokio::test]
async fn get_attribute_returns_the_named_field() {
    let (host, mut device) = tokio::io::duplex(1024);
    let commander = start_commander(host);

    let device_task = tokio::spawn(async move {
        let request = read_request(&mut device).await;
        assert_eq!(request["method"], "get");
        assert_eq!(request["params"], serde_json::json!(["sensorName"]));
        let reply = format!(
            "{{\"jsonrpc\": \"2.0\", \"id\": {}, \"result\": \"ok\", \"sensorName\": \"Test-10\"}}\r\n",
            request["id"]
        );
        device.write_all(reply.as_bytes()).await.unwrap();
        device
    });

    let value = commander.get_attribute("sensorName").await.unwrap();
    assert_eq!(value, "Test-10");

    device_task.await.unwrap();
    commander.into_channel().stop().await;
}

#[tokio::test]
async fn set_attributes_expects_plain_ok() {
    let (host, mut device) = tokio::io::duplex(1024);
    let commander = start_commander(host);

    let device_task = tokio::spawn(async move {
        let request = read_request(&mut device).await;
        assert_eq!(request["method"], "set");
        assert_eq!(request["params"]["lock"], 0);
        let reply = format!(
            "{{\"jsonrpc\": \"2.0\", \"id\": {}, \"result\": \"ok\"}}\r\n",
            request["id"]
        );
        device.write_all(reply.as_bytes()).await.unwrap();
        device
    });

    commander.unlock().await.unwrap();

    device_task.await.unwrap();
    commander.into_channel().stop().await;
}

#[tokio::test]
async fn error_envelope_surfaces_as_rejection() {
    let (host, mut device) = tokio::io::duplex(1024);
    let commander = start_commander(host);

    let device_task = tokio::spawn(async move {
        let request = read_request(&mut device).await;
        let reply = format!(
            "{{\"jsonrpc\": \"2.0\", \"id\": {}, \"error\": {{\"code\": -32602, \"message\": \"locked\"}}}}\r\n",
            request["id"]
        );
        device.write_all(reply.as_bytes()).await.unwrap();
        device
    });

    let err = commander.set_epoch(1_573_838_481).await.unwrap_err();
    assert!(matches!(err, DongleError::Rejected(_)));

    device_task.await.unwrap();
    commander.into_channel().stop().await;
}

#[tokio::test]
async fn silent_sensor_times_out() {
    let (host, _device) = tokio::io::duplex(1024);
    let mut config = fast_config();
    config.response_timeout_secs = 0.1;
    let (reader, writer) = tokio::io::split(host);
    let commander = Commander::new(JsonSerialTransport::start(reader, writer), config);

    let err = commander.get_epoch().await.unwrap_err();
    assert!(matches!(err, DongleError::CommandTimeout { command } if command == "getEpoch"));

    commander.into_channel().stop().await;
}

#[tokio::test]
async fn read_log_returns_the_size_and_payload_pair() {
    let (host, mut device) = tokio::io::duplex(1024);
    let commander = start_commander(host);

    let device_task = tokio::spawn(async move {
        let request = read_request(&mut device).await;
        assert_eq!(request["method"], "readLog");
        let reply = format!(
            "{{\"jsonrpc\": \"2.0\", \"id\": {}, \"result\": [16, \"kd7OXWsJAQCR3s5dwgsMAQ==\"]}}\r\n",
            request["id"]
        );
        device.write_all(reply.as_bytes()).await.unwrap();
        device
    });

    let (size, data) = commander.read_log(128).await.unwrap();
    assert_eq!(size, 16);
    assert_eq!(data, "kd7OXWsJAQCR3s5dwgsMAQ==");

    device_task.await.unwrap();
    commander.into_channel().stop().await;
}
