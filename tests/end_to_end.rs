//! End-to-end tests: the crate's client against the crate's server over TCP.

use std::time::Duration;

use bytes::Bytes;
use h2_telemetry::client::{ClientError, RunOptions};
use h2_telemetry::lifecycle::Shutdown;
use h2_telemetry::telemetry::{generate_payload, Payload, PayloadParams};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

mod common;

#[tokio::test]
async fn sensor_post_is_echoed() {
    let server = common::start_server().await;
    let mut client = server.client().await;

    let response = client
        .post_json("/sensor", Bytes::from_static(br#"{"t":1}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), Some(200));
    assert_eq!(
        &response.body[..],
        br#"{"status":"Sensor data received","data":{"t":1}}"#
    );
    assert_eq!(response.header("content-type"), Some("application/json"));
    assert_eq!(
        response.header("content-length"),
        Some(response.body.len().to_string().as_str())
    );
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let server = common::start_server().await;
    let mut client = server.client().await;

    let response = client
        .post_json("/sensor", Bytes::from_static(b"not-json"))
        .await
        .unwrap();

    assert_eq!(response.status(), Some(400));
    let body: Value = serde_json::from_slice(&response.body).unwrap();
    let error = body["error"].as_str().unwrap();
    assert!(error.starts_with("Invalid JSON"), "got {error}");
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let server = common::start_server().await;
    let mut client = server.client().await;

    let response = client.get("/anything").await.unwrap();
    assert_eq!(response.status(), Some(404));
    assert_eq!(&response.body[..], br#"{"error":"Not Found"}"#);

    let response = client
        .post_json("/sensors", Bytes::from_static(b"{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), Some(404));
}

#[tokio::test]
async fn sequential_requests_share_one_connection() {
    let server = common::start_server().await;
    let mut client = server.client().await;

    for i in 0..20u32 {
        let body = format!(r#"{{"seq":{i}}}"#);
        let response = client.post_json("/alert", Bytes::from(body)).await.unwrap();
        assert_eq!(response.status(), Some(200));
        assert_eq!(response.stream_id.as_u32(), 2 * i + 1);

        let echoed: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(echoed["status"], "Alert data received");
        assert_eq!(echoed["data"]["seq"], i);
    }
}

#[tokio::test]
async fn body_larger_than_initial_window_waits_for_credit() {
    let server = common::start_server().await;
    let mut client = server.client().await;

    let readings: Vec<u32> = (0..20_000).collect();
    let body = serde_json::to_vec(&serde_json::json!({ "readings": readings })).unwrap();
    assert!(body.len() > 65_535);

    let response = client.post_json("/sensor", Bytes::from(body)).await.unwrap();
    assert_eq!(response.status(), Some(200));
    assert!(response.body.len() > 65_535);

    let echoed: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(echoed["data"]["readings"].as_array().unwrap().len(), 20_000);
}

#[tokio::test]
async fn concurrent_connections_are_independent() {
    let server = common::start_server().await;

    let mut handles = Vec::new();
    for node in 0..8 {
        let mut client = server.client().await;
        handles.push(tokio::spawn(async move {
            for i in 0..10 {
                let body = format!(r#"{{"node":{node},"i":{i}}}"#);
                let response = client.post_json("/sensor", Bytes::from(body)).await.unwrap();
                let echoed: Value = serde_json::from_slice(&response.body).unwrap();
                assert_eq!(echoed["data"]["node"], node);
                assert_eq!(echoed["data"]["i"], i);
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn generated_payload_round_trips() {
    let server = common::start_server().await;
    let mut client = server.client().await;

    let payload = generate_payload(&PayloadParams {
        node_id: "node_42".into(),
        ..PayloadParams::default()
    });
    let response = client.post_payload("/alert", &payload).await.unwrap();
    assert_eq!(response.status(), Some(200));

    let echoed: Value = serde_json::from_slice(&response.body).unwrap();
    let data: Payload = serde_json::from_value(echoed["data"].clone()).unwrap();
    assert_eq!(data.message_id, payload.message_id);
    assert_eq!(data.timestamp, payload.timestamp);
    assert_eq!(data.node_id, "node_42");
    assert_eq!(data.application_protocol, payload.application_protocol);
    assert_eq!(data.transport_protocol, payload.transport_protocol);
    assert!((data.sensor_readings.temperature - payload.sensor_readings.temperature).abs() < 1e-9);
    assert!((data.kb_estimate - payload.kb_estimate).abs() < 1e-9);
}

#[tokio::test]
async fn run_loop_stops_after_count() {
    let server = common::start_server().await;
    let mut client = server.client().await;

    let options = RunOptions {
        path: "/sensor".into(),
        interval: Duration::from_millis(5),
        max_requests: Some(3),
        params: PayloadParams::default(),
    };
    let shutdown = Shutdown::new();
    let mut stop = shutdown.subscribe();

    let sent = client.run(&options, &mut stop).await.unwrap();
    assert_eq!(sent, 3);
    client.close().await.unwrap();
}

#[tokio::test]
async fn run_loop_stops_on_shutdown() {
    let server = common::start_server().await;
    let mut client = server.client().await;

    let options = RunOptions {
        path: "/sensor".into(),
        interval: Duration::from_secs(60),
        max_requests: None,
        params: PayloadParams::default(),
    };
    let shutdown = Shutdown::new();
    let mut stop = shutdown.subscribe();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.trigger();
    });

    let sent = tokio::time::timeout(Duration::from_secs(5), client.run(&options, &mut stop))
        .await
        .expect("loop stopped")
        .unwrap();
    assert_eq!(sent, 1);
}

#[tokio::test]
async fn run_loop_abandons_unanswered_request_on_shutdown() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
    });

    let mut client = h2_telemetry::TelemetryClient::connect(&addr.to_string(), "test")
        .await
        .unwrap();
    let options = RunOptions {
        path: "/sensor".into(),
        interval: Duration::from_millis(5),
        max_requests: None,
        params: PayloadParams::default(),
    };
    let shutdown = Shutdown::new();
    let mut stop = shutdown.subscribe();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.trigger();
    });

    let sent = tokio::time::timeout(Duration::from_secs(5), client.run(&options, &mut stop))
        .await
        .expect("in-flight request abandoned")
        .unwrap();
    assert_eq!(sent, 0);
}

#[tokio::test]
async fn garbage_preface_gets_goaway_and_close() {
    let server = common::start_server().await;
    let mut stream = tokio::net::TcpStream::connect(server.addr).await.unwrap();

    stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();

    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut received))
        .await
        .expect("server closed the connection")
        .unwrap();

    // SETTINGS first, then a GOAWAY (type 0x7) somewhere after it.
    assert_eq!(received[3], 0x4);
    let mut offset = 0;
    let mut kinds = Vec::new();
    while offset + 9 <= received.len() {
        let length = (received[offset] as usize) << 16
            | (received[offset + 1] as usize) << 8
            | received[offset + 2] as usize;
        kinds.push(received[offset + 3]);
        offset += 9 + length;
    }
    assert!(kinds.contains(&0x7), "frames: {kinds:?}");
}

#[tokio::test]
async fn peer_close_mid_request_fails_client_call() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
    });

    let mut client = h2_telemetry::TelemetryClient::connect(&addr.to_string(), "test")
        .await
        .unwrap();
    let result = client.get("/anything").await;
    assert!(matches!(
        result,
        Err(ClientError::ConnectionClosed(_)) | Err(ClientError::Io(_))
    ));
}
