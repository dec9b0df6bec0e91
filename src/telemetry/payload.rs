//! Synthetic sensor payloads.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::telemetry::message_id::MessageIdAllocator;

/// Application-layer protocol tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationProtocol {
    #[serde(rename = "CoAP")]
    Coap,
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "MQTT")]
    Mqtt,
}

impl ApplicationProtocol {
    pub const ALL: [Self; 3] = [Self::Coap, Self::Http, Self::Mqtt];
}

/// Transport-layer protocol tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportProtocol {
    #[serde(rename = "QUIC")]
    Quic,
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
}

impl TransportProtocol {
    pub const ALL: [Self; 3] = [Self::Quic, Self::Tcp, Self::Udp];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReadings {
    /// Degrees Celsius, 18.0 to 35.0.
    pub temperature: f64,
    /// Percent, 10.0 to 60.0.
    pub soil_moisture: f64,
    /// Percent relative humidity, 30.0 to 90.0.
    pub humidity: f64,
}

/// One synthetic telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub message_id: String,
    /// Local time, ISO-8601 with microseconds.
    pub timestamp: String,
    pub node_id: String,
    pub application_protocol: ApplicationProtocol,
    pub transport_protocol: TransportProtocol,
    /// Estimated size in KB, 0.75 to 1.25.
    pub kb_estimate: f64,
    pub retransmission_count: u32,
    pub sensor_readings: SensorReadings,
    pub packet_type: String,
    pub sensor_type: String,
}

/// Caller overrides for generated payloads.
///
/// Protocol tags left as `None` are drawn uniformly at random.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadParams {
    pub node_id: String,
    pub application_protocol: Option<ApplicationProtocol>,
    pub transport_protocol: Option<TransportProtocol>,
    pub packet_type: String,
    pub sensor_type: String,
    pub retransmission_count: u32,
}

impl Default for PayloadParams {
    fn default() -> Self {
        Self {
            node_id: "node_01".to_string(),
            application_protocol: None,
            transport_protocol: None,
            packet_type: "sensor_reading".to_string(),
            sensor_type: "combined_environmental".to_string(),
            retransmission_count: 0,
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn pick<T: Copy, R: Rng + ?Sized>(options: &[T], rng: &mut R) -> T {
    options[rng.gen_range(0..options.len())]
}

/// Generate a payload using the process-wide identifier allocator.
pub fn generate_payload(params: &PayloadParams) -> Payload {
    generate_payload_with(MessageIdAllocator::global(), params, &mut rand::thread_rng())
}

/// Generate a payload from an explicit allocator and random source.
pub fn generate_payload_with<R: Rng + ?Sized>(
    ids: &MessageIdAllocator,
    params: &PayloadParams,
    rng: &mut R,
) -> Payload {
    let application_protocol = match params.application_protocol {
        Some(protocol) => protocol,
        None => pick(&ApplicationProtocol::ALL, rng),
    };
    let transport_protocol = match params.transport_protocol {
        Some(protocol) => protocol,
        None => pick(&TransportProtocol::ALL, rng),
    };

    Payload {
        message_id: ids.next_id().to_string(),
        timestamp: chrono::Local::now()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string(),
        node_id: params.node_id.clone(),
        application_protocol,
        transport_protocol,
        kb_estimate: round_to(rng.gen_range(0.75..=1.25), 2),
        retransmission_count: params.retransmission_count,
        sensor_readings: SensorReadings {
            temperature: round_to(rng.gen_range(18.0..=35.0), 1),
            soil_moisture: round_to(rng.gen_range(10.0..=60.0), 1),
            humidity: round_to(rng.gen_range(30.0..=90.0), 1),
        },
        packet_type: params.packet_type.clone(),
        sensor_type: params.sensor_type.clone(),
    }
}
