//! Emitting decoded packets: a human-oriented log line per operation, or a
//! machine-oriented JSON object per packet on stdout.
//!
//! The JSON encoders build their maps field by field so the output key order
//! is stable, and every entity has a fixed shape: absent entities render as
//! `{}`, absent fields as `null`.

use serde_json::{Map, Value, json};
use tracing::error;

use crate::protocol::{Extras, Header, Operation, Packet};

/// Sink for fully decoded packets. The packet's `operations` are the ones
/// that survived filtering; `op_count` remains the parsed total.
pub trait PacketExporter {
    fn export(&mut self, packet: &Packet);
}

/// Prints one diagnostic line per operation, in the form
/// `src -> dst port time UTC (i/n: size bytes) Packet Magic: Opcode key extras = status`.
pub struct LogExporter;

impl PacketExporter for LogExporter {
    fn export(&mut self, packet: &Packet) {
        let count = packet.operations.len();
        for (index, operation) in packet.operations.iter().enumerate() {
            println!("{}", operation_line(packet, index + 1, count, operation));
        }
    }
}

/// Prints one JSON object per packet on stdout.
pub struct JsonExporter;

impl PacketExporter for JsonExporter {
    fn export(&mut self, packet: &Packet) {
        match serde_json::to_string(&packet_to_json(packet)) {
            Ok(line) => println!("{line}"),
            Err(err) => error!(
                event_name = "export.json_encode_failed",
                error.message = %err,
                "failed to encode packet as json"
            ),
        }
    }
}

fn operation_line(packet: &Packet, index: usize, count: usize, operation: &Operation) -> String {
    let source = packet
        .source
        .map(|addr| addr.to_string())
        .unwrap_or_default();
    let destination = packet
        .destination
        .map(|addr| addr.to_string())
        .unwrap_or_default();

    let key = if operation.key.trim().is_empty() {
        "<key omitted>"
    } else {
        operation.key.as_str()
    };

    let extras = operation
        .extras
        .map(|extras| extras.to_string())
        .unwrap_or_default();

    let status = if operation.magic().is_received() {
        format!("= {}", operation.header.status())
    } else {
        String::new()
    };

    format!(
        "{source} -> {destination} {port} {time} UTC ({index}/{count}: {size} bytes) Packet {magic}: {opcode} {key} {extras} {status}",
        port = packet.port,
        time = packet.unix_time(),
        size = packet.size,
        magic = operation.magic(),
        opcode = operation.opcode(),
    )
}

/// Encodes a packet with its operations. Field order is fixed.
pub fn packet_to_json(packet: &Packet) -> Value {
    let mut map = Map::new();
    map.insert("opCount".to_string(), json!(packet.op_count));
    map.insert("time".to_string(), json!(packet.unix_time()));
    map.insert(
        "source".to_string(),
        packet
            .source
            .map_or(Value::Null, |addr| json!(addr.to_string())),
    );
    map.insert(
        "destination".to_string(),
        packet
            .destination
            .map_or(Value::Null, |addr| json!(addr.to_string())),
    );
    map.insert("size".to_string(), json!(packet.size));
    map.insert("port".to_string(), json!(packet.port));
    map.insert(
        "operations".to_string(),
        Value::Array(packet.operations.iter().map(operation_to_json).collect()),
    );
    Value::Object(map)
}

pub fn operation_to_json(operation: &Operation) -> Value {
    let mut map = Map::new();
    map.insert("key".to_string(), json!(operation.key));
    map.insert("header".to_string(), header_to_json(&operation.header));
    map.insert(
        "extras".to_string(),
        extras_to_json(operation.extras.as_ref()),
    );
    Value::Object(map)
}

/// Encodes a header. The status-or-vbucket word splits by direction: a
/// received operation carries a symbolic status and a null `vbucketId`, a
/// requested one carries the raw vbucket id and a null `status`.
pub fn header_to_json(header: &Header) -> Value {
    let mut map = Map::new();
    map.insert("magic".to_string(), json!(header.magic.to_string()));
    map.insert("opCode".to_string(), json!(header.opcode.to_string()));
    map.insert("keyLength".to_string(), json!(header.key_length));
    map.insert("extrasLength".to_string(), json!(header.extras_length));
    map.insert("dataType".to_string(), json!(header.data_type));

    if header.magic.is_received() {
        map.insert("status".to_string(), json!(header.status().to_string()));
        map.insert("vbucketId".to_string(), Value::Null);
    } else {
        map.insert("vbucketId".to_string(), json!(header.status_or_vbucket));
        map.insert("status".to_string(), Value::Null);
    }

    map.insert(
        "totalBodyLength".to_string(),
        json!(header.total_body_length),
    );
    map.insert("opaque".to_string(), json!(header.opaque));
    map.insert("cas".to_string(), json!(header.cas));
    Value::Object(map)
}

/// Encodes the extras, `{}` when absent.
pub fn extras_to_json(extras: Option<&Extras>) -> Value {
    let Some(extras) = extras else {
        return Value::Object(Map::new());
    };

    let mut map = Map::new();
    map.insert("flags".to_string(), opt(extras.flags));
    map.insert("expiration".to_string(), opt(extras.expiration));
    map.insert("amount".to_string(), opt(extras.amount));
    map.insert("initialValue".to_string(), opt(extras.initial_value));
    map.insert("verbosity".to_string(), opt(extras.verbosity));
    Value::Object(map)
}

fn opt<T: Into<Value>>(value: Option<T>) -> Value {
    value.map_or(Value::Null, Into::into)
}
