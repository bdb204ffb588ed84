//! Demultiplexing one transport payload into its pipelined operations.
//!
//! Memcached clients pipeline aggressively (N-1 GetQ + 1 Get, or N GetQ + a
//! NoOp), so a single TCP segment routinely carries several operations back
//! to back. The demultiplexer walks candidate header positions and stops
//! cleanly on the first malformed byte: everything parsed before the failure
//! is kept, and the failure is reported as a value rather than an error that
//! could escape to the capture loop.

use std::fmt;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::warn;

use crate::protocol::bytes::DecodeError;
use crate::protocol::extras::Extras;
use crate::protocol::header::{HEADER_LEN, Header, Magic};
use crate::protocol::operation::Operation;

/// Why demultiplexing stopped early. Operations parsed before the stop are
/// still returned alongside this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DemuxError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The header advertised a body length the payload cannot satisfy (for
    /// example a negative length on a hostile or mangled segment).
    #[error("unusable total body length {length} for operation at offset {at}")]
    BodyLength { at: usize, length: i32 },
}

/// Outcome of demultiplexing one payload: the operations recovered in order,
/// plus the reason decoding stopped early, if it did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demuxed {
    pub operations: Vec<Operation>,
    pub error: Option<DemuxError>,
}

/// Walks `payload` recovering pipelined operations. A payload whose first
/// byte is not a magic value yields zero operations and no error; that is the
/// common case for reassembled TCP segments that are not protocol traffic.
pub fn demux(payload: &[u8]) -> Demuxed {
    let mut operations = Vec::new();
    let mut cursor = 0usize;
    let mut error = None;

    while cursor + HEADER_LEN <= payload.len() && Magic::is_valid(payload[cursor]) {
        match parse_operation(payload, cursor) {
            Ok(operation) => {
                let advance = match usize::try_from(operation.header.total_body_length) {
                    Ok(body) => body,
                    Err(_) => {
                        error = Some(DemuxError::BodyLength {
                            at: cursor,
                            length: operation.header.total_body_length,
                        });
                        operations.push(operation);
                        break;
                    }
                };
                operations.push(operation);
                cursor += HEADER_LEN + advance;
            }
            Err(err) => {
                error = Some(err);
                break;
            }
        }
    }

    Demuxed { operations, error }
}

fn parse_operation(payload: &[u8], start: usize) -> Result<Operation, DemuxError> {
    let header = Header::decode(payload, start)?;

    let mut extras = None;
    let mut key = String::new();

    // A valid operation always has a header but may carry nothing else
    // (NoOp, Quit). Only go digging when the header says there is a body.
    if header.total_body_length > 0 && payload.len() > HEADER_LEN {
        let mut offset = start + HEADER_LEN;

        if header.extras_length > 0 {
            let region = region_at(payload, offset, header.extras_length as usize)?;
            extras = Some(Extras::decode(region, header.magic, header.opcode)?);
        }

        offset += header.extras_length as usize;
        let key_region = region_at(payload, offset, header.key_length as usize)?;
        key = parse_key(key_region);

        // Value bytes follow the key; they are skipped via the cursor
        // advance, never decoded or stored.
    }

    Ok(Operation::new(header, extras, key))
}

fn region_at(payload: &[u8], offset: usize, len: usize) -> Result<&[u8], DemuxError> {
    payload
        .get(offset..offset + len)
        .ok_or(DemuxError::Decode(DecodeError::OutOfRange {
            offset,
            width: len,
            len: payload.len(),
        }))
}

/// Keys are ASCII by protocol tradition and safely assumed UTF-8. A key that
/// fails to decode is logged and replaced with an empty string; it does not
/// abort the operation.
fn parse_key(region: &[u8]) -> String {
    match std::str::from_utf8(region) {
        Ok(key) => key.to_string(),
        Err(err) => {
            warn!(
                event_name = "demux.key_not_utf8",
                key_bytes = ?region,
                error.message = %err,
                "failed to decode key as utf-8, substituting empty string"
            );
            String::new()
        }
    }
}

/// The application-level portion of one captured TCP segment: where it came
/// from, where it went, and the operations it carried.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Arrival time as stamped by the capture source, so recorded files
    /// report their historical times.
    pub time: SystemTime,
    pub source: Option<IpAddr>,
    pub destination: Option<IpAddr>,
    /// Size of the TCP payload, excluding all lower-layer framing.
    pub size: u64,
    /// Whichever of the segment's ports matched the configured set.
    pub port: u16,
    pub operations: Vec<Operation>,
    /// Count of successfully parsed operations; on a mangled payload this is
    /// smaller than what the raw bytes suggested.
    pub op_count: usize,
}

impl Packet {
    /// Demultiplexes `payload` and assembles the packet record. A mangled
    /// payload is a warning, never an error: the operations parsed before
    /// the bad bytes are retained.
    pub fn parse(
        payload: &[u8],
        time: SystemTime,
        source: Option<IpAddr>,
        destination: Option<IpAddr>,
        port: u16,
    ) -> Self {
        let Demuxed { operations, error } = demux(payload);

        if let Some(err) = error {
            warn!(
                event_name = "demux.mangled_packet",
                recovered_operations = operations.len(),
                payload_size = payload.len(),
                error.message = %err,
                "caught a mangled packet, keeping operations parsed so far"
            );
        }

        let op_count = operations.len();
        Packet {
            time,
            source,
            destination,
            size: payload.len() as u64,
            port,
            operations,
            op_count,
        }
    }

    /// Seconds since the unix epoch, for the wire-facing JSON form.
    pub fn unix_time(&self) -> i64 {
        match self.time.duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_secs() as i64,
            Err(before_epoch) => -(before_epoch.duration().as_secs() as i64),
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "packet of {} bytes on port {} with {} operation(s)",
            self.size, self.port, self.op_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::header::Opcode;

    /// Builds a well-formed request operation with the given opcode, extras
    /// region and key, returning the raw bytes.
    fn build_operation(opcode: u8, extras: &[u8], key: &[u8], value: &[u8]) -> Vec<u8> {
        let body_len = (extras.len() + key.len() + value.len()) as i32;
        let mut raw = Vec::new();
        raw.push(0x80);
        raw.push(opcode);
        raw.extend_from_slice(&(key.len() as u16).to_be_bytes());
        raw.push(extras.len() as u8);
        raw.push(0x00);
        raw.extend_from_slice(&0u16.to_be_bytes());
        raw.extend_from_slice(&body_len.to_be_bytes());
        raw.extend_from_slice(&0i32.to_be_bytes());
        raw.extend_from_slice(&0u64.to_be_bytes());
        raw.extend_from_slice(extras);
        raw.extend_from_slice(key);
        raw.extend_from_slice(value);
        raw
    }

    #[test]
    fn demuxes_two_pipelined_operations_in_order() {
        let mut extras = Vec::new();
        extras.extend_from_slice(&42i32.to_be_bytes());
        extras.extend_from_slice(&99i32.to_be_bytes());

        let mut payload = build_operation(0x01, &extras, b"first", b"hello");
        payload.extend_from_slice(&build_operation(0x00, &[], b"second", &[]));

        let demuxed = demux(&payload);
        assert!(demuxed.error.is_none());
        assert_eq!(demuxed.operations.len(), 2);

        let first = &demuxed.operations[0];
        assert_eq!(first.opcode(), Opcode::Set);
        assert_eq!(first.key, "first");
        assert_eq!(first.extras.unwrap().flags, Some(42));
        assert_eq!(first.extras.unwrap().expiration, Some(99));

        let second = &demuxed.operations[1];
        assert_eq!(second.opcode(), Opcode::Get);
        assert_eq!(second.key, "second");
        assert_eq!(second.extras, None);
    }

    #[test]
    fn keeps_valid_operation_when_trailing_bytes_are_garbage() {
        let mut payload = build_operation(0x01, &[], b"valid", b"v");
        // A second candidate header: valid magic, but a key length far past
        // the end of the payload.
        payload.push(0x80);
        payload.push(0x01);
        payload.extend_from_slice(&0xFFFFu16.to_be_bytes());
        payload.push(0x00);
        payload.push(0x00);
        payload.extend_from_slice(&0u16.to_be_bytes());
        payload.extend_from_slice(&0x00FFFFFFi32.to_be_bytes());
        payload.extend_from_slice(&0i32.to_be_bytes());
        payload.extend_from_slice(&0u64.to_be_bytes());

        let demuxed = demux(&payload);
        assert_eq!(demuxed.operations.len(), 1);
        assert_eq!(demuxed.operations[0].key, "valid");
        assert!(demuxed.error.is_some());
    }

    #[test]
    fn payload_without_magic_yields_zero_operations_and_no_error() {
        let payload = vec![0x47u8; 64];
        let demuxed = demux(&payload);
        assert!(demuxed.operations.is_empty());
        assert!(demuxed.error.is_none());
    }

    #[test]
    fn short_payload_yields_zero_operations() {
        let demuxed = demux(&[0x80; 23]);
        assert!(demuxed.operations.is_empty());
        assert!(demuxed.error.is_none());
        assert!(demux(&[]).operations.is_empty());
    }

    #[test]
    fn negative_body_length_stops_the_loop_with_an_error() {
        let mut raw = vec![0x80, 0x0a];
        raw.extend_from_slice(&0u16.to_be_bytes());
        raw.extend_from_slice(&[0x00, 0x00]);
        raw.extend_from_slice(&0u16.to_be_bytes());
        raw.extend_from_slice(&(-100i32).to_be_bytes());
        raw.extend_from_slice(&[0x00; 12]);
        raw.extend_from_slice(&[0x80; 40]);

        let demuxed = demux(&raw);
        assert_eq!(demuxed.operations.len(), 1);
        assert!(matches!(
            demuxed.error,
            Some(DemuxError::BodyLength { at: 0, length: -100 })
        ));
    }

    #[test]
    fn invalid_utf8_key_falls_back_to_empty_string() {
        let payload = build_operation(0x04, &[], &[0xFF, 0xFE, 0xFD], &[]);
        let demuxed = demux(&payload);
        assert!(demuxed.error.is_none());
        assert_eq!(demuxed.operations.len(), 1);
        assert_eq!(demuxed.operations[0].key, "");
    }

    #[test]
    fn truncated_extras_region_keeps_prior_operations() {
        let mut payload = build_operation(0x00, &[], b"ok", &[]);
        // Second header claims 20 bytes of extras that are not there.
        let mut bad = vec![0x80, 0x05];
        bad.extend_from_slice(&0u16.to_be_bytes());
        bad.push(20);
        bad.push(0x00);
        bad.extend_from_slice(&0u16.to_be_bytes());
        bad.extend_from_slice(&20i32.to_be_bytes());
        bad.extend_from_slice(&[0x00; 12]);
        bad.extend_from_slice(&[0x01; 4]);
        payload.extend_from_slice(&bad);

        let demuxed = demux(&payload);
        assert_eq!(demuxed.operations.len(), 1);
        assert_eq!(demuxed.operations[0].key, "ok");
        assert!(demuxed.error.is_some());
    }

    #[test]
    fn packet_parse_records_count_and_metadata() {
        let payload = build_operation(0x01, &[], b"k", b"v");
        let packet = Packet::parse(
            &payload,
            UNIX_EPOCH + std::time::Duration::from_secs(1_445_455_680),
            Some("127.0.0.1".parse().unwrap()),
            Some("10.0.0.1".parse().unwrap()),
            11211,
        );

        assert_eq!(packet.op_count, 1);
        assert_eq!(packet.size, payload.len() as u64);
        assert_eq!(packet.port, 11211);
        assert_eq!(packet.unix_time(), 1_445_455_680);
    }
}
