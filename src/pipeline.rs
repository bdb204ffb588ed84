//! The per-frame dispatch pipeline: relevance filtering, demultiplexing,
//! predicate evaluation, and hand-off to the exporter.
//!
//! Everything here is synchronous and infallible from the capture loop's
//! point of view: a frame either produces an export or is dropped, and the
//! only observable failures are warnings.

use std::time::SystemTime;

use pcap::Linktype;
use tracing::{debug, warn};

use crate::export::PacketExporter;
use crate::filter::{FilterContext, OperationPredicate};
use crate::frame::extract_tcp_segment;
use crate::protocol::{Operation, Packet};

/// Picks whichever of the segment's ports is in the configured set, first
/// configured port wins. Port 0 doubles as the internal no-match sentinel,
/// so a configured 0 can never be returned; `parse_ports` filters it out
/// upstream, which keeps the collision unreachable from the CLI.
pub fn relevant_port(source: u16, destination: u16, ports: &[u16]) -> Option<u16> {
    let port = ports
        .iter()
        .copied()
        .find(|&p| p == source || p == destination)
        .unwrap_or(0);

    (port != 0).then_some(port)
}

pub struct Pipeline {
    ports: Vec<u16>,
    predicate: Option<Box<dyn OperationPredicate + Send>>,
    exporter: Box<dyn PacketExporter + Send>,
}

impl Pipeline {
    pub fn new(
        ports: Vec<u16>,
        predicate: Option<Box<dyn OperationPredicate + Send>>,
        exporter: Box<dyn PacketExporter + Send>,
    ) -> Self {
        Pipeline {
            ports,
            predicate,
            exporter,
        }
    }

    /// Runs one captured frame through the pipeline. Frames that are not
    /// decodable protocol traffic on a configured port are dropped without
    /// comment; only genuinely surprising conditions warn.
    pub fn handle_frame(&mut self, link_type: Linktype, time: SystemTime, data: &[u8]) {
        // BSD loopback (DLT_NULL) frames carry a protocol family word instead
        // of an Ethernet header and are not worth special-casing.
        if link_type == Linktype::NULL {
            warn!(
                event_name = "pipeline.unsupported_link_type",
                link_type = link_type.0,
                "dropping frame with unsupported link-layer type"
            );
            return;
        }

        let segment = match extract_tcp_segment(data) {
            Ok(segment) => segment,
            Err(err) => {
                debug!(
                    event_name = "pipeline.frame_skipped",
                    reason = %err,
                    "skipping frame without a usable tcp segment"
                );
                return;
            }
        };

        if segment.payload.is_empty() {
            return;
        }

        let Some(port) = relevant_port(segment.src_port, segment.dst_port, &self.ports) else {
            return;
        };

        let mut packet = Packet::parse(
            segment.payload,
            time,
            Some(segment.src_ip),
            Some(segment.dst_ip),
            port,
        );

        if packet.operations.is_empty() {
            return;
        }

        packet.operations = self.surface_operations(&packet);
        if packet.operations.is_empty() {
            return;
        }

        self.exporter.export(&packet);
    }

    /// Applies the predicate to each operation, keeping demux order. An
    /// absent predicate keeps everything; an evaluation failure fails open
    /// and keeps the operation it could not judge.
    fn surface_operations(&self, packet: &Packet) -> Vec<Operation> {
        let Some(predicate) = &self.predicate else {
            return packet.operations.clone();
        };

        let ctx = FilterContext::new(packet);
        packet
            .operations
            .iter()
            .filter(|operation| match predicate.evaluate(operation, &ctx) {
                Ok(keep) => keep,
                Err(err) => {
                    warn!(
                        event_name = "pipeline.predicate_failed",
                        error.message = %err,
                        "predicate evaluation failed, keeping the operation"
                    );
                    true
                }
            })
            .cloned()
            .collect()
    }
}
