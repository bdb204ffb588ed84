//! The memcached binary protocol decoder.
//!
//! Decoding is layered the way the wire format is: byte primitives, the
//! fixed header, the conditional extras region, the assembled operation, and
//! the packet-level demultiplexer that recovers pipelined operations from a
//! single transport payload.

pub mod bytes;
pub mod extras;
pub mod header;
pub mod operation;
pub mod packet;

pub use extras::Extras;
pub use header::{HEADER_LEN, Header, Magic, Opcode, ResponseStatus};
pub use operation::Operation;
pub use packet::{Demuxed, Packet, demux};
