//! Lower-layer frame decomposition: Ethernet → IPv4/IPv6 → TCP.
//!
//! The dispatch pipeline only needs the TCP 4-tuple and the payload bytes,
//! so this parser extracts exactly that and nothing more. Reassembly of
//! out-of-order segments is deliberately not attempted; each captured frame
//! is decomposed in isolation.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const IP_PROTO_TCP: u8 = 6;

/// One TCP segment lifted out of a captured Ethernet frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment<'a> {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    TooShort,
    UnsupportedEtherType,
    NotTcp,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooShort => write!(f, "frame too short"),
            FrameError::UnsupportedEtherType => write!(f, "unsupported ether type"),
            FrameError::NotTcp => write!(f, "not a tcp segment"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Extracts the TCP segment from a raw Ethernet frame, skipping a single
/// 802.1Q tag if present.
pub fn extract_tcp_segment(data: &[u8]) -> Result<TcpSegment<'_>, FrameError> {
    let mut offset = 0usize;
    let mut ether_type = parse_ethernet(data, &mut offset)?;

    if ether_type == ETHERTYPE_VLAN {
        if data.len() < offset + 4 {
            return Err(FrameError::TooShort);
        }
        ether_type = u16::from_be_bytes([data[offset + 2], data[offset + 3]]);
        offset += 4;
    }

    let (src_ip, dst_ip, protocol) = match ether_type {
        ETHERTYPE_IPV4 => parse_ipv4(data, &mut offset)?,
        ETHERTYPE_IPV6 => parse_ipv6(data, &mut offset)?,
        _ => return Err(FrameError::UnsupportedEtherType),
    };

    if protocol != IP_PROTO_TCP {
        return Err(FrameError::NotTcp);
    }

    let (src_port, dst_port, payload) = parse_tcp(data, offset)?;

    Ok(TcpSegment {
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        payload,
    })
}

fn parse_ethernet(data: &[u8], offset: &mut usize) -> Result<u16, FrameError> {
    if data.len() < *offset + 14 {
        return Err(FrameError::TooShort);
    }

    let ether_type = u16::from_be_bytes([data[*offset + 12], data[*offset + 13]]);
    *offset += 14;
    Ok(ether_type)
}

fn parse_ipv4(data: &[u8], offset: &mut usize) -> Result<(IpAddr, IpAddr, u8), FrameError> {
    if data.len() < *offset + 20 {
        return Err(FrameError::TooShort);
    }

    let ihl = ((data[*offset] & 0x0F) as usize) * 4;
    if ihl < 20 || data.len() < *offset + ihl {
        return Err(FrameError::TooShort);
    }

    let protocol = data[*offset + 9];
    let src_ip = Ipv4Addr::new(
        data[*offset + 12],
        data[*offset + 13],
        data[*offset + 14],
        data[*offset + 15],
    );
    let dst_ip = Ipv4Addr::new(
        data[*offset + 16],
        data[*offset + 17],
        data[*offset + 18],
        data[*offset + 19],
    );

    *offset += ihl;
    Ok((IpAddr::V4(src_ip), IpAddr::V4(dst_ip), protocol))
}

fn parse_ipv6(data: &[u8], offset: &mut usize) -> Result<(IpAddr, IpAddr, u8), FrameError> {
    if data.len() < *offset + 40 {
        return Err(FrameError::TooShort);
    }

    let next_header = data[*offset + 6];

    let mut src_ip_bytes = [0u8; 16];
    let mut dst_ip_bytes = [0u8; 16];
    src_ip_bytes.copy_from_slice(&data[*offset + 8..*offset + 24]);
    dst_ip_bytes.copy_from_slice(&data[*offset + 24..*offset + 40]);

    *offset += 40;
    Ok((
        IpAddr::V6(Ipv6Addr::from(src_ip_bytes)),
        IpAddr::V6(Ipv6Addr::from(dst_ip_bytes)),
        next_header,
    ))
}

fn parse_tcp(data: &[u8], offset: usize) -> Result<(u16, u16, &[u8]), FrameError> {
    if data.len() < offset + 20 {
        return Err(FrameError::TooShort);
    }

    let src_port = u16::from_be_bytes([data[offset], data[offset + 1]]);
    let dst_port = u16::from_be_bytes([data[offset + 2], data[offset + 3]]);

    let data_offset = ((data[offset + 12] >> 4) as usize) * 4;
    if data_offset < 20 || data.len() < offset + data_offset {
        return Err(FrameError::TooShort);
    }

    Ok((src_port, dst_port, &data[offset + data_offset..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds an Ethernet/IPv4/TCP frame around the given payload.
    pub fn build_ipv4_tcp_frame(
        src_ip: Ipv4Addr,
        src_port: u16,
        dst_ip: Ipv4Addr,
        dst_port: u16,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut frame = Vec::new();

        // Ethernet: dst mac, src mac, ethertype.
        frame.extend_from_slice(&[0x02; 6]);
        frame.extend_from_slice(&[0x04; 6]);
        frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

        // IPv4: minimal 20-byte header.
        let total_len = (20 + 20 + payload.len()) as u16;
        frame.push(0x45);
        frame.push(0x00);
        frame.extend_from_slice(&total_len.to_be_bytes());
        frame.extend_from_slice(&[0x00; 4]); // id, flags/frag
        frame.push(64); // ttl
        frame.push(IP_PROTO_TCP);
        frame.extend_from_slice(&[0x00; 2]); // checksum
        frame.extend_from_slice(&src_ip.octets());
        frame.extend_from_slice(&dst_ip.octets());

        // TCP: minimal 20-byte header.
        frame.extend_from_slice(&src_port.to_be_bytes());
        frame.extend_from_slice(&dst_port.to_be_bytes());
        frame.extend_from_slice(&[0x00; 8]); // seq, ack
        frame.push(0x50); // data offset = 5 words
        frame.push(0x18); // flags: psh|ack
        frame.extend_from_slice(&[0x00; 6]); // window, checksum, urgent
        frame.extend_from_slice(payload);

        frame
    }

    #[test]
    fn extracts_four_tuple_and_payload_from_ipv4_frame() {
        let frame = build_ipv4_tcp_frame(
            Ipv4Addr::new(10, 0, 0, 1),
            49152,
            Ipv4Addr::new(10, 0, 0, 2),
            11211,
            b"payload bytes",
        );

        let segment = extract_tcp_segment(&frame).unwrap();
        assert_eq!(segment.src_ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(segment.dst_ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(segment.src_port, 49152);
        assert_eq!(segment.dst_port, 11211);
        assert_eq!(segment.payload, b"payload bytes");
    }

    #[test]
    fn extracts_from_ipv6_frame() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0x02; 6]);
        frame.extend_from_slice(&[0x04; 6]);
        frame.extend_from_slice(&ETHERTYPE_IPV6.to_be_bytes());

        frame.push(0x60);
        frame.extend_from_slice(&[0x00; 3]);
        frame.extend_from_slice(&(20u16 + 2).to_be_bytes()); // payload length
        frame.push(IP_PROTO_TCP); // next header
        frame.push(64); // hop limit
        frame.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        frame.extend_from_slice(&Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 2).octets());

        frame.extend_from_slice(&40000u16.to_be_bytes());
        frame.extend_from_slice(&11212u16.to_be_bytes());
        frame.extend_from_slice(&[0x00; 8]);
        frame.push(0x50);
        frame.push(0x18);
        frame.extend_from_slice(&[0x00; 6]);
        frame.extend_from_slice(&[0xAA, 0xBB]);

        let segment = extract_tcp_segment(&frame).unwrap();
        assert_eq!(segment.src_ip, IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(segment.dst_port, 11212);
        assert_eq!(segment.payload, &[0xAA, 0xBB]);
    }

    #[test]
    fn tcp_options_are_skipped_via_data_offset() {
        let mut frame = build_ipv4_tcp_frame(
            Ipv4Addr::new(1, 1, 1, 1),
            1,
            Ipv4Addr::new(2, 2, 2, 2),
            2,
            &[],
        );
        // Rewrite the TCP header to advertise 8 words (20 + 12 options) and
        // append the options plus a payload.
        let tcp_start = 14 + 20;
        frame[tcp_start + 12] = 0x80;
        frame.extend_from_slice(&[0x01; 12]);
        frame.extend_from_slice(b"after-options");

        let segment = extract_tcp_segment(&frame).unwrap();
        assert_eq!(segment.payload, b"after-options");
    }

    #[test]
    fn non_tcp_protocol_is_rejected() {
        let mut frame = build_ipv4_tcp_frame(
            Ipv4Addr::new(1, 1, 1, 1),
            1,
            Ipv4Addr::new(2, 2, 2, 2),
            2,
            &[],
        );
        frame[14 + 9] = 17; // udp
        assert_eq!(extract_tcp_segment(&frame), Err(FrameError::NotTcp));
    }

    #[test]
    fn truncated_frames_are_errors() {
        assert_eq!(extract_tcp_segment(&[]), Err(FrameError::TooShort));
        assert_eq!(extract_tcp_segment(&[0x00; 13]), Err(FrameError::TooShort));

        let frame = build_ipv4_tcp_frame(
            Ipv4Addr::new(1, 1, 1, 1),
            1,
            Ipv4Addr::new(2, 2, 2, 2),
            2,
            &[],
        );
        assert_eq!(
            extract_tcp_segment(&frame[..frame.len() - 4]),
            Err(FrameError::TooShort)
        );
    }

    #[test]
    fn unknown_ether_type_is_rejected() {
        let mut frame = vec![0x00; 64];
        frame[12] = 0x08;
        frame[13] = 0x06; // arp
        assert_eq!(
            extract_tcp_segment(&frame),
            Err(FrameError::UnsupportedEtherType)
        );
    }
}
