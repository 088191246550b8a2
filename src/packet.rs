//! IPv4 / TCP / UDP header decoding for packets handed over by NFQUEUE.
//!
//! NFQUEUE delivers L3 packets, so parsing starts at the IPv4 header. Every
//! offset is checked against the buffer before slicing; anything short or
//! inconsistent comes back as [`IdsError::ParseError`].

use std::net::Ipv4Addr;

use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;

use crate::error::{IdsError, Result};

const IPV4_MIN_HEADER: usize = 20;
const TCP_MIN_HEADER: usize = 20;
const UDP_HEADER: usize = 8;

const IPV4_FLAG_DF: u8 = 0b010;

const TCP_OPT_EOL: u8 = 0;
const TCP_OPT_NOP: u8 = 1;
const TCP_OPT_MSS: u8 = 2;
const TCP_OPT_MSS_LEN: usize = 4;

/// TCP flag byte (offset 13 of the header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
    pub const ECE: u8 = 0x40;
    pub const CWR: u8 = 0x80;

    pub fn has(&self, mask: u8) -> bool {
        self.0 & mask != 0
    }

    /// 1 when the bit is set, 0 otherwise.
    pub fn bit(&self, mask: u8) -> u8 {
        self.has(mask) as u8
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ipv4Header {
    pub identification: u16,
    pub dont_fragment: bool,
    pub ttl: u8,
    pub total_length: u16,
    /// Whole DS field (DSCP + ECN), i.e. the legacy TOS byte.
    pub tos: u8,
    pub protocol: u8,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub sequence: u32,
    pub header_len: usize,
    pub payload_len: usize,
    pub flags: TcpFlags,
    pub window: u16,
    pub urgent_ptr: u16,
    pub mss: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub payload_len: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transport {
    Tcp(TcpHeader),
    Udp(UdpHeader),
}

impl Transport {
    pub fn src_port(&self) -> u16 {
        match self {
            Transport::Tcp(tcp) => tcp.src_port,
            Transport::Udp(udp) => udp.src_port,
        }
    }

    pub fn dst_port(&self) -> u16 {
        match self {
            Transport::Tcp(tcp) => tcp.dst_port,
            Transport::Udp(udp) => udp.dst_port,
        }
    }

    pub fn header_len(&self) -> usize {
        match self {
            Transport::Tcp(tcp) => tcp.header_len,
            Transport::Udp(_) => UDP_HEADER,
        }
    }

    pub fn payload_len(&self) -> usize {
        match self {
            Transport::Tcp(tcp) => tcp.payload_len,
            Transport::Udp(udp) => udp.payload_len,
        }
    }

    pub fn tcp(&self) -> Option<&TcpHeader> {
        match self {
            Transport::Tcp(tcp) => Some(tcp),
            Transport::Udp(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedHeaders {
    pub ip: Ipv4Header,
    pub transport: Transport,
}

pub fn parse_packet(data: &[u8]) -> Result<ParsedHeaders> {
    let ipv4 = Ipv4Packet::new(data).ok_or_else(|| {
        IdsError::ParseError(format!("{} bytes is too short for an IPv4 header", data.len()))
    })?;

    if ipv4.get_version() != 4 {
        return Err(IdsError::ParseError(format!(
            "unsupported IP version {}",
            ipv4.get_version()
        )));
    }

    let ihl = ipv4.get_header_length() as usize * 4;
    if ihl < IPV4_MIN_HEADER || ihl > data.len() {
        return Err(IdsError::ParseError(format!(
            "bad IPv4 header length {} for {} byte packet",
            ihl,
            data.len()
        )));
    }

    // The transport segment ends at the IP total length, or at the end of
    // the copied bytes when the packet was truncated.
    let end = (ipv4.get_total_length() as usize).min(data.len());
    if end < ihl {
        return Err(IdsError::ParseError(format!(
            "IPv4 total length {} shorter than its header",
            ipv4.get_total_length()
        )));
    }
    let segment = &data[ihl..end];

    // Only the first fragment carries the transport header.
    if ipv4.get_fragment_offset() != 0 {
        return Err(IdsError::ParseError(format!(
            "non-first IPv4 fragment (offset {})",
            ipv4.get_fragment_offset()
        )));
    }

    let protocol = ipv4.get_next_level_protocol();
    let ip = Ipv4Header {
        identification: ipv4.get_identification(),
        dont_fragment: ipv4.get_flags() & IPV4_FLAG_DF != 0,
        ttl: ipv4.get_ttl(),
        total_length: ipv4.get_total_length(),
        tos: (ipv4.get_dscp() << 2) | ipv4.get_ecn(),
        protocol: protocol.0,
        source: ipv4.get_source(),
        destination: ipv4.get_destination(),
    };

    let transport = match protocol {
        IpNextHeaderProtocols::Tcp => Transport::Tcp(parse_tcp(segment)?),
        IpNextHeaderProtocols::Udp => Transport::Udp(parse_udp(segment)?),
        other => {
            return Err(IdsError::ParseError(format!(
                "unsupported transport protocol {}",
                other.0
            )))
        }
    };

    Ok(ParsedHeaders { ip, transport })
}

fn parse_tcp(segment: &[u8]) -> Result<TcpHeader> {
    let tcp = TcpPacket::new(segment).ok_or_else(|| {
        IdsError::ParseError(format!(
            "{} bytes is too short for a TCP header",
            segment.len()
        ))
    })?;

    let header_len = tcp.get_data_offset() as usize * 4;
    if header_len < TCP_MIN_HEADER || header_len > segment.len() {
        return Err(IdsError::ParseError(format!(
            "bad TCP data offset {} for {} byte segment",
            tcp.get_data_offset(),
            segment.len()
        )));
    }

    Ok(TcpHeader {
        src_port: tcp.get_source(),
        dst_port: tcp.get_destination(),
        sequence: tcp.get_sequence(),
        header_len,
        payload_len: segment.len() - header_len,
        flags: TcpFlags(segment[13]),
        window: tcp.get_window(),
        urgent_ptr: tcp.get_urgent_ptr(),
        mss: mss_option(&segment[TCP_MIN_HEADER..header_len])?,
    })
}

fn parse_udp(segment: &[u8]) -> Result<UdpHeader> {
    let udp = UdpPacket::new(segment).ok_or_else(|| {
        IdsError::ParseError(format!(
            "{} bytes is too short for a UDP header",
            segment.len()
        ))
    })?;

    Ok(UdpHeader {
        src_port: udp.get_source(),
        dst_port: udp.get_destination(),
        payload_len: segment.len() - UDP_HEADER,
    })
}

/// Value of the first MSS option, 0 when there is none.
///
/// The option bytes are read in the host's native byte order rather than
/// network order. The deployed models were fitted on features produced this
/// way, so the quirk has to stay.
pub fn mss_option(options: &[u8]) -> Result<u64> {
    let mut i = 0;
    while i < options.len() {
        match options[i] {
            TCP_OPT_EOL => break,
            TCP_OPT_NOP => i += 1,
            kind => {
                let len = *options.get(i + 1).ok_or_else(|| {
                    IdsError::ParseError(format!("TCP option {} has no length byte", kind))
                })? as usize;
                if len < 2 || i + len > options.len() {
                    return Err(IdsError::ParseError(format!(
                        "TCP option {} has bad length {}",
                        kind, len
                    )));
                }
                if kind == TCP_OPT_MSS {
                    if len != TCP_OPT_MSS_LEN {
                        return Err(IdsError::ParseError(format!(
                            "MSS option has length {}, expected {}",
                            len, TCP_OPT_MSS_LEN
                        )));
                    }
                    return Ok(u16::from_ne_bytes([options[i + 2], options[i + 3]]) as u64);
                }
                i += len;
            }
        }
    }
    Ok(0)
}
