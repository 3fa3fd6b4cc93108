use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddrV4;

/// TCP Header flags
pub mod flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
}

pub const IPV4_HEADER_BYTES: u32 = 20;
pub const TCP_HEADER_BYTES: u32 = 20;
pub const UDP_HEADER_BYTES: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// IANA protocol number as carried in the IPv4 header.
    pub fn number(self) -> u8 {
        match self {
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
        }
    }
}

/// Simplified TCP header. Sequence numbers are 64-bit and never wrap
/// within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TcpHeader {
    pub seq: u64,
    pub ack: u64,
    pub flags: u8,
}

impl TcpHeader {
    pub fn new(seq: u64, ack: u64, flags: u8) -> Self {
        Self { seq, ack, flags }
    }

    pub fn is_syn(&self) -> bool {
        self.flags & flags::SYN != 0
    }
    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }
    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp(TcpHeader),
    Udp,
}

impl Transport {
    pub fn protocol(&self) -> Protocol {
        match self {
            Transport::Tcp(_) => Protocol::Tcp,
            Transport::Udp => Protocol::Udp,
        }
    }

    fn header_bytes(&self) -> u32 {
        match self {
            Transport::Tcp(_) => TCP_HEADER_BYTES,
            Transport::Udp => UDP_HEADER_BYTES,
        }
    }
}

/// An IPv4 packet travelling through the simulated network.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Network-wide unique id, used by the flow monitor to match tx and rx.
    pub uid: u64,
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub transport: Transport,
    pub payload: Bytes,
}

impl Packet {
    /// Size as seen by the IP layer: payload plus transport and IPv4 headers.
    pub fn size(&self) -> u32 {
        self.payload.len() as u32 + self.transport.header_bytes() + IPV4_HEADER_BYTES
    }

    pub fn payload_len(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn tcp(&self) -> Option<&TcpHeader> {
        match &self.transport {
            Transport::Tcp(h) => Some(h),
            Transport::Udp => None,
        }
    }

    pub fn flow_key(&self) -> FlowKey {
        FlowKey {
            src: self.src,
            dst: self.dst,
            protocol: self.transport.protocol(),
        }
    }
}

/// The 5-tuple that identifies a monitored flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub protocol: Protocol,
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {} -> {}", self.protocol, self.src, self.dst)
    }
}
