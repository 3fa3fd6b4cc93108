use cc_lab_abstract::Protocol;
use std::collections::HashMap;
use std::net::SocketAddrV4;

use super::tcp::{TcpReceiver, TcpSocket};

#[derive(Debug, Default)]
pub struct UdpSocket {
    pub local: Option<SocketAddrV4>,
    pub remote: Option<SocketAddrV4>,
    pub closed: bool,
}

/// Passive socket bound to a well-known port. For TCP it keeps one
/// receiver per remote endpoint.
#[derive(Debug)]
pub struct Listener {
    pub protocol: Protocol,
    pub port: u16,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub peers: HashMap<SocketAddrV4, TcpReceiver>,
    pub closed: bool,
}

impl Listener {
    pub fn new(protocol: Protocol, port: u16) -> Self {
        Self {
            protocol,
            port,
            rx_bytes: 0,
            rx_packets: 0,
            peers: HashMap::new(),
            closed: false,
        }
    }
}

pub enum SocketKind {
    Tcp(TcpSocket),
    Udp(UdpSocket),
    Listener(Listener),
}

impl SocketKind {
    pub fn protocol(&self) -> Protocol {
        match self {
            SocketKind::Tcp(_) => Protocol::Tcp,
            SocketKind::Udp(_) => Protocol::Udp,
            SocketKind::Listener(l) => l.protocol,
        }
    }

    pub fn local(&self) -> Option<SocketAddrV4> {
        match self {
            SocketKind::Tcp(s) => s.local,
            SocketKind::Udp(s) => s.local,
            SocketKind::Listener(_) => None,
        }
    }

    fn local_mut(&mut self) -> Option<&mut Option<SocketAddrV4>> {
        match self {
            SocketKind::Tcp(s) => Some(&mut s.local),
            SocketKind::Udp(s) => Some(&mut s.local),
            SocketKind::Listener(_) => None,
        }
    }

    /// Record the ephemeral local address. Returns false for listeners,
    /// which are bound at creation.
    pub fn set_local(&mut self, addr: SocketAddrV4) -> bool {
        match self.local_mut() {
            Some(slot) => {
                *slot = Some(addr);
                true
            }
            None => false,
        }
    }
}
