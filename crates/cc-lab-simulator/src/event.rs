use cc_lab_abstract::{Packet, SocketId};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AppId(pub usize);

/// Periodic telemetry tasks owned by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Drops,
    Bytes,
}

#[derive(Debug)]
pub enum SimEvent {
    StartApp(AppId),
    StopApp(AppId),
    AppTimer { app: AppId, token: u64 },
    /// The node's device finished serializing a packet onto the link.
    TransmitComplete { node: NodeId },
    /// A packet reached `node` after crossing the link.
    Arrival { node: NodeId, packet: Packet },
    TcpTimeout { socket: SocketId },
    Sample(ProbeKind),
}
