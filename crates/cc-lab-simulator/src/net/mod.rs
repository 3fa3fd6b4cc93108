//! Two-node IPv4 network: link devices, the socket table and the flow
//! monitor.
//!
//! The network never owns the clock. Every operation that can put
//! something on the wire takes the scheduler so it can arm transmission,
//! arrival and retransmission events.

pub mod flowmon;
pub mod link;
pub mod socket;
pub mod tcp;

use bytes::Bytes;
use cc_lab_abstract::{
    CwndObserver, EventId, LinkConfig, Packet, Protocol, SimTime, SocketError, SocketId,
    TcpConfig, TcpHeader, TcpVariant, Transport,
};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};
use tracing::{debug, trace};

use crate::congestion;
use crate::engine::Scheduler;
use crate::event::{NodeId, SimEvent};
use flowmon::FlowMonitor;
use link::Device;
use socket::{Listener, SocketKind, UdpSocket};
use tcp::{TcpOutput, TcpSocket, TimerAction};

pub use flowmon::{DropReason, FlowStats};

pub const FIRST_EPHEMERAL_PORT: u16 = 49153;

/// Packets in flight for longer than this are reported lost.
pub const MAX_PER_HOP_DELAY: SimTime = SimTime::from_secs(10);

#[derive(Debug)]
pub struct Node {
    pub addr: Ipv4Addr,
    device: Device,
    next_port: u16,
    ip_tx_bytes: u64,
}

impl Node {
    fn new(addr: Ipv4Addr, link: &LinkConfig) -> Self {
        Self {
            addr,
            device: Device::new(link),
            next_port: FIRST_EPHEMERAL_PORT,
            ip_tx_bytes: 0,
        }
    }

    fn allocate_port(&mut self) -> u16 {
        let port = self.next_port;
        self.next_port = self.next_port.wrapping_add(1).max(FIRST_EPHEMERAL_PORT);
        port
    }

    /// Bytes handed to the IP layer for transmission on this node.
    pub fn ip_tx_bytes(&self) -> u64 {
        self.ip_tx_bytes
    }
}

struct SocketEntry {
    node: NodeId,
    kind: SocketKind,
    timer: Option<EventId>,
}

pub struct Network {
    nodes: Vec<Node>,
    sockets: Vec<SocketEntry>,
    monitor: FlowMonitor,
    next_uid: u64,
    tcp_config: TcpConfig,
    variant: TcpVariant,
    observers: Vec<(SocketId, Box<dyn CwndObserver>)>,
    drops: u64,
}

impl Network {
    /// Two nodes, 10.1.1.1 and 10.1.1.2, joined by one full-duplex link.
    pub fn point_to_point(link: &LinkConfig, tcp: &TcpConfig) -> Self {
        let nodes = vec![
            Node::new(Ipv4Addr::new(10, 1, 1, 1), link),
            Node::new(Ipv4Addr::new(10, 1, 1, 2), link),
        ];
        Self {
            nodes,
            sockets: Vec::new(),
            monitor: FlowMonitor::new(),
            next_uid: 0,
            tcp_config: tcp.clone(),
            variant: TcpVariant::NewReno,
            observers: Vec::new(),
            drops: 0,
        }
    }

    /// Congestion-control variant used by TCP sockets created from now on.
    pub fn set_tcp_variant(&mut self, variant: TcpVariant) {
        self.variant = variant;
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn node_addr(&self, id: NodeId) -> Option<Ipv4Addr> {
        self.node(id).map(|n| n.addr)
    }

    fn peer(&self, id: NodeId) -> NodeId {
        NodeId((id.0 + 1) % self.nodes.len())
    }

    pub fn flow_monitor(&self) -> &FlowMonitor {
        &self.monitor
    }

    pub fn flow_monitor_mut(&mut self) -> &mut FlowMonitor {
        &mut self.monitor
    }

    pub fn total_ip_tx_bytes(&self) -> u64 {
        self.nodes.iter().map(|n| n.ip_tx_bytes).sum()
    }

    /// Packets discarded by any queue so far.
    pub fn drops(&self) -> u64 {
        self.drops
    }

    pub fn tcp_socket(&self, socket: SocketId) -> Option<&TcpSocket> {
        match self.sockets.get(socket.0).map(|e| &e.kind) {
            Some(SocketKind::Tcp(s)) => Some(s),
            _ => None,
        }
    }

    fn entry(&mut self, socket: SocketId) -> Result<&mut SocketEntry, SocketError> {
        self.sockets
            .get_mut(socket.0)
            .ok_or(SocketError::UnknownSocket(socket.0))
    }

    pub fn create_socket(&mut self, node: NodeId, protocol: Protocol) -> SocketId {
        let kind = match protocol {
            Protocol::Tcp => SocketKind::Tcp(TcpSocket::new(
                &self.tcp_config,
                congestion::for_variant(self.variant),
            )),
            Protocol::Udp => SocketKind::Udp(UdpSocket::default()),
        };
        let id = SocketId(self.sockets.len());
        self.sockets.push(SocketEntry {
            node,
            kind,
            timer: None,
        });
        debug!("{} created {:?} socket {}", node, protocol, id);
        id
    }

    /// Subscribe `observer` to the congestion-window trace of a TCP socket.
    pub fn trace_cwnd(
        &mut self,
        socket: SocketId,
        observer: Box<dyn CwndObserver>,
    ) -> Result<(), SocketError> {
        if !matches!(self.entry(socket)?.kind, SocketKind::Tcp(_)) {
            return Err(SocketError::Unsupported);
        }
        self.observers.push((socket, observer));
        Ok(())
    }

    /// Flush every congestion-window observer. Returns the records written.
    pub fn finish_observers(&mut self) -> io::Result<u64> {
        let mut total = 0;
        for (_, observer) in &mut self.observers {
            total += observer.finish()?;
        }
        Ok(total)
    }

    pub fn bind(&mut self, socket: SocketId) -> Result<(), SocketError> {
        let entry = self.entry(socket)?;
        if entry.kind.local().is_some() || matches!(entry.kind, SocketKind::Listener(_)) {
            return Err(SocketError::AlreadyBound);
        }
        let node_id = entry.node;
        let node = &mut self.nodes[node_id.0];
        let addr = SocketAddrV4::new(node.addr, node.allocate_port());
        self.entry(socket)?.kind.set_local(addr);
        debug!("{} bound to {}", socket, addr);
        Ok(())
    }

    /// The network is IPv4 only.
    pub fn bind6(&mut self, socket: SocketId) -> Result<(), SocketError> {
        self.entry(socket)?;
        Err(SocketError::AddressFamilyUnsupported(SocketAddr::from((
            Ipv6Addr::UNSPECIFIED,
            0,
        ))))
    }

    pub fn connect(
        &mut self,
        socket: SocketId,
        remote: SocketAddr,
        sched: &mut Scheduler<SimEvent>,
    ) -> Result<(), SocketError> {
        let SocketAddr::V4(remote_v4) = remote else {
            return Err(SocketError::AddressFamilyUnsupported(remote));
        };
        if !self.nodes.iter().any(|n| n.addr == *remote_v4.ip()) {
            return Err(SocketError::Unreachable(remote));
        }
        if self.entry(socket)?.kind.local().is_none() {
            self.bind(socket)?;
        }

        let now = sched.now();
        let mut out = TcpOutput::default();
        match &mut self.entry(socket)?.kind {
            SocketKind::Tcp(s) => {
                s.connect(now, &mut out)?;
                s.remote = Some(remote_v4);
            }
            SocketKind::Udp(s) => {
                if s.closed {
                    return Err(SocketError::Closed);
                }
                s.remote = Some(remote_v4);
                return Ok(());
            }
            SocketKind::Listener(_) => return Err(SocketError::Unsupported),
        }
        debug!("{} connecting to {}", socket, remote_v4);
        self.apply_tcp_output(socket, out, sched);
        Ok(())
    }

    pub fn listen(
        &mut self,
        node: NodeId,
        protocol: Protocol,
        port: u16,
    ) -> Result<SocketId, SocketError> {
        let taken = self.sockets.iter().any(|e| {
            e.node == node
                && matches!(&e.kind, SocketKind::Listener(l)
                    if l.protocol == protocol && l.port == port && !l.closed)
        });
        if taken {
            return Err(SocketError::PortInUse(port));
        }
        let id = SocketId(self.sockets.len());
        self.sockets.push(SocketEntry {
            node,
            kind: SocketKind::Listener(Listener::new(protocol, port)),
            timer: None,
        });
        debug!("{} listening on {:?} port {}", node, protocol, port);
        Ok(id)
    }

    pub fn send(
        &mut self,
        socket: SocketId,
        payload: Bytes,
        sched: &mut Scheduler<SimEvent>,
    ) -> Result<usize, SocketError> {
        let now = sched.now();
        let entry = self.entry(socket)?;
        let node = entry.node;
        match &mut entry.kind {
            SocketKind::Tcp(s) => {
                let mut out = TcpOutput::default();
                let accepted = s.send(now, payload.len(), &mut out)?;
                self.apply_tcp_output(socket, out, sched);
                Ok(accepted)
            }
            SocketKind::Udp(s) => {
                if s.closed {
                    return Err(SocketError::Closed);
                }
                let remote = s.remote.ok_or(SocketError::NotConnected)?;
                let local = s.local.ok_or(SocketError::NotBound)?;
                let len = payload.len();
                let packet = self.make_packet(local, remote, Transport::Udp, payload);
                self.ip_send(node, packet, sched);
                Ok(len)
            }
            SocketKind::Listener(_) => Err(SocketError::Unsupported),
        }
    }

    pub fn close(
        &mut self,
        socket: SocketId,
        sched: &mut Scheduler<SimEvent>,
    ) -> Result<(), SocketError> {
        match &mut self.entry(socket)?.kind {
            SocketKind::Tcp(s) => {
                let mut out = TcpOutput::default();
                s.close(&mut out);
                self.apply_tcp_output(socket, out, sched);
            }
            SocketKind::Udp(s) => s.closed = true,
            SocketKind::Listener(l) => l.closed = true,
        }
        debug!("{} closed", socket);
        Ok(())
    }

    pub fn received_bytes(&self, socket: SocketId) -> u64 {
        match self.sockets.get(socket.0).map(|e| &e.kind) {
            Some(SocketKind::Listener(l)) => l.rx_bytes,
            _ => 0,
        }
    }

    fn make_packet(
        &mut self,
        src: SocketAddrV4,
        dst: SocketAddrV4,
        transport: Transport,
        payload: Bytes,
    ) -> Packet {
        let uid = self.next_uid;
        self.next_uid += 1;
        Packet {
            uid,
            src,
            dst,
            transport,
            payload,
        }
    }

    fn apply_tcp_output(
        &mut self,
        socket: SocketId,
        out: TcpOutput,
        sched: &mut Scheduler<SimEvent>,
    ) {
        let now = sched.now();
        for &(old, new) in &out.cwnd_changes {
            trace!("{} cwnd {} -> {}", socket, old, new);
            for (_, observer) in self.observers.iter_mut().filter(|(id, _)| *id == socket) {
                observer.on_cwnd_change(now, old, new);
            }
        }

        let Some(entry) = self.sockets.get_mut(socket.0) else {
            return;
        };
        match out.timer {
            TimerAction::Unchanged => {}
            TimerAction::Cancel => {
                if let Some(id) = entry.timer.take() {
                    sched.cancel(id);
                }
            }
            TimerAction::Restart(rto) => {
                if let Some(id) = entry.timer.take() {
                    sched.cancel(id);
                }
                entry.timer = Some(sched.schedule(rto, SimEvent::TcpTimeout { socket }));
            }
        }

        let node = entry.node;
        let (local, remote) = match &entry.kind {
            SocketKind::Tcp(s) => (s.local, s.remote),
            _ => (None, None),
        };
        let (Some(local), Some(remote)) = (local, remote) else {
            if !out.segments.is_empty() {
                debug!("{} has no endpoints, discarding output", socket);
            }
            return;
        };
        for (header, len) in out.segments {
            let payload = Bytes::from(vec![0u8; len as usize]);
            let packet = self.make_packet(local, remote, Transport::Tcp(header), payload);
            self.ip_send(node, packet, sched);
        }
    }

    /// Hand a packet to the IP layer of `node` for transmission.
    pub fn ip_send(&mut self, node: NodeId, packet: Packet, sched: &mut Scheduler<SimEvent>) {
        let now = sched.now();
        self.nodes[node.0].ip_tx_bytes += packet.size() as u64;
        self.monitor.record_tx(now, &packet);
        if let Err((packet, reason)) = self.nodes[node.0].device.enqueue(packet) {
            debug!(
                "{} dropped packet {} ({:?}) of {}",
                node,
                packet.uid,
                reason,
                packet.flow_key()
            );
            self.monitor.record_drop(&packet, reason);
            self.drops += 1;
        }
        self.start_transmission(node, sched);
    }

    fn start_transmission(&mut self, node: NodeId, sched: &mut Scheduler<SimEvent>) {
        let peer = self.peer(node);
        let device = &mut self.nodes[node.0].device;
        if let Some((packet, tx_time)) = device.start_transmission() {
            let arrival = tx_time.saturating_add(device.delay());
            sched.schedule(tx_time, SimEvent::TransmitComplete { node });
            sched.schedule(arrival, SimEvent::Arrival { node: peer, packet });
        }
    }

    pub fn transmit_complete(&mut self, node: NodeId, sched: &mut Scheduler<SimEvent>) {
        self.nodes[node.0].device.transmit_complete();
        self.start_transmission(node, sched);
    }

    fn demux(&self, node: NodeId, packet: &Packet) -> Option<SocketId> {
        let protocol = packet.transport.protocol();
        let connected = self.sockets.iter().position(|e| {
            e.node == node
                && matches!(&e.kind, SocketKind::Tcp(s)
                    if protocol == Protocol::Tcp
                        && s.local == Some(packet.dst)
                        && s.remote == Some(packet.src))
        });
        connected
            .or_else(|| {
                self.sockets.iter().position(|e| {
                    e.node == node
                        && matches!(&e.kind, SocketKind::Listener(l)
                            if l.protocol == protocol && l.port == packet.dst.port() && !l.closed)
                })
            })
            .map(SocketId)
    }

    /// A packet crossed the link and reached `node`.
    pub fn receive(&mut self, node: NodeId, packet: Packet, sched: &mut Scheduler<SimEvent>) {
        let now = sched.now();
        self.monitor.record_rx(now, &packet);

        let Some(socket) = self.demux(node, &packet) else {
            trace!("{} has no socket for {}", node, packet.flow_key());
            return;
        };
        let Some(entry) = self.sockets.get_mut(socket.0) else {
            return;
        };

        match (&mut entry.kind, packet.transport) {
            (SocketKind::Tcp(s), Transport::Tcp(header)) => {
                let mut out = TcpOutput::default();
                s.on_segment(now, &header, &mut out);
                self.apply_tcp_output(socket, out, sched);
            }
            (SocketKind::Listener(l), Transport::Tcp(header)) => {
                let receiver = l.peers.entry(packet.src).or_default();
                let before = receiver.delivered();
                let reply = receiver.on_segment(&header, packet.payload_len());
                let delivered = receiver.delivered() - before;
                l.rx_bytes += delivered;
                if delivered > 0 {
                    l.rx_packets += 1;
                }
                if let Some(reply) = reply {
                    self.send_reply(node, &packet, reply, sched);
                }
            }
            (SocketKind::Listener(l), Transport::Udp) => {
                l.rx_bytes += packet.payload_len() as u64;
                l.rx_packets += 1;
            }
            _ => trace!("{} ignored {}", socket, packet.flow_key()),
        }
    }

    fn send_reply(
        &mut self,
        node: NodeId,
        to: &Packet,
        header: TcpHeader,
        sched: &mut Scheduler<SimEvent>,
    ) {
        let reply = self.make_packet(to.dst, to.src, Transport::Tcp(header), Bytes::new());
        self.ip_send(node, reply, sched);
    }

    pub fn tcp_timeout(&mut self, socket: SocketId, sched: &mut Scheduler<SimEvent>) {
        let now = sched.now();
        let Some(entry) = self.sockets.get_mut(socket.0) else {
            return;
        };
        entry.timer = None;
        if let SocketKind::Tcp(s) = &mut entry.kind {
            let mut out = TcpOutput::default();
            s.on_timeout(now, &mut out);
            self.apply_tcp_output(socket, out, sched);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const SENDER: NodeId = NodeId(0);
    const RECEIVER: NodeId = NodeId(1);

    fn network() -> Network {
        Network::point_to_point(&LinkConfig::default(), &TcpConfig::default())
    }

    /// Drive link and timer events until the queue is empty or `until`.
    fn run(net: &mut Network, sched: &mut Scheduler<SimEvent>, until: SimTime) {
        while let Some(at) = sched.peek_next_time() {
            if at > until {
                break;
            }
            let Some((_, event)) = sched.pop() else { break };
            match event {
                SimEvent::TransmitComplete { node } => net.transmit_complete(node, sched),
                SimEvent::Arrival { node, packet } => net.receive(node, packet, sched),
                SimEvent::TcpTimeout { socket } => net.tcp_timeout(socket, sched),
                _ => {}
            }
        }
    }

    fn receiver_addr(port: u16) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::new(10, 1, 1, 2), port))
    }

    struct Recorder(Rc<RefCell<Vec<(SimTime, u32)>>>);

    impl CwndObserver for Recorder {
        fn on_cwnd_change(&mut self, now: SimTime, _old: u32, new: u32) {
            self.0.borrow_mut().push((now, new));
        }

        fn finish(&mut self) -> io::Result<u64> {
            Ok(self.0.borrow().len() as u64)
        }
    }

    #[test]
    fn ephemeral_ports_start_at_49153() {
        let mut net = network();
        let a = net.create_socket(SENDER, Protocol::Udp);
        let b = net.create_socket(SENDER, Protocol::Udp);
        net.bind(a).unwrap();
        net.bind(b).unwrap();
        assert_eq!(net.bind(a), Err(SocketError::AlreadyBound));
        let ports: Vec<u16> = [a, b]
            .iter()
            .filter_map(|&s| net.sockets[s.0].kind.local())
            .map(|addr| addr.port())
            .collect();
        assert_eq!(ports, vec![49153, 49154]);
    }

    #[test]
    fn ipv6_is_refused() {
        let mut net = network();
        let mut sched = Scheduler::new();
        let s = net.create_socket(SENDER, Protocol::Tcp);
        assert!(matches!(
            net.bind6(s),
            Err(SocketError::AddressFamilyUnsupported(_))
        ));
        let v6 = SocketAddr::from((Ipv6Addr::LOCALHOST, 4200));
        assert!(matches!(
            net.connect(s, v6, &mut sched),
            Err(SocketError::AddressFamilyUnsupported(_))
        ));
    }

    #[test]
    fn unknown_destination_is_unreachable() {
        let mut net = network();
        let mut sched = Scheduler::new();
        let s = net.create_socket(SENDER, Protocol::Udp);
        let nowhere = SocketAddr::from((Ipv4Addr::new(192, 168, 0, 1), 9));
        assert_eq!(
            net.connect(s, nowhere, &mut sched),
            Err(SocketError::Unreachable(nowhere))
        );
    }

    #[test]
    fn listening_twice_on_a_port_fails() {
        let mut net = network();
        net.listen(RECEIVER, Protocol::Udp, 6900).unwrap();
        assert_eq!(
            net.listen(RECEIVER, Protocol::Udp, 6900),
            Err(SocketError::PortInUse(6900))
        );
        assert!(net.listen(RECEIVER, Protocol::Tcp, 6900).is_ok());
    }

    #[test]
    fn udp_datagram_reaches_sink() {
        let mut net = network();
        let mut sched = Scheduler::new();
        let sink = net.listen(RECEIVER, Protocol::Udp, 6900).unwrap();
        let s = net.create_socket(SENDER, Protocol::Udp);
        net.connect(s, receiver_addr(6900), &mut sched).unwrap();
        net.send(s, Bytes::from(vec![0u8; 512]), &mut sched).unwrap();
        run(&mut net, &mut sched, SimTime::from_secs(1));

        assert_eq!(net.received_bytes(sink), 512);
        assert_eq!(net.total_ip_tx_bytes(), 540);
        let stats = &net.flow_monitor().flow_stats()[&1];
        assert_eq!((stats.tx_packets, stats.rx_packets), (1, 1));
        // 4.336 ms serialization plus 10 ms propagation
        assert_eq!(stats.delay_sum, SimTime::from_micros(14_336));
    }

    #[test]
    fn tcp_transfer_is_delivered_and_traced() {
        let mut net = network();
        let mut sched = Scheduler::new();
        let sink = net.listen(RECEIVER, Protocol::Tcp, 4200).unwrap();
        let s = net.create_socket(SENDER, Protocol::Tcp);
        let log = Rc::new(RefCell::new(Vec::new()));
        net.trace_cwnd(s, Box::new(Recorder(log.clone()))).unwrap();

        net.connect(s, receiver_addr(4200), &mut sched).unwrap();
        for _ in 0..8 {
            net.send(s, Bytes::from(vec![0u8; 512]), &mut sched).unwrap();
        }
        run(&mut net, &mut sched, SimTime::from_secs(1));

        assert_eq!(net.received_bytes(sink), 8 * 512);
        let socket = net.tcp_socket(s).unwrap();
        assert_eq!(socket.bytes_in_flight(), 0);
        assert!(socket.cwnd() > 10 * 536);

        let log = log.borrow();
        assert_eq!(log[0].1, 10 * 536);
        assert!(log.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(net.finish_observers().unwrap(), log.len() as u64);
        // data flow and ACK flow
        assert_eq!(net.flow_monitor().flow_stats().len(), 2);
    }

    #[test]
    fn overflow_is_recorded_per_flow() {
        let link = LinkConfig {
            queue_disc_limit: 2,
            ..LinkConfig::default()
        };
        let mut net = Network::point_to_point(&link, &TcpConfig::default());
        let mut sched = Scheduler::new();
        let s = net.create_socket(SENDER, Protocol::Udp);
        net.connect(s, receiver_addr(6900), &mut sched).unwrap();
        for _ in 0..10 {
            net.send(s, Bytes::from(vec![0u8; 512]), &mut sched).unwrap();
        }
        // one on the wire, two in the device queue, two in the queue disc
        assert_eq!(net.drops(), 5);
        let stats = &net.flow_monitor().flow_stats()[&1];
        assert_eq!(stats.packets_dropped, vec![0, 0, 0, 0, 5]);
    }

    #[test]
    fn undersized_device_queue_drops_instead_of_stalling() {
        let link = LinkConfig {
            device_queue_bytes: 500,
            ..LinkConfig::default()
        };
        let mut net = Network::point_to_point(&link, &TcpConfig::default());
        let mut sched = Scheduler::new();
        let sink = net.listen(RECEIVER, Protocol::Udp, 6900).unwrap();
        let s = net.create_socket(SENDER, Protocol::Udp);
        net.connect(s, receiver_addr(6900), &mut sched).unwrap();
        net.send(s, Bytes::from(vec![0u8; 512]), &mut sched).unwrap();
        net.send(s, Bytes::from(vec![0u8; 64]), &mut sched).unwrap();
        run(&mut net, &mut sched, SimTime::from_secs(1));

        assert_eq!(net.drops(), 1);
        assert_eq!(net.received_bytes(sink), 64);
        let stats = &net.flow_monitor().flow_stats()[&1];
        assert_eq!(stats.packets_dropped, vec![0, 0, 0, 1]);
        assert_eq!((stats.tx_packets, stats.rx_packets), (2, 1));
    }
}
