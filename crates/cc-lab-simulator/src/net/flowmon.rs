//! Per-flow statistics collected at the IP layer.

use cc_lab_abstract::{FlowKey, Packet, SimTime};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use tracing::debug;

/// Why the IP layer or a device discarded a packet. The discriminant is
/// the index of the matching bucket in `FlowStats::packets_dropped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DropReason {
    NoRoute = 0,
    TtlExpire = 1,
    BadChecksum = 2,
    /// Drop-tail device queue overflow.
    Queue = 3,
    /// Traffic-control queue disc overflow.
    QueueDisc = 4,
    InterfaceDown = 5,
    RouteError = 6,
    FragmentTimeout = 7,
}

impl DropReason {
    pub fn code(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlowStats {
    pub time_first_tx: Option<SimTime>,
    pub time_first_rx: Option<SimTime>,
    pub time_last_tx: Option<SimTime>,
    pub time_last_rx: Option<SimTime>,
    pub delay_sum: SimTime,
    pub jitter_sum: SimTime,
    pub last_delay: Option<SimTime>,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_packets: u32,
    pub rx_packets: u32,
    pub lost_packets: u32,
    pub times_forwarded: u32,
    /// Indexed by `DropReason::code`; only as long as the highest code seen.
    pub packets_dropped: Vec<u32>,
    pub bytes_dropped: Vec<u64>,
}

impl FlowStats {
    pub fn total_dropped(&self) -> u64 {
        self.packets_dropped.iter().map(|&n| n as u64).sum()
    }

    fn record_drop(&mut self, reason: DropReason, bytes: u32) {
        let code = reason.code();
        if self.packets_dropped.len() <= code {
            self.packets_dropped.resize(code + 1, 0);
            self.bytes_dropped.resize(code + 1, 0);
        }
        self.packets_dropped[code] += 1;
        self.bytes_dropped[code] += bytes as u64;
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    flow: u32,
    sent: SimTime,
}

/// Classifies packets into flows and tracks each packet from transmission
/// to delivery or drop.
#[derive(Debug, Default)]
pub struct FlowMonitor {
    classifier: HashMap<FlowKey, u32>,
    keys: BTreeMap<u32, FlowKey>,
    stats: BTreeMap<u32, FlowStats>,
    in_flight: HashMap<u64, InFlight>,
}

impl FlowMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn classify(&mut self, key: FlowKey) -> u32 {
        let next = self.classifier.len() as u32 + 1;
        let id = *self.classifier.entry(key).or_insert(next);
        if id == next {
            self.keys.insert(id, key);
            debug!("Flow {} is {}", id, key);
        }
        id
    }

    pub fn flow_id(&self, key: &FlowKey) -> Option<u32> {
        self.classifier.get(key).copied()
    }

    pub fn record_tx(&mut self, now: SimTime, packet: &Packet) {
        let flow = self.classify(packet.flow_key());
        self.in_flight.insert(packet.uid, InFlight { flow, sent: now });
        let stats = self.stats.entry(flow).or_default();
        stats.time_first_tx.get_or_insert(now);
        stats.time_last_tx = Some(now);
        stats.tx_packets += 1;
        stats.tx_bytes += packet.size() as u64;
    }

    pub fn record_rx(&mut self, now: SimTime, packet: &Packet) {
        let Some(tracked) = self.in_flight.remove(&packet.uid) else {
            return;
        };
        let stats = self.stats.entry(tracked.flow).or_default();
        let delay = now.saturating_sub(tracked.sent);
        if let Some(last) = stats.last_delay {
            let jitter = if delay > last {
                delay.saturating_sub(last)
            } else {
                last.saturating_sub(delay)
            };
            stats.jitter_sum += jitter;
        }
        stats.last_delay = Some(delay);
        stats.delay_sum += delay;
        stats.time_first_rx.get_or_insert(now);
        stats.time_last_rx = Some(now);
        stats.rx_packets += 1;
        stats.rx_bytes += packet.size() as u64;
    }

    pub fn record_drop(&mut self, packet: &Packet, reason: DropReason) {
        let Some(tracked) = self.in_flight.remove(&packet.uid) else {
            return;
        };
        self.stats
            .entry(tracked.flow)
            .or_default()
            .record_drop(reason, packet.size());
    }

    /// Count packets in flight for longer than `max_delay` as lost.
    pub fn check_for_lost_packets(&mut self, now: SimTime, max_delay: SimTime) {
        let stats = &mut self.stats;
        self.in_flight.retain(|_, tracked| {
            if now.saturating_sub(tracked.sent) > max_delay {
                stats.entry(tracked.flow).or_default().lost_packets += 1;
                false
            } else {
                true
            }
        });
    }

    /// Statistics keyed by flow id, in id order.
    pub fn flow_stats(&self) -> &BTreeMap<u32, FlowStats> {
        &self.stats
    }

    pub fn flow_key(&self, flow: u32) -> Option<&FlowKey> {
        self.keys.get(&flow)
    }

    pub fn write_xml<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "<?xml version=\"1.0\" ?>")?;
        writeln!(out, "<FlowMonitor>")?;
        writeln!(out, "  <FlowStats>")?;
        for (id, s) in &self.stats {
            write!(out, "    <Flow flowId=\"{}\"", id)?;
            write!(out, " timeFirstTxPacket=\"{}\"", xml_time(s.time_first_tx))?;
            write!(out, " timeFirstRxPacket=\"{}\"", xml_time(s.time_first_rx))?;
            write!(out, " timeLastTxPacket=\"{}\"", xml_time(s.time_last_tx))?;
            write!(out, " timeLastRxPacket=\"{}\"", xml_time(s.time_last_rx))?;
            write!(out, " delaySum=\"{}\"", xml_time(Some(s.delay_sum)))?;
            write!(out, " jitterSum=\"{}\"", xml_time(Some(s.jitter_sum)))?;
            write!(out, " lastDelay=\"{}\"", xml_time(s.last_delay))?;
            write!(
                out,
                " txBytes=\"{}\" rxBytes=\"{}\" txPackets=\"{}\" rxPackets=\"{}\"",
                s.tx_bytes, s.rx_bytes, s.tx_packets, s.rx_packets
            )?;
            writeln!(
                out,
                " lostPackets=\"{}\" timesForwarded=\"{}\">",
                s.lost_packets, s.times_forwarded
            )?;
            for (code, n) in s.packets_dropped.iter().enumerate() {
                writeln!(
                    out,
                    "      <packetsDropped reasonCode=\"{}\" number=\"{}\" />",
                    code, n
                )?;
            }
            for (code, bytes) in s.bytes_dropped.iter().enumerate() {
                writeln!(
                    out,
                    "      <bytesDropped reasonCode=\"{}\" bytes=\"{}\" />",
                    code, bytes
                )?;
            }
            writeln!(out, "    </Flow>")?;
        }
        writeln!(out, "  </FlowStats>")?;
        writeln!(out, "  <Ipv4FlowClassifier>")?;
        for (id, key) in &self.keys {
            writeln!(
                out,
                "    <Flow flowId=\"{}\" sourceAddress=\"{}\" destinationAddress=\"{}\" protocol=\"{}\" sourcePort=\"{}\" destinationPort=\"{}\" />",
                id,
                key.src.ip(),
                key.dst.ip(),
                key.protocol.number(),
                key.src.port(),
                key.dst.port()
            )?;
        }
        writeln!(out, "  </Ipv4FlowClassifier>")?;
        writeln!(out, "</FlowMonitor>")?;
        Ok(())
    }
}

fn xml_time(t: Option<SimTime>) -> String {
    format!("+{}.0ns", t.unwrap_or(SimTime::ZERO).as_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use cc_lab_abstract::{TcpHeader, Transport, flags};
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn packet(uid: u64, src_port: u16, transport: Transport) -> Packet {
        Packet {
            uid,
            src: SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), src_port),
            dst: SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 2), 4200),
            transport,
            payload: Bytes::from_static(&[0; 100]),
        }
    }

    #[test]
    fn flow_ids_follow_first_transmission() {
        let mut mon = FlowMonitor::new();
        let tcp = Transport::Tcp(TcpHeader::new(1, 0, flags::ACK));
        mon.record_tx(SimTime::ZERO, &packet(0, 49153, tcp));
        mon.record_tx(SimTime::ZERO, &packet(1, 49154, Transport::Udp));
        mon.record_tx(SimTime::ZERO, &packet(2, 49153, tcp));

        let stats = mon.flow_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[&1].tx_packets, 2);
        assert_eq!(stats[&2].tx_packets, 1);
        assert_eq!(mon.flow_key(2).map(|k| k.src.port()), Some(49154));
    }

    #[test]
    fn drop_grows_buckets_to_reason_code() {
        let mut mon = FlowMonitor::new();
        let p = packet(7, 49153, Transport::Udp);
        mon.record_tx(SimTime::ZERO, &p);
        mon.record_drop(&p, DropReason::QueueDisc);

        let s = &mon.flow_stats()[&1];
        assert_eq!(s.packets_dropped, vec![0, 0, 0, 0, 1]);
        assert_eq!(s.bytes_dropped[4], p.size() as u64);
        assert_eq!(s.total_dropped(), 1);
    }

    #[test]
    fn delay_and_jitter_accumulate() {
        let mut mon = FlowMonitor::new();
        let a = packet(1, 49153, Transport::Udp);
        let b = packet(2, 49153, Transport::Udp);
        mon.record_tx(SimTime::ZERO, &a);
        mon.record_tx(SimTime::ZERO, &b);
        mon.record_rx(SimTime::from_millis(10), &a);
        mon.record_rx(SimTime::from_millis(14), &b);

        let s = &mon.flow_stats()[&1];
        assert_eq!(s.rx_packets, 2);
        assert_eq!(s.delay_sum, SimTime::from_millis(24));
        assert_eq!(s.jitter_sum, SimTime::from_millis(4));
    }

    #[test]
    fn stale_packets_are_counted_lost() {
        let mut mon = FlowMonitor::new();
        let p = packet(1, 49153, Transport::Udp);
        mon.record_tx(SimTime::ZERO, &p);
        mon.check_for_lost_packets(SimTime::from_secs(11), SimTime::from_secs(10));
        assert_eq!(mon.flow_stats()[&1].lost_packets, 1);
    }

    #[test]
    fn xml_lists_flows_and_classifier() {
        let mut mon = FlowMonitor::new();
        let p = packet(1, 49153, Transport::Udp);
        mon.record_tx(SimTime::from_millis(200), &p);
        mon.record_drop(&p, DropReason::Queue);

        let mut buf = Vec::new();
        mon.write_xml(&mut buf).unwrap();
        let xml = String::from_utf8(buf).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("timeFirstTxPacket=\"+200000000.0ns\""));
        assert!(xml.contains("<packetsDropped reasonCode=\"3\" number=\"1\" />"));
        assert!(xml.contains("protocol=\"17\" sourcePort=\"49153\" destinationPort=\"4200\""));
        assert!(xml.trim_end().ends_with("</FlowMonitor>"));
    }
}
