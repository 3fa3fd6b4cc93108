//! One direction of a point-to-point link.
//!
//! Packets pass through a FIFO queue disc into a drop-tail device queue
//! bounded in bytes. The device queue is flow controlled: the queue disc
//! only hands a packet over when it fits, so with a queue disc installed
//! overflow happens there.

use cc_lab_abstract::{DataRate, LinkConfig, Packet, SimTime};
use std::collections::VecDeque;

use super::flowmon::DropReason;

/// Point-to-point framing overhead added to every packet on the wire.
pub const LINK_HEADER_BYTES: u32 = 2;

pub fn wire_size(packet: &Packet) -> u32 {
    packet.size() + LINK_HEADER_BYTES
}

#[derive(Debug)]
pub struct Device {
    data_rate: DataRate,
    delay: SimTime,
    queue_disc: Option<VecDeque<Packet>>,
    disc_limit: usize,
    queue: VecDeque<Packet>,
    queue_bytes: u32,
    queue_limit_bytes: u32,
    busy: bool,
}

impl Device {
    pub fn new(config: &LinkConfig) -> Self {
        let disc_limit = config.queue_disc_limit as usize;
        Self {
            data_rate: config.data_rate,
            delay: SimTime::from_secs_f64(config.delay),
            queue_disc: (disc_limit > 0).then(VecDeque::new),
            disc_limit,
            queue: VecDeque::new(),
            queue_bytes: 0,
            queue_limit_bytes: config.device_queue_bytes,
            busy: false,
        }
    }

    pub fn delay(&self) -> SimTime {
        self.delay
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Packets waiting in the queue disc and the device queue.
    pub fn backlog(&self) -> usize {
        self.queue.len() + self.queue_disc.as_ref().map_or(0, VecDeque::len)
    }

    fn fits(&self, packet: &Packet) -> bool {
        self.queue_bytes + wire_size(packet) <= self.queue_limit_bytes
    }

    fn push_device(&mut self, packet: Packet) {
        self.queue_bytes += wire_size(&packet);
        self.queue.push_back(packet);
    }

    /// Queue a packet for transmission. A refused packet is handed back
    /// together with the reason it was dropped.
    pub fn enqueue(&mut self, packet: Packet) -> Result<(), (Packet, DropReason)> {
        // would block the queue disc head forever
        if wire_size(&packet) > self.queue_limit_bytes {
            return Err((packet, DropReason::Queue));
        }
        match &mut self.queue_disc {
            None => {
                if !self.fits(&packet) {
                    return Err((packet, DropReason::Queue));
                }
                self.push_device(packet);
            }
            Some(disc) => {
                if disc.len() >= self.disc_limit {
                    return Err((packet, DropReason::QueueDisc));
                }
                disc.push_back(packet);
                self.refill();
            }
        }
        Ok(())
    }

    fn refill(&mut self) {
        loop {
            let fits = match self.queue_disc.as_ref().and_then(VecDeque::front) {
                Some(head) => self.fits(head),
                None => return,
            };
            if !fits {
                return;
            }
            if let Some(packet) = self.queue_disc.as_mut().and_then(VecDeque::pop_front) {
                self.push_device(packet);
            }
        }
    }

    /// If the wire is idle, take the head of the device queue and return
    /// it with its serialization time.
    pub fn start_transmission(&mut self) -> Option<(Packet, SimTime)> {
        if self.busy {
            return None;
        }
        let packet = self.queue.pop_front()?;
        let bytes = wire_size(&packet);
        self.queue_bytes -= bytes;
        self.refill();
        let tx_time = self
            .data_rate
            .transmission_time(bytes as u64)
            .unwrap_or(SimTime::ZERO);
        self.busy = true;
        Some((packet, tx_time))
    }

    pub fn transmit_complete(&mut self) {
        self.busy = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use cc_lab_abstract::Transport;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn udp(uid: u64, payload: usize) -> Packet {
        Packet {
            uid,
            src: SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), 49153),
            dst: SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 2), 6900),
            transport: Transport::Udp,
            payload: Bytes::from(vec![0u8; payload]),
        }
    }

    fn link(disc_limit: u32) -> LinkConfig {
        LinkConfig {
            queue_disc_limit: disc_limit,
            ..LinkConfig::default()
        }
    }

    #[test]
    fn transmission_time_counts_link_header() {
        let mut dev = Device::new(&link(0));
        dev.enqueue(udp(0, 512)).unwrap();
        let (_, tx) = dev.start_transmission().unwrap();
        // (512 + 8 + 20 + 2) bytes at 1 Mbps
        assert_eq!(tx, SimTime::from_micros(4_336));
        assert!(dev.is_busy());
        assert!(dev.start_transmission().is_none());
    }

    #[test]
    fn device_queue_drops_tail_without_queue_disc() {
        let mut dev = Device::new(&link(0));
        dev.enqueue(udp(0, 512)).unwrap();
        dev.enqueue(udp(1, 512)).unwrap();
        let (packet, reason) = dev.enqueue(udp(2, 512)).unwrap_err();
        assert_eq!(packet.uid, 2);
        assert_eq!(reason, DropReason::Queue);
    }

    #[test]
    fn packet_larger_than_device_queue_is_dropped() {
        let config = LinkConfig {
            device_queue_bytes: 500,
            ..link(10)
        };
        let mut dev = Device::new(&config);
        let (packet, reason) = dev.enqueue(udp(0, 512)).unwrap_err();
        assert_eq!(packet.uid, 0);
        assert_eq!(reason, DropReason::Queue);

        // smaller packets behind it still flow
        dev.enqueue(udp(1, 100)).unwrap();
        let (packet, _) = dev.start_transmission().unwrap();
        assert_eq!(packet.uid, 1);
        assert_eq!(dev.backlog(), 0);
    }

    #[test]
    fn queue_disc_absorbs_overflow_then_drops() {
        let mut dev = Device::new(&link(3));
        for uid in 0..5 {
            dev.enqueue(udp(uid, 512)).unwrap();
        }
        assert_eq!(dev.backlog(), 5);
        let (_, reason) = dev.enqueue(udp(5, 512)).unwrap_err();
        assert_eq!(reason, DropReason::QueueDisc);
    }

    #[test]
    fn queue_disc_refills_device_in_order() {
        let mut dev = Device::new(&link(10));
        for uid in 0..4 {
            dev.enqueue(udp(uid, 512)).unwrap();
        }
        let mut order = Vec::new();
        while let Some((packet, _)) = dev.start_transmission() {
            order.push(packet.uid);
            dev.transmit_complete();
        }
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_eq!(dev.backlog(), 0);
    }
}
