//! Simplified TCP.
//!
//! The sender side runs the handshake, window-limited transmission,
//! retransmission timeout and fast retransmit with NewReno recovery. The
//! receiver side acknowledges every segment cumulatively. Neither side
//! touches the scheduler; effects are collected in a `TcpOutput` and
//! applied by the network.

use cc_lab_abstract::{SimTime, SocketError, TcpConfig, TcpHeader, flags};
use std::collections::BTreeMap;
use std::net::SocketAddrV4;
use tracing::debug;

use crate::congestion::{AckSample, CongestionOps, Tcb};

const MAX_RTO: SimTime = SimTime::from_secs(60);
const CLOCK_GRANULARITY: SimTime = SimTime::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerAction {
    #[default]
    Unchanged,
    Restart(SimTime),
    Cancel,
}

/// Effects produced by one call into a socket.
#[derive(Debug, Default)]
pub struct TcpOutput {
    /// Header and payload length of each segment to transmit, in order.
    pub segments: Vec<(TcpHeader, u32)>,
    /// `(old, new)` congestion-window notifications, in order.
    pub cwnd_changes: Vec<(u32, u32)>,
    pub timer: TimerAction,
}

impl TcpOutput {
    fn emit(&mut self, seq: u64, ack: u64, flags: u8, len: u32) {
        self.segments.push((TcpHeader::new(seq, ack, flags), len));
    }
}

/// RFC 6298 retransmission-timeout estimator.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt: Option<f64>,
    rttvar: f64,
    min_rto: SimTime,
    initial_rto: SimTime,
    backoff: u32,
}

impl RttEstimator {
    pub fn new(initial_rto: SimTime, min_rto: SimTime) -> Self {
        Self {
            srtt: None,
            rttvar: 0.0,
            min_rto,
            initial_rto,
            backoff: 0,
        }
    }

    pub fn sample(&mut self, rtt: SimTime) {
        let r = rtt.as_nanos() as f64;
        match self.srtt {
            None => {
                self.srtt = Some(r);
                self.rttvar = r / 2.0;
            }
            Some(srtt) => {
                self.rttvar = 0.75 * self.rttvar + 0.25 * (srtt - r).abs();
                self.srtt = Some(0.875 * srtt + 0.125 * r);
            }
        }
        self.backoff = 0;
    }

    pub fn srtt(&self) -> Option<SimTime> {
        self.srtt.map(|s| SimTime::from_nanos(s as u64))
    }

    pub fn rto(&self) -> SimTime {
        let base = match self.srtt {
            None => self.initial_rto,
            Some(srtt) => {
                let var = (4.0 * self.rttvar).max(CLOCK_GRANULARITY.as_nanos() as f64);
                SimTime::from_nanos((srtt + var) as u64).max(self.min_rto)
            }
        };
        base.saturating_mul(1u64 << self.backoff.min(16)).min(MAX_RTO)
    }

    pub fn back_off(&mut self) {
        self.backoff += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Idle,
    SynSent,
    Established,
    Closed,
}

/// Sending half of a TCP connection. Sequence number 0 is the SYN;
/// application data starts at 1.
pub struct TcpSocket {
    pub local: Option<SocketAddrV4>,
    pub remote: Option<SocketAddrV4>,
    state: TcpState,
    config: TcpConfig,
    tcb: Tcb,
    cc: Box<dyn CongestionOps>,
    snd_una: u64,
    snd_nxt: u64,
    high_tx: u64,
    /// Sequence number one past the last byte written by the application.
    app_end: u64,
    dupacks: u32,
    recover: Option<u64>,
    rtt: RttEstimator,
    /// Segment currently being timed; cleared on retransmission.
    timed: Option<(u64, SimTime)>,
    timer_armed: bool,
    retransmits: u32,
}

impl TcpSocket {
    pub fn new(config: &TcpConfig, cc: Box<dyn CongestionOps>) -> Self {
        let initial_cwnd = config.initial_cwnd_segments * config.segment_size;
        Self {
            local: None,
            remote: None,
            state: TcpState::Idle,
            config: config.clone(),
            tcb: Tcb::new(config.segment_size, initial_cwnd),
            cc,
            snd_una: 0,
            snd_nxt: 0,
            high_tx: 0,
            app_end: 1,
            dupacks: 0,
            recover: None,
            rtt: RttEstimator::new(
                SimTime::from_secs_f64(config.initial_rto),
                SimTime::from_secs_f64(config.min_rto),
            ),
            timed: None,
            timer_armed: false,
            retransmits: 0,
        }
    }

    pub fn state(&self) -> TcpState {
        self.state
    }

    pub fn cwnd(&self) -> u32 {
        self.tcb.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.tcb.ssthresh
    }

    pub fn variant_name(&self) -> &'static str {
        self.cc.name()
    }

    pub fn retransmits(&self) -> u32 {
        self.retransmits
    }

    pub fn bytes_in_flight(&self) -> u32 {
        (self.snd_nxt - self.snd_una) as u32
    }

    /// Bytes accepted from the application and not yet acknowledged.
    pub fn buffered(&self) -> u64 {
        self.app_end - self.snd_una.max(1)
    }

    fn set_cwnd(&mut self, value: u32, out: &mut TcpOutput) {
        out.cwnd_changes.push((self.tcb.cwnd, value));
        self.tcb.cwnd = value;
    }

    fn arm_timer(&mut self, out: &mut TcpOutput) {
        self.timer_armed = true;
        out.timer = TimerAction::Restart(self.rtt.rto());
    }

    fn disarm_timer(&mut self, out: &mut TcpOutput) {
        self.timer_armed = false;
        out.timer = TimerAction::Cancel;
    }

    pub fn connect(&mut self, now: SimTime, out: &mut TcpOutput) -> Result<(), SocketError> {
        match self.state {
            TcpState::Idle => {}
            TcpState::Closed => return Err(SocketError::Closed),
            _ => return Err(SocketError::AlreadyConnected),
        }
        self.state = TcpState::SynSent;
        out.emit(0, 0, flags::SYN, 0);
        self.snd_nxt = 1;
        self.high_tx = 1;
        self.timed = Some((0, now));
        self.arm_timer(out);
        Ok(())
    }

    /// Accept `len` bytes into the send buffer.
    pub fn send(&mut self, now: SimTime, len: usize, out: &mut TcpOutput) -> Result<usize, SocketError> {
        match self.state {
            TcpState::Idle => return Err(SocketError::NotConnected),
            TcpState::Closed => return Err(SocketError::Closed),
            TcpState::SynSent | TcpState::Established => {}
        }
        let buffered = self.buffered();
        if buffered + len as u64 > self.config.send_buffer_bytes {
            return Err(SocketError::SendBufferFull {
                buffered,
                requested: len,
            });
        }
        self.app_end += len as u64;
        self.try_send(now, out);
        Ok(len)
    }

    pub fn close(&mut self, out: &mut TcpOutput) {
        if self.state != TcpState::Closed {
            self.state = TcpState::Closed;
            self.disarm_timer(out);
        }
    }

    fn try_send(&mut self, now: SimTime, out: &mut TcpOutput) {
        if self.state != TcpState::Established {
            return;
        }
        let seg = self.config.segment_size as u64;
        while self.snd_nxt < self.app_end {
            let len = seg.min(self.app_end - self.snd_nxt);
            let in_flight = self.snd_nxt - self.snd_una;
            if in_flight + len > self.tcb.cwnd as u64 {
                break;
            }
            out.emit(self.snd_nxt, 1, flags::ACK, len as u32);
            if self.snd_nxt >= self.high_tx && self.timed.is_none() {
                self.timed = Some((self.snd_nxt, now));
            } else if self.snd_nxt < self.high_tx {
                self.retransmits += 1;
            }
            self.snd_nxt += len;
            self.high_tx = self.high_tx.max(self.snd_nxt);
            if !self.timer_armed {
                self.arm_timer(out);
            }
        }
    }

    fn retransmit_head(&mut self, out: &mut TcpOutput) {
        let seg = self.config.segment_size as u64;
        let len = seg.min(self.app_end - self.snd_una);
        if len == 0 {
            return;
        }
        out.emit(self.snd_una, 1, flags::ACK, len as u32);
        self.retransmits += 1;
        self.timed = None;
        self.snd_nxt = self.snd_nxt.max(self.snd_una + len);
    }

    pub fn on_segment(&mut self, now: SimTime, header: &TcpHeader, out: &mut TcpOutput) {
        match self.state {
            TcpState::SynSent if header.is_syn() && header.is_ack() && header.ack == 1 => {
                self.establish(now, header, out);
            }
            TcpState::Established if header.is_ack() && !header.is_syn() => {
                self.on_ack(now, header.ack, out);
            }
            TcpState::Established if header.is_syn() => {
                // SYN-ACK retransmitted because our handshake ACK was lost
                out.emit(1, header.seq + 1, flags::ACK, 0);
            }
            _ => debug!("Ignoring segment {:?} in state {:?}", header, self.state),
        }
    }

    fn establish(&mut self, now: SimTime, header: &TcpHeader, out: &mut TcpOutput) {
        self.state = TcpState::Established;
        self.snd_una = 1;
        self.snd_nxt = 1;
        if let Some((_, sent)) = self.timed.take() {
            self.sample_rtt(now.saturating_sub(sent));
        }
        self.disarm_timer(out);
        let initial = self.config.initial_cwnd_segments * self.config.segment_size;
        self.set_cwnd(initial, out);
        out.emit(1, header.seq + 1, flags::ACK, 0);
        self.try_send(now, out);
    }

    fn sample_rtt(&mut self, rtt: SimTime) {
        self.rtt.sample(rtt);
        self.tcb.last_rtt = Some(rtt);
        self.tcb.min_rtt = Some(self.tcb.min_rtt.map_or(rtt, |m| m.min(rtt)));
    }

    fn on_ack(&mut self, now: SimTime, ack: u64, out: &mut TcpOutput) {
        if ack > self.high_tx {
            debug!("ACK {} beyond anything sent", ack);
            return;
        }
        if ack > self.snd_una {
            self.on_new_ack(now, ack, out);
        } else if ack == self.snd_una && self.snd_una < self.high_tx {
            self.on_dupack(now, out);
        }
    }

    fn on_new_ack(&mut self, now: SimTime, ack: u64, out: &mut TcpOutput) {
        let seg = self.config.segment_size;
        let acked = (ack - self.snd_una) as u32;
        let segments_acked = acked.div_ceil(seg);

        let mut rtt = None;
        if let Some((seq, sent)) = self.timed {
            if ack > seq {
                let sample = now.saturating_sub(sent);
                self.sample_rtt(sample);
                self.timed = None;
                rtt = Some(sample);
            }
        }
        self.cc.pkts_acked(
            &self.tcb,
            &AckSample {
                segments_acked,
                rtt,
                now,
            },
        );

        self.snd_una = ack;
        self.snd_nxt = self.snd_nxt.max(ack);

        match self.recover {
            Some(recover) if ack >= recover => {
                self.recover = None;
                self.dupacks = 0;
                let ssthresh = self.tcb.ssthresh;
                self.set_cwnd(ssthresh, out);
            }
            Some(_) => {
                // partial ACK: the next hole is lost too
                self.retransmit_head(out);
                let deflated = self.tcb.cwnd.saturating_sub(acked).saturating_add(seg);
                self.set_cwnd(deflated.max(seg), out);
            }
            None => {
                self.dupacks = 0;
                let before = self.tcb.cwnd;
                self.cc.increase_window(&mut self.tcb, segments_acked);
                if self.tcb.cwnd != before {
                    out.cwnd_changes.push((before, self.tcb.cwnd));
                }
            }
        }

        if self.snd_una == self.high_tx {
            self.disarm_timer(out);
        } else {
            self.arm_timer(out);
        }
        self.try_send(now, out);
    }

    fn on_dupack(&mut self, now: SimTime, out: &mut TcpOutput) {
        self.dupacks += 1;
        let seg = self.config.segment_size;
        if self.recover.is_none() && self.dupacks == self.config.dupack_threshold {
            let in_flight = self.bytes_in_flight();
            self.tcb.ssthresh = self.cc.ssthresh(&self.tcb, in_flight);
            self.recover = Some(self.high_tx);
            debug!(
                "Fast retransmit at {} (ssthresh {})",
                self.snd_una, self.tcb.ssthresh
            );
            self.retransmit_head(out);
            let inflated = self.tcb.ssthresh + self.config.dupack_threshold * seg;
            self.set_cwnd(inflated, out);
            self.arm_timer(out);
        } else if self.recover.is_some() {
            let inflated = self.tcb.cwnd.saturating_add(seg);
            self.set_cwnd(inflated, out);
            self.try_send(now, out);
        }
    }

    pub fn on_timeout(&mut self, now: SimTime, out: &mut TcpOutput) {
        self.timer_armed = false;
        match self.state {
            TcpState::SynSent => {
                debug!("SYN timed out, retrying");
                self.rtt.back_off();
                self.timed = None;
                out.emit(0, 0, flags::SYN, 0);
                self.retransmits += 1;
                self.arm_timer(out);
            }
            TcpState::Established if self.snd_una < self.high_tx => {
                let in_flight = (self.high_tx - self.snd_una) as u32;
                self.tcb.ssthresh = self.cc.ssthresh(&self.tcb, in_flight);
                debug!(
                    "RTO at {}: ssthresh {}, restarting from {}",
                    now, self.tcb.ssthresh, self.snd_una
                );
                self.recover = None;
                self.dupacks = 0;
                self.timed = None;
                self.rtt.back_off();
                let seg = self.config.segment_size;
                self.set_cwnd(seg, out);
                self.snd_nxt = self.snd_una;
                self.try_send(now, out);
                if !self.timer_armed {
                    self.arm_timer(out);
                }
            }
            _ => {}
        }
    }
}

/// Receiving half of one accepted connection.
#[derive(Debug, Default)]
pub struct TcpReceiver {
    rcv_nxt: u64,
    out_of_order: BTreeMap<u64, u32>,
    delivered: u64,
}

impl TcpReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload bytes delivered in order so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    fn advance(&mut self, seq: u64, len: u32) {
        let end = seq + len as u64;
        if end > self.rcv_nxt && seq <= self.rcv_nxt {
            self.delivered += end - self.rcv_nxt;
            self.rcv_nxt = end;
        }
    }

    /// Process an incoming segment and return the reply to send, if any.
    pub fn on_segment(&mut self, header: &TcpHeader, payload_len: u32) -> Option<TcpHeader> {
        if header.is_syn() {
            self.rcv_nxt = self.rcv_nxt.max(header.seq + 1);
            return Some(TcpHeader::new(0, self.rcv_nxt, flags::SYN | flags::ACK));
        }
        if payload_len == 0 {
            return None;
        }

        if header.seq <= self.rcv_nxt {
            self.advance(header.seq, payload_len);
            while let Some((&seq, &len)) = self.out_of_order.first_key_value() {
                if seq > self.rcv_nxt {
                    break;
                }
                self.out_of_order.pop_first();
                self.advance(seq, len);
            }
        } else {
            let entry = self.out_of_order.entry(header.seq).or_insert(0);
            *entry = (*entry).max(payload_len);
        }
        Some(TcpHeader::new(1, self.rcv_nxt, flags::ACK))
    }
}
