//! Congestion-control variants.
//!
//! Each variant only decides how the window grows on new ACKs and where
//! the slow-start threshold lands after a loss. Loss detection, recovery
//! and retransmission stay in the TCP socket.

use cc_lab_abstract::{SimTime, TcpVariant};

/// Window state shared between the socket and its congestion-control variant.
#[derive(Debug, Clone)]
pub struct Tcb {
    pub cwnd: u32,
    pub ssthresh: u32,
    pub segment_size: u32,
    pub last_rtt: Option<SimTime>,
    pub min_rtt: Option<SimTime>,
}

impl Tcb {
    pub fn new(segment_size: u32, initial_cwnd: u32) -> Self {
        Self {
            cwnd: initial_cwnd,
            ssthresh: u32::MAX,
            segment_size,
            last_rtt: None,
            min_rtt: None,
        }
    }

    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    fn cwnd_segments(&self) -> u32 {
        (self.cwnd / self.segment_size).max(1)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AckSample {
    pub segments_acked: u32,
    pub rtt: Option<SimTime>,
    pub now: SimTime,
}

pub trait CongestionOps {
    fn name(&self) -> &'static str;

    /// Grow `tcb.cwnd` for `segments_acked` newly acknowledged segments.
    fn increase_window(&mut self, tcb: &mut Tcb, segments_acked: u32);

    /// Slow-start threshold to use after a loss.
    fn ssthresh(&mut self, tcb: &Tcb, bytes_in_flight: u32) -> u32;

    /// Called on every ACK that advances `snd_una`, before `increase_window`.
    fn pkts_acked(&mut self, _tcb: &Tcb, _sample: &AckSample) {}
}

pub fn for_variant(variant: TcpVariant) -> Box<dyn CongestionOps> {
    match variant {
        TcpVariant::NewReno => Box::new(NewReno),
        TcpVariant::Hybla => Box::new(Hybla::default()),
        TcpVariant::Westwood => Box::new(Westwood::default()),
        TcpVariant::Scalable => Box::new(Scalable::default()),
        TcpVariant::Vegas => Box::new(Vegas::default()),
    }
}

/// Returns the segments left over once slow start has consumed its share.
fn reno_slow_start(tcb: &mut Tcb, segments_acked: u32) -> u32 {
    if segments_acked >= 1 {
        tcb.cwnd = tcb.cwnd.saturating_add(tcb.segment_size);
        return segments_acked - 1;
    }
    0
}

fn reno_congestion_avoidance(tcb: &mut Tcb, segments_acked: u32) {
    if segments_acked == 0 {
        return;
    }
    let seg = tcb.segment_size as f64;
    let adder = ((seg * seg) / tcb.cwnd.max(1) as f64).max(1.0);
    tcb.cwnd = tcb.cwnd.saturating_add(adder as u32);
}

fn reno_ssthresh(tcb: &Tcb, bytes_in_flight: u32) -> u32 {
    (bytes_in_flight / 2).max(2 * tcb.segment_size)
}

pub struct NewReno;

impl CongestionOps for NewReno {
    fn name(&self) -> &'static str {
        "NewReno"
    }

    fn increase_window(&mut self, tcb: &mut Tcb, mut segments_acked: u32) {
        if tcb.in_slow_start() {
            segments_acked = reno_slow_start(tcb, segments_acked);
        }
        if !tcb.in_slow_start() {
            reno_congestion_avoidance(tcb, segments_acked);
        }
    }

    fn ssthresh(&mut self, tcb: &Tcb, bytes_in_flight: u32) -> u32 {
        reno_ssthresh(tcb, bytes_in_flight)
    }
}

const HYBLA_RRTT: SimTime = SimTime::from_millis(25);

/// Scales growth by the ratio of the connection's RTT to a 25 ms
/// reference, so long-RTT flows ramp up as fast as short ones.
pub struct Hybla {
    rho: f64,
    cwnd_fraction: f64,
}

impl Default for Hybla {
    fn default() -> Self {
        Self {
            rho: 1.0,
            cwnd_fraction: 0.0,
        }
    }
}

impl CongestionOps for Hybla {
    fn name(&self) -> &'static str {
        "Hybla"
    }

    fn pkts_acked(&mut self, tcb: &Tcb, _sample: &AckSample) {
        if let Some(min_rtt) = tcb.min_rtt {
            self.rho =
                (min_rtt.as_nanos() as f64 / HYBLA_RRTT.as_nanos() as f64).max(1.0);
        }
    }

    fn increase_window(&mut self, tcb: &mut Tcb, segments_acked: u32) {
        let seg = tcb.segment_size as f64;
        for _ in 0..segments_acked {
            let increment = if tcb.in_slow_start() {
                2f64.powf(self.rho) - 1.0
            } else {
                self.rho * self.rho / tcb.cwnd_segments() as f64
            };
            self.cwnd_fraction += increment * seg;
            let whole = self.cwnd_fraction.floor();
            if whole >= 1.0 {
                tcb.cwnd = tcb.cwnd.saturating_add(whole as u32);
                self.cwnd_fraction -= whole;
            }
        }
    }

    fn ssthresh(&mut self, tcb: &Tcb, bytes_in_flight: u32) -> u32 {
        reno_ssthresh(tcb, bytes_in_flight)
    }
}

/// Sets the post-loss threshold from a filtered bandwidth estimate
/// instead of halving.
#[derive(Default)]
pub struct Westwood {
    bandwidth: f64,
    last_sample: f64,
    acked_bytes: u64,
    interval_start: Option<SimTime>,
}

impl Westwood {
    fn estimate(&mut self, now: SimTime, rtt: SimTime) {
        let Some(start) = self.interval_start else {
            self.interval_start = Some(now);
            return;
        };
        let elapsed = now.saturating_sub(start);
        if elapsed < rtt || elapsed == SimTime::ZERO {
            return;
        }
        let sample = self.acked_bytes as f64 / elapsed.as_secs_f64();
        // Tustin filter
        self.bandwidth = (19.0 / 21.0) * self.bandwidth + (1.0 / 21.0) * (sample + self.last_sample);
        self.last_sample = sample;
        self.acked_bytes = 0;
        self.interval_start = Some(now);
    }

    pub fn bandwidth_estimate(&self) -> f64 {
        self.bandwidth
    }
}

impl CongestionOps for Westwood {
    fn name(&self) -> &'static str {
        "Westwood"
    }

    fn pkts_acked(&mut self, tcb: &Tcb, sample: &AckSample) {
        self.acked_bytes += sample.segments_acked as u64 * tcb.segment_size as u64;
        if let Some(rtt) = tcb.last_rtt {
            self.estimate(sample.now, rtt);
        }
    }

    fn increase_window(&mut self, tcb: &mut Tcb, segments_acked: u32) {
        NewReno.increase_window(tcb, segments_acked);
    }

    fn ssthresh(&mut self, tcb: &Tcb, _bytes_in_flight: u32) -> u32 {
        let min_rtt = tcb.min_rtt.map(|r| r.as_secs_f64()).unwrap_or(0.0);
        let bdp = (self.bandwidth * min_rtt) as u32;
        bdp.max(2 * tcb.segment_size)
    }
}

const SCALABLE_AI_FACTOR: u32 = 50;
const SCALABLE_MD_FACTOR: f64 = 0.125;

#[derive(Default)]
pub struct Scalable {
    ack_count: u32,
}

impl CongestionOps for Scalable {
    fn name(&self) -> &'static str {
        "Scalable"
    }

    fn increase_window(&mut self, tcb: &mut Tcb, mut segments_acked: u32) {
        if tcb.in_slow_start() {
            segments_acked = reno_slow_start(tcb, segments_acked);
        }
        if tcb.in_slow_start() || segments_acked == 0 {
            return;
        }
        let w = tcb.cwnd_segments().min(SCALABLE_AI_FACTOR);
        self.ack_count += segments_acked;
        if self.ack_count >= w {
            let grow = self.ack_count / w;
            self.ack_count %= w;
            tcb.cwnd = tcb.cwnd.saturating_add(grow * tcb.segment_size);
        }
    }

    fn ssthresh(&mut self, tcb: &Tcb, _bytes_in_flight: u32) -> u32 {
        let reduced = tcb.cwnd_segments() as f64 * (1.0 - SCALABLE_MD_FACTOR);
        (reduced.max(2.0) as u32) * tcb.segment_size
    }
}

const VEGAS_ALPHA: f64 = 2.0;
const VEGAS_BETA: f64 = 4.0;
const VEGAS_GAMMA: f64 = 1.0;

/// Delay-based: compares expected and actual throughput once per round
/// and nudges the window by one segment.
#[derive(Default)]
pub struct Vegas {
    base_rtt: Option<SimTime>,
    round_min_rtt: Option<SimTime>,
    rtt_count: u32,
    round_acked: u32,
}

impl Vegas {
    fn end_round(&mut self, tcb: &mut Tcb) {
        let (Some(base), Some(rtt)) = (self.base_rtt, self.round_min_rtt) else {
            return;
        };
        let rtt_ns = rtt.as_nanos().max(1) as f64;
        let cwnd_segs = tcb.cwnd_segments() as f64;
        let diff = cwnd_segs * (rtt_ns - base.as_nanos() as f64) / rtt_ns;
        let seg = tcb.segment_size;

        if tcb.in_slow_start() {
            if diff > VEGAS_GAMMA {
                let target = (cwnd_segs * base.as_nanos() as f64 / rtt_ns) as u32;
                tcb.cwnd = tcb.cwnd.min((target + 1) * seg);
                tcb.ssthresh = tcb.cwnd.saturating_sub(seg).max(2 * seg);
            }
        } else if diff > VEGAS_BETA {
            tcb.cwnd = tcb.cwnd.saturating_sub(seg).max(2 * seg);
            tcb.ssthresh = tcb.cwnd.saturating_sub(seg).max(2 * seg);
        } else if diff < VEGAS_ALPHA {
            tcb.cwnd = tcb.cwnd.saturating_add(seg);
        }
    }
}

impl CongestionOps for Vegas {
    fn name(&self) -> &'static str {
        "Vegas"
    }

    fn pkts_acked(&mut self, _tcb: &Tcb, sample: &AckSample) {
        let Some(rtt) = sample.rtt else {
            return;
        };
        self.base_rtt = Some(self.base_rtt.map_or(rtt, |b| b.min(rtt)));
        self.round_min_rtt = Some(self.round_min_rtt.map_or(rtt, |m| m.min(rtt)));
        self.rtt_count += 1;
    }

    fn increase_window(&mut self, tcb: &mut Tcb, segments_acked: u32) {
        self.round_acked += segments_acked;
        if self.round_acked < tcb.cwnd_segments() {
            if tcb.in_slow_start() {
                reno_slow_start(tcb, segments_acked);
            }
            return;
        }

        if self.rtt_count <= 2 {
            NewReno.increase_window(tcb, segments_acked);
        } else {
            self.end_round(tcb);
        }
        self.round_acked = 0;
        self.rtt_count = 0;
        self.round_min_rtt = None;
    }

    fn ssthresh(&mut self, tcb: &Tcb, _bytes_in_flight: u32) -> u32 {
        tcb.ssthresh
            .min(tcb.cwnd.saturating_sub(tcb.segment_size))
            .max(2 * tcb.segment_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEG: u32 = 536;

    fn sample(rtt_ms: u64) -> AckSample {
        AckSample {
            segments_acked: 1,
            rtt: Some(SimTime::from_millis(rtt_ms)),
            now: SimTime::ZERO,
        }
    }

    #[test]
    fn newreno_slow_start_adds_one_segment_per_ack() {
        let mut tcb = Tcb::new(SEG, 10 * SEG);
        NewReno.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 11 * SEG);
    }

    #[test]
    fn newreno_congestion_avoidance_grows_sublinearly() {
        let mut tcb = Tcb::new(SEG, 10 * SEG);
        tcb.ssthresh = 5 * SEG;
        NewReno.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 10 * SEG + SEG / 10);
    }

    #[test]
    fn reno_ssthresh_halves_flight_with_floor() {
        let tcb = Tcb::new(SEG, 10 * SEG);
        assert_eq!(NewReno.ssthresh(&tcb, 10 * SEG), 5 * SEG);
        assert_eq!(NewReno.ssthresh(&tcb, SEG), 2 * SEG);
    }

    #[test]
    fn hybla_grows_faster_on_long_rtt() {
        let mut short = Tcb::new(SEG, 10 * SEG);
        let mut long = short.clone();
        long.min_rtt = Some(SimTime::from_millis(100));

        let mut a = Hybla::default();
        let mut b = Hybla::default();
        a.pkts_acked(&short, &sample(10));
        b.pkts_acked(&long, &sample(100));
        a.increase_window(&mut short, 1);
        b.increase_window(&mut long, 1);
        assert_eq!(short.cwnd, 11 * SEG);
        assert!(long.cwnd > short.cwnd);
    }

    #[test]
    fn scalable_backs_off_by_an_eighth() {
        let mut tcb = Tcb::new(SEG, 80 * SEG);
        assert_eq!(Scalable::default().ssthresh(&tcb, 0), 70 * SEG);
        tcb.cwnd = SEG;
        assert_eq!(Scalable::default().ssthresh(&tcb, 0), 2 * SEG);
    }

    #[test]
    fn scalable_adds_a_segment_every_w_acks() {
        let mut tcb = Tcb::new(SEG, 10 * SEG);
        tcb.ssthresh = SEG;
        let mut cc = Scalable::default();
        cc.increase_window(&mut tcb, 9);
        assert_eq!(tcb.cwnd, 10 * SEG);
        cc.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 11 * SEG);
    }

    #[test]
    fn westwood_threshold_tracks_bandwidth_delay_product() {
        let mut tcb = Tcb::new(SEG, 10 * SEG);
        tcb.last_rtt = Some(SimTime::from_millis(20));
        tcb.min_rtt = Some(SimTime::from_millis(20));
        let mut cc = Westwood::default();
        for ms in (0..=200).step_by(10) {
            let ack = AckSample {
                segments_acked: 2,
                rtt: tcb.last_rtt,
                now: SimTime::from_millis(ms),
            };
            cc.pkts_acked(&tcb, &ack);
        }
        assert!(cc.bandwidth_estimate() > 0.0);
        assert!(cc.ssthresh(&tcb, 0) >= 2 * SEG);
    }

    #[test]
    fn vegas_shrinks_when_queueing_delay_builds() {
        let mut tcb = Tcb::new(SEG, 20 * SEG);
        tcb.ssthresh = 10 * SEG;
        let mut cc = Vegas::default();

        // uncongested round: actual matches expected, grow by one
        for _ in 0..3 {
            cc.pkts_acked(&tcb, &sample(20));
        }
        cc.increase_window(&mut tcb, 20);
        assert_eq!(tcb.cwnd, 21 * SEG);

        // RTT doubles: about half the window is queued, back off by one
        for _ in 0..3 {
            cc.pkts_acked(&tcb, &sample(40));
        }
        cc.increase_window(&mut tcb, 21);
        assert_eq!(tcb.cwnd, 20 * SEG);
        assert_eq!(tcb.ssthresh, 19 * SEG);
    }

    #[test]
    fn every_variant_has_an_implementation() {
        for variant in TcpVariant::ALL {
            assert!(!for_variant(variant).name().is_empty());
        }
    }
}
