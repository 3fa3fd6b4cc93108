//! Telemetry collected while the simulation runs.
//!
//! Periodic probes are driven by the simulator: each firing calls
//! `sample` and then re-arms the probe `period()` later on the same
//! scheduler, so samples interleave deterministically with traffic.

use cc_lab_abstract::{CwndObserver, SamplerConfig, SimTime};
use std::io::{self, Write};

use crate::error::TelemetryError;
use crate::net::Network;
use crate::net::flowmon::FlowMonitor;
use crate::output::{c_general, c_scientific};

/// A sampler the simulator fires every `period()`.
pub trait PeriodicProbe {
    fn period(&self) -> SimTime;

    fn sample(&mut self, now: SimTime, net: &Network) -> Result<(), TelemetryError>;

    /// Flush at teardown. Returns the number of samples taken.
    fn finish(&mut self) -> io::Result<u64>;
}

/// Append-only `(time, dropped)` series with strictly increasing times.
#[derive(Debug, Default, Clone)]
pub struct DropSampleSeries {
    samples: Vec<(SimTime, u64)>,
}

impl DropSampleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, at: SimTime, dropped: u64) -> Result<(), TelemetryError> {
        if let Some(&(last, _)) = self.samples.last() {
            if at <= last {
                return Err(TelemetryError::NonMonotonic { last, at });
            }
        }
        self.samples.push((at, dropped));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[(SimTime, u64)] {
        &self.samples
    }

    pub fn last(&self) -> Option<(SimTime, u64)> {
        self.samples.last().copied()
    }

    /// One `seconds count` line per sample.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for (at, dropped) in &self.samples {
            writeln!(out, "{} {}", at.as_secs_f64(), dropped)?;
        }
        out.flush()
    }
}

/// Sums selected drop-reason buckets of selected flows every period.
#[derive(Debug)]
pub struct DropSampler {
    flows: Vec<u32>,
    buckets: Vec<usize>,
    first_sample: SimTime,
    period: SimTime,
    series: DropSampleSeries,
}

impl DropSampler {
    pub fn new(config: &SamplerConfig) -> Self {
        Self {
            flows: config.flows.clone(),
            buckets: config.buckets.clone(),
            first_sample: SimTime::from_secs_f64(config.first_sample),
            period: SimTime::from_secs_f64(config.period),
            series: DropSampleSeries::new(),
        }
    }

    pub fn first_sample(&self) -> SimTime {
        self.first_sample
    }

    pub fn series(&self) -> &DropSampleSeries {
        &self.series
    }

    /// Dropped packets currently recorded for the tracked flows.
    ///
    /// A flow contributes only once its bucket list is long enough to
    /// hold every selected index; shorter or unseen flows count as zero.
    pub fn total(&self, monitor: &FlowMonitor) -> u64 {
        let Some(&highest) = self.buckets.iter().max() else {
            return 0;
        };
        let stats = monitor.flow_stats();
        self.flows
            .iter()
            .filter_map(|id| stats.get(id))
            .filter(|s| s.packets_dropped.len() > highest)
            .map(|s| {
                self.buckets
                    .iter()
                    .map(|&b| s.packets_dropped[b] as u64)
                    .sum::<u64>()
            })
            .sum()
    }

    pub fn record(&mut self, now: SimTime, monitor: &FlowMonitor) -> Result<(), TelemetryError> {
        let total = self.total(monitor);
        self.series.push(now, total)
    }
}

impl PeriodicProbe for DropSampler {
    fn period(&self) -> SimTime {
        self.period
    }

    fn sample(&mut self, now: SimTime, net: &Network) -> Result<(), TelemetryError> {
        self.record(now, net.flow_monitor())
    }

    fn finish(&mut self) -> io::Result<u64> {
        Ok(self.series.len() as u64)
    }
}

/// Writes `seconds<TAB>bytes` for the cumulative bytes handed to IP on
/// every node, in `%.3e\t%.0f` format.
pub struct BytesProbe<W: Write> {
    out: W,
    period: SimTime,
    samples: u64,
}

impl<W: Write> BytesProbe<W> {
    pub fn new(out: W, period: SimTime) -> Self {
        Self {
            out,
            period,
            samples: 0,
        }
    }

    pub fn record(&mut self, now: SimTime, bytes: u64) -> io::Result<()> {
        writeln!(
            self.out,
            "{}\t{}",
            c_scientific(now.as_secs_f64(), 3),
            bytes
        )?;
        self.samples += 1;
        Ok(())
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> PeriodicProbe for BytesProbe<W> {
    fn period(&self) -> SimTime {
        self.period
    }

    fn sample(&mut self, now: SimTime, net: &Network) -> Result<(), TelemetryError> {
        Ok(self.record(now, net.total_ip_tx_bytes())?)
    }

    fn finish(&mut self) -> io::Result<u64> {
        self.out.flush()?;
        Ok(self.samples)
    }
}

/// Records every congestion-window notification as `seconds<TAB>window`,
/// with seconds printed to six significant digits.
///
/// The first write error is kept and returned by `finish`; nothing is
/// written after it.
pub struct CwndTracer<W: Write> {
    out: W,
    records: u64,
    error: Option<io::Error>,
}

impl<W: Write> CwndTracer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            records: 0,
            error: None,
        }
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> CwndObserver for CwndTracer<W> {
    fn on_cwnd_change(&mut self, now: SimTime, _old: u32, new: u32) {
        if self.error.is_some() {
            return;
        }
        match writeln!(self.out, "{}\t{}", c_general(now.as_secs_f64(), 6), new) {
            Ok(()) => self.records += 1,
            Err(e) => self.error = Some(e),
        }
    }

    fn finish(&mut self) -> io::Result<u64> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.out.flush()?;
        Ok(self.records)
    }
}
