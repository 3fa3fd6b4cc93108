use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::time::{DataRate, SimTime};

/// Full parameter set of one experiment run.
///
/// `Default` reproduces the reference experiment: a 1 Mbps / 10 ms
/// point-to-point link, one bulk TCP transfer and five 300 Kbps UDP
/// cross-traffic sources over a 1.8 s run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Virtual time (seconds) at which the engine stops delivering callbacks.
    pub stop_time: f64,
    pub link: LinkConfig,
    pub tcp: TcpConfig,
    pub generator: GeneratorConfig,
    pub cross_traffic: CrossTrafficConfig,
    pub drop_sampler: SamplerConfig,
    pub byte_probe: ProbeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub data_rate: DataRate,
    /// One-way propagation delay in seconds.
    pub delay: f64,
    /// Capacity of the drop-tail device queue, in bytes.
    pub device_queue_bytes: u32,
    /// Packet limit of the FIFO queue disc in front of the device.
    /// Zero removes the queue disc.
    pub queue_disc_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpConfig {
    pub segment_size: u32,
    pub initial_cwnd_segments: u32,
    pub send_buffer_bytes: u64,
    /// Seconds.
    pub initial_rto: f64,
    /// Seconds.
    pub min_rto: f64,
    pub dupack_threshold: u32,
}

/// Start/stop window of an installed application, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AppWindow {
    pub start: f64,
    pub stop: f64,
}

impl AppWindow {
    pub const fn new(start: f64, stop: f64) -> Self {
        Self { start, stop }
    }

    pub fn start_time(&self) -> SimTime {
        SimTime::from_secs_f64(self.start)
    }

    pub fn stop_time(&self) -> SimTime {
        SimTime::from_secs_f64(self.stop)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub port: u16,
    pub packet_size: u32,
    pub packet_count: u32,
    pub data_rate: DataRate,
    pub window: AppWindow,
    pub sink_window: AppWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossTrafficConfig {
    pub port: u16,
    pub packet_size: u32,
    pub data_rate: DataRate,
    /// Length of each "on" period, seconds.
    pub on_time: f64,
    /// Length of each "off" period, seconds.
    pub off_time: f64,
    /// One entry per on/off source.
    pub sources: Vec<AppWindow>,
    pub sink_window: AppWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Time of the first sample, seconds.
    pub first_sample: f64,
    /// Sampling period, seconds.
    pub period: f64,
    /// Flow ids whose drops are summed.
    pub flows: Vec<u32>,
    /// Drop-reason bucket indices summed for each tracked flow.
    pub buckets: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub first_sample: f64,
    pub period: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            stop_time: 1.8,
            link: LinkConfig::default(),
            tcp: TcpConfig::default(),
            generator: GeneratorConfig::default(),
            cross_traffic: CrossTrafficConfig::default(),
            drop_sampler: SamplerConfig::default(),
            byte_probe: ProbeConfig::default(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            data_rate: DataRate::from_mbps(1),
            delay: 0.01,
            device_queue_bytes: 1500,
            queue_disc_limit: 1000,
        }
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            segment_size: 536,
            initial_cwnd_segments: 10,
            send_buffer_bytes: 131_072,
            initial_rto: 1.0,
            min_rto: 1.0,
            dupack_threshold: 3,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            port: 4200,
            packet_size: 512,
            packet_count: 100_000,
            data_rate: DataRate::from_mbps(1),
            window: AppWindow::new(0.0, 1.8),
            sink_window: AppWindow::new(0.0, 1.8),
        }
    }
}

impl Default for CrossTrafficConfig {
    fn default() -> Self {
        let starts = [0.2, 0.4, 0.6, 0.8, 1.0];
        let stops = [1.8, 1.8, 1.2, 1.4, 1.6];
        Self {
            port: 6900,
            packet_size: 512,
            data_rate: DataRate::from_kbps(300),
            on_time: 1.0,
            off_time: 0.0,
            sources: starts
                .iter()
                .zip(stops.iter())
                .map(|(&start, &stop)| AppWindow::new(start, stop))
                .collect(),
            sink_window: AppWindow::new(0.0, 1.8),
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            first_sample: 0.01,
            period: 0.01,
            flows: vec![1, 2],
            buckets: vec![3, 4],
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            first_sample: 0.0,
            period: 0.01,
        }
    }
}

fn check_time(what: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidTime { what, value })
    }
}

fn check_window(what: &'static str, window: &AppWindow) -> Result<(), ConfigError> {
    check_time(what, window.start)?;
    check_time(what, window.stop)?;
    if window.start >= window.stop {
        return Err(ConfigError::InvalidWindow {
            what,
            start: window.start,
            stop: window.stop,
        });
    }
    Ok(())
}

fn check_period(what: &'static str, period: f64) -> Result<(), ConfigError> {
    check_time(what, period)?;
    if SimTime::from_secs_f64(period) == SimTime::ZERO {
        return Err(ConfigError::ZeroPeriod { what });
    }
    Ok(())
}

impl ExperimentConfig {
    pub fn stop_at(&self) -> SimTime {
        SimTime::from_secs_f64(self.stop_time)
    }

    /// Reject parameter sets that would make the run meaningless or
    /// divide by zero, before any topology is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_time("stop_time", self.stop_time)?;

        if self.link.data_rate.is_zero() {
            return Err(ConfigError::ZeroDataRate { what: "link" });
        }
        check_time("link.delay", self.link.delay)?;

        if self.tcp.segment_size == 0 {
            return Err(ConfigError::ZeroPacketSize { what: "tcp.segment_size" });
        }
        check_period("tcp.min_rto", self.tcp.min_rto)?;
        check_period("tcp.initial_rto", self.tcp.initial_rto)?;

        if self.generator.data_rate.is_zero() {
            return Err(ConfigError::ZeroDataRate { what: "generator" });
        }
        if self.generator.packet_size == 0 {
            return Err(ConfigError::ZeroPacketSize { what: "generator" });
        }
        check_window("generator.window", &self.generator.window)?;
        check_window("generator.sink_window", &self.generator.sink_window)?;

        if self.cross_traffic.data_rate.is_zero() {
            return Err(ConfigError::ZeroDataRate { what: "cross_traffic" });
        }
        if self.cross_traffic.packet_size == 0 {
            return Err(ConfigError::ZeroPacketSize { what: "cross_traffic" });
        }
        check_time("cross_traffic.on_time", self.cross_traffic.on_time)?;
        check_time("cross_traffic.off_time", self.cross_traffic.off_time)?;
        for source in &self.cross_traffic.sources {
            check_window("cross_traffic.sources", source)?;
        }
        check_window("cross_traffic.sink_window", &self.cross_traffic.sink_window)?;

        check_time("drop_sampler.first_sample", self.drop_sampler.first_sample)?;
        check_period("drop_sampler.period", self.drop_sampler.period)?;
        if self.drop_sampler.flows.is_empty() {
            return Err(ConfigError::EmptySelection { what: "flow id" });
        }
        if self.drop_sampler.buckets.is_empty() {
            return Err(ConfigError::EmptySelection { what: "drop-reason bucket" });
        }

        check_time("byte_probe.first_sample", self.byte_probe.first_sample)?;
        check_period("byte_probe.period", self.byte_probe.period)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_reference_experiment() {
        let cfg = ExperimentConfig::default();
        assert_eq!(cfg.stop_at(), SimTime::from_millis(1_800));
        assert_eq!(cfg.generator.packet_size, 512);
        assert_eq!(cfg.generator.packet_count, 100_000);
        assert_eq!(cfg.cross_traffic.sources.len(), 5);
        assert_eq!(cfg.cross_traffic.sources[2], AppWindow::new(0.6, 1.2));
        assert_eq!(cfg.drop_sampler.buckets, vec![3, 4]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_generator_rate_is_rejected() {
        let mut cfg = ExperimentConfig::default();
        cfg.generator.data_rate = DataRate::from_bps(0);
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroDataRate { what: "generator" })
        );
    }

    #[test]
    fn inverted_window_is_rejected() {
        let mut cfg = ExperimentConfig::default();
        cfg.cross_traffic.sources[0] = AppWindow::new(1.0, 0.5);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn sub_nanosecond_period_is_rejected() {
        let mut cfg = ExperimentConfig::default();
        cfg.drop_sampler.period = 1e-12;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroPeriod { what: "drop_sampler.period" })
        );
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = ExperimentConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        assert!(text.contains("data_rate = \"1Mbps\""));
        let back: ExperimentConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, cfg);
    }
}
