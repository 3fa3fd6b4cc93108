use cc_lab_abstract::ExperimentConfig;
use serde::Serialize;
use std::path::PathBuf;

use crate::net::flowmon::FlowMonitor;

#[derive(Debug, Clone, Serialize)]
pub struct FlowSummary {
    pub flow_id: u32,
    pub protocol: String,
    pub source: String,
    pub destination: String,
    pub tx_packets: u32,
    pub rx_packets: u32,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub packets_dropped: Vec<u32>,
    /// Mean one-way delay of delivered packets, seconds.
    pub mean_delay: Option<f64>,
}

impl FlowSummary {
    pub fn collect(monitor: &FlowMonitor) -> Vec<FlowSummary> {
        monitor
            .flow_stats()
            .iter()
            .filter_map(|(&flow_id, s)| {
                let key = monitor.flow_key(flow_id)?;
                let mean_delay = (s.rx_packets > 0)
                    .then(|| s.delay_sum.as_secs_f64() / s.rx_packets as f64);
                Some(FlowSummary {
                    flow_id,
                    protocol: format!("{:?}", key.protocol),
                    source: key.src.to_string(),
                    destination: key.dst.to_string(),
                    tx_packets: s.tx_packets,
                    rx_packets: s.rx_packets,
                    tx_bytes: s.tx_bytes,
                    rx_bytes: s.rx_bytes,
                    packets_dropped: s.packets_dropped.clone(),
                    mean_delay,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TcpSummary {
    pub final_cwnd: u32,
    pub ssthresh: u32,
    pub retransmits: u32,
}

/// Serializable summary of a finished experiment run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub variant: String,
    pub config: ExperimentConfig,
    /// Virtual time at which the run stopped, seconds.
    pub duration: f64,
    pub events_processed: u64,
    pub packets_sent: u32,
    pub packets_refused: u32,
    pub tcp_rx_bytes: u64,
    pub udp_rx_bytes: u64,
    pub tcp: Option<TcpSummary>,
    pub cwnd_records: u64,
    pub byte_samples: u64,
    pub drop_samples: u64,
    pub final_drop_count: u64,
    pub queue_drops: u64,
    pub ip_tx_bytes: u64,
    pub flows: Vec<FlowSummary>,
    pub files: Vec<PathBuf>,
}
