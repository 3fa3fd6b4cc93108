use serde::Deserialize;

use crate::config::ExperimentConfig;
use crate::time::DataRate;

/// Partial configuration loaded from a TOML file. Every field is optional
/// and only the ones present replace the defaults.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ExperimentOverride {
    pub stop_time: Option<f64>,
    pub link_data_rate: Option<DataRate>,
    pub link_delay: Option<f64>,
    pub device_queue_bytes: Option<u32>,
    pub queue_disc_limit: Option<u32>,
    pub segment_size: Option<u32>,
    pub packet_size: Option<u32>,
    pub packet_count: Option<u32>,
    pub data_rate: Option<DataRate>,
    pub cross_data_rate: Option<DataRate>,
    pub sample_period: Option<f64>,
    pub tracked_flows: Option<Vec<u32>>,
    pub drop_buckets: Option<Vec<usize>>,
    pub probe_period: Option<f64>,
}

impl ExperimentOverride {
    pub fn apply_to(&self, config: &mut ExperimentConfig) {
        if let Some(v) = self.stop_time {
            config.stop_time = v;
        }
        if let Some(v) = self.link_data_rate {
            config.link.data_rate = v;
        }
        if let Some(v) = self.link_delay {
            config.link.delay = v;
        }
        if let Some(v) = self.device_queue_bytes {
            config.link.device_queue_bytes = v;
        }
        if let Some(v) = self.queue_disc_limit {
            config.link.queue_disc_limit = v;
        }
        if let Some(v) = self.segment_size {
            config.tcp.segment_size = v;
        }
        if let Some(v) = self.packet_size {
            config.generator.packet_size = v;
        }
        if let Some(v) = self.packet_count {
            config.generator.packet_count = v;
        }
        if let Some(v) = self.data_rate {
            config.generator.data_rate = v;
        }
        if let Some(v) = self.cross_data_rate {
            config.cross_traffic.data_rate = v;
        }
        if let Some(v) = self.sample_period {
            config.drop_sampler.period = v;
        }
        if let Some(v) = &self.tracked_flows {
            config.drop_sampler.flows = v.clone();
        }
        if let Some(v) = &self.drop_buckets {
            config.drop_sampler.buckets = v.clone();
        }
        if let Some(v) = self.probe_period {
            config.byte_probe.period = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_present_fields_are_applied() {
        let text = r#"
            stop_time = 0.5
            data_rate = "2Mbps"
            drop_buckets = [3]
        "#;
        let ovr: ExperimentOverride = toml::from_str(text).unwrap();
        let mut cfg = ExperimentConfig::default();
        ovr.apply_to(&mut cfg);

        assert_eq!(cfg.stop_time, 0.5);
        assert_eq!(cfg.generator.data_rate, DataRate::from_mbps(2));
        assert_eq!(cfg.drop_sampler.buckets, vec![3]);
        assert_eq!(cfg.generator.packet_size, 512);
        assert_eq!(cfg.link, ExperimentConfig::default().link);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<ExperimentOverride>("topology = \"star\"");
        assert!(err.is_err());
    }
}
