//! The congestion-control comparison experiment.
//!
//! One bulk TCP transfer from 10.1.1.1 to 10.1.1.2 competes with five
//! on/off UDP sources over a single bottleneck link. The run produces
//! four files in the output directory, each suffixed with the variant
//! name: `congestion_`, `sentbytes_`, `drop_` and `flowmonitor_`.

use cc_lab_abstract::{ExperimentConfig, Protocol, SimTime, TcpVariant};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::apps::{OnOffSource, PacketSink, TrafficGenerator};
use crate::error::{ExperimentError, SimError};
use crate::event::NodeId;
use crate::net::Network;
use crate::output::{self, output_path};
use crate::simulator::Simulator;
use crate::telemetry::{BytesProbe, CwndTracer, DropSampler};
use crate::trace::{FlowSummary, RunReport, TcpSummary};

pub const SENDER: NodeId = NodeId(0);
pub const RECEIVER: NodeId = NodeId(1);

fn write_file(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>,
) -> Result<(), ExperimentError> {
    let mut file = output::create(path)?;
    write(&mut file)
        .and_then(|()| file.flush())
        .map_err(|source| ExperimentError::Output {
            path: path.to_path_buf(),
            source,
        })
}

/// Run the experiment for `variant_name` and write its output files into
/// `out_dir`. An unknown variant fails before anything is built or written.
pub fn run(
    config: &ExperimentConfig,
    variant_name: &str,
    out_dir: &Path,
) -> Result<RunReport, ExperimentError> {
    let variant: TcpVariant = variant_name.parse()?;
    config.validate()?;
    info!("Running {} for {}s", variant, config.stop_time);

    fs::create_dir_all(out_dir).map_err(|source| ExperimentError::Output {
        path: out_dir.to_path_buf(),
        source,
    })?;
    let congestion_path = output_path(out_dir, "congestion", variant.name());
    let sentbytes_path = output_path(out_dir, "sentbytes", variant.name());
    let drop_path = output_path(out_dir, "drop", variant.name());
    let flowmon_path = output_path(out_dir, "flowmonitor", variant.name());

    let mut net = Network::point_to_point(&config.link, &config.tcp);
    net.set_tcp_variant(variant);
    let receiver_ip = net
        .node_addr(RECEIVER)
        .ok_or(SimError::UnknownNode(RECEIVER.0))?;

    let tcp_socket = net.create_socket(SENDER, Protocol::Tcp);
    let tracer = CwndTracer::new(output::create(&congestion_path)?);
    net.trace_cwnd(tcp_socket, Box::new(tracer))
        .map_err(SimError::from)?;

    let mut sim = Simulator::new(net);

    let gen_cfg = &config.generator;
    let tcp_sink = sim.install_app(
        RECEIVER,
        Box::new(PacketSink::new(Protocol::Tcp, gen_cfg.port)),
        gen_cfg.sink_window.start_time(),
        gen_cfg.sink_window.stop_time(),
    )?;

    let mut generator = TrafficGenerator::new();
    generator.initialize(
        tcp_socket,
        SocketAddr::from((receiver_ip, gen_cfg.port)),
        gen_cfg.packet_size,
        gen_cfg.packet_count,
        gen_cfg.data_rate,
    )?;
    let generator_id = sim.install_app(
        SENDER,
        Box::new(generator),
        gen_cfg.window.start_time(),
        gen_cfg.window.stop_time(),
    )?;

    let cross = &config.cross_traffic;
    let cross_peer = SocketAddr::from((receiver_ip, cross.port));
    for window in &cross.sources {
        let source = OnOffSource::new(
            cross_peer,
            cross.packet_size,
            cross.data_rate,
            SimTime::from_secs_f64(cross.on_time),
            SimTime::from_secs_f64(cross.off_time),
        )?;
        sim.install_app(
            SENDER,
            Box::new(source),
            window.start_time(),
            window.stop_time(),
        )?;
    }
    let udp_sink = sim.install_app(
        RECEIVER,
        Box::new(PacketSink::new(Protocol::Udp, cross.port)),
        cross.sink_window.start_time(),
        cross.sink_window.stop_time(),
    )?;

    let probe = BytesProbe::new(
        output::create(&sentbytes_path)?,
        SimTime::from_secs_f64(config.byte_probe.period),
    );
    sim.set_byte_probe(
        Box::new(probe),
        SimTime::from_secs_f64(config.byte_probe.first_sample),
    )?;
    sim.set_drop_sampler(DropSampler::new(&config.drop_sampler))?;

    sim.stop_at(config.stop_at())?;
    sim.run()?;
    let counts = sim.finish()?;

    let series = sim.drop_series().cloned().unwrap_or_default();
    write_file(&drop_path, |f| series.write_to(f))?;
    write_file(&flowmon_path, |f| sim.network().flow_monitor().write_xml(f))?;

    let net = sim.network();
    let generator = sim.app::<TrafficGenerator>(generator_id);
    let report = RunReport {
        variant: variant.name().to_string(),
        config: config.clone(),
        duration: sim.now().as_secs_f64(),
        events_processed: sim.events_processed(),
        packets_sent: generator.map_or(0, TrafficGenerator::packets_sent),
        packets_refused: generator.map_or(0, TrafficGenerator::packets_refused),
        tcp_rx_bytes: sim.app::<PacketSink>(tcp_sink).map_or(0, PacketSink::total_rx),
        udp_rx_bytes: sim.app::<PacketSink>(udp_sink).map_or(0, PacketSink::total_rx),
        tcp: net.tcp_socket(tcp_socket).map(|s| TcpSummary {
            final_cwnd: s.cwnd(),
            ssthresh: s.ssthresh(),
            retransmits: s.retransmits(),
        }),
        cwnd_records: counts.cwnd_records,
        byte_samples: counts.byte_samples,
        drop_samples: counts.drop_samples,
        final_drop_count: series.last().map_or(0, |(_, n)| n),
        queue_drops: net.drops(),
        ip_tx_bytes: net.total_ip_tx_bytes(),
        flows: FlowSummary::collect(net.flow_monitor()),
        files: vec![congestion_path, sentbytes_path, drop_path, flowmon_path],
    };
    info!(
        "{}: {} packets written, {} drop samples, {} cwnd records",
        report.variant, report.packets_sent, report.drop_samples, report.cwnd_records
    );
    Ok(report)
}

/// Output files the run for `variant` would produce in `out_dir`.
pub fn expected_outputs(out_dir: &Path, variant: TcpVariant) -> Vec<PathBuf> {
    ["congestion", "sentbytes", "drop", "flowmonitor"]
        .iter()
        .map(|prefix| output_path(out_dir, prefix, variant.name()))
        .collect()
}
