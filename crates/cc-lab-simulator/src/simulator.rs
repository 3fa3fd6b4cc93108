use bytes::Bytes;
use cc_lab_abstract::{
    AppContext, Application, EventId, Protocol, SimTime, SocketError, SocketId,
};
use std::net::SocketAddr;
use tracing::{debug, info};

use crate::engine::Scheduler;
use crate::error::{SimError, TelemetryError};
use crate::event::{AppId, NodeId, ProbeKind, SimEvent};
use crate::net::{MAX_PER_HOP_DELAY, Network};
use crate::telemetry::{DropSampleSeries, DropSampler, PeriodicProbe};

/// Capability handed to an application for the duration of one callback.
struct SimContext<'a> {
    net: &'a mut Network,
    sched: &'a mut Scheduler<SimEvent>,
    app: AppId,
    node: NodeId,
}

impl<'a> AppContext for SimContext<'a> {
    fn now(&self) -> SimTime {
        self.sched.now()
    }

    fn schedule(&mut self, delay: SimTime, token: u64) -> EventId {
        self.sched.schedule(
            delay,
            SimEvent::AppTimer {
                app: self.app,
                token,
            },
        )
    }

    fn cancel(&mut self, event: EventId) {
        self.sched.cancel(event);
    }

    fn is_pending(&self, event: EventId) -> bool {
        self.sched.is_pending(event)
    }

    fn open(&mut self, protocol: Protocol) -> SocketId {
        self.net.create_socket(self.node, protocol)
    }

    fn bind(&mut self, socket: SocketId) -> Result<(), SocketError> {
        self.net.bind(socket)
    }

    fn bind6(&mut self, socket: SocketId) -> Result<(), SocketError> {
        self.net.bind6(socket)
    }

    fn connect(&mut self, socket: SocketId, remote: SocketAddr) -> Result<(), SocketError> {
        self.net.connect(socket, remote, self.sched)
    }

    fn listen(&mut self, protocol: Protocol, port: u16) -> Result<SocketId, SocketError> {
        self.net.listen(self.node, protocol, port)
    }

    fn send(&mut self, socket: SocketId, payload: Bytes) -> Result<usize, SocketError> {
        self.net.send(socket, payload, self.sched)
    }

    fn close(&mut self, socket: SocketId) -> Result<(), SocketError> {
        self.net.close(socket, self.sched)
    }

    fn received_bytes(&self, socket: SocketId) -> u64 {
        self.net.received_bytes(socket)
    }
}

/// Take one sample and return the delay until the next one.
fn sample_probe<P: PeriodicProbe + ?Sized>(
    probe: Option<&mut P>,
    now: SimTime,
    net: &Network,
) -> Result<Option<SimTime>, TelemetryError> {
    let Some(probe) = probe else {
        return Ok(None);
    };
    probe.sample(now, net)?;
    Ok(Some(probe.period()))
}

struct AppSlot {
    node: NodeId,
    app: Box<dyn Application>,
}

/// Record counts produced when the telemetry sinks are flushed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryCounts {
    pub cwnd_records: u64,
    pub byte_samples: u64,
    pub drop_samples: u64,
}

pub struct Simulator {
    scheduler: Scheduler<SimEvent>,
    net: Network,
    apps: Vec<AppSlot>,
    drop_sampler: Option<DropSampler>,
    byte_probe: Option<Box<dyn PeriodicProbe>>,
    events_processed: u64,
}

impl Simulator {
    pub fn new(net: Network) -> Self {
        Self {
            scheduler: Scheduler::new(),
            net,
            apps: Vec::new(),
            drop_sampler: None,
            byte_probe: None,
            events_processed: 0,
        }
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn network(&self) -> &Network {
        &self.net
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.net
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn peek_next_event_time(&self) -> Option<SimTime> {
        self.scheduler.peek_next_time()
    }

    /// Install `app` on `node`, started at `start` and stopped at `stop`.
    pub fn install_app(
        &mut self,
        node: NodeId,
        app: Box<dyn Application>,
        start: SimTime,
        stop: SimTime,
    ) -> Result<AppId, SimError> {
        if self.net.node(node).is_none() {
            return Err(SimError::UnknownNode(node.0));
        }
        let id = AppId(self.apps.len());
        self.scheduler.schedule_at(start, SimEvent::StartApp(id))?;
        self.scheduler.schedule_at(stop, SimEvent::StopApp(id))?;
        debug!("Installed {} on {} for [{}, {}]", app.name(), node, start, stop);
        self.apps.push(AppSlot { node, app });
        Ok(id)
    }

    /// Borrow an installed application as its concrete type.
    pub fn app<T: 'static>(&self, id: AppId) -> Option<&T> {
        self.apps.get(id.0)?.app.as_any().downcast_ref::<T>()
    }

    pub fn set_drop_sampler(&mut self, sampler: DropSampler) -> Result<(), SimError> {
        self.scheduler
            .schedule_at(sampler.first_sample(), SimEvent::Sample(ProbeKind::Drops))?;
        self.drop_sampler = Some(sampler);
        Ok(())
    }

    pub fn drop_series(&self) -> Option<&DropSampleSeries> {
        self.drop_sampler.as_ref().map(DropSampler::series)
    }

    pub fn set_byte_probe(
        &mut self,
        probe: Box<dyn PeriodicProbe>,
        first_sample: SimTime,
    ) -> Result<(), SimError> {
        self.scheduler
            .schedule_at(first_sample, SimEvent::Sample(ProbeKind::Bytes))?;
        self.byte_probe = Some(probe);
        Ok(())
    }

    pub fn stop_at(&mut self, at: SimTime) -> Result<(), SimError> {
        self.scheduler.stop_at(at)
    }

    /// Process the next event. Returns false once nothing is left to run.
    pub fn step(&mut self) -> Result<bool, SimError> {
        let Some((_, event)) = self.scheduler.pop() else {
            return Ok(false);
        };
        self.events_processed += 1;
        self.dispatch(event)?;
        Ok(true)
    }

    pub fn run(&mut self) -> Result<(), SimError> {
        while self.step()? {}
        info!(
            "Simulation finished at {} after {} events",
            self.scheduler.now(),
            self.events_processed
        );
        Ok(())
    }

    fn dispatch(&mut self, event: SimEvent) -> Result<(), SimError> {
        match event {
            SimEvent::StartApp(id) => {
                let slot = self
                    .apps
                    .get_mut(id.0)
                    .ok_or(SimError::UnknownApp { index: id.0 })?;
                let mut ctx = SimContext {
                    net: &mut self.net,
                    sched: &mut self.scheduler,
                    app: id,
                    node: slot.node,
                };
                info!("Starting {} on {}", slot.app.name(), slot.node);
                slot.app
                    .start(&mut ctx)
                    .map_err(|source| SimError::App {
                        name: slot.app.name(),
                        source,
                    })?;
            }
            SimEvent::StopApp(id) => {
                let slot = self
                    .apps
                    .get_mut(id.0)
                    .ok_or(SimError::UnknownApp { index: id.0 })?;
                let mut ctx = SimContext {
                    net: &mut self.net,
                    sched: &mut self.scheduler,
                    app: id,
                    node: slot.node,
                };
                slot.app.stop(&mut ctx);
                debug!("Stopped {} on {}", slot.app.name(), slot.node);
            }
            SimEvent::AppTimer { app, token } => {
                let slot = self
                    .apps
                    .get_mut(app.0)
                    .ok_or(SimError::UnknownApp { index: app.0 })?;
                let mut ctx = SimContext {
                    net: &mut self.net,
                    sched: &mut self.scheduler,
                    app,
                    node: slot.node,
                };
                slot.app
                    .on_timer(&mut ctx, token)
                    .map_err(|source| SimError::App {
                        name: slot.app.name(),
                        source,
                    })?;
            }
            SimEvent::TransmitComplete { node } => {
                self.net.transmit_complete(node, &mut self.scheduler);
            }
            SimEvent::Arrival { node, packet } => {
                self.net.receive(node, packet, &mut self.scheduler);
            }
            SimEvent::TcpTimeout { socket } => {
                self.net.tcp_timeout(socket, &mut self.scheduler);
            }
            SimEvent::Sample(kind) => {
                let now = self.scheduler.now();
                let period = match kind {
                    ProbeKind::Drops => sample_probe(self.drop_sampler.as_mut(), now, &self.net)?,
                    ProbeKind::Bytes => {
                        sample_probe(self.byte_probe.as_deref_mut(), now, &self.net)?
                    }
                };
                if let Some(period) = period {
                    self.scheduler.schedule(period, SimEvent::Sample(kind));
                }
            }
        }
        Ok(())
    }

    /// Flush every telemetry sink and close out the flow monitor.
    pub fn finish(&mut self) -> Result<TelemetryCounts, SimError> {
        let now = self.scheduler.now();
        self.net
            .flow_monitor_mut()
            .check_for_lost_packets(now, MAX_PER_HOP_DELAY);

        let mut counts = TelemetryCounts {
            cwnd_records: self
                .net
                .finish_observers()
                .map_err(TelemetryError::from)?,
            ..TelemetryCounts::default()
        };
        if let Some(probe) = self.byte_probe.as_mut() {
            counts.byte_samples = probe.finish().map_err(TelemetryError::from)?;
        }
        if let Some(sampler) = self.drop_sampler.as_mut() {
            counts.drop_samples = sampler.finish().map_err(TelemetryError::from)?;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::{PacketSink, TrafficGenerator};
    use cc_lab_abstract::{AppError, DataRate, LinkConfig, SamplerConfig, TcpConfig};
    use std::any::Any;
    use std::net::Ipv4Addr;

    fn simulator() -> Simulator {
        Simulator::new(Network::point_to_point(
            &LinkConfig::default(),
            &TcpConfig::default(),
        ))
    }

    /// Arms a timer on start and records when it fires.
    #[derive(Default)]
    struct Ticker {
        fired: Vec<SimTime>,
        stopped_at: Option<SimTime>,
    }

    impl Application for Ticker {
        fn name(&self) -> &'static str {
            "ticker"
        }

        fn start(&mut self, ctx: &mut dyn AppContext) -> Result<(), AppError> {
            ctx.schedule(SimTime::from_millis(5), 7);
            Ok(())
        }

        fn stop(&mut self, ctx: &mut dyn AppContext) {
            self.stopped_at = Some(ctx.now());
        }

        fn on_timer(&mut self, ctx: &mut dyn AppContext, token: u64) -> Result<(), AppError> {
            assert_eq!(token, 7);
            self.fired.push(ctx.now());
            ctx.schedule(SimTime::from_millis(5), 7);
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn app_lifecycle_follows_window_and_stop_time() {
        let mut sim = simulator();
        let id = sim
            .install_app(
                NodeId(0),
                Box::<Ticker>::default(),
                SimTime::from_millis(10),
                SimTime::from_millis(30),
            )
            .unwrap();
        sim.stop_at(SimTime::from_millis(32)).unwrap();
        sim.run().unwrap();

        let ticker = sim.app::<Ticker>(id).unwrap();
        let fired: Vec<u64> = ticker.fired.iter().map(|t| t.as_nanos() / 1_000_000).collect();
        assert_eq!(fired, vec![15, 20, 25, 30]);
        assert_eq!(ticker.stopped_at, Some(SimTime::from_millis(30)));
        assert_eq!(sim.now(), SimTime::from_millis(32));
    }

    #[test]
    fn unknown_node_is_rejected() {
        let mut sim = simulator();
        let err = sim
            .install_app(
                NodeId(9),
                Box::<Ticker>::default(),
                SimTime::ZERO,
                SimTime::from_secs(1),
            )
            .unwrap_err();
        assert!(matches!(err, SimError::UnknownNode(9)));
    }

    #[test]
    fn drop_sampler_rearms_until_stop() {
        let mut sim = simulator();
        sim.set_drop_sampler(DropSampler::new(&SamplerConfig::default()))
            .unwrap();
        sim.stop_at(SimTime::from_millis(100)).unwrap();
        sim.run().unwrap();

        let series = sim.drop_series().unwrap();
        // 10 ms .. 90 ms; the 100 ms re-arm lands after the stop marker
        assert_eq!(series.len(), 9);
        assert!(series.samples().windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(sim.finish().unwrap().drop_samples, 9);
    }

    #[test]
    fn generator_feeds_tcp_sink() {
        let mut sim = simulator();
        let socket = sim.network_mut().create_socket(NodeId(0), Protocol::Tcp);
        let mut generator = TrafficGenerator::new();
        generator
            .initialize(
                socket,
                SocketAddr::from((Ipv4Addr::new(10, 1, 1, 2), 4200)),
                512,
                20,
                DataRate::from_kbps(500),
            )
            .unwrap();
        let sink = sim
            .install_app(
                NodeId(1),
                Box::new(PacketSink::new(Protocol::Tcp, 4200)),
                SimTime::ZERO,
                SimTime::from_secs(2),
            )
            .unwrap();
        let gen_id = sim
            .install_app(NodeId(0), Box::new(generator), SimTime::ZERO, SimTime::from_secs(1))
            .unwrap();
        sim.stop_at(SimTime::from_secs(2)).unwrap();
        sim.run().unwrap();

        assert_eq!(sim.app::<TrafficGenerator>(gen_id).unwrap().packets_sent(), 20);
        assert_eq!(sim.app::<PacketSink>(sink).unwrap().total_rx(), 20 * 512);
        assert!(sim.app::<TrafficGenerator>(sink).is_none());
    }
}
