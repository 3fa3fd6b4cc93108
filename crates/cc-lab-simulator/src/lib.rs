pub mod apps;
pub mod congestion;
pub mod engine;
pub mod error;
pub mod event;
pub mod experiment;
pub mod net;
pub mod output;
pub mod simulator;
pub mod telemetry;
pub mod trace;

pub use engine::Scheduler;
pub use error::{ExperimentError, SimError, TelemetryError};
pub use event::{AppId, NodeId};
pub use net::Network;
pub use simulator::Simulator;
pub use trace::RunReport;
