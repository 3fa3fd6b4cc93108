use cc_lab_abstract::{AppError, ConfigError, SimTime, SocketError};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("cannot schedule an event at {requested} when the clock reads {now}")]
    NonCausal { requested: SimTime, now: SimTime },

    #[error("application {index} does not exist")]
    UnknownApp { index: usize },

    #[error("node {0} does not exist")]
    UnknownNode(usize),

    #[error("application '{name}' failed: {source}")]
    App {
        name: &'static str,
        #[source]
        source: AppError,
    },

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("sample at {at} does not follow the previous sample at {last}")]
    NonMonotonic { last: SimTime, at: SimTime },

    #[error("telemetry sink failed: {0}")]
    Io(#[from] io::Error),
}

/// Everything that can abort an experiment run.
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Simulation(#[from] SimError),

    #[error("failed to write {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
