use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// The closed set of congestion-control variants an experiment can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TcpVariant {
    NewReno,
    Hybla,
    Westwood,
    Scalable,
    Vegas,
}

impl TcpVariant {
    pub const ALL: [TcpVariant; 5] = [
        TcpVariant::NewReno,
        TcpVariant::Hybla,
        TcpVariant::Westwood,
        TcpVariant::Scalable,
        TcpVariant::Vegas,
    ];

    /// User-visible name, also used as the suffix of every output file.
    pub fn name(self) -> &'static str {
        match self {
            TcpVariant::NewReno => "TcpNewReno",
            TcpVariant::Hybla => "TcpHybla",
            TcpVariant::Westwood => "TcpWestwood",
            TcpVariant::Scalable => "TcpScalable",
            TcpVariant::Vegas => "TcpVegas",
        }
    }

    fn allowed_names() -> String {
        Self::ALL
            .iter()
            .map(|v| v.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for TcpVariant {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.name() == name)
            .ok_or_else(|| ConfigError::UnknownVariant {
                name: name.to_string(),
                allowed: Self::allowed_names(),
            })
    }
}

impl fmt::Display for TcpVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
