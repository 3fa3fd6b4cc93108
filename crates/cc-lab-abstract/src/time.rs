//! Virtual time and link/application data rates.
//!
//! `SimTime` counts integer nanoseconds from the start of a run, so
//! periodic schedules such as "every 10 ms" never accumulate rounding
//! error. Fractional seconds only appear at the configuration and output
//! boundaries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use crate::error::ConfigError;

const NANOS_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const MAX: SimTime = SimTime(u64::MAX);

    pub const fn from_nanos(nanos: u64) -> Self {
        SimTime(nanos)
    }

    pub const fn from_micros(micros: u64) -> Self {
        SimTime(micros * 1_000)
    }

    pub const fn from_millis(millis: u64) -> Self {
        SimTime(millis * 1_000_000)
    }

    pub const fn from_secs(secs: u64) -> Self {
        SimTime(secs * NANOS_PER_SEC)
    }

    /// Convert fractional seconds, rounding to the nearest nanosecond.
    /// Negative and non-finite inputs map to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return SimTime::ZERO;
        }
        SimTime((secs * NANOS_PER_SEC as f64).round() as u64)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    pub fn checked_add(self, other: SimTime) -> Option<SimTime> {
        self.0.checked_add(other.0).map(SimTime)
    }

    pub fn saturating_add(self, other: SimTime) -> SimTime {
        SimTime(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(other.0))
    }

    pub fn saturating_mul(self, factor: u64) -> SimTime {
        SimTime(self.0.saturating_mul(factor))
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        self.saturating_add(rhs)
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: SimTime) {
        *self = self.saturating_add(rhs);
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.as_secs_f64())
    }
}

/// A data rate in bits per second.
///
/// Parses and prints the usual unit suffixes (`bps`, `Kbps`, `Mbps`,
/// `Gbps`), so configuration files can say `data_rate = "300Kbps"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataRate(u64);

impl DataRate {
    pub const fn from_bps(bps: u64) -> Self {
        DataRate(bps)
    }

    pub const fn from_kbps(kbps: u64) -> Self {
        DataRate(kbps * 1_000)
    }

    pub const fn from_mbps(mbps: u64) -> Self {
        DataRate(mbps * 1_000_000)
    }

    pub const fn bps(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Time needed to put `bytes` on the wire at this rate.
    /// Returns `None` for a zero rate, where the delay is undefined.
    pub fn transmission_time(self, bytes: u64) -> Option<SimTime> {
        if self.0 == 0 {
            return None;
        }
        let nanos = (bytes as u128 * 8 * NANOS_PER_SEC as u128) / self.0 as u128;
        Some(SimTime::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }
}

impl FromStr for DataRate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        let value: f64 = number.parse().map_err(|_| ConfigError::InvalidDataRate {
            input: s.to_string(),
        })?;
        let multiplier = match unit.trim() {
            "" | "bps" | "b/s" => 1.0,
            "kbps" | "Kbps" | "kb/s" | "Kb/s" => 1e3,
            "Mbps" | "mbps" | "Mb/s" => 1e6,
            "Gbps" | "gbps" | "Gb/s" => 1e9,
            _ => {
                return Err(ConfigError::InvalidDataRate {
                    input: s.to_string(),
                });
            }
        };
        Ok(DataRate((value * multiplier).round() as u64))
    }
}

impl TryFrom<String> for DataRate {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataRate> for String {
    fn from(rate: DataRate) -> Self {
        rate.to_string()
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bps = self.0;
        if bps >= 1_000_000_000 && bps % 1_000_000_000 == 0 {
            write!(f, "{}Gbps", bps / 1_000_000_000)
        } else if bps >= 1_000_000 && bps % 1_000_000 == 0 {
            write!(f, "{}Mbps", bps / 1_000_000)
        } else if bps >= 1_000 && bps % 1_000 == 0 {
            write!(f, "{}Kbps", bps / 1_000)
        } else {
            write!(f, "{}bps", bps)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secs_round_trip_is_exact_for_millisecond_steps() {
        let t = SimTime::from_secs_f64(0.01);
        assert_eq!(t, SimTime::from_millis(10));
        assert_eq!(SimTime::from_millis(300).as_secs_f64(), 0.3);
        assert_eq!(SimTime::from_secs_f64(-1.0), SimTime::ZERO);
    }

    #[test]
    fn transmission_time_of_generator_packet() {
        let rate = DataRate::from_mbps(1);
        let delay = rate.transmission_time(512).unwrap();
        assert_eq!(delay, SimTime::from_micros(4_096));
        assert_eq!(delay.as_secs_f64(), 0.004096);
    }

    #[test]
    fn zero_rate_has_no_transmission_time() {
        assert!(DataRate::from_bps(0).transmission_time(512).is_none());
    }

    #[test]
    fn parses_unit_suffixes() {
        assert_eq!("1Mbps".parse::<DataRate>().unwrap(), DataRate::from_mbps(1));
        assert_eq!("300Kbps".parse::<DataRate>().unwrap(), DataRate::from_kbps(300));
        assert_eq!("1.5Mbps".parse::<DataRate>().unwrap(), DataRate::from_kbps(1_500));
        assert_eq!("42".parse::<DataRate>().unwrap(), DataRate::from_bps(42));
        assert!("fast".parse::<DataRate>().is_err());
        assert!("10parsecs".parse::<DataRate>().is_err());
    }

    #[test]
    fn display_picks_largest_exact_unit() {
        assert_eq!(DataRate::from_mbps(1).to_string(), "1Mbps");
        assert_eq!(DataRate::from_kbps(300).to_string(), "300Kbps");
        assert_eq!(DataRate::from_bps(1_500_001).to_string(), "1500001bps");
    }
}
