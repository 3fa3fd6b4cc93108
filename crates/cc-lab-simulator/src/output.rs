//! Output files and number formatting shared by the telemetry writers.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::ExperimentError;

/// Format `value` the way C's `%.<precision>e` does: the exponent always
/// carries a sign and at least two digits, e.g. `1.000e-02`.
pub fn c_scientific(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return format!("{}", value);
    }
    let rust = format!("{:.*e}", precision, value);
    let Some((mantissa, exponent)) = rust.split_once('e') else {
        return rust;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{}e{}{:02}", mantissa, sign, exponent.abs())
}

/// Format `value` the way a default C++ stream (or C's `%g`) does:
/// `precision` significant digits, trailing zeros removed, scientific
/// notation only for very small or very large magnitudes.
pub fn c_general(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return format!("{}", value);
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let precision = precision.max(1);
    let rounded = format!("{:.*e}", precision - 1, value);
    let Some((mantissa, exponent)) = rounded.split_once('e') else {
        return rounded;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if exponent < -4 || exponent >= precision as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!(
            "{}e{}{:02}",
            trim_fraction(mantissa),
            sign,
            exponent.abs()
        );
    }
    let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
    trim_fraction(&format!("{:.*}", decimals, value)).to_string()
}

fn trim_fraction(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

/// Path of a per-variant output file, e.g. `out/congestion_TcpWestwood`.
pub fn output_path(dir: &Path, prefix: &str, variant: &str) -> PathBuf {
    dir.join(format!("{}_{}", prefix, variant))
}

/// Create (truncating) an output file behind a buffered writer.
pub fn create(path: &Path) -> Result<BufWriter<File>, ExperimentError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| ExperimentError::Output {
            path: path.to_path_buf(),
            source,
        })
}
