use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use cc_lab_abstract::{ExperimentConfig, ExperimentOverride};
use cc_lab_simulator::{RunReport, experiment};

#[derive(Parser, Debug)]
#[command(author, version, about = "TCP congestion-control comparison over a shared bottleneck")]
struct Args {
    /// Congestion-control variant: TcpNewReno, TcpHybla, TcpWestwood,
    /// TcpScalable or TcpVegas.
    #[arg(long, default_value = "TcpWestwood")]
    variant: String,

    /// TOML file overriding parts of the default experiment.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory receiving the per-variant output files.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Write a JSON report of the finished run.
    #[arg(long)]
    report_json: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();
    info!("cc-lab starting…");

    let config = build_config(args.config.as_deref())?;
    let report = match experiment::run(&config, &args.variant, &args.output_dir) {
        Ok(report) => report,
        Err(e) => {
            error!("Run failed: {}", e);
            return Err(e).context(format!("Experiment for {} failed", args.variant));
        }
    };
    for path in &report.files {
        info!("Wrote {}", path.display());
    }

    if let Some(path) = &args.report_json {
        write_report(path, &report)?;
    }

    Ok(())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn build_config(path: Option<&Path>) -> Result<ExperimentConfig> {
    let mut config = ExperimentConfig::default();
    if let Some(path) = path {
        load_override(path)?.apply_to(&mut config);
        info!("Applied overrides from {}", path.display());
    }
    Ok(config)
}

fn load_override(path: &Path) -> Result<ExperimentOverride> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let overrides: ExperimentOverride =
        toml::from_str(&content).context("Failed to parse config file")?;
    Ok(overrides)
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize run report")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write report file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_select_westwood_in_current_dir() {
        let args = Args::parse_from(["cc-lab"]);
        assert_eq!(args.variant, "TcpWestwood");
        assert_eq!(args.output_dir, PathBuf::from("."));
        assert!(args.config.is_none());
        assert!(args.report_json.is_none());
    }

    #[test]
    fn parses_all_flags() {
        let args = Args::parse_from([
            "cc-lab",
            "--variant",
            "TcpVegas",
            "--config",
            "exp.toml",
            "--output-dir",
            "out",
            "--report-json",
            "report.json",
        ]);
        assert_eq!(args.variant, "TcpVegas");
        assert_eq!(args.config, Some(PathBuf::from("exp.toml")));
        assert_eq!(args.output_dir, PathBuf::from("out"));
        assert_eq!(args.report_json, Some(PathBuf::from("report.json")));
    }

    #[test]
    fn missing_config_file_is_reported() {
        let err = build_config(Some(Path::new("/nonexistent/cc-lab.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn no_config_means_defaults() {
        assert_eq!(build_config(None).unwrap(), ExperimentConfig::default());
    }
}
