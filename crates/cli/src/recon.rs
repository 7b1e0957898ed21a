//! `tally run` and `tally validate`: config-driven ledger reconciliation.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use tally_recon::ingest::write_csv;
use tally_recon::{ReconConfig, ReconError};

use crate::exit_codes::{recon_exit_code, EXIT_RECON_MISMATCH, EXIT_RECON_RUNTIME};
use crate::CliError;

#[derive(Subcommand)]
pub enum ReconCommands {
    /// Run reconciliation from a TOML config file
    #[command(after_help = "\
Examples:
  tally run daily.recon.toml
  tally run daily.recon.toml --json
  tally run daily.recon.toml --output mismatches.csv --fail-on-mismatch")]
    Run {
        /// Path to the .recon.toml config file
        config: PathBuf,

        /// Write mismatches to this CSV (overrides `output` in the config)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Print the summary as JSON to stdout instead of the text block
        #[arg(long)]
        json: bool,

        /// Exit 1 when any transaction is left unmatched
        #[arg(long)]
        fail_on_mismatch: bool,
    },

    /// Validate a recon config without running
    #[command(after_help = "\
Examples:
  tally validate daily.recon.toml")]
    Validate {
        /// Path to the .recon.toml config file
        config: PathBuf,
    },
}

pub fn cmd_recon(cmd: ReconCommands) -> Result<(), CliError> {
    match cmd {
        ReconCommands::Run { config, output, json, fail_on_mismatch } => {
            cmd_recon_run(config, output, json, fail_on_mismatch)
        }
        ReconCommands::Validate { config } => cmd_recon_validate(config),
    }
}

fn recon_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

impl From<ReconError> for CliError {
    fn from(e: ReconError) -> Self {
        let hint = match &e {
            ReconError::ConfigValidation(msg) if msg.contains("internal source") => {
                Some("mark exactly one source with role = \"internal\"".to_string())
            }
            ReconError::InvalidDate { .. } => {
                Some("dates in [filter] date_range use YYYY-MM-DD".to_string())
            }
            _ => None,
        };
        CliError { code: recon_exit_code(&e), message: e.to_string(), hint }
    }
}

fn load_config(config_path: &Path) -> Result<ReconConfig, CliError> {
    let config_str = std::fs::read_to_string(config_path)
        .map_err(|e| recon_err(EXIT_RECON_RUNTIME, format!("cannot read config: {e}")))?;
    Ok(ReconConfig::from_toml(&config_str)?)
}

fn cmd_recon_run(
    config_path: PathBuf,
    output_file: Option<PathBuf>,
    json_output: bool,
    fail_on_mismatch: bool,
) -> Result<(), CliError> {
    let config = load_config(&config_path)?;

    // Resolve file paths relative to config file's directory
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    let run = tally_recon::start(&config, base_dir)?;

    let report = output_file.or_else(|| config.output.as_ref().map(|o| base_dir.join(o)));
    match report {
        Some(ref path) => {
            let rows = write_csv(path, run.mismatches.iter())?;
            eprintln!("wrote {rows} mismatch row(s) to {}", path.display());
        }
        None => {
            let rows = run.mismatches.iter().count();
            log::info!("{rows} mismatch row(s), no output file configured");
        }
    }

    let summary = run.summary();

    if json_output {
        let json_str = serde_json::to_string_pretty(&summary)
            .map_err(|e| recon_err(EXIT_RECON_RUNTIME, format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
    } else {
        eprintln!("{summary}");
    }

    if fail_on_mismatch && summary.has_mismatches() {
        return Err(recon_err(
            EXIT_RECON_MISMATCH,
            format!("{} mismatched transaction(s)", summary.total_mismatched),
        ));
    }

    Ok(())
}

fn cmd_recon_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let internal = config.internal_source().map(|(name, _)| name).unwrap_or_default();
    eprintln!(
        "valid: '{}' with {} source(s) (internal: {})",
        config.name,
        config.sources.len(),
        internal,
    );
    for (name, source) in &config.sources {
        eprintln!(
            "  - {name}: {}, parser {} ({})",
            source.role,
            source.record_parser().kind(),
            source.file,
        );
    }
    Ok(())
}
