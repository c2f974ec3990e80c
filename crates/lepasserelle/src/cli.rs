// CLI Interface
//
// This module provides the command-line interface for LeDeploy.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use lephase::{MarkerState, SequenceReport, StatusReport};
use lereconcile::{ApplyReport, AutoApprove, Confirm, PromptConfirm};
use lereprise::success;
use tracing::info;

use crate::config::DeployConfig;
use crate::errors::{format_error, DeployError, Result};
use crate::ledeploy::{DeployTarget, LeDeploy};
use crate::logging::{init_logging, LogConfig, LogHandle};

/// LeDeploy - Host provisioning and cloud resource reconciliation
#[derive(Parser, Debug)]
#[command(name = "ledeploy")]
#[command(author = "LeDeploy Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision a host in resumable phases and reconcile cloud resources", long_about = None)]
pub struct Cli {
    /// Configuration file (default: $LEDEPLOY_CONFIG or /etc/ledeploy/config.toml)
    #[arg(global = true, long = "config", short = 'c')]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(global = true, long = "verbose", short = 'v')]
    pub verbose: bool,

    /// Explicit secret value, overriding every other source
    #[arg(global = true, long = "secret", value_name = "NAME=VALUE", value_parser = parse_key_value)]
    pub secrets: Vec<(String, String)>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the host phases (boot-time entry point)
    Provision,

    /// Create the declared cloud resources that do not exist yet
    Deploy {
        /// Apply without asking for confirmation
        #[arg(long = "yes", short = 'y')]
        yes: bool,

        /// Print the plan and exit
        #[arg(long = "dry-run")]
        dry_run: bool,

        /// Cloud project
        #[arg(long = "project")]
        project: Option<String>,

        /// Region
        #[arg(long = "region")]
        region: Option<String>,

        /// Extra template parameter
        #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },

    /// Resolve and write the required secrets without running phases
    Secrets,

    /// Show marker state of every phase
    Status {
        /// Print JSON instead of a table
        #[arg(long = "json")]
        json: bool,
    },

    /// Clear markers so phases run again
    Reset {
        /// Only this phase
        #[arg(long = "phase")]
        phase: Option<String>,
    },
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

impl Cli {
    /// Load configuration, install logging, run, and report.
    pub fn execute(self) -> ExitCode {
        let path = DeployConfig::locate(self.config.as_deref());
        let config = match DeployConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                let logging = init_logging(&LogConfig {
                    verbose: self.verbose,
                    ..LogConfig::default()
                });
                return report_failure(&DeployError::from(err), &logging);
            }
        };

        let logging = init_logging(&LogConfig::for_host(&config.host, self.verbose));
        info!(config = %path.display(), "ledeploy {}", env!("CARGO_PKG_VERSION"));

        match self.run(config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => report_failure(&err, &logging),
        }
    }

    /// Run the selected command against `config`.
    pub fn run(self, config: DeployConfig) -> Result<()> {
        let deploy = LeDeploy::new(config).with_secret_overrides(self.secrets);

        match self.command {
            Commands::Provision => cmd_provision_impl(&deploy),
            Commands::Deploy {
                yes,
                dry_run,
                project,
                region,
                params,
            } => {
                let target = DeployTarget {
                    project,
                    region,
                    params: params.into_iter().collect(),
                };
                cmd_deploy_impl(&deploy, &target, yes, dry_run)
            }
            Commands::Secrets => cmd_secrets_impl(&deploy),
            Commands::Status { json } => cmd_status_impl(&deploy, json),
            Commands::Reset { phase } => cmd_reset_impl(&deploy, phase.as_deref()),
        }
    }
}

fn report_failure(err: &DeployError, logging: &LogHandle) -> ExitCode {
    tracing::error!(step = err.step(), kind = %err.kind(), "{err}");
    eprintln!("\n{}", format_error(err, logging.log_file()));
    ExitCode::from(err.kind().exit_code())
}

/// Provision command implementation
fn cmd_provision_impl(deploy: &LeDeploy) -> Result<()> {
    let report = deploy.provision()?;
    print_sequence_report(&report);
    Ok(())
}

fn print_sequence_report(report: &SequenceReport) {
    if report.already_complete {
        println!("All phases already complete; nothing to do.");
        return;
    }
    println!("\nProvisioning complete");
    println!("  Applied: {}", join_or_dash(&report.completed));
    println!("  Skipped: {}", join_or_dash(&report.skipped));
}

/// Deploy command implementation
fn cmd_deploy_impl(deploy: &LeDeploy, target: &DeployTarget, yes: bool, dry_run: bool) -> Result<()> {
    let mut confirm: Box<dyn Confirm> = if yes {
        Box::new(AutoApprove)
    } else {
        Box::new(PromptConfirm::stdio())
    };

    let report = deploy.deploy(target, confirm.as_mut(), dry_run)?;
    print_apply_report(&report, dry_run);
    Ok(())
}

fn print_apply_report(report: &ApplyReport, dry_run: bool) {
    println!("\n{}", report.plan.render());
    if dry_run {
        println!("\nDry run: nothing was created.");
        return;
    }
    if !report.applied {
        println!("\nNothing to create.");
        return;
    }
    println!("\nCreated: {}", join_or_dash(&report.created));
    if !report.conflicts.is_empty() {
        println!("Already existed at creation time: {}", report.conflicts.join(", "));
    }
}

/// Secrets command implementation
fn cmd_secrets_impl(deploy: &LeDeploy) -> Result<()> {
    let secrets = deploy.materialize_secrets()?;
    if secrets.is_empty() {
        println!("No secrets are required.");
        return Ok(());
    }

    println!("\nSecrets written to {}", secrets.dir.display());
    for name in secrets.names() {
        if let Some(entry) = secrets.get(name) {
            println!("  {name:<24} {:<24} from {}", entry.env, entry.source);
        }
    }
    success!(count = secrets.len(), "secrets materialized");
    Ok(())
}

/// Status command implementation
fn cmd_status_impl(deploy: &LeDeploy, json: bool) -> Result<()> {
    let status = deploy.status()?;
    if json {
        let text = serde_json::to_string_pretty(&status)
            .map_err(|err| DeployError::configuration("status", err))?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{text}").map_err(|err| DeployError::io("status", None, err))?;
        return Ok(());
    }
    print_status(&status);
    Ok(())
}

fn print_status(status: &StatusReport) {
    println!(
        "\nGlobal: {}",
        if status.all_complete { "complete" } else { "incomplete" }
    );
    println!();
    for phase in &status.phases {
        let marker = match phase.state {
            MarkerState::Completed => "done",
            MarkerState::Failed => "FAILED",
            MarkerState::Pending => "pending",
        };
        let reversible = if phase.reversible { "reversible" } else { "irreversible" };
        println!("  {:<20} {marker:<8} {reversible}", phase.name);
    }

    if let Some(run) = &status.last_run {
        println!("\nLast run: {:?}", run.status);
        if let Some(failed) = &run.failed_phase {
            println!("  Failed phase: {failed}");
        }
        if let Some(error) = &run.last_error {
            println!("  Error: {error}");
        }
    }
}

/// Reset command implementation
fn cmd_reset_impl(deploy: &LeDeploy, phase: Option<&str>) -> Result<()> {
    let cleared = deploy.reset(phase)?;
    println!("Cleared markers for: {}", join_or_dash(&cleared));
    Ok(())
}

fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

/// Main entry point for the CLI
pub fn main() -> ExitCode {
    Cli::parse().execute()
}
