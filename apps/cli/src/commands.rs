//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bundlewright_core::{BundleAssembler, BundlePlan, CommitOutcome};
use bundlewright_shared::{AppConfig, AssemblerConfig, init_config, load_config, load_config_from};
use bundlewright_transform::{CommandTransform, IdentityTransform, TransformGateway};
use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// bundlewright: assemble deployable bundles.
#[derive(Parser)]
#[command(
    name = "bundlewright",
    version,
    about = "Assemble libraries, components, themes and assets into a deployable bundle.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.bundlewright/bundlewright.toml.
    #[arg(long, env = "BUNDLEWRIGHT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Build a bundle from a plan file.
    Build {
        /// Path to the bundle plan (TOML).
        plan: PathBuf,

        /// Output root directory (defaults to `output.root` from the config).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Replace an existing bundle directory.
        #[arg(long)]
        overwrite: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "bundlewright=info",
        1 => "bundlewright=debug",
        _ => "bundlewright=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Build {
            plan,
            out,
            overwrite,
        } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_build(&plan, out.as_deref(), overwrite, &config).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_deref()).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

async fn cmd_build(
    plan_path: &Path,
    out: Option<&Path>,
    overwrite: bool,
    config: &AppConfig,
) -> Result<()> {
    let started = Instant::now();
    let plan = BundlePlan::load(plan_path)?;

    let mut assembler_config = AssemblerConfig::from(config);
    if let Some(out) = out {
        assembler_config.output_root = out.to_path_buf();
    }

    let gateway: Arc<dyn TransformGateway> = if config.transform.has_commands() {
        Arc::new(CommandTransform::from_config(&config.transform))
    } else {
        Arc::new(IdentityTransform)
    };

    info!(
        plan = %plan_path.display(),
        bundle = %plan.bundle_id(),
        gateway = gateway.name(),
        overwrite,
        "building bundle"
    );

    let mut assembler = BundleAssembler::new(plan.bundle_id(), assembler_config, gateway);
    let progress = CliProgress::new();

    progress.phase("Collecting contributions");
    let applied = plan.apply(&assembler).await;
    let result = match applied {
        Ok(()) => {
            progress.phase("Writing bundle");
            assembler.commit(overwrite).await
        }
        Err(e) => Err(e),
    };
    progress.finish();

    match result? {
        CommitOutcome::Committed(report) => {
            println!();
            println!("  Bundle written!");
            println!("  Bundle:    {}", plan.bundle_id());
            println!("  Path:      {}", report.bundle_path.display());
            for file in &report.files {
                println!(
                    "  File:      {} ({} bytes, sha256 {})",
                    file.file_name,
                    file.size_bytes,
                    &file.sha256[..12]
                );
            }
            println!("  Auxiliary: {}", report.auxiliary_entries);
            println!("  Time:      {:.1}s", started.elapsed().as_secs_f64());
            println!();
        }
        CommitOutcome::Skipped { path } => {
            println!();
            println!("  Bundle directory already exists: {}", path.display());
            println!("  Nothing was written. Use --overwrite to replace it.");
            println!();
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid progress template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
