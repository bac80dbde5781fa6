//! archstrap - main entry point
//!
//! Partitions a block device and bootstraps Arch Linux onto it, either for
//! real or as a dry run that only prints the commands it would execute.

use anyhow::{Context, Result, bail};
use std::path::Path;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use archstrap::cli::{Cli, Commands};
use archstrap::config_file::ProvisionConfig;
use archstrap::engine::{Disk, DiskInfo, listing};
use archstrap::exec::{ExecContext, ExecMode};
use archstrap::process_guard;
use archstrap::provision::Provisioner;

/// Initialize the logger: info by default, `RUST_LOG` overrides.
fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = process_guard::install_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    let cli = Cli::parse_args();
    if let Err(e) = run(cli) {
        error!("{:#}", e);
        eprintln!("✗ {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mode = if cli.dry_run {
        info!("Dry-run mode: no command will be executed");
        ExecMode::Simulate
    } else {
        ExecMode::Live
    };
    let ctx = ExecContext::new(mode);
    let fixture = cli.fixture.as_deref().map(load_fixture).transpose()?;

    match cli.command {
        Commands::Validate { config } => {
            info!("Validating configuration file: {:?}", config);
            let config = ProvisionConfig::load_from_file(&config)?;
            config.validate().context("Configuration validation failed")?;
            println!("✓ Configuration file is valid");
        }
        Commands::Provision { config } => {
            info!("Loading configuration from: {:?}", config);
            let config = ProvisionConfig::load_from_file(&config)?;
            let mut provisioner = Provisioner::new(&config, ctx);
            if let Some(fixture) = fixture {
                provisioner = provisioner.with_fixture(fixture);
            }
            provisioner.run()?;
            println!("✓ Provisioning of {} completed", config.device);
        }
        Commands::Inspect { device } => {
            let disk = Disk::open_read_only(&device, ctx, fixture);
            let info = disk
                .inspect()
                .with_context(|| format!("Failed to inspect {}", device))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Wipe { device, confirm } => {
            if !confirm {
                bail!("Wipe operation requires --confirm flag");
            }
            let disk = Disk::open_read_only(&device, ctx, fixture);
            disk.wipe()
                .with_context(|| format!("Failed to wipe {}", device))?;
            println!("✓ {} wiped", device);
        }
    }
    Ok(())
}

/// Read a recorded `parted --json` listing.
fn load_fixture(path: &Path) -> Result<DiskInfo> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture {:?}", path))?;
    listing::parse_disk_listing(&content)?
        .with_context(|| format!("Fixture {:?} has no 'disk' field", path))
}
