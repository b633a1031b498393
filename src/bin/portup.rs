//! PortUP command line
//!
//! Forward local ports through the local UPnP gateway until interrupted,
//! or remove every mapping PortUP has left behind.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use portup::config::Settings;
use portup::display::{MAPPING_FORMATS, print_forwarding};
use portup::gateway::UpnpDiscoverer;
use portup::lifecycle::LifecycleManager;
use portup::mapping::{MappingParser, Protocol};
use portup::update::check_latest;
use portup::{Error, VERSION, init_logging, shutdown};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Forward local ports to remote ports over TCP or UDP", long_about = None)]
#[command(after_help = MAPPING_FORMATS)]
struct Args {
    /// Settings file (JSON); defaults apply when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip the release feed check
    #[arg(long)]
    no_update_check: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Forward TCP ports until interrupted
    Tcp {
        /// Port mappings
        #[arg(required = true)]
        mappings: Vec<String>,
    },
    /// Forward UDP ports until interrupted
    Udp {
        /// Port mappings
        #[arg(required = true)]
        mappings: Vec<String>,
    },
    /// Remove every mapping tagged by PortUP and exit
    Cleanup,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(Error::Parse(_)) = e.downcast_ref::<Error>() {
                eprintln!("{}\n", MAPPING_FORMATS);
            }
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let settings = match &args.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };

    info!("PortUP v{}", VERSION);
    if settings.check_for_updates && !args.no_update_check {
        check_latest(VERSION, settings.update_timeout()).await;
    }

    let discoverer = UpnpDiscoverer::new(settings.discovery_timeout());
    let mut manager = LifecycleManager::new(discoverer, settings.lifecycle());

    let (protocol, tokens) = match args.command {
        Command::Cleanup => {
            manager.run_cleanup().await?;
            return Ok(());
        }
        Command::Tcp { mappings } => (Protocol::TCP, mappings),
        Command::Udp { mappings } => (Protocol::UDP, mappings),
    };

    let (trigger, mut signal) = shutdown::channel();
    shutdown::listen_for_signals(trigger).context("installing signal handlers")?;

    let parser = MappingParser::new();
    manager
        .run_forward(&parser, &tokens, protocol, &mut signal, print_forwarding)
        .await?;

    Ok(())
}
