use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use nlscan_core::config::parse_usb_id;
use nlscan_core::transport::list_scanners;
use nlscan_core::{
    ConnectionStatus, NusbTransport, ScannerConfig, SessionManager, StateChange, TracingObserver,
    TriggerOutcome, spawn_observer,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "USB barcode scanner monitor", long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// USB vendor id (hex like 1eab / 0x1EAB, or decimal)
    #[arg(long, global = true, value_parser = parse_usb_id)]
    vid: Option<u16>,

    /// USB product id (hex like 1a06 / 0x1A06, or decimal)
    #[arg(long, global = true, value_parser = parse_usb_id)]
    pid: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and print every scan
    Monitor {
        /// Send a software trigger at this interval (seconds)
        #[arg(long)]
        trigger_every: Option<u64>,

        /// Exit after this many scans
        #[arg(long)]
        count: Option<u64>,
    },
    /// List attached USB devices of the configured vendor
    List {
        /// Show devices of every vendor
        #[arg(long)]
        all: bool,
    },
    /// Write a default config file
    InitConfig {
        /// Destination path
        path: PathBuf,
    },
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<ScannerConfig> {
    let config = match &args.config {
        Some(path) => ScannerConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ScannerConfig::default(),
    };
    Ok(config.with_overrides(args.vid, args.pid))
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    match args.command {
        Command::Monitor {
            trigger_every,
            count,
        } => monitor(config, trigger_every.map(Duration::from_secs), count),
        Command::List { all } => list(&config, all),
        Command::InitConfig { path } => {
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            config.save_to_file(&path)?;
            info!(path = %path.display(), "Config written");
            Ok(())
        }
    }
}

fn list(config: &ScannerConfig, all: bool) -> Result<()> {
    let vendor = (!all).then_some(config.device.vendor_id);
    let devices = list_scanners(vendor)?;

    if devices.is_empty() {
        warn!("No matching devices");
    }
    for d in devices {
        println!(
            "{:04X}:{:04X}  {}  {}  {}",
            d.vendor_id,
            d.product_id,
            d.manufacturer.as_deref().unwrap_or("-"),
            d.product.as_deref().unwrap_or("-"),
            d.serial_number.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn monitor(config: ScannerConfig, mut trigger_every: Option<Duration>, count: Option<u64>) -> Result<()> {
    info!("Starting nlscan monitor (nusb backend)...");

    let transport = NusbTransport::new(config.device.clone())?;
    let manager = SessionManager::new(transport, config.decode.clone());

    let _logger = spawn_observer(manager.subscribe(), Arc::new(TracingObserver))?;
    let updates = manager.subscribe();

    if !manager.connect() {
        let reason = manager
            .last_error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".into());
        bail!("Could not connect: {}", reason);
    }

    let poll = Duration::from_millis(250);
    let mut last_trigger = Instant::now();
    let mut received = 0u64;

    loop {
        if let Some(interval) = trigger_every
            && last_trigger.elapsed() >= interval
        {
            if manager.trigger_scan() == TriggerOutcome::Unsupported {
                warn!("Device has no software trigger, disabling");
                trigger_every = None;
            }
            last_trigger = Instant::now();
        }

        let Some(snapshot) = updates.recv_timeout(poll) else {
            continue;
        };

        match snapshot.change {
            StateChange::Scan => {
                if let Some(scan) = &snapshot.latest_scan {
                    println!("{}", scan.text());
                    received += 1;
                    if count.is_some_and(|n| received >= n) {
                        break;
                    }
                }
            }
            StateChange::Status {
                to: ConnectionStatus::Disconnected,
                ..
            } => {
                warn!("Scanner went away");
                break;
            }
            _ => {}
        }
    }

    manager.disconnect();
    info!(scans = received, "Monitor finished");
    Ok(())
}
