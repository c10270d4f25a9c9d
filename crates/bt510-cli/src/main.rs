//! BT510 command line tools

mod serial;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use bt510_core::{
    record_count, AdvertisementReport, CommanderConfig, DongleConfig, EventLog, SensorEvent,
};
use bt510_dongle::{AtTransport, Commander};

// ----------------------------------------------------------------------------
// Arguments
// ----------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "bt510", about = "Talk to Sentrius BT510 sensors through a BL65x USB dongle")]
struct Cli {
    /// Serial port of the dongle
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value_t = 115_200)]
    baud: u32,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan for advertisements and print decoded sensor events
    Scan {
        /// How long to scan in seconds, 0 for until interrupted
        #[arg(long, default_value_t = 30)]
        duration: u32,

        /// Only report sensors whose name matches
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Print dongle information
    Info,
    /// Connect to the configured sensor and read named attributes
    Get {
        /// Attribute names, e.g. sensorName firmwareVersion
        names: Vec<String>,
    },
    /// Read and decode the sensor's stored event log, then set its clock
    ReadLog,
}

// ----------------------------------------------------------------------------
// Entry Point
// ----------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = load_configuration(&cli)?;
    let (reader, writer) = serial::open(&cli.port, cli.baud)?;
    let transport = AtTransport::start(reader, writer, config);

    info!("initializing dongle on {}", cli.port);
    transport.initialize().await?;

    match cli.command {
        Command::Scan { duration, name } => {
            let result = run_scan(&transport, duration, &name).await;
            transport.stop().await;
            result
        }
        Command::Info => {
            let result = run_info(&transport).await;
            transport.stop().await;
            result
        }
        Command::Get { names } => run_get(transport, names).await,
        Command::ReadLog => run_read_log(transport).await,
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<DongleConfig> {
    match &cli.config {
        Some(path) => {
            info!("loading configuration from {path}");
            DongleConfig::load_from_file(path).context("failed to load configuration")
        }
        None => {
            info!("using default configuration");
            Ok(DongleConfig::default())
        }
    }
}

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// `AD <address> <rssi> "<hex>"` scan line fields.
fn split_scan_line(line: &str) -> Option<(&str, &str, &str)> {
    let mut parts = line.split(' ');
    let _marker = parts.next()?;
    let address = parts.next()?;
    let rssi = parts.next()?;
    let payload = parts.next()?.trim_matches('"');
    Some((address, rssi, payload))
}

async fn run_scan(transport: &AtTransport, duration: u32, name: &str) -> Result<()> {
    transport.scan(duration, name, -128).await?;

    let deadline = Instant::now() + Duration::from_secs(u64::from(duration.max(1)));
    let mut sensors: std::collections::HashMap<String, SensorEvent> =
        std::collections::HashMap::new();

    loop {
        if duration != 0 && Instant::now() >= deadline {
            break;
        }
        let Some(line) = transport.get_scan(Duration::from_secs(10)).await else {
            continue;
        };
        let Some((address, rssi, payload)) = split_scan_line(&line) else {
            info!("unable to split advertisement");
            continue;
        };
        debug!("{address} {rssi} {payload}");

        let report = AdvertisementReport::parse(payload);
        if !report.header_valid {
            info!("ad not valid");
            continue;
        }
        let event = sensors.entry(report.bd_addr.clone()).or_insert_with(|| {
            info!(
                "found new sensor {:?} with BDA {} (hw {})",
                report.name,
                report.bd_addr,
                report.hardware_version()
            );
            SensorEvent::new()
        });
        if event.update(&report) {
            println!(
                "{} {} {:?} epoch={} temp={:.2} batt={:.2} magnet={:?}",
                report.bd_addr,
                report.name,
                event.kind,
                event.epoch,
                event.temperature,
                event.battery_voltage,
                event.magnet_state,
            );
        }
    }

    transport.cancel_scan().await?;
    Ok(())
}

async fn run_info(transport: &AtTransport) -> Result<()> {
    for line in transport.mac_address().await? {
        println!("{line}");
    }
    Ok(())
}

/// Connect to the configured sensor, run `op` over a JSON-RPC commander,
/// then disconnect and shut the transport down.
async fn with_commander<F, Fut>(transport: AtTransport, op: F) -> Result<()>
where
    F: FnOnce(Commander<AtTransport>) -> Fut,
    Fut: std::future::Future<Output = (Commander<AtTransport>, Result<()>)>,
{
    let Some(addr) = transport.config().current_address().map(str::to_string) else {
        transport.stop().await;
        bail!("no sensor address configured; set bd_addrs in the config file");
    };

    let timeout = transport.config().connection_timeout();
    if let Err(err) = transport.connect(&addr, timeout).await {
        transport.stop().await;
        return Err(err).context(format!("unable to connect to {addr}"));
    }

    let commander = Commander::new(transport, CommanderConfig::default());
    let (commander, result) = op(commander).await;

    let transport = commander.into_channel();
    transport.disconnect().await;
    transport.stop().await;
    result
}

async fn run_get(transport: AtTransport, names: Vec<String>) -> Result<()> {
    if names.is_empty() {
        transport.stop().await;
        bail!("no attribute names given");
    }
    with_commander(transport, |commander| async move {
        let mut result = Ok(());
        for name in &names {
            match commander.get_attribute(name).await {
                Ok(value) => println!("{name}: {value}"),
                Err(err) => {
                    warn!("failed to read {name}: {err}");
                    result = Err(err).context(format!("failed to read {name}"));
                    break;
                }
            }
        }
        (commander, result)
    })
    .await
}

async fn run_read_log(transport: AtTransport) -> Result<()> {
    with_commander(transport, |commander| async move {
        let result = read_log(&commander).await;
        (commander, result)
    })
    .await
}

async fn read_log(commander: &Commander<AtTransport>) -> Result<()> {
    // The sensor limits one read to 128 events via its JSON buffer size.
    const EVENTS_PER_READ: u32 = 128;

    let total = commander.prepare_log().await?;
    info!("{total} stored events");

    let mut log = EventLog::new();
    let mut remaining = total;
    while remaining > 0 {
        let (size, data) = commander.read_log(EVENTS_PER_READ).await?;
        let events_read = record_count(size);
        if events_read == 0 {
            break;
        }
        if let Err(err) = log.push_entry(size, &data) {
            warn!("skipping undecodable log chunk: {err}");
        }
        remaining -= events_read as i64;
        // Acking only what was read keeps unread items in the log.
        commander.ack_log(events_read as u32).await?;
    }

    for (index, event) in log.events.iter().enumerate() {
        println!(
            "{:>5}, {:>10}, {:>4}, {:>8}, {:?}",
            index + 1,
            event.timestamp,
            event.salt,
            event.data_string(),
            event.kind(),
        );
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before the epoch")?
        .as_secs();
    commander.set_epoch(now as u32).await?;
    info!("sensor clock set");
    Ok(())
}
