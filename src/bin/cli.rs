//! Boardlink CLI
//!
//! Bridges a board to a JSON-lines workspace on stdin/stdout, decodes
//! captured traffic offline and manages the config file.

use boardlink_core::cli::{print_exit_codes, CliResult, ExitCodes, JsonLineWorkspace, WorkspaceLine};
use boardlink_core::config::{self, BridgeConfig, LoggingConfig};
use boardlink_core::core::device::{create_adapter, AdapterOptions, DeviceFamily, InboundChunk, MemoryHandler};
use boardlink_core::core::session::BridgeSession;
use boardlink_core::core::transport::{BluetoothConfig, SerialConfig, SerialParity, TransportConfig};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;

/// Boardlink CLI
#[derive(Parser, Debug)]
#[command(
    name = "boardlink",
    version,
    about = "Bridge Arduino, Neobot and Pico boards to a block-programming workspace",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "BOARDLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a bridge session, workspace on stdin/stdout
    Run {
        /// Board family (arduino, arduino-ext, neobot, pico)
        #[arg(short, long)]
        device: Option<DeviceFamily>,

        /// Serial port name (e.g., COM3, /dev/ttyUSB0)
        #[arg(short, long, conflicts_with = "ble")]
        port: Option<String>,

        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,

        /// Parity (none, odd, even)
        #[arg(long)]
        parity: Option<SerialParity>,

        /// BLE device name or address
        #[arg(long)]
        ble: Option<String>,

        /// Poll interval in milliseconds
        #[arg(long)]
        poll_ms: Option<u64>,

        /// DHT temperature and humidity share one subscription
        #[arg(long)]
        exclusive_dht: bool,
    },

    /// Decode captured board bytes and print the readings
    Decode {
        /// Board family
        #[arg(short, long)]
        device: DeviceFamily,

        /// Hex bytes, spaces allowed
        hex: Vec<String>,
    },

    /// Manage the config file
    Config {
        /// Write a default config file
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file
        #[arg(long, requires = "init")]
        force: bool,
    },

    /// List exit codes
    ExitCodes,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => BridgeConfig::load_from(path),
        None => BridgeConfig::load(),
    };
    let bridge_config = match loaded {
        Ok(config) => config,
        Err(e) => return report(CliResult::from(e)),
    };

    let _guard = init_logging(&bridge_config.logging, &cli);
    tracing::debug!("Starting boardlink v{}", boardlink_core::VERSION);

    let result = match &cli.command {
        Commands::Run { .. } => match apply_overrides(bridge_config, &cli.command) {
            Ok(config) => run_bridge(config).await,
            Err(result) => result,
        },
        Commands::Decode { device, hex } => decode(*device, hex).unwrap_or_else(|e| {
            CliResult::error(ExitCodes::PROTOCOL_ERROR, format!("{:#}", e))
        }),
        Commands::Config { init, force } => {
            handle_config(&cli, &bridge_config, *init, *force).unwrap_or_else(|e| {
                CliResult::error(ExitCodes::CONFIG_ERROR, format!("{:#}", e))
            })
        }
        Commands::ExitCodes => {
            print_exit_codes();
            CliResult::success()
        }
    };

    if !cli.quiet || !result.is_success() {
        report(result)
    } else {
        result.to_exit_code()
    }
}

fn report(result: CliResult) -> ExitCode {
    if let Some(message) = result.message() {
        if result.is_success() {
            eprintln!("{}", message);
        } else {
            eprintln!("Error: {}", message);
        }
    }
    result.to_exit_code()
}

fn init_logging(config: &LoggingConfig, cli: &Cli) -> Option<WorkerGuard> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        config.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let json = config.json || cli.log_json;
    let text_layer = (!json).then(|| fmt::layer().with_writer(io::stderr));
    let json_layer = json.then(|| fmt::layer().json().with_writer(io::stderr));

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "boardlink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    guard
}

fn apply_overrides(mut config: BridgeConfig, command: &Commands) -> Result<BridgeConfig, CliResult> {
    let Commands::Run { device, port, baud, parity, ble, poll_ms, exclusive_dht } = command else {
        return Ok(config);
    };

    if let Some(device) = device {
        config.device = *device;
    }

    if let Some(port) = port {
        config.transport = TransportConfig::Serial(SerialConfig::new(port, baud.unwrap_or(115_200)));
    } else if let Some(name) = ble {
        config.transport = match config.transport {
            TransportConfig::Bluetooth(mut ble_config) => {
                ble_config.device = name.clone();
                TransportConfig::Bluetooth(ble_config)
            }
            TransportConfig::Serial(_) => TransportConfig::Bluetooth(BluetoothConfig::new(name)),
        };
    }

    if let TransportConfig::Serial(serial) = &mut config.transport {
        if let Some(baud) = baud {
            serial.baud_rate = *baud;
        }
        if let Some(parity) = parity {
            serial.parity = *parity;
        }
    }

    if let Some(ms) = poll_ms {
        config.poll_interval_ms = *ms;
    }
    if *exclusive_dht {
        config.adapter.exclusive_dht = true;
    }

    config
        .validate()
        .map_err(|e| CliResult::error(ExitCodes::INVALID_ARGS, e.to_string()))?;
    Ok(config)
}

async fn run_bridge(config: BridgeConfig) -> CliResult {
    let mut session = match BridgeSession::from_config(&config) {
        Ok(session) => session,
        Err(e) => return e.into(),
    };

    if let Err(e) = session.connect().await {
        return e.into();
    }
    tracing::info!("Bridging {} on {}", config.device, session.connection_info());

    let mut workspace = JsonLineWorkspace::stdio();
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let result = session.run(&mut workspace, shutdown).await;

    let stats = session.stats();
    tracing::info!(
        "Sent {} bytes in {} frames, received {} bytes",
        stats.bytes_sent,
        stats.packets_sent,
        stats.bytes_received
    );

    if let Err(e) = session.disconnect().await {
        tracing::debug!("Disconnect: {}", e);
    }

    match result {
        Ok(()) => CliResult::success(),
        Err(e) => e.into(),
    }
}

fn decode(device: DeviceFamily, hex_args: &[String]) -> anyhow::Result<CliResult> {
    let text: String = hex_args.concat().split_whitespace().collect();
    let bytes = hex::decode(&text)?;

    let mut adapter = create_adapter(device);
    adapter.init(&AdapterOptions::default());

    if !adapter.validate_local_data(&bytes) {
        return Ok(CliResult::error(
            ExitCodes::PROTOCOL_ERROR,
            format!("{} rejected {}", device, text),
        ));
    }
    adapter.ingest(&InboundChunk::raw(bytes));

    let mut workspace = MemoryHandler::new();
    adapter.export_readings(&mut workspace);

    let sorted: BTreeMap<_, _> = workspace.values().iter().collect();
    let mut stdout = io::stdout().lock();
    for (key, value) in sorted {
        let line = WorkspaceLine {
            key: key.clone(),
            value: value.clone(),
        };
        serde_json::to_writer(&mut stdout, &line)?;
        writeln!(stdout)?;
    }

    Ok(CliResult::success())
}

fn handle_config(cli: &Cli, current: &BridgeConfig, init: bool, force: bool) -> anyhow::Result<CliResult> {
    if !init {
        print!("{}", toml::to_string_pretty(current)?);
        return Ok(CliResult::success());
    }

    let path = match &cli.config {
        Some(path) => path.clone(),
        None => {
            config::init_directories()?;
            config::config_file().ok_or_else(|| anyhow::anyhow!("No config directory on this platform"))?
        }
    };

    if path.exists() && !force {
        return Ok(CliResult::error(
            ExitCodes::CONFIG_ERROR,
            format!("{} exists, use --force to overwrite", path.display()),
        ));
    }

    BridgeConfig::default().save_to(&path)?;
    Ok(CliResult::success_with_message(format!("Wrote {}", path.display())))
}
