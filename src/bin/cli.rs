//! PowerShield CLI - Command-line interface
//!
//! Drives a PowerShield board (or the simulated one) for scripted
//! measurements: probe, raw commands, acquisitions with CSV export.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use powershield_core::cli::{exit_code_description, init_logging, CliResult, ExitCodes, OutputFormat};
use powershield_core::config::{self, AppConfig};
use powershield_core::core::export::write_csv;
use powershield_core::core::protocol::{
    AcqMode, AcqTime, AcquisitionConfig, Command, DataFormat, FuncMode, OutputKind, PowerEnd,
    PowerState, TriggerSource,
};
use powershield_core::core::session::{ConsoleLine, Direction, EngineSettings, Session, SessionEvent};
use powershield_core::core::state_machine::SessionState;
use powershield_core::core::stats::StatsSnapshot;
use powershield_core::core::transport::{list_ports, SerialTransport, SimulatedDevice};
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

/// PowerShield CLI
#[derive(Parser, Debug)]
#[command(
    name = "powershield-cli",
    version,
    about = "Control and record the X-NUCLEO-LPM01A PowerShield current meter",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Serial port (overrides the config file)
    #[arg(short, long, env = "POWERSHIELD_PORT", global = true)]
    port: Option<String>,

    /// Use the built-in simulated board instead of a serial port
    #[arg(long, global = true)]
    simulate: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "POWERSHIELD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Print wire traffic to stderr
    #[arg(long, global = true)]
    trace_wire: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Show USB details
        #[arg(short, long)]
        detailed: bool,
    },
    /// Connect, identify the board and disconnect
    Probe,
    /// Send one shell command, e.g. `send freq 10k`
    Send {
        /// Command words
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        words: Vec<String>,
    },
    /// Configure the board and record an acquisition
    Acquire(AcquireArgs),
    /// Config file management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print the exit code table
    ExitCodes,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a config file with the effective settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Overrides applied on top of the `[acquisition]` config section
#[derive(Args, Debug)]
struct AcquireArgs {
    /// Target supply in mV (1800-3300)
    #[arg(long)]
    voltage: Option<u16>,
    /// Sampling frequency in Hz
    #[arg(long)]
    freq: Option<u32>,
    /// Duration: `inf`, `0`, seconds (`10`) or milliseconds (`1500m`)
    #[arg(long)]
    acq_time: Option<AcqTime>,
    /// Acquisition mode (dyn, stat)
    #[arg(long)]
    acq_mode: Option<AcqMode>,
    /// Function mode (optim, high)
    #[arg(long)]
    func_mode: Option<FuncMode>,
    /// Measured quantity (current, energy)
    #[arg(long)]
    measure: Option<OutputKind>,
    /// Stream encoding (ascii_dec, bin_hexa)
    #[arg(long)]
    data_format: Option<DataFormat>,
    /// Trigger source (sw, d7)
    #[arg(long)]
    trig_src: Option<TriggerSource>,
    /// Trigger delay in ms
    #[arg(long)]
    trig_delay: Option<u32>,
    /// Current threshold in uA
    #[arg(long)]
    curr_thre: Option<u32>,
    /// Target power (auto, on, off)
    #[arg(long)]
    pwr: Option<PowerState>,
    /// Target power after the acquisition (on, off)
    #[arg(long)]
    pwr_end: Option<PowerEnd>,
    /// Write retained samples to this CSV file
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<f64>,
}

impl AcquireArgs {
    fn apply(&self, config: &mut AcquisitionConfig) {
        if let Some(v) = self.voltage {
            config.voltage_mv = v;
        }
        if let Some(v) = self.freq {
            config.frequency_hz = v;
        }
        if let Some(v) = self.acq_time {
            config.acq_time = v;
        }
        if let Some(v) = self.acq_mode {
            config.acq_mode = v;
        }
        if let Some(v) = self.func_mode {
            config.func_mode = v;
        }
        if let Some(v) = self.measure {
            config.output = v;
        }
        if let Some(v) = self.data_format {
            config.format = v;
        }
        if let Some(v) = self.trig_src {
            config.trigger_source = v;
        }
        if let Some(v) = self.trig_delay {
            config.trigger_delay_ms = v;
        }
        if self.curr_thre.is_some() {
            config.current_threshold_ua = self.curr_thre;
        }
        if let Some(v) = self.pwr {
            config.power = v;
        }
        if let Some(v) = self.pwr_end {
            config.power_end = v;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let app_config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => return report(&cli, &CliResult::from(&e)),
    };

    let _guard = match init_logging(&app_config.logging, cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };
    tracing::debug!("Starting {} v{}", powershield_core::NAME, powershield_core::VERSION);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => return report(&cli, &CliResult::from(e)),
    };

    match runtime.block_on(run(&cli, app_config)) {
        Ok(result) => report(&cli, &result),
        Err(e) => report(&cli, &CliResult::from(&e)),
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig, config::ConfigError> {
    match &cli.config {
        Some(path) if path.exists() => AppConfig::load_from(path),
        Some(_) => Ok(AppConfig::default()),
        None => AppConfig::load(),
    }
}

fn report(cli: &Cli, result: &CliResult) -> ExitCode {
    match result {
        CliResult::Success(Some(msg)) if !cli.quiet => eprintln!("{msg}"),
        CliResult::Error(code, msg) => match cli.format {
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({ "error": msg, "code": code, "description": exit_code_description(*code) })
            ),
            OutputFormat::Text => eprintln!("Error: {msg}"),
        },
        CliResult::Success(_) => {}
    }
    result.to_exit_code()
}

async fn run(cli: &Cli, config: AppConfig) -> anyhow::Result<CliResult> {
    match &cli.command {
        Commands::ListPorts { detailed } => show_ports(cli, *detailed),
        Commands::Probe => probe(cli, &config).await,
        Commands::Send { words } => send(cli, &config, &words.join(" ")).await,
        Commands::Acquire(args) => acquire(cli, &config, args).await,
        Commands::Config { action } => config_command(cli, &config, action),
        Commands::ExitCodes => {
            println!("Exit Codes:");
            for code in [0, 1, 2, 3, 4, 6, 7, 8, 9, 10, 11, 13, 14, 127] {
                println!("  {:>3}  {}", code, exit_code_description(code));
            }
            Ok(CliResult::success())
        }
    }
}

fn show_ports(cli: &Cli, detailed: bool) -> anyhow::Result<CliResult> {
    let ports = list_ports()?;

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    let usb = match &p.port_type {
                        serialport::SerialPortType::UsbPort(usb) => serde_json::json!({
                            "vid": format!("{:04x}", usb.vid),
                            "pid": format!("{:04x}", usb.pid),
                            "product": usb.product,
                            "manufacturer": usb.manufacturer,
                        }),
                        _ => serde_json::Value::Null,
                    };
                    serde_json::json!({ "name": p.port_name, "usb": usb })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if ports.is_empty() && !cli.quiet {
                println!("No serial ports found.");
            }
            for port in &ports {
                match (&port.port_type, detailed) {
                    (serialport::SerialPortType::UsbPort(usb), true) => println!(
                        "{}  [{:04x}:{:04x}] {}",
                        port.port_name,
                        usb.vid,
                        usb.pid,
                        usb.product.as_deref().unwrap_or("")
                    ),
                    _ => println!("{}", port.port_name),
                }
            }
        }
    }
    Ok(CliResult::success())
}

fn open_session(cli: &Cli, config: &AppConfig) -> anyhow::Result<Session> {
    let settings: EngineSettings = config.engine.clone();
    let session = if cli.simulate {
        Session::spawn(SimulatedDevice::new().synthesize(), settings)
    } else {
        let serial = config
            .serial
            .serial_config(cli.port.as_deref())
            .ok_or_else(|| anyhow::anyhow!("no serial port given; use --port or set serial.port"))?;
        Session::spawn(SerialTransport::new(serial), settings)
    };

    if cli.trace_wire {
        let mut events = session.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Console(ConsoleLine { direction, text })) => match direction {
                        Direction::Tx => eprintln!(">> {text}"),
                        Direction::Rx => eprintln!("<< {text}"),
                    },
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
    Ok(session)
}

async fn probe(cli: &Cli, config: &AppConfig) -> anyhow::Result<CliResult> {
    let session = open_session(cli, config)?;
    let info = session.connect().await.context("connecting to the board")?;

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
        OutputFormat::Text => {
            println!("Board:      {}", info.identification);
            println!("Firmware:   {}", info.firmware);
            println!("Connection: {}", info.connection);
        }
    }

    session.disconnect().await?;
    session.shutdown().await;
    Ok(CliResult::success())
}

async fn send(cli: &Cli, config: &AppConfig, line: &str) -> anyhow::Result<CliResult> {
    let command: Command = line.parse()?;
    let session = open_session(cli, config)?;
    session.connect().await.context("connecting to the board")?;

    let result = session.command(command.clone()).await;
    // `psrst` already closed the session
    if session.state() != SessionState::Idle {
        session.disconnect().await?;
    }
    session.shutdown().await;

    let ack = result.with_context(|| format!("sending `{command}`"))?;
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ack)?),
        OutputFormat::Text => match &ack.payload {
            Some(payload) => println!("{payload}"),
            None => {
                if !cli.quiet {
                    println!("ack {}", ack.command);
                }
            }
        },
    }
    Ok(CliResult::success())
}

async fn acquire(cli: &Cli, config: &AppConfig, args: &AcquireArgs) -> anyhow::Result<CliResult> {
    let mut acquisition = config.acquisition.clone();
    args.apply(&mut acquisition);
    acquisition.validate()?;

    let session = open_session(cli, config)?;
    let info = session.connect().await.context("connecting to the board")?;
    tracing::info!("Connected to {} ({})", info.identification, info.firmware);
    session.configure(&acquisition).await.context("configuring the acquisition")?;

    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    let mut events = session.subscribe();
    session.start().await.context("starting the acquisition")?;
    if !cli.quiet {
        eprintln!("Acquiring, press Ctrl+C to stop.");
    }

    let deadline = args
        .duration
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| Instant::now() + Duration::from_secs_f64(s));
    let limit = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(limit);

    let mut cancelled = false;
    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                tracing::info!("Interrupted, stopping the acquisition");
                cancelled = true;
                session.stop().await?;
                break;
            }
            () = &mut limit => {
                session.stop().await?;
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::StateChanged { to, .. }) if to != SessionState::Acquiring => break,
                Ok(SessionEvent::Fault(e)) => tracing::warn!("{}", e),
                Ok(SessionEvent::Metadata(meta)) => tracing::debug!("Metadata {:?}: {}", meta.kind, meta.text()),
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::debug!("Skipped {} events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let state = session.state();
    let stats = session.snapshot();
    let samples = session.export_all();
    let evicted = session.store().evicted();

    if let Some(path) = &args.output {
        let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
        write_csv(BufWriter::new(file), &samples, acquisition.output)?;
        tracing::info!("Wrote {} samples to {}", samples.len(), path.display());
    }

    if state != SessionState::Idle {
        session.disconnect().await?;
    }
    session.shutdown().await;

    print_summary(cli, &acquisition, &stats, samples.len(), evicted)?;

    if state == SessionState::Error {
        return Ok(CliResult::error(ExitCodes::PROTOCOL_ERROR, "acquisition ended in the error state"));
    }
    if state == SessionState::Idle {
        return Ok(CliResult::error(ExitCodes::CONNECTION_FAILED, "connection lost during the acquisition"));
    }
    if cancelled {
        return Ok(CliResult::error(ExitCodes::CANCELLED, "acquisition stopped by user"));
    }
    Ok(CliResult::success())
}

fn print_summary(
    cli: &Cli,
    acquisition: &AcquisitionConfig,
    stats: &StatsSnapshot,
    retained: usize,
    evicted: u64,
) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "config": acquisition,
                "stats": stats,
                "retained": retained,
                "evicted": evicted,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            let unit = acquisition.output.unit();
            let show = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.6e} {unit}"));
            println!("Samples:  {} ({} retained, {} evicted)", stats.count, retained, evicted);
            println!("Min:      {}", show(stats.min));
            println!("Max:      {}", show(stats.max));
            println!("Mean:     {}", show(stats.mean));
            println!("Std dev:  {}", show(stats.std_dev));
            println!("Elapsed:  {:.3} s", stats.elapsed.as_secs_f64());
            if let Some(load) = stats.buffer_load {
                println!("Buffer:   {load} %");
            }
        }
    }
    Ok(())
}

fn config_command(cli: &Cli, config: &AppConfig, action: &ConfigAction) -> anyhow::Result<CliResult> {
    match action {
        ConfigAction::Show => {
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
                OutputFormat::Text => print!("{}", config.to_toml()?),
            }
            Ok(CliResult::success())
        }
        ConfigAction::Init { force } => {
            let path = match &cli.config {
                Some(path) => path.clone(),
                None => config::config_path().ok_or(config::ConfigError::NoConfigDir)?,
            };
            if path.exists() && !force {
                return Ok(CliResult::error(
                    ExitCodes::CONFIG_ERROR,
                    format!("{} already exists, use --force to overwrite", path.display()),
                ));
            }
            config.save_to(&path)?;
            Ok(CliResult::success_with_message(format!("Wrote {}", path.display())))
        }
    }
}
