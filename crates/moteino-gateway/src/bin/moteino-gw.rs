//! Moteino gateway diagnostics.
//!
//! ```text
//! moteino-gw echo --port /dev/ttyUSB0 --count 1000
//! moteino-gw echo --simulate
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use moteino_gateway::{
    run_echo_test, GatewayConfig, GatewayError, GatewaySession, LoopbackTransport,
    SimulatedGateway,
};

/// Moteino gateway diagnostics
#[derive(Parser, Debug)]
#[command(name = "moteino-gw", author, version, about, long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: GwCommand,
}

#[derive(Subcommand, Debug)]
enum GwCommand {
    /// Run the serial-link echo integrity test
    Echo(EchoArgs),
}

#[derive(Args, Debug)]
struct EchoArgs {
    /// Serial port the gateway is attached to
    #[arg(short, long, required_unless_present = "simulate", conflicts_with = "simulate")]
    port: Option<String>,

    /// Run against an in-process simulated gateway
    #[arg(long)]
    simulate: bool,

    /// Number of echo packets
    #[arg(short = 'n', long, default_value_t = 1000)]
    count: u32,

    /// Seconds to wait for each reply, and for the startup banner
    #[arg(short, long, default_value_t = 5)]
    timeout: u64,
}

fn main() -> ExitCode {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool, GatewayError> {
    let config = match &cli.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };

    match cli.command {
        GwCommand::Echo(args) => echo(config, args),
    }
}

fn echo(config: GatewayConfig, args: EchoArgs) -> Result<bool, GatewayError> {
    let wait = Duration::from_secs(args.timeout);
    let mut session = GatewaySession::new(config);

    // Keeps the simulated device running until the test is done.
    let _simulator = if args.simulate {
        let (host, device) = LoopbackTransport::pair();
        let simulator = SimulatedGateway::spawn(device).map_err(|e| GatewayError::Transport(e.into()))?;
        session.startup_with_transport(Box::new(host))?;
        Some(simulator)
    } else {
        let port = args
            .port
            .as_deref()
            .ok_or_else(|| GatewayError::Config("either --port or --simulate is required".into()))?;
        session.startup(port)?;
        None
    };

    // The gateway announces itself once it has booted.
    match session.wait_for_message(Some(wait)) {
        Ok(packet) => tracing::info!(kind = packet.kind(), "gateway is alive"),
        Err(GatewayError::Timeout) => tracing::warn!("no startup banner; continuing"),
        Err(err) => return Err(err),
    }

    let report = run_echo_test(&session, args.count, wait)?;
    println!(
        "Round trip for {} packets took {:.3} seconds",
        report.sent,
        report.send_duration.as_secs_f64()
    );
    if let Some(n) = report.send_failed_at {
        println!("Failed to transmit packet {}", n);
    }
    for fault in &report.faults {
        println!("{}", fault);
    }
    if report.is_clean() {
        println!("Data integrity confirmed ({} packets)", report.confirmed);
    } else {
        println!("Data corruption detected!");
    }

    session.shutdown();
    Ok(report.is_clean())
}
