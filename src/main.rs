//! CLI Entry Point for pid-bench
//!
//! Provides command-line interface for:
//! - Interactive PID tuning sessions against a controller board
//! - Listing the serial ports the board may be attached to
//!
//! # Usage
//!
//! Tune against the board:
//! ```bash
//! pid-bench run --port /dev/ttyACM0
//! ```
//!
//! Try the tool without hardware:
//! ```bash
//! pid-bench run --dry-run
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pid_bench::config::{BenchConfig, DEFAULT_CONFIG_PATH};
use pid_bench::console::Console;
use pid_bench::link::simulator::spawn_simulated_device;
use pid_bench::link::{serial, LineHandler, Link, SerialLink};
use pid_bench::logging::{self, OutputFormat, TracingConfig};
use pid_bench::session::SessionController;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser)]
#[command(name = "pid-bench")]
#[command(about = "Interactive PID tuning bench for a serial motor controller", long_about = None)]
struct Cli {
    /// Log level, overriding the configuration file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "compact")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the board and start the interactive prompt
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Serial port, overriding the configuration file
        #[arg(long)]
        port: Option<String>,

        /// Baud rate, overriding the configuration file
        #[arg(long)]
        baud: Option<u32>,

        /// Talk to an emulated board instead of a serial port
        #[arg(long)]
        dry_run: bool,
    },

    /// List available serial ports
    Ports,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            port,
            baud,
            dry_run,
        } => {
            let mut config = BenchConfig::load_from(&config)
                .with_context(|| format!("Failed to load {}", config.display()))?;
            if let Some(level) = cli.log_level {
                config.application.log_level = level;
            }
            if let Some(port) = port {
                config.link.port = port;
            }
            if let Some(baud) = baud {
                config.link.baud_rate = baud;
            }
            config.validate()?;

            logging::init(
                TracingConfig::from_config(&config)?
                    .with_format(cli.log_format)
                    .with_ansi(std::io::stdout().is_terminal()),
            )?;

            run(config, dry_run).await
        }
        Commands::Ports => {
            let ports = serial::available_ports()?;
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                println!("{port}");
            }
            Ok(())
        }
    }
}

async fn run(config: BenchConfig, dry_run: bool) -> Result<()> {
    let (link, inbound) = if dry_run {
        let period = Duration::from_millis(config.session.sample_interval_ms);
        SerialLink::new(
            "simulated board",
            spawn_simulated_device(period),
            config.link.line_terminator.clone(),
        )
    } else {
        SerialLink::open(&config.link).await?
    };
    let link = Arc::new(link);
    info!(app = %config.application.name, link = %link.describe(), "Link ready");

    let (info_tx, mut info_rx) = mpsc::unbounded_channel();
    let controller = Arc::new(
        SessionController::new(link.clone(), config.session).with_info_sink(info_tx),
    );
    let handler: Arc<dyn LineHandler> = controller.clone();
    let dispatcher = inbound.spawn_dispatch(handler);

    let printer = tokio::spawn(async move {
        while let Some(text) = info_rx.recv().await {
            println!("{text}");
        }
    });

    let mut console = Console::new(
        controller,
        BufReader::new(tokio::io::stdin()),
        std::io::stdout(),
        config.defaults,
    );
    let result = console.run().await;

    link.close();
    dispatcher.abort();
    printer.abort();
    result.map_err(Into::into)
}
