//! Binary entrypoint for the MeshBridge daemon.
//!
//! Configuration comes from the environment (see [`meshbridge::config`]);
//! the CLI only offers a serial port override and verbosity switches, with
//! the usual precedence: CLI args > environment > defaults.
use anyhow::Result;
use clap::Parser;
use log::info;

use meshbridge::bridge::BridgeServer;
use meshbridge::config::Config;

#[derive(Parser)]
#[command(name = "meshbridge")]
#[command(about = "Multiplexing bridge for a MeshCore companion radio")]
#[command(version)]
struct Cli {
    /// Serial device path (overrides SERIAL_PORT)
    #[arg(short, long)]
    port: Option<String>,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.serial.port = port;
    }

    info!("Starting MeshBridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Radio on {} at {} baud",
        config.serial.port, config.serial.baud_rate
    );

    let mut server = BridgeServer::new(config);
    server.run().await
}

fn init_logging(verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let level = match verbosity {
        0 => {
            if Config::debug_env() {
                log::LevelFilter::Debug
            } else {
                log::LevelFilter::Info
            }
        }
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(level);
    builder.format(|fmt, record| {
        writeln!(
            fmt,
            "{} [{}] {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            record.level(),
            record.args()
        )
    });
    let _ = builder.try_init();
}
