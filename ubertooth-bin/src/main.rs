mod hop;
mod info;
mod os_signal;
mod rx;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, eyre};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};
use ubertooth::Ubertooth;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Open one specific Ubertooth, chosen by serial number
    #[arg(short = 'd', long)]
    serial: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Info(info::Cmd),
    Hop(hop::Cmd),
    Rx(rx::Cmd),
}

fn open(serial: Option<&str>) -> color_eyre::Result<Ubertooth> {
    let Some(serial) = serial else {
        return ubertooth::open_ubertooth().wrap_err("Failed to open Ubertooth");
    };
    let devices =
        ubertooth::list_ubertooth_devices().wrap_err("Couldn't list Ubertooth devices")?;
    let chosen = devices
        .into_iter()
        .find(|dev| dev.serial() == Some(serial))
        .ok_or_else(|| eyre!("Couldn't locate Ubertooth serial {}", serial))?;
    chosen.open().wrap_err("Couldn't open selected Ubertooth")
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Cli::parse();

    match args.command {
        Commands::Info(c) => c.cmd(args.serial).await,
        Commands::Hop(c) => c.cmd(),
        Commands::Rx(c) => {
            let ut = open(args.serial.as_deref())?;
            c.cmd(ut).await
        }
    }
}
