use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tunedeck_cli::{cli, config::PlayConfig, runtime};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tunedeck=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match &args.cmd {
        cli::Command::ListDevices => runtime::list_devices(),
        cli::Command::Probe { paths } => runtime::run_probe(paths),
        cli::Command::Play { paths } => {
            runtime::run_play(PlayConfig::from_args(&args, paths.clone()))
        }
    }
}
