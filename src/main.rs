// src/main.rs

use anyhow::Result;
use clap::Parser;
use fuser::MountOption;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "cowfs")]
#[command(author, version, about = "Copy-on-write overlay filesystem with an original view under /.original", long_about = None)]
struct Cli {
    /// Directory holding the live tree and the journal sidecar
    origin: PathBuf,

    /// Where to mount the overlay
    mountpoint: PathBuf,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Unmount automatically when the process exits
    #[arg(long)]
    auto_unmount: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut options = Vec::new();
    if cli.allow_other {
        options.push(MountOption::AllowOther);
    }
    if cli.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }

    info!(
        "mounting overlay of {} at {}",
        cli.origin.display(),
        cli.mountpoint.display()
    );
    cowfs::mount(&cli.origin, &cli.mountpoint, options)?;
    Ok(())
}
