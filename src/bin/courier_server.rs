use std::{error::Error, num::NonZeroUsize, path::PathBuf, sync::mpsc};

use clap::Parser;
use courier::{FileServer, ServerConfig};
use log::info;

#[derive(Debug, Parser)]
#[command(version, about = "Serve a directory over the Courier protocol", long_about = None)]
struct Cli {
    /// Port to listen on
    port: u16,
    /// Path to storage directory
    #[arg(long, default_value = "uploads")]
    storage: PathBuf,
    /// Interface to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Upper bound on concurrently served connections
    #[arg(long)]
    max_workers: Option<NonZeroUsize>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = ServerConfig::default()
        .with_storage_dir(cli.storage)
        .with_bind_host(cli.host)
        .with_max_workers(cli.max_workers.map(NonZeroUsize::get));

    let mut server = FileServer::new(config);
    server.start(cli.port)?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    rx.recv()?;
    info!("interrupt received, shutting down");
    server.stop();
    Ok(())
}
