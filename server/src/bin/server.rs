//! Chat broker binary.

use std::path::PathBuf;

use clap::Parser;
use server::config::Config;
use server::error::ServerError;
use server::{listener, logging, workers};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "server")]
#[command(about = "Multi-threaded TCP chat broker on io_uring")]
struct Args {
    /// IPv4 address to bind
    host: String,

    /// TCP port to listen on
    port: u16,

    /// Path to optional TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    logging::init(&config.logging);

    if let Err(e) = run(&args, &config) {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Args, config: &Config) -> Result<(), ServerError> {
    let (listen_fd, port) = listener::create_listener(&args.host, args.port)?;
    info!(
        host = %args.host,
        port,
        workers = workers::worker_count(config),
        "chat broker listening"
    );

    let (_shutdown, handles) = workers::launch(config, listen_fd)?;

    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ServerError::Setup("reactor thread panicked".to_string())),
        }
    }

    Ok(())
}
