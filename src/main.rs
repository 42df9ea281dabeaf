//! Warden command-line frontend.

use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = warden::cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
