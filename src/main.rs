mod cli;
mod config;
mod error;
mod mapping;
mod migrate;
mod model;
mod providers;
mod state;
mod transport;

use anyhow::Result;
use tracing::Level;

use cli::LogFormat;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = cli::parse_args(&args)?;
    setup_logging(cli.verbosity, cli.log_format);
    cli::dispatch(cli.command).await
}

fn setup_logging(verbosity: u8, format: LogFormat) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}
