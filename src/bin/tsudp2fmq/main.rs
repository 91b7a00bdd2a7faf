extern crate tokio;

use clap::Parser;
use env_logger::Env;
use log::info;
use miette::{miette, IntoDiagnostic, Result};
use std::time::Duration;
use tokio_graceful_shutdown::Toplevel;

use tsudp2fmq::config::Params;
use tsudp2fmq::{Cli, Ingest, PACKAGE, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let log_level = args.verbose.log_level_filter();
    env_logger::Builder::from_env(Env::default())
        .filter_level(log_level)
        .init();

    let params = Params::load(&args).map_err(|e| miette!("{}", e))?;
    if args.print_params {
        println!("{}", serde_json::to_string_pretty(&params).into_diagnostic()?);
        return Ok(());
    }

    info!("{} {} loglevel {}", PACKAGE, VERSION, log_level);
    info!(
        "Reading UDP port {}, writing to '{}'",
        params.udp_port,
        params.output_fmq_path.display()
    );

    let ingest = Ingest::open(&params).await.map_err(|e| miette!("{}", e))?;

    Toplevel::new(|s| async move {
        ingest.start(&s);
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_millis(5000))
    .await
    .map_err(Into::into)
}
