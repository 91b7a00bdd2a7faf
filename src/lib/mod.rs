extern crate tokio;

use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

pub mod config;
pub mod dispatch;
pub mod input;
pub mod iwrf;
pub mod network;
pub mod output;
pub mod position;
pub mod reader;
pub mod util;

use config::Params;
use input::PacketReceiver;
use output::fmq::Fmq;
use reader::Reader;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PACKAGE: &str = env!("CARGO_PKG_NAME");

#[derive(Parser, Clone, Debug)]
#[command(version, about)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Parameter file (JSON). Defaults to params.json in the user config directory
    #[arg(long)]
    pub params: Option<PathBuf>,

    /// UDP port to listen on, overrides the parameter file
    #[arg(short, long)]
    pub udp_port: Option<u16>,

    /// Output FMQ path, overrides the parameter file
    #[arg(short, long)]
    pub output_fmq_path: Option<PathBuf>,

    /// Print the effective parameters as JSON and exit
    #[arg(long, default_value_t = false)]
    pub print_params: bool,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("I/O operation failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot open UDP socket on port {0}: {1}")]
    Socket(u16, std::io::Error),
    #[error("Invalid parameters: {0}")]
    Config(String),
    #[error("Cannot parse JSON '{0}'")]
    ParseJson(String),
    #[error("Cannot decode packet: {0}")]
    Decode(String),
    #[error("Cannot load calibration {0}")]
    Calibration(String),
    #[error("FMQ '{0}': {1}")]
    Fmq(String, String),
    #[error("Input stream closed")]
    InputClosed,
}

/// Everything that has to succeed before data can flow: the output queue,
/// the calibration override and the socket. Any failure here is fatal.
pub struct Ingest {
    receiver: PacketReceiver,
    reader: Reader<Fmq>,
    queue_size: usize,
}

impl Ingest {
    pub async fn open(params: &Params) -> Result<Ingest, IngestError> {
        let fmq = Fmq::init_read_write(
            &params.output_fmq_path,
            params.output_fmq_nslots,
            params.output_fmq_size,
        )?;
        let reader = Reader::new(params, fmq)?;
        let receiver = PacketReceiver::bind(params.udp_port)?;

        Ok(Ingest {
            receiver,
            reader,
            queue_size: params.input_queue_size,
        })
    }

    pub fn start(self, subsystem: &SubsystemHandle) {
        let (tx, rx) = mpsc::channel(self.queue_size);
        let receiver = self.receiver;
        let reader = self.reader;

        subsystem.start(SubsystemBuilder::new("Receiver", move |s| async move {
            let shutdown = s.create_cancellation_token();
            receiver.run(tx, shutdown).await
        }));
        subsystem.start(SubsystemBuilder::new("Reader", move |s| async move {
            let shutdown = s.create_cancellation_token();
            reader.run(rx, shutdown).await
        }));
    }
}
