use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::network::create_udp_listen;
use crate::IngestError;

pub mod reassembly;

pub use reassembly::MessageReassembler;

/// How long a receive may block before the loop checks for shutdown again.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_DATAGRAM_LEN: usize = 65536;

/// One UDP datagram as it came off the socket.
#[derive(Debug, Clone, PartialEq)]
pub struct Datagram {
    pub data: Vec<u8>,
    pub from: Option<SocketAddr>,
}

impl Datagram {
    pub fn new(data: Vec<u8>) -> Self {
        Datagram { data, from: None }
    }
}

#[derive(Debug, Default)]
pub struct ReceiveStatistics {
    pub datagrams: u64,
    pub bytes: u64,
    pub timeouts: u64,
}

/// Owns the UDP socket and drains it into the input channel.
pub struct PacketReceiver {
    port: u16,
    sock: UdpSocket,
    statistics: ReceiveStatistics,
}

impl PacketReceiver {
    pub fn bind(port: u16) -> Result<PacketReceiver, IngestError> {
        let sock = create_udp_listen(port).map_err(|e| IngestError::Socket(port, e))?;
        let port = sock.local_addr().map(|a| a.port()).unwrap_or(port);
        log::info!("Listening for time series on UDP port {}", port);

        Ok(PacketReceiver {
            port,
            sock,
            statistics: ReceiveStatistics::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.sock.local_addr()
    }

    /// Turn one receive result into a datagram to forward. Transient errors
    /// and empty datagrams yield nothing; any other error ends the receiver.
    fn on_receive(
        &mut self,
        r: io::Result<(usize, SocketAddr)>,
        buf: &[u8],
    ) -> Result<Option<Datagram>, IngestError> {
        match r {
            Ok((0, _)) => Ok(None),
            Ok((len, from)) => {
                self.statistics.datagrams += 1;
                self.statistics.bytes += len as u64;
                Ok(Some(Datagram {
                    data: buf[..len].to_vec(),
                    from: Some(from),
                }))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                ) =>
            {
                Ok(None)
            }
            Err(e) => {
                log::error!("UDP receive on port {} failed: {}", self.port, e);
                Err(IngestError::Io(e))
            }
        }
    }

    /// Receive until shutdown is requested, the reader goes away, or the
    /// socket fails. Returning drops `tx`, which is how the reader learns
    /// that no more data will come.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<Datagram>,
        shutdown: CancellationToken,
    ) -> Result<(), IngestError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

        log::trace!("Starting socket loop on port {}", self.port);
        let r = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    break Ok(());
                },
                r = timeout(RECEIVE_TIMEOUT, self.sock.recv_from(&mut buf)) => {
                    let Ok(r) = r else {
                        self.statistics.timeouts += 1;
                        continue;
                    };
                    match self.on_receive(r, &buf) {
                        Ok(Some(datagram)) => {
                            if tx.send(datagram).await.is_err() {
                                log::debug!("Reader has gone, stopping receiver");
                                break Ok(());
                            }
                        }
                        Ok(None) => {}
                        Err(e) => break Err(e),
                    }
                },
            }
        };

        log::debug!(
            "Receiver on port {} stopped: {} datagrams, {} bytes, {} timeouts",
            self.port,
            self.statistics.datagrams,
            self.statistics.bytes,
            self.statistics.timeouts
        );
        r
    }
}
