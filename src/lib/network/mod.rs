use socket2::{Domain, Protocol, Type};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};
use tokio::net::UdpSocket;

// Time series arrive in bursts; give the kernel room to queue them.
const RECV_BUFFER_SIZE: usize = 8 * 1024 * 1024;

pub fn new_socket() -> io::Result<socket2::Socket> {
    let socket = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    // tokio needs it non-blocking. No SO_REUSEADDR: a busy port must fail the bind.
    socket.set_nonblocking(true)?;

    Ok(socket)
}

/// Bind a UDP socket on all interfaces at `port`. Port 0 picks a free port.
pub fn create_udp_listen(port: u16) -> io::Result<UdpSocket> {
    let socket: socket2::Socket = new_socket()?;

    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
        log::warn!("Cannot set UDP receive buffer to {}: {}", RECV_BUFFER_SIZE, e);
    }

    let socketaddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    socket.bind(&socket2::SockAddr::from(socketaddr))?;
    log::trace!("Binding socket to {}", socketaddr);

    let socket = UdpSocket::from_std(socket.into())?;
    Ok(socket)
}
