//! UDP transport to the NibeGW gateway.
//!
//! The gateway pushes every bus frame addressed to the MODBUS40 accessory to
//! the host's listening port and accepts requests on two ports of its own
//! (reads on 9999, writes on 10000 by default).  A single socket bound to the
//! listening address serves both directions.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{info, trace};

use crate::application::engine::Transport;

/// Largest datagram the gateway sends; bus frames are far smaller.
const MAX_DATAGRAM: usize = 1024;

/// Error type for UDP transport set-up.
#[derive(Debug, Error)]
pub enum UdpTransportError {
    /// The UDP socket could not be bound.
    #[error("failed to bind gateway socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// [`Transport`] backed by a tokio UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`UdpTransportError::BindFailed`] if the address is unavailable
    /// (typically another process already listens on the port).
    pub async fn bind(addr: SocketAddr) -> Result<Self, UdpTransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| UdpTransportError::BindFailed { addr, source })?;
        info!("listening for gateway datagrams on UDP {addr}");
        Ok(Self { socket })
    }

    /// Address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, bytes: &[u8], destination: SocketAddr) -> io::Result<()> {
        let sent = self.socket.send_to(bytes, destination).await?;
        trace!(sent, %destination, "datagram sent");
        Ok(())
    }

    async fn recv(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, source) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, source))
    }
}
