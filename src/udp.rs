//! The UDP module serves an [`RpcServer`] over datagrams.
//!
//! Every datagram carries exactly one call, without a record marker, and the
//! reply goes back to the sender in a single datagram. Datagrams are handled
//! one after another unless concurrent dispatch is enabled, in which case
//! each one gets its own task and replies may leave out of order.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use socket2::SockRef;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::protocol::rpc::{BufferPool, RpcError, RpcServer, MAX_UDP_DATAGRAM};
use crate::protocol::xdr::portmap::IPPROTO_UDP;
use crate::tcp::RpcListener;

const MAX_IDLE_BUFFERS: usize = 4;

/// RPC UDP listener for one [`RpcServer`].
pub struct RpcUdpListener {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    server: Arc<RpcServer>,
    buffers: BufferPool,
    concurrent: bool,
}

impl RpcUdpListener {
    /// Binds `addr` and registers the resulting port with the server's
    /// registry.
    pub async fn bind(addr: &str, server: Arc<RpcServer>) -> Result<RpcUdpListener, RpcError> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        if let Err(e) = SockRef::from(&socket).set_recv_buffer_size(MAX_UDP_DATAGRAM) {
            warn!("Cannot size receive buffer of {:?}: {}", local_addr, e);
        }
        info!("Listening on {:?} (udp)", local_addr);

        server.register_with_portmapper(IPPROTO_UDP, local_addr.port()).await?;
        Ok(RpcUdpListener {
            socket: Arc::new(socket),
            local_addr,
            server,
            buffers: BufferPool::new(MAX_UDP_DATAGRAM, MAX_IDLE_BUFFERS),
            concurrent: false,
        })
    }

    /// Dispatches every datagram on its own task.
    pub fn with_concurrent_dispatch(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// Size of the kernel receive buffer, as reported by the OS.
    pub fn recv_buffer_size(&self) -> io::Result<usize> {
        SockRef::from(self.socket.as_ref()).recv_buffer_size()
    }
}

async fn handle_datagram(
    socket: &UdpSocket,
    server: &RpcServer,
    datagram: &[u8],
    peer: SocketAddr,
) {
    let reply = match server.handle_record(datagram).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!("Dropping datagram from {}: {}", peer, e);
            return;
        }
    };
    if reply.bytes.len() > MAX_UDP_DATAGRAM {
        error!(
            "Reply to {} xid {} does not fit a datagram ({} bytes)",
            peer,
            reply.xid,
            reply.bytes.len()
        );
        return;
    }
    if let Err(e) = socket.send_to(&reply.bytes, peer).await {
        warn!("Cannot send reply to {}: {}", peer, e);
    }
}

#[async_trait]
impl RpcListener for RpcUdpListener {
    fn get_listen_port(&self) -> u16 {
        self.local_addr.port()
    }

    fn get_listen_ip(&self) -> IpAddr {
        self.local_addr.ip()
    }

    async fn handle_forever(&self) -> io::Result<()> {
        loop {
            let mut buf = self.buffers.acquire();
            let received = tokio::select! {
                biased;
                _ = self.server.closed() => {
                    info!("Listener on {:?} closed", self.local_addr);
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buf) => received,
            };
            let (len, peer) = match received {
                Ok(received) => received,
                Err(e) => {
                    warn!("Receive on {:?} failed: {}", self.local_addr, e);
                    continue;
                }
            };
            debug!("Datagram of {} bytes from {}", len, peer);

            if self.concurrent {
                let datagram = buf[..len].to_vec();
                drop(buf);
                let socket = self.socket.clone();
                let server = self.server.clone();
                tokio::spawn(async move {
                    handle_datagram(&socket, &server, &datagram, peer).await;
                });
            } else {
                handle_datagram(&self.socket, &self.server, &buf[..len], peer).await;
            }
        }
    }
}

impl RpcServer {
    /// Binds `addr`, registers with the portmapper and serves datagrams
    /// until [`RpcServer::close`] is called.
    pub async fn serve_udp(self: &Arc<Self>, addr: &str) -> Result<(), RpcError> {
        let listener = RpcUdpListener::bind(addr, self.clone()).await?;
        listener.handle_forever().await?;
        Ok(())
    }
}
