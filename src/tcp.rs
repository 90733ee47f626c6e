//! The TCP module serves an [`RpcServer`] over record-marked TCP streams.
//!
//! The listener:
//! - registers the program with the portmapper once the port is known
//! - accepts connections concurrently, one task per connection
//! - reads one record at a time, dispatches it and writes the reply
//! - stops accepting and drops every connection when the server is closed

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::protocol::rpc::{read_record, write_record, RpcError, RpcServer};
use crate::protocol::xdr::portmap::IPPROTO_TCP;

/// Common interface of the transport front-ends.
#[async_trait]
pub trait RpcListener: Send + Sync {
    /// Returns the actual port number on which the server is listening
    ///
    /// This is especially useful when binding to port 0, which allows the OS
    /// to assign any available port.
    fn get_listen_port(&self) -> u16;

    /// Returns the IP address on which the server is listening
    fn get_listen_ip(&self) -> IpAddr;

    /// Serves requests until the server is closed.
    ///
    /// Returns `Ok(())` after [`RpcServer::close`]; an error only when the
    /// underlying socket fails.
    async fn handle_forever(&self) -> io::Result<()>;
}

/// RPC TCP listener accepting client connections for one [`RpcServer`].
pub struct RpcTcpListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    server: Arc<RpcServer>,
}

impl RpcTcpListener {
    /// Binds `addr` ("IP:PORT", port 0 picks a free one) and registers the
    /// resulting port with the server's registry.
    pub async fn bind(addr: &str, server: Arc<RpcServer>) -> Result<RpcTcpListener, RpcError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Listening on {:?} (tcp)", local_addr);

        server.register_with_portmapper(IPPROTO_TCP, local_addr.port()).await?;
        Ok(RpcTcpListener { listener, local_addr, server })
    }
}

/// Serves one accepted connection until the peer hangs up, a record cannot
/// be framed or decoded, or a reply asks for the connection to be dropped.
async fn process_socket(mut socket: TcpStream, server: Arc<RpcServer>) -> anyhow::Result<()> {
    if let Err(e) = socket.set_nodelay(true) {
        debug!("Cannot set TCP_NODELAY: {}", e);
    }
    loop {
        let record = tokio::select! {
            biased;
            _ = server.closed() => return Ok(()),
            record = read_record(&mut socket, server.max_record_len()) => record,
        };
        let record = match record {
            Ok(record) => record,
            Err(RpcError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let reply = server.handle_record(&record).await?;
        write_record(&mut socket, &reply.bytes).await?;
        if reply.closes_connection() {
            debug!("Closing connection after system error, xid {}", reply.xid);
            return Ok(());
        }
    }
}

#[async_trait]
impl RpcListener for RpcTcpListener {
    fn get_listen_port(&self) -> u16 {
        self.local_addr.port()
    }

    fn get_listen_ip(&self) -> IpAddr {
        self.local_addr.ip()
    }

    async fn handle_forever(&self) -> io::Result<()> {
        loop {
            let (socket, peer) = tokio::select! {
                biased;
                _ = self.server.closed() => {
                    info!("Listener on {:?} closed", self.local_addr);
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted?,
            };
            info!("Accepting connection from {}", peer);
            let server = self.server.clone();
            tokio::spawn(async move {
                match process_socket(socket, server).await {
                    Ok(()) => debug!("Connection from {} closed", peer),
                    Err(e) => error!("Connection from {} dropped: {:?}", peer, e),
                }
            });
        }
    }
}

impl RpcServer {
    /// Binds `addr`, registers with the portmapper and serves TCP clients
    /// until [`RpcServer::close`] is called.
    pub async fn serve_tcp(self: &Arc<Self>, addr: &str) -> Result<(), RpcError> {
        let listener = RpcTcpListener::bind(addr, self.clone()).await?;
        listener.handle_forever().await?;
        Ok(())
    }
}
