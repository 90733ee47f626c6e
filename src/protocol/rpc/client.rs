//! Call engine: one client bound to one server address, program and
//! version.
//!
//! The client owns at most one physical connection. It is established
//! lazily by the first call, probed with the reserved procedure 0 and
//! dropped whenever an error leaves it in an unknown state; the next call
//! then reconnects. Calls are not pipelined: the connection lock is held for
//! a whole exchange so every reply can be correlated by its xid.

use std::future::Future;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::protocol::rpc::{
    encode_record, read_record, BufferPool, RpcError, DEFAULT_TIMEOUT, MAX_RPC_RECORD_LENGTH,
    MAX_UDP_DATAGRAM, NULL_PROCEDURE,
};
use crate::protocol::xdr::rpc::{
    accept_body, call_message, opaque_auth, rejected_reply, reply_body, rpc_body, rpc_msg,
};
use crate::protocol::xdr::{deserialize, Deserialize, Serialize};

/// Idle datagram buffers kept by one client.
const MAX_IDLE_BUFFERS: usize = 2;

/// A transport the client can dial.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

/// Order in which transports are tried when (re)connecting.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TransportPreference {
    #[default]
    TcpThenUdp,
    UdpThenTcp,
    TcpOnly,
    UdpOnly,
}

impl TransportPreference {
    pub fn candidates(self) -> &'static [Transport] {
        match self {
            TransportPreference::TcpThenUdp => &[Transport::Tcp, Transport::Udp],
            TransportPreference::UdpThenTcp => &[Transport::Udp, Transport::Tcp],
            TransportPreference::TcpOnly => &[Transport::Tcp],
            TransportPreference::UdpOnly => &[Transport::Udp],
        }
    }
}

/// Client knobs.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub transport: TransportPreference,
    /// Deadline applied to every single connect, send and receive.
    pub timeout: Duration,
    /// Largest reply record accepted over TCP.
    pub max_record_len: usize,
    /// Credential presented with every call. `AUTH_NULL` by default.
    pub credential: opaque_auth,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportPreference::default(),
            timeout: DEFAULT_TIMEOUT,
            max_record_len: MAX_RPC_RECORD_LENGTH,
            credential: opaque_auth::default(),
        }
    }
}

enum Connection {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl Connection {
    fn transport(&self) -> Transport {
        match self {
            Connection::Tcp(_) => Transport::Tcp,
            Connection::Udp(_) => Transport::Udp,
        }
    }
}

#[derive(Default)]
struct State {
    connection: Option<Connection>,
    /// Set by a successful reconnect, which already ran the null probe.
    just_probed: bool,
}

impl State {
    fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            debug!("Dropping {:?} connection", connection.transport());
        }
        self.just_probed = false;
    }
}

/// ONC RPC client for one `(address, program, version)`.
pub struct RpcClient {
    address: String,
    program: u32,
    version: u32,
    config: ClientConfig,
    state: Mutex<State>,
    xid: AtomicU32,
    buffers: BufferPool,
}

impl RpcClient {
    /// Creates a disconnected client. No I/O happens until the first call.
    pub fn new(
        address: impl Into<String>,
        program: u32,
        version: u32,
        config: ClientConfig,
    ) -> Self {
        Self {
            address: address.into(),
            program,
            version,
            config,
            state: Mutex::new(State::default()),
            xid: AtomicU32::new(initial_xid()),
            buffers: BufferPool::new(MAX_UDP_DATAGRAM, MAX_IDLE_BUFFERS),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Transport of the live connection, if any.
    pub async fn transport(&self) -> Option<Transport> {
        self.state.lock().await.connection.as_ref().map(Connection::transport)
    }

    /// Calls `proc` of the client's program and version.
    pub async fn call<A, R>(&self, proc: u32, args: &A) -> Result<R, RpcError>
    where
        A: Serialize + ?Sized,
        R: Deserialize + Default,
    {
        self.call_program(self.program, self.version, proc, args).await
    }

    /// Calls `proc` of an arbitrary program and version over the same
    /// connection.
    pub async fn call_program<A, R>(
        &self,
        program: u32,
        version: u32,
        proc: u32,
        args: &A,
    ) -> Result<R, RpcError>
    where
        A: Serialize + ?Sized,
        R: Deserialize + Default,
    {
        let mut state = self.state.lock().await;
        if state.connection.is_none() {
            self.reconnect_locked(&mut state).await?;
        }

        let is_probe = proc == NULL_PROCEDURE && program == self.program && version == self.version;
        if std::mem::take(&mut state.just_probed) && is_probe {
            trace!("Null call answered by the reconnect probe");
            return Ok(R::default());
        }

        let Some(connection) = state.connection.as_mut() else {
            return Err(RpcError::CannotConnect);
        };
        let result = self.exchange(connection, program, version, proc, args).await;
        if let Err(e) = &result {
            if e.breaks_connection() {
                warn!("RPC call {}:{}:{} failed, disconnecting: {}", program, version, proc, e);
                state.disconnect();
            } else {
                debug!("RPC call {}:{}:{} rejected: {}", program, version, proc, e);
            }
        }
        result
    }

    /// Drops the current connection and dials the configured transports in
    /// order until one answers the null procedure.
    pub async fn reconnect(&self) -> Result<(), RpcError> {
        let mut state = self.state.lock().await;
        self.reconnect_locked(&mut state).await
    }

    /// Drops the connection. Calling it on a closed client is a no-op.
    pub async fn close(&self) {
        self.state.lock().await.disconnect();
    }

    async fn reconnect_locked(&self, state: &mut State) -> Result<(), RpcError> {
        state.disconnect();
        for &transport in self.config.transport.candidates() {
            let mut connection = match self.dial(transport).await {
                Ok(connection) => connection,
                Err(e) => {
                    debug!("Cannot dial {} over {:?}: {}", self.address, transport, e);
                    continue;
                }
            };
            let probe: Result<(), RpcError> = self
                .exchange(&mut connection, self.program, self.version, NULL_PROCEDURE, &())
                .await;
            match probe {
                Ok(()) => {
                    info!("Connected to {} over {:?}", self.address, transport);
                    state.connection = Some(connection);
                    state.just_probed = true;
                    return Ok(());
                }
                Err(e) => {
                    warn!("Null probe of {} over {:?} failed: {}", self.address, transport, e);
                }
            }
        }
        Err(RpcError::CannotConnect)
    }

    async fn dial(&self, transport: Transport) -> Result<Connection, RpcError> {
        let timeout = self.config.timeout;
        match transport {
            Transport::Tcp => {
                let stream = deadline(timeout, TcpStream::connect(self.address.as_str())).await?;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Cannot set TCP_NODELAY towards {}: {}", self.address, e);
                }
                Ok(Connection::Tcp(stream))
            }
            Transport::Udp => {
                let peer = deadline(timeout, lookup_host(self.address.as_str()))
                    .await?
                    .next()
                    .ok_or(RpcError::CannotConnect)?;
                let local = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
                let socket = UdpSocket::bind(local).await?;
                socket.connect(peer).await?;
                Ok(Connection::Udp(socket))
            }
        }
    }

    async fn exchange<A, R>(
        &self,
        connection: &mut Connection,
        program: u32,
        version: u32,
        proc: u32,
        args: &A,
    ) -> Result<R, RpcError>
    where
        A: Serialize + ?Sized,
        R: Deserialize + Default,
    {
        let xid = self.xid.fetch_add(1, Ordering::Relaxed);
        let mut request = Vec::new();
        call_message(xid, program, version, proc, self.config.credential.clone())
            .serialize(&mut request)?;
        args.serialize(&mut request)?;
        trace!("Calling {}:{}:{} xid {} ({} bytes)", program, version, proc, xid, request.len());

        let timeout = self.config.timeout;
        match connection {
            Connection::Tcp(stream) => {
                let record = encode_record(&request)?;
                deadline(timeout, stream.write_all(&record)).await?;
                let max_len = self.config.max_record_len;
                let reply = deadline(timeout, read_record(stream, max_len)).await?;
                decode_reply(xid, &reply)
            }
            Connection::Udp(socket) => {
                if request.len() > MAX_UDP_DATAGRAM {
                    return Err(RpcError::RecordTooLarge {
                        len: request.len(),
                        max: MAX_UDP_DATAGRAM,
                    });
                }
                deadline(timeout, socket.send(&request)).await?;
                let mut buf = self.buffers.acquire();
                let len = deadline(timeout, socket.recv(&mut buf)).await?;
                decode_reply(xid, &buf[..len])
            }
        }
    }
}

/// Decodes a reply record for the call identified by `expected_xid` into
/// its results, mapping every non-success status to its [`RpcError`].
pub fn decode_reply<R>(expected_xid: u32, record: &[u8]) -> Result<R, RpcError>
where
    R: Deserialize + Default,
{
    let mut input = Cursor::new(record);
    let msg = deserialize::<rpc_msg>(&mut input).map_err(RpcError::MalformedHeader)?;
    if msg.xid != expected_xid {
        return Err(RpcError::InvalidXid { expected: expected_xid, got: msg.xid });
    }
    let reply = match msg.body {
        rpc_body::REPLY(reply) => reply,
        rpc_body::CALL(_) => return Err(RpcError::InvalidReplyType),
    };

    match reply {
        reply_body::MSG_DENIED(rejected_reply::RPC_MISMATCH(info)) => {
            Err(RpcError::RpcMismatch { low: info.low, high: info.high })
        }
        reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(stat)) => Err(RpcError::AuthError(stat)),
        reply_body::MSG_ACCEPTED(accepted) => match accepted.reply_data {
            accept_body::SUCCESS => {
                deserialize::<R>(&mut input).map_err(RpcError::MalformedResults)
            }
            accept_body::PROG_UNAVAIL => Err(RpcError::ProgUnavail),
            accept_body::PROG_MISMATCH(info) => {
                Err(RpcError::ProgMismatch { low: info.low, high: info.high })
            }
            accept_body::PROC_UNAVAIL => Err(RpcError::ProcUnavail),
            accept_body::GARBAGE_ARGS => Err(RpcError::GarbageArgs),
            accept_body::SYSTEM_ERR => Err(RpcError::SystemErr),
        },
    }
}

/// Runs one network operation under `timeout`.
async fn deadline<T, E, F>(timeout: Duration, operation: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, E>>,
    RpcError: From<E>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result.map_err(RpcError::from),
        Err(_) => Err(RpcError::Timeout(timeout)),
    }
}

fn initial_xid() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.subsec_nanos()).unwrap_or_default()
}
