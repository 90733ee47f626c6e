//! ONC RPC version 2 engine as specified in RFC 5531 (previously RFC 1057).
//!
//! The module is split the way a message travels:
//!
//! - `wire`: record marking for stream transports
//! - `server`: the dispatch engine that validates a call and routes it to a
//!   registered procedure
//! - `procedure`: typed adapters between XDR arguments/results and handlers
//! - `client`: the call engine with transport fallback, reconnect and xid
//!   correlation
//! - `buffer_pool`: reusable datagram buffers
//! - `error`: the error taxonomy shared by all of the above
//!
//! The message layout itself lives in [`crate::xdr::rpc`].

mod buffer_pool;
mod client;
mod error;
mod procedure;
mod server;
mod wire;

use std::time::Duration;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use client::{decode_reply, ClientConfig, RpcClient, Transport, TransportPreference};
pub use error::RpcError;
pub use procedure::{FnProcedure, Procedure, ProcedureError};
pub use server::{AuthHook, Outcome, Reply, RpcServer, NULL_PROCEDURE};
pub use wire::{
    build_marker, encode_record, parse_marker, read_record, write_record, LAST_FRAGMENT,
    MARKER_LEN,
};

/// Largest record accepted on a stream transport by default.
pub const MAX_RPC_RECORD_LENGTH: usize = 32 * 1024;

/// Largest UDP payload over IPv4: 65535 - 8 byte UDP header - 20 byte IP header.
pub const MAX_UDP_DATAGRAM: usize = 65507;

/// Per-operation deadline used when the caller does not pick one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
