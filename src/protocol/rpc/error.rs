//! Error taxonomy shared by the call engine, the dispatch engine and the
//! transport front-ends.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::portmap::PortmapError;
use crate::protocol::xdr::rpc::auth_stat;

/// Every way an RPC exchange can fail.
///
/// Variants fall into four groups: transport failures (`Io`, `Timeout`,
/// `CannotConnect`), framing/decode failures that are never answered with a
/// reply, semantic failures that the peer reported on the wire, and
/// portmapper failures.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc transport: {0}")]
    Io(#[from] io::Error),
    #[error("rpc transport: no answer within {0:?}")]
    Timeout(Duration),
    #[error("cannot connect to RPC server")]
    CannotConnect,

    #[error("rpc record: fragmented messages are not supported")]
    Fragmented,
    #[error("rpc record: length {len} exceeds max {max}")]
    RecordTooLarge { len: usize, max: usize },
    #[error("rpc record: empty record")]
    EmptyRecord,
    #[error("rpc message: malformed header: {0}")]
    MalformedHeader(io::Error),
    #[error("rpc message: unsupported RPC version {0}")]
    UnsupportedRpcVersion(u32),
    #[error("rpc message: call message expected")]
    CallExpected,
    #[error("rpc reply: invalid transaction id (expected {expected}, got {got})")]
    InvalidXid { expected: u32, got: u32 },
    #[error("rpc reply: invalid reply type")]
    InvalidReplyType,
    #[error("rpc reply: cannot decode results: {0}")]
    MalformedResults(io::Error),

    #[error("rpc: program unavailable")]
    ProgUnavail,
    #[error("rpc: program version mismatch (supported {low}..={high})")]
    ProgMismatch { low: u32, high: u32 },
    #[error("rpc: procedure unavailable")]
    ProcUnavail,
    #[error("rpc: server cannot decode arguments")]
    GarbageArgs,
    #[error("rpc: server system error")]
    SystemErr,
    #[error("rpc: RPC version mismatch (supported {low}..={high})")]
    RpcMismatch { low: u32, high: u32 },
    #[error("rpc: authentication error {0:?}")]
    AuthError(auth_stat),

    #[error(transparent)]
    Portmap(#[from] PortmapError),
}

impl RpcError {
    /// Whether the connection that produced this error can no longer be
    /// trusted to stay in sync with the peer.
    pub fn breaks_connection(&self) -> bool {
        !matches!(
            self,
            RpcError::ProgUnavail
                | RpcError::ProgMismatch { .. }
                | RpcError::ProcUnavail
                | RpcError::GarbageArgs
                | RpcError::RpcMismatch { .. }
                | RpcError::AuthError(_)
                | RpcError::Portmap(_)
        )
    }

    /// Whether repeating the call (after a reconnect) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Io(_) | RpcError::Timeout(_) | RpcError::CannotConnect)
    }
}
