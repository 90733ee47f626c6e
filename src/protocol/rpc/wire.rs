//! RPC record marking over stream transports, RFC 5531 section 11.
//!
//! Every message on a TCP connection is prefixed with a 4-byte big-endian
//! marker: the low 31 bits carry the fragment length and the high bit flags
//! the last fragment of a record. Only single-fragment records are
//! accepted; a marker without the last-fragment flag is a protocol error
//! and the record is never partially consumed.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::protocol::rpc::RpcError;

/// High bit of a record marker.
pub const LAST_FRAGMENT: u32 = 1 << 31;

/// Size of a record marker on the wire.
pub const MARKER_LEN: usize = 4;

/// Packs a fragment size and the last-fragment flag into a marker.
pub fn build_marker(size: u32, is_last: bool) -> u32 {
    let marker = size & !LAST_FRAGMENT;
    if is_last {
        marker | LAST_FRAGMENT
    } else {
        marker
    }
}

/// Splits a marker into the fragment size and the last-fragment flag.
pub fn parse_marker(marker: u32) -> (u32, bool) {
    (marker & !LAST_FRAGMENT, marker & LAST_FRAGMENT != 0)
}

/// Reads exactly one record-marked message from the stream.
///
/// Fails with [`RpcError::Fragmented`] when the marker does not flag the
/// last fragment, with [`RpcError::EmptyRecord`] on a zero length and with
/// [`RpcError::RecordTooLarge`] when the length exceeds `max_len`. In all of
/// these cases the stream is left right after the marker, so the caller
/// must drop the connection.
pub async fn read_record<R>(socket: &mut R, max_len: usize) -> Result<Vec<u8>, RpcError>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0_u8; MARKER_LEN];
    socket.read_exact(&mut header_buf).await?;
    let (size, is_last) = parse_marker(u32::from_be_bytes(header_buf));
    trace!("Reading record length:{}, last:{}", size, is_last);

    if !is_last {
        return Err(RpcError::Fragmented);
    }
    let size = size as usize;
    if size == 0 {
        return Err(RpcError::EmptyRecord);
    }
    if size > max_len {
        return Err(RpcError::RecordTooLarge { len: size, max: max_len });
    }

    let mut record = vec![0_u8; size];
    socket.read_exact(&mut record).await?;
    Ok(record)
}

/// Prepends a last-fragment marker to `payload`.
pub fn encode_record(payload: &[u8]) -> Result<Vec<u8>, RpcError> {
    let size = u32::try_from(payload.len())
        .ok()
        .filter(|size| size & LAST_FRAGMENT == 0)
        .ok_or(RpcError::RecordTooLarge { len: payload.len(), max: !LAST_FRAGMENT as usize })?;

    let mut record = Vec::with_capacity(MARKER_LEN + payload.len());
    record.extend_from_slice(&build_marker(size, true).to_be_bytes());
    record.extend_from_slice(payload);
    Ok(record)
}

/// Writes `payload` as one record.
///
/// Marker and payload leave in a single write: some rpcbind implementations
/// mishandle a record whose marker arrives in a separate segment.
pub async fn write_record<W>(socket: &mut W, payload: &[u8]) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
{
    let record = encode_record(payload)?;
    trace!("Writing record length:{}", payload.len());
    socket.write_all(&record).await?;
    socket.flush().await?;
    Ok(())
}
