//! Protocol module implements ONC RPC version 2 and its binding protocol.
//!
//! This module contains three main components:
//!
//! - `xdr`: External Data Representation (XDR) for serialization and deserialization
//!   of data structures according to RFC 4506.
//!
//! - `rpc`: Remote Procedure Call (RPC) protocol implementation as defined in RFC 5531:
//!   record marking, call dispatching on the server side and call correlation on the
//!   client side.
//!
//! - `portmap`: the PORTMAP version 2 protocol (RFC 1833) used by servers to advertise
//!   the ports they listen on and by clients to find them.

pub mod portmap;
pub mod rpc;
pub mod xdr;
