//! sunrpc - an ONC RPC version 2 (RFC 5531) engine in Rust
//!
//! This library lets an application expose RPC programs over TCP and UDP and
//! call RPC programs served elsewhere, registering and resolving services
//! through the PORTMAP version 2 protocol.
//!
//! ## Main Components
//!
//! - `protocol::xdr`: XDR (RFC 4506) encoding of primitives and of the RPC
//!   and PORTMAP message types.
//!
//! - `protocol::rpc`: record marking, the server-side dispatch engine
//!   ([`RpcServer`]) and the client-side call engine ([`RpcClient`]).
//!
//! - `protocol::portmap`: portmapper client, registration helpers and an
//!   in-process portmapper.
//!
//! - `tcp` / `udp`: transport front-ends feeding records to an [`RpcServer`].
//!
//! ## Standards Compliance
//!
//! - RFC 5531: RPC: Remote Procedure Call Protocol Specification Version 2
//! - RFC 4506: XDR: External Data Representation Standard
//! - RFC 1833: Binding Protocols for ONC RPC Version 2
//!
//! ## Usage
//!
//! Create an [`RpcServer`] for a program and version, register procedures
//! with [`RpcServer::register`] and serve it with [`RpcServer::serve_tcp`] or
//! [`RpcServer::serve_udp`]. Call it with an [`RpcClient`].

pub mod protocol;
pub mod tcp;
pub mod udp;

pub use protocol::portmap::{PortmapClient, PortmapError, Registry};
pub use protocol::rpc::{ClientConfig, RpcClient, RpcError, RpcServer, TransportPreference};
pub use protocol::xdr;
