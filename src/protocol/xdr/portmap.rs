//! Portmap protocol (RFC 1833, version 2) data structures.
//!
//! Portmap (also known as Portmapper or rpcbind) is a service that maps RPC
//! program numbers to network port numbers. Servers advertise themselves
//! through it and clients use it to locate the port of a specific service.

// Keep RFC naming conventions
#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use super::*;

/// Represents a mapping between an RPC program and a network port.
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct mapping {
    /// The RPC program number
    pub prog: u32,
    /// The RPC program version number
    pub vers: u32,
    /// The transport protocol (TCP or UDP, see IPPROTO_* constants)
    pub prot: u32,
    /// The port number where the service is listening
    pub port: u32,
}
DeserializeStruct!(mapping, prog, vers, prot, port);
SerializeStruct!(mapping, prog, vers, prot, port);

/// Result of `PMAPPROC_DUMP`: the registry contents.
///
/// On the wire this is the `pmaplist` linked list, i.e. a chain of
/// optional-data entries terminated by FALSE.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct pmaplist(pub Vec<mapping>);

impl Serialize for pmaplist {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        for map in &self.0 {
            true.serialize(dest)?;
            map.serialize(dest)?;
        }
        false.serialize(dest)
    }
}

impl Deserialize for pmaplist {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.0.clear();
        while deserialize::<bool>(src)? {
            self.0.push(deserialize(src)?);
        }
        Ok(())
    }
}

/// Protocol number for TCP/IP
pub const IPPROTO_TCP: u32 = 6;
/// Protocol number for UDP/IP
pub const IPPROTO_UDP: u32 = 17;
/// Portmap RPC program number
pub const PROGRAM: u32 = 100000;
/// Portmap RPC version number
pub const VERSION: u32 = 2;

/// Procedure numbers for the Portmap RPC service.
#[allow(non_camel_case_types)]
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum PortmapProgram {
    /// Null procedure for service availability testing
    PMAPPROC_NULL = 0,
    /// Register a new program-to-port mapping
    PMAPPROC_SET = 1,
    /// Remove a program-to-port mapping
    PMAPPROC_UNSET = 2,
    /// Look up the port for a program
    PMAPPROC_GETPORT = 3,
    /// List all registered program-to-port mappings
    PMAPPROC_DUMP = 4,
}

impl From<PortmapProgram> for u32 {
    fn from(proc: PortmapProgram) -> u32 {
        proc as u32
    }
}
