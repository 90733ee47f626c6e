//! PORTMAP version 2 (RFC 1833) support.
//!
//! Servers advertise `(program, version, protocol) -> port` through a
//! [`Registry`]. The usual registry is the system portmapper reached over
//! the network with [`PortmapClient`]; [`LocalRegistry`] keeps the table in
//! process and [`PortmapService`] serves such a table to other processes.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::rpc::RpcError;
use crate::protocol::xdr::portmap::mapping;

mod client;
mod service;

pub use client::PortmapClient;
pub use service::{LocalRegistry, PortmapService, PortmapTable};

/// Where the system portmapper listens.
pub const PORTMAPPER_ADDR: &str = "127.0.0.1:111";

#[derive(Debug, Error)]
pub enum PortmapError {
    #[error("portmapper is not available")]
    Unavailable,
    #[error("program {program} version {version} protocol {protocol} already on port {port}")]
    ServiceExists { program: u32, version: u32, protocol: u32, port: u32 },
    #[error("service is not registered")]
    ServiceDoesntExist,
    #[error("portmapper refused the mapping")]
    SetRejected,
    #[error("portmapper call failed: {0}")]
    Rpc(Box<RpcError>),
}

impl From<RpcError> for PortmapError {
    fn from(e: RpcError) -> Self {
        PortmapError::Rpc(Box::new(e))
    }
}

/// A table of program to port mappings.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Whether the registry answers at all.
    async fn available(&self) -> bool;

    /// Port of `(program, version, protocol)`, 0 when there is none.
    async fn get_port(&self, program: u32, version: u32, protocol: u32)
        -> Result<u32, PortmapError>;

    /// Adds a mapping. Returns false when a mapping for the same
    /// `(program, version, protocol)` already exists.
    async fn set(&self, mapping: &mapping) -> Result<bool, PortmapError>;

    /// Removes every mapping of `(program, version)`. Returns false when
    /// there was nothing to remove.
    async fn unset(&self, program: u32, version: u32) -> Result<bool, PortmapError>;
}

static SYSTEM_REGISTRY: Mutex<Option<Arc<dyn Registry>>> = Mutex::new(None);

/// The process-wide registry, by default a [`PortmapClient`] for
/// [`PORTMAPPER_ADDR`] created on first use.
pub fn system_registry() -> Arc<dyn Registry> {
    let mut registry = SYSTEM_REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    registry
        .get_or_insert_with(|| Arc::new(PortmapClient::new(PORTMAPPER_ADDR)) as Arc<dyn Registry>)
        .clone()
}

/// Replaces the process-wide registry. Servers created afterwards pick it
/// up.
pub fn install_system_registry(registry: Arc<dyn Registry>) {
    *SYSTEM_REGISTRY.lock().unwrap_or_else(PoisonError::into_inner) = Some(registry);
}

/// Advertises `port` for `(program, version, protocol)`.
///
/// An existing mapping to the same port is accepted as is, so a restarted
/// server registers cleanly. A mapping to another port means a different
/// instance owns the service.
pub async fn register_service(
    registry: &dyn Registry,
    program: u32,
    version: u32,
    protocol: u32,
    port: u32,
) -> Result<(), PortmapError> {
    if !registry.available().await {
        warn!("Portmapper is not available, cannot register program {}", program);
        return Err(PortmapError::Unavailable);
    }

    match registry.get_port(program, version, protocol).await? {
        0 => {
            let mapping = mapping { prog: program, vers: version, prot: protocol, port };
            if registry.set(&mapping).await? {
                Ok(())
            } else {
                Err(PortmapError::SetRejected)
            }
        }
        existing if existing == port => {
            debug!("Program {} version {} already mapped to port {}", program, version, port);
            Ok(())
        }
        existing => Err(PortmapError::ServiceExists { program, version, protocol, port: existing }),
    }
}

/// Withdraws every mapping of `(program, version)`.
pub async fn deregister_service(
    registry: &dyn Registry,
    program: u32,
    version: u32,
) -> Result<(), PortmapError> {
    if registry.unset(program, version).await? {
        Ok(())
    } else {
        Err(PortmapError::ServiceDoesntExist)
    }
}
