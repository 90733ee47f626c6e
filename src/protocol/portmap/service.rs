//! In-process portmapper: the mapping table, a [`Registry`] over it and an
//! RPC program serving it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use futures::future;
use tracing::{debug, info};

use super::{PortmapError, Registry};
use crate::protocol::rpc::RpcServer;
use crate::protocol::xdr::portmap::{mapping, pmaplist, PortmapProgram, PROGRAM, VERSION};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct PortmapKey {
    prog: u32,
    vers: u32,
    prot: u32,
}

/// `(program, version, protocol) -> port` table with PORTMAP v2 semantics.
#[derive(Debug, Default)]
pub struct PortmapTable {
    table: HashMap<PortmapKey, u32>,
}

impl PortmapTable {
    /// Port of the mapping, 0 when there is none.
    pub fn get_port(&self, prog: u32, vers: u32, prot: u32) -> u32 {
        self.table.get(&PortmapKey { prog, vers, prot }).copied().unwrap_or(0)
    }

    /// Inserts the mapping unless one exists for the same key.
    pub fn set(&mut self, mapping: &mapping) -> bool {
        let key = PortmapKey { prog: mapping.prog, vers: mapping.vers, prot: mapping.prot };
        if self.table.contains_key(&key) {
            return false;
        }
        self.table.insert(key, mapping.port);
        true
    }

    /// Removes the mappings of `(prog, vers)` for every protocol.
    pub fn unset(&mut self, prog: u32, vers: u32) -> bool {
        let before = self.table.len();
        self.table.retain(|key, _| key.prog != prog || key.vers != vers);
        self.table.len() != before
    }

    /// All mappings, ordered by program, version and protocol.
    pub fn dump(&self) -> Vec<mapping> {
        let mut entries: Vec<_> = self.table.iter().collect();
        entries.sort();
        entries
            .into_iter()
            .map(|(key, &port)| mapping { prog: key.prog, vers: key.vers, prot: key.prot, port })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// A [`Registry`] backed by a shared in-memory [`PortmapTable`].
#[derive(Clone, Debug, Default)]
pub struct LocalRegistry {
    table: Arc<RwLock<PortmapTable>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, PortmapTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, PortmapTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Registry for LocalRegistry {
    async fn available(&self) -> bool {
        true
    }

    async fn get_port(
        &self,
        program: u32,
        version: u32,
        protocol: u32,
    ) -> Result<u32, PortmapError> {
        Ok(self.read().get_port(program, version, protocol))
    }

    async fn set(&self, mapping: &mapping) -> Result<bool, PortmapError> {
        Ok(self.write().set(mapping))
    }

    async fn unset(&self, program: u32, version: u32) -> Result<bool, PortmapError> {
        Ok(self.write().unset(program, version))
    }
}

/// PORTMAP version 2 program serving a [`LocalRegistry`].
///
/// Implements `SET`, `UNSET`, `GETPORT` and `DUMP` next to the built-in
/// `NULL`; `CALLIT` answers `PROC_UNAVAIL`. The service registers its own
/// listeners in the table it serves, as rpcbind does.
pub struct PortmapService {
    server: Arc<RpcServer>,
    registry: LocalRegistry,
}

impl Default for PortmapService {
    fn default() -> Self {
        Self::new(LocalRegistry::new())
    }
}

impl PortmapService {
    pub fn new(registry: LocalRegistry) -> Self {
        let server = RpcServer::new(PROGRAM, VERSION);
        server.set_registry(Some(Arc::new(registry.clone())));

        let table = registry.clone();
        server.register_with_name(
            PortmapProgram::PMAPPROC_SET.into(),
            move |m: mapping| {
                let added = table.write().set(&m);
                info!("pmapproc_set {:?} -> {}", m, added);
                future::ready(Ok::<_, anyhow::Error>(added))
            },
            "PMAPPROC_SET",
        );

        let table = registry.clone();
        server.register_with_name(
            PortmapProgram::PMAPPROC_UNSET.into(),
            move |m: mapping| {
                let removed = table.write().unset(m.prog, m.vers);
                info!("pmapproc_unset {}:{} -> {}", m.prog, m.vers, removed);
                future::ready(Ok::<_, anyhow::Error>(removed))
            },
            "PMAPPROC_UNSET",
        );

        let table = registry.clone();
        server.register_with_name(
            PortmapProgram::PMAPPROC_GETPORT.into(),
            move |m: mapping| {
                let port = table.read().get_port(m.prog, m.vers, m.prot);
                debug!("pmapproc_getport({:?}) --> {:?}", m, port);
                future::ready(Ok::<_, anyhow::Error>(port))
            },
            "PMAPPROC_GETPORT",
        );

        let table = registry.clone();
        server.register_with_name(
            PortmapProgram::PMAPPROC_DUMP.into(),
            move |_: ()| future::ready(Ok::<_, anyhow::Error>(pmaplist(table.read().dump()))),
            "PMAPPROC_DUMP",
        );

        Self { server: Arc::new(server), registry }
    }

    /// The dispatch engine, ready to be served with
    /// [`RpcServer::serve_tcp`] or [`RpcServer::serve_udp`].
    pub fn server(&self) -> &Arc<RpcServer> {
        &self.server
    }

    pub fn registry(&self) -> &LocalRegistry {
        &self.registry
    }
}
