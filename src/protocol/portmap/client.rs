use async_trait::async_trait;
use tracing::debug;

use super::{PortmapError, Registry};
use crate::protocol::rpc::{ClientConfig, RpcClient};
use crate::protocol::xdr::portmap::{mapping, pmaplist, PortmapProgram, PROGRAM, VERSION};

/// Network client of a PORTMAP version 2 service.
pub struct PortmapClient {
    client: RpcClient,
}

impl PortmapClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_config(address, ClientConfig::default())
    }

    pub fn with_config(address: impl Into<String>, config: ClientConfig) -> Self {
        Self { client: RpcClient::new(address, PROGRAM, VERSION, config) }
    }

    /// Pings the portmapper.
    pub async fn null(&self) -> Result<(), PortmapError> {
        Ok(self.client.call(PortmapProgram::PMAPPROC_NULL.into(), &()).await?)
    }

    /// Lists every mapping known to the portmapper.
    pub async fn dump(&self) -> Result<Vec<mapping>, PortmapError> {
        let list: pmaplist = self.client.call(PortmapProgram::PMAPPROC_DUMP.into(), &()).await?;
        Ok(list.0)
    }

    pub async fn close(&self) {
        self.client.close().await;
    }
}

#[async_trait]
impl Registry for PortmapClient {
    async fn available(&self) -> bool {
        match self.null().await {
            Ok(()) => true,
            Err(e) => {
                debug!("Portmapper at {} unavailable: {}", self.client.address(), e);
                false
            }
        }
    }

    async fn get_port(
        &self,
        program: u32,
        version: u32,
        protocol: u32,
    ) -> Result<u32, PortmapError> {
        let query = mapping { prog: program, vers: version, prot: protocol, port: 0 };
        Ok(self.client.call(PortmapProgram::PMAPPROC_GETPORT.into(), &query).await?)
    }

    async fn set(&self, mapping: &mapping) -> Result<bool, PortmapError> {
        Ok(self.client.call(PortmapProgram::PMAPPROC_SET.into(), mapping).await?)
    }

    async fn unset(&self, program: u32, version: u32) -> Result<bool, PortmapError> {
        let query = mapping { prog: program, vers: version, prot: 0, port: 0 };
        Ok(self.client.call(PortmapProgram::PMAPPROC_UNSET.into(), &query).await?)
    }
}
