use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RpcError;

/// Node identity and sync status as reported by `getServerInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub rpc_api_version: u32,
    pub rpc_api_revision: u32,
    pub server_version: String,
    pub network_id: String,
    pub has_utxo_index: bool,
    pub is_synced: bool,
    /// DAA score of the virtual block, as decimal text.
    pub virtual_daa_score: String,
}

impl Default for NodeInfo {
    fn default() -> Self {
        Self {
            rpc_api_version: 0,
            rpc_api_revision: 0,
            server_version: "unknown".to_owned(),
            network_id: "unknown".to_owned(),
            has_utxo_index: false,
            is_synced: false,
            virtual_daa_score: "0".to_owned(),
        }
    }
}

/// Read operations against a Kaspa node, whether a single endpoint or a pool.
#[async_trait]
pub trait KaspaRpc: Send + Sync {
    /// Confirmed balance of `address` in sompi.
    async fn get_balance_by_address(&self, address: &str) -> Result<u64, RpcError>;

    async fn get_server_info(&self) -> Result<NodeInfo, RpcError>;

    /// Release connections. Safe to call more than once.
    fn shutdown(&self) {}
}

#[async_trait]
impl<T: KaspaRpc + ?Sized> KaspaRpc for Arc<T> {
    async fn get_balance_by_address(&self, address: &str) -> Result<u64, RpcError> {
        (**self).get_balance_by_address(address).await
    }

    async fn get_server_info(&self) -> Result<NodeInfo, RpcError> {
        (**self).get_server_info().await
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }
}
