// forgeos-rpc: Kaspa node RPC over the protowire message stream.
// Single-endpoint clients plus a pool that ranks endpoints by health,
// fails over between them and quarantines endpoints that keep failing.

pub mod client;
pub mod error;
pub mod health;
pub mod pool;
pub mod rpc;
pub mod transport;

pub use client::EndpointClient;
pub use error::RpcError;
pub use health::{EndpointHealth, HealthPolicy};
pub use pool::{GrpcPool, PoolConfig, RpcPool};
pub use rpc::{KaspaRpc, NodeInfo};
pub use transport::TlsOptions;
