use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use forgeos_protocol::{
    constants::MAX_REQUEST_ID,
    envelope::{BalanceResponse, ServerInfoResponse},
    units::parse_sompi,
    RequestEnvelope, RequestPayload, ResponsePayload,
};

use crate::{
    error::RpcError,
    rpc::{KaspaRpc, NodeInfo},
    transport::{GrpcTransport, StreamTransport, TlsOptions},
};

/// Request/response client for a single kaspad endpoint.
///
/// Every call opens its own stream, writes one envelope and waits for the
/// response carrying the same id. Retries and failover are the pool's job.
pub struct EndpointClient<T = GrpcTransport> {
    transport: T,
    timeout: Duration,
    request_counter: AtomicU64,
}

impl EndpointClient<GrpcTransport> {
    pub fn connect(target: &str, timeout: Duration, tls: &TlsOptions) -> Result<Self, RpcError> {
        Ok(Self::new(GrpcTransport::connect_lazy(target, tls)?, timeout))
    }
}

fn advance_request_id(current: u64) -> u64 {
    let next = current + 1;
    if next > MAX_REQUEST_ID - 1 {
        1
    } else {
        next
    }
}

impl<T: StreamTransport> EndpointClient<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            request_counter: AtomicU64::new(1),
        }
    }

    pub fn target(&self) -> &str {
        self.transport.target()
    }

    fn next_id(&self) -> u64 {
        let previous = self
            .request_counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(advance_request_id(c))
            })
            .unwrap_or_else(|c| c);
        advance_request_id(previous)
    }

    /// Send one request and wait for the payload answering it.
    ///
    /// The stream is dropped on whichever of response, error, end of stream
    /// or timeout comes first.
    pub async fn call(&self, payload: RequestPayload) -> Result<ResponsePayload, RpcError> {
        let request = RequestEnvelope::new(self.next_id(), payload);
        match tokio::time::timeout(self.timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(endpoint = %self.target(), "Kaspa RPC call timed out");
                Err(RpcError::Timeout)
            }
        }
    }

    async fn exchange(&self, request: RequestEnvelope) -> Result<ResponsePayload, RpcError> {
        let id = request.id;
        let kind = request.kind();

        let mut stream = match self.transport.open(request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(endpoint = %self.target(), error = %e, "Kaspa RPC stream failed");
                return Err(e);
            }
        };

        while let Some(item) = stream.next().await {
            let envelope = match item {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::error!(endpoint = %self.target(), error = %e, "Kaspa RPC stream failed");
                    return Err(e);
                }
            };
            if envelope.id != id {
                continue;
            }
            return envelope
                .payload_for(kind)
                .ok_or(RpcError::MissingField(kind.response_field()));
        }

        Err(RpcError::StreamEnded)
    }

    async fn balance_response(&self, address: &str) -> Result<BalanceResponse, RpcError> {
        let payload = self
            .call(RequestPayload::GetBalanceByAddressRequest { address: address.to_owned() })
            .await?;
        if let Some(message) = payload.node_error() {
            return Err(RpcError::Node(message.to_owned()));
        }
        match payload {
            ResponsePayload::GetBalanceByAddressResponse(r) => Ok(r),
            _ => Err(RpcError::MissingField("getBalanceByAddressResponse")),
        }
    }

    async fn server_info_response(&self) -> Result<ServerInfoResponse, RpcError> {
        let payload = self.call(RequestPayload::GetServerInfoRequest {}).await?;
        if let Some(message) = payload.node_error() {
            return Err(RpcError::Node(message.to_owned()));
        }
        match payload {
            ResponsePayload::GetServerInfoResponse(r) => Ok(r),
            _ => Err(RpcError::MissingField("getServerInfoResponse")),
        }
    }
}

#[async_trait]
impl<T: StreamTransport> KaspaRpc for EndpointClient<T> {
    async fn get_balance_by_address(&self, address: &str) -> Result<u64, RpcError> {
        let response = self.balance_response(address).await?;
        match response.balance.as_deref() {
            None => Ok(0),
            Some(raw) => parse_sompi(raw).map_err(|_| RpcError::MalformedBalance),
        }
    }

    async fn get_server_info(&self) -> Result<NodeInfo, RpcError> {
        let r = self.server_info_response().await?;
        let defaults = NodeInfo::default();
        Ok(NodeInfo {
            rpc_api_version: r.rpc_api_version.unwrap_or(defaults.rpc_api_version),
            rpc_api_revision: r.rpc_api_revision.unwrap_or(defaults.rpc_api_revision),
            server_version: r.server_version.unwrap_or(defaults.server_version),
            network_id: r.network_id.unwrap_or(defaults.network_id),
            has_utxo_index: r.has_utxo_index.unwrap_or(false),
            is_synced: r.is_synced.unwrap_or(false),
            virtual_daa_score: r.virtual_daa_score.unwrap_or(defaults.virtual_daa_score),
        })
    }

    fn shutdown(&self) {
        self.transport.close();
    }
}
