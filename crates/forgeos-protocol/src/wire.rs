//! protowire messages for the kaspad `MessageStream` RPC.
//!
//! Only the members of the `KaspadRequest` / `KaspadResponse` oneofs this
//! backend issues are declared. prost skips unknown tags on decode, so
//! notifications and responses to other operations decode with an empty
//! payload and are ignored by the client.

use crate::envelope::{
    BalanceResponse, NodeError, RequestEnvelope, RequestPayload, ResponseEnvelope,
    ResponsePayload, ServerInfoResponse,
};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KaspadRequest {
    #[prost(uint64, tag = "101")]
    pub id: u64,
    #[prost(oneof = "kaspad_request::Payload", tags = "1077, 1092")]
    pub payload: Option<kaspad_request::Payload>,
}

pub mod kaspad_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1077")]
        GetBalanceByAddressRequest(super::GetBalanceByAddressRequestMessage),
        #[prost(message, tag = "1092")]
        GetServerInfoRequest(super::GetServerInfoRequestMessage),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KaspadResponse {
    #[prost(uint64, tag = "101")]
    pub id: u64,
    #[prost(oneof = "kaspad_response::Payload", tags = "1078, 1093")]
    pub payload: Option<kaspad_response::Payload>,
}

pub mod kaspad_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1078")]
        GetBalanceByAddressResponse(super::GetBalanceByAddressResponseMessage),
        #[prost(message, tag = "1093")]
        GetServerInfoResponse(super::GetServerInfoResponseMessage),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcError {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetBalanceByAddressRequestMessage {
    #[prost(string, tag = "1")]
    pub address: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetBalanceByAddressResponseMessage {
    #[prost(uint64, tag = "1")]
    pub balance: u64,
    #[prost(message, optional, tag = "1000")]
    pub error: Option<RpcError>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetServerInfoRequestMessage {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetServerInfoResponseMessage {
    #[prost(uint32, tag = "1")]
    pub rpc_api_version: u32,
    #[prost(uint32, tag = "2")]
    pub rpc_api_revision: u32,
    #[prost(string, tag = "3")]
    pub server_version: String,
    #[prost(string, tag = "4")]
    pub network_id: String,
    #[prost(bool, tag = "5")]
    pub has_utxo_index: bool,
    #[prost(bool, tag = "6")]
    pub is_synced: bool,
    #[prost(uint64, tag = "7")]
    pub virtual_daa_score: u64,
    #[prost(message, optional, tag = "1000")]
    pub error: Option<RpcError>,
}

// ============================================================================
// Conversions between wire messages and typed envelopes
// ============================================================================

impl From<RequestEnvelope> for KaspadRequest {
    fn from(env: RequestEnvelope) -> Self {
        let payload = match env.payload {
            RequestPayload::GetBalanceByAddressRequest { address } => {
                kaspad_request::Payload::GetBalanceByAddressRequest(
                    GetBalanceByAddressRequestMessage { address },
                )
            }
            RequestPayload::GetServerInfoRequest {} => {
                kaspad_request::Payload::GetServerInfoRequest(GetServerInfoRequestMessage {})
            }
        };
        Self { id: env.id, payload: Some(payload) }
    }
}

impl From<RpcError> for NodeError {
    fn from(e: RpcError) -> Self {
        NodeError { message: e.message }
    }
}

impl From<KaspadResponse> for ResponseEnvelope {
    fn from(msg: KaspadResponse) -> Self {
        let payload = msg.payload.map(|p| match p {
            kaspad_response::Payload::GetBalanceByAddressResponse(r) => {
                ResponsePayload::GetBalanceByAddressResponse(BalanceResponse {
                    balance: Some(r.balance.to_string()),
                    error: r.error.map(NodeError::from),
                })
            }
            kaspad_response::Payload::GetServerInfoResponse(r) => {
                ResponsePayload::GetServerInfoResponse(ServerInfoResponse {
                    rpc_api_version: Some(r.rpc_api_version),
                    rpc_api_revision: Some(r.rpc_api_revision),
                    server_version: Some(r.server_version),
                    network_id: Some(r.network_id),
                    has_utxo_index: Some(r.has_utxo_index),
                    is_synced: Some(r.is_synced),
                    virtual_daa_score: Some(r.virtual_daa_score.to_string()),
                    error: r.error.map(NodeError::from),
                })
            }
        });
        ResponseEnvelope { id: msg.id, payload }
    }
}
