use serde::{Deserialize, Serialize};

use crate::message::RequestKind;

/// Outbound stream message: one correlation id plus exactly one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub id: u64,
    pub payload: RequestPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestPayload {
    GetBalanceByAddressRequest { address: String },
    GetServerInfoRequest {},
}

impl RequestPayload {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::GetBalanceByAddressRequest { .. } => RequestKind::GetBalanceByAddress,
            Self::GetServerInfoRequest {} => RequestKind::GetServerInfo,
        }
    }
}

impl RequestEnvelope {
    pub fn new(id: u64, payload: RequestPayload) -> Self {
        Self { id, payload }
    }

    pub fn kind(&self) -> RequestKind {
        self.payload.kind()
    }
}

/// Embedded node-side error (`RPCError` on the wire).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeError {
    pub message: String,
}

/// Balance response. `balance` is kept as the decimal text the node sent so
/// that malformed values surface as errors at the client, not here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub balance: Option<String>,
    pub error: Option<NodeError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfoResponse {
    pub rpc_api_version: Option<u32>,
    pub rpc_api_revision: Option<u32>,
    pub server_version: Option<String>,
    pub network_id: Option<String>,
    pub has_utxo_index: Option<bool>,
    pub is_synced: Option<bool>,
    pub virtual_daa_score: Option<String>,
    pub error: Option<NodeError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponsePayload {
    GetBalanceByAddressResponse(BalanceResponse),
    GetServerInfoResponse(ServerInfoResponse),
}

impl ResponsePayload {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::GetBalanceByAddressResponse(_) => RequestKind::GetBalanceByAddress,
            Self::GetServerInfoResponse(_) => RequestKind::GetServerInfo,
        }
    }

    /// Node error message embedded in the response, if any non-empty one.
    pub fn node_error(&self) -> Option<&str> {
        let err = match self {
            Self::GetBalanceByAddressResponse(r) => r.error.as_ref(),
            Self::GetServerInfoResponse(r) => r.error.as_ref(),
        };
        err.map(|e| e.message.as_str()).filter(|m| !m.is_empty())
    }
}

/// Inbound stream message. A node may answer with a payload for a different
/// operation (or none at all); callers check `payload_for`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub id: u64,
    pub payload: Option<ResponsePayload>,
}

impl ResponseEnvelope {
    pub fn new(id: u64, payload: ResponsePayload) -> Self {
        Self { id, payload: Some(payload) }
    }

    pub fn empty(id: u64) -> Self {
        Self { id, payload: None }
    }

    /// Take the payload if it answers `kind`.
    pub fn payload_for(self, kind: RequestKind) -> Option<ResponsePayload> {
        self.payload.filter(|p| p.kind() == kind)
    }
}
