/// RPC operations issued over the node message stream.
///
/// Each kind owns one request field and one response field of the stream
/// envelope; the names are the camelCase oneof member names kaspad uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Confirmed balance of a single address.
    GetBalanceByAddress,
    /// Node version, network and sync status.
    GetServerInfo,
}

impl RequestKind {
    pub fn request_field(self) -> &'static str {
        match self {
            Self::GetBalanceByAddress => "getBalanceByAddressRequest",
            Self::GetServerInfo => "getServerInfoRequest",
        }
    }

    pub fn response_field(self) -> &'static str {
        match self {
            Self::GetBalanceByAddress => "getBalanceByAddressResponse",
            Self::GetServerInfo => "getServerInfoResponse",
        }
    }

    pub fn from_request_field(field: &str) -> Option<Self> {
        match field {
            "getBalanceByAddressRequest" => Some(Self::GetBalanceByAddress),
            "getServerInfoRequest" => Some(Self::GetServerInfo),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.request_field())
    }
}
