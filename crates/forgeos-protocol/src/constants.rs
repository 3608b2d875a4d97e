// ============================================================================
// Protocol constants
// ============================================================================

// --- Node RPC stream --------------------------------------------------------

/// Fully-qualified gRPC method of the kaspad bidirectional message stream.
pub const MESSAGE_STREAM_PATH: &str = "/protowire.RPC/MessageStream";

/// Request ids are wrapped back to 1 before reaching this value
/// (2^53 - 1, the largest id every kaspad client library round-trips exactly).
pub const MAX_REQUEST_ID: u64 = 9_007_199_254_740_991;

/// Default per-call RPC timeout.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 5_000;

/// Accepted range for the per-call RPC timeout.
pub const MIN_RPC_TIMEOUT_MS: u64 = 500;
pub const MAX_RPC_TIMEOUT_MS: u64 = 60_000;

/// Default kaspad gRPC target (testnet-10 port).
pub const DEFAULT_RPC_TARGET: &str = "127.0.0.1:16210";

/// Default network identifier.
pub const DEFAULT_NETWORK: &str = "testnet-10";

// --- Units ------------------------------------------------------------------

/// 1 KAS = 100_000_000 sompi.
pub const SOMPI_PER_KAS: u64 = 100_000_000;

/// Number of fractional digits of a KAS amount.
pub const KAS_DECIMALS: usize = 8;

// --- Wallet sharding --------------------------------------------------------

/// Hex characters of the shard-key digest used as the partition prefix.
pub const SHARD_PARTITION_HEX_LEN: usize = 2;

/// Hex characters of the shard-key digest used as the bucket id.
pub const SHARD_BUCKET_HEX_LEN: usize = 24;
