use sha2::{Digest, Sha256};

use crate::constants::{SHARD_BUCKET_HEX_LEN, SHARD_PARTITION_HEX_LEN};

/// SHA-256 of the input bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Canonical form used for hashing a wallet address: trimmed, lowercase.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Coordination-store shard of a wallet address.
///
/// `<hex[0..2]>:<hex[0..24]>` of `sha256(normalize_address(address))`. The
/// first component is a fixed-width partition prefix, the second the bucket
/// id; case and surrounding whitespace of the address do not matter.
pub fn wallet_shard_key(address: &str) -> String {
    let digest = hex::encode(sha256(normalize_address(address).as_bytes()));
    format!(
        "{}:{}",
        &digest[..SHARD_PARTITION_HEX_LEN],
        &digest[..SHARD_BUCKET_HEX_LEN]
    )
}
