use sha2::{Digest, Sha256};

/// 32-byte digest.
pub type Hash = [u8; 32];

/// SHA-256 of arbitrary data. Used for ILP conditions.
pub fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// Authentication tag for a locally originated route: BLAKE3 keyed with
/// the routing secret over the prefix.
pub fn route_auth(secret: &[u8; 32], prefix: &str) -> Hash {
    *blake3::keyed_hash(secret, prefix.as_bytes()).as_bytes()
}

/// Re-hash an inherited route auth before re-advertising it.
pub fn chain_auth(auth: &Hash) -> Hash {
    sha256(auth)
}

/// Check that `fulfillment` is the preimage of `condition`.
pub fn fulfillment_matches(fulfillment: &[u8; 32], condition: &[u8; 32]) -> bool {
    sha256(fulfillment) == *condition
}
