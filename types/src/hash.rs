//! Hash helpers used by the codec and address logic.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::TypesError;

/// Double SHA-256, the transaction id hash.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// RIPEMD-160 of SHA-256, the address payload hash.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

/// Hex of a 32-byte hash in the byte order the daemon displays (reversed).
pub fn reversed_hex(hash: &[u8; 32]) -> String {
    let mut bytes = *hash;
    bytes.reverse();
    hex::encode(bytes)
}

/// Inverse of [`reversed_hex`].
pub fn hash_from_reversed_hex(s: &str) -> Result<[u8; 32], TypesError> {
    let mut bytes: [u8; 32] = hex::decode(s)?
        .try_into()
        .map_err(|_| TypesError::InvalidHex(format!("expected 32 bytes: {s}")))?;
    bytes.reverse();
    Ok(bytes)
}
