//! Commit–reveal primitives: name normalisation, label hashing and the
//! commitment digest the registrar controller expects.
//!
//! The commitment is `keccak256(labelhash ‖ owner ‖ duration ‖ secret)`
//! where every component is a 32-byte ABI word. Only the commitment and
//! `keccak256(secret)` are ever persisted.

use rand::RngCore;
use sha3::{Digest, Keccak256};

use crate::error::GatewayError;

/// Shortest label the registrar accepts.
pub const MIN_LABEL_LEN: usize = 3;

/// Longest label accepted (single DNS label).
pub const MAX_LABEL_LEN: usize = 63;

/// Keccak-256 digest of `data`.
#[must_use]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Lower-case `0x`-prefixed hex encoding.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Validates and lower-cases a label (`[a-z0-9-]`, no leading/trailing hyphen).
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] when the label is malformed.
pub fn normalize_label(raw: &str) -> Result<String, GatewayError> {
    let label = raw.trim().to_ascii_lowercase();
    if label.len() < MIN_LABEL_LEN || label.len() > MAX_LABEL_LEN {
        return Err(GatewayError::InvalidRequest(format!(
            "label must be {MIN_LABEL_LEN}-{MAX_LABEL_LEN} characters"
        )));
    }
    if !label
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(GatewayError::InvalidRequest(format!(
            "label contains unsupported characters: {label}"
        )));
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Err(GatewayError::InvalidRequest(
            "label cannot start or end with a hyphen".to_string(),
        ));
    }
    Ok(label)
}

/// The only TLD served: ownership is read from the `.eth` base registrar.
pub const ETH_TLD: &str = "eth";

/// Normalises a TLD and rejects anything the `.eth` registrar cannot answer
/// for.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] for any TLD other than `eth`.
pub fn normalize_tld(raw: &str) -> Result<String, GatewayError> {
    let tld = raw.trim().trim_start_matches('.').to_ascii_lowercase();
    if tld != ETH_TLD {
        return Err(GatewayError::InvalidRequest(format!(
            "unsupported tld: {raw} (only .{ETH_TLD} names can be registered)"
        )));
    }
    Ok(tld)
}

/// Returns a lower-case `0x` address.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] unless `raw` is `0x` followed by
/// exactly 40 hex digits.
pub fn normalize_address(raw: &str) -> Result<String, GatewayError> {
    normalize_hex(raw, 20, "address")
}

/// Returns a lower-case `0x` transaction hash.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] unless `raw` is a 32-byte hex value.
pub fn normalize_tx_hash(raw: &str) -> Result<String, GatewayError> {
    normalize_hex(raw, 32, "transaction hash")
}

/// Parses a `0x` 32-byte hex value.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] on malformed input.
pub fn parse_bytes32(raw: &str) -> Result<[u8; 32], GatewayError> {
    let normalized = normalize_hex(raw, 32, "bytes32")?;
    let mut out = [0u8; 32];
    hex::decode_to_slice(normalized.trim_start_matches("0x"), &mut out)
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid bytes32: {e}")))?;
    Ok(out)
}

fn normalize_hex(raw: &str, len: usize, what: &str) -> Result<String, GatewayError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| GatewayError::InvalidRequest(format!("{what} must be 0x-prefixed")))?;
    if body.len() != len * 2 || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(GatewayError::InvalidRequest(format!(
            "{what} must be {len} bytes of hex"
        )));
    }
    Ok(format!("0x{}", body.to_ascii_lowercase()))
}

/// `keccak256(label)`, the ENS labelhash and the base registrar token id.
#[must_use]
pub fn labelhash(label: &str) -> [u8; 32] {
    keccak256(label.as_bytes())
}

/// Generates a fresh random 32-byte commitment secret.
#[must_use]
pub fn generate_secret() -> [u8; 32] {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

/// Hash under which the secret is stored.
#[must_use]
pub fn secret_hash(secret: &[u8; 32]) -> String {
    to_hex(&keccak256(secret))
}

/// Computes the commitment for `label` registered to `owner` for
/// `duration_secs` with `secret`.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] if `owner` is not an address.
pub fn compute_commitment(
    label: &str,
    owner: &str,
    duration_secs: u64,
    secret: &[u8; 32],
) -> Result<String, GatewayError> {
    let owner = normalize_address(owner)?;
    let mut owner_bytes = [0u8; 20];
    hex::decode_to_slice(owner.trim_start_matches("0x"), &mut owner_bytes)
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid owner: {e}")))?;

    let mut encoded = Vec::with_capacity(128);
    encoded.extend_from_slice(&labelhash(label));
    encoded.extend_from_slice(&[0u8; 12]);
    encoded.extend_from_slice(&owner_bytes);
    encoded.extend_from_slice(&[0u8; 24]);
    encoded.extend_from_slice(&duration_secs.to_be_bytes());
    encoded.extend_from_slice(secret);

    Ok(to_hex(&keccak256(&encoded)))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    const OWNER: &str = "0x00000000000000000000000000000000000000aa";

    #[test]
    fn keccak_of_empty_input_matches_known_vector() {
        assert_eq!(
            to_hex(&keccak256(b"")),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn labelhash_of_eth_matches_ens_namehash_component() {
        assert_eq!(
            to_hex(&labelhash("eth")),
            "0x4f5b812789fc606be1b3b16908db13fc7a9adf7ca72641f84d75b47069d3d7f0"
        );
    }

    #[test]
    fn commitment_is_deterministic_and_sensitive_to_inputs() {
        let secret = [7u8; 32];
        let a = compute_commitment("alice", OWNER, 31_536_000, &secret);
        let b = compute_commitment("alice", OWNER, 31_536_000, &secret);
        let c = compute_commitment("alice", OWNER, 31_536_001, &secret);
        let (Ok(a), Ok(b), Ok(c)) = (a, b, c) else {
            panic!("commitment should compute");
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 66);
    }

    #[test]
    fn label_rules() {
        assert_eq!(normalize_label(" Alice ").ok().as_deref(), Some("alice"));
        assert!(normalize_label("ab").is_err());
        assert!(normalize_label("-abc").is_err());
        assert!(normalize_label("a_bc").is_err());
    }

    #[test]
    fn only_eth_tld_is_accepted() {
        assert_eq!(normalize_tld(" .ETH ").ok().as_deref(), Some("eth"));
        for other in ["xyz", "com", "e", ""] {
            assert!(normalize_tld(other).is_err(), "{other} accepted");
        }
    }

    #[test]
    fn hex_normalisation() {
        let upper = "0xABCDEF0000000000000000000000000000000000";
        assert_eq!(
            normalize_address(upper).ok().as_deref(),
            Some("0xabcdef0000000000000000000000000000000000")
        );
        assert!(normalize_address("abcdef").is_err());
        assert!(normalize_tx_hash("0x1234").is_err());
        assert!(parse_bytes32(&to_hex(&[1u8; 32])).is_ok());
    }
}
