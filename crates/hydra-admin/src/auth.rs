//! Bearer-token authentication with Ethereum personal-message signatures
//!
//! A bearer token is `<base64url payload>.<base64url signature>` where the
//! payload is a JSON `{iss, iat, sub}` and the signature is a 65-byte
//! recoverable secp256k1 signature over the personal-message hash of the
//! payload bytes. The guard recovers the signer and compares it against the
//! claimed `sub` and the allowlist.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hydra_core::AdminConfig;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Offset of the recovery byte in a 65-byte Ethereum signature.
const RECOVERY_ID_OFFSET: usize = 64;

/// The signed token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Host the token was issued for; must match the request host
    pub iss: String,
    /// Issuance time, Unix seconds
    pub iat: i64,
    /// Ethereum address of the operator
    pub sub: String,
}

/// Build the unsigned token payload an operator will sign.
pub fn issue_token_payload(host: &str, address: &str) -> Result<String, serde_json::Error> {
    let payload = TokenPayload {
        iss: host.to_string(),
        iat: unix_now(),
        sub: address.to_string(),
    };

    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?))
}

/// Validate an `Authorization` header value against the admin configuration
/// and the request host. Returns the reason for rejection as a static
/// message suitable for the response body.
pub fn verify_bearer(
    auth_header: &str,
    host: &str,
    config: &AdminConfig,
) -> Result<TokenPayload, &'static str> {
    let (payload_bytes, signature_bytes) = parse_authorization_header(auth_header)?;

    let payload: TokenPayload =
        serde_json::from_slice(&payload_bytes).map_err(|_| "invalid bearer token payload")?;

    verify_signature(&payload.sub, &payload_bytes, &signature_bytes)?;

    if payload.iss != host {
        return Err("invalid issuer");
    }

    let now = unix_now();
    if payload.iat > now {
        return Err("token is not yet valid");
    }
    if now - payload.iat > config.max_token_lifespan as i64 {
        return Err("token expired");
    }

    if !config
        .admins
        .iter()
        .any(|admin| admin.eq_ignore_ascii_case(&payload.sub))
    {
        return Err("address is not an admin");
    }

    Ok(payload)
}

fn parse_authorization_header(header: &str) -> Result<(Vec<u8>, Vec<u8>), &'static str> {
    let bearer = header
        .strip_prefix("Bearer ")
        .ok_or("invalid Authorization header format")?;

    let (payload, signature) = bearer
        .split_once('.')
        .ok_or("invalid bearer token format")?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| "undecodable token payload")?;
    let signature_bytes = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| "undecodable token signature")?;

    Ok((payload_bytes, signature_bytes))
}

/// Recover the signer of a personal-message signature and compare it with
/// the claimed address.
fn verify_signature(
    address: &str,
    message: &[u8],
    signature: &[u8],
) -> Result<(), &'static str> {
    if signature.len() != 65 {
        return Err("signature must be 65 bytes");
    }

    let digest = personal_message_hash(message);

    // Yellow-paper V is 27/28; recent signers emit 0/1 directly.
    let mut v = signature[RECOVERY_ID_OFFSET];
    if v == 27 || v == 28 {
        v -= 27;
    }
    let recovery_id = RecoveryId::try_from(v).map_err(|_| "invalid recovery id")?;

    let parsed =
        Signature::from_slice(&signature[..RECOVERY_ID_OFFSET]).map_err(|_| "malformed signature")?;

    let key = VerifyingKey::recover_from_prehash(&digest, &parsed, recovery_id)
        .map_err(|_| "failed to recover public key")?;

    let recovered = address_of(&key);
    if recovered.eq_ignore_ascii_case(address) {
        Ok(())
    } else {
        Err("recovered address does not match claimed address")
    }
}

/// `keccak256("\x19Ethereum Signed Message:\n" + len + message)`
fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()));
    hasher.update(message);
    hasher.finalize().into()
}

/// Hex address of a secp256k1 public key: the low 20 bytes of the keccak256
/// of the uncompressed point without its prefix byte.
fn address_of(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let hash: [u8; 32] = Keccak256::digest(&point.as_bytes()[1..]).into();

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for byte in &hash[12..] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
