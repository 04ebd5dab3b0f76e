//! Webhook signatures: `sha256=<hex HMAC-SHA256(secret, raw body)>`

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::errors::DeployError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

fn mac(secret: &[u8], body: &[u8]) -> Result<Vec<u8>, DeployError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| DeployError::SignatureError(format!("invalid secret: {}", e)))?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Signature header value for a body
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, DeployError> {
    Ok(format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac(secret, body)?)))
}

/// Check a signature header against the exact raw body, in constant time
pub fn verify_signature(
    secret: &[u8],
    body: &[u8],
    header: Option<&str>,
) -> Result<(), DeployError> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| DeployError::SignatureError("missing signature".to_string()))?;
    let provided = header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| DeployError::SignatureError("unsupported signature format".to_string()))?;
    let provided = hex::decode(provided)
        .map_err(|_| DeployError::SignatureError("malformed signature".to_string()))?;

    let expected = mac(secret, body)?;
    if bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
        Ok(())
    } else {
        Err(DeployError::SignatureError("signature mismatch".to_string()))
    }
}
