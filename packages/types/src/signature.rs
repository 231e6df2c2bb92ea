use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Prefix used in the `X-Signature` header, mirroring the common
/// `sha256=<hex>` convention.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// `hex(HMAC-SHA256(secret, payload))`. The payload must already be in
/// canonical form (see [`crate::to_canonical_json`]).
pub fn sign(secret: &[u8], canonical_payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).unwrap();
    mac.update(canonical_payload);
    const_hex::encode(mac.finalize().into_bytes())
}

/// The full header value for a signed delivery.
pub fn signature_header(secret: &[u8], canonical_payload: &[u8]) -> String {
    format!("{}{}", SIGNATURE_PREFIX, sign(secret, canonical_payload))
}

/// Receiver-side verification, mirroring [`sign`] exactly. Accepts the
/// bare hex or the `sha256=`-prefixed header form. Comparison is
/// constant-time.
pub fn verify(secret: &[u8], canonical_payload: &[u8], signature: &str) -> bool {
    let hex = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);
    let Ok(claimed) = const_hex::decode(hex) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret).unwrap();
    mac.update(canonical_payload);
    let computed = mac.finalize().into_bytes();

    bool::from(computed.as_slice().ct_eq(claimed.as_slice()))
}
