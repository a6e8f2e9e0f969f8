//! IPN webhook authentication.
//!
//! The processor signs each callback with HMAC-SHA512 over the JSON body
//! re-serialized with keys sorted at every nesting level, using a shared
//! secret. Verification recomputes that signature and compares in constant
//! time; any missing piece rejects the request before any state is touched.

use boxoffice_core::GatewayError;
use ring::hmac;
use serde_json::Value;

/// Header carrying the hex-encoded HMAC of the request body.
pub const IPN_SIGNATURE_HEADER: &str = "x-nowpayments-sig";

/// Re-serialize with object keys sorted at every level. Array order is
/// part of the payload and is preserved.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = serde_json::Map::new();
            for (key, inner) in entries {
                sorted.insert(key, canonicalize(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

fn canonical_body(raw_body: &[u8]) -> Result<String, GatewayError> {
    let parsed: Value =
        serde_json::from_slice(raw_body).map_err(|_| GatewayError::Unauthorized)?;
    serde_json::to_string(&canonicalize(parsed)).map_err(|_| GatewayError::Unauthorized)
}

/// Compute the hex signature for a raw JSON body. Used by outbound test
/// traffic and local tooling; verification goes through
/// [`verify_ipn_signature`].
pub fn sign_ipn_payload(raw_body: &[u8], secret: &str) -> Result<String, GatewayError> {
    let message = canonical_body(raw_body)?;
    let key = hmac::Key::new(hmac::HMAC_SHA512, secret.as_bytes());
    let tag = hmac::sign(&key, message.as_bytes());
    Ok(hex::encode(tag.as_ref()))
}

/// Verify an inbound callback. Rejects with [`GatewayError::Unauthorized`]
/// on a missing/empty secret or signature, a non-JSON body, malformed hex,
/// or a signature mismatch. The comparison is constant-time.
pub fn verify_ipn_signature(
    raw_body: &[u8],
    provided_signature: &str,
    secret: &str,
) -> Result<(), GatewayError> {
    if secret.is_empty() || provided_signature.is_empty() {
        return Err(GatewayError::Unauthorized);
    }

    let message = canonical_body(raw_body)?;
    let provided = hex::decode(provided_signature).map_err(|_| GatewayError::Unauthorized)?;

    let key = hmac::Key::new(hmac::HMAC_SHA512, secret.as_bytes());
    hmac::verify(&key, message.as_bytes(), &provided).map_err(|_| GatewayError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "ipn-shared-secret";

    #[test]
    fn test_signed_body_verifies() {
        let body = br#"{"payment_id": 42, "payment_status": "finished"}"#;
        let sig = sign_ipn_payload(body, SECRET).unwrap();
        assert!(verify_ipn_signature(body, &sig, SECRET).is_ok());
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a = br#"{"payment_id": 42, "payment_status": "finished", "outcome": {"b": 1, "a": 2}}"#;
        let b = br#"{"outcome": {"a": 2, "b": 1}, "payment_status": "finished", "payment_id": 42}"#;
        let sig = sign_ipn_payload(a, SECRET).unwrap();
        assert!(verify_ipn_signature(b, &sig, SECRET).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let body = br#"{"payment_id": 42, "payment_status": "waiting"}"#;
        let tampered = br#"{"payment_id": 42, "payment_status": "finished"}"#;
        let sig = sign_ipn_payload(body, SECRET).unwrap();
        assert!(verify_ipn_signature(tampered, &sig, SECRET).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = br#"{"payment_id": 42}"#;
        let sig = sign_ipn_payload(body, SECRET).unwrap();
        assert!(verify_ipn_signature(body, &sig, "another-secret").is_err());
    }

    #[test]
    fn test_missing_inputs_rejected() {
        let body = br#"{"payment_id": 42}"#;
        let sig = sign_ipn_payload(body, SECRET).unwrap();
        assert!(verify_ipn_signature(body, "", SECRET).is_err());
        assert!(verify_ipn_signature(body, &sig, "").is_err());
        assert!(verify_ipn_signature(body, "not-hex!", SECRET).is_err());
        assert!(verify_ipn_signature(b"not json", &sig, SECRET).is_err());
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = br#"{"ids": [1, 2, 3]}"#;
        let b = br#"{"ids": [3, 2, 1]}"#;
        let sig = sign_ipn_payload(a, SECRET).unwrap();
        assert!(verify_ipn_signature(b, &sig, SECRET).is_err());
    }
}
