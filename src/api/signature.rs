use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the provider's hex HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-provider-signature";

fn keyed(secret: &str, body: &[u8]) -> Option<HmacSha256> {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(mac)
}

/// Hex HMAC-SHA256 of `body` keyed with `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    keyed(secret, body)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

/// Checks a hex signature in constant time. Hex case is not significant.
pub fn verify(secret: &str, body: &[u8], provided: &str) -> bool {
    let Ok(provided) = hex::decode(provided.trim()) else {
        return false;
    };
    keyed(secret, body).is_some_and(|mac| mac.verify_slice(&provided).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_accepts_own_signature_only() {
        let body = br#"{"id":"evt_1"}"#;
        let signature = sign("secret", body);
        assert_eq!(signature.len(), 64);
        assert!(verify("secret", body, &signature));
        assert!(verify("secret", body, &signature.to_uppercase()));
        assert!(!verify("other", body, &signature));
        assert!(!verify("secret", br#"{"id":"evt_2"}"#, &signature));
        assert!(!verify("secret", body, "deadbeef"));
        assert!(!verify("secret", body, ""));
        assert!(!verify("secret", body, "not hex at all"));
        assert!(!verify("secret", body, &signature[..62]));
    }
}
