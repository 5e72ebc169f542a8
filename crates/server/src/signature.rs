use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use wavetap_core::request::Expiry;

type HmacSha256 = Hmac<Sha256>;

/// Checks expiring `url|exp` HMAC signatures. Without a secret every request passes.
#[derive(Clone, Default)]
pub struct SignatureVerifier {
    secret: Option<Arc<[u8]>>,
}

impl SignatureVerifier {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret: secret
                .filter(|s| !s.is_empty())
                .map(|s| Arc::from(s.as_bytes())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    pub fn verify(
        &self,
        url: Option<&str>,
        expiry: Option<&Expiry>,
        signature: Option<&str>,
    ) -> bool {
        self.verify_at(url, expiry, signature, chrono::Utc::now().timestamp())
    }

    /// [`verify`](Self::verify) against an explicit clock, in unix seconds.
    ///
    /// The MAC covers the expiry text exactly as the client sent it, so
    /// `+N` or `0N` only verify if they were signed in that form.
    pub fn verify_at(
        &self,
        url: Option<&str>,
        expiry: Option<&Expiry>,
        signature: Option<&str>,
        now: i64,
    ) -> bool {
        let Some(secret) = self.secret.as_deref() else {
            return true;
        };
        let (Some(url), Some(expiry), Some(signature)) = (url, expiry, signature) else {
            return false;
        };
        if expiry.unix_secs() < now {
            return false;
        }

        let Ok(supplied) = hex::decode(signature.trim()) else {
            return false;
        };
        let Some(expected) = compute(secret, url, expiry.as_str()) else {
            return false;
        };
        expected.as_slice().ct_eq(supplied.as_slice()).into()
    }

    /// Hex signature for `url` valid until `expiry`. `None` when signing is disabled.
    pub fn sign(&self, url: &str, expiry: i64) -> Option<String> {
        let secret = self.secret.as_deref()?;
        compute(secret, url, &expiry.to_string()).map(hex::encode)
    }
}

fn compute(secret: &[u8], url: &str, expiry: &str) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(url.as_bytes());
    mac.update(b"|");
    mac.update(expiry.as_bytes());
    Some(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://host/a.mp4";
    const NOW: i64 = 1_700_000_000;

    fn exp(unix_secs: i64) -> Option<Expiry> {
        Expiry::parse(&unix_secs.to_string())
    }

    #[test]
    fn disabled_without_secret() {
        let verifier = SignatureVerifier::new(None);
        assert!(!verifier.is_enabled());
        assert!(verifier.verify_at(None, None, None, NOW));
        assert!(verifier.sign(URL, NOW).is_none());

        assert!(!SignatureVerifier::new(Some("")).is_enabled());
    }

    #[test]
    fn valid_signature_is_accepted() {
        let verifier = SignatureVerifier::new(Some("s3cret"));
        let sig = verifier.sign(URL, NOW + 60).unwrap();
        assert!(verifier.verify_at(Some(URL), exp(NOW + 60).as_ref(), Some(&sig), NOW));
        assert!(verifier.verify_at(Some(URL), exp(NOW + 60).as_ref(), Some(&sig.to_uppercase()), NOW));
        // expiring this very second still counts
        assert!(verifier.verify_at(Some(URL), exp(NOW + 60).as_ref(), Some(&sig), NOW + 60));
    }

    #[test]
    fn expired_signature_is_rejected() {
        let verifier = SignatureVerifier::new(Some("s3cret"));
        let sig = verifier.sign(URL, NOW - 1).unwrap();
        assert!(!verifier.verify_at(Some(URL), exp(NOW - 1).as_ref(), Some(&sig), NOW));
    }

    #[test]
    fn tampering_is_rejected() {
        let verifier = SignatureVerifier::new(Some("s3cret"));
        let sig = verifier.sign(URL, NOW + 60).unwrap();

        assert!(!verifier.verify_at(Some("https://host/b.mp4"), exp(NOW + 60).as_ref(), Some(&sig), NOW));
        assert!(!verifier.verify_at(Some(URL), exp(NOW + 61).as_ref(), Some(&sig), NOW));

        let mut flipped = sig.into_bytes();
        flipped[0] = if flipped[0] == b'0' { b'1' } else { b'0' };
        let flipped = String::from_utf8(flipped).unwrap();
        assert!(!verifier.verify_at(Some(URL), exp(NOW + 60).as_ref(), Some(&flipped), NOW));

        let other = SignatureVerifier::new(Some("other"));
        let foreign = other.sign(URL, NOW + 60).unwrap();
        assert!(!verifier.verify_at(Some(URL), exp(NOW + 60).as_ref(), Some(&foreign), NOW));
    }

    #[test]
    fn expiry_is_signed_as_supplied() {
        let verifier = SignatureVerifier::new(Some("s3cret"));
        let padded = Expiry::parse("+0004102444800").unwrap();
        let canonical = verifier.sign(URL, padded.unix_secs()).unwrap();
        let as_supplied = hex::encode(compute(b"s3cret", URL, "+0004102444800").unwrap());

        assert!(verifier.verify_at(Some(URL), Some(&padded), Some(&as_supplied), NOW));
        assert!(!verifier.verify_at(Some(URL), Some(&padded), Some(&canonical), NOW));
        assert!(!verifier.verify_at(Some(URL), exp(4_102_444_800).as_ref(), Some(&as_supplied), NOW));
    }

    #[test]
    fn missing_or_malformed_inputs_fail_closed() {
        let verifier = SignatureVerifier::new(Some("s3cret"));
        let sig = verifier.sign(URL, NOW + 60).unwrap();
        assert!(!verifier.verify_at(None, exp(NOW + 60).as_ref(), Some(&sig), NOW));
        assert!(!verifier.verify_at(Some(URL), None, Some(&sig), NOW));
        assert!(!verifier.verify_at(Some(URL), exp(NOW + 60).as_ref(), None, NOW));
        assert!(!verifier.verify_at(Some(URL), exp(NOW + 60).as_ref(), Some("not-hex!"), NOW));
        assert!(!verifier.verify_at(Some(URL), exp(NOW + 60).as_ref(), Some("abcd"), NOW));
    }
}
