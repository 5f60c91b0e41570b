//! Sub-key derivation (HKDF-SHA256) and the optional password verifier

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use cs_core::{CsError, CsResult};

use crate::kdf::SecretKey;
use crate::KEY_SIZE;

type HmacSha256 = Hmac<Sha256>;

const VERIFIER_KEY_INFO: &[u8] = b"ciphersearch:verifier";
const VERIFIER_MESSAGE: &[u8] = b"ciphersearch:verifier:v1";

/// HKDF-SHA256 key derivation with a domain-specific info string.
pub(crate) fn hkdf_derive(ikm: &SecretKey, info: &[u8]) -> CsResult<SecretKey> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm.as_bytes());
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(info, &mut okm)
        .map_err(|e| CsError::Other(anyhow::anyhow!("HKDF expand failed: {e}")))?;
    let key = SecretKey::from_bytes(okm);
    okm.zeroize();
    Ok(key)
}

/// HMAC-SHA256 of `msg` under `key`.
pub(crate) fn hmac_sha256(key: &SecretKey, msg: &[u8]) -> CsResult<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| CsError::Other(anyhow::anyhow!("HMAC key setup failed: {e}")))?;
    mac.update(msg);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(out)
}

/// Compute the verifier record for a data key.
///
/// The verifier is an HMAC of a fixed constant under a key derived from
/// `data_key`; storing it server-side lets a later login detect a wrong
/// password without revealing anything about the key.
pub fn compute_verifier(data_key: &SecretKey) -> CsResult<Vec<u8>> {
    let vkey = hkdf_derive(data_key, VERIFIER_KEY_INFO)?;
    Ok(hmac_sha256(&vkey, VERIFIER_MESSAGE)?.to_vec())
}

/// Check a stored verifier against `data_key` in constant time.
pub fn check_verifier(data_key: &SecretKey, expected: &[u8]) -> CsResult<bool> {
    let vkey = hkdf_derive(data_key, VERIFIER_KEY_INFO)?;
    let mut mac = HmacSha256::new_from_slice(vkey.as_bytes())
        .map_err(|e| CsError::Other(anyhow::anyhow!("HMAC key setup failed: {e}")))?;
    mac.update(VERIFIER_MESSAGE);
    Ok(mac.verify_slice(expected).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hkdf_derive_different_domains() {
        let root = SecretKey::from_bytes([42u8; KEY_SIZE]);
        let a = hkdf_derive(&root, b"ciphersearch:token:exact").unwrap();
        let b = hkdf_derive(&root, b"ciphersearch:token:ngram").unwrap();

        assert_ne!(
            a.as_bytes(),
            b.as_bytes(),
            "different domains must produce different keys"
        );
    }

    #[test]
    fn test_verifier_roundtrip() {
        let key = SecretKey::from_bytes([7u8; KEY_SIZE]);
        let verifier = compute_verifier(&key).unwrap();
        assert!(check_verifier(&key, &verifier).unwrap());
    }

    #[test]
    fn test_verifier_rejects_other_key() {
        let key = SecretKey::from_bytes([7u8; KEY_SIZE]);
        let other = SecretKey::from_bytes([8u8; KEY_SIZE]);
        let verifier = compute_verifier(&key).unwrap();
        assert!(!check_verifier(&other, &verifier).unwrap());
    }

    #[test]
    fn test_verifier_rejects_truncated_record() {
        let key = SecretKey::from_bytes([7u8; KEY_SIZE]);
        let verifier = compute_verifier(&key).unwrap();
        assert!(!check_verifier(&key, &verifier[..16]).unwrap());
    }
}
