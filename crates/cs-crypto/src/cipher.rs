//! Document encryption/decryption with XChaCha20-Poly1305
//!
//! Stored document format:
//! ```text
//! nonce:      24 bytes, random per encryption (stored in its own column)
//! ciphertext: N bytes of encrypted content || 16-byte Poly1305 tag
//! AAD       = "ciphersearch:doc:v1" || doc_id (UTF-8)
//! ```
//!
//! The AAD binds each ciphertext to its doc_id, so a server that relabels one
//! document's ciphertext as another's produces a tag failure on decrypt.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use cs_core::{CsError, CsResult, DocId};

use crate::kdf::SecretKey;
use crate::{NONCE_SIZE, TAG_SIZE};

const AAD_TAG: &[u8] = b"ciphersearch:doc:v1";

/// Output of [`encrypt_document`]: what the server stores for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedDocument {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

/// Encrypt a document body under `data_key`, bound to `doc_id`.
pub fn encrypt_document(
    data_key: &SecretKey,
    doc_id: &DocId,
    plaintext: &[u8],
) -> CsResult<SealedDocument> {
    let cipher = XChaCha20Poly1305::new(data_key.as_bytes().into());

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let aad = build_aad(doc_id);
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|e| CsError::Other(anyhow::anyhow!("document encryption failed: {e}")))?;

    Ok(SealedDocument { ciphertext, nonce })
}

/// Decrypt a document body, verifying its tag and its doc_id binding.
///
/// Fails with `Authentication` on a wrong key, modified bytes, a malformed
/// nonce, or a `doc_id` other than the one used at encryption time.
pub fn decrypt_document(
    data_key: &SecretKey,
    doc_id: &DocId,
    ciphertext: &[u8],
    nonce: &[u8],
) -> CsResult<Vec<u8>> {
    if nonce.len() != NONCE_SIZE || ciphertext.len() < TAG_SIZE {
        return Err(CsError::Authentication(doc_id.clone()));
    }

    let cipher = XChaCha20Poly1305::new(data_key.as_bytes().into());
    let aad = build_aad(doc_id);

    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| CsError::Authentication(doc_id.clone()))
}

fn build_aad(doc_id: &DocId) -> Vec<u8> {
    let mut aad = Vec::with_capacity(AAD_TAG.len() + doc_id.as_bytes().len());
    aad.extend_from_slice(AAD_TAG);
    aad.extend_from_slice(doc_id.as_bytes());
    aad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE;
    use proptest::prelude::*;

    fn test_key() -> SecretKey {
        SecretKey::from_bytes([0x5Au8; KEY_SIZE])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let doc_id = DocId::from("MR-001");
        let plaintext = b"Diagnosis: Type 2 Diabetes Mellitus, Hypertension";

        let sealed = encrypt_document(&key, &doc_id, plaintext).unwrap();
        let decrypted =
            decrypt_document(&key, &doc_id, &sealed.ciphertext, &sealed.nonce).unwrap();

        assert_eq!(&decrypted, plaintext);
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let key = test_key();
        let doc_id = DocId::from("MR-001");

        let a = encrypt_document(&key, &doc_id, b"same text").unwrap();
        let b = encrypt_document(&key, &doc_id, b"same text").unwrap();

        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_encrypted_size() {
        let sealed = encrypt_document(&test_key(), &DocId::from("x"), &[0u8; 1000]).unwrap();
        assert_eq!(sealed.ciphertext.len(), 1000 + TAG_SIZE);
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let doc_id = DocId::from("FIN-001");
        let sealed = encrypt_document(&test_key(), &doc_id, b"wire transfer").unwrap();
        let other = SecretKey::from_bytes([0x11u8; KEY_SIZE]);

        let result = decrypt_document(&other, &doc_id, &sealed.ciphertext, &sealed.nonce);
        assert!(matches!(result, Err(CsError::Authentication(_))));
    }

    #[test]
    fn test_swapped_doc_id_detected() {
        let key = test_key();
        let sealed = encrypt_document(&key, &DocId::from("MR-001"), b"record one").unwrap();

        let result = decrypt_document(
            &key,
            &DocId::from("MR-002"),
            &sealed.ciphertext,
            &sealed.nonce,
        );
        match result {
            Err(CsError::Authentication(id)) => assert_eq!(id.as_str(), "MR-002"),
            other => panic!("expected Authentication, got {other:?}"),
        }
    }

    #[test]
    fn test_tampered_ciphertext() {
        let key = test_key();
        let doc_id = DocId::from("MR-003");
        let mut sealed = encrypt_document(&key, &doc_id, b"secret data").unwrap();
        sealed.ciphertext[3] ^= 0xFF;

        let result = decrypt_document(&key, &doc_id, &sealed.ciphertext, &sealed.nonce);
        assert!(result.is_err(), "tampered ciphertext must fail");
    }

    #[test]
    fn test_malformed_nonce_rejected() {
        let key = test_key();
        let doc_id = DocId::from("MR-004");
        let sealed = encrypt_document(&key, &doc_id, b"data").unwrap();

        let result = decrypt_document(&key, &doc_id, &sealed.ciphertext, &sealed.nonce[..12]);
        assert!(matches!(result, Err(CsError::Authentication(_))));
    }

    proptest! {
        #[test]
        fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..2048),
                          id in "[A-Za-z0-9-]{1,24}") {
            let key = test_key();
            let doc_id = DocId::from(id.as_str());
            let sealed = encrypt_document(&key, &doc_id, &plaintext).unwrap();
            let out = decrypt_document(&key, &doc_id, &sealed.ciphertext, &sealed.nonce).unwrap();
            prop_assert_eq!(out, plaintext);
        }

        #[test]
        fn prop_other_doc_id_fails(id_a in "[a-z]{1,12}", id_b in "[a-z]{1,12}") {
            prop_assume!(id_a != id_b);
            let key = test_key();
            let sealed = encrypt_document(&key, &DocId::from(id_a.as_str()), b"payload").unwrap();
            let result = decrypt_document(&key, &DocId::from(id_b.as_str()), &sealed.ciphertext, &sealed.nonce);
            prop_assert!(matches!(result, Err(CsError::Authentication(_))));
        }
    }
}
