//! Key derivation: master password + salt → domain-separated data and search keys

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;

use cs_core::config::MIN_KDF_ITERATIONS;
use cs_core::{CsError, CsResult};

use crate::{KEY_SIZE, SALT_SIZE};

/// Context label for the document encryption key.
pub const DATA_KEY_CONTEXT: &[u8] = b"ciphersearch:data";

/// Context label for the search token key.
pub const SEARCH_KEY_CONTEXT: &[u8] = b"ciphersearch:search";

/// A 256-bit secret key. Not `Clone`; zeroized on drop.
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Per-client KDF salt. Random, non-secret, stored alongside the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Rebuild a salt read back from storage; `None` if the length is wrong.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; SALT_SIZE] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        STANDARD.encode(self.0)
    }
}

/// Generate a fresh random salt for a new client identity.
pub fn generate_salt() -> Salt {
    let mut bytes = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    Salt(bytes)
}

/// PBKDF2 parameters
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// PBKDF2-HMAC-SHA256 rounds (default and minimum: 100000)
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: MIN_KDF_ITERATIONS,
        }
    }
}

/// The session's key material: two independent keys plus the salt they came from.
///
/// Owned by exactly one client session. Dropping it zeroizes both keys.
pub struct DerivedKeySet {
    data_key: SecretKey,
    search_key: SecretKey,
    salt: Salt,
}

impl DerivedKeySet {
    /// Assemble a key set from already-derived keys (e.g. unlocked from a keyring).
    pub fn from_parts(data_key: SecretKey, search_key: SecretKey, salt: Salt) -> Self {
        Self {
            data_key,
            search_key,
            salt,
        }
    }

    pub fn data_key(&self) -> &SecretKey {
        &self.data_key
    }

    pub fn search_key(&self) -> &SecretKey {
        &self.search_key
    }

    pub fn salt(&self) -> &Salt {
        &self.salt
    }
}

impl std::fmt::Debug for DerivedKeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKeySet")
            .field("data_key", &self.data_key)
            .field("search_key", &self.search_key)
            .field("salt", &self.salt.to_base64())
            .finish()
    }
}

/// Derive the data and search keys from a master password.
///
/// Runs PBKDF2-HMAC-SHA256 twice over the same password and salt, once per
/// context label, so that exposure of anything computed from `search_key`
/// says nothing about `data_key`.
pub fn derive(
    password: &SecretString,
    salt: &Salt,
    params: &KdfParams,
) -> CsResult<DerivedKeySet> {
    if password.expose_secret().is_empty() {
        return Err(CsError::WeakCredential("master password is empty".into()));
    }
    if params.iterations < MIN_KDF_ITERATIONS {
        return Err(CsError::Config(format!(
            "PBKDF2 iterations {} below minimum {MIN_KDF_ITERATIONS}",
            params.iterations
        )));
    }

    let data_key = derive_labelled(password, salt, DATA_KEY_CONTEXT, params.iterations);
    let search_key = derive_labelled(password, salt, SEARCH_KEY_CONTEXT, params.iterations);

    tracing::debug!(iterations = params.iterations, "derived data and search keys");

    Ok(DerivedKeySet {
        data_key,
        search_key,
        salt: *salt,
    })
}

fn derive_labelled(
    password: &SecretString,
    salt: &Salt,
    context: &[u8],
    iterations: u32,
) -> SecretKey {
    let mut salted = Vec::with_capacity(SALT_SIZE + context.len());
    salted.extend_from_slice(salt.as_bytes());
    salted.extend_from_slice(context);

    let mut okm = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(
        password.expose_secret().as_bytes(),
        &salted,
        iterations,
        &mut okm,
    );
    let key = SecretKey::from_bytes(okm);
    okm.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdf_deterministic() {
        let password = SecretString::from("correct horse battery staple");
        let salt = Salt::from_bytes([1u8; SALT_SIZE]);
        let params = KdfParams::default();

        let k1 = derive(&password, &salt, &params).unwrap();
        let k2 = derive(&password, &salt, &params).unwrap();

        assert_eq!(k1.data_key().as_bytes(), k2.data_key().as_bytes());
        assert_eq!(k1.search_key().as_bytes(), k2.search_key().as_bytes());
    }

    #[test]
    fn test_kdf_domain_separation() {
        let password = SecretString::from("hackathon_demo_2024");
        let salt = Salt::from_bytes([9u8; SALT_SIZE]);

        let keys = derive(&password, &salt, &KdfParams::default()).unwrap();

        assert_ne!(
            keys.data_key().as_bytes(),
            keys.search_key().as_bytes(),
            "data and search keys must differ"
        );
    }

    #[test]
    fn test_kdf_different_salts() {
        let password = SecretString::from("same-password");
        let params = KdfParams::default();

        let k1 = derive(&password, &Salt::from_bytes([1u8; SALT_SIZE]), &params).unwrap();
        let k2 = derive(&password, &Salt::from_bytes([2u8; SALT_SIZE]), &params).unwrap();

        assert_ne!(k1.data_key().as_bytes(), k2.data_key().as_bytes());
        assert_ne!(k1.search_key().as_bytes(), k2.search_key().as_bytes());
    }

    #[test]
    fn test_kdf_empty_password_rejected() {
        let result = derive(
            &SecretString::from(""),
            &generate_salt(),
            &KdfParams::default(),
        );
        assert!(matches!(result, Err(CsError::WeakCredential(_))));
    }

    #[test]
    fn test_kdf_rejects_low_iterations() {
        let result = derive(
            &SecretString::from("pw"),
            &generate_salt(),
            &KdfParams { iterations: 1000 },
        );
        assert!(matches!(result, Err(CsError::Config(_))));
    }

    #[test]
    fn test_generate_salt_random() {
        assert_ne!(generate_salt(), generate_salt());
    }

    #[test]
    fn test_salt_from_slice() {
        assert!(Salt::from_slice(&[0u8; 8]).is_none());
        assert!(Salt::from_slice(&[0u8; SALT_SIZE]).is_some());
    }

    #[test]
    fn test_debug_redacts_keys() {
        let keys = DerivedKeySet::from_parts(
            SecretKey::from_bytes([0x41; KEY_SIZE]),
            SecretKey::from_bytes([0x42; KEY_SIZE]),
            Salt::from_bytes([0u8; SALT_SIZE]),
        );
        let dbg = format!("{keys:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("65, 65"));
    }
}
