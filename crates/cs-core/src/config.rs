use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CsError, CsResult};

/// Lowest PBKDF2 iteration count accepted anywhere in the workspace.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Top-level configuration (loaded from ciphersearch.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CipherSearchConfig {
    pub kdf: KdfConfig,
    pub store: StoreConfig,
    pub search: SearchConfig,
    pub client: ClientConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// PBKDF2-HMAC-SHA256 iterations (default and minimum: 100000)
    pub iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database holding ciphertext and token indexes
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// n for fuzzy n-gram tokens (default: 3)
    pub ngram_size: usize,
    /// Fuzzy threshold used when the caller supplies none (default: 0.7)
    pub default_threshold: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Record and check a password verifier in the server-side profile
    pub password_verifier: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            iterations: MIN_KDF_ITERATIONS,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("~/.local/share/ciphersearch/ciphersearch.db"),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            ngram_size: 3,
            default_threshold: 0.7,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl CipherSearchConfig {
    /// Load from a TOML file, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> CsResult<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)
                .map_err(|e| CsError::Config(format!("parsing {}: {e}", path.display())))?
        } else {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            CipherSearchConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CsResult<()> {
        if self.kdf.iterations < MIN_KDF_ITERATIONS {
            return Err(CsError::Config(format!(
                "kdf.iterations = {} is below the minimum of {MIN_KDF_ITERATIONS}",
                self.kdf.iterations
            )));
        }
        if self.search.ngram_size == 0 {
            return Err(CsError::Config("search.ngram_size must be at least 1".into()));
        }
        let t = self.search.default_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return Err(CsError::Config(format!(
                "search.default_threshold = {t} is outside (0, 1]"
            )));
        }
        match self.log.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(CsError::Config(format!(
                "log.format must be \"json\" or \"text\", got \"{other}\""
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[kdf]
iterations = 250000

[store]
db_path = "/var/lib/ciphersearch/index.db"

[search]
ngram_size = 4
default_threshold = 0.8

[client]
password_verifier = true

[log]
level = "debug"
format = "json"
"#;
        let config: CipherSearchConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.kdf.iterations, 250_000);
        assert_eq!(
            config.store.db_path,
            PathBuf::from("/var/lib/ciphersearch/index.db")
        );
        assert_eq!(config.search.ngram_size, 4);
        assert!((config.search.default_threshold - 0.8).abs() < f64::EPSILON);
        assert!(config.client.password_verifier);
        assert_eq!(config.log.format, "json");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let config: CipherSearchConfig = toml::from_str("").unwrap();

        assert_eq!(config.kdf.iterations, MIN_KDF_ITERATIONS);
        assert_eq!(config.search.ngram_size, 3);
        assert!((config.search.default_threshold - 0.7).abs() < f64::EPSILON);
        assert!(!config.client.password_verifier);
        assert_eq!(config.log.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_weak_kdf() {
        let mut config = CipherSearchConfig::default();
        config.kdf.iterations = 10_000;
        assert!(matches!(config.validate(), Err(CsError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = CipherSearchConfig::default();
        config.search.default_threshold = 0.0;
        assert!(config.validate().is_err());
        config.search.default_threshold = 1.5;
        assert!(config.validate().is_err());
        config.search.default_threshold = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = CipherSearchConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.search.ngram_size, 3);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "[search]\nngram_size = 0\n").unwrap();
        assert!(matches!(
            CipherSearchConfig::load(&path),
            Err(CsError::Config(_))
        ));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = CipherSearchConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: CipherSearchConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.store.db_path, parsed.store.db_path);
        assert_eq!(config.kdf.iterations, parsed.kdf.iterations);
    }
}
