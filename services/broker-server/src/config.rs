//! Broker configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides
//! except `LOG_LEVEL`, which is operational rather than domain config.
//! Default config path: `./broker.toml`, overridable with `--config`.

use serde::Deserialize;
use std::path::Path;

// ---------------------------------------------------------------------------
// Config types (validated, fully populated)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub port: u16,
    pub tls: Option<TlsConfig>,
    pub deduper: DeduperConfig,
    pub storage: StorageConfig,
    pub sisters: Vec<SisterConfig>,
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct DeduperConfig {
    pub tick_secs: u64,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct SisterConfig {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    port: Option<u16>,
    cert: Option<String>,
    key: Option<String>,
    deduper: Option<RawDeduperConfig>,
    storage: Option<RawStorageConfig>,
    sisters: Option<Vec<RawSisterConfig>>,
}

#[derive(Debug, Deserialize)]
struct RawDeduperConfig {
    tick_secs: Option<u64>,
    ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawStorageConfig {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawSisterConfig {
    url: Option<String>,
    headers: Option<Vec<(String, String)>>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub const DEFAULT_CONFIG_PATH: &str = "./broker.toml";

/// Load broker config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<BrokerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(toml_str) => load_config_from_str(&toml_str),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && path == Path::new(DEFAULT_CONFIG_PATH) => {
            // The default config path is optional: run with every default
            // applied rather than forcing an empty file into existence.
            load_config_from_str("")
        }
        Err(e) => Err(ConfigError::Io(format!("reading config file '{}': {e}", path.display()))),
    }
}

/// Load broker config from the default path `./broker.toml`.
pub fn load_config() -> Result<BrokerConfig, ConfigError> {
    load_config_from_path(Path::new(DEFAULT_CONFIG_PATH))
}

/// Load broker config from a TOML string, applying defaults for every
/// absent optional section.
pub fn load_config_from_str(toml_str: &str) -> Result<BrokerConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let port = raw.port.unwrap_or(7999);

    let tls = match (raw.cert, raw.key) {
        (Some(cert), Some(key)) => Some(TlsConfig { cert, key }),
        (None, None) => None,
        (Some(_), None) => return Err(ConfigError::MissingField("key".to_owned())),
        (None, Some(_)) => return Err(ConfigError::MissingField("cert".to_owned())),
    };

    let deduper = match raw.deduper {
        Some(d) => DeduperConfig {
            tick_secs: d.tick_secs.unwrap_or(30),
            ttl_secs: d.ttl_secs.unwrap_or(30),
        },
        None => DeduperConfig {
            tick_secs: 30,
            ttl_secs: 30,
        },
    };

    let storage = match raw.storage {
        Some(s) => StorageConfig {
            limit: s.limit.unwrap_or(100),
        },
        None => StorageConfig { limit: 100 },
    };

    let mut sisters = Vec::new();
    for (i, s) in raw.sisters.unwrap_or_default().into_iter().enumerate() {
        let url = s.url.ok_or_else(|| ConfigError::MissingField(format!("sisters[{i}].url")))?;
        sisters.push(SisterConfig {
            url,
            headers: s.headers.unwrap_or_default(),
        });
    }

    Ok(BrokerConfig {
        port,
        tls,
        deduper,
        storage,
        sisters,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "Parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_applies_every_default() {
        let cfg = load_config_from_str("").unwrap();
        assert_eq!(cfg.port, 7999);
        assert!(cfg.tls.is_none());
        assert_eq!(cfg.deduper.ttl_secs, 30);
        assert_eq!(cfg.storage.limit, 100);
        assert!(cfg.sisters.is_empty());
    }

    #[test]
    fn cert_without_key_is_a_missing_field_error() {
        let err = load_config_from_str("cert = \"a.pem\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "key"));
    }

    #[test]
    fn sister_without_url_is_a_missing_field_error() {
        let err = load_config_from_str("[[sisters]]\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "sisters[0].url"));
    }

    #[test]
    fn full_config_round_trips_every_field() {
        let toml_str = r#"
            port = 9100

            [deduper]
            tick_secs = 5
            ttl_secs = 15

            [storage]
            limit = 50

            [[sisters]]
            url = "ws://peer-a:9100"

            [[sisters]]
            url = "ws://peer-b:9100"
        "#;
        let cfg = load_config_from_str(toml_str).unwrap();
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.deduper.tick_secs, 5);
        assert_eq!(cfg.deduper.ttl_secs, 15);
        assert_eq!(cfg.storage.limit, 50);
        assert_eq!(cfg.sisters.len(), 2);
        assert_eq!(cfg.sisters[0].url, "ws://peer-a:9100");
    }
}
