use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by
/// `FACEPRINT_CONFIG`, then `FACEPRINT_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:5000).
    pub bind_addr: SocketAddr,
    /// Directory holding `user_<id>.json` records and their photos.
    pub storage_dir: PathBuf,
    /// Maximum Euclidean distance accepted as a match.
    pub threshold: f64,
    /// Directory containing the SCRFD and ArcFace ONNX models.
    pub model_dir: PathBuf,
    /// Request body limit; base64 photos are large.
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            storage_dir: PathBuf::from("face_data"),
            threshold: 0.5,
            model_dir: faceprint_core::default_model_dir(),
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match env("FACEPRINT_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(v) = env_parse(&env, "FACEPRINT_BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Some(v) = env("FACEPRINT_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse(&env, "FACEPRINT_THRESHOLD") {
            config.threshold = v;
        }
        if let Some(v) = env("FACEPRINT_MODEL_DIR") {
            config.model_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse(&env, "FACEPRINT_MAX_BODY_BYTES") {
            config.max_body_bytes = v;
        }

        if !(0.0..=1.0).contains(&config.threshold) {
            return Err(ConfigError::InvalidThreshold(config.threshold));
        }
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Parse an environment value, ignoring (with a warning) values that don't parse.
fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
