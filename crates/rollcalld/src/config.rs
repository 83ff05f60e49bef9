use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Daemon configuration.
///
/// Built from `ROLLCALL_*` environment variables. An optional TOML file named
/// by `ROLLCALL_CONFIG` supplies defaults; environment variables win over it.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interface to bind (default: 0.0.0.0).
    pub host: String,
    /// TCP port (default: 5001, also read from `PORT`).
    pub port: u16,
    /// Directory holding embedding blobs.
    pub embeddings_dir: PathBuf,
    /// Directory receiving unknown-face crops.
    pub unknown_faces_dir: PathBuf,
    /// Public URL prefix under which unknown-face crops are served.
    pub unknown_faces_url_prefix: String,
    /// Initial acceptance threshold in [0, 1].
    pub confidence_threshold: f32,
    /// Enforced embedding dimension; `None` disables the check.
    pub embedding_dim: Option<usize>,
    /// External face extractor program.
    pub extractor_cmd: String,
    /// Extra arguments placed before the image path.
    pub extractor_args: Vec<String>,
}

/// Optional on-disk configuration. Every field may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    embeddings_dir: Option<PathBuf>,
    unknown_faces_dir: Option<PathBuf>,
    unknown_faces_url_prefix: Option<String>,
    confidence_threshold: Option<f64>,
    embedding_dim: Option<usize>,
    extractor_cmd: Option<String>,
    extractor_args: Option<Vec<String>>,
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self> {
        let file = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => FileConfig::read(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = env("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(|| default_data_dir(&env));

        let embeddings_dir = env("ROLLCALL_EMBEDDINGS_DIR")
            .map(PathBuf::from)
            .or(file.embeddings_dir)
            .unwrap_or_else(|| data_dir.join("embeddings"));

        let unknown_faces_dir = env("ROLLCALL_UNKNOWN_FACES_DIR")
            .map(PathBuf::from)
            .or(file.unknown_faces_dir)
            .unwrap_or_else(|| data_dir.join("unknown_faces"));

        let port = match parse_env::<u16>(&env, "ROLLCALL_PORT")? {
            Some(port) => Some(port),
            None => parse_env::<u16>(&env, "PORT")?,
        };

        let confidence_threshold = parse_env::<f64>(&env, "ROLLCALL_CONFIDENCE_THRESHOLD")?
            .or(file.confidence_threshold)
            .unwrap_or(f64::from(rollcall_core::DEFAULT_THRESHOLD));
        if !(0.0..=1.0).contains(&confidence_threshold) {
            anyhow::bail!("confidence threshold must be between 0 and 1, got {confidence_threshold}");
        }

        let extractor_args = env("ROLLCALL_EXTRACTOR_ARGS")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .or(file.extractor_args)
            .unwrap_or_default();

        Ok(Self {
            host: env("ROLLCALL_HOST")
                .or(file.host)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: port.or(file.port).unwrap_or(5001),
            embeddings_dir,
            unknown_faces_dir,
            unknown_faces_url_prefix: env("ROLLCALL_UNKNOWN_FACES_URL_PREFIX")
                .or(file.unknown_faces_url_prefix)
                .unwrap_or_else(|| rollcall_core::DEFAULT_PUBLIC_PREFIX.to_string()),
            confidence_threshold: confidence_threshold as f32,
            embedding_dim: parse_env::<usize>(&env, "ROLLCALL_EMBEDDING_DIM")?.or(file.embedding_dim),
            extractor_cmd: env("ROLLCALL_EXTRACTOR_CMD")
                .or(file.extractor_cmd)
                .unwrap_or_else(|| "rollcall-extract".to_string()),
            extractor_args,
        })
    }

    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn parse_env<T>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env(key)
        .map(|v| v.trim().parse::<T>().with_context(|| format!("invalid {key}={v:?}")))
        .transpose()
}
