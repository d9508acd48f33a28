//! Proxy configuration: flags, environment, and an optional config file.
//!
//! Precedence is flag > environment > file > built-in default. Clap
//! resolves the first two; this module layers the file and the defaults
//! underneath.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use edge_cache::AdmissionPolicy;
use edge_core::{ConfigError, OriginConfig, OriginProtocol};
use edge_data::TimeoutConfig;
use edge_observability::{LogFormat, LogLevel};
use edge_proxy::{CacheSettings, DEFAULT_MAX_OBJECT_BYTES};
use serde::{Deserialize, Serialize};

const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
const DEFAULT_CACHE_DIR: &str = "./cache";
const DEFAULT_DB_PATH: &str = "./cache.db";
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Proxy settings accepted on the command line.
#[derive(Debug, Clone, Default, Args)]
pub struct ProxyArgs {
    /// Origin protocol (http or https)
    #[arg(long, env = "EDGE_PROTOCOL", global = true)]
    pub protocol: Option<OriginProtocol>,

    /// Origin host[:port]
    #[arg(long, env = "EDGE_ORIGIN", global = true)]
    pub origin: Option<String>,

    /// Address to listen on [default: 0.0.0.0:8080]
    #[arg(long, env = "EDGE_LISTEN", global = true)]
    pub listen: Option<SocketAddr>,

    /// Directory holding cached bodies [default: ./cache]
    #[arg(long, env = "EDGE_CACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Metadata database path [default: ./cache.db]
    #[arg(long, env = "EDGE_DB_PATH", global = true)]
    pub db_path: Option<PathBuf>,

    /// Seconds between eviction sweeps [default: 300]
    #[arg(long, env = "EDGE_SWEEP_INTERVAL", global = true)]
    pub sweep_interval: Option<u64>,

    /// Log output format (human or json)
    #[arg(long, env = "EDGE_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    /// Config file (TOML, or JSON by extension)
    #[arg(short, long, env = "EDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Keep metadata in memory instead of the database
    #[arg(long, global = true)]
    pub ephemeral: bool,
}

/// Config file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub origin: OriginSection,
    pub server: ServerSection,
    pub cache: CacheSection,
    pub timeouts: TimeoutsSection,
    pub logging: LoggingSection,
}

/// `[origin]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginSection {
    /// Kept as text so a bad value is reported like a bad flag.
    pub protocol: Option<String>,
    pub host: Option<String>,
}

/// `[server]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen: Option<SocketAddr>,
}

/// `[cache]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub sweep_interval_secs: Option<u64>,
    pub max_object_bytes: Option<u64>,
    pub coalesce_misses: Option<bool>,
    pub lock_wait_ms: Option<u64>,
    pub allow_markup: Option<bool>,
    pub serve_stale_on_revalidation_error: Option<bool>,
}

/// `[timeouts]`, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsSection {
    pub connect_ms: Option<u64>,
    pub response_ms: Option<u64>,
    pub idle_ms: Option<u64>,
}

/// `[logging]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub format: Option<LogFormat>,
    pub level: Option<LogLevel>,
}

impl FileConfig {
    /// Load a config file; `.json` is parsed as JSON, anything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
        }
    }
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// `None` when neither a protocol nor an origin host was given.
    pub origin: Option<OriginConfig>,
    pub listen: SocketAddr,
    pub cache_dir: PathBuf,
    pub db_path: PathBuf,
    pub ephemeral: bool,
    pub sweep_interval: Duration,
    pub cache: CacheSettings,
    pub timeouts: TimeoutConfig,
    pub log_format: LogFormat,
    pub log_level: LogLevel,
}

impl Settings {
    /// Layer `args` over `file` over the defaults.
    ///
    /// The origin may be left out entirely; giving only half of it is an
    /// error.
    pub fn resolve(args: &ProxyArgs, file: FileConfig) -> Result<Self, ConfigError> {
        let protocol = match (args.protocol, file.origin.protocol.as_deref()) {
            (Some(protocol), _) => Some(protocol),
            (None, Some(raw)) => Some(raw.parse()?),
            (None, None) => None,
        };
        let host = args.origin.clone().or(file.origin.host);
        let origin = match (protocol, host) {
            (Some(protocol), Some(host)) => Some(OriginConfig::new(protocol, host)?),
            (Some(_), None) => return Err(ConfigError::Missing("origin")),
            (None, Some(_)) => return Err(ConfigError::Missing("protocol")),
            (None, None) => None,
        };

        let listen = match args.listen.or(file.server.listen) {
            Some(addr) => addr,
            None => DEFAULT_LISTEN.parse().map_err(|e| ConfigError::Invalid {
                field: "listen",
                reason: format!("{e}"),
            })?,
        };

        let sweep_secs = args
            .sweep_interval
            .or(file.cache.sweep_interval_secs)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
        if sweep_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "sweep_interval",
                reason: "must be at least one second".into(),
            });
        }

        let defaults = CacheSettings::default();
        let cache = CacheSettings {
            admission: AdmissionPolicy::new()
                .with_markup(file.cache.allow_markup.unwrap_or(defaults.admission.allow_markup)),
            max_object_bytes: file.cache.max_object_bytes.unwrap_or(DEFAULT_MAX_OBJECT_BYTES),
            coalesce_misses: file.cache.coalesce_misses.unwrap_or(defaults.coalesce_misses),
            lock_wait_ms: file.cache.lock_wait_ms.unwrap_or(defaults.lock_wait_ms),
            serve_stale_on_revalidation_error: file
                .cache
                .serve_stale_on_revalidation_error
                .unwrap_or(defaults.serve_stale_on_revalidation_error),
        };

        let default_timeouts = TimeoutConfig::default();
        let timeouts = TimeoutConfig::new(
            file.timeouts
                .connect_ms
                .map_or(default_timeouts.connect, Duration::from_millis),
            file.timeouts
                .response_ms
                .map_or(default_timeouts.response, Duration::from_millis),
            file.timeouts
                .idle_ms
                .map_or(default_timeouts.idle, Duration::from_millis),
        );

        Ok(Self {
            origin,
            listen,
            cache_dir: args
                .cache_dir
                .clone()
                .or(file.cache.dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            db_path: args
                .db_path
                .clone()
                .or(file.cache.db_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            ephemeral: args.ephemeral,
            sweep_interval: Duration::from_secs(sweep_secs),
            cache,
            timeouts,
            log_format: args.log_format.or(file.logging.format).unwrap_or_default(),
            log_level: file.logging.level.unwrap_or_default(),
        })
    }

    /// The origin, for commands that talk to it or derive cache keys.
    pub fn origin(&self) -> Result<&OriginConfig, ConfigError> {
        self.origin.as_ref().ok_or(ConfigError::Missing("origin"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(protocol: Option<OriginProtocol>, origin: Option<&str>) -> ProxyArgs {
        ProxyArgs {
            protocol,
            origin: origin.map(String::from),
            ..ProxyArgs::default()
        }
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::resolve(
            &args(Some(OriginProtocol::Https), Some("cdn.example.org")),
            FileConfig::default(),
        )
        .unwrap();

        assert_eq!(settings.origin().unwrap().base_url(), "https://cdn.example.org");
        assert_eq!(settings.listen, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(settings.cache_dir, PathBuf::from("./cache"));
        assert_eq!(settings.db_path, PathBuf::from("./cache.db"));
        assert_eq!(settings.sweep_interval, Duration::from_secs(300));
        assert_eq!(settings.cache, CacheSettings::default());
        assert_eq!(settings.timeouts, TimeoutConfig::default());
        assert_eq!(settings.log_format, LogFormat::Human);
    }

    #[test]
    fn test_flags_beat_file() {
        let file: FileConfig = toml::from_str(
            r#"
            [origin]
            protocol = "http"
            host = "file.example.org"

            [cache]
            dir = "/var/cache/edge"
            sweep_interval_secs = 60
            lock_wait_ms = 1500
            allow_markup = true

            [timeouts]
            connect_ms = 250
            "#,
        )
        .unwrap();

        let mut cli = args(Some(OriginProtocol::Https), None);
        cli.sweep_interval = Some(30);
        let settings = Settings::resolve(&cli, file).unwrap();

        assert_eq!(settings.origin().unwrap().base_url(), "https://file.example.org");
        assert_eq!(settings.cache_dir, PathBuf::from("/var/cache/edge"));
        assert_eq!(settings.sweep_interval, Duration::from_secs(30));
        assert!(settings.cache.admission.allow_markup);
        assert_eq!(settings.cache.lock_wait_ms, 1500);
        assert_eq!(settings.timeouts.connect, Duration::from_millis(250));
        assert_eq!(settings.timeouts.idle, TimeoutConfig::default().idle);
    }

    #[test]
    fn test_missing_origin_is_config_error() {
        let err = Settings::resolve(&args(Some(OriginProtocol::Http), None), FileConfig::default())
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing("origin"));

        let err = Settings::resolve(&args(None, Some("a.example")), FileConfig::default())
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing("protocol"));
    }

    #[test]
    fn test_origin_can_be_left_out() {
        let mut cli = ProxyArgs::default();
        cli.db_path = Some(PathBuf::from("/tmp/edge.db"));
        let settings = Settings::resolve(&cli, FileConfig::default()).unwrap();

        assert!(settings.origin.is_none());
        assert_eq!(settings.origin().unwrap_err(), ConfigError::Missing("origin"));
        assert_eq!(settings.db_path, PathBuf::from("/tmp/edge.db"));
    }

    #[test]
    fn test_bad_protocol_in_file() {
        let mut file = FileConfig::default();
        file.origin.protocol = Some("gopher".into());
        file.origin.host = Some("a.example".into());
        let err = Settings::resolve(&ProxyArgs::default(), file).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProtocol(_)));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let mut cli = args(Some(OriginProtocol::Http), Some("a.example"));
        cli.sweep_interval = Some(0);
        assert!(Settings::resolve(&cli, FileConfig::default()).is_err());
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"origin": {{"protocol": "https", "host": "json.example"}}, "logging": {{"format": "json", "level": "debug"}}}}"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        let settings = Settings::resolve(&ProxyArgs::default(), config).unwrap();
        assert_eq!(settings.origin().unwrap().host, "json.example");
        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.log_level, LogLevel::Debug);
    }
}
