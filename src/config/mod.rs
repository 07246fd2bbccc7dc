//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::BTreeMap,
    fmt,
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::domain::{presets::PresetTable, whitelist::Whitelist};

mod cli;

pub use cli::{CliArgs, Command, ReapArgs, ServeArgs, ServeOverrides, StorageOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "derivo";
const ENV_PREFIX: &str = "DERIVO";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_GUARDIAN_HOST: &str = "127.0.0.1";
const DEFAULT_DISPATCHER_PORT: u16 = 9090;
const DEFAULT_GUARDIAN_PORT: u16 = 9191;
const DEFAULT_STORAGE_ROOT: &str = "derivatives";
const DEFAULT_FS_PUBLIC_BASE_URL: &str = "http://127.0.0.1:9090/derivatives";
const DEFAULT_REAP_INTERVAL_SECS: u64 = 3_600;
const DEFAULT_OBJECT_ACL: &str = "public-read";
const DEFAULT_CACHE_CAPACITY: usize = 10_000;
const DEFAULT_CACHE_TTL_SECS: u64 = 86_400;
const DEFAULT_TRANSFORMER_TIMEOUT_SECS: u64 = 30;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub presets: PresetTable,
    pub storage: StorageSettings,
    pub cache: CacheSettings,
    pub transformer: TransformerSettings,
    pub whitelist: Whitelist,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub dispatcher_addr: SocketAddr,
    pub guardian_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub enum StorageSettings {
    Fs(FsStorageSettings),
    Object(ObjectStorageSettings),
}

#[derive(Debug, Clone)]
pub struct FsStorageSettings {
    pub root: PathBuf,
    pub public_base_url: String,
    /// Non-positive values disable the reaper.
    pub image_ttl_seconds: i64,
    pub reap_interval: Duration,
}

#[derive(Clone)]
pub struct ObjectStorageSettings {
    pub endpoint: String,
    pub public_base_url: String,
    pub acl: String,
    pub authorization: Option<String>,
}

impl fmt::Debug for ObjectStorageSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStorageSettings")
            .field("endpoint", &self.endpoint)
            .field("public_base_url", &self.public_base_url)
            .field("acl", &self.acl)
            .field(
                "authorization",
                &self.authorization.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub capacity: NonZeroUsize,
    /// `None` keeps entries until they are evicted or invalidated.
    pub ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct TransformerSettings {
    pub endpoint: Url,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Reap(args)) => raw.apply_storage_overrides(&args.storage),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    presets: BTreeMap<String, String>,
    storage: RawStorageSettings,
    cache: RawCacheSettings,
    transformer: RawTransformerSettings,
    whitelist: Vec<String>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.guardian_host.as_ref() {
            self.server.guardian_host = Some(host.clone());
        }
        if let Some(port) = overrides.dispatcher_port {
            self.server.dispatcher_port = Some(port);
        }
        if let Some(port) = overrides.guardian_port {
            self.server.guardian_port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(endpoint) = overrides.transformer_endpoint.as_ref() {
            self.transformer.endpoint = Some(endpoint.clone());
        }
        if let Some(capacity) = overrides.cache_capacity {
            self.cache.capacity = Some(capacity);
        }
        if let Some(ttl) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }

        self.apply_storage_overrides(&overrides.storage);
    }

    fn apply_storage_overrides(&mut self, overrides: &StorageOverrides) {
        if let Some(root) = overrides.storage_root.as_ref() {
            self.storage.root = Some(root.clone());
        }
        if let Some(ttl) = overrides.image_ttl_seconds {
            self.storage.image_ttl_seconds = Some(ttl);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            presets,
            storage,
            cache,
            transformer,
            whitelist,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let presets = PresetTable::new(presets)
            .map_err(|err| LoadError::invalid("presets", err.to_string()))?;
        let storage = build_storage_settings(storage)?;
        let cache = build_cache_settings(cache);
        let transformer = build_transformer_settings(transformer)?;
        let whitelist = Whitelist::new(&whitelist)
            .map_err(|err| LoadError::invalid("whitelist", err.to_string()))?;

        Ok(Self {
            server,
            logging,
            presets,
            storage,
            cache,
            transformer,
            whitelist,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let guardian_host = server
        .guardian_host
        .unwrap_or_else(|| DEFAULT_GUARDIAN_HOST.to_string());

    let dispatcher_port = server.dispatcher_port.unwrap_or(DEFAULT_DISPATCHER_PORT);
    if dispatcher_port == 0 {
        return Err(LoadError::invalid(
            "server.dispatcher_port",
            "port must be greater than zero",
        ));
    }

    let guardian_port = server.guardian_port.unwrap_or(DEFAULT_GUARDIAN_PORT);
    if guardian_port == 0 {
        return Err(LoadError::invalid(
            "server.guardian_port",
            "port must be greater than zero",
        ));
    }

    let dispatcher_addr = parse_socket_addr(&host, dispatcher_port)
        .map_err(|reason| LoadError::invalid("server.dispatcher_addr", reason))?;
    let guardian_addr = parse_socket_addr(&guardian_host, guardian_port)
        .map_err(|reason| LoadError::invalid("server.guardian_addr", reason))?;

    Ok(ServerSettings {
        dispatcher_addr,
        guardian_addr,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let kind = storage
        .kind
        .as_deref()
        .map(str::trim)
        .unwrap_or("fs")
        .to_ascii_lowercase();

    match kind.as_str() {
        "fs" => {
            let root = storage
                .root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT));
            if root.as_os_str().is_empty() {
                return Err(LoadError::invalid("storage.root", "path must not be empty"));
            }

            let public_base_url = storage
                .public_base_url
                .unwrap_or_else(|| DEFAULT_FS_PUBLIC_BASE_URL.to_string());
            parse_http_url(&public_base_url, "storage.public_base_url")?;

            let reap_secs = storage
                .reap_interval_seconds
                .unwrap_or(DEFAULT_REAP_INTERVAL_SECS);
            if reap_secs == 0 {
                return Err(LoadError::invalid(
                    "storage.reap_interval_seconds",
                    "must be greater than zero",
                ));
            }

            Ok(StorageSettings::Fs(FsStorageSettings {
                root,
                public_base_url,
                image_ttl_seconds: storage.image_ttl_seconds.unwrap_or(0),
                reap_interval: Duration::from_secs(reap_secs),
            }))
        }
        "object" => {
            let endpoint = non_blank(storage.endpoint).ok_or_else(|| {
                LoadError::invalid("storage.endpoint", "required for object storage")
            })?;
            parse_http_url(&endpoint, "storage.endpoint")?;

            let public_base_url =
                non_blank(storage.public_base_url).unwrap_or_else(|| endpoint.clone());
            parse_http_url(&public_base_url, "storage.public_base_url")?;

            let acl = non_blank(storage.acl).unwrap_or_else(|| DEFAULT_OBJECT_ACL.to_string());

            Ok(StorageSettings::Object(ObjectStorageSettings {
                endpoint,
                public_base_url,
                acl,
                authorization: non_blank(storage.authorization),
            }))
        }
        other => Err(LoadError::invalid(
            "storage.kind",
            format!("unknown storage kind `{other}` (expected `fs` or `object`)"),
        )),
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> CacheSettings {
    let capacity = cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY);
    let ttl_seconds = cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);

    CacheSettings {
        capacity: NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
        ttl: (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds)),
    }
}

fn build_transformer_settings(
    transformer: RawTransformerSettings,
) -> Result<TransformerSettings, LoadError> {
    let endpoint = non_blank(transformer.endpoint)
        .ok_or_else(|| LoadError::invalid("transformer.endpoint", "must be configured"))?;
    let endpoint = parse_http_url(&endpoint, "transformer.endpoint")?;

    let timeout_secs = transformer
        .timeout_seconds
        .unwrap_or(DEFAULT_TRANSFORMER_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "transformer.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(TransformerSettings {
        endpoint,
        timeout: Duration::from_secs(timeout_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    guardian_host: Option<String>,
    dispatcher_port: Option<u16>,
    guardian_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    kind: Option<String>,
    root: Option<PathBuf>,
    public_base_url: Option<String>,
    image_ttl_seconds: Option<i64>,
    reap_interval_seconds: Option<u64>,
    endpoint: Option<String>,
    acl: Option<String>,
    authorization: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    capacity: Option<usize>,
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTransformerSettings {
    endpoint: Option<String>,
    timeout_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_http_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value)
        .map_err(|err| LoadError::invalid(key, format!("invalid url `{value}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{other}`"),
        )),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[cfg(test)]
mod tests;
