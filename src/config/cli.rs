use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the derivo binary.
#[derive(Debug, Parser)]
#[command(name = "derivo", version, about = "Cache-aside image derivative proxy")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "DERIVO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the dispatcher and guardian listeners plus the storage reaper.
    Serve(Box<ServeArgs>),
    /// Sweep expired derivatives from the filesystem store once and exit.
    Reap(ReapArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StorageOverrides {
    /// Override the filesystem storage root.
    #[arg(long = "storage-root", value_name = "PATH")]
    pub storage_root: Option<PathBuf>,

    /// Override the derivative time-to-live in seconds (0 or less disables reaping).
    #[arg(long = "image-ttl-seconds", value_name = "SECONDS", allow_negative_numbers = true)]
    pub image_ttl_seconds: Option<i64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub storage: StorageOverrides,

    /// Override the dispatcher listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the guardian listener host.
    #[arg(long = "server-guardian-host", value_name = "HOST")]
    pub guardian_host: Option<String>,

    /// Override the dispatcher listener port.
    #[arg(long = "server-dispatcher-port", value_name = "PORT")]
    pub dispatcher_port: Option<u16>,

    /// Override the guardian listener port.
    #[arg(long = "server-guardian-port", value_name = "PORT")]
    pub guardian_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the transformation service endpoint.
    #[arg(long = "transformer-endpoint", value_name = "URL")]
    pub transformer_endpoint: Option<String>,

    /// Override the URL cache capacity.
    #[arg(long = "cache-capacity", value_name = "COUNT")]
    pub cache_capacity: Option<usize>,

    /// Override the URL cache entry lifetime in seconds (0 never expires).
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ReapArgs {
    #[command(flatten)]
    pub storage: StorageOverrides,
}
