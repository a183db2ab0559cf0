//! Command line interface definition

use clap::{Args, Parser, Subcommand};
use shipd_types::{LogFormat, SourceMode};
use std::net::SocketAddr;
use std::path::PathBuf;

/// shipd - Chunked artifact delivery over WebSocket
#[derive(Parser)]
#[command(name = "shipd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Chunked artifact delivery over WebSocket")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Parser)]
pub struct GlobalArgs {
    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH", env = "SHIPD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, env = "SHIPD_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Accept clients and deliver artifacts until interrupted
    Serve(ServeArgs),

    /// Print the effective configuration as TOML
    ShowConfig(ServeArgs),
}

impl Commands {
    pub fn overrides(&self) -> &ServeArgs {
        match self {
            Self::Serve(args) | Self::ShowConfig(args) => args,
        }
    }
}

/// Settings that override the configuration file and environment
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<SocketAddr>,

    /// Directory artifacts are served from and mirrored into
    #[arg(long, value_name = "PATH")]
    pub storage_root: Option<PathBuf>,

    /// Where artifact bytes come from
    #[arg(long, value_enum)]
    pub source_mode: Option<SourceMode>,

    /// Base URL of the upstream file server
    #[arg(long, value_name = "URL")]
    pub upstream_url: Option<String>,

    /// Artifact catalog file
    #[arg(long, value_name = "PATH")]
    pub catalog: Option<PathBuf>,
}
