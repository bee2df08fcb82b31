//! CLI command definitions and dispatch.

pub mod config;
pub mod convert;
pub mod probe;
pub mod stream;

use clap::{Args, Parser, Subcommand};

use audiodrop_converter::ConversionRequest;
use audiodrop_core::config::AppConfig;
use audiodrop_core::error::AppError;

use crate::output::OutputFormat;

/// Audiodrop: convert online videos to MP3
#[derive(Debug, Parser)]
#[command(name = "audiodrop", version, about, long_about = None)]
pub struct Cli {
    /// Path to a configuration file merged over config/default.toml
    #[arg(short, long)]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Queue one or more conversions and wait for them
    Convert(convert::ConvertArgs),
    /// Convert one source straight to stdout or a file
    Stream(stream::StreamArgs),
    /// Show what a conversion would produce
    Probe(probe::ProbeArgs),
    /// Configuration management
    Config(config::ConfigArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self, config: AppConfig) -> Result<(), AppError> {
        match &self.command {
            Commands::Convert(args) => convert::execute(args, config, self.format).await,
            Commands::Stream(args) => stream::execute(args, config).await,
            Commands::Probe(args) => probe::execute(args, config, self.format).await,
            Commands::Config(args) => config::execute(args, config, self.format).await,
        }
    }
}

/// Request options shared by `convert` and `stream`
#[derive(Debug, Clone, Args)]
pub struct RequestArgs {
    /// Output quality (64k, 128k, 192k, 256k, 320k)
    #[arg(short, long)]
    pub quality: Option<String>,

    /// Trim start (HH:MM:SS or MM:SS)
    #[arg(long)]
    pub start: Option<String>,

    /// Trim end (HH:MM:SS or MM:SS)
    #[arg(long)]
    pub end: Option<String>,
}

impl RequestArgs {
    /// Build a request for `url`.
    pub fn request(&self, url: &str) -> ConversionRequest {
        ConversionRequest {
            url: url.to_string(),
            quality: self.quality.clone(),
            start_time: self.start.clone(),
            end_time: self.end.clone(),
            priority: 0,
        }
    }
}
