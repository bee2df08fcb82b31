//! Configuration management CLI commands.

use clap::{Args, Subcommand};

use audiodrop_core::config::AppConfig;
use audiodrop_core::error::AppError;

use crate::output::{self, OutputFormat};

/// Arguments for config commands
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,
    /// Check that the configuration loads and the external tools are reachable
    Validate,
}

/// Execute config commands
pub async fn execute(
    args: &ConfigArgs,
    config: AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    match &args.command {
        ConfigCommand::Show => match format {
            OutputFormat::Json => output::print_json(&config),
            OutputFormat::Table => {
                let tree = serde_json::to_value(&config)?;
                print_section_tree(&tree, "");
            }
        },
        ConfigCommand::Validate => {
            println!("✓ Configuration is valid");
            output::print_kv("Downloads", &config.conversion.downloads_dir);
            output::print_kv(
                "Concurrency",
                &config.queue.max_concurrent_jobs.to_string(),
            );
            for (binary, flag) in [
                (&config.conversion.ytdlp_binary, "--version"),
                (&config.conversion.ffmpeg_binary, "-version"),
            ] {
                let found = tokio::process::Command::new(binary)
                    .arg(flag)
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null())
                    .status()
                    .await
                    .is_ok();
                if found {
                    output::print_kv(binary, "found");
                } else {
                    output::print_warning(&format!("'{}' could not be started", binary));
                }
            }
        }
    }
    Ok(())
}

fn print_section_tree(value: &serde_json::Value, prefix: &str) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                print_section_tree(child, &path);
            }
        }
        other => output::print_kv(prefix, &other.to_string()),
    }
}
