//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tether", author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the download engine and run until interrupted
    Run,

    /// Fetch video information
    Info {
        #[arg(long, value_name = "URL")]
        url: String,
    },

    /// Download an audio stream
    DownloadAudio {
        #[arg(long, value_name = "URL")]
        url: String,

        #[arg(long, value_name = "ID")]
        format_id: String,

        /// Clip start: seconds or HH:MM:SS
        #[arg(long, value_name = "TIME", requires = "end")]
        start: Option<String>,

        /// Clip end: seconds or HH:MM:SS
        #[arg(long, value_name = "TIME", requires = "start")]
        end: Option<String>,
    },

    /// Download video and audio streams merged into one file
    DownloadCombined {
        #[arg(long, value_name = "URL")]
        url: String,

        #[arg(long, value_name = "ID")]
        video_format_id: String,

        #[arg(long, value_name = "ID")]
        audio_format_id: String,

        /// Clip start: seconds or HH:MM:SS
        #[arg(long, value_name = "TIME", requires = "end")]
        start: Option<String>,

        /// Clip end: seconds or HH:MM:SS
        #[arg(long, value_name = "TIME", requires = "start")]
        end: Option<String>,
    },

    /// Start the engine and print the system health report
    Health,

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print a sample configuration file
    Generate {
        /// Write to this file instead of stdout
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: Option<PathBuf>,
    },
}
