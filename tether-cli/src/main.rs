mod cli;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tether_commands::{
    AudioDownloadRequest, CombinedDownloadRequest, CommandResponse, DesktopCore, TimeRange,
    TimeValue, VideoInfoRequest,
};
use tether_config::{ConfigLoader, LogLevel, TetherConfig};
use tether_logging::{init_logging, init_simple_tracing};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use cli::{Cli, Commands, ConfigCommands};

fn load_config(config_path: Option<&PathBuf>) -> Result<TetherConfig> {
    ConfigLoader::new()
        .load(config_path)
        .context("Failed to load configuration")
}

/// Seconds when numeric, otherwise a clock string for the worker to parse
fn time_value(raw: &str) -> TimeValue {
    match raw.parse::<f64>() {
        Ok(seconds) => TimeValue::Seconds(seconds),
        Err(_) => TimeValue::Clock(raw.to_string()),
    }
}

fn time_range(start: Option<String>, end: Option<String>) -> Option<TimeRange> {
    match (start, end) {
        (Some(start), Some(end)) => Some(TimeRange {
            start: time_value(&start),
            end: time_value(&end),
        }),
        _ => None,
    }
}

fn print_response(response: &CommandResponse) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(response).context("Failed to render command response")?;
    println!("{}", rendered);
    Ok(())
}

async fn start_core(config: TetherConfig) -> Result<DesktopCore> {
    let core = DesktopCore::new(config).context("Failed to initialise the download engine")?;
    if let Err(e) = core.start().await {
        core.shutdown().await;
        return Err(e).context("Download engine failed to start");
    }
    Ok(core)
}

/// Start the engine, run one command, shut down
async fn run_command(config: TetherConfig, command: Commands) -> Result<()> {
    let core = start_core(config).await?;
    let handlers = core.handlers();

    let response = match command {
        Commands::Info { url } => handlers.get_video_info(VideoInfoRequest { url }).await,
        Commands::DownloadAudio {
            url,
            format_id,
            start,
            end,
        } => {
            handlers
                .download_audio(AudioDownloadRequest {
                    url,
                    format_id,
                    time_range: time_range(start, end),
                    title: None,
                })
                .await
        }
        Commands::DownloadCombined {
            url,
            video_format_id,
            audio_format_id,
            start,
            end,
        } => {
            handlers
                .download_combined(CombinedDownloadRequest {
                    url,
                    video_format_id,
                    audio_format_id,
                    time_range: time_range(start, end),
                    title: None,
                })
                .await
        }
        Commands::Health => handlers.get_system_health(),
        Commands::Run | Commands::Config { .. } => {
            core.shutdown().await;
            bail!("Not a one-shot command");
        }
    };

    core.shutdown().await;
    print_response(&response)?;

    match response.error {
        Some(error) => bail!("{} ({})", error.message, error.code),
        None => Ok(()),
    }
}

/// Supervise the engine until Ctrl+C, printing lifecycle events
async fn run_engine(config: TetherConfig) -> Result<()> {
    let core = DesktopCore::new(config).context("Failed to initialise the download engine")?;

    let mut events = core.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped server events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::select! {
        result = core.start() => {
            if let Err(e) = result {
                core.shutdown().await;
                printer.abort();
                return Err(e).context("Download engine failed to start");
            }
            info!("Download engine ready at {}", core.supervisor().server_url());
            signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
        }
        result = signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Interrupted during startup");
        }
    }

    info!("Shutting down");
    core.shutdown().await;
    printer.abort();
    Ok(())
}

fn handle_config_generate(output: Option<&PathBuf>, force: bool) -> Result<()> {
    let sample = TetherConfig::generate_sample();

    let Some(output) = output else {
        print!("{}", sample);
        return Ok(());
    };

    if output.exists() && !force {
        bail!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        );
    }
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    fs::write(output, sample)
        .with_context(|| format!("Failed to write configuration to {:?}", output))?;

    println!("Configuration written to {:?}", output);
    Ok(())
}

fn handle_config_validate(config_file: Option<&PathBuf>) -> Result<()> {
    if let Some(path) = config_file {
        if !path.exists() {
            bail!("Configuration file not found: {:?}", path);
        }
    }

    match load_config(config_file) {
        Ok(_) => {
            println!("Configuration is valid");
            Ok(())
        }
        Err(e) => {
            error!("Configuration validation failed: {:#}", e);
            Err(e)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Some(command) => command,
        None => {
            use clap::CommandFactory;
            Cli::command().print_help().context("Failed to print help")?;
            println!();
            return Ok(());
        }
    };

    // Config tooling runs without loading (possibly broken) configuration
    if let Commands::Config { config_cmd } = &command {
        init_simple_tracing(cli.log_level.as_deref().unwrap_or("warn"))?;
        return match config_cmd {
            ConfigCommands::Generate { output, force } => {
                handle_config_generate(output.as_ref(), *force)
            }
            ConfigCommands::Validate { config_file } => {
                handle_config_validate(config_file.as_ref().or(cli.config.as_ref()))
            }
        };
    }

    let mut config = load_config(cli.config.as_ref())?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.parse::<LogLevel>().map_err(|e| anyhow!(e))?;
    }
    init_logging(&config.logging)?;

    info!(mode = %config.engine.mode, "Tether starting");

    match command {
        Commands::Run => run_engine(config).await,
        other => run_command(config, other).await,
    }
}
