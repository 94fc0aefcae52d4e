mod cli;

use matchbox::{catalog, config, orchestrator::Orchestrator, server};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use tokio_util::sync::CancellationToken;

async fn start(
    host: Option<String>,
    port: Option<u16>,
    event: Option<String>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags override the file
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(event) = event {
        config.event_code = event;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting MatchBox for event {}", config.event_code);
    tracing::info!(
        "Clip server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    let orchestrator = Orchestrator::builder(config).start().await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            server::shutdown_signal().await;
            shutdown.cancel();
        }
    });

    orchestrator.run(shutdown).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "matchbox=trace,matchbox_av=trace,matchbox_common=debug,tower_http=debug".to_string()
        } else {
            "matchbox=debug,matchbox_av=debug,matchbox_common=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port, event } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start(host, port, event, cli.config.as_deref()))
        }
        Commands::Validate { config } => validate_config(config.as_deref().or(cli.config.as_deref())),
        Commands::CheckTools => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_tools(cli.config.as_deref()))
        }
        Commands::ListClips => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(list_clips(cli.config.as_deref()))
        }
        Commands::Version => {
            println!("matchbox {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    println!("Checking ffmpeg for .{} clips...\n", config.clips.container);

    let ffmpeg = match matchbox_av::locate_ffmpeg(config.tools.ffmpeg_path.as_deref()) {
        Ok(path) => path,
        Err(e) => {
            println!("✗ {}", e);
            return Ok(());
        }
    };

    match matchbox_av::check_extraction(&ffmpeg, &config.clips.container).await {
        Ok(check) if check.muxer_supported => println!("✓ {}", check.describe()),
        Ok(check) => {
            println!("✗ {}", check.describe());
            println!("\nPick a container this ffmpeg can write with clips.container.");
        }
        Err(e) => println!("✗ {} could not be run: {}", ffmpeg.display(), e),
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            let scenes = config::scene_map(&config.fields)?;
            println!("✓ Configuration is valid");
            println!("  Event: {}", config.event_code);
            println!(
                "  Scoring feed: {}:{}",
                config.scoring.host, config.scoring.port
            );
            println!(
                "  Controller: {}:{}",
                config.controller.host, config.controller.port
            );
            println!("  Fields: {}", config.fields.count);
            let mut mapped: Vec<_> = scenes.into_iter().collect();
            mapped.sort();
            for (field, scene) in mapped {
                println!("    {} -> {}", field, scene);
            }
            println!("  Clips: {}", config.event_clips_dir().display());
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Clips: {}", config.clips.output_dir.display());
        }
    }

    Ok(())
}

async fn list_clips(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let dir = config.event_clips_dir();
    let artifacts = catalog::scan_artifacts(&dir).await?;

    if artifacts.is_empty() {
        println!("No clips in {}", dir.display());
        return Ok(());
    }

    println!("{} clip(s) in {}:\n", artifacts.len(), dir.display());
    for artifact in &artifacts {
        let modified = artifact
            .modified
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "  {:<40} {:>8.1} MB  {}",
            artifact.name,
            artifact.size_mb(),
            modified
        );
    }

    Ok(())
}
