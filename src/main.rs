// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agentvisor entry point - run, check and call commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;

use agentvisor::config::{find_config_file, load_config_file, FileConfigSource};
use agentvisor::process::StreamTag;
use agentvisor::telemetry::{init_telemetry, TelemetryConfig};
use agentvisor::{
    EntityStatus, MemoryStore, PersistenceSink, SqliteStore, Supervisor, SupervisorEvent,
    SupervisorSettings, VERSION,
};

/// Agentvisor - supervise AI assistants, swarms and MCP tool servers.
#[derive(Parser)]
#[command(name = "agentvisor")]
#[command(author, version, about = "Supervise AI assistants, swarms and MCP tool servers", long_about = None)]
struct Cli {
    /// Show debug logs
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Show trace logs with file and line information
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every enabled entity and supervise until Ctrl-C
    Run {
        /// Configuration file (defaults to the workspace or global config)
        #[arg(short, long, env = "AGENTVISOR_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Validate the configuration and list its entities
    Check {
        #[arg(short, long, env = "AGENTVISOR_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Start one tool server, call a tool and print the result
    Call {
        /// Tool server id
        server: String,
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
        #[arg(short, long, env = "AGENTVISOR_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = if cli.debug {
        TelemetryConfig::development().with_level(tracing::Level::TRACE)
    } else if cli.verbose {
        TelemetryConfig::development()
    } else {
        TelemetryConfig::default().with_level(tracing::Level::WARN)
    };
    let _guard = init_telemetry(&telemetry)?;

    match cli.command {
        Commands::Run { config } => run(config).await,
        Commands::Check { config } => check(config),
        Commands::Call {
            server,
            tool,
            args,
            config,
        } => call(config, &server, &tool, &args).await,
    }
}

fn resolve_config(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let cwd = std::env::current_dir()?;
    match find_config_file(&cwd) {
        Some(path) => Ok(path),
        None => bail!(
            "No configuration found in {} or ~/.agentvisor (try --config)",
            cwd.display()
        ),
    }
}

fn open_store(settings: &SupervisorSettings) -> anyhow::Result<Arc<dyn PersistenceSink>> {
    match settings.database_path() {
        Some(path) => {
            let store = SqliteStore::open(&path)
                .with_context(|| format!("Failed to open database {}", path.display()))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

async fn build_supervisor(path: &Path) -> anyhow::Result<Arc<Supervisor>> {
    let loaded = load_config_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    loaded.validate()?;

    let store = open_store(&loaded.settings)?;
    let source = Arc::new(FileConfigSource::new(path));
    Ok(Supervisor::with_settings(source, store, loaded.settings))
}

async fn run(config: Option<PathBuf>) -> anyhow::Result<()> {
    let path = resolve_config(config)?;
    println!(
        "{} {} using {}",
        "agentvisor".bold(),
        VERSION,
        path.display().to_string().dimmed()
    );

    let supervisor = build_supervisor(&path).await?;
    let mut events = supervisor.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    for (id, outcome) in supervisor.start_enabled().await? {
        match outcome {
            Ok(snapshot) => println!("{} {} ({})", "started".green(), id.bold(), snapshot.status),
            Err(e) => eprintln!("{} {}: {}", "failed".red(), id.bold(), e),
        }
    }
    supervisor.spawn_health_monitor();

    tokio::signal::ctrl_c().await?;
    println!("\n{}", "Shutting down...".yellow());

    let result = supervisor.shutdown_all().await;
    printer.abort();
    result?;
    Ok(())
}

fn check(config: Option<PathBuf>) -> anyhow::Result<()> {
    let path = resolve_config(config)?;
    let loaded = load_config_file(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    let mut ids: Vec<&String> = loaded.entities.keys().collect();
    ids.sort();

    let mut invalid = 0;
    for id in ids {
        let entity = &loaded.entities[id];
        let target = entity
            .command
            .as_deref()
            .or(entity.url.as_deref())
            .unwrap_or("-");
        let state = if entity.enabled {
            "enabled".green()
        } else {
            "disabled".dimmed()
        };
        match entity.validate(id) {
            Ok(()) => println!("  {} {:<12} {:<8} {} {}", "✓".green(), id, entity.kind.as_str(), state, target.dimmed()),
            Err(e) => {
                invalid += 1;
                println!("  {} {:<12} {}", "✗".red(), id, e.to_string().red());
            }
        }
    }

    if invalid > 0 {
        bail!("{} invalid entit{}", invalid, if invalid == 1 { "y" } else { "ies" });
    }
    println!("{} {}", "Configuration OK:".green(), path.display());
    Ok(())
}

async fn call(config: Option<PathBuf>, server: &str, tool: &str, args: &str) -> anyhow::Result<()> {
    let arguments: serde_json::Value =
        serde_json::from_str(args).context("--args must be valid JSON")?;
    if !arguments.is_object() {
        bail!("--args must be a JSON object");
    }

    let path = resolve_config(config)?;
    let supervisor = build_supervisor(&path).await?;

    let outcome = async {
        let snapshot = supervisor.start(server).await?;
        if snapshot.status != EntityStatus::Running {
            bail!(
                "{} did not start: {}",
                server,
                snapshot.last_error.unwrap_or_else(|| snapshot.status.to_string())
            );
        }
        Ok::<_, anyhow::Error>(supervisor.call_tool(server, tool, arguments).await?)
    }
    .await;

    supervisor.shutdown_all().await?;

    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn print_event(event: &SupervisorEvent) {
    match event {
        SupervisorEvent::StatusChanged {
            entity_id,
            status,
            error,
        } => {
            let label = match status {
                EntityStatus::Running => status.to_string().green(),
                EntityStatus::Errored => status.to_string().red(),
                EntityStatus::Starting | EntityStatus::Stopping => status.to_string().yellow(),
                _ => status.to_string().dimmed(),
            };
            match error {
                Some(error) => println!("[{}] {} ({})", entity_id.bold(), label, error.red()),
                None => println!("[{}] {}", entity_id.bold(), label),
            }
        }
        SupervisorEvent::Output {
            entity_id,
            stream,
            text,
        } => {
            let text = text.trim_end();
            match stream {
                StreamTag::Stderr => println!("[{}] {}", entity_id.dimmed(), text.yellow()),
                StreamTag::System => println!("[{}] {}", entity_id.dimmed(), text.cyan()),
                StreamTag::Stdout => println!("[{}] {}", entity_id.dimmed(), text),
            }
        }
        SupervisorEvent::ToolCatalogUpdated {
            entity_id,
            tool_count,
        } => println!("[{}] {} tools available", entity_id.bold(), tool_count),
    }
}
