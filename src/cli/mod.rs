//! Command-line interface for irops.
//!
//! Provides commands for ingesting a report, running the HTTP server with
//! its worker pool and recovery poller, inspecting stored decisions and
//! showing the resolved configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::OpenAiAdapter;
use crate::agents::{AgentRegistry, MonitoringAgent};
use crate::api::{self, ApiState};
use crate::config::{self, ResolvedConfig};
use crate::core::{build_gateway, DecisionPoller, DecisionStore, DispatchQueue, IngestPipeline, WorkerPool};
use crate::domain::DecisionStatus;

/// irops - incident report ingestion, routing and dispatch
#[derive(Parser, Debug)]
#[command(name = "irops")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest one PDF report and print the routing result
    Ingest {
        /// Report file (PDF)
        file: PathBuf,

        /// Keep workers running until every dispatched task has finished
        #[arg(long)]
        wait: bool,
    },

    /// Run the HTTP server, worker pool and recovery poller
    Serve {
        /// Address to bind to
        #[arg(short, long, default_value = "127.0.0.1:8000")]
        address: SocketAddr,
    },

    /// List stored decisions, newest first
    Decisions {
        /// Filter by status (pending, processing, processed, failed)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of decisions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show resolved configuration
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Ingest { file, wait } => ingest(file, wait).await,
            Commands::Serve { address } => serve(address).await,
            Commands::Decisions { status, limit } => list_decisions(status, limit).await,
            Commands::Config => show_config(),
        }
    }
}

/// Everything a running process shares
struct Services {
    pipeline: IngestPipeline,
    registry: Arc<AgentRegistry>,
}

fn build_services(cfg: &ResolvedConfig) -> Result<Services> {
    let reasoner = Arc::new(OpenAiAdapter::from_settings(&cfg.reasoning)?);
    let gateway = build_gateway(cfg, reasoner);

    let store = DecisionStore::open(&cfg.database)
        .with_context(|| format!("Failed to open decision store: {}", cfg.database.display()))?;

    let registry = Arc::new(AgentRegistry::from_config(
        &cfg.agents,
        Arc::new(MonitoringAgent::new()),
    ));

    let pipeline = IngestPipeline::from_config(cfg, gateway, store, DispatchQueue::new(), Arc::clone(&registry));

    Ok(Services { pipeline, registry })
}

fn spawn_workers(cfg: &ResolvedConfig, services: &Services) -> WorkerPool {
    WorkerPool::spawn(
        cfg.dispatch.workers,
        services.pipeline.queue().clone(),
        Arc::clone(&services.registry),
        cfg.dispatch.handler_timeout(),
    )
}

/// Ingest a single report from disk
async fn ingest(file: PathBuf, wait: bool) -> Result<()> {
    let cfg = config::config()?;
    let services = build_services(cfg)?;

    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read report: {}", file.display()))?;
    let filename = file.file_name().map(|n| n.to_string_lossy().into_owned());

    let pool = spawn_workers(cfg, &services);

    let response = services
        .pipeline
        .ingest_document(filename, bytes)
        .await
        .with_context(|| format!("Failed to ingest {}", file.display()))?;

    println!("{}", serde_json::to_string_pretty(&response)?);

    if wait {
        services.pipeline.queue().wait_idle().await;
        eprintln!("All dispatched tasks finished");
    } else if services.pipeline.queue().outstanding() > 0 {
        eprintln!(
            "{} task(s) still queued; pending decisions are picked up by `irops serve`",
            services.pipeline.queue().outstanding()
        );
    }

    pool.shutdown();
    Ok(())
}

/// Run server, workers and poller until stopped
async fn serve(address: SocketAddr) -> Result<()> {
    let cfg = config::config()?;
    let services = build_services(cfg)?;

    let _pool = spawn_workers(cfg, &services);

    let poller = DecisionPoller::new(
        services.pipeline.store().clone(),
        services.pipeline.queue().clone(),
        Arc::clone(&services.registry),
        cfg.dispatch.poll_interval(),
        cfg.dispatch.fetch_limit,
    );
    tokio::spawn(poller.run());

    api::serve(
        address,
        ApiState {
            pipeline: services.pipeline,
        },
    )
    .await
}

/// List decisions from the store
async fn list_decisions(status: Option<String>, limit: usize) -> Result<()> {
    let cfg = config::config()?;

    let status = status
        .map(|s| s.parse::<DecisionStatus>())
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;

    let store = DecisionStore::open(&cfg.database)
        .with_context(|| format!("Failed to open decision store: {}", cfg.database.display()))?;
    let records = store.list(status, limit).await?;

    if records.is_empty() {
        println!("No decisions found");
        return Ok(());
    }

    println!(
        "{:<6} {:<16} {:<11} {:<10} {:<20} AGENTS",
        "ID", "EVENT", "STATUS", "SEVERITY", "CREATED"
    );
    println!("{}", "-".repeat(100));

    for record in records {
        let agents = record
            .selected_agents
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<6} {:<16} {:<11} {:<10} {:<20} {}",
            record.id,
            truncate(&record.event_id, 16),
            record.status,
            record.severity.as_deref().unwrap_or("-"),
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            agents
        );
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("irops configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Database: {}", cfg.database.display());
    println!();
    println!("Reasoning:");
    println!("  Endpoint:         {}", cfg.reasoning.endpoint);
    println!("  Extraction model: {}", cfg.reasoning.extraction_model);
    println!("  Routing model:    {}", cfg.reasoning.routing_model);
    println!("  API key env:      {}", cfg.reasoning.api_key_env);
    println!();
    println!("Limits:");
    println!(
        "  Token bucket:  {} tokens, {}/s refill",
        cfg.limits.bucket_capacity, cfg.limits.refill_per_second
    );
    println!("  Max in flight: {}", cfg.limits.max_in_flight);
    println!(
        "  Cache:         {}",
        cfg.limits
            .cache_capacity
            .map(|c| format!("{} entries (LRU)", c))
            .unwrap_or_else(|| "unbounded".to_string())
    );
    println!();
    println!("Dispatch:");
    println!("  Workers:       {}", cfg.dispatch.workers);
    println!("  Poll interval: {}s", cfg.dispatch.poll_interval_seconds);
    println!("  Fetch limit:   {}", cfg.dispatch.fetch_limit);
    println!();
    println!("Agents:");
    println!("  monitoring: built in");
    let mut bindings: Vec<_> = cfg.agents.iter().collect();
    bindings.sort_by(|a, b| a.0.cmp(b.0));
    for (name, endpoint) in bindings {
        println!("  {}: {}", name, endpoint.webhook);
    }
    if !cfg.routing_rules.is_empty() {
        println!();
        println!("Routing rules:");
        for rule in &cfg.routing_rules {
            println!("  {}: {}", rule.name, rule.description);
        }
    }

    Ok(())
}
