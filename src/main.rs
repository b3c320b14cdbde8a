use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use masdash::Dashboard;
use masdash::auth::Session;
use masdash::config::{CliOverrides, DashConfig};
use masdash::models::TaskStatus;

mod cmd;

#[derive(Parser)]
#[command(name = "masdash")]
#[command(version, about = "Terminal client for the multi-agent engineering dashboard")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Path to config.toml. Defaults to the platform config dir.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend base URL (overrides config and MASDASH_API_BASE_URL)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Realtime socket URL (overrides config and MASDASH_WS_URL)
    #[arg(long, global = true)]
    pub ws_url: Option<String>,

    /// Session bearer token (overrides MASDASH_TOKEN)
    #[arg(long, global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List tasks
    Tasks {
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        repo: Option<String>,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Show one task, optionally following its agent events
    Task {
        id: String,
        /// Keep running and print status changes and agent events
        #[arg(short, long)]
        watch: bool,
    },
    /// Create a task
    New {
        /// Repository as owner/name
        repo: String,
        /// Issue text handed to the planner
        body: String,
    },
    /// Show agent pipeline status
    Agents {
        /// Keep polling; speeds up while a merge is running
        #[arg(short, long)]
        watch: bool,
    },
    /// Merge a task's branch
    Merge {
        task_id: String,
        branch: String,
    },
    /// Chat with the orchestrator. Without a message, starts an interactive session.
    Chat {
        message: Option<String>,
        /// Load the persisted conversation first
        #[arg(long)]
        history: bool,
    },
    /// Show hosting deployment status
    Deployment,
    /// Show the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    masdash::logging::init(cli.verbose, cli.json_logs);

    let overrides = CliOverrides {
        api_url: cli.api_url.clone(),
        ws_url: cli.ws_url.clone(),
        token: cli.token.clone(),
    };
    let config = DashConfig::resolve(cli.config.as_deref(), &overrides)
        .context("Failed to load configuration")?;

    // Config display needs no client, and must not open a socket.
    let config_path = DashConfig::effective_path(cli.config.as_deref());
    if let Commands::Config = cli.command {
        return cmd::cmd_config(&config, config_path.as_deref());
    }

    let session = Arc::new(Session::new(config.token.clone()));
    let dash = Dashboard::new(&config, session).context("Failed to build dashboard client")?;
    dispatch(&dash, cli.command, config_path.as_deref()).await
}

async fn dispatch(dash: &Dashboard, command: Commands, config_path: Option<&Path>) -> Result<()> {
    match command {
        Commands::Tasks {
            status,
            repo,
            page,
            limit,
        } => cmd::cmd_tasks(dash, status, repo, page, limit).await,
        Commands::Task { id, watch } => cmd::cmd_task(dash, &id, watch).await,
        Commands::New { repo, body } => cmd::cmd_new(dash, repo, body).await,
        Commands::Agents { watch } => cmd::cmd_agents(dash, watch).await,
        Commands::Merge { task_id, branch } => cmd::cmd_merge(dash, &task_id, &branch).await,
        Commands::Chat { message, history } => cmd::cmd_chat(dash, message, history).await,
        Commands::Deployment => cmd::cmd_deployment(dash).await,
        Commands::Config => cmd::cmd_config(dash.config(), config_path),
    }
}
