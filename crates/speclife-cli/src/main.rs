mod cmd;
mod context;
mod output;
mod root;

use agent_bridge::Executor;
use anyhow::Context;
use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, task::TaskSubcommand};
use speclife_core::types::ActionKey;
use speclife_core::LifecycleSession;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "speclife",
    about = "Spec change lifecycle engine: inspect changes, gate actions, and drive agent-backed apply runs",
    version,
    propagate_version = true
)]
struct Cli {
    /// Workspace root (default: auto-detect from openspec/, .specify/ or .git/)
    #[arg(long, global = true, env = "SPECLIFE_ROOT")]
    root: Option<PathBuf>,

    /// Workspace id used to key persisted settings and verify outcomes
    #[arg(long, global = true, env = "SPECLIFE_WORKSPACE", default_value = "default")]
    workspace: String,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Engine configuration and workspace settings
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    #[command(flatten)]
    Session(SessionCommand),
}

/// Commands that run against a live lifecycle session.
#[derive(Subcommand)]
enum SessionCommand {
    /// Show the workspace snapshot: provider, environment, and changes
    Status,

    /// Check the tools the spec CLI needs
    Doctor,

    /// Show one change's artifacts and checklist
    Show { change: String },

    /// List the lifecycle actions for a change and what blocks them
    Actions { change: String },

    /// Read and toggle a change's task checklist
    Task {
        #[command(subcommand)]
        subcommand: TaskSubcommand,
    },

    /// Check a change's spec deltas against the current specs
    Preflight { change: String },

    /// Generate instructions for the next missing artifact of a change
    Continue { change: String },

    /// Validate a change with the spec CLI (strict)
    Verify { change: String },

    /// Archive a change into the current specs
    Archive { change: String },

    /// Initialize the spec provider in this workspace
    Bootstrap,

    /// Implement a change's tasks with an agent executor
    Apply {
        change: String,
        /// Executor to dispatch to: codex, claude, or gemini (default from config)
        #[arg(long)]
        executor: Option<Executor>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Session(SessionCommand::Apply { .. }) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    if let Err(e) = run(&root, &cli.workspace, cli.command, cli.json) {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(root: &Path, workspace: &str, command: Commands, json: bool) -> anyhow::Result<()> {
    let command = match command {
        Commands::Config { subcommand } => return cmd::config::run(root, workspace, subcommand, json),
        Commands::Session(command) => command,
    };

    let session = context::open_session(root, workspace)?;
    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    rt.block_on(dispatch(&session, command, json))
}

async fn dispatch(session: &LifecycleSession, command: SessionCommand, json: bool) -> anyhow::Result<()> {
    match command {
        SessionCommand::Status => cmd::status::run(session, json).await,
        SessionCommand::Doctor => cmd::status::doctor(session, json),
        SessionCommand::Show { change } => cmd::change::show(session, &change, json).await,
        SessionCommand::Actions { change } => cmd::change::actions(session, &change, json).await,
        SessionCommand::Task { subcommand } => cmd::task::run(session, subcommand, json).await,
        SessionCommand::Preflight { change } => cmd::change::preflight(session, &change, json).await,
        SessionCommand::Continue { change } => {
            cmd::action::run(session, ActionKey::Continue, &change, json).await
        }
        SessionCommand::Verify { change } => {
            cmd::action::run(session, ActionKey::Verify, &change, json).await
        }
        SessionCommand::Archive { change } => {
            cmd::action::run(session, ActionKey::Archive, &change, json).await
        }
        SessionCommand::Bootstrap => cmd::action::bootstrap(session, json).await,
        SessionCommand::Apply { change, executor } => {
            cmd::apply::run(session, &change, executor, json).await
        }
    }
}
