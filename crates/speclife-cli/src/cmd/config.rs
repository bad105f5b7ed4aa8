use crate::context::open_session;
use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use speclife_core::config::{EngineConfig, WarnLevel};
use speclife_core::ports::WorkspaceSettings;
use speclife_core::paths;
use speclife_core::types::EnvironmentMode;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show the effective engine config and workspace settings
    Show,

    /// Validate the config for common mistakes
    Validate,

    /// Write the default config to .speclife/config.yaml
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Set how the spec CLI is provided: managed (npx) or byo (openspec on PATH)
    Mode { mode: EnvironmentMode },

    /// Read changes from an external spec root instead of the workspace
    Root {
        /// Absolute path of the external root
        #[arg(required_unless_present = "clear")]
        path: Option<PathBuf>,
        /// Go back to the workspace's own openspec/ directory
        #[arg(long, conflicts_with = "path")]
        clear: bool,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, workspace: &str, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, workspace, json),
        ConfigSubcommand::Validate => validate(root, json),
        ConfigSubcommand::Init { force } => init(root, force),
        ConfigSubcommand::Mode { mode } => {
            let session = open_session(root, workspace)?;
            let settings = session
                .set_environment_mode(mode)
                .context("failed to save environment mode")?;
            print_settings(&settings, json)
        }
        ConfigSubcommand::Root { path, clear } => {
            let path = if clear { None } else { path };
            let session = open_session(root, workspace)?;
            let settings = session
                .set_custom_root(path)
                .context("failed to save custom root")?;
            print_settings(&settings, json)
        }
    }
}

// ---------------------------------------------------------------------------
// show / validate / init
// ---------------------------------------------------------------------------

fn show(root: &Path, workspace: &str, json: bool) -> anyhow::Result<()> {
    let config = EngineConfig::load(root).context("failed to load config")?;
    let session = open_session(root, workspace)?;
    let settings = session.settings();

    if json {
        return print_json(&serde_json::json!({
            "config": config,
            "settings": settings,
        }));
    }

    println!("Command timeout:    {}s", config.command_timeout_secs);
    println!("Agent timeout:      {}s", config.agent_timeout_secs);
    println!("Heartbeat:          {}s", config.heartbeat_secs);
    println!("Refresh debounce:   {}ms", config.refresh_debounce_ms);
    println!("Timeline capacity:  {}", config.timeline_capacity);
    println!("Max read bytes:     {}", config.max_read_bytes);
    println!("Default executor:   {}", config.default_executor);
    println!("Managed package:    {}", config.managed_package);
    println!();
    print_settings(&settings, false)
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = EngineConfig::load(root).context("failed to load config")?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

fn init(root: &Path, force: bool) -> anyhow::Result<()> {
    let path = paths::config_path(root);
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    EngineConfig::default()
        .save(root)
        .context("failed to write config")?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn print_settings(settings: &WorkspaceSettings, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(settings);
    }
    println!("Mode:               {}", settings.mode);
    match &settings.custom_root {
        Some(p) => println!("Spec root:          {}", p.display()),
        None => println!("Spec root:          (workspace)"),
    }
    Ok(())
}
