//! Environment health probes and spec CLI argv construction.

use crate::ports::ToolLocator;
use crate::types::{EnvironmentMode, HealthStatus};
use serde::{Deserialize, Serialize};

pub const NODE: &str = "node";
pub const OPENSPEC: &str = "openspec";
pub const GIT: &str = "git";
pub const NPX: &str = "npx";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentCheck {
    pub key: String,
    pub label: String,
    pub required: bool,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentHealth {
    pub mode: EnvironmentMode,
    pub status: HealthStatus,
    pub checks: Vec<EnvironmentCheck>,
    pub blockers: Vec<String>,
    pub hints: Vec<String>,
}

impl EnvironmentHealth {
    pub fn is_blocked(&self) -> bool {
        self.status == HealthStatus::Blocked
    }

    /// Raise the status to at least `floor`.
    pub fn degrade_to(&mut self, floor: HealthStatus) {
        self.status = self.status.max(floor);
    }
}

struct Probe {
    key: &'static str,
    label: &'static str,
    required: bool,
    hint: &'static str,
}

fn probes(mode: EnvironmentMode) -> [Probe; 3] {
    [
        Probe {
            key: NODE,
            label: "Node.js",
            required: true,
            hint: "Install Node.js 20+ so the spec CLI can run.",
        },
        Probe {
            key: OPENSPEC,
            label: "OpenSpec CLI",
            required: mode == EnvironmentMode::Byo,
            hint: match mode {
                EnvironmentMode::Byo => {
                    "Install the OpenSpec CLI globally (npm i -g @fission-ai/openspec) or switch to managed mode."
                }
                EnvironmentMode::Managed => "Managed mode runs the OpenSpec CLI through npx.",
            },
        },
        Probe {
            key: GIT,
            label: "git",
            required: false,
            hint: "Install git to record git links on changes.",
        },
    ]
}

/// Run the three independent probes. Required failures block, optional
/// failures degrade.
pub fn probe_environment(mode: EnvironmentMode, tools: &dyn ToolLocator) -> EnvironmentHealth {
    let mut health = EnvironmentHealth {
        mode,
        status: HealthStatus::Healthy,
        checks: Vec::new(),
        blockers: Vec::new(),
        hints: Vec::new(),
    };

    for probe in probes(mode) {
        let found = tools.locate(probe.key);
        let ok = found.is_some();
        let detail = match &found {
            Some(path) => path.display().to_string(),
            None => format!("{} not found on PATH", probe.key),
        };
        if !ok {
            if probe.required {
                health.degrade_to(HealthStatus::Blocked);
                health
                    .blockers
                    .push(format!("{} is required but was not found on PATH", probe.label));
            } else {
                health.degrade_to(HealthStatus::Degraded);
            }
            health.hints.push(probe.hint.to_string());
        }
        health.checks.push(EnvironmentCheck {
            key: probe.key.to_string(),
            label: probe.label.to_string(),
            required: probe.required,
            ok,
            detail,
        });
    }
    health
}

/// Build the argv for one spec CLI invocation.
///
/// Managed mode runs the pinned package through `npx`; bring-your-own mode
/// expects `openspec` on PATH.
pub fn spec_cli_argv(mode: EnvironmentMode, managed_package: &str, args: &[&str]) -> Vec<String> {
    let mut argv: Vec<String> = match mode {
        EnvironmentMode::Managed => vec![NPX.to_string(), "-y".to_string(), managed_package.to_string()],
        EnvironmentMode::Byo => vec![OPENSPEC.to_string()],
    };
    argv.extend(args.iter().map(|a| a.to_string()));
    argv
}
