use crate::error::Result;
use crate::paths;
use agent_bridge::Executor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Engine tunables, read from `.speclife/config.yaml`. Every field is optional
/// in the file; a missing file means all defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout for spec CLI commands (instructions, validate, archive, init).
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Hard limit on one agent turn.
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,
    /// Interval between heartbeat log lines during a synchronous agent call.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_debounce")]
    pub refresh_debounce_ms: u64,
    #[serde(default = "default_timeline_capacity")]
    pub timeline_capacity: usize,
    /// Artifact reads beyond this many bytes are truncated.
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: usize,
    #[serde(default)]
    pub default_executor: Executor,
    /// Package spec passed to `npx` in managed mode.
    #[serde(default = "default_managed_package")]
    pub managed_package: String,
}

fn default_command_timeout() -> u64 {
    180
}

fn default_agent_timeout() -> u64 {
    15 * 60
}

fn default_heartbeat() -> u64 {
    30
}

fn default_debounce() -> u64 {
    900
}

fn default_timeline_capacity() -> usize {
    80
}

fn default_max_read_bytes() -> usize {
    512 * 1024
}

fn default_managed_package() -> String {
    "@fission-ai/openspec@latest".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            agent_timeout_secs: default_agent_timeout(),
            heartbeat_secs: default_heartbeat(),
            refresh_debounce_ms: default_debounce(),
            timeline_capacity: default_timeline_capacity(),
            max_read_bytes: default_max_read_bytes(),
            default_executor: Executor::default(),
            managed_package: default_managed_package(),
        }
    }
}

impl EngineConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }

    /// Load from `root`, falling back to defaults when the file is absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: EngineConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.command_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "command_timeout_secs must be greater than 0".to_string(),
            });
        }
        if self.agent_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "agent_timeout_secs must be greater than 0".to_string(),
            });
        }
        if self.heartbeat_secs >= self.agent_timeout_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "heartbeat_secs={} is not shorter than agent_timeout_secs={}; no heartbeat will be logged",
                    self.heartbeat_secs, self.agent_timeout_secs
                ),
            });
        }
        if self.timeline_capacity == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "timeline_capacity must be at least 1".to_string(),
            });
        }
        if self.refresh_debounce_ms > 10_000 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "refresh_debounce_ms={} (>10s delays background refreshes noticeably)",
                    self.refresh_debounce_ms
                ),
            });
        }
        if self.managed_package.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "managed_package is empty; managed mode cannot run the spec CLI".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.command_timeout(), Duration::from_secs(180));
        assert_eq!(cfg.agent_timeout(), Duration::from_secs(900));
        assert_eq!(cfg.timeline_capacity, 80);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".speclife")).unwrap();
        std::fs::write(
            dir.path().join(".speclife/config.yaml"),
            "agent_timeout_secs: 60\ndefault_executor: claude\n",
        )
        .unwrap();
        let cfg = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.agent_timeout_secs, 60);
        assert_eq!(cfg.default_executor, Executor::Claude);
        assert_eq!(cfg.refresh_debounce_ms, 900);
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let cfg = EngineConfig {
            timeline_capacity: 10,
            ..Default::default()
        };
        cfg.save(dir.path()).unwrap();
        assert_eq!(EngineConfig::load(dir.path()).unwrap(), cfg);
    }

    #[test]
    fn default_config_has_no_warnings() {
        assert!(EngineConfig::default().validate().is_empty());
    }

    #[test]
    fn validate_flags_zero_timeouts() {
        let cfg = EngineConfig {
            command_timeout_secs: 0,
            timeline_capacity: 0,
            ..Default::default()
        };
        let warnings = cfg.validate();
        assert_eq!(
            warnings
                .iter()
                .filter(|w| w.level == WarnLevel::Error)
                .count(),
            2
        );
    }

    #[test]
    fn validate_warns_on_long_heartbeat() {
        let cfg = EngineConfig {
            heartbeat_secs: 1000,
            ..Default::default()
        };
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("heartbeat_secs"));
    }
}
