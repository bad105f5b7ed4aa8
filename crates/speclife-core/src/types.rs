use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LifecycleError;

macro_rules! str_enum {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $s,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = LifecycleError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok($ty::$variant),)+
                    _ => Err(LifecycleError::InvalidValue(format!(
                        "{}: {s}",
                        stringify!($ty)
                    ))),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Provider / SupportLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openspec,
    Speckit,
    Unknown,
}

str_enum!(Provider {
    Openspec => "openspec",
    Speckit => "speckit",
    Unknown => "unknown",
});

impl Provider {
    pub fn support_level(self) -> SupportLevel {
        match self {
            Provider::Openspec => SupportLevel::Full,
            Provider::Speckit => SupportLevel::Minimal,
            Provider::Unknown => SupportLevel::None,
        }
    }

    pub fn is_fully_supported(self) -> bool {
        self.support_level() == SupportLevel::Full
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportLevel {
    Full,
    Minimal,
    None,
}

str_enum!(SupportLevel {
    Full => "full",
    Minimal => "minimal",
    None => "none",
});

// ---------------------------------------------------------------------------
// ChangeStatus
// ---------------------------------------------------------------------------

/// Derived lifecycle status of a change. Never stored; see `snapshot::derive_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Draft,
    Ready,
    Blocked,
    Implementing,
    Verified,
    Archived,
}

str_enum!(ChangeStatus {
    Draft => "draft",
    Ready => "ready",
    Blocked => "blocked",
    Implementing => "implementing",
    Verified => "verified",
    Archived => "archived",
});

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    P0,
    P1,
    P2,
}

str_enum!(Priority {
    P0 => "p0",
    P1 => "p1",
    P2 => "p2",
});

// ---------------------------------------------------------------------------
// ActionKey
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKey {
    Continue,
    Apply,
    Verify,
    Archive,
}

str_enum!(ActionKey {
    Continue => "continue",
    Apply => "apply",
    Verify => "verify",
    Archive => "archive",
});

impl ActionKey {
    pub fn all() -> &'static [ActionKey] {
        &[
            ActionKey::Continue,
            ActionKey::Apply,
            ActionKey::Verify,
            ActionKey::Archive,
        ]
    }

    pub fn label(self) -> &'static str {
        match self {
            ActionKey::Continue => "Continue",
            ActionKey::Apply => "Apply",
            ActionKey::Verify => "Verify",
            ActionKey::Archive => "Archive",
        }
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// `managed`: the spec CLI is fetched through `npx`. `byo`: it must be on PATH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentMode {
    #[default]
    Managed,
    Byo,
}

str_enum!(EnvironmentMode {
    Managed => "managed",
    Byo => "byo",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Blocked,
}

str_enum!(HealthStatus {
    Healthy => "healthy",
    Degraded => "degraded",
    Blocked => "blocked",
});

// ---------------------------------------------------------------------------
// Apply execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApplyStatus {
    #[default]
    Idle,
    Running,
    Success,
    Failed,
}

str_enum!(ApplyStatus {
    Idle => "idle",
    Running => "running",
    Success => "success",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyPhase {
    #[default]
    Idle,
    Preflight,
    Instructions,
    Execution,
    TaskWriteback,
    Finalize,
}

str_enum!(ApplyPhase {
    Idle => "idle",
    Preflight => "preflight",
    Instructions => "instructions",
    Execution => "execution",
    TaskWriteback => "task-writeback",
    Finalize => "finalize",
});

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimelineKind {
    Action,
    Validate,
    GitLink,
    TaskUpdate,
}

str_enum!(TimelineKind {
    Action => "action",
    Validate => "validate",
    GitLink => "git-link",
    TaskUpdate => "task-update",
});

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_support_levels() {
        assert_eq!(Provider::Openspec.support_level(), SupportLevel::Full);
        assert_eq!(Provider::Speckit.support_level(), SupportLevel::Minimal);
        assert_eq!(Provider::Unknown.support_level(), SupportLevel::None);
        assert!(!Provider::Speckit.is_fully_supported());
    }

    #[test]
    fn apply_phase_serializes_kebab_case() {
        let json = serde_json::to_string(&ApplyPhase::TaskWriteback).unwrap();
        assert_eq!(json, "\"task-writeback\"");
        assert_eq!("task-writeback".parse::<ApplyPhase>().unwrap(), ApplyPhase::TaskWriteback);
    }

    #[test]
    fn display_matches_serde() {
        for key in ActionKey::all() {
            let json = serde_json::to_string(key).unwrap();
            assert_eq!(json, format!("\"{key}\""));
        }
        assert_eq!(TimelineKind::GitLink.to_string(), "git-link");
    }

    #[test]
    fn unknown_strings_are_rejected() {
        assert!("paused".parse::<ChangeStatus>().is_err());
        assert!("P0".parse::<Priority>().is_err());
    }
}
