//! Per-scope audit trail of lifecycle actions.

use crate::ports::VerifyOutcome;
use crate::types::TimelineKind;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::OnceLock;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Validation issues
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: IssueLevel,
    pub message: String,
}

static ISSUE_RE: OnceLock<Regex> = OnceLock::new();

/// Pull `ERROR`/`WARNING` lines out of `validate` output.
///
/// Accepts `✗ [ERROR] msg`, `ERROR: msg`, `⚠ [WARN] msg` and similar.
pub fn parse_validation_issues(output: &str) -> Vec<ValidationIssue> {
    let re = ISSUE_RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:[✗✘×⚠!*-]\s*)?\[?(error|warn(?:ing)?)\]?\s*[:\-]?\s+(.+)$").unwrap()
    });
    output
        .lines()
        .filter_map(|line| re.captures(line))
        .map(|c| ValidationIssue {
            level: if c[1].eq_ignore_ascii_case("error") {
                IssueLevel::Error
            } else {
                IssueLevel::Warning
            },
            message: c[2].trim().to_string(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// TimelineEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub kind: TimelineKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_id: Option<String>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_issues: Vec<ValidationIssue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub git_refs: Vec<String>,
}

impl TimelineEvent {
    pub fn new(kind: TimelineKind, action: impl Into<String>, change_id: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            kind,
            change_id: change_id.map(str::to_string),
            action: action.into(),
            command: None,
            success: true,
            output: String::new(),
            validation_issues: Vec::new(),
            git_refs: Vec::new(),
        }
    }

    pub fn with_command(mut self, argv: &[String]) -> Self {
        self.command = Some(argv.join(" "));
        self
    }

    pub fn with_result(mut self, success: bool, output: impl Into<String>) -> Self {
        self.success = success;
        self.output = output.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

/// Bounded append-only ring buffer; the oldest event falls off when full.
#[derive(Debug, Clone)]
pub struct Timeline {
    events: VecDeque<TimelineEvent>,
    capacity: usize,
}

impl Timeline {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: TimelineEvent) {
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Oldest first.
    pub fn events(&self) -> Vec<TimelineEvent> {
        self.events.iter().cloned().collect()
    }

    /// The most recent validate event recorded for `change_id`.
    pub fn last_verify(&self, change_id: &str) -> Option<VerifyOutcome> {
        self.events
            .iter()
            .rev()
            .find(|e| e.kind == TimelineKind::Validate && e.change_id.as_deref() == Some(change_id))
            .map(|e| VerifyOutcome {
                success: e.success,
                at: e.at,
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
