//! Requirement matching between delta documents and canonical specs.
//!
//! A delta document groups `### Requirement: <title>` blocks under level-2
//! operation headings (`## ADDED Requirements`, `## MODIFIED Requirements`,
//! ...). `MODIFIED`, `REMOVED` and `RENAMED` only make sense against an
//! existing canonical spec that already carries the named requirement; this
//! module finds the deltas that would fail that check at archive time.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeltaOp {
    Added,
    Modified,
    Removed,
    Renamed,
}

impl DeltaOp {
    pub fn as_str(self) -> &'static str {
        match self {
            DeltaOp::Added => "ADDED",
            DeltaOp::Modified => "MODIFIED",
            DeltaOp::Removed => "REMOVED",
            DeltaOp::Renamed => "RENAMED",
        }
    }

    /// Operations that reference requirements already in the target spec.
    pub fn needs_target(self) -> bool {
        !matches!(self, DeltaOp::Added)
    }

    fn from_heading(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "ADDED" => Some(DeltaOp::Added),
            "MODIFIED" => Some(DeltaOp::Modified),
            "REMOVED" => Some(DeltaOp::Removed),
            "RENAMED" => Some(DeltaOp::Renamed),
            _ => None,
        }
    }
}

impl fmt::Display for DeltaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Regexes
// ---------------------------------------------------------------------------

static OP_HEADING_RE: OnceLock<Regex> = OnceLock::new();
static LEVEL2_RE: OnceLock<Regex> = OnceLock::new();
static REQUIREMENT_RE: OnceLock<Regex> = OnceLock::new();
static FROM_RE: OnceLock<Regex> = OnceLock::new();

fn op_heading_re() -> &'static Regex {
    OP_HEADING_RE
        .get_or_init(|| Regex::new(r"(?i)^##[ \t]+(ADDED|MODIFIED|REMOVED|RENAMED)\b").unwrap())
}

fn level2_re() -> &'static Regex {
    LEVEL2_RE.get_or_init(|| Regex::new(r"^##[ \t]").unwrap())
}

fn requirement_re() -> &'static Regex {
    REQUIREMENT_RE.get_or_init(|| Regex::new(r"^###[ \t]+Requirement:[ \t]*(.+)$").unwrap())
}

fn from_re() -> &'static Regex {
    FROM_RE.get_or_init(|| {
        Regex::new(r"(?i)^[ \t]*(?:[-*][ \t]*)?FROM:[ \t]*`?(?:###[ \t]+Requirement:[ \t]*)?([^`]+)`?")
            .unwrap()
    })
}

fn normalize_title(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Titles referenced by a delta document, grouped by operation.
///
/// For `RENAMED` sections the `FROM:` title is recorded, since that is the
/// one that must already exist in the target.
pub fn delta_sections(text: &str) -> BTreeMap<DeltaOp, Vec<String>> {
    let mut sections: BTreeMap<DeltaOp, Vec<String>> = BTreeMap::new();
    let mut current: Option<DeltaOp> = None;

    for line in text.lines() {
        let line = line.trim_end();
        if let Some(caps) = op_heading_re().captures(line) {
            current = DeltaOp::from_heading(&caps[1]);
            if let Some(op) = current {
                sections.entry(op).or_default();
            }
            continue;
        }
        if level2_re().is_match(line) {
            current = None;
            continue;
        }
        let Some(op) = current else { continue };

        let title = if op == DeltaOp::Renamed {
            from_re().captures(line).map(|c| normalize_title(&c[1]))
        } else {
            requirement_re().captures(line).map(|c| normalize_title(&c[1]))
        };
        if let Some(title) = title.filter(|t| !t.is_empty()) {
            sections.entry(op).or_default().push(title);
        }
    }
    sections
}

/// Operations present as level-2 headings.
pub fn delta_operations(text: &str) -> BTreeSet<DeltaOp> {
    delta_sections(text).into_keys().collect()
}

/// Every requirement title declared in a spec document.
pub fn requirement_titles(text: &str) -> BTreeSet<String> {
    text.lines()
        .filter_map(|line| requirement_re().captures(line.trim_end()))
        .map(|c| normalize_title(&c[1]))
        .filter(|t| !t.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Preflight
// ---------------------------------------------------------------------------

/// One delta document with its resolved target.
#[derive(Debug, Clone)]
pub struct DeltaCheck {
    pub target_path: String,
    pub delta_text: String,
    /// `None` when the target is not in the file set or reads as missing.
    pub target_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivePreflight {
    pub blockers: Vec<String>,
    pub hints: Vec<String>,
}

impl ArchivePreflight {
    pub fn is_clear(&self) -> bool {
        self.blockers.is_empty()
    }
}

pub const HINT_CREATE_TARGET: &str =
    "Create the canonical spec under openspec/specs/ first, or change the delta operation to ADDED.";
pub const HINT_ALIGN_TITLES: &str =
    "Align delta requirement titles with the target spec; RENAMED sections must use the existing title in FROM:.";

/// Blockers for a single delta document, unsorted.
pub fn check_delta(check: &DeltaCheck) -> Vec<String> {
    let sections = delta_sections(&check.delta_text);
    let restrictive: Vec<(&DeltaOp, &Vec<String>)> =
        sections.iter().filter(|(op, _)| op.needs_target()).collect();
    if restrictive.is_empty() {
        return Vec::new();
    }

    let Some(target_text) = check.target_text.as_deref() else {
        let ops = restrictive
            .iter()
            .map(|(op, _)| op.as_str())
            .collect::<Vec<_>>()
            .join("/");
        return vec![format!("delta {ops} requires existing {}", check.target_path)];
    };

    let existing = requirement_titles(target_text);
    let mut blockers = Vec::new();
    for (op, titles) in restrictive {
        for title in titles {
            if !existing.contains(title) {
                blockers.push(format!(
                    "delta {op} requirement missing in {} -> {title}",
                    check.target_path
                ));
            }
        }
    }
    blockers
}

/// Deduplicated, sorted blockers plus remediation hints for a set of deltas.
pub fn archive_preflight(checks: &[DeltaCheck]) -> ArchivePreflight {
    let blockers: BTreeSet<String> = checks.iter().flat_map(check_delta).collect();
    let blockers: Vec<String> = blockers.into_iter().collect();

    let mut hints = Vec::new();
    if blockers.iter().any(|b| b.contains(" requires existing ")) {
        hints.push(HINT_CREATE_TARGET.to_string());
    }
    if blockers.iter().any(|b| b.contains(" requirement missing in ")) {
        hints.push(HINT_ALIGN_TITLES.to_string());
    }
    ArchivePreflight { blockers, hints }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
