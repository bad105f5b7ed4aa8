//! Markdown task checklist parsing.
//!
//! A checklist item is any line of the form `- [ ] text`, `* [x] text` or
//! `+ [X] text`, with any leading whitespace. Items keep two coordinates:
//! `index` (0-based among checklist lines only) and `line_number` (1-based in
//! the raw document). Agents report completion using either.

use crate::error::{LifecycleError, Result};
use crate::types::Priority;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskChecklistItem {
    pub index: usize,
    pub line_number: usize,
    /// Leading whitespace in 2-space units; a tab counts as two spaces.
    pub indent: usize,
    pub checked: bool,
    pub text: String,
    pub priority: Option<Priority>,
}

impl TaskChecklistItem {
    /// p2 items are nice-to-have and never gate archival.
    pub fn is_required(&self) -> bool {
        self.priority != Some(Priority::P2)
    }

    /// Leading dotted-numeric prefix of the text: `"4.1 Add login"` → `"4.1"`.
    pub fn dotted_ref(&self) -> Option<&str> {
        dotted_ref_re()
            .captures(&self.text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub total: usize,
    pub checked: usize,
    pub required_total: usize,
    pub required_checked: usize,
}

impl TaskProgress {
    pub fn from_items(items: &[TaskChecklistItem]) -> Self {
        items.iter().fold(Self::default(), |mut p, item| {
            p.total += 1;
            if item.checked {
                p.checked += 1;
            }
            if item.is_required() {
                p.required_total += 1;
                if item.checked {
                    p.required_checked += 1;
                }
            }
            p
        })
    }

    pub fn all_required_checked(&self) -> bool {
        self.required_checked == self.required_total
    }

    /// "3/5 tasks, 2/3 required"
    pub fn summary(&self) -> String {
        format!(
            "{}/{} tasks, {}/{} required",
            self.checked, self.total, self.required_checked, self.required_total
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskChecklist {
    pub items: Vec<TaskChecklistItem>,
    pub progress: TaskProgress,
}

impl TaskChecklist {
    pub fn get(&self, index: usize) -> Option<&TaskChecklistItem> {
        self.items.get(index)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Regexes
// ---------------------------------------------------------------------------

static ITEM_RE: OnceLock<Regex> = OnceLock::new();
static PRIORITY_RE: OnceLock<Regex> = OnceLock::new();
static DOTTED_REF_RE: OnceLock<Regex> = OnceLock::new();

fn item_re() -> &'static Regex {
    ITEM_RE.get_or_init(|| {
        Regex::new(r"^(?P<lead>[ \t]*)[-*+][ \t]+\[(?P<mark>[ xX])\](?:[ \t]+(?P<text>.*))?$")
            .unwrap()
    })
}

fn priority_re() -> &'static Regex {
    PRIORITY_RE.get_or_init(|| Regex::new(r"(?i)\s*\[(p[0-2])\]\s*$").unwrap())
}

fn dotted_ref_re() -> &'static Regex {
    DOTTED_REF_RE.get_or_init(|| Regex::new(r"^(\d+(?:\.\d+)*)\.?(?:\s|$)").unwrap())
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Split into lines, keeping each line's terminator separately so edits can
/// reassemble the document byte-for-byte.
fn split_lines(text: &str) -> impl Iterator<Item = (&str, &str)> {
    text.split_inclusive('\n').map(|raw| {
        let body = raw.trim_end_matches(['\n', '\r']);
        (body, &raw[body.len()..])
    })
}

fn indent_width(lead: &str) -> usize {
    let width: usize = lead.chars().map(|c| if c == '\t' { 2 } else { 1 }).sum();
    width / 2
}

fn parse_line(body: &str) -> Option<(usize, bool, String, Option<Priority>)> {
    let caps = item_re().captures(body)?;
    let indent = indent_width(caps.name("lead").map_or("", |m| m.as_str()));
    let checked = caps.name("mark").is_some_and(|m| m.as_str() != " ");
    let raw_text = caps.name("text").map_or("", |m| m.as_str()).trim_end();

    let (text, priority) = match priority_re().captures(raw_text) {
        Some(p) => {
            let priority = p[1].to_ascii_lowercase().parse::<Priority>().ok();
            let start = p.get(0).map_or(raw_text.len(), |m| m.start());
            (raw_text[..start].trim_end().to_string(), priority)
        }
        None => (raw_text.to_string(), None),
    };
    Some((indent, checked, text, priority))
}

/// Parse a task document into its checklist. Pure and deterministic.
pub fn parse_checklist(text: &str) -> TaskChecklist {
    let mut items = Vec::new();
    for (line_idx, (body, _)) in split_lines(text).enumerate() {
        if let Some((indent, checked, text, priority)) = parse_line(body) {
            items.push(TaskChecklistItem {
                index: items.len(),
                line_number: line_idx + 1,
                indent,
                checked,
                text,
                priority,
            });
        }
    }
    let progress = TaskProgress::from_items(&items);
    TaskChecklist { items, progress }
}

/// Rewrite only the checkbox marker of the item at `index`.
///
/// Every other byte of the document, including line endings, is preserved.
pub fn set_item_checked(text: &str, index: usize, checked: bool) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut seen = 0usize;
    let mut found = false;

    for (body, ending) in split_lines(text) {
        match item_re().captures(body) {
            Some(caps) if !found => {
                if seen == index {
                    let mark = caps.name("mark").map(|m| m.range()).unwrap_or(0..0);
                    out.push_str(&body[..mark.start]);
                    out.push(if checked { 'x' } else { ' ' });
                    out.push_str(&body[mark.end..]);
                    found = true;
                } else {
                    out.push_str(body);
                }
                seen += 1;
            }
            Some(_) => {
                out.push_str(body);
                seen += 1;
            }
            None => out.push_str(body),
        }
        out.push_str(ending);
    }

    if !found {
        return Err(LifecycleError::TaskIndexOutOfRange { index, total: seen });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
