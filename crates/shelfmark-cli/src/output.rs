//! Human and JSON rendering for `shm` results.
//!
//! Human output uses the same framing everywhere: a heading, a rule, then
//! left-aligned key/value lines. JSON output is the serialized report,
//! pretty-printed, one document per invocation.

use std::io::{self, Write};

use serde::Serialize;
use shelfmark_core::model::{BookmarkTree, ItemType};

use crate::script::{RunReport, StepReport, StepStatus};

/// Shared width for human separators.
pub const PRETTY_RULE_WIDTH: usize = 72;

/// Write a horizontal separator.
pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Render a left-aligned key/value line.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<14} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Render a serializable value to `w`, calling `human_fn` outside JSON mode.
pub fn render<T: Serialize>(
    w: &mut dyn Write,
    mode: OutputMode,
    value: &T,
    human_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut *w, value)?;
            writeln!(w)?;
        }
        OutputMode::Human => human_fn(value, w)?,
    }
    Ok(())
}

/// A structured top-level failure, printed to stderr.
#[derive(Debug, Serialize)]
pub struct CliError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Render an error to stderr in the requested format.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({ "error": error });
            serde_json::to_writer_pretty(&mut out, &wrapper)?;
            writeln!(out)?;
        }
        OutputMode::Human => {
            writeln!(out, "error: {}", error.message)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Run reports
// ---------------------------------------------------------------------------

pub fn render_report_human(report: &RunReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Steps")?;
    for step in &report.steps {
        write_step(w, step)?;
    }
    writeln!(w)?;

    pretty_section(w, "History")?;
    pretty_kv(w, "entries", report.history.length.to_string())?;
    pretty_kv(w, "undo position", report.history.undo_position.to_string())?;
    for (i, kinds) in report.history.entries.iter().enumerate() {
        let marker = if i < report.history.undo_position {
            "redo"
        } else {
            "undo"
        };
        pretty_kv(w, &format!("[{i}] {marker}"), kinds.join(", "))?;
    }
    writeln!(w)?;

    pretty_section(w, "Tree")?;
    if let Some(tree) = &report.tree {
        write_tree(w, tree, 0)?;
    }
    Ok(())
}

fn write_step(w: &mut dyn Write, step: &StepReport) -> io::Result<()> {
    let status = match step.status {
        StepStatus::Applied => "ok",
        StepStatus::NotApplicable => "n/a",
        StepStatus::Failed => "FAILED",
    };
    write!(w, "#{:<3} {:<9} {status:<7}", step.index, step.step)?;
    if !step.kinds.is_empty() {
        write!(w, " {}", step.kinds.join(", "))?;
    }
    writeln!(w)?;
    for guid in &step.created {
        writeln!(w, "       created {guid}")?;
    }
    if let Some(error) = &step.error {
        writeln!(w, "       {}: {}", error.code, error.message)?;
        if let Some(hint) = error.hint {
            writeln!(w, "       hint: {hint}")?;
        }
    }
    if let Some(tree) = &step.tree {
        write_tree(w, tree, 1)?;
    }
    Ok(())
}

/// One line per node, children indented under their folder.
pub fn write_tree(w: &mut dyn Write, node: &BookmarkTree, depth: usize) -> io::Result<()> {
    let indent = "  ".repeat(depth);
    let label = match node.item_type {
        ItemType::Separator => "----".to_string(),
        ItemType::Folder if node.is_livemark() => {
            format!("{} (livemark)", node.title.as_deref().unwrap_or(""))
        }
        ItemType::Folder => node.title.clone().unwrap_or_default(),
        ItemType::Bookmark => {
            let url = node.url.as_ref().map_or("", |u| u.as_str());
            match node.title.as_deref() {
                Some(title) if !title.is_empty() => format!("{title} <{url}>"),
                _ => format!("<{url}>"),
            }
        }
    };
    write!(w, "{indent}{} {label} [{}]", node.item_type, node.guid)?;
    if !node.tags.is_empty() {
        write!(w, " tags={}", node.tags.join(","))?;
    }
    if let Some(keyword) = &node.keyword {
        write!(w, " keyword={keyword}")?;
    }
    writeln!(w)?;
    for child in &node.children {
        write_tree(w, child, depth + 1)?;
    }
    Ok(())
}
