//! Markdown digest of a cycle's decisions.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::info;

use crate::pipeline::poll_cycle::CycleSummary;
use crate::pipeline::types::Tier;

fn heading(tier: Tier) -> &'static str {
    match tier {
        Tier::Urgent => "Urgent",
        Tier::Review => "Review",
        Tier::Low => "Low",
    }
}

/// Render committed (or dry-run) decisions grouped by tier. `None` when the
/// cycle decided nothing.
pub fn render_digest(summary: &CycleSummary, date: NaiveDate) -> Option<String> {
    if summary.per_tier.total() == 0 {
        return None;
    }

    let mut out = String::new();
    let _ = writeln!(out, "# Inbox Triage Digest: {}\n", date.format("%Y-%m-%d"));
    for tier in Tier::ALL {
        let mut entries = summary.decided(tier).peekable();
        if entries.peek().is_none() {
            continue;
        }
        let _ = writeln!(out, "## {}\n", heading(tier));
        for outcome in entries {
            let subject = if outcome.subject.is_empty() {
                "(no subject)"
            } else {
                outcome.subject.as_str()
            };
            let _ = writeln!(out, "- **{}** _{}_", subject, outcome.sender);
        }
        out.push('\n');
    }
    Some(out)
}

/// Write `triage_YYYY-MM-DD.md` into `dir`, creating it if needed.
/// Returns the written path, or `None` if there was nothing to write.
pub fn export_digest(
    summary: &CycleSummary,
    dir: &Path,
    date: NaiveDate,
) -> std::io::Result<Option<PathBuf>> {
    let Some(body) = render_digest(summary, date) else {
        return Ok(None);
    };

    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("triage_{}.md", date.format("%Y-%m-%d")));
    std::fs::write(&path, body)?;
    info!(path = %path.display(), "Digest written");
    Ok(Some(path))
}
