//! Output formatting for CLI operations.

use serde::Serialize;
use serde_json::json;

use modstack::engine::{PathFailure, VerifyReport};
use modstack::progress::format_bytes_iec;
use modstack::{CommitResult, FileEntry, PatchPackage, ReapplyReport, Target};

/// One row of `patch list`.
#[derive(Debug, Serialize)]
pub struct PatchRow {
    pub position: usize,
    pub id: String,
    pub enabled: bool,
    pub name: Option<String>,
    pub version: Option<String>,
    /// Set when the stored package could not be opened.
    pub error: Option<String>,
}

/// Trait for output formatting
pub trait OutputFormatter {
    /// Formats container entries
    fn format_entries(&self, entries: &[&FileEntry]) -> String;

    /// Formats the result of a container commit
    fn format_commit(&self, result: &CommitResult) -> String;

    /// Formats package information
    fn format_package(&self, package: &PatchPackage) -> String;

    /// Formats the patch stack of an installation
    fn format_patches(&self, game: &str, rows: &[PatchRow]) -> String;

    /// Formats a reapply report
    fn format_reapply(&self, report: &ReapplyReport) -> String;

    /// Formats a verify report
    fn format_verify(&self, report: &VerifyReport) -> String;
}

/// Human-readable output formatter
pub struct HumanFormatter;

fn push_failures(output: &mut String, failures: &[PathFailure]) {
    if failures.is_empty() {
        return;
    }
    output.push_str("\nFailures:\n");
    for failure in failures {
        output.push_str(&format!("  {}: {}\n", failure.target, failure.error));
    }
}

fn push_targets(output: &mut String, label: &str, targets: &[Target]) {
    if targets.is_empty() {
        return;
    }
    output.push_str(&format!("{}:\n", label));
    for target in targets {
        output.push_str(&format!("  {}\n", target));
    }
}

impl OutputFormatter for HumanFormatter {
    fn format_entries(&self, entries: &[&FileEntry]) -> String {
        let mut output = String::new();
        output.push_str(&format!("{:>12} {}\n", "Size", "Name"));
        output.push_str(&"-".repeat(50));
        output.push('\n');

        let mut total_size = 0u64;
        for entry in entries {
            total_size += entry.size();
            output.push_str(&format!(
                "{:>12} {}\n",
                format_bytes_iec(entry.size()),
                entry.path()
            ));
        }

        output.push_str(&"-".repeat(50));
        output.push('\n');
        output.push_str(&format!(
            "{} entries, {} total\n",
            entries.len(),
            format_bytes_iec(total_size)
        ));
        output
    }

    fn format_commit(&self, result: &CommitResult) -> String {
        let mut output = format!(
            "Wrote {} entries ({}): {} kept, {} replaced, {} inserted, {} removed\n",
            result.total_entries(),
            format_bytes_iec(result.total_bytes),
            result.entries_kept,
            result.entries_replaced,
            result.entries_inserted,
            result.entries_removed
        );
        if !result.failed.is_empty() {
            output.push_str("\nFailures:\n");
            for failure in &result.failed {
                output.push_str(&format!("  {}: {}\n", failure.path, failure.error));
            }
        }
        output
    }

    fn format_package(&self, package: &PatchPackage) -> String {
        let meta = package.metadata();
        let mut output = String::new();

        output.push_str(&format!("{} {}\n", meta.name, meta.version));
        output.push_str(&"-".repeat(40));
        output.push('\n');
        output.push_str(&format!("  Id:          {}\n", meta.id));
        if !meta.author.is_empty() {
            output.push_str(&format!("  Author:      {}\n", meta.author));
        }
        if !meta.website.is_empty() {
            output.push_str(&format!("  Website:     {}\n", meta.website));
        }
        let games = if meta.target_games.is_empty() {
            "any".to_string()
        } else {
            meta.target_games.join(", ")
        };
        output.push_str(&format!("  Games:       {}\n", games));
        output.push_str(&format!("  Built:       {}\n", meta.modified));
        output.push_str(&format!(
            "  Resources:   {} ({})\n",
            package.resources().len(),
            format_bytes_iec(meta.total_size)
        ));
        output.push_str(&format!("  Removals:    {}\n", package.removed().len()));
        if !meta.description.is_empty() {
            output.push_str(&format!("\n{}\n", meta.description));
        }
        if !meta.changelog.is_empty() {
            output.push_str("\nChangelog:\n");
            for change in meta.changelog.iter().rev() {
                output.push_str(&format!(
                    "  {} ({}): {}\n",
                    change.version, change.date, change.description
                ));
            }
        }
        output
    }

    fn format_patches(&self, game: &str, rows: &[PatchRow]) -> String {
        if rows.is_empty() {
            return format!("No patches installed for {}\n", game);
        }
        let mut output = format!("Patches for {} (lowest priority first):\n", game);
        for row in rows {
            let state = if row.enabled { "on " } else { "off" };
            match (&row.version, &row.error) {
                (_, Some(error)) => output.push_str(&format!(
                    "{:>3}. [{}] {} (unreadable: {})\n",
                    row.position, state, row.id, error
                )),
                (version, None) => output.push_str(&format!(
                    "{:>3}. [{}] {} {} {}\n",
                    row.position,
                    state,
                    row.id,
                    version.as_deref().unwrap_or("-"),
                    row.name.as_deref().unwrap_or("")
                )),
            }
        }
        output
    }

    fn format_reapply(&self, report: &ReapplyReport) -> String {
        let mut output = format!(
            "Reapply {}: {} written, {} reverted, {} credited, {} unchanged\n",
            report.status(),
            report.written.len(),
            report.reverted.len(),
            report.credited.len(),
            report.unchanged
        );
        push_failures(&mut output, &report.failed);
        output
    }

    fn format_verify(&self, report: &VerifyReport) -> String {
        if report.is_clean() {
            return format!("OK - {} targets match\n", report.checked);
        }
        let mut output = format!("Checked {} targets\n", report.checked);
        push_targets(&mut output, "Drifted", &report.drifted);
        push_targets(&mut output, "Broken backups", &report.broken_backups);
        push_failures(&mut output, &report.failed);
        output
    }
}

/// JSON output formatter
pub struct JsonFormatter;

fn failures_json(failures: &[PathFailure]) -> Vec<serde_json::Value> {
    failures
        .iter()
        .map(|f| json!({"target": f.target, "error": f.error.to_string()}))
        .collect()
}

fn pretty(value: &serde_json::Value) -> String {
    let mut output = serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string());
    output.push('\n');
    output
}

impl OutputFormatter for JsonFormatter {
    fn format_entries(&self, entries: &[&FileEntry]) -> String {
        let items: Vec<_> = entries
            .iter()
            .map(|e| json!({"path": e.path(), "size": e.size()}))
            .collect();
        pretty(&json!(items))
    }

    fn format_commit(&self, result: &CommitResult) -> String {
        pretty(&json!({
            "success": result.is_complete(),
            "entries_kept": result.entries_kept,
            "entries_replaced": result.entries_replaced,
            "entries_inserted": result.entries_inserted,
            "entries_removed": result.entries_removed,
            "total_bytes": result.total_bytes,
            "failures": result
                .failed
                .iter()
                .map(|f| json!({"path": f.path, "error": f.error.to_string()}))
                .collect::<Vec<_>>(),
        }))
    }

    fn format_package(&self, package: &PatchPackage) -> String {
        pretty(&json!({
            "metadata": package.metadata(),
            "resources": package.resources().iter().map(|r| json!({
                "target": r.target,
                "size": r.size,
                "packed_size": r.packed_size,
                "digest": r.digest,
            })).collect::<Vec<_>>(),
            "removed": package.removed(),
        }))
    }

    fn format_patches(&self, game: &str, rows: &[PatchRow]) -> String {
        pretty(&json!({"game": game, "patches": rows}))
    }

    fn format_reapply(&self, report: &ReapplyReport) -> String {
        pretty(&json!({
            "status": report.status(),
            "written": report.written,
            "reverted": report.reverted,
            "credited": report.credited,
            "unchanged": report.unchanged,
            "failures": failures_json(&report.failed),
        }))
    }

    fn format_verify(&self, report: &VerifyReport) -> String {
        pretty(&json!({
            "clean": report.is_clean(),
            "checked": report.checked,
            "drifted": report.drifted,
            "broken_backups": report.broken_backups,
            "failures": failures_json(&report.failed),
        }))
    }
}

/// Creates the appropriate formatter based on output format
pub fn create_formatter(format: super::OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        super::OutputFormat::Human => Box::new(HumanFormatter),
        super::OutputFormat::Json => Box::new(JsonFormatter),
    }
}
