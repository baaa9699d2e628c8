use crate::config::{write_text, AppContext};
use anyhow::{bail, Result};
use backlog_core::cleanup::{cleanup_document, cleanup_preview, render_cleanup_report, CleanupSummary};
use backlog_core::groom::{audit, groom, DEFAULT_GROOM_COUNT};
use backlog_core::report::report_file_name;
use chrono::Local;
use clap::Args;
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Count what would change without saving
    #[arg(long)]
    pub dry_run: bool,
    /// Write a data-quality report to the reports directory
    #[arg(long)]
    pub report: bool,
}

#[derive(Args, Debug)]
pub struct GroomArgs {
    #[arg(long, default_value_t = DEFAULT_GROOM_COUNT)]
    pub count: usize,
    /// Where to write the report, defaults to backlog_grooming_report.md
    #[arg(long)]
    pub output: Option<PathBuf>,
}

fn print_summary(summary: &CleanupSummary) {
    for (label, count) in [
        ("Estimates cleaned", summary.estimates_cleaned),
        ("Epics standardized", summary.epics_standardized),
        ("Owners assigned", summary.owners_assigned),
        ("Priorities assigned", summary.priorities_assigned),
        ("Titles cleaned", summary.titles_cleaned),
        ("Labels added", summary.labels_added),
    ] {
        if count > 0 {
            println!("  {label}: {count}");
        }
    }
    println!("Total improvements: {}", summary.total_improvements);
}

pub fn cleanup(ctx: &AppContext, args: &CleanupArgs) -> Result<()> {
    let doc = if args.dry_run {
        let doc = ctx.load()?;
        let summary = cleanup_preview(&doc.backlog, &ctx.today);
        println!("Dry run: {} stories analyzed", doc.backlog.len());
        print_summary(&summary);
        doc
    } else {
        let (summary, doc) = ctx.update_store(false, |doc| {
            let summary = cleanup_document(doc, &ctx.today);
            Ok(((summary, doc.clone()), summary.total_improvements > 0))
        })?;
        info!(total = summary.total_improvements, "cleanup finished");
        println!("Cleaned {} stories", doc.backlog.len());
        print_summary(&summary);
        doc
    };

    if args.report {
        let now = Local::now().naive_local();
        let path = ctx
            .paths
            .reports_dir
            .join(report_file_name("data_cleanup_report", now, "md"));
        write_text(&path, &render_cleanup_report(&doc))?;
        println!("Report saved to: {}", path.display());
    }
    Ok(())
}

pub fn groom_backlog(ctx: &AppContext, args: &GroomArgs) -> Result<()> {
    let doc = ctx.load()?;
    let report = groom(&doc.backlog, args.count, |story| {
        let path = ctx.paths.resolve_record_path(story.file_path.as_deref()?);
        fs::read_to_string(path).ok()
    });
    let generated = doc
        .metadata
        .last_updated
        .clone()
        .unwrap_or_else(|| ctx.today.clone());
    let markdown = report.to_markdown(&generated);

    let path = args
        .output
        .clone()
        .unwrap_or_else(|| ctx.paths.root.join("backlog_grooming_report.md"));
    write_text(&path, &markdown)?;
    println!("Grooming report generated: {}", path.display());
    println!();
    println!("{markdown}");
    Ok(())
}

pub fn check(ctx: &AppContext) -> Result<()> {
    let doc = ctx.load()?;
    let report = audit(&doc.backlog, |file_path| {
        ctx.paths.resolve_record_path(file_path).exists()
    });

    for finding in report.warnings() {
        println!("warning: [{}] {}", finding.id, finding.message);
    }
    let errors: Vec<_> = report.errors().collect();
    for finding in &errors {
        println!("error: [{}] {}", finding.id, finding.message);
    }
    if !errors.is_empty() {
        bail!("Store audit found {} errors", errors.len());
    }
    println!("{} stories checked, no errors", doc.backlog.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::seeded_context;
    use backlog_core::Story;

    #[test]
    fn check_fails_only_when_the_audit_finds_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut missing_file = Story::new("UI-002", "Dark mode toggle", "ui");
        missing_file.file_path = Some("backlog/ui/UI-002-Dark_mode_toggle.md".to_string());
        let clean = seeded_context(
            dir.path(),
            vec![
                Story::new("UI-001", "Roster screen layout", "ui"),
                missing_file,
            ],
        );
        check(&clean).expect("warnings alone pass");

        let other = tempfile::tempdir().expect("tempdir");
        let duplicated = seeded_context(
            other.path(),
            vec![
                Story::new("UI-001", "Roster screen layout", "ui"),
                Story::new("UI-001", "Roster screen layout again", "ui"),
            ],
        );
        let err = check(&duplicated).expect_err("duplicate ids");
        assert!(err.to_string().contains("1 errors"));
    }
}
