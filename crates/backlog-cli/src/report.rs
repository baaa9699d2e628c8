use crate::config::{write_text, AppContext};
use anyhow::Result;
use backlog_core::report::{report_file_name, Report, ReportContext, ReportKind};
use backlog_core::Story;
use chrono::{Local, NaiveDateTime};
use clap::{Args, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ReportType {
    Velocity,
    Health,
    Priority,
    Workflow,
}

impl From<ReportType> for ReportKind {
    fn from(value: ReportType) -> Self {
        match value {
            ReportType::Velocity => ReportKind::Velocity,
            ReportType::Health => ReportKind::Health,
            ReportType::Priority => ReportKind::Priority,
            ReportType::Workflow => ReportKind::Workflow,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Json,
    Markdown,
}

impl ReportFormat {
    fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Markdown => "md",
        }
    }
}

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// One report instead of all four
    #[arg(long = "type", value_enum)]
    pub report_type: Option<ReportType>,
    #[arg(long, value_enum, default_value_t = ReportFormat::Json)]
    pub format: ReportFormat,
    /// Combined summary of every report
    #[arg(long, conflicts_with = "report_type")]
    pub dashboard: bool,
    /// Output directory, defaults to the configured reports directory
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// Write one report file and return its path.
pub fn write_report(
    report: &Report,
    format: ReportFormat,
    dir: &Path,
    now: NaiveDateTime,
) -> Result<PathBuf> {
    let path = dir.join(report_file_name(
        report.kind().as_str(),
        now,
        format.extension(),
    ));
    let body = match format {
        ReportFormat::Json => {
            let mut json = serde_json::to_string_pretty(report)?;
            json.push('\n');
            json
        }
        ReportFormat::Markdown => report.to_markdown(),
    };
    write_text(&path, &body)?;
    Ok(path)
}

pub fn generate(
    stories: &[Story],
    kinds: &[ReportKind],
    format: ReportFormat,
    dir: &Path,
    report_ctx: &ReportContext,
    now: NaiveDateTime,
) -> Result<Vec<PathBuf>> {
    kinds
        .iter()
        .map(|kind| {
            let report = Report::build(*kind, stories, report_ctx);
            write_report(&report, format, dir, now)
        })
        .collect()
}

pub fn report(ctx: &AppContext, args: &ReportArgs) -> Result<()> {
    let doc = ctx.load()?;
    let now = Local::now().naive_local();
    let report_ctx = ReportContext::at(now).with_stale_after(ctx.stale_after_days);
    let dir = args
        .output
        .clone()
        .unwrap_or_else(|| ctx.paths.reports_dir.clone());

    let kinds: Vec<ReportKind> = if args.dashboard {
        vec![ReportKind::Dashboard]
    } else if let Some(report_type) = args.report_type {
        vec![report_type.into()]
    } else {
        println!("Generating reports...");
        ReportKind::STANDARD.to_vec()
    };

    let written = generate(&doc.backlog, &kinds, args.format, &dir, &report_ctx, now)?;
    for path in &written {
        println!("Report saved: {}", path.display());
    }
    info!(count = written.len(), dir = %dir.display(), "reports written");
    Ok(())
}
