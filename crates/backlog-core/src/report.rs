//! Read-only projections over the story collection. Nothing here mutates the
//! backlog; every report is a plain serializable value that can be written as
//! JSON or rendered to markdown.

use crate::priority::PriorityBucket;
use crate::{Status, Story, DEFAULT_AUTHOR};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const NEW_AFTER_DAYS: i64 = 7;
const MEDIUM_AFTER_DAYS: i64 = 30;
pub const DEFAULT_STALE_AFTER_DAYS: i64 = 90;
const LONG_TITLE_CHARS: usize = 80;
const TOP_PRIORITY_COUNT: usize = 10;
const HIGH_PRIORITY_MAX: u32 = 10;
const TEMPLATE_LABEL: &str = "template";
const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Velocity,
    Health,
    Priority,
    Workflow,
    Dashboard,
}

impl ReportKind {
    /// The four standalone reports, in generation order.
    pub const STANDARD: [ReportKind; 4] = [
        ReportKind::Velocity,
        ReportKind::Health,
        ReportKind::Priority,
        ReportKind::Workflow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Velocity => "velocity",
            ReportKind::Health => "health",
            ReportKind::Priority => "priority",
            ReportKind::Workflow => "workflow",
            ReportKind::Dashboard => "dashboard",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ReportKind::Velocity => "Velocity",
            ReportKind::Health => "Health",
            ReportKind::Priority => "Priority",
            ReportKind::Workflow => "Workflow",
            ReportKind::Dashboard => "Dashboard",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "velocity" => Ok(ReportKind::Velocity),
            "health" => Ok(ReportKind::Health),
            "priority" => Ok(ReportKind::Priority),
            "workflow" => Ok(ReportKind::Workflow),
            "dashboard" => Ok(ReportKind::Dashboard),
            other => Err(format!("Unknown report type: {other}")),
        }
    }
}

/// Clock and thresholds a report run is evaluated against.
#[derive(Debug, Clone)]
pub struct ReportContext {
    pub today: NaiveDate,
    pub generated_at: String,
    pub stale_after_days: i64,
}

impl ReportContext {
    pub fn at(now: NaiveDateTime) -> Self {
        Self {
            today: now.date(),
            generated_at: now.format("%Y-%m-%dT%H:%M:%S").to_string(),
            stale_after_days: DEFAULT_STALE_AFTER_DAYS,
        }
    }

    pub fn with_stale_after(mut self, days: i64) -> Self {
        self.stale_after_days = days;
        self
    }
}

/// `<kind>_<YYYYmmdd_HHMMSS>.<ext>`
pub fn report_file_name(kind: &str, now: NaiveDateTime, extension: &str) -> String {
    format!("{kind}_{}.{extension}", now.format("%Y%m%d_%H%M%S"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketCounts {
    #[serde(rename = "Critical (1-5)")]
    pub critical: usize,
    #[serde(rename = "High (6-10)")]
    pub high: usize,
    #[serde(rename = "Medium (11-20)")]
    pub medium: usize,
    #[serde(rename = "Low (21+)")]
    pub low: usize,
}

impl BucketCounts {
    fn add(&mut self, priority: u32) {
        match PriorityBucket::of(priority) {
            PriorityBucket::Critical => self.critical += 1,
            PriorityBucket::High => self.high += 1,
            PriorityBucket::Medium => self.medium += 1,
            PriorityBucket::Low => self.low += 1,
        }
    }

    pub fn get(&self, bucket: PriorityBucket) -> usize {
        match bucket {
            PriorityBucket::Critical => self.critical,
            PriorityBucket::High => self.high,
            PriorityBucket::Medium => self.medium,
            PriorityBucket::Low => self.low,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

/// Histogram over assigned priorities only.
pub fn priority_histogram(stories: &[Story]) -> BucketCounts {
    let mut counts = BucketCounts::default();
    for story in stories.iter().filter(|story| story.is_prioritized()) {
        counts.add(story.priority);
    }
    counts
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorySummary {
    pub id: String,
    pub title: String,
    pub epic: String,
    pub priority: u32,
    pub status: String,
}

impl From<&Story> for StorySummary {
    fn from(story: &Story) -> Self {
        Self {
            id: story.id.clone(),
            title: story.title.clone(),
            epic: epic_key(story).to_string(),
            priority: story.priority,
            status: story.status.to_string(),
        }
    }
}

fn epic_key(story: &Story) -> &str {
    let epic = story.epic.trim();
    if epic.is_empty() {
        UNKNOWN
    } else {
        epic
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        round1(part as f64 / total as f64 * 100.0)
    }
}

pub fn status_breakdown(stories: &[Story]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for story in stories {
        *counts.entry(story.status.to_string()).or_insert(0) += 1;
    }
    counts
}

pub fn epic_breakdown(stories: &[Story]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for story in stories {
        *counts.entry(epic_key(story).to_string()).or_insert(0) += 1;
    }
    counts
}

/// Percentage of done stories per epic, one decimal. An epic with no
/// stories reports 0.
pub fn completion_rate(stories: &[Story], epic: &str) -> f64 {
    let in_epic: Vec<&Story> = stories
        .iter()
        .filter(|story| epic_key(story) == epic)
        .collect();
    let done = in_epic.iter().filter(|story| story.status.is_done()).count();
    percent(done, in_epic.len())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelocityReport {
    pub generated_at: String,
    pub total_stories: usize,
    pub status_breakdown: BTreeMap<String, usize>,
    pub epic_breakdown: BTreeMap<String, usize>,
    pub epic_completion_rates: BTreeMap<String, f64>,
    pub priority_distribution: BucketCounts,
    pub top_priorities: Vec<StorySummary>,
}

pub fn velocity_report(stories: &[Story], ctx: &ReportContext) -> VelocityReport {
    let epic_breakdown = epic_breakdown(stories);
    let epic_completion_rates = epic_breakdown
        .keys()
        .map(|epic| (epic.clone(), completion_rate(stories, epic)))
        .collect();

    let mut prioritized: Vec<&Story> = stories.iter().filter(|s| s.is_prioritized()).collect();
    prioritized.sort_by_key(|story| story.priority);

    VelocityReport {
        generated_at: ctx.generated_at.clone(),
        total_stories: stories.len(),
        status_breakdown: status_breakdown(stories),
        epic_breakdown,
        epic_completion_rates,
        priority_distribution: priority_histogram(stories),
        top_priorities: prioritized
            .into_iter()
            .take(TOP_PRIORITY_COUNT)
            .map(StorySummary::from)
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QualityIssues {
    pub missing_estimates: usize,
    pub missing_owners: usize,
    pub missing_acceptance_criteria: usize,
    pub long_titles: usize,
    pub stale_stories: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgeDistribution {
    pub new: usize,
    pub medium: usize,
    pub old: usize,
    pub stale: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub generated_at: String,
    pub health_score: f64,
    pub quality_issues: QualityIssues,
    pub age_distribution: AgeDistribution,
    pub epic_balance: BTreeMap<String, usize>,
    pub recommendations: Vec<String>,
}

/// Accepts `YYYY-MM-DD` or anything starting with it (ISO timestamps).
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn has_acceptance_criteria(story: &Story) -> bool {
    story
        .extra
        .get("acceptance_criteria")
        .and_then(|value| value.as_array())
        .map(|items| !items.is_empty())
        .unwrap_or(false)
}

/// `100 - missing_estimates/total*20 - missing_owners/total*15 -
/// stale/total*25`, floored at 0 and rounded to one decimal.
pub fn health_score(issues: &QualityIssues, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let total = total as f64;
    let score = 100.0
        - issues.missing_estimates as f64 / total * 20.0
        - issues.missing_owners as f64 / total * 15.0
        - issues.stale_stories as f64 / total * 25.0;
    round1(score.max(0.0))
}

pub fn health_report(stories: &[Story], ctx: &ReportContext) -> HealthReport {
    let mut issues = QualityIssues::default();
    let mut ages = AgeDistribution::default();

    for story in stories {
        if !story.has_estimate() {
            issues.missing_estimates += 1;
        }
        if story.owner.trim().is_empty() {
            issues.missing_owners += 1;
        }
        if !has_acceptance_criteria(story) {
            issues.missing_acceptance_criteria += 1;
        }
        if story.title.chars().count() > LONG_TITLE_CHARS {
            issues.long_titles += 1;
        }
        let Some(created) = story.created.as_deref().and_then(parse_day) else {
            continue;
        };
        let age = (ctx.today - created).num_days();
        if age <= NEW_AFTER_DAYS {
            ages.new += 1;
        } else if age <= MEDIUM_AFTER_DAYS {
            ages.medium += 1;
        } else if age <= ctx.stale_after_days {
            ages.old += 1;
        } else {
            ages.stale += 1;
            issues.stale_stories += 1;
        }
    }

    let mut recommendations = Vec::new();
    if issues.missing_estimates > 0 {
        recommendations.push(format!(
            "Add estimates to {} stories",
            issues.missing_estimates
        ));
    }
    if issues.missing_owners > 5 {
        recommendations.push("Assign owners to unowned stories for better accountability".to_string());
    }
    if issues.stale_stories > 0 {
        recommendations.push(format!(
            "Review and update {} stale stories",
            issues.stale_stories
        ));
    }
    if ages.stale > ages.new {
        recommendations.push("Focus on completing older stories to improve flow".to_string());
    }

    HealthReport {
        generated_at: ctx.generated_at.clone(),
        health_score: health_score(&issues, stories.len()),
        quality_issues: issues,
        age_distribution: ages,
        epic_balance: epic_breakdown(stories),
        recommendations,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityReport {
    pub generated_at: String,
    pub total_prioritized: usize,
    pub total_unprocessed: usize,
    pub priority_heatmap: BTreeMap<String, BucketCounts>,
    pub priority_distribution: BucketCounts,
    pub high_priority_distribution: BTreeMap<String, usize>,
    pub unprocessed_by_epic: BTreeMap<String, usize>,
    pub priority_recommendations: Vec<String>,
}

pub fn priority_report(stories: &[Story], ctx: &ReportContext) -> PriorityReport {
    let mut heatmap: BTreeMap<String, BucketCounts> = BTreeMap::new();
    let mut high: BTreeMap<String, usize> = BTreeMap::new();
    let mut unprocessed: BTreeMap<String, usize> = BTreeMap::new();

    for story in stories {
        let epic = epic_key(story).to_string();
        let cell = heatmap.entry(epic.clone()).or_default();
        if story.is_prioritized() {
            cell.add(story.priority);
            if story.priority <= HIGH_PRIORITY_MAX {
                *high.entry(epic).or_insert(0) += 1;
            }
        } else {
            *unprocessed.entry(epic).or_insert(0) += 1;
        }
    }

    let total_unprocessed: usize = unprocessed.values().sum();
    let mut recommendations = Vec::new();
    if total_unprocessed > 20 {
        recommendations.push("Run auto-prioritization to process backlog efficiently".to_string());
    }
    // Ties go to the alphabetically first epic.
    let busiest = unprocessed
        .iter()
        .fold(None::<(&String, usize)>, |best, (epic, count)| match best {
            Some((_, best_count)) if best_count >= *count => best,
            _ => Some((epic, *count)),
        });
    if let Some((epic, count)) = busiest {
        recommendations.push(format!(
            "Focus prioritization efforts on {epic} epic ({count} stories)"
        ));
    }

    PriorityReport {
        generated_at: ctx.generated_at.clone(),
        total_prioritized: stories.len() - total_unprocessed,
        total_unprocessed,
        priority_heatmap: heatmap,
        priority_distribution: priority_histogram(stories),
        high_priority_distribution: high,
        unprocessed_by_epic: unprocessed,
        priority_recommendations: recommendations,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
    Unknown,
}

/// Size class from the first number in an estimate: up to 2 small, up to 5
/// medium, anything bigger large.
pub fn size_class(estimate: &str) -> SizeClass {
    let digits: String = estimate
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    match digits.parse::<u64>() {
        Ok(size) if size <= 2 => SizeClass::Small,
        Ok(size) if size <= 5 => SizeClass::Medium,
        Ok(_) => SizeClass::Large,
        Err(_) => SizeClass::Unknown,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AutomationAdoption {
    pub auto_created_stories: usize,
    pub template_usage: usize,
    pub automation_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusProgression {
    pub draft: usize,
    pub backlog: usize,
    pub ready: usize,
    pub active: usize,
    pub completed: usize,
    pub accepted: usize,
}

impl StatusProgression {
    pub fn collect(stories: &[Story]) -> Self {
        let mut progression = Self::default();
        for story in stories {
            match story.status {
                Status::Draft => progression.draft += 1,
                Status::Backlog => progression.backlog += 1,
                Status::Ready => progression.ready += 1,
                Status::Active => progression.active += 1,
                Status::Completed => progression.completed += 1,
                Status::Accepted => progression.accepted += 1,
                Status::Blocked | Status::Other(_) => {}
            }
        }
        progression
    }

    fn total(&self) -> usize {
        self.draft + self.backlog + self.ready + self.active + self.completed + self.accepted
    }

    /// Weighted status mix as a percentage: done work counts fully, earlier
    /// stages progressively less.
    pub fn efficiency(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let weighted = self.completed as f64
            + self.accepted as f64
            + self.active as f64 * 0.7
            + self.ready as f64 * 0.5
            + self.backlog as f64 * 0.3
            + self.draft as f64 * 0.1;
        round1(weighted / total as f64 * 100.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComplexityDistribution {
    pub small: usize,
    pub medium: usize,
    pub large: usize,
    pub unknown: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bottleneck {
    #[serde(rename = "type")]
    pub kind: String,
    pub location: String,
    pub severity: String,
    pub count: usize,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowReport {
    pub generated_at: String,
    pub automation_adoption: AutomationAdoption,
    pub status_progression: StatusProgression,
    pub complexity_distribution: ComplexityDistribution,
    pub workflow_efficiency: f64,
    pub bottlenecks: Vec<Bottleneck>,
}

fn bottlenecks(stories: &[Story]) -> Vec<Bottleneck> {
    let statuses = status_breakdown(stories);
    let mut found = Vec::new();
    let backlog = statuses.get("backlog").copied().unwrap_or(0);
    if backlog > 20 {
        found.push(Bottleneck {
            kind: "status".to_string(),
            location: "backlog".to_string(),
            severity: "high".to_string(),
            count: backlog,
            recommendation: "Prioritize story grooming and move to ready status".to_string(),
        });
    }
    let draft = statuses.get("draft").copied().unwrap_or(0);
    if draft > 15 {
        found.push(Bottleneck {
            kind: "status".to_string(),
            location: "draft".to_string(),
            severity: "medium".to_string(),
            count: draft,
            recommendation: "Complete story refinement and add acceptance criteria".to_string(),
        });
    }

    let epics = epic_breakdown(stories);
    if !epics.is_empty() {
        let average = stories.len() as f64 / epics.len() as f64;
        for (epic, count) in epics {
            if count as f64 > average * 1.5 {
                found.push(Bottleneck {
                    kind: "epic".to_string(),
                    recommendation: format!("Consider splitting {epic} epic or adding resources"),
                    location: epic,
                    severity: "medium".to_string(),
                    count,
                });
            }
        }
    }
    found
}

pub fn workflow_report(stories: &[Story], ctx: &ReportContext) -> WorkflowReport {
    let auto_created = stories
        .iter()
        .filter(|story| story.author() == Some(DEFAULT_AUTHOR))
        .count();
    let template_usage = stories
        .iter()
        .filter(|story| story.labels.iter().any(|label| label == TEMPLATE_LABEL))
        .count();

    let mut complexity = ComplexityDistribution::default();
    for story in stories {
        match size_class(&story.estimate) {
            SizeClass::Small => complexity.small += 1,
            SizeClass::Medium => complexity.medium += 1,
            SizeClass::Large => complexity.large += 1,
            SizeClass::Unknown => complexity.unknown += 1,
        }
    }

    let progression = StatusProgression::collect(stories);
    WorkflowReport {
        generated_at: ctx.generated_at.clone(),
        automation_adoption: AutomationAdoption {
            auto_created_stories: auto_created,
            template_usage,
            automation_rate: percent(auto_created, stories.len()),
        },
        status_progression: progression,
        complexity_distribution: complexity,
        workflow_efficiency: progression.efficiency(),
        bottlenecks: bottlenecks(stories),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub total_stories: usize,
    pub health_score: f64,
    pub prioritized_stories: usize,
    pub automation_rate: f64,
    pub last_updated: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub summary: DashboardSummary,
    pub velocity: VelocityReport,
    pub health: HealthReport,
    pub priority: PriorityReport,
    pub workflow: WorkflowReport,
}

pub fn dashboard(stories: &[Story], ctx: &ReportContext) -> Dashboard {
    let velocity = velocity_report(stories, ctx);
    let health = health_report(stories, ctx);
    let priority = priority_report(stories, ctx);
    let workflow = workflow_report(stories, ctx);
    Dashboard {
        summary: DashboardSummary {
            total_stories: velocity.total_stories,
            health_score: health.health_score,
            prioritized_stories: priority.total_prioritized,
            automation_rate: workflow.automation_adoption.automation_rate,
            last_updated: ctx.generated_at.clone(),
        },
        velocity,
        health,
        priority,
        workflow,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Report {
    Velocity(VelocityReport),
    Health(HealthReport),
    Priority(PriorityReport),
    Workflow(WorkflowReport),
    Dashboard(Box<Dashboard>),
}

impl Report {
    pub fn build(kind: ReportKind, stories: &[Story], ctx: &ReportContext) -> Self {
        match kind {
            ReportKind::Velocity => Report::Velocity(velocity_report(stories, ctx)),
            ReportKind::Health => Report::Health(health_report(stories, ctx)),
            ReportKind::Priority => Report::Priority(priority_report(stories, ctx)),
            ReportKind::Workflow => Report::Workflow(workflow_report(stories, ctx)),
            ReportKind::Dashboard => Report::Dashboard(Box::new(dashboard(stories, ctx))),
        }
    }

    pub fn kind(&self) -> ReportKind {
        match self {
            Report::Velocity(_) => ReportKind::Velocity,
            Report::Health(_) => ReportKind::Health,
            Report::Priority(_) => ReportKind::Priority,
            Report::Workflow(_) => ReportKind::Workflow,
            Report::Dashboard(_) => ReportKind::Dashboard,
        }
    }

    fn generated_at(&self) -> &str {
        match self {
            Report::Velocity(report) => &report.generated_at,
            Report::Health(report) => &report.generated_at,
            Report::Priority(report) => &report.generated_at,
            Report::Workflow(report) => &report.generated_at,
            Report::Dashboard(report) => &report.summary.last_updated,
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {} Report\n\n", self.kind().title());
        out.push_str(&format!("**Generated**: {}\n\n", self.generated_at()));
        match self {
            Report::Velocity(report) => velocity_markdown(report, &mut out),
            Report::Health(report) => health_markdown(report, &mut out),
            Report::Priority(report) => priority_markdown(report, &mut out),
            Report::Workflow(report) => workflow_markdown(report, &mut out),
            Report::Dashboard(report) => {
                let summary = &report.summary;
                out.push_str("## Summary\n");
                out.push_str(&format!("- **Total Stories**: {}\n", summary.total_stories));
                out.push_str(&format!("- **Health Score**: {}/100\n", summary.health_score));
                out.push_str(&format!(
                    "- **Prioritized Stories**: {}\n",
                    summary.prioritized_stories
                ));
                out.push_str(&format!(
                    "- **Automation Rate**: {}%\n\n",
                    summary.automation_rate
                ));
                velocity_markdown(&report.velocity, &mut out);
                health_markdown(&report.health, &mut out);
                priority_markdown(&report.priority, &mut out);
                workflow_markdown(&report.workflow, &mut out);
            }
        }
        out
    }
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn push_counts(out: &mut String, counts: &BTreeMap<String, usize>) {
    if counts.is_empty() {
        out.push_str("- none\n");
    }
    for (key, count) in counts {
        out.push_str(&format!("- **{key}**: {count}\n"));
    }
}

fn push_buckets(out: &mut String, buckets: &BucketCounts) {
    for bucket in PriorityBucket::ALL {
        out.push_str(&format!("- **{}**: {}\n", bucket.label(), buckets.get(bucket)));
    }
}

fn velocity_markdown(report: &VelocityReport, out: &mut String) {
    out.push_str("## Summary\n");
    out.push_str(&format!("- **Total Stories**: {}\n\n", report.total_stories));
    out.push_str("## Status Breakdown\n");
    push_counts(out, &report.status_breakdown);
    out.push_str("\n## Epic Completion Rates\n");
    for (epic, rate) in &report.epic_completion_rates {
        let total = report.epic_breakdown.get(epic).copied().unwrap_or(0);
        out.push_str(&format!("- **{epic}**: {rate}% of {total}\n"));
    }
    out.push_str("\n## Priority Distribution\n");
    push_buckets(out, &report.priority_distribution);
    if !report.top_priorities.is_empty() {
        out.push_str("\n## Top Priorities\n\n");
        out.push_str("| Priority | Story ID | Title | Epic | Status |\n");
        out.push_str("|----------|----------|-------|------|--------|\n");
        for story in &report.top_priorities {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                story.priority, story.id, story.title, story.epic, story.status
            ));
        }
    }
    out.push('\n');
}

fn health_markdown(report: &HealthReport, out: &mut String) {
    out.push_str(&format!("## Health Score: {}/100\n\n", report.health_score));
    out.push_str("## Quality Issues\n");
    let issues = report.quality_issues;
    for (key, count) in [
        ("missing_estimates", issues.missing_estimates),
        ("missing_owners", issues.missing_owners),
        ("missing_acceptance_criteria", issues.missing_acceptance_criteria),
        ("long_titles", issues.long_titles),
        ("stale_stories", issues.stale_stories),
    ] {
        out.push_str(&format!("- **{}**: {count}\n", title_case(key)));
    }
    let ages = report.age_distribution;
    out.push_str("\n## Age Distribution\n");
    out.push_str(&format!("- **New**: {}\n", ages.new));
    out.push_str(&format!("- **Medium**: {}\n", ages.medium));
    out.push_str(&format!("- **Old**: {}\n", ages.old));
    out.push_str(&format!("- **Stale**: {}\n", ages.stale));
    out.push_str("\n## Recommendations\n");
    if report.recommendations.is_empty() {
        out.push_str("- No action needed\n");
    }
    for rec in &report.recommendations {
        out.push_str(&format!("- {rec}\n"));
    }
    out.push('\n');
}

fn priority_markdown(report: &PriorityReport, out: &mut String) {
    out.push_str("## Prioritization\n");
    out.push_str(&format!("- **Prioritized**: {}\n", report.total_prioritized));
    out.push_str(&format!("- **Unprocessed**: {}\n\n", report.total_unprocessed));
    out.push_str("## Priority Distribution\n");
    push_buckets(out, &report.priority_distribution);
    out.push_str("\n## Heatmap\n\n");
    out.push_str("| Epic | Critical | High | Medium | Low |\n");
    out.push_str("|------|----------|------|--------|-----|\n");
    for (epic, cell) in &report.priority_heatmap {
        out.push_str(&format!(
            "| {epic} | {} | {} | {} | {} |\n",
            cell.critical, cell.high, cell.medium, cell.low
        ));
    }
    out.push_str("\n## High Priority by Epic\n");
    push_counts(out, &report.high_priority_distribution);
    out.push_str("\n## Unprocessed by Epic\n");
    push_counts(out, &report.unprocessed_by_epic);
    out.push_str("\n## Recommendations\n");
    if report.priority_recommendations.is_empty() {
        out.push_str("- No action needed\n");
    }
    for rec in &report.priority_recommendations {
        out.push_str(&format!("- {rec}\n"));
    }
    out.push('\n');
}

fn workflow_markdown(report: &WorkflowReport, out: &mut String) {
    let adoption = report.automation_adoption;
    out.push_str("## Automation\n");
    out.push_str(&format!(
        "- **Auto-created Stories**: {}\n",
        adoption.auto_created_stories
    ));
    out.push_str(&format!("- **Template Usage**: {}\n", adoption.template_usage));
    out.push_str(&format!("- **Automation Rate**: {}%\n\n", adoption.automation_rate));

    let progression = report.status_progression;
    out.push_str("## Status Progression\n");
    for (status, count) in [
        (Status::Draft, progression.draft),
        (Status::Backlog, progression.backlog),
        (Status::Ready, progression.ready),
        (Status::Active, progression.active),
        (Status::Completed, progression.completed),
        (Status::Accepted, progression.accepted),
    ] {
        out.push_str(&format!("- **{status}**: {count}\n"));
    }
    out.push_str(&format!(
        "\n## Workflow Efficiency: {}%\n\n",
        report.workflow_efficiency
    ));

    let complexity = report.complexity_distribution;
    out.push_str("## Complexity\n");
    out.push_str(&format!("- **Small**: {}\n", complexity.small));
    out.push_str(&format!("- **Medium**: {}\n", complexity.medium));
    out.push_str(&format!("- **Large**: {}\n", complexity.large));
    out.push_str(&format!("- **Unknown**: {}\n", complexity.unknown));

    out.push_str("\n## Bottlenecks\n");
    if report.bottlenecks.is_empty() {
        out.push_str("- none\n");
    }
    for bottleneck in &report.bottlenecks {
        out.push_str(&format!(
            "- **{}** ({}, {}): {} stories. {}\n",
            bottleneck.location,
            bottleneck.kind,
            bottleneck.severity,
            bottleneck.count,
            bottleneck.recommendation
        ));
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ReportContext {
        let now = NaiveDate::from_ymd_opt(2025, 6, 30)
            .and_then(|day| day.and_hms_opt(9, 30, 0))
            .expect("valid timestamp");
        ReportContext::at(now)
    }

    fn story(id: &str, epic: &str, status: Status, priority: u32) -> Story {
        let mut story = Story::new(id, format!("Story {id} with a title"), epic);
        story.status = status;
        story.priority = priority;
        story
    }

    #[test]
    fn completion_rate_of_empty_epic_is_zero() {
        assert_eq!(completion_rate(&[], "ui"), 0.0);
        let stories = vec![
            story("UI-001", "ui", Status::Completed, 1),
            story("UI-002", "ui", Status::Accepted, 2),
            story("UI-003", "ui", Status::Backlog, 3),
        ];
        assert_eq!(completion_rate(&stories, "ui"), 66.7);
        assert_eq!(completion_rate(&stories, "core"), 0.0);
    }

    #[test]
    fn velocity_counts_and_top_priorities() {
        let stories = vec![
            story("UI-001", "ui", Status::Ready, 12),
            story("LLM-001", "core", Status::Completed, 3),
            story("ING-001", "ingestion", Status::Backlog, 99),
            story("ING-002", "ingestion", Status::Backlog, 7),
        ];
        let report = velocity_report(&stories, &ctx());
        assert_eq!(report.total_stories, 4);
        assert_eq!(report.status_breakdown.get("backlog"), Some(&2));
        assert_eq!(report.epic_completion_rates.get("core"), Some(&100.0));
        assert_eq!(report.priority_distribution.critical, 1);
        assert_eq!(report.priority_distribution.high, 1);
        assert_eq!(report.priority_distribution.medium, 1);
        assert_eq!(report.priority_distribution.total(), 3);
        let top: Vec<&str> = report.top_priorities.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(top, vec!["LLM-001", "ING-002", "UI-001"]);

        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["priority_distribution"]["Critical (1-5)"], json!(1));
    }

    #[test]
    fn health_score_weights_penalties() {
        let mut fresh = story("UI-001", "ui", Status::Ready, 5);
        fresh.estimate = "3sp".into();
        fresh.owner = "Frontend Team".into();
        fresh.created = Some("2025-06-28".into());
        let mut stale = story("UI-002", "ui", Status::Backlog, 6);
        stale.created = Some("2024-01-01".into());
        let mut old = story("UI-003", "ui", Status::Backlog, 7);
        old.created = Some("2025-04-15T10:00:00".into());

        let report = health_report(&[fresh, stale, old], &ctx());
        assert_eq!(report.quality_issues.missing_estimates, 2);
        assert_eq!(report.quality_issues.missing_owners, 2);
        assert_eq!(report.quality_issues.stale_stories, 1);
        assert_eq!(report.age_distribution, AgeDistribution { new: 1, medium: 0, old: 1, stale: 1 });
        // 100 - 2/3*20 - 2/3*15 - 1/3*25 = 68.33
        assert_eq!(report.health_score, 68.3);
        assert!(report
            .recommendations
            .contains(&"Review and update 1 stale stories".to_string()));
        assert_eq!(health_report(&[], &ctx()).health_score, 100.0);
    }

    #[test]
    fn health_score_never_negative() {
        let issues = QualityIssues {
            missing_estimates: 10,
            missing_owners: 10,
            stale_stories: 10,
            ..QualityIssues::default()
        };
        assert_eq!(health_score(&issues, 10), 40.0);
        assert_eq!(health_score(&issues, 1), 0.0);
    }

    #[test]
    fn priority_report_tracks_unprocessed() {
        let stories = vec![
            story("UI-001", "ui", Status::Ready, 99),
            story("UI-002", "ui", Status::Ready, 99),
            story("ADH-001", "adhoc", Status::Ready, 99),
            story("LLM-001", "core", Status::Ready, 4),
        ];
        let report = priority_report(&stories, &ctx());
        assert_eq!(report.total_prioritized, 1);
        assert_eq!(report.total_unprocessed, 3);
        assert_eq!(report.priority_heatmap.get("ui"), Some(&BucketCounts::default()));
        assert_eq!(report.high_priority_distribution.get("core"), Some(&1));
        assert_eq!(
            report.priority_recommendations,
            vec!["Focus prioritization efforts on ui epic (2 stories)".to_string()]
        );
    }

    #[test]
    fn workflow_efficiency_and_sizes() {
        let mut auto = story("ING-001", "ingestion", Status::Completed, 1);
        auto.extra.insert("author".into(), json!("story-ingestor"));
        auto.estimate = "2sp".into();
        let mut templated = story("ING-002", "ingestion", Status::Draft, 2);
        templated.labels = vec!["template".into()];
        templated.estimate = "8sp".into();
        let report = workflow_report(&[auto, templated], &ctx());
        assert_eq!(report.automation_adoption.auto_created_stories, 1);
        assert_eq!(report.automation_adoption.template_usage, 1);
        assert_eq!(report.automation_adoption.automation_rate, 50.0);
        // (1.0 + 0.1) / 2
        assert_eq!(report.workflow_efficiency, 55.0);
        assert_eq!(report.complexity_distribution.small, 1);
        assert_eq!(report.complexity_distribution.large, 1);
        assert_eq!(size_class("TBD"), SizeClass::Unknown);
        assert_eq!(size_class("3 days"), SizeClass::Medium);
    }

    #[test]
    fn dashboard_markdown_has_every_section() {
        let stories = vec![story("LLM-001", "core", Status::Ready, 1)];
        let report = Report::build(ReportKind::Dashboard, &stories, &ctx());
        let markdown = report.to_markdown();
        assert!(markdown.starts_with("# Dashboard Report"));
        for section in ["## Summary", "## Health Score", "## Heatmap", "## Automation"] {
            assert!(markdown.contains(section), "missing {section}");
        }
        assert_eq!(ReportKind::from_str("Health"), Ok(ReportKind::Health));
    }

    #[test]
    fn file_names_are_timestamped() {
        let now = NaiveDate::from_ymd_opt(2025, 1, 2)
            .and_then(|day| day.and_hms_opt(3, 4, 5))
            .expect("valid timestamp");
        assert_eq!(
            report_file_name("velocity", now, "json"),
            "velocity_20250102_030405.json"
        );
    }
}
