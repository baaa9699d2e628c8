use crate::config::{write_text, AppContext};
use crate::ingest::{with_admission, Admitted};
use anyhow::{anyhow, bail, Context, Result};
use backlog_core::extract::temp_story_id;
use backlog_core::priority::sort_backlog;
use backlog_core::render::{render_template, StoryTemplate};
use backlog_core::validate::title_error;
use backlog_core::{priority_from_str, BacklogDocument, Epic, Status, Story, StoryDraft};
use chrono::Local;
use clap::{Args, ValueEnum};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;

const READY_LIST_LIMIT: usize = 10;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Replace an existing store with an empty one
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Every story instead of the ready-to-start shortlist
    #[arg(long)]
    pub all: bool,
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub epic: Option<String>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub id: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct NextArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    pub id: String,
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub branch: Option<String>,
    #[arg(long)]
    pub owner: Option<String>,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub epic: Option<String>,
    /// critical, high, medium, low or a number
    #[arg(long)]
    pub priority_level: Option<String>,
    #[arg(long)]
    pub estimate: Option<String>,
    #[arg(long)]
    pub owner: Option<String>,
    #[arg(long, value_delimiter = ',')]
    pub labels: Vec<String>,
    #[arg(long)]
    pub user_story: Option<String>,
    /// Acceptance criterion; repeat for several
    #[arg(long = "criteria")]
    pub criteria: Vec<String>,
    /// Prompt for every field on the terminal
    #[arg(long)]
    pub interactive: bool,
    /// Stage a skeleton markdown story in staging/new instead of storing one
    #[arg(long, value_enum, conflicts_with = "interactive")]
    pub template: Option<TemplateKind>,
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TemplateKind {
    Basic,
    Technical,
    Spike,
}

impl From<TemplateKind> for StoryTemplate {
    fn from(kind: TemplateKind) -> Self {
        match kind {
            TemplateKind::Basic => StoryTemplate::Basic,
            TemplateKind::Technical => StoryTemplate::Technical,
            TemplateKind::Spike => StoryTemplate::Spike,
        }
    }
}

pub fn init(ctx: &AppContext, args: &InitArgs) -> Result<()> {
    let paths = &ctx.paths;
    for dir in [
        paths.backlog_dir.clone(),
        paths.staging_new(),
        paths.staging_bulk(),
        paths.staging_processed(),
        paths.reports_dir.clone(),
    ] {
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    if args.force || !ctx.store.exists() {
        let _lock = ctx.store.lock()?;
        let mut doc = BacklogDocument::default();
        ctx.store
            .save(&mut doc, &ctx.today)
            .with_context(|| format!("Failed to write {}", ctx.store.path().display()))?;
    }
    println!("Initialized backlog at {}", ctx.store.path().display());
    Ok(())
}

fn parse_status(raw: &str) -> Result<Status> {
    raw.parse::<Status>().map_err(|_| {
        let valid = Status::KNOWN
            .iter()
            .map(|status| status.as_str().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        anyhow!("Unknown status '{raw}'. Valid statuses: {valid}")
    })
}

fn print_story_line(story: &Story) {
    let priority = if story.is_prioritized() {
        format!("P{}", story.priority)
    } else {
        "P-".to_string()
    };
    println!(
        "- [{}] ({}/{}/{}) {} [{}]",
        story.id, story.status, priority, story.estimate, story.title, story.epic
    );
    if !story.dependencies.is_empty() {
        println!("    Depends: {}", story.dependencies.join(", "));
    }
}

pub fn list(ctx: &AppContext, args: &ListArgs) -> Result<()> {
    let doc = ctx.load()?;
    let status = args.status.as_deref().map(parse_status).transpose()?;
    let epic = args.epic.as_deref().map(Epic::normalize);

    let mut stories: Vec<Story> = doc
        .backlog
        .iter()
        .filter(|story| args.all || status.is_some() || story.is_ready_to_start())
        .filter(|story| status.as_ref().map_or(true, |wanted| &story.status == wanted))
        .filter(|story| epic.map_or(true, |wanted| Epic::normalize(&story.epic) == wanted))
        .cloned()
        .collect();
    sort_backlog(&mut stories);

    let shortlist = !args.all && status.is_none();
    let matched = stories.len();
    if shortlist {
        stories.truncate(READY_LIST_LIMIT);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stories)?);
        return Ok(());
    }

    if shortlist {
        println!("Ready to start ({matched}):");
    } else {
        println!("Stories ({matched}):");
    }
    for story in &stories {
        print_story_line(story);
    }
    if shortlist && matched > stories.len() {
        println!(
            "... and {} more. Use --all to see everything.",
            matched - stories.len()
        );
    }
    Ok(())
}

pub fn show(ctx: &AppContext, args: &ShowArgs) -> Result<()> {
    let doc = ctx.load()?;
    let story = doc
        .find(&args.id)
        .ok_or_else(|| anyhow!("Story not found: {}", args.id))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(story)?);
        return Ok(());
    }

    println!("ID: {}", story.id);
    println!("Title: {}", story.title);
    println!("Epic: {}", story.epic);
    println!("Status: {}", story.status);
    println!("Priority: {}", story.priority);
    println!("Estimate: {}", story.estimate);
    if !story.owner.is_empty() {
        println!("Owner: {}", story.owner);
    }
    if let Some(branch) = &story.branch_name {
        println!("Branch: {branch}");
    }
    if let Some(file_path) = &story.file_path {
        println!("File: {file_path}");
    }
    if !story.labels.is_empty() {
        println!("Labels: {}", story.labels.join(", "));
    }
    if !story.dependencies.is_empty() {
        println!("Depends: {}", story.dependencies.join(", "));
    }
    if let Some(created) = &story.created {
        println!("Created: {created}");
    }
    if let Some(updated) = &story.last_updated {
        println!("Updated: {updated}");
    }
    if let Some(author) = story.author() {
        println!("Author: {author}");
    }
    Ok(())
}

pub fn next(ctx: &AppContext, args: &NextArgs) -> Result<()> {
    let doc = ctx.load()?;
    let mut open: Vec<&Story> = doc
        .backlog
        .iter()
        .filter(|story| story.is_prioritized() && !story.status.is_done())
        .collect();
    open.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.epic.cmp(&b.epic))
            .then_with(|| a.id.cmp(&b.id))
    });
    match open.first() {
        Some(story) if args.json => println!("{}", serde_json::to_string_pretty(story)?),
        Some(story) => println!("[{}] {} (P{})", story.id, story.title, story.priority),
        None => println!("No prioritized open stories."),
    }
    Ok(())
}

pub fn update(ctx: &AppContext, args: &UpdateArgs) -> Result<()> {
    let status = args.status.as_deref().map(parse_status).transpose()?;
    let changes = ctx.update_store(false, |doc| {
        let story = doc
            .find_mut(&args.id)
            .ok_or_else(|| anyhow!("Story not found: {}", args.id))?;
        let mut changes = Vec::new();
        if let Some(status) = &status {
            story.status = status.clone();
            changes.push(format!("status -> {status}"));
        }
        if let Some(branch) = &args.branch {
            story.branch_name = Some(branch.clone());
            changes.push(format!("branch_name -> {branch}"));
        }
        if let Some(owner) = &args.owner {
            story.owner = owner.clone();
            changes.push(format!("owner -> {owner}"));
        }
        if !changes.is_empty() {
            story.last_updated = Some(ctx.today.clone());
        }
        let changed = !changes.is_empty();
        Ok((changes, changed))
    })?;

    if changes.is_empty() {
        println!("No updates specified for {}", args.id);
    } else {
        println!("Updated {}: {}", args.id, changes.join(", "));
    }
    Ok(())
}

fn draft_from_args(args: &CreateArgs) -> Result<StoryDraft> {
    let priority = match args.priority_level.as_deref() {
        Some(level) => Some(
            priority_from_str(level).ok_or_else(|| anyhow!("Unknown priority level '{level}'"))?,
        ),
        None => None,
    };
    Ok(StoryDraft {
        title: args.title.clone(),
        epic: args.epic.clone(),
        priority,
        estimate: args.estimate.clone(),
        owner: args.owner.clone(),
        labels: args.labels.clone(),
        user_story: args.user_story.clone(),
        acceptance_criteria: args.criteria.clone(),
        ..StoryDraft::default()
    })
}

fn ask<R: BufRead, W: Write>(input: &mut R, out: &mut W, prompt: &str) -> Result<String> {
    write!(out, "{prompt}")?;
    out.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Lines until the first blank one.
fn ask_lines<R: BufRead, W: Write>(input: &mut R, out: &mut W, prompt: &str) -> Result<Vec<String>> {
    writeln!(out, "{prompt}")?;
    out.flush()?;
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.trim().is_empty() {
            break;
        }
        lines.push(line.to_string());
    }
    Ok(lines)
}

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|value| !value.is_empty())
}

/// Walk the operator through every field of a new story.
pub fn prompt_draft<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> Result<StoryDraft> {
    let title = ask(input, out, "Story title: ")?;
    if title.is_empty() {
        bail!("Title is required");
    }
    let epic = ask(input, out, &format!("Epic ({}): ", Epic::valid_names()))?;
    let level = ask(input, out, "Priority (critical/high/medium/low) [unassigned]: ")?;
    let priority = if level.is_empty() {
        None
    } else {
        Some(priority_from_str(&level).ok_or_else(|| anyhow!("Unknown priority level '{level}'"))?)
    };
    let estimate = ask(input, out, "Estimate (1sp, 2sp, 3sp, 5sp, 8sp, 13sp) [TBD]: ")?;
    let owner = ask(input, out, "Owner [epic default]: ")?;
    let labels = ask(input, out, "Labels (comma separated): ")?;
    let user_story = ask_lines(input, out, "User story (blank line to finish):")?;
    let criteria = ask_lines(input, out, "Acceptance criteria, one per line (blank line to finish):")?;

    Ok(StoryDraft {
        title: Some(title),
        epic: non_empty(epic),
        priority,
        estimate: non_empty(estimate),
        owner: non_empty(owner),
        labels: labels
            .split(',')
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty())
            .collect(),
        user_story: non_empty(user_story.join("\n")),
        acceptance_criteria: criteria
            .into_iter()
            .map(|line| line.trim_start_matches("- [ ]").trim().to_string())
            .filter(|line| !line.is_empty())
            .collect(),
        ..StoryDraft::default()
    })
}

/// Write `staging/new/TEMP-<HHMMSS>-<Title>.md` for the next ingest.
fn create_from_template(
    ctx: &AppContext,
    args: &CreateArgs,
    kind: TemplateKind,
    stamp: &str,
) -> Result<PathBuf> {
    let title = args.title.as_deref().map(str::trim).unwrap_or_default();
    if title.is_empty() {
        bail!("--title is required with --template");
    }
    if let Some(error) = title_error(title) {
        bail!("{error}");
    }
    let raw_epic = args
        .epic
        .as_deref()
        .ok_or_else(|| anyhow!("--epic is required with --template"))?;
    let epic = Epic::resolve(raw_epic).ok_or_else(|| {
        anyhow!("Unknown epic '{raw_epic}'. Valid epics: {}", Epic::valid_names())
    })?;

    let id = temp_story_id(stamp, title);
    let path = ctx.paths.staging_new().join(format!("{id}.md"));
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    let template = StoryTemplate::from(kind);
    let content = render_template(template, &id, title, epic.as_str())
        .with_context(|| format!("Failed to render {template} template"))?;
    if args.dry_run {
        println!("Would create {}", path.display());
        return Ok(path);
    }
    write_text(&path, &content)?;
    info!(id = %id, template = %template, "template story staged");
    println!("Created template story: {}", path.display());
    Ok(path)
}

pub fn create(ctx: &AppContext, args: &CreateArgs) -> Result<()> {
    if let Some(kind) = args.template {
        let stamp = Local::now().format("%H%M%S").to_string();
        create_from_template(ctx, args, kind, &stamp)?;
        return Ok(());
    }
    let mut draft = if args.interactive {
        let stdin = io::stdin();
        let stdout = io::stdout();
        prompt_draft(&mut stdin.lock(), &mut stdout.lock())?
    } else {
        draft_from_args(args)?
    };
    if draft.owner.is_none() {
        draft.owner = Epic::resolve(draft.epic())
            .and_then(|epic| epic.default_owner())
            .map(str::to_string);
    }

    let id = with_admission(ctx, args.dry_run, |admission, doc| {
        match admission.admit(doc, draft)? {
            Admitted::Created(id) => Ok((id, !args.dry_run)),
            Admitted::Rejected(errors) => bail!("Story validation failed: {}", errors.join("; ")),
        }
    })?;
    if !args.dry_run {
        println!("Story {id} created");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::seeded_context;
    use std::io::Cursor;

    fn update_args(id: &str, status: Option<&str>) -> UpdateArgs {
        UpdateArgs {
            id: id.to_string(),
            status: status.map(str::to_string),
            branch: None,
            owner: None,
        }
    }

    fn template_args(title: &str, epic: &str) -> CreateArgs {
        CreateArgs {
            title: Some(title.to_string()),
            epic: Some(epic.to_string()),
            priority_level: None,
            estimate: None,
            owner: None,
            labels: Vec::new(),
            user_story: None,
            criteria: Vec::new(),
            interactive: false,
            template: Some(TemplateKind::Spike),
            dry_run: false,
        }
    }

    #[test]
    fn update_without_flags_leaves_the_store_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = seeded_context(
            dir.path(),
            vec![Story::new("UI-001", "Roster screen layout", "ui")],
        );
        let before = fs::read_to_string(&ctx.paths.store).expect("store");

        update(&ctx, &update_args("UI-001", None)).expect("no-op update");
        assert_eq!(fs::read_to_string(&ctx.paths.store).expect("store"), before);

        update(&ctx, &update_args("UI-001", Some("ready"))).expect("update");
        let doc = ctx.load().expect("load");
        let story = doc.find("UI-001").expect("story");
        assert_eq!(story.status, Status::Ready);
        assert_eq!(story.last_updated.as_deref(), Some(ctx.today.as_str()));

        assert!(update(&ctx, &update_args("UI-404", Some("ready"))).is_err());
        assert!(update(&ctx, &update_args("UI-001", Some("someday"))).is_err());
    }

    #[test]
    fn template_stages_a_temp_story_without_touching_the_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = AppContext::new(
            Some(dir.path().to_path_buf()),
            Some(PathBuf::from("store.json")),
        )
        .expect("context");
        let args = template_args("Odds alert banner", "ui");

        let path = create_from_template(&ctx, &args, TemplateKind::Spike, "101500")
            .expect("template");
        assert_eq!(
            path,
            ctx.paths
                .staging_new()
                .join("TEMP-101500-Odds-alert-banner.md")
        );
        let content = fs::read_to_string(&path).expect("staged file");
        assert!(content.starts_with("---\n"));
        assert!(content.contains("id: TEMP-101500-Odds-alert-banner"));
        assert!(content.contains("## Research Question"));
        assert!(!ctx.paths.store.exists());

        assert!(create_from_template(&ctx, &args, TemplateKind::Spike, "101500").is_err());
        let unknown_epic = template_args("Odds alert banner", "nowhere");
        assert!(create_from_template(&ctx, &unknown_epic, TemplateKind::Basic, "101501").is_err());
        let short_title = template_args("Odds", "ui");
        assert!(create_from_template(&ctx, &short_title, TemplateKind::Basic, "101502").is_err());
    }

    #[test]
    fn prompt_collects_every_field() {
        let answers = "Surface injury news in the match view\nui\nhigh\n3sp\n\nnews, sidebar\n\
**As a** fan\n**I want** injury news\n\n- [ ] News shows in the sidebar\nSorted by kickoff\n\n";
        let mut input = Cursor::new(answers.as_bytes());
        let mut out = Vec::new();
        let draft = prompt_draft(&mut input, &mut out).expect("draft");
        assert_eq!(draft.title(), "Surface injury news in the match view");
        assert_eq!(draft.epic(), "ui");
        assert_eq!(draft.priority, Some(10));
        assert_eq!(draft.estimate.as_deref(), Some("3sp"));
        assert_eq!(draft.owner, None);
        assert_eq!(draft.labels, vec!["news", "sidebar"]);
        assert_eq!(
            draft.user_story.as_deref(),
            Some("**As a** fan\n**I want** injury news")
        );
        assert_eq!(
            draft.acceptance_criteria,
            vec!["News shows in the sidebar", "Sorted by kickoff"]
        );
        assert!(String::from_utf8(out).expect("utf8").contains("Story title: "));
    }

    #[test]
    fn prompt_requires_a_title() {
        let mut input = Cursor::new("\n".as_bytes());
        let mut out = Vec::new();
        assert!(prompt_draft(&mut input, &mut out).is_err());
    }

    #[test]
    fn unknown_status_lists_valid_values() {
        let err = parse_status("someday").expect_err("rejected");
        assert!(err.to_string().contains("draft, backlog, ready"));
        assert_eq!(parse_status("In-Progress").expect("alias"), Status::Active);
    }
}
