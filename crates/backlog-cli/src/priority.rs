use crate::config::{write_text, AppContext};
use anyhow::{anyhow, bail, Result};
use backlog_core::priority::{
    assign_priorities, auto_prioritize_ready, insert_at, plan_shift, set_priority,
    shift_priorities, sort_backlog, AssignScope, PriorityChange,
};
use backlog_core::render::render_prioritization_markdown;
use backlog_core::{BacklogDocument, Story};
use clap::{Args, Subcommand};
use serde_json::Value;
use tracing::info;

const LIST_CEILING: u32 = 20;
const PRIORITY_METHOD: &str = "epic-weighted";

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum PriorityCommand {
    List(PriorityListArgs),
    Assign(AssignArgs),
    Set(SetArgs),
    Shift(ShiftArgs),
    Insert(InsertArgs),
    Auto(AutoArgs),
}

#[derive(Args, Debug)]
pub struct PriorityListArgs {
    /// Include everything, unprioritized stories too
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct AssignArgs {
    /// Recompute every priority, not just unassigned ones
    #[arg(long)]
    pub all: bool,
    /// Also write PRIORITIZATION.md next to the backlog
    #[arg(long)]
    pub markdown: bool,
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    pub id: String,
    pub priority: u32,
}

#[derive(Args, Debug)]
pub struct ShiftArgs {
    #[arg(long)]
    pub from: u32,
    #[arg(long, allow_hyphen_values = true)]
    pub positions: i64,
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct InsertArgs {
    #[arg(value_delimiter = ',', required = true)]
    pub ids: Vec<String>,
    #[arg(long)]
    pub at: u32,
    /// Move existing stories down to make room
    #[arg(long)]
    pub shift: bool,
}

#[derive(Args, Debug)]
pub struct AutoArgs {
    #[arg(long, default_value_t = 10)]
    pub max_priority: u32,
}

pub fn handle_priority_command(ctx: &AppContext, command: PriorityCommand) -> Result<()> {
    match command {
        PriorityCommand::List(args) => list_priorities(ctx, &args),
        PriorityCommand::Assign(args) => assign(ctx, &args),
        PriorityCommand::Set(args) => set(ctx, &args),
        PriorityCommand::Shift(args) => shift(ctx, &args),
        PriorityCommand::Insert(args) => insert(ctx, &args),
        PriorityCommand::Auto(args) => auto(ctx, &args),
    }
}

fn print_changes(changes: &[PriorityChange]) {
    for change in changes {
        println!("  {}: P{} -> P{}", change.id, change.from, change.to);
    }
}

fn list_priorities(ctx: &AppContext, args: &PriorityListArgs) -> Result<()> {
    let doc = ctx.load()?;
    let mut stories: Vec<&Story> = doc
        .backlog
        .iter()
        .filter(|story| args.all || story.priority <= LIST_CEILING)
        .collect();
    stories.sort_by_key(|story| (story.priority, story.id.clone()));

    let mut current = None;
    for story in stories {
        if current != Some(story.priority) {
            current = Some(story.priority);
            if story.is_prioritized() {
                println!("P{}:", story.priority);
            } else {
                println!("Unprioritized:");
            }
        }
        println!("  [{}] {} ({}, {})", story.id, story.title, story.epic, story.status);
    }
    Ok(())
}

fn mark_assigned(doc: &mut BacklogDocument, today: &str) {
    doc.metadata
        .extra
        .insert("priority_assigned".to_string(), Value::String(today.to_string()));
    doc.metadata.extra.insert(
        "priority_method".to_string(),
        Value::String(PRIORITY_METHOD.to_string()),
    );
}

fn assign(ctx: &AppContext, args: &AssignArgs) -> Result<()> {
    let scope = if args.all {
        AssignScope::All
    } else {
        AssignScope::Unassigned
    };

    if args.dry_run {
        let mut doc = ctx.load()?;
        let before: Vec<(String, u32)> = doc
            .backlog
            .iter()
            .map(|story| (story.id.clone(), story.priority))
            .collect();
        assign_priorities(&mut doc.backlog, scope, &ctx.today);
        let changes: Vec<PriorityChange> = doc
            .backlog
            .iter()
            .zip(before)
            .filter(|(story, (_, from))| story.priority != *from)
            .map(|(story, (id, from))| PriorityChange {
                id,
                from,
                to: story.priority,
            })
            .collect();
        println!("Dry run: {} priorities would change", changes.len());
        print_changes(&changes);
        return Ok(());
    }

    let (touched, snapshot) = ctx.update_store(false, |doc| {
        let touched = assign_priorities(&mut doc.backlog, scope, &ctx.today);
        sort_backlog(&mut doc.backlog);
        mark_assigned(doc, &ctx.today);
        Ok(((touched, doc.backlog.clone()), true))
    })?;
    info!(touched, "priorities assigned");
    println!("Assigned priorities to {touched} stories");

    if args.markdown {
        let path = ctx.paths.backlog_dir.join("PRIORITIZATION.md");
        write_text(&path, &render_prioritization_markdown(&snapshot, &ctx.today))?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn set(ctx: &AppContext, args: &SetArgs) -> Result<()> {
    if args.priority == 0 {
        bail!("Priority must be at least 1");
    }
    let change = ctx.update_store(false, |doc| {
        let change = set_priority(&mut doc.backlog, &args.id, args.priority, &ctx.today)
            .ok_or_else(|| anyhow!("Story not found: {}", args.id))?;
        Ok((change, true))
    })?;
    println!("Updated {}: P{} -> P{}", change.id, change.from, change.to);
    Ok(())
}

fn shift(ctx: &AppContext, args: &ShiftArgs) -> Result<()> {
    if args.dry_run {
        let doc = ctx.load()?;
        let changes = plan_shift(&doc.backlog, args.from, args.positions);
        println!(
            "Dry run: shifting {} stories from P{} by {}",
            changes.len(),
            args.from,
            args.positions
        );
        print_changes(&changes);
        return Ok(());
    }

    let changes = ctx.update_store(false, |doc| {
        let changes = shift_priorities(&mut doc.backlog, args.from, args.positions);
        for change in &changes {
            if let Some(story) = doc.find_mut(&change.id) {
                story.last_updated = Some(ctx.today.clone());
            }
        }
        let changed = !changes.is_empty();
        Ok((changes, changed))
    })?;
    println!(
        "Shifted {} stories from P{} by {}",
        changes.len(),
        args.from,
        args.positions
    );
    print_changes(&changes);
    Ok(())
}

fn insert(ctx: &AppContext, args: &InsertArgs) -> Result<()> {
    if args.at == 0 {
        bail!("Priority must be at least 1");
    }
    let outcome = ctx.update_store(false, |doc| {
        let unknown: Vec<&String> = args.ids.iter().filter(|id| doc.find(id).is_none()).collect();
        if !unknown.is_empty() {
            let unknown: Vec<&str> = unknown.iter().map(|id| id.as_str()).collect();
            bail!("Story not found: {}", unknown.join(", "));
        }
        let outcome = insert_at(&mut doc.backlog, &args.ids, args.at, args.shift, &ctx.today);
        Ok((outcome, true))
    })?;
    if !outcome.shifted.is_empty() {
        println!("Shifted {} stories", outcome.shifted.len());
    }
    println!("Placed {} stories starting at P{}", outcome.placed.len(), args.at);
    print_changes(&outcome.placed);
    Ok(())
}

fn auto(ctx: &AppContext, args: &AutoArgs) -> Result<()> {
    let changes = ctx.update_store(false, |doc| {
        let changes = auto_prioritize_ready(&mut doc.backlog, args.max_priority, &ctx.today);
        let changed = !changes.is_empty();
        Ok((changes, changed))
    })?;
    if changes.is_empty() {
        println!("No unprioritized ready stories");
    } else {
        println!("Prioritized {} ready stories", changes.len());
        print_changes(&changes);
    }
    Ok(())
}
