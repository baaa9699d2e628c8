use crate::config::{write_text, AppContext, Paths};
use anyhow::{Context, Result};
use backlog_core::extract::{
    extract_tracked_story, is_ignored_story_file, path_to_slash, split_frontmatter, ExtractError,
};
use backlog_core::ids::IdAllocator;
use backlog_core::layout::{plan_layout, rename_dependency, FileState, LayoutFix, LayoutPlan};
use backlog_core::render::render_frontmatter;
use backlog_core::{BacklogDocument, Story};
use clap::Args;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const STORY_GLOBS: [&str; 2] = ["**/*.md", "**/*.markdown"];
const SKIP_GLOBS: [&str; 2] = ["**/templates/**", "**/node_modules/**"];

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Add untracked story files to the store
    #[arg(long)]
    pub apply: bool,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct NormalizeArgs {
    /// List the moves without touching files or the store
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct ScanResult {
    pub untracked: Vec<String>,
    pub missing: Vec<MissingFile>,
    pub tracked: usize,
}

#[derive(Debug, Serialize)]
pub struct MissingFile {
    pub id: String,
    pub file_path: String,
}

struct StoryMatcher {
    include: GlobSet,
    exclude: GlobSet,
}

impl StoryMatcher {
    fn new() -> Result<Self> {
        Ok(Self {
            include: build_globset(&STORY_GLOBS)?,
            exclude: build_globset(&SKIP_GLOBS)?,
        })
    }

    fn is_story(&self, rel: &Path) -> bool {
        let ignored_name = rel
            .file_name()
            .and_then(|name| name.to_str())
            .map(is_ignored_story_file)
            .unwrap_or(true);
        !ignored_name && self.include.is_match(rel) && !self.exclude.is_match(rel)
    }
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob {pattern}"))?);
    }
    builder.build().context("Failed to build glob set")
}

/// Story files under the backlog tree, as root-relative paths.
fn collect_story_files(paths: &Paths) -> Result<Vec<PathBuf>> {
    let matcher = StoryMatcher::new()?;
    let mut files = Vec::new();
    if !paths.backlog_dir.exists() {
        return Ok(files);
    }
    let walker = WalkBuilder::new(&paths.backlog_dir)
        .standard_filters(true)
        .build();
    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let rel = paths.relative_to_root(entry.path());
        if matcher.is_story(&rel) {
            files.push(rel);
        }
    }
    files.sort();
    Ok(files)
}

/// Compare the backlog tree with the store: files no record points at, and
/// records whose file is gone.
pub fn compare(paths: &Paths, doc: &BacklogDocument) -> Result<(ScanResult, Vec<PathBuf>)> {
    let tracked: BTreeSet<String> = doc
        .backlog
        .iter()
        .filter_map(|story| story.file_path.as_deref())
        .map(|path| path_to_slash(Path::new(path)))
        .collect();

    let files = collect_story_files(paths)?;
    let mut result = ScanResult {
        tracked: files.len(),
        ..ScanResult::default()
    };
    let mut untracked = Vec::new();
    for rel in files {
        let slash = path_to_slash(&rel);
        if !tracked.contains(&slash) {
            result.untracked.push(slash);
            untracked.push(rel);
        }
    }
    result.tracked -= untracked.len();

    for story in &doc.backlog {
        if let Some(file_path) = story.file_path.as_deref() {
            if !paths.resolve_record_path(file_path).exists() {
                result.missing.push(MissingFile {
                    id: story.id.clone(),
                    file_path: file_path.to_string(),
                });
            }
        }
    }
    Ok((result, untracked))
}

/// Turn untracked files into records. Ids already used in the store are
/// replaced with a fresh one for the story's epic.
fn adopt(ctx: &AppContext, doc: &mut BacklogDocument, untracked: &[PathBuf]) -> Result<usize> {
    let mut allocator = IdAllocator::from_ids(doc.ids());
    let mut added = 0;
    for rel in untracked {
        let path = ctx.paths.root.join(rel);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let Some(mut story) = extract_tracked_story(rel, &content, &ctx.today, &ctx.author) else {
            continue;
        };
        if doc.find(&story.id).is_some() {
            let fresh = allocator
                .allocate_for(&story.epic)
                .with_context(|| format!("No id left for {}", path_to_slash(rel)))?;
            debug!(from = %story.id, to = %fresh, "id already in use");
            story.id = fresh;
        } else {
            allocator.observe(&story.id);
        }
        println!("Added {} - {} ({})", story.id, story.title, path_to_slash(rel));
        doc.backlog.push(story);
        added += 1;
    }
    Ok(added)
}

pub fn scan(ctx: &AppContext, args: &ScanArgs) -> Result<()> {
    if !args.apply {
        let doc = ctx.load()?;
        let (result, _) = compare(&ctx.paths, &doc)?;
        return print_result(&result, args.json);
    }

    let (result, added) = ctx.update_store(true, |doc| {
        let (result, untracked) = compare(&ctx.paths, doc)?;
        let added = adopt(ctx, doc, &untracked)?;
        Ok(((result, added), added > 0))
    })?;
    print_result(&result, args.json)?;
    info!(added, "scan applied");
    if !args.json {
        println!("Added {added} untracked stories to the store");
    }
    Ok(())
}

fn print_result(result: &ScanResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!("Tracked story files: {}", result.tracked);
    println!("Untracked story files: {}", result.untracked.len());
    for path in &result.untracked {
        println!("  + {path}");
    }
    println!("Records with missing files: {}", result.missing.len());
    for missing in &result.missing {
        println!("  - {} -> {}", missing.id, missing.file_path);
    }
    Ok(())
}

fn file_state(paths: &Paths, file_path: &str) -> FileState {
    let path = paths.resolve_record_path(file_path);
    if !path.is_file() {
        return FileState::Missing;
    }
    match fs::read_to_string(&path) {
        Ok(content) => match split_frontmatter(&content) {
            Err(ExtractError::MissingFrontmatter) => FileState::Plain,
            _ => FileState::WithFrontmatter,
        },
        Err(err) => {
            warn!(path = %path.display(), error = %err, "unreadable story file");
            FileState::Missing
        }
    }
}

/// A relocated story file and the content it had before.
struct Relocated {
    from: PathBuf,
    to: PathBuf,
    original: String,
}

impl Relocated {
    fn restore(&self) {
        if self.to != self.from {
            if let Err(err) = fs::remove_file(&self.to) {
                warn!(path = %self.to.display(), error = %err, "failed to remove moved file");
            }
        }
        if let Err(err) = write_text(&self.from, &self.original) {
            warn!(path = %self.from.display(), error = %err, "failed to restore story file");
        }
    }
}

fn relocate(ctx: &AppContext, story: &Story, fix: &LayoutFix) -> Result<Relocated> {
    let from = ctx.paths.resolve_record_path(&fix.from);
    let to = ctx.paths.resolve_record_path(&fix.to);
    let original = fs::read_to_string(&from)
        .with_context(|| format!("Failed to read {}", from.display()))?;

    let content = if fix.rewrites() {
        let mut updated = story.clone();
        fix.apply_to(&mut updated, &ctx.today);
        let body = match split_frontmatter(&original) {
            Ok((_, body)) => body,
            Err(_) => original.as_str(),
        };
        let frontmatter = render_frontmatter(&updated)
            .with_context(|| format!("Failed to render frontmatter for {}", fix.final_id()))?;
        format!("{frontmatter}\n{}", body.trim_start_matches('\n'))
    } else {
        original.clone()
    };

    write_text(&to, &content)?;
    if fix.moves() {
        if let Err(err) = fs::remove_file(&from) {
            let _ = fs::remove_file(&to);
            return Err(err).with_context(|| format!("Failed to remove {}", from.display()));
        }
    }
    Ok(Relocated { from, to, original })
}

fn print_plan(plan: &LayoutPlan) {
    for fix in &plan.fixes {
        let mut notes = Vec::new();
        if let Some(new_id) = &fix.new_id {
            notes.push(format!("new id {new_id}"));
        }
        if fix.add_frontmatter {
            notes.push("adds frontmatter".to_string());
        }
        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!(" ({})", notes.join(", "))
        };
        println!("  {}: {} -> {}{notes}", fix.id, fix.from, fix.to);
    }
    for conflict in &plan.conflicts {
        println!("  {}: target already taken: {}", conflict.id, conflict.target);
    }
}

/// Move tracked story files to `<backlog>/<epic>/<ID>-<Title>.md`, give
/// plain files frontmatter and replace malformed ids. Moves are undone when
/// the store cannot be saved.
pub fn normalize(ctx: &AppContext, args: &NormalizeArgs) -> Result<()> {
    let prefix = path_to_slash(&ctx.paths.relative_to_root(&ctx.paths.backlog_dir));
    if args.dry_run {
        let doc = ctx.load()?;
        let plan = plan_layout(&doc.backlog, &prefix, |path| file_state(&ctx.paths, path))?;
        println!(
            "Dry run: {} files would be normalized, {} conflicts",
            plan.fixes.len(),
            plan.conflicts.len()
        );
        print_plan(&plan);
        return Ok(());
    }

    let mut relocated: Vec<Relocated> = Vec::new();
    let outcome = ctx.update_store(false, |doc| {
        let plan = plan_layout(&doc.backlog, &prefix, |path| file_state(&ctx.paths, path))?;
        for conflict in &plan.conflicts {
            println!("Skipping {}: target already taken: {}", conflict.id, conflict.target);
        }
        let mut applied = 0usize;
        for fix in &plan.fixes {
            let Some(index) = doc.backlog.iter().position(|story| {
                story.id == fix.id && story.file_path.as_deref() == Some(fix.from.as_str())
            }) else {
                continue;
            };
            match relocate(ctx, &doc.backlog[index], fix) {
                Ok(done) => {
                    relocated.push(done);
                    fix.apply_to(&mut doc.backlog[index], &ctx.today);
                    if let Some(new_id) = &fix.new_id {
                        rename_dependency(&mut doc.backlog, &fix.id, new_id);
                    }
                    println!("{}: {} -> {}", fix.final_id(), fix.from, fix.to);
                    applied += 1;
                }
                Err(err) => {
                    warn!(id = %fix.id, error = %err, "story file not normalized");
                    println!("Failed to normalize {}: {err:#}", fix.id);
                }
            }
        }
        Ok((applied, applied > 0))
    });

    match outcome {
        Ok(applied) => {
            info!(applied, "story files normalized");
            println!("Normalized {applied} story files");
            Ok(())
        }
        Err(err) => {
            for done in relocated.iter().rev() {
                done.restore();
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untracked_and_missing_files_are_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = AppContext::new(
            Some(dir.path().to_path_buf()),
            Some(PathBuf::from("store.json")),
        )
        .expect("context");
        let backlog = &ctx.paths.backlog_dir;
        write_text(&backlog.join("ui/UI-001-Roster.md"), "# UI-001: Roster screen layout\n")
            .expect("write");
        write_text(&backlog.join("ui/UI-007-Dark_mode.md"), "# Dark mode for match view\n")
            .expect("write");
        write_text(&backlog.join("ui/README.md"), "# Notes\n").expect("write");
        write_text(&backlog.join("templates/basic.md"), "# Template\n").expect("write");

        let mut tracked = Story::new("UI-001", "Roster screen layout", "ui");
        tracked.file_path = Some("backlog/ui/UI-001-Roster.md".to_string());
        let mut gone = Story::new("UI-002", "Removed story file", "ui");
        gone.file_path = Some("backlog/ui/UI-002-Gone.md".to_string());
        let mut doc = BacklogDocument {
            backlog: vec![tracked, gone],
            ..BacklogDocument::default()
        };

        let (result, untracked) = compare(&ctx.paths, &doc).expect("compare");
        assert_eq!(result.untracked, vec!["backlog/ui/UI-007-Dark_mode.md"]);
        assert_eq!(result.tracked, 1);
        assert_eq!(result.missing.len(), 1);
        assert_eq!(result.missing[0].id, "UI-002");

        let added = adopt(&ctx, &mut doc, &untracked).expect("adopt");
        assert_eq!(added, 1);
        let adopted = doc.find("UI-007").expect("adopted story");
        assert_eq!(adopted.title, "Dark mode for match view");
        assert_eq!(adopted.epic, "ui");
    }

    #[test]
    fn normalize_moves_files_and_renumbers_malformed_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = AppContext::new(
            Some(dir.path().to_path_buf()),
            Some(PathBuf::from("store.json")),
        )
        .expect("context");
        let backlog = &ctx.paths.backlog_dir;
        let dark_mode = "---\nid: UI-002\ntitle: Dark mode toggle\n---\n\n# Dark mode toggle\n";
        write_text(&backlog.join("accepted/dark-mode.md"), dark_mode).expect("write");
        write_text(&backlog.join("social/s07.md"), "# Share match cards\n\nNotes.\n")
            .expect("write");

        let mut dark = Story::new("UI-002", "Dark mode toggle", "ui");
        dark.file_path = Some("backlog/accepted/dark-mode.md".to_string());
        let mut share = Story::new("S07", "Share match cards", "social_media");
        share.file_path = Some("backlog/social/s07.md".to_string());
        let mut follow_up = Story::new("UI-004", "Depends on sharing", "ui");
        follow_up.dependencies = vec!["S07".to_string()];
        let mut doc = BacklogDocument {
            backlog: vec![dark, share, follow_up],
            ..BacklogDocument::default()
        };
        ctx.store.save(&mut doc, "2025-01-01").expect("seed store");

        normalize(&ctx, &NormalizeArgs { dry_run: false }).expect("normalize");

        let moved = backlog.join("ui/UI-002-Dark_mode_toggle.md");
        assert_eq!(fs::read_to_string(&moved).expect("moved file"), dark_mode);
        assert!(!backlog.join("accepted/dark-mode.md").exists());

        let renumbered = backlog.join("social_media/SOC-001-Share_match_cards.md");
        let content = fs::read_to_string(&renumbered).expect("renumbered file");
        assert!(content.starts_with("---\n"));
        assert!(content.contains("id: SOC-001"));
        assert!(content.ends_with("# Share match cards\n\nNotes.\n"));
        assert!(!backlog.join("social/s07.md").exists());

        let doc = ctx.load().expect("load");
        assert_eq!(
            doc.find("UI-002").and_then(|s| s.file_path.as_deref()),
            Some("backlog/ui/UI-002-Dark_mode_toggle.md")
        );
        assert!(doc.find("S07").is_none());
        assert_eq!(
            doc.find("UI-004").map(|s| s.dependencies.clone()),
            Some(vec!["SOC-001".to_string()])
        );

        let prefix = "backlog";
        let again = plan_layout(&doc.backlog, prefix, |path| file_state(&ctx.paths, path))
            .expect("plan");
        assert!(again.fixes.is_empty());
        assert!(again.conflicts.is_empty());
    }
}
