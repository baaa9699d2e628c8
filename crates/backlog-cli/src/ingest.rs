use crate::config::{write_text, AppContext};
use anyhow::{bail, Context, Result};
use backlog_core::extract::{parse_story_markdown, path_to_slash, story_file_name};
use backlog_core::ids::IdAllocator;
use backlog_core::render::render_story_markdown;
use backlog_core::validate::validate_draft;
use backlog_core::{BacklogDocument, Epic, StoryDraft};
use clap::Args;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Only process staging/new/*.md
    #[arg(long, conflicts_with = "json_only")]
    pub markdown_only: bool,
    /// Only process staging/bulk/*.json
    #[arg(long)]
    pub json_only: bool,
    #[arg(long)]
    pub dry_run: bool,
    /// Abort the whole run on the first unreadable staged file
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Default, Deserialize)]
struct BulkFile {
    #[serde(default)]
    stories: Vec<StoryDraft>,
}

pub enum Admitted {
    Created(String),
    Rejected(Vec<String>),
}

/// Turns validated drafts into store records and story files, allocating
/// ids from one counter map for the whole run. A story file that cannot be
/// written rejects its draft and the batch carries on.
pub struct Admission<'a> {
    ctx: &'a AppContext,
    allocator: IdAllocator,
    dry_run: bool,
    written: Vec<PathBuf>,
}

impl<'a> Admission<'a> {
    pub fn new(ctx: &'a AppContext, doc: &BacklogDocument, dry_run: bool) -> Self {
        Self {
            ctx,
            allocator: IdAllocator::from_ids(doc.ids()),
            dry_run,
            written: Vec::new(),
        }
    }

    pub fn admit(&mut self, doc: &mut BacklogDocument, draft: StoryDraft) -> Result<Admitted> {
        let report = validate_draft(&draft);
        if !report.is_valid() {
            return Ok(Admitted::Rejected(report.errors));
        }

        let epic = Epic::normalize(draft.epic());
        let id = if draft.needs_id() {
            match self.allocator.allocate(epic) {
                Ok(id) => id,
                Err(err) => return Ok(Admitted::Rejected(vec![err.to_string()])),
            }
        } else {
            let id = draft.id.as_deref().unwrap_or_default().trim().to_string();
            if doc.find(&id).is_some() {
                return Ok(Admitted::Rejected(vec![format!(
                    "Story id {id} already exists"
                )]));
            }
            self.allocator.observe(&id);
            id
        };

        let file_name = story_file_name(&id, draft.title().trim());
        let target = self
            .ctx
            .paths
            .backlog_dir
            .join(epic.directory())
            .join(file_name);
        let mut story = draft.into_story(id.clone(), &self.ctx.today, &self.ctx.author);
        story.epic = epic.as_str().to_string();
        story.file_path = Some(path_to_slash(&self.ctx.paths.relative_to_root(&target)));

        if self.dry_run {
            println!("Would create story: {} - {}", story.id, story.title);
        } else {
            let markdown = render_story_markdown(&story)
                .with_context(|| format!("Failed to render story {}", story.id))?;
            if let Err(err) = write_text(&target, &markdown) {
                warn!(id = %story.id, error = %err, "story file not written");
                return Ok(Admitted::Rejected(vec![format!("{err:#}")]));
            }
            self.written.push(target.clone());
            println!("Created story: {} - {}", story.id, story.title);
            println!("  Location: {}", target.display());
        }
        debug!(id = %story.id, epic = %story.epic, "admitted story");
        doc.backlog.push(story);
        Ok(Admitted::Created(id))
    }
}

/// Run `admit` inside one locked store cycle. Story files written along the
/// way are removed again when the cycle fails, so no file outlives a store
/// that never recorded it.
pub fn with_admission<T>(
    ctx: &AppContext,
    dry_run: bool,
    admit: impl FnOnce(&mut Admission<'_>, &mut BacklogDocument) -> Result<(T, bool)>,
) -> Result<T> {
    let mut written = Vec::new();
    let outcome = ctx.update_store(true, |doc| {
        let mut admission = Admission::new(ctx, doc, dry_run);
        let result = admit(&mut admission, doc);
        written = admission.written;
        result
    });
    if outcome.is_err() {
        for path in &written {
            if let Err(err) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %err, "failed to remove story file");
            }
        }
    }
    outcome
}

pub fn print_rejection(errors: &[String]) {
    println!("Story validation failed:");
    for error in errors {
        println!("  - {error}");
    }
}

/// Files with one of `extensions` directly inside `dir`, sorted by path.
pub fn collect_staged_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if extensions.iter().any(|wanted| ext.eq_ignore_ascii_case(wanted)) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn archive(ctx: &AppContext, source: &Path) -> Result<PathBuf> {
    let archive_dir = ctx.paths.staging_processed();
    fs::create_dir_all(&archive_dir)
        .with_context(|| format!("Failed to create {}", archive_dir.display()))?;
    let file_name = source
        .file_name()
        .with_context(|| format!("No file name in {}", source.display()))?;
    let target = archive_dir.join(file_name);
    fs::rename(source, &target)
        .with_context(|| format!("Failed to archive {}", source.display()))?;
    Ok(target)
}

/// Staged input read ahead of any store mutation, so a strict run fails
/// before anything is written.
enum Staged {
    Markdown { path: PathBuf, draft: StoryDraft },
    Bulk { path: PathBuf, drafts: Vec<StoryDraft> },
}

fn read_staged(ctx: &AppContext, args: &IngestArgs) -> Result<Vec<Staged>> {
    let mut staged = Vec::new();

    if !args.json_only {
        let new_dir = ctx.paths.staging_new();
        let files = collect_staged_files(&new_dir, &["md"])?;
        if files.is_empty() {
            println!("No markdown files found in {}", new_dir.display());
        } else {
            println!("Processing {} markdown files...", files.len());
        }
        for path in files {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match parse_story_markdown(&content) {
                Ok(parsed) => staged.push(Staged::Markdown {
                    path,
                    draft: parsed.draft,
                }),
                Err(err) if args.strict => {
                    bail!("Failed to parse {}: {err}", path.display());
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping staged story");
                    println!("Failed to parse {}: {err}", path.display());
                }
            }
        }
    }

    if !args.markdown_only {
        for path in collect_staged_files(&ctx.paths.staging_bulk(), &["json"])? {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match serde_json::from_str::<BulkFile>(&content) {
                Ok(bulk) => staged.push(Staged::Bulk {
                    path,
                    drafts: bulk.stories,
                }),
                Err(err) if args.strict => {
                    bail!("Failed to parse {}: {err}", path.display());
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping bulk file");
                    println!("Error processing {}: {err}", path.display());
                }
            }
        }
    }
    Ok(staged)
}

pub fn ingest(ctx: &AppContext, args: &IngestArgs) -> Result<()> {
    let staged = read_staged(ctx, args)?;
    if staged.is_empty() {
        println!("No stories found to process");
        return Ok(());
    }

    let (created, sources) = with_admission(ctx, args.dry_run, |admission, doc| {
        let mut created = 0usize;
        let mut sources = Vec::new();
        for item in staged {
            match item {
                Staged::Markdown { path, draft } => {
                    println!("Processing: {}", path.display());
                    match admission.admit(doc, draft)? {
                        Admitted::Created(_) => {
                            created += 1;
                            sources.push(path);
                        }
                        Admitted::Rejected(errors) => print_rejection(&errors),
                    }
                }
                Staged::Bulk { path, drafts } => {
                    println!("Processing JSON: {}", path.display());
                    for draft in drafts {
                        match admission.admit(doc, draft)? {
                            Admitted::Created(_) => created += 1,
                            Admitted::Rejected(errors) => print_rejection(&errors),
                        }
                    }
                    sources.push(path);
                }
            }
        }
        Ok(((created, sources), created > 0 && !args.dry_run))
    })?;

    // Sources move only once the store holding their records is saved.
    let mut unarchived = 0usize;
    if !args.dry_run {
        for source in &sources {
            match archive(ctx, source) {
                Ok(archived) => println!("  Archived: {}", archived.display()),
                Err(err) => {
                    warn!(path = %source.display(), error = %err, "staged file not archived");
                    println!("Failed to archive {}: {err:#}", source.display());
                    unarchived += 1;
                }
            }
        }
    }

    info!(created, dry_run = args.dry_run, "ingest finished");
    if created == 0 {
        println!("No stories were admitted");
    } else if args.dry_run {
        println!("Dry run: {created} stories would be created");
    } else {
        println!("Successfully processed {created} stories");
    }
    if unarchived > 0 {
        bail!("{unarchived} staged files could not be archived");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn context(root: &Path) -> AppContext {
        AppContext::new(Some(root.to_path_buf()), Some(PathBuf::from("store.json")))
            .expect("context")
    }

    const STAGED: &str = "---\ntitle: Add live odds ingestion from the feed\nepic: data_sources\nid: TEMP-1\n---\n\n## Acceptance Criteria\n- [ ] Odds stored\n";

    #[test]
    fn staged_markdown_is_admitted_and_archived() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = context(dir.path());
        write_text(&ctx.paths.staging_new().join("odds.md"), STAGED).expect("stage");
        write_text(
            &ctx.paths.staging_new().join("broken.md"),
            "no frontmatter here",
        )
        .expect("stage");
        write_text(
            &ctx.paths.staging_bulk().join("batch.json"),
            r#"{"stories": [
                {"title": "Import the fixture calendar", "epic": "ingestion"},
                {"title": "Tiny", "epic": "ingestion"}
            ]}"#,
        )
        .expect("stage bulk");

        let args = IngestArgs {
            markdown_only: false,
            json_only: false,
            dry_run: false,
            strict: false,
        };
        ingest(&ctx, &args).expect("ingest");

        let doc = ctx.load().expect("load");
        let ids: Vec<&str> = doc.ids().collect();
        assert_eq!(ids, vec!["ING-001", "ING-002"]);
        let first = doc.find("ING-001").expect("first story");
        assert_eq!(first.epic, "ingestion");
        assert_eq!(
            first.file_path.as_deref(),
            Some("backlog/ingestion/ING-001-Add_live_odds_ingestion_from_the_feed.md")
        );
        assert!(dir
            .path()
            .join("backlog/ingestion/ING-001-Add_live_odds_ingestion_from_the_feed.md")
            .exists());
        assert!(ctx.paths.staging_processed().join("odds.md").exists());
        assert!(ctx.paths.staging_processed().join("batch.json").exists());
        assert!(ctx.paths.staging_new().join("broken.md").exists());
    }

    #[test]
    fn unwritable_story_file_rejects_only_that_story() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = context(dir.path());
        write_text(&ctx.paths.staging_new().join("a.md"), STAGED).expect("stage");
        write_text(
            &ctx.paths.staging_new().join("b.md"),
            "---\ntitle: Import the fixture calendar feed\nepic: ingestion\n---\n",
        )
        .expect("stage");
        let blocked = ctx
            .paths
            .backlog_dir
            .join("ingestion/ING-002-Import_the_fixture_calendar_feed.md");
        fs::create_dir_all(&blocked).expect("block target");

        let args = IngestArgs {
            markdown_only: true,
            json_only: false,
            dry_run: false,
            strict: false,
        };
        ingest(&ctx, &args).expect("ingest");

        let doc = ctx.load().expect("load");
        let ids: Vec<&str> = doc.ids().collect();
        assert_eq!(ids, vec!["ING-001"]);
        assert!(ctx.paths.staging_processed().join("a.md").exists());
        assert!(ctx.paths.staging_new().join("b.md").exists());
        assert!(!ctx.paths.staging_processed().join("b.md").exists());
    }

    #[test]
    fn failed_cycle_removes_written_story_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = context(dir.path());
        let draft = StoryDraft {
            title: Some("Dark mode for the match view".to_string()),
            epic: Some("ui".to_string()),
            ..StoryDraft::default()
        };
        let outcome: Result<()> = with_admission(&ctx, false, |admission, doc| {
            let admitted = admission.admit(doc, draft)?;
            assert!(matches!(admitted, Admitted::Created(_)));
            bail!("store rejected the batch")
        });
        assert!(outcome.is_err());
        assert!(!ctx
            .paths
            .backlog_dir
            .join("ui/UI-001-Dark_mode_for_the_match_view.md")
            .exists());
        assert!(!ctx.paths.store.exists());
    }

    #[test]
    fn strict_mode_stops_before_writing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = context(dir.path());
        write_text(&ctx.paths.staging_new().join("a.md"), STAGED).expect("stage");
        write_text(&ctx.paths.staging_new().join("b.md"), "---\n[: bad\n---\n").expect("stage");
        let args = IngestArgs {
            markdown_only: true,
            json_only: false,
            dry_run: false,
            strict: true,
        };
        assert!(ingest(&ctx, &args).is_err());
        assert!(!ctx.paths.store.exists());
        assert!(ctx.paths.staging_new().join("a.md").exists());
    }

    #[test]
    fn duplicate_explicit_ids_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = context(dir.path());
        let mut doc = BacklogDocument::default();
        let mut admission = Admission::new(&ctx, &doc, true);
        let draft = StoryDraft {
            id: Some("UI-004".to_string()),
            title: Some("Dark mode for the match view".to_string()),
            epic: Some("ui".to_string()),
            ..StoryDraft::default()
        };
        assert!(matches!(
            admission.admit(&mut doc, draft.clone()).expect("admit"),
            Admitted::Created(id) if id == "UI-004"
        ));
        assert!(matches!(
            admission.admit(&mut doc, draft).expect("admit"),
            Admitted::Rejected(_)
        ));
        let fresh = StoryDraft {
            title: Some("Light mode for the match view".to_string()),
            epic: Some("ui".to_string()),
            ..StoryDraft::default()
        };
        assert!(matches!(
            admission.admit(&mut doc, fresh).expect("admit"),
            Admitted::Created(id) if id == "UI-005"
        ));
    }
}
