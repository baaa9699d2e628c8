use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod ingest;
mod maintain;
mod priority;
mod report;
mod scan;
mod story;

use config::AppContext;

#[derive(Parser)]
#[command(name = "backlog")]
#[command(about = "Story backlog manager", long_about = None)]
struct Cli {
    /// Project root, defaults to the current directory
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Backlog store, overrides config and BACKLOG_FILE
    #[arg(long, global = true)]
    file: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
#[command(rename_all = "kebab-case")]
enum Command {
    /// Create the backlog, staging and reports directories and an empty store
    Init(story::InitArgs),
    /// Ready-to-start stories, or everything with --all
    List(story::ListArgs),
    Show(story::ShowArgs),
    /// The most urgent open story
    Next(story::NextArgs),
    /// Change status, branch or owner of one story
    Update(story::UpdateArgs),
    /// Create one story from flags or an interactive prompt
    Create(story::CreateArgs),
    /// Admit staged markdown and bulk JSON stories
    Ingest(ingest::IngestArgs),
    /// Compare the backlog tree with the store
    Scan(scan::ScanArgs),
    /// Move story files to the standard layout and add missing frontmatter
    Normalize(scan::NormalizeArgs),
    Priority {
        #[command(subcommand)]
        action: priority::PriorityCommand,
    },
    /// Normalize epics, estimates, owners, priorities, titles and labels
    Cleanup(maintain::CleanupArgs),
    Report(report::ReportArgs),
    /// Grooming report for the top of the backlog
    Groom(maintain::GroomArgs),
    /// Audit the store for structural problems
    Check,
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("BACKLOG_LOG") {
        level
    } else {
        "warn".to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let ctx = AppContext::new(cli.root, cli.file)?;

    match cli.command {
        Command::Init(args) => story::init(&ctx, &args),
        Command::List(args) => story::list(&ctx, &args),
        Command::Show(args) => story::show(&ctx, &args),
        Command::Next(args) => story::next(&ctx, &args),
        Command::Update(args) => story::update(&ctx, &args),
        Command::Create(args) => story::create(&ctx, &args),
        Command::Ingest(args) => ingest::ingest(&ctx, &args),
        Command::Scan(args) => scan::scan(&ctx, &args),
        Command::Normalize(args) => scan::normalize(&ctx, &args),
        Command::Priority { action } => priority::handle_priority_command(&ctx, action),
        Command::Cleanup(args) => maintain::cleanup(&ctx, &args),
        Command::Report(args) => report::report(&ctx, &args),
        Command::Groom(args) => maintain::groom_backlog(&ctx, &args),
        Command::Check => maintain::check(&ctx),
    }
}
