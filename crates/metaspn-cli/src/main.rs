#![forbid(unsafe_code)]

mod cmd;
mod output;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use metaspn_lake::config::{UserConfig, load_user_config};
use output::{CliError, OutputMode, render_error};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "spn: personal activity data lake",
    long_about = None
)]
struct Cli {
    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Repository root. Defaults to the user config's `default_repo`, then
    /// the current directory.
    #[arg(long, global = true, value_name = "PATH")]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self, user: &UserConfig) -> OutputMode {
        OutputMode::resolve(self.json, user.output.as_deref())
    }

    fn repo_root(&self, user: &UserConfig) -> anyhow::Result<PathBuf> {
        if let Some(repo) = self.repo.clone().or_else(|| user.default_repo.clone()) {
            return Ok(repo);
        }
        Ok(env::current_dir()?)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Repository",
        about = "Initialize an activity repository",
        after_help = "EXAMPLES:\n    # Initialize the current directory\n    spn init\n\n    # Initialize somewhere else\n    spn --repo ~/lake init"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Writing",
        about = "Append one activity",
        after_help = "EXAMPLES:\n    # Record a published episode\n    spn add --platform podcast --type create --title \"Episode 12\"\n\n    # Backdate a read\n    spn add --platform book --type consume --timestamp 2024-03-01 --title \"Dune\""
    )]
    Add(cmd::add::AddArgs),

    #[command(
        next_help_heading = "Writing",
        about = "Import activities from a JSON or JSONL file",
        after_help = "EXAMPLES:\n    # Import a legacy export\n    spn import tweets.json\n\n    # Import canonical records\n    spn import backfill.jsonl --json"
    )]
    Import(cmd::import::ImportArgs),

    #[command(
        next_help_heading = "Reading",
        about = "List activities matching a filter",
        after_help = "EXAMPLES:\n    # Everything published on the blog this year\n    spn query --platform blog --type create --since 2024-01-01\n\n    # Join enhancement values\n    spn query --enhanced --limit 20 --json"
    )]
    Query(cmd::query::QueryArgs),

    #[command(
        next_help_heading = "Reading",
        about = "Count activities matching a filter",
        after_help = "EXAMPLES:\n    spn count --platform podcast\n    spn count --type consume --json"
    )]
    Count(cmd::count::CountArgs),

    #[command(next_help_heading = "Reading", about = "Show aggregate statistics")]
    Stats(cmd::stats::StatsArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Manage the manifest index",
        after_help = "EXAMPLES:\n    spn index rebuild\n    spn index status --json"
    )]
    Index(cmd::index::IndexArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Truncate torn trailing writes left by a crash"
    )]
    Recover(cmd::recover::RecoverArgs),

    #[command(
        next_help_heading = "Enhancements",
        about = "Inspect enhancement layers and their history",
        after_help = "EXAMPLES:\n    spn enhancements status\n    spn enhancements history quality_scores\n    spn enhancements timeline quality_scores <ACTIVITY_ID>"
    )]
    Enhancements(cmd::enhancements::EnhancementsArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SPN_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "metaspn=debug,info"
        } else {
            "metaspn=info,warn"
        })
    });

    let format = env::var("SPN_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli, output: OutputMode, user: &UserConfig) -> anyhow::Result<()> {
    let root = cli.repo_root(user)?;
    tracing::debug!(root = %root.display(), "resolved repository");

    match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, output, &root),
        Commands::Add(args) => cmd::add::run_add(args, output, &root),
        Commands::Import(args) => cmd::import::run_import(args, output, &root),
        Commands::Query(args) => cmd::query::run_query(args, output, &root),
        Commands::Count(args) => cmd::count::run_count(args, output, &root),
        Commands::Stats(args) => cmd::stats::run_stats(args, output, &root),
        Commands::Index(args) => cmd::index::run_index(args, output, &root),
        Commands::Recover(args) => cmd::recover::run_recover(args, output, &root),
        Commands::Enhancements(args) => cmd::enhancements::run_enhancements(args, output, &root),
    }
}

fn report(output: OutputMode, err: &anyhow::Error) -> ExitCode {
    if let Err(render_err) = render_error(output, &CliError::from(err)) {
        eprintln!("error: {err:#} ({render_err})");
    }
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let user = match load_user_config() {
        Ok(user) => user,
        Err(err) => return report(OutputMode::resolve(cli.json, None), &err),
    };
    let output = cli.output_mode(&user);

    match run(&cli, output, &user) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(output, &err),
    }
}
