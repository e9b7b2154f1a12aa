use std::env;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use glossync_core::codec;
use glossync_core::config::{ResolvedSettings, load_config, locate_config, write_default_config};
use glossync_core::export::{ExportOptions, ExportReport, export_to_file};
use glossync_core::import::{ImportOptions, ImportReport, import_from_file};
use glossync_core::store::{AuthMode, ConfluenceClient, Credentials, authenticator_for};
use glossync_core::verify::{VerifyReport, verify_connection};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Parser)]
#[command(
    name = "glossync",
    version,
    about = "Sync a glossary table with a Confluence page tree"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "Increase log verbosity (-v info, -vv debug, -vvv trace)")]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Write a starter .glossync/config.toml")]
    Init(InitArgs),
    #[command(about = "List configured categories and their parent page titles")]
    Categories,
    #[command(about = "Check credentials against the content store")]
    Verify(VerifyArgs),
    #[command(about = "Create one page per glossary row")]
    Import(ImportArgs),
    #[command(about = "Rebuild the glossary table from the page tree")]
    Export(ExportArgs),
    #[command(about = "Encode a definition read from stdin into a page body")]
    Encode,
    #[command(about = "Decode a page body read from stdin into a definition")]
    Decode,
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct ModeArgs {
    #[arg(long, conflicts_with = "server", help = "Use cloud mode (email + API token)")]
    cloud: bool,
    #[arg(long, help = "Use server mode (personal access token)")]
    server: bool,
}

impl ModeArgs {
    fn mode_override(&self) -> Option<AuthMode> {
        if self.cloud {
            Some(AuthMode::Cloud)
        } else if self.server {
            Some(AuthMode::Server)
        } else {
            None
        }
    }
}

#[derive(Debug, Args)]
struct VerifyArgs {
    #[command(flatten)]
    mode: ModeArgs,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[arg(value_name = "CSV")]
    path: PathBuf,
    #[arg(long, help = "Resolve parents but do not create pages")]
    dry_run: bool,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
    #[command(flatten)]
    mode: ModeArgs,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(value_name = "CSV")]
    path: PathBuf,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
    #[command(flatten)]
    mode: ModeArgs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(error) = dotenvy::dotenv()
        && !error.not_found()
    {
        eprintln!("warning: failed to load .env: {error}");
    }
    init_tracing(cli.verbose);

    let result = match cli.command {
        Some(Commands::Init(args)) => run_init(cli.config.as_deref(), args),
        Some(Commands::Categories) => run_categories(cli.config.as_deref()),
        Some(Commands::Verify(args)) => run_verify(cli.config.as_deref(), args),
        Some(Commands::Import(args)) => run_import(cli.config.as_deref(), args),
        Some(Commands::Export(args)) => run_export(cli.config.as_deref(), args),
        Some(Commands::Encode) => run_encode(),
        Some(Commands::Decode) => run_decode(),
        None => {
            let mut command = Cli::command();
            command
                .print_help()
                .map(|()| {
                    println!();
                    true
                })
                .map_err(Into::into)
        }
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            error!("{error:#}");
            eprintln!("Error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();
    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("warning: failed to set tracing subscriber: {error}");
    }
}

fn current_dir() -> Result<PathBuf> {
    env::current_dir().context("failed to resolve current directory")
}

fn load_settings(config_flag: Option<&Path>, mode: Option<AuthMode>) -> Result<ResolvedSettings> {
    let location = locate_config(config_flag, &current_dir()?);
    info!(path = %normalize_path(&location.path), source = location.source.as_str(), "loading config");
    let config = load_config(&location.path)?;
    config.resolve(mode)
}

fn connect(settings: &ResolvedSettings) -> Result<ConfluenceClient> {
    let credentials = Credentials::from_lookup(|key| env::var(key).ok());
    let auth = authenticator_for(settings.mode, &credentials)?;
    ConfluenceClient::new(settings.client.clone(), auth)
}

fn run_init(config_flag: Option<&Path>, args: InitArgs) -> Result<bool> {
    let location = locate_config(config_flag, &current_dir()?);
    let wrote = write_default_config(&location.path, args.force)?;

    println!("config_path: {}", normalize_path(&location.path));
    println!("config_source: {}", location.source.as_str());
    println!("wrote_config: {}", format_flag(wrote));
    if !wrote {
        println!("hint: pass --force to overwrite the existing file");
    }
    Ok(true)
}

fn run_categories(config_flag: Option<&Path>) -> Result<bool> {
    let location = locate_config(config_flag, &current_dir()?);
    let config = load_config(&location.path)?;
    let mapping = config.category_mapping()?;

    println!("categories: {}", mapping.len());
    for entry in mapping.entries() {
        println!("  - {} => {}", entry.key, entry.title);
    }
    println!("labels: {}", config.labels().join(", "));
    Ok(true)
}

fn run_verify(config_flag: Option<&Path>, args: VerifyArgs) -> Result<bool> {
    let settings = load_settings(config_flag, args.mode.mode_override())?;
    let mut client = connect(&settings)?;
    let report = verify_connection(&mut client);

    if args.json {
        print_json(&report)?;
    } else {
        print_verify_report(&settings, &report);
    }
    Ok(report.verified)
}

fn run_import(config_flag: Option<&Path>, args: ImportArgs) -> Result<bool> {
    let settings = load_settings(config_flag, args.mode.mode_override())?;
    let mut client = connect(&settings)?;
    let options = ImportOptions {
        space_key: settings.space_key.clone(),
        labels: settings.labels.clone(),
        dry_run: args.dry_run,
    };
    let report = import_from_file(&mut client, &settings.mapping, &args.path, &options)?;

    if args.json {
        print_json(&report)?;
    } else {
        print_import_report(&args.path, &report);
    }
    Ok(report.success)
}

fn run_export(config_flag: Option<&Path>, args: ExportArgs) -> Result<bool> {
    let settings = load_settings(config_flag, args.mode.mode_override())?;
    let mut client = connect(&settings)?;
    let options = ExportOptions {
        space_key: settings.space_key.clone(),
    };
    let report = export_to_file(&mut client, &settings.mapping, &args.path, &options)?;

    if args.json {
        print_json(&report)?;
    } else {
        print_export_report(&args.path, &report);
    }
    Ok(report.success)
}

fn run_encode() -> Result<bool> {
    let input = read_stdin()?;
    println!("{}", codec::encode(input.trim_end_matches(['\r', '\n'])));
    Ok(true)
}

fn run_decode() -> Result<bool> {
    let input = read_stdin()?;
    match codec::decode(&input) {
        Ok(definition) => {
            println!("{definition}");
            Ok(true)
        }
        Err(miss) => {
            eprintln!("no definition found: {miss}");
            Ok(false)
        }
    }
}

fn read_stdin() -> Result<String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("failed to read stdin")?;
    Ok(input)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON report")?;
    println!("{rendered}");
    Ok(())
}

fn print_verify_report(settings: &ResolvedSettings, report: &VerifyReport) {
    println!("credential check");
    println!("mode: {}", settings.mode.as_str());
    println!("base_url: {}", settings.client.base_url);
    println!("verified: {}", format_flag(report.verified));
    println!("identity: {}", report.identity.as_deref().unwrap_or("<none>"));
    if let Some(name) = &report.display_name {
        println!("display_name: {name}");
    }
    if let Some(detail) = &report.detail {
        println!("detail: {detail}");
    }
    println!("request_count: {}", report.request_count);
}

fn print_import_report(path: &Path, report: &ImportReport) {
    println!("glossary import");
    println!("input: {}", normalize_path(path));
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("rows_read: {}", report.rows_read);
    println!("processed: {}", report.processed);
    println!("created: {}", report.created);
    println!("skipped: {}", report.skipped);
    println!("failed: {}", report.failed);
    println!("label_failures: {}", report.label_failures);
    println!("request_count: {}", report.request_count);
    let notable = report
        .rows
        .iter()
        .filter(|row| row.detail.is_some())
        .collect::<Vec<_>>();
    if !notable.is_empty() {
        println!("rows:");
        for row in notable {
            println!(
                "  - row {} [{}] {}: {}",
                row.row,
                row.action.as_str(),
                row.term,
                row.detail.as_deref().unwrap_or_default()
            );
        }
    }
}

fn print_export_report(path: &Path, report: &ExportReport) {
    println!("glossary export");
    println!("output: {}", normalize_path(path));
    println!("rows: {}", report.rows.len());
    for category in &report.categories {
        println!("category.{}: {}", category.key, category.exported);
    }
    println!("unparseable: {}", report.unparseable);
    println!("request_count: {}", report.request_count);
    if !report.errors.is_empty() {
        println!("errors:");
        for error in &report.errors {
            println!("  - {error}");
        }
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
