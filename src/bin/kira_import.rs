use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_data_import::app::{ImportSummary, Importer, ListResult};
use kira_data_import::config::{DEFAULT_BATCH_SIZE, ImportOptions};
use kira_data_import::error::{ErrorKind, ImportError};
use kira_data_import::output::{JsonOutput, OutputMode, TextProgress};
use kira_data_import::processor::FileReport;
use kira_data_import::store::{DEFAULT_STORE_DIR, Store};

#[derive(Parser)]
#[command(name = "kira-import")]
#[command(about = "Idempotent importer for gene, sample, mutation, expression and segment files")]
#[command(version, author)]
struct Cli {
    /// Store directory (default: .kira-import in the working directory)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Import every file listed in a JSON manifest")]
    Import(ImportArgs),
    #[command(about = "Import a single file")]
    File(FileArgs),
    #[command(about = "List supported data types")]
    Types,
    #[command(about = "List imported data sets and data sources")]
    List,
}

#[derive(Args)]
struct ImportArgs {
    manifest: PathBuf,

    #[command(flatten)]
    options: OptionArgs,
}

#[derive(Args)]
struct FileArgs {
    /// Data type label, see `kira-import types`
    data_type: String,

    path: PathBuf,

    #[arg(long)]
    data_set: String,

    #[command(flatten)]
    options: OptionArgs,
}

#[derive(Args, Clone)]
struct OptionArgs {
    #[arg(long)]
    skip_invalid_records: bool,

    #[arg(long)]
    skip_invalid_samples: bool,

    #[arg(long)]
    skip_invalid_genes: bool,

    #[arg(long)]
    skip_invalid_files: bool,

    #[arg(long)]
    overwrite_data_set: bool,

    #[arg(long)]
    overwrite: bool,

    #[arg(long)]
    force_overwrite: bool,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
}

impl From<OptionArgs> for ImportOptions {
    fn from(args: OptionArgs) -> Self {
        ImportOptions {
            skip_invalid_records: args.skip_invalid_records,
            skip_invalid_samples: args.skip_invalid_samples,
            skip_invalid_genes: args.skip_invalid_genes,
            skip_invalid_files: args.skip_invalid_files,
            overwrite_data_set: args.overwrite_data_set,
            overwrite: args.overwrite,
            force_overwrite: args.force_overwrite,
            batch_size: args.batch_size.max(1),
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ImportError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ImportError) -> u8 {
    match error.kind() {
        ErrorKind::Configuration => 2,
        ErrorKind::InvalidDataSource => 3,
        ErrorKind::Record => 4,
        ErrorKind::Persistence => 5,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let store = match cli.store {
        Some(root) => Store::at(root)?,
        None => Store::new()?,
    };

    match cli.command {
        Commands::Import(args) => run_import(args, &store, output_mode),
        Commands::File(args) => run_file(args, &store, output_mode),
        Commands::Types => run_types(&store, output_mode),
        Commands::List => run_list(&store, output_mode),
    }
}

fn importer(store: &Store, options: ImportOptions) -> miette::Result<Importer> {
    let repositories = store.repositories()?;
    Ok(Importer::with_defaults(repositories, options)?)
}

fn run_import(args: ImportArgs, store: &Store, output_mode: OutputMode) -> miette::Result<()> {
    let importer = importer(store, args.options.into())?;
    let result = match output_mode {
        OutputMode::Json => importer.import_manifest(&args.manifest, &JsonOutput),
        OutputMode::Text => importer.import_manifest(&args.manifest, &TextProgress),
    };
    let summary = match &result {
        Ok(summary) => Some(summary),
        Err(ImportError::ManifestAborted { summary, .. }) => Some(&**summary),
        Err(_) => None,
    };
    if let Some(summary) = summary {
        match output_mode {
            OutputMode::Json => JsonOutput::print_summary(summary).into_diagnostic()?,
            OutputMode::Text => print_import_summary(summary),
        }
    }
    result.map(|_| ()).map_err(Into::into)
}

fn run_file(args: FileArgs, store: &Store, output_mode: OutputMode) -> miette::Result<()> {
    let importer = importer(store, args.options.into())?;
    match output_mode {
        OutputMode::Json => {
            let report =
                importer.import_file(&args.data_type, &args.path, &args.data_set, &JsonOutput)?;
            JsonOutput::print_report(&report).into_diagnostic()?;
        }
        OutputMode::Text => {
            let report =
                importer.import_file(&args.data_type, &args.path, &args.data_set, &TextProgress)?;
            print_file_report(&report);
        }
    }
    Ok(())
}

fn run_types(store: &Store, output_mode: OutputMode) -> miette::Result<()> {
    let importer = importer(store, ImportOptions::default())?;
    let result = importer.types();
    match output_mode {
        OutputMode::Json => JsonOutput::print_types(&result).into_diagnostic()?,
        OutputMode::Text => {
            for data_type in &result.data_types {
                println!("{data_type}");
            }
        }
    }
    Ok(())
}

fn run_list(store: &Store, output_mode: OutputMode) -> miette::Result<()> {
    let importer = importer(store, ImportOptions::default())?;
    let result = importer.list()?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_list(&result).into_diagnostic()?,
        OutputMode::Text => print_list(&result, store),
    }
    Ok(())
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

fn print_import_summary(summary: &ImportSummary) {
    println!("{CYAN}kira-import summary for data set {}{RESET}", summary.data_set);
    println!("{GREEN}imported: {}{RESET}", summary.files_imported);
    println!("{YELLOW}skipped:  {}{RESET}", summary.files_skipped);
    println!("{RED}failed:   {}{RESET}", summary.files_failed);
    for report in &summary.files {
        print_file_report(report);
    }
}

fn print_file_report(report: &FileReport) {
    let color = if report.error.is_some() {
        RED
    } else if report.outcome.is_skipped() {
        YELLOW
    } else {
        GREEN
    };
    println!(
        "{color}  {} {} ({}, {} records, {} skipped){RESET}",
        report.data_type,
        report.path,
        report.outcome.label(),
        report.records_written,
        report.records_skipped
    );
    if let Some(error) = &report.error {
        println!("{color}    {error}{RESET}");
    }
}

fn print_list(result: &ListResult, store: &Store) {
    if result.data_sets.is_empty() {
        println!("no data sets in {} (default store: {DEFAULT_STORE_DIR})", store.root());
        return;
    }
    for data_set in &result.data_sets {
        println!(
            "{CYAN}{}{RESET} {}",
            data_set.key,
            data_set.name.as_deref().unwrap_or("")
        );
        for data_source in result
            .data_sources
            .iter()
            .filter(|source| source.data_set == data_set.key)
        {
            println!(
                "  {} {} {} records={} skipped={}",
                data_source.id,
                data_source.data_type,
                data_source.path,
                data_source.record_count,
                data_source.skipped_count
            );
        }
    }
}
