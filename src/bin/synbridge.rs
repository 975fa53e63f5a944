use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use synbridge::app::{App, BatchReport, ProgressSinkKind, RunSettings};
use synbridge::archive::{AnnotateReport, ArchiveSync, MirrorReport};
use synbridge::commons::{
    BundlePage, CommonsClient, Entity, EntityHeader, SynapseHttpClient, TableRows, UserProfile,
};
use synbridge::config::{
    ArchiveSettings, CommonsCredentials, Config, ConfigLoader, ExecutionCredentials,
    ResolvedConfig,
};
use synbridge::domain::{
    GeoSeriesId, Submission, SubmissionState, SubmissionStatus, SynapseId,
};
use synbridge::drs::{DrsHttpClient, download_object};
use synbridge::error::BridgeError;
use synbridge::execution::SbgHttpClient;
use synbridge::geo::GeoHttpClient;
use synbridge::monitor::CancellationToken;
use synbridge::output::{JsonOutput, OutputMode};
use synbridge::sra::{SraToolStatus, SraToolkit, SystemSraToolkit};
use synbridge::store::Store;
use synbridge::tui::Tui;

#[derive(Parser)]
#[command(name = "synbridge")]
#[command(about = "Runs Synapse evaluation-queue submissions as CAVATICA tasks and mirrors SRA runs into Synapse")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Process every pending submission of an evaluation queue")]
    Run(RunArgs),
    #[command(about = "Execution platform projects")]
    Project(ProjectArgs),
    #[command(about = "Execution platform apps")]
    App(AppArgs),
    #[command(about = "Mirror and annotate GEO/SRA runs in Synapse")]
    Archive(ArchiveArgs),
    #[command(about = "GA4GH DRS objects")]
    Drs(DrsArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long, help = "Evaluation queue id, overrides queue.evaluation_id")]
    queue: Option<String>,

    #[arg(long)]
    max_polls: Option<u32>,
}

#[derive(Args)]
struct ProjectArgs {
    #[command(subcommand)]
    command: ProjectCommand,
}

#[derive(Subcommand)]
enum ProjectCommand {
    #[command(about = "Return the project with this name, creating it when missing")]
    Ensure {
        name: String,
        #[arg(long)]
        config: Option<String>,
    },
}

#[derive(Args)]
struct AppArgs {
    #[command(subcommand)]
    command: AppCommand,
}

#[derive(Subcommand)]
enum AppCommand {
    #[command(about = "Copy a public app into a project unless it is already there")]
    Copy {
        name: String,
        #[arg(long)]
        project: String,
        #[arg(long)]
        config: Option<String>,
    },
}

#[derive(Args)]
struct ArchiveArgs {
    #[command(subcommand)]
    command: ArchiveCommand,
}

#[derive(Subcommand)]
enum ArchiveCommand {
    #[command(about = "Download SRA runs of GEO series as FASTQ and upload them")]
    Mirror(SeriesArgs),
    #[command(about = "Annotate uploaded FASTQ files with GEO sample metadata")]
    Annotate(SeriesArgs),
}

#[derive(Args, Clone)]
struct SeriesArgs {
    #[arg(help = "GEO series accessions, overrides archive.series")]
    series: Vec<String>,

    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct DrsArgs {
    #[command(subcommand)]
    command: DrsCommand,
}

#[derive(Subcommand)]
enum DrsCommand {
    #[command(about = "Download one DRS object")]
    Download {
        id: String,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        config: Option<String>,
    },
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<BridgeError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BridgeError) -> u8 {
    match error {
        BridgeError::Validation(_)
        | BridgeError::InvalidSynapseId(_)
        | BridgeError::InvalidSrrId(_)
        | BridgeError::InvalidGeoAccession(_)
        | BridgeError::MissingConfig
        | BridgeError::ConfigRead(_)
        | BridgeError::ConfigParse(_)
        | BridgeError::MissingCredentials(_) => 2,
        BridgeError::UnsupportedStatus { .. }
        | BridgeError::PollLimit { .. }
        | BridgeError::Cancelled(_)
        | BridgeError::BatchAborted { .. } => 4,
        error if error.is_external_call() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let store = Store::new()?;

    match cli.command {
        Commands::Run(args) => run_queue(args, store, output_mode),
        Commands::Project(ProjectArgs {
            command: ProjectCommand::Ensure { name, config },
        }) => run_project(&name, config.as_deref(), output_mode),
        Commands::App(AppArgs {
            command:
                AppCommand::Copy {
                    name,
                    project,
                    config,
                },
        }) => run_app(&name, &project, config.as_deref(), output_mode),
        Commands::Archive(ArchiveArgs { command }) => run_archive(command, store, output_mode),
        Commands::Drs(DrsArgs {
            command: DrsCommand::Download { id, out, config },
        }) => run_drs(&id, out, config.as_deref(), store, output_mode),
    }
}

/// The config file is optional for commands that only need credentials.
fn load_optional_config(path: Option<&str>) -> Result<ResolvedConfig, BridgeError> {
    match ConfigLoader::resolve(path) {
        Err(BridgeError::MissingConfig) => ConfigLoader::resolve_config(Config::default()),
        other => other,
    }
}

fn execution_client(config: &ResolvedConfig) -> Result<SbgHttpClient, BridgeError> {
    let credentials = ExecutionCredentials::load(&config.profile)?;
    Ok(SbgHttpClient::new(&credentials)?.with_billing_group(config.billing_group.clone()))
}

fn commons_client() -> Result<SynapseHttpClient, BridgeError> {
    let credentials = CommonsCredentials::load()?;
    let client = SynapseHttpClient::new(&credentials)?;
    let profile = client.login()?;
    tracing::info!(user = %profile.user_name, "logged in to Synapse");
    Ok(client)
}

fn run_queue(args: RunArgs, store: Store, output_mode: OutputMode) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let settings = RunSettings::from_config(&config, args.queue.as_deref(), args.max_polls)?;
    let cancel = CancellationToken::new();
    let app = App::new(execution_client(&config)?, commons_client()?)
        .with_cancellation(cancel.clone());

    let report = match output_mode {
        OutputMode::NonInteractive => app.run_queue(&settings, &JsonOutput)?,
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Run, cancel);
            let run_settings = settings.clone();
            tui.run(move |sink| app.run_queue(&run_settings, sink))?
        }
    };

    let path = store.report_path(&report.evaluation_id, Utc::now());
    Store::write_json_atomic(&path, &report)?;
    tracing::info!(path = %path, "batch report written");

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_batch(&report).into_diagnostic()?,
        OutputMode::Interactive => print_batch_summary(&report),
    }
    match report.abort_error() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn run_project(name: &str, config: Option<&str>, output_mode: OutputMode) -> miette::Result<()> {
    let config = load_optional_config(config)?;
    let app = App::new(execution_client(&config)?, NopCommons);
    let result = match output_mode {
        OutputMode::NonInteractive => app.ensure_project(name, &JsonOutput)?,
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Project, CancellationToken::new());
            let name = name.to_string();
            tui.run(move |sink| app.ensure_project(&name, sink))?
        }
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_project(&result).into_diagnostic()?,
        OutputMode::Interactive => println!(
            "{GREEN}project {} ({}){RESET}",
            result.project.name, result.project.id
        ),
    }
    Ok(())
}

fn run_app(
    name: &str,
    project: &str,
    config: Option<&str>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let config = load_optional_config(config)?;
    let app = App::new(execution_client(&config)?, NopCommons);
    let result = match output_mode {
        OutputMode::NonInteractive => app.ensure_app(name, project, &JsonOutput)?,
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::App, CancellationToken::new());
            let (name, project) = (name.to_string(), project.to_string());
            tui.run(move |sink| app.ensure_app(&name, &project, sink))?
        }
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_app(&result).into_diagnostic()?,
        OutputMode::Interactive => println!(
            "{GREEN}app {} ({}) in project {}{RESET}",
            result.app.name, result.app.id, result.project.name
        ),
    }
    Ok(())
}

fn archive_settings(config: &ResolvedConfig, args: &SeriesArgs) -> Result<ArchiveSettings, BridgeError> {
    let mut settings = config.archive.clone().unwrap_or(ArchiveSettings {
        series: Vec::new(),
        fastq_parent: None,
        fastq_table: None,
        s3_prefix: None,
    });
    if !args.series.is_empty() {
        settings.series = args
            .series
            .iter()
            .map(|value| value.parse::<GeoSeriesId>())
            .collect::<Result<Vec<_>, _>>()?;
    }
    if settings.series.is_empty() {
        return Err(BridgeError::ConfigParse(
            "no GEO series given (archive.series or command arguments)".to_string(),
        ));
    }
    Ok(settings)
}

fn run_archive(command: ArchiveCommand, store: Store, output_mode: OutputMode) -> miette::Result<()> {
    let (args, mirror) = match command {
        ArchiveCommand::Mirror(args) => (args, true),
        ArchiveCommand::Annotate(args) => (args, false),
    };
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let settings = archive_settings(&config, &args)?;

    let sra = SystemSraToolkit::new();
    if mirror {
        if let SraToolStatus::Missing { message } = sra.tool_status() {
            return Err(BridgeError::MissingTool(message).into());
        }
        tracing::info!(tools = ?sra.tool_info(), "SRA toolkit");
    }
    let geo = GeoHttpClient::new(Some(store.clone()))?;
    let cancel = CancellationToken::new();
    let sync = ArchiveSync::new(commons_client()?, sra, geo, store)
        .with_cancellation(cancel.clone());

    if mirror {
        let parent = required(settings.fastq_parent.clone(), "archive.fastq_parent")?;
        let series = settings.series.clone();
        let report = match output_mode {
            OutputMode::NonInteractive => sync.mirror(&series, &parent, &JsonOutput)?,
            OutputMode::Interactive => {
                let mut tui = Tui::new(ProgressSinkKind::Archive, cancel);
                tui.run(move |sink| sync.mirror(&series, &parent, sink))?
            }
        };
        match output_mode {
            OutputMode::NonInteractive => JsonOutput::print_mirror(&report).into_diagnostic()?,
            OutputMode::Interactive => print_mirror_summary(&report),
        }
    } else {
        let table = required(settings.fastq_table.clone(), "archive.fastq_table")?;
        let series = settings.series.clone();
        let prefix = settings.s3_prefix.clone();
        let report = match output_mode {
            OutputMode::NonInteractive => {
                sync.annotate(&series, &table, prefix.as_deref(), &JsonOutput)?
            }
            OutputMode::Interactive => {
                let mut tui = Tui::new(ProgressSinkKind::Archive, cancel);
                tui.run(move |sink| sync.annotate(&series, &table, prefix.as_deref(), sink))?
            }
        };
        match output_mode {
            OutputMode::NonInteractive => JsonOutput::print_annotate(&report).into_diagnostic()?,
            OutputMode::Interactive => print_annotate_summary(&report),
        }
    }
    Ok(())
}

fn run_drs(
    id: &str,
    out: Option<PathBuf>,
    config: Option<&str>,
    store: Store,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let config = load_optional_config(config)?;
    let credentials = ExecutionCredentials::load(&config.profile)?;
    let drs = DrsHttpClient::new(&credentials.auth_token, None)?;
    let dir = out.unwrap_or_else(|| store.drs_dir().into_std_path_buf());
    let download = download_object(&drs, id, Path::new(&dir))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_drs(&download).into_diagnostic()?,
        OutputMode::Interactive => println!(
            "{GREEN}{} -> {} ({} bytes){RESET}",
            download.id,
            download.path.display(),
            download.bytes
        ),
    }
    Ok(())
}

fn required(value: Option<SynapseId>, key: &str) -> Result<SynapseId, BridgeError> {
    value.ok_or_else(|| BridgeError::ConfigParse(format!("{key} is required for this command")))
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

fn print_batch_summary(report: &BatchReport) {
    println!(
        "{CYAN}synbridge: queue {} ({}){RESET}",
        report.evaluation_id, report.status_filter
    );
    println!(
        "{GREEN}processed: {}{RESET}   {RED}failed: {}{RESET}",
        report.outcomes.len(),
        report.failed()
    );
    if report.cancelled {
        println!("{YELLOW}run cancelled before every submission was processed{RESET}");
    }
    if let Some(abort) = &report.aborted {
        println!(
            "{RED}run stopped at {} [{}]: {}{RESET}",
            abort.submission_id, abort.error_kind, abort.error
        );
    }
    for outcome in &report.outcomes {
        match (&outcome.error, &outcome.status) {
            (Some(error), _) => println!(
                "{RED}x {} [{}] {error}{RESET}",
                outcome.submission_id,
                outcome.error_kind.unwrap_or("error")
            ),
            (None, Some(status)) => {
                let color = if *status == SubmissionStatus::Accepted { GREEN } else { YELLOW };
                println!(
                    "{color}- {} {status} task {} returned {} excluded {}{RESET}",
                    outcome.submission_id,
                    outcome.task_id.as_deref().unwrap_or("-"),
                    outcome.returned.len(),
                    outcome.excluded.len()
                );
            }
            (None, None) => println!("- {}", outcome.submission_id),
        }
        for failure in &outcome.return_failures {
            println!("{RED}   return {}: {}{RESET}", failure.output, failure.message);
        }
    }
}

fn print_mirror_summary(report: &MirrorReport) {
    let failed = report.runs.iter().filter(|run| run.error.is_some()).count();
    println!(
        "{CYAN}synbridge: mirrored {} runs{RESET}   {RED}failed: {failed}{RESET}",
        report.runs.len() - failed
    );
    for run in &report.runs {
        match &run.error {
            Some(error) => println!("{RED}x {} {}: {error}{RESET}", run.series, run.run),
            None => println!(
                "{GREEN}- {} {}: {} files{RESET}",
                run.series,
                run.run,
                run.uploaded.len()
            ),
        }
    }
    for failure in &report.series_failures {
        println!("{RED}x {}: {}{RESET}", failure.series, failure.message);
    }
}

fn print_annotate_summary(report: &AnnotateReport) {
    println!(
        "{CYAN}synbridge: annotated {} files{RESET}   {YELLOW}unmatched runs: {}{RESET}   {RED}failed: {}{RESET}",
        report.annotated.len(),
        report.unmatched_runs.len(),
        report.failures.len()
    );
    for failure in &report.failures {
        let run = failure.run.as_ref().map(|run| run.to_string()).unwrap_or_default();
        println!("{RED}x {} {run}: {}{RESET}", failure.series, failure.message);
    }
}

/// Stand-in for commands that never touch the data commons.
struct NopCommons;

fn commons_unused<T>() -> Result<T, BridgeError> {
    Err(BridgeError::CommonsHttp(
        "data commons is not used by this command".to_string(),
    ))
}

impl CommonsClient for NopCommons {
    fn login(&self) -> Result<UserProfile, BridgeError> {
        commons_unused()
    }

    fn get_entity(&self, _id: &SynapseId, _dir: Option<&Path>) -> Result<Entity, BridgeError> {
        commons_unused()
    }

    fn get_children(&self, _parent: &SynapseId) -> Result<Vec<EntityHeader>, BridgeError> {
        commons_unused()
    }

    fn store_folder(&self, _name: &str, _parent: &SynapseId) -> Result<Entity, BridgeError> {
        commons_unused()
    }

    fn store_file(&self, _path: &Path, _parent: &SynapseId) -> Result<Entity, BridgeError> {
        commons_unused()
    }

    fn store_annotations(&self, _entity: &Entity) -> Result<Entity, BridgeError> {
        commons_unused()
    }

    fn table_query(&self, _table: &SynapseId, _sql: &str) -> Result<TableRows, BridgeError> {
        commons_unused()
    }

    fn submission_bundles(
        &self,
        _evaluation_id: &str,
        _status: &SubmissionStatus,
        _offset: usize,
        _limit: usize,
    ) -> Result<BundlePage, BridgeError> {
        commons_unused()
    }

    fn get_submission(&self, _id: &str, _dir: &Path) -> Result<Submission, BridgeError> {
        commons_unused()
    }

    fn store_submission_state(
        &self,
        _state: &SubmissionState,
    ) -> Result<SubmissionState, BridgeError> {
        commons_unused()
    }
}
