use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use skin_lesion_archive::app::{App, DownloadFlags};
use skin_lesion_archive::catalog::{Catalog, CatalogQuery};
use skin_lesion_archive::config::ConfigLoader;
use skin_lesion_archive::domain::{AvailabilityFilter, CaptureFilter, Verbosity};
use skin_lesion_archive::error::SlaError;
use skin_lesion_archive::output::{ConsoleOutput, JsonOutput, OutputMode};
use skin_lesion_archive::transport::HttpTransport;

#[derive(Parser)]
#[command(name = "sla-cli")]
#[command(about = "Acquire and catalog skin lesion image datasets for research")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true, help = "Print JSON instead of tables and summaries")]
    json: bool,

    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List the known datasets")]
    Ls(LsArgs),
    #[command(about = "Download datasets")]
    Download(DownloadArgs),
}

#[derive(Args)]
struct LsArgs {
    #[arg(help = "Only list datasets whose name matches this regex")]
    regex: Option<String>,

    #[arg(short = 'c', long, value_enum, default_value_t = CaptureFilter::All)]
    capture_method: CaptureFilter,

    #[arg(short = 'a', long, value_enum, default_value_t = AvailabilityFilter::All)]
    availability: AvailabilityFilter,

    #[arg(short = 'v', long, value_enum)]
    verbose: Option<Verbosity>,

    #[arg(short = 'l', long)]
    legend: bool,

    #[arg(short = 'o', long, help = "Also write the listing to a CSV file")]
    output_file: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct DownloadArgs {
    datasets: Vec<String>,

    #[arg(short = 'd', long)]
    directory: Option<Utf8PathBuf>,

    #[arg(short = 'f', long, help = "Delete and re-download datasets that already exist")]
    force: bool,

    #[arg(short = 'c', long)]
    clean: bool,

    #[arg(short = 's', long, help = "Reuse an archive already present in the destination")]
    skip: bool,

    #[arg(long)]
    metadata_as_name: bool,

    #[arg(long, help = "Download the complete image-archive metadata instead of datasets")]
    isic_meta: bool,

    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<SlaError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SlaError) -> u8 {
    match error {
        SlaError::UnknownDataset(_)
        | SlaError::UnsupportedDataset(_)
        | SlaError::NoDatasets
        | SlaError::ConfigRead(_)
        | SlaError::ConfigParse(_)
        | SlaError::InvalidConfig(_)
        | SlaError::InvalidRegex(_) => 2,
        SlaError::Http(_)
        | SlaError::HttpStatus { .. }
        | SlaError::MissingTool(_)
        | SlaError::IncompleteDownload { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let catalog = Catalog::bundled()?;

    match cli.command {
        Commands::Ls(args) => run_ls(args, &catalog, output_mode),
        Commands::Download(args) => run_download(args, catalog, output_mode),
    }
}

fn run_ls(args: LsArgs, catalog: &Catalog, output_mode: OutputMode) -> miette::Result<()> {
    let query = CatalogQuery {
        regex: args.regex,
        availability: args.availability,
        capture_method: args.capture_method,
    };

    if args.verbose == Some(Verbosity::Info) && matches!(output_mode, OutputMode::Interactive) {
        print!("{}", catalog.info_report(&query)?);
        return Ok(());
    }

    let table = catalog.table(&query, args.verbose)?;
    if let Some(path) = &args.output_file {
        table.write_csv(path.as_std_path())?;
    }
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_table(&table).into_diagnostic()?,
        OutputMode::Interactive => ConsoleOutput::print_table(&table),
    }

    if args.legend {
        if args.verbose != Some(Verbosity::All) {
            warn!("the legend applies to `--verbose all` listings");
        }
        let legend = catalog.legend();
        match output_mode {
            OutputMode::NonInteractive => JsonOutput::print_table(&legend).into_diagnostic()?,
            OutputMode::Interactive => ConsoleOutput::print_table(&legend),
        }
    }
    Ok(())
}

fn run_download(
    args: DownloadArgs,
    catalog: Catalog,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let settings = ConfigLoader::resolve(args.config.as_deref())?;
    let transport = HttpTransport::new(settings.request_timeout)?;
    let app = App::new(catalog, settings, transport);

    if args.isic_meta {
        return match output_mode {
            OutputMode::NonInteractive => {
                let result = app.download_isic_metadata(args.directory.as_ref(), &JsonOutput)?;
                JsonOutput::print_isic_metadata(&result).into_diagnostic()
            }
            OutputMode::Interactive => {
                let result =
                    app.download_isic_metadata(args.directory.as_ref(), &ConsoleOutput)?;
                ConsoleOutput::print_isic_metadata(&result);
                Ok(())
            }
        };
    }

    let ids = app.resolve_datasets(&args.datasets)?;
    let flags = DownloadFlags {
        destination: args.directory,
        force: args.force,
        clean: args.clean,
        skip: args.skip,
        metadata_as_name: args.metadata_as_name,
    };

    let result = match output_mode {
        OutputMode::NonInteractive => {
            let result = app.download(&ids, &flags, &JsonOutput)?;
            JsonOutput::print_download(&result).into_diagnostic()?;
            result
        }
        OutputMode::Interactive => {
            let result = app.download(&ids, &flags, &ConsoleOutput)?;
            ConsoleOutput::print_download(&result);
            result
        }
    };

    match result.failed() {
        0 => Ok(()),
        failed => Err(SlaError::DatasetsFailed(failed).into()),
    }
}
