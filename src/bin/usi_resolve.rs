use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use usi_resolver::app::App;
use usi_resolver::config::ConfigLoader;
use usi_resolver::error::UsiError;
use usi_resolver::labels::{DEFAULT_LABEL_THRESHOLD, DEFAULT_MAX_LABELS};
use usi_resolver::output::JsonOutput;
use usi_resolver::similarity::{CosineMode, DEFAULT_FRAGMENT_MZ_TOLERANCE, SimilarityParams};

#[derive(Parser)]
#[command(name = "usi-resolve")]
#[command(about = "Resolve Universal Spectrum Identifiers against public mass-spectrometry repositories")]
#[command(version, author)]
struct Cli {
    /// JSON config file (defaults to ./usi-resolver.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve a USI into its spectrum")]
    Resolve(ResolveArgs),
    #[command(about = "Cosine similarity between two spectra")]
    Compare(CompareArgs),
    #[command(about = "Pick the peaks worth labelling in a spectrum")]
    Labels(LabelsArgs),
    #[command(about = "Parse a USI without contacting any repository")]
    Parse(ParseArgs),
}

#[derive(Args)]
struct ResolveArgs {
    usi: String,
}

#[derive(Args)]
struct CompareArgs {
    usi1: String,
    usi2: String,

    #[arg(long, default_value_t = DEFAULT_FRAGMENT_MZ_TOLERANCE)]
    tolerance: f64,

    #[arg(long, value_enum, default_value_t = CosineMode::Standard)]
    cosine: CosineMode,
}

#[derive(Args)]
struct LabelsArgs {
    usi: String,

    #[arg(long, default_value_t = DEFAULT_LABEL_THRESHOLD)]
    threshold: f64,

    #[arg(long, default_value_t = DEFAULT_MAX_LABELS)]
    max_labels: usize,
}

#[derive(Args)]
struct ParseArgs {
    usi: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<UsiError>() {
            let _ = JsonOutput::print_error(error);
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &UsiError) -> u8 {
    match error.status_code() {
        400 | 404 => 2,
        502 | 504 => 3,
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
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let app = App::from_config(&config)?;

    let outcome = match cli.command {
        Commands::Resolve(args) => {
            let resolved = app.spectrum(&args.usi)?;
            JsonOutput::print_spectrum(&resolved).into_diagnostic()
        }
        Commands::Compare(args) => {
            let params = SimilarityParams::new(args.tolerance, args.cosine);
            let result = app.compare(&args.usi1, &args.usi2, params)?;
            JsonOutput::print_comparison(&result).into_diagnostic()
        }
        Commands::Labels(args) => {
            let result = app.labels(&args.usi, args.threshold, args.max_labels)?;
            JsonOutput::print_labels(&result).into_diagnostic()
        }
        Commands::Parse(args) => {
            let result = app.parse(&args.usi)?;
            JsonOutput::print_parse(&result).into_diagnostic()
        }
    };
    app.shutdown();
    outcome
}
