use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use usi_spectrum_service::app::{App, SpectrumSource};
use usi_spectrum_service::cache::{CacheStore, ElasticCacheStore, NoopCache};
use usi_spectrum_service::catalog::PrideHttpClient;
use usi_spectrum_service::config::{ConfigLoader, DEFAULT_PROFILE, ResolvedConfig};
use usi_spectrum_service::domain::Usi;
use usi_spectrum_service::error::UsiError;
use usi_spectrum_service::extract::ThermoRawFileParser;
use usi_spectrum_service::object_store::FireHttpClient;
use usi_spectrum_service::output::JsonOutput;
use usi_spectrum_service::server::{self, AppState};

type ServiceApp = App<PrideHttpClient, Box<dyn CacheStore>, FireHttpClient, ThermoRawFileParser>;

#[derive(Parser)]
#[command(name = "usi-service")]
#[command(about = "Resolve Universal Spectrum Identifiers to spectra from the PRIDE Archive")]
#[command(version, author)]
struct Cli {
    /// Configuration profile; selects usi-service.<profile>.json
    #[arg(long, global = true, default_value = DEFAULT_PROFILE)]
    profile: String,

    /// Explicit configuration file, overrides --profile
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the HTTP service")]
    Serve(ServeArgs),
    #[command(about = "Resolve a USI to its archive file without downloading")]
    Resolve(UsiArgs),
    #[command(about = "Run the full pipeline once and print the spectrum")]
    Fetch(UsiArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args)]
struct UsiArgs {
    usi: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<UsiError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &UsiError) -> u8 {
    match error {
        UsiError::MalformedUsi(_)
        | UsiError::InvalidUsi(_)
        | UsiError::FileNotResolved { .. }
        | UsiError::ProjectNotResolved(_)
        | UsiError::MissingConfig => 2,
        UsiError::CatalogUnavailable(_)
        | UsiError::CatalogStatus { .. }
        | UsiError::ObjectStoreUnavailable(_)
        | UsiError::ObjectNotFound(_)
        | UsiError::CacheStoreUnavailable(_)
        | UsiError::ExtractionFailed(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref(), &cli.profile)?;
    let app = build_app(&config)?;

    match cli.command {
        Commands::Serve(args) => {
            let port = args.port.unwrap_or(config.listen_port);
            tracing::info!(
                "Starting usi-service v{} (profile {}, {} workers)",
                env!("CARGO_PKG_VERSION"),
                cli.profile,
                config.workers
            );
            let source: Arc<dyn SpectrumSource> = Arc::new(app);
            let state = AppState::new(source.clone(), config.workers);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .into_diagnostic()?;
            runtime.block_on(server::serve(state, port))?;
            Ok(())
        }
        Commands::Resolve(args) => {
            let usi: Usi = args.usi.parse()?;
            let resolution = app.resolve(&usi)?;
            JsonOutput::print_resolution(&resolution).into_diagnostic()?;
            Ok(())
        }
        Commands::Fetch(args) => {
            let outcome = app.spectrum(&args.usi, &CancellationToken::new())?;
            tracing::info!(origin = ?outcome.origin, canonical = %outcome.canonical_usi, "done");
            JsonOutput::print_spectrum(&outcome.spectrum).into_diagnostic()?;
            Ok(())
        }
    }
}

fn build_app(config: &ResolvedConfig) -> Result<ServiceApp, UsiError> {
    let catalog = PrideHttpClient::new(&config.catalog)?;
    let objects = FireHttpClient::new(&config.object_store)?;
    let extractor = ThermoRawFileParser::new(&config.extractor);
    match extractor.tool_version() {
        Some(version) => tracing::info!(%version, "extractor available"),
        None => tracing::warn!(
            program = %config.extractor.program.display(),
            "extractor did not report a version; extraction may fail"
        ),
    }

    let cache: Box<dyn CacheStore> = if config.cache.enabled {
        let store = ElasticCacheStore::new(&config.cache)?;
        if let Err(err) = store.ensure_index() {
            tracing::warn!(error = %err, "cache index check failed; continuing");
        }
        Box::new(store)
    } else {
        tracing::info!("cache disabled");
        Box::new(NoopCache)
    };

    Ok(App::new(
        catalog,
        cache,
        objects,
        extractor,
        config.download_dir.clone(),
    ))
}
