//! CLI binary for geoconvert.
//!
//! A thin shim over the library crate: `serve` runs the ticket endpoint,
//! `convert` drives one upload-convert workflow and prints the download URL.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use geoconvert::pipeline::{source, transfer};
use geoconvert::server::{self, ServerConfig};
use geoconvert::{
    ConverterConfig, GatewayConfig, GcsGateway, Orchestrator, ProgressCallback, SpatialFormat,
    UploadTicket, WorkflowProgressCallback, WorkflowState,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders one spinner for the active stage and a log line per finished
/// stage.
struct CliProgressCallback {
    bar: ProgressBar,
    /// When the current stage was entered.
    stage_started: Mutex<Instant>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            stage_started: Mutex::new(Instant::now()),
        })
    }

    fn elapsed_and_reset(&self) -> Duration {
        match self.stage_started.lock() {
            Ok(mut started) => {
                let elapsed = started.elapsed();
                *started = Instant::now();
                elapsed
            }
            Err(_) => Duration::ZERO,
        }
    }
}

impl WorkflowProgressCallback for CliProgressCallback {
    fn on_state_change(&self, from: WorkflowState, to: WorkflowState) {
        let elapsed = self.elapsed_and_reset();
        let stage_done = !matches!(to, WorkflowState::Failed | WorkflowState::Cancelled);
        if from != WorkflowState::Idle && stage_done {
            self.bar.println(format!(
                "  {} {:<16} {}",
                green("✓"),
                from.to_string(),
                dim(&format!("{:.1}s", elapsed.as_secs_f64())),
            ));
        }
        if !to.is_terminal() {
            self.bar.set_prefix(to.to_string());
            self.bar.set_message(to.status_message());
        }
    }

    fn on_ticket_issued(&self, ticket: &UploadTicket) {
        self.bar.println(format!(
            "  {} storage key {}",
            cyan("◆"),
            dim(&ticket.storage_key)
        ));
    }

    fn on_completed(&self, _download_url: &str) {
        self.bar.finish_and_clear();
    }

    fn on_failed(&self, _message: &str) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the ticket endpoint (needs storage credentials)
  geoconvert serve --bind 0.0.0.0:3000

  # Convert GeoJSON to CSV in Web Mercator
  geoconvert convert parcels.json --from geojson --to csv \
      --input-crs EPSG:4326 --output-crs EPSG:3857

  # Simplify geometries and download the result
  geoconvert convert roads.geojson --from geojson --to geoparquet \
      --input-crs EPSG:4326 --output-crs EPSG:4326 \
      --simplification 25 --download roads.parquet

  # Machine-readable report
  geoconvert convert parcels.json --from geojson --to csv \
      --input-crs EPSG:4326 --output-crs EPSG:3857 --json

FORMATS:
  geojson, csv, parquet, geoparquet, shapefile, geodatabase

COMMON CRS:
  EPSG:4326    WGS 84
  EPSG:3857    Web Mercator
  EPSG:2263    NAD83 / New York Long Island (ftUS)
  EPSG:32633   WGS 84 / UTM zone 33N

ENVIRONMENT VARIABLES:
  GCP_PROJECT_ID            Project that owns the bucket (serve)
  GCP_BUCKET_NAME           Bucket uploads are written to (serve)
  GCP_CREDENTIALS           Service-account key JSON, or a path to it (serve)
  CONVERSION_FUNCTION_URL   Conversion service endpoint (convert)
  GEOCONVERT_TICKET_URL     Ticket endpoint (convert)
  RUST_LOG                  Overrides the log filter
"#;

/// Upload spatial data files, convert them remotely, and get a download link.
#[derive(Parser, Debug)]
#[command(
    name = "geoconvert",
    version,
    about = "Upload spatial data files, convert format and CRS remotely, and get a download link",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "GEOCONVERT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the result.
    #[arg(short, long, global = true, env = "GEOCONVERT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the ticket endpoint (POST /api/convert).
    Serve(ServeArgs),
    /// Upload a file and convert it.
    Convert(ConvertArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "GEOCONVERT_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// CORS origin allowed to call the endpoint. Repeatable; `*` allows any.
    #[arg(long = "allowed-origin", env = "GEOCONVERT_ALLOWED_ORIGINS",
          value_delimiter = ',', default_value = "*")]
    allowed_origins: Vec<String>,

    /// Project that owns the bucket.
    #[arg(long, env = "GCP_PROJECT_ID", default_value = "")]
    project_id: String,

    /// Bucket uploads are written to.
    #[arg(long, env = "GCP_BUCKET_NAME")]
    bucket: String,

    /// Service-account key JSON, or a path to a file containing it.
    #[arg(long, env = "GCP_CREDENTIALS", hide_env_values = true)]
    credentials: String,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Local spatial data file.
    input: PathBuf,

    /// Format of the input file.
    #[arg(long = "from", value_enum)]
    input_format: Option<FormatArg>,

    /// Format to convert to.
    #[arg(long = "to", value_enum)]
    output_format: Option<FormatArg>,

    /// CRS of the input, e.g. EPSG:4326.
    #[arg(long, default_value = "")]
    input_crs: String,

    /// CRS to reproject to, e.g. EPSG:3857.
    #[arg(long, default_value = "")]
    output_crs: String,

    /// Geometry simplification tolerance (0 disables).
    #[arg(long, default_value_t = 0,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    simplification: u8,

    /// Override the MIME type guessed from the file extension.
    #[arg(long)]
    mime_type: Option<String>,

    /// Ticket endpoint URL.
    #[arg(long, env = "GEOCONVERT_TICKET_URL",
          default_value = "http://localhost:3000/api/convert")]
    ticket_endpoint: String,

    /// Conversion service URL.
    #[arg(long, env = "CONVERSION_FUNCTION_URL")]
    conversion_endpoint: Option<String>,

    /// Origin header sent with the upload and conversion requests.
    #[arg(long, env = "GEOCONVERT_ORIGIN")]
    origin: Option<String>,

    /// Conversion call timeout in seconds.
    #[arg(long, env = "GEOCONVERT_CONVERSION_TIMEOUT", default_value_t = 120)]
    conversion_timeout: u64,

    /// Download the converted file to this path.
    #[arg(short, long)]
    download: Option<PathBuf>,

    /// Print the workflow report as JSON.
    #[arg(long)]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "GEOCONVERT_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Geojson,
    Csv,
    Parquet,
    Geoparquet,
    Shapefile,
    Geodatabase,
}

impl From<FormatArg> for SpatialFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Geojson => SpatialFormat::GeoJson,
            FormatArg::Csv => SpatialFormat::Csv,
            FormatArg::Parquet => SpatialFormat::Parquet,
            FormatArg::Geoparquet => SpatialFormat::GeoParquet,
            FormatArg::Shapefile => SpatialFormat::Shapefile,
            FormatArg::Geodatabase => SpatialFormat::Geodatabase,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives all the feedback that matters during `convert`, so
    // library logs are held back to errors unless asked for.
    let show_progress = match &cli.command {
        Command::Convert(args) => !cli.quiet && !args.no_progress && !args.json,
        Command::Serve(_) => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => {
            serve(args).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Convert(args) => convert(args, cli.quiet, show_progress).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let credentials_json = load_credentials(&args.credentials).await?;
    let gateway_config = GatewayConfig::builder()
        .project_id(args.project_id)
        .bucket(args.bucket)
        .credentials_json(credentials_json)
        .build()
        .context("Invalid storage configuration")?;
    let gateway = GcsGateway::new(&gateway_config).context("Failed to load storage credentials")?;

    server::serve(
        ServerConfig {
            bind: args.bind,
            allowed_origins: args.allowed_origins,
        },
        Arc::new(gateway),
    )
    .await
    .context("Ticket endpoint stopped")
}

/// `GCP_CREDENTIALS` holds the key JSON itself; a path is accepted too.
async fn load_credentials(value: &str) -> Result<String> {
    if value.trim_start().starts_with('{') {
        return Ok(value.to_string());
    }
    tokio::fs::read_to_string(value)
        .await
        .with_context(|| format!("Failed to read credentials from {value:?}"))
}

async fn convert(args: ConvertArgs, quiet: bool, show_progress: bool) -> Result<ExitCode> {
    let src = source::resolve_source(&args.input)
        .await
        .context("Failed to read input file")?;

    let mut request = src.request();
    request.input_format = args.input_format.map(Into::into);
    request.output_format = args.output_format.map(Into::into);
    request.input_crs = args.input_crs.clone();
    request.output_crs = args.output_crs.clone();
    request.simplification_tolerance = args.simplification;
    if let Some(ref mime) = args.mime_type {
        request.declared_mime_type = mime.clone();
    }

    let config = build_config(&args, show_progress)?;
    let orchestrator = Orchestrator::from_config(&config).context("Failed to set up workflow")?;

    // Ctrl-C abandons whichever stage is in flight.
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    if !quiet && !args.json {
        eprintln!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "{} ({} bytes)",
                src.file_name,
                src.bytes.len()
            ))
        );
    }

    let report = orchestrator
        .convert_with_cancel(&request, src.bytes, &cancel)
        .await;

    if args.json {
        let json = serde_json::to_string_pretty(&report.to_json())
            .context("Failed to serialise report")?;
        println!("{json}");
    }

    let Some(url) = report.download_url() else {
        if !args.json {
            eprintln!("{} {}", red("✘"), report.status_line());
        }
        return Ok(ExitCode::FAILURE);
    };

    if !args.json {
        if !quiet {
            eprintln!(
                "{} {}  {}",
                green("✔"),
                report.status_line(),
                dim(&format!("{}ms", report.duration_ms))
            );
        }
        println!("{url}");
    }

    if let Some(ref path) = args.download {
        let client = reqwest::Client::new();
        let written = transfer::fetch_result(
            &client,
            url,
            path,
            Duration::from_secs(config.download_timeout_secs),
        )
        .await
        .context("Failed to download converted file")?;
        if !quiet && !args.json {
            eprintln!(
                "{} {} bytes  →  {}",
                green("✔"),
                written,
                bold(&path.display().to_string())
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Map CLI args to `ConverterConfig`.
fn build_config(args: &ConvertArgs, show_progress: bool) -> Result<ConverterConfig> {
    let mut builder = ConverterConfig::builder()
        .ticket_endpoint(args.ticket_endpoint.clone())
        .conversion_timeout_secs(args.conversion_timeout);

    if let Some(ref url) = args.conversion_endpoint {
        builder = builder.conversion_endpoint(url.clone());
    }
    if let Some(ref origin) = args.origin {
        builder = builder.origin(origin.clone());
    }
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
