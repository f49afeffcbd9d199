use std::sync::OnceLock;
use std::time::Duration;

use indicatif::ProgressStyle;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::level_filters::LevelFilter;
use tracing::{Level, Metadata};
use tracing_indicatif::{IndicatifLayer, TickSettings};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, filter, fmt};

use crate::error::TelemetryError;

const CRATE_TARGET_PREFIX: &str = "blinky::";
const SPINNER_TICK: Duration = Duration::from_millis(90);

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

static TRACING: OnceLock<Result<(), TelemetryError>> = OnceLock::new();

/// Installs the global subscriber once per process.
///
/// An explicit `log_level` wins over `RUST_LOG`; without either, only
/// warnings and errors are logged. Later calls return the first outcome.
pub(crate) fn initialise_tracing(
    service_name: &str,
    interactive_terminal: bool,
    log_level: Option<LevelFilter>,
) -> Result<(), &'static TelemetryError> {
    TRACING
        .get_or_init(|| install(service_name, interactive_terminal, log_level))
        .as_ref()
        .copied()
}

fn install(
    service_name: &str,
    interactive_terminal: bool,
    log_level: Option<LevelFilter>,
) -> Result<(), TelemetryError> {
    let provider = SdkTracerProvider::builder().build();
    let tracer = provider.tracer(service_name.to_owned());
    global::set_tracer_provider(provider);

    let filter = log_filter(log_level);
    let layers = if interactive_terminal {
        console_layers(filter)
    } else {
        vec![json_layer(filter)]
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(OpenTelemetryLayer::new(tracer))
        .try_init()?;
    Ok(())
}

/// Pretty events routed through the progress bars, plus spinners for the
/// crate's own spans.
fn console_layers(filter: EnvFilter) -> Vec<BoxedLayer> {
    let progress = IndicatifLayer::new()
        .with_progress_style(spinner_style())
        .with_tick_settings(TickSettings {
            default_tick_interval: Some(SPINNER_TICK),
            ..TickSettings::default()
        });
    let events = fmt::layer()
        .pretty()
        .with_target(false)
        .with_writer(progress.get_stderr_writer())
        .with_filter(filter);

    vec![
        events.boxed(),
        progress
            .with_filter(filter::filter_fn(is_progress_span))
            .boxed(),
    ]
}

fn json_layer(filter: EnvFilter) -> BoxedLayer {
    fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter)
        .boxed()
}

fn log_filter(log_level: Option<LevelFilter>) -> EnvFilter {
    match log_level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan.bold} {span_name} {msg}")
        .unwrap_or_else(|_error| ProgressStyle::default_spinner())
}

fn is_progress_span(metadata: &Metadata<'_>) -> bool {
    metadata.is_span()
        && metadata.target().starts_with(CRATE_TARGET_PREFIX)
        && *metadata.level() <= Level::INFO
}
