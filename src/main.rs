#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

use argh::FromArgs;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

use crate::command::{inspect, serve};
use crate::configuration::{Configuration, ObservabilityConfig};

mod command;
mod configuration;
mod entity_store;
mod federation;
mod identity;
mod metrics_provider;
mod pipeline;
mod policy;
mod server;
mod session_store;

fn set_tracing(config: Option<ObservabilityConfig>) -> Result<(), configuration::Error> {
    if let Some(ObservabilityConfig {
        tracing: Some(tracing_config),
    }) = config
    {
        let resource = Resource::builder()
            .with_service_name(env!("CARGO_PKG_NAME"))
            .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
            .build();
        let otlp_exporter = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&tracing_config.endpoint)
            .with_timeout(std::time::Duration::from_secs(10))
            .build()?;

        let tracer_provider = SdkTracerProvider::builder()
            .with_batch_exporter(otlp_exporter)
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource)
            .with_sampler(Sampler::TraceIdRatioBased(tracing_config.sampling_rate))
            .build();

        let tracer = tracer_provider.tracer(env!("CARGO_PKG_NAME"));
        let _ = global::set_tracer_provider(tracer_provider);
        let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);

        let _ = tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(tracing_subscriber::fmt::layer().json())
            .with(telemetry)
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(tracing_subscriber::fmt::layer().json())
            .try_init();
    }
    Ok(())
}

#[derive(FromArgs, PartialEq, Debug)]
/// A storefront web service with federated sign-in and claims-based authorization
struct GlobalArguments {
    #[argh(option, short = 'c', default = "String::from(\"config.toml\")")]
    /// the path to the configuration file, defaults to `config.toml`
    config: String,

    #[argh(option, short = 'e')]
    /// the hosting environment (Development, Staging or Production), overrides the configuration
    environment: Option<String>,

    #[argh(subcommand)]
    subcommand: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum SubCommand {
    Serve(serve::Options),
    Inspect(inspect::Options),
}

fn main() -> Result<(), command::Error> {
    let cli_args: GlobalArguments = argh::from_env();

    let config = Configuration::load(&cli_args.config, cli_args.environment.as_deref())?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|error| {
            command::Error::Initialization(format!("Failed to create Tokio runtime: {error}"))
        })?
        .block_on(run_command(cli_args, config))
}

async fn run_command(
    cli_args: GlobalArguments,
    config: Configuration,
) -> Result<(), command::Error> {
    set_tracing(config.observability.clone())?;

    match cli_args.subcommand {
        SubCommand::Inspect(_) => inspect::Command::new(&config)?.run(),
        SubCommand::Serve(_) => serve::Command::new(&config)?.run().await,
    }
}
