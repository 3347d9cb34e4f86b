use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kv_provisioner::api::{self, handlers};
use kv_provisioner::cli::{Cli, Commands};
use kv_provisioner::config::{self, Config, LogFormat};
use kv_provisioner::models::request::{KeyVaultName, ProvisionParams};
use kv_provisioner::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let cfg = config::load()?;
    init_tracing(cfg.log_format)?;

    let result = match args.command {
        Some(Commands::Serve { port }) => run_server(cfg, port).await,
        Some(Commands::Provision {
            keyvault_name,
            owning_group_object_id,
        }) => {
            let params = ProvisionParams {
                owning_group_object_id: Some(owning_group_object_id),
                keyvault_name: Some(keyvault_name),
            };
            provision_once(cfg, params).await
        }
        Some(Commands::CheckName { keyvault_name }) => check_name(cfg, &keyvault_name).await,
        None => run_server(cfg, None).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when a collector is configured
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "kv-provisioner"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let (json_layer, pretty_layer) = match format {
        LogFormat::Json => (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            ),
            None,
        ),
        LogFormat::Pretty => (None, Some(tracing_subscriber::fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "kv_provisioner=debug,tower_http=info".into()),
        ))
        .with(json_layer)
        .with(pretty_layer)
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn run_server(cfg: Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(cfg.port);
    tracing::info!(
        subscription_id = %cfg.subscription_id,
        resource_group = %cfg.resource_group_name,
        location = %cfg.location,
        arm_endpoint = %cfg.arm_endpoint,
        "vault provisioning target"
    );

    let state = Arc::new(AppState::from_config(cfg)?);
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("kv-provisioner listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Runs the pipeline once, prints the JSON body the HTTP endpoint would send.
async fn provision_once(cfg: Config, params: ProvisionParams) -> anyhow::Result<()> {
    let state = AppState::from_config(cfg)?;
    let invocation_id = uuid::Uuid::new_v4().to_string();

    let (status, body) = match handlers::provision(&state, params).await {
        Ok(created) => {
            created.log();
            (201, created.body(&invocation_id))
        }
        Err(e) => {
            let failed = e.with_invocation(invocation_id);
            failed.log();
            (failed.error.status().as_u16(), failed.body())
        }
    };

    println!("{}", serde_json::to_string_pretty(&body)?);
    if status >= 400 {
        anyhow::bail!("provisioning failed with status {status}");
    }
    Ok(())
}

async fn check_name(cfg: Config, keyvault_name: &str) -> anyhow::Result<()> {
    let name = KeyVaultName::parse(keyvault_name)?;
    let state = AppState::from_config(cfg)?;
    let result = state.vaults.check_name_availability(&name).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "keyvault_name": name.as_str(),
            "name_available": result.name_available,
            "reason": result.reason,
            "message": result.message,
        }))?
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
