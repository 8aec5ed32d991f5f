//! Service wiring: tracer provider, metrics, pipeline, ingress, and shutdown.

use std::sync::Arc;

use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use snafu::prelude::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracebench_core::{Pipeline, WorkerFault};
use tracing::{debug, error, info, warn};

use crate::config::{Config, ExporterKind, TracingConfig};
use crate::error::{AppError, ConfigSnafu, MetricsSnafu, PipelineSnafu, TracerInitSnafu};
use crate::ingress::{self, Row};
use crate::metrics;
use crate::signal::shutdown_signal;

/// Instrumentation scope for stage spans.
const TRACER_NAME: &str = "tracebench";

/// Build the tracer provider the config asks for.
///
/// The OTLP exporter is batched and must be built inside a tokio runtime.
pub fn build_tracer_provider(config: &TracingConfig) -> Result<SdkTracerProvider, AppError> {
    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .build();
    let builder = SdkTracerProvider::builder().with_resource(resource);

    let builder = match config.exporter {
        ExporterKind::Otlp => {
            let mut exporter = opentelemetry_otlp::SpanExporter::builder().with_tonic();
            if let Some(endpoint) = &config.endpoint {
                exporter = exporter.with_endpoint(endpoint.clone());
            }
            let exporter = exporter.build().map_err(|e| {
                TracerInitSnafu {
                    message: e.to_string(),
                }
                .build()
            })?;
            builder.with_batch_exporter(exporter)
        }
        ExporterKind::Disabled => builder,
    };

    info!(
        service_name = %config.service_name,
        exporter = ?config.exporter,
        endpoint = config.endpoint.as_deref().unwrap_or("default"),
        "Tracer provider initialized"
    );
    Ok(builder.build())
}

/// Flush pending spans and stop the exporter. Both calls block, so they run
/// off the async workers.
pub async fn shutdown_tracer(provider: SdkTracerProvider) {
    let result = tokio::task::spawn_blocking(move || {
        if let Err(e) = provider.force_flush() {
            warn!(error = %e, "Failed to flush spans");
        }
        provider.shutdown()
    })
    .await;

    match result {
        Ok(Ok(())) => debug!("Tracer provider shut down"),
        Ok(Err(e)) => warn!(error = %e, "Tracer provider shutdown failed"),
        Err(e) => error!(error = %e, "Tracer shutdown task failed"),
    }
}

/// Run until a shutdown signal arrives or the ingress server fails.
pub async fn run(config: Config) -> Result<(), AppError> {
    let ingress_addr = config.ingress_addr().context(ConfigSnafu)?;
    let metrics_addr = config.metrics_addr().context(ConfigSnafu)?;

    let servers = CancellationToken::new();
    metrics::init_global(metrics_addr, servers.clone())
        .await
        .context(MetricsSnafu)?;

    let provider = build_tracer_provider(&config.tracing)?;
    let pipeline: Arc<Pipeline<Row>> = Arc::new(
        Pipeline::start(
            &config.pipeline,
            config.pipeline_options(),
            provider.tracer(TRACER_NAME),
        )
        .context(PipelineSnafu)?,
    );

    if let Some(faults) = pipeline.take_faults() {
        tokio::spawn(log_faults(faults));
    }

    let mut ingress_task = tokio::spawn(ingress::serve(
        ingress_addr,
        Arc::clone(&pipeline),
        servers.clone(),
    ));

    let ingress_result = tokio::select! {
        _ = shutdown_signal() => None,
        joined = &mut ingress_task => Some(joined),
    };

    info!("Shutting down");
    servers.cancel();

    let ingress_result = match ingress_result {
        Some(joined) => joined,
        None => ingress_task.await,
    };

    drain(&pipeline, &config).await;
    shutdown_tracer(provider).await;

    match ingress_result {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Ingress task failed");
            Ok(())
        }
    }
}

async fn drain(pipeline: &Pipeline<Row>, config: &Config) {
    let timeout = config.shutdown_timeout();
    if tokio::time::timeout(timeout, pipeline.shutdown()).await.is_err() {
        warn!(
            timeout_secs = timeout.as_secs(),
            "Pipeline did not drain in time"
        );
        pipeline.abort();
    }
}

async fn log_faults(mut faults: mpsc::Receiver<WorkerFault>) {
    while let Some(fault) = faults.recv().await {
        error!(
            stage = fault.stage(),
            sequence = fault.sequence(),
            error = %fault,
            "Stage worker fault"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{Span, Tracer};

    #[test]
    fn test_disabled_exporter_needs_no_runtime() {
        let provider = build_tracer_provider(&TracingConfig {
            service_name: "bench-a".to_string(),
            exporter: ExporterKind::Disabled,
            endpoint: None,
        })
        .unwrap();

        let mut span = provider.tracer(TRACER_NAME).start("Stage1");
        span.end();
        provider.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_otlp_exporter_builds_with_endpoint() {
        let provider = build_tracer_provider(&TracingConfig {
            endpoint: Some("http://127.0.0.1:4317".to_string()),
            ..TracingConfig::default()
        })
        .unwrap();
        shutdown_tracer(provider).await;
    }
}
