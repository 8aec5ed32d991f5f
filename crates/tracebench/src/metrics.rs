//! Prometheus recorder and the `/metrics` + `/health` server.
//!
//! The recorder is process-global, so the controller is a `OnceLock`
//! singleton guarded by an install lock. `init_test()` installs the recorder
//! without an HTTP listener and tolerates concurrent callers.

use std::net::SocketAddr;
use std::sync::{Mutex, OnceLock, PoisonError};

use axum::{Extension, Router, routing::get};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{AlreadyInitializedSnafu, MetricsError, NotInitializedSnafu, PrometheusInitSnafu};

/// Stage latency is configured in milliseconds; keep resolution there.
const STAGE_DURATION_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// End-to-end latency spans many stages.
const END_TO_END_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

static CONTROLLER: OnceLock<MetricsController> = OnceLock::new();

/// Serializes installs so a losing caller returns only after the winner has
/// published the controller.
static INSTALL: Mutex<()> = Mutex::new(());

/// Access to the installed Prometheus recorder.
pub struct MetricsController {
    handle: PrometheusHandle,
}

impl MetricsController {
    pub fn get() -> Result<&'static Self, MetricsError> {
        CONTROLLER.get().context(NotInitializedSnafu)
    }

    /// Current metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn handle(&self) -> PrometheusHandle {
        self.handle.clone()
    }
}

/// Install the recorder and serve it on `addr` until `shutdown` fires.
pub async fn init_global(addr: SocketAddr, shutdown: CancellationToken) -> Result<(), MetricsError> {
    install()?;
    let controller = MetricsController::get()?;

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "Failed to bind metrics server; metrics will not be served");
            return Ok(());
        }
    };

    let app = router(controller.handle());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            error!(error = %e, "Metrics server error");
        }
    });

    info!(%addr, "Metrics server started");
    Ok(())
}

/// Install the recorder without a listener. Safe to call from many tests.
pub fn init_test() {
    match install() {
        Ok(()) | Err(MetricsError::AlreadyInitialized) => {}
        Err(e) => error!(error = %e, "Failed to install test metrics recorder"),
    }
}

fn install() -> Result<(), MetricsError> {
    let _guard = INSTALL.lock().unwrap_or_else(PoisonError::into_inner);
    ensure!(CONTROLLER.get().is_none(), AlreadyInitializedSnafu);

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("tracebench_stage_processing_duration_seconds".to_string()),
            STAGE_DURATION_BUCKETS,
        )
        .context(PrometheusInitSnafu)?
        .set_buckets_for_metric(
            Matcher::Full("tracebench_end_to_end_latency_seconds".to_string()),
            END_TO_END_BUCKETS,
        )
        .context(PrometheusInitSnafu)?
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    CONTROLLER
        .set(MetricsController { handle })
        .map_err(|_| AlreadyInitializedSnafu.build())
}

/// Routes for the metrics listener.
pub fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(Extension(handle))
}

async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}

pub(crate) async fn health_handler() -> &'static str {
    "ok\n"
}
