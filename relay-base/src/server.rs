use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use derive_new::new;
use eyre::{Context, Result};
use relay_dispatcher::DispatcherMetrics;
use tokio::{net::TcpListener, task::JoinHandle};

/// Serves the relayer metrics on `/metrics`
#[derive(new, Debug)]
pub struct MetricsServer {
    listen_port: u16,
    metrics: DispatcherMetrics,
}

impl MetricsServer {
    /// Bind `0.0.0.0:{listen_port}` and serve on a background task
    pub fn run(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let port = self.listen_port;
            tracing::info!(port, "starting metrics server on 0.0.0.0");
            let listener = TcpListener::bind(format!("0.0.0.0:{port}"))
                .await
                .with_context(|| format!("Failed to bind metrics server to port {port}"))?;
            self.serve(listener).await
        })
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        axum::serve(listener, self.router())
            .await
            .context("Metrics server failed")
    }

    fn router(&self) -> Router {
        let metrics = self.metrics.clone();
        Router::new().route("/metrics", get(move || Self::gather_metrics(metrics)))
    }

    /// Gather available metrics into an encoded (plaintext, OpenMetrics format)
    /// report.
    async fn gather_metrics(metrics: DispatcherMetrics) -> impl IntoResponse {
        tracing::debug!("Traversing route for /metrics endpoint for serving Prometheus metrics");
        match metrics.gather().map(String::from_utf8) {
            Ok(Ok(report)) => (StatusCode::OK, report),
            Ok(Err(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error".into(),
            ),
            Err(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to gather metrics".into(),
            ),
        }
    }
}
