//! Servable implementations: data web listener, stat gRPC, probe, metrics
//! exposition, the disk cleaner, and the scale-to-zero grace listener.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use seedgate_api::{ApiState, BlockedListener, build_router};
use seedgate_api::grpc::{StatService, TorrentWebSeederServer};
use seedgate_config::ListenSettings;
use seedgate_storage::Cleaner;
use seedgate_telemetry::Metrics;

use crate::supervisor::Servable;

/// The data-port HTTP listener.
pub struct WebServable {
    /// Listener address.
    pub settings: ListenSettings,
    /// Shared request state.
    pub state: Arc<ApiState>,
}

#[async_trait]
impl Servable for WebServable {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn serve(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let addr = self.settings.addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("bind web listener on {addr}"))?;
        info!(addr, "serving web");
        let blocked = BlockedListener::new(listener, vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
        axum::serve(blocked, build_router(self.state))
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .context("web server")
    }
}

/// The stat gRPC listener.
pub struct StatGrpcServable {
    /// Listener address.
    pub settings: ListenSettings,
    /// Shared request state.
    pub state: Arc<ApiState>,
}

#[async_trait]
impl Servable for StatGrpcServable {
    fn name(&self) -> &'static str {
        "stat-grpc"
    }

    async fn serve(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let addr: SocketAddr = self
            .settings
            .addr()
            .parse()
            .with_context(|| format!("parse stat listener address {}", self.settings.addr()))?;
        info!(addr = %addr, "serving stat");
        tonic::transport::Server::builder()
            .add_service(TorrentWebSeederServer::new(StatService::new(self.state)))
            .serve_with_shutdown(addr, shutdown.cancelled_owned())
            .await
            .context("stat grpc server")
    }
}

/// Liveness/readiness probe listener.
pub struct ProbeServable {
    /// Listener address.
    pub settings: ListenSettings,
}

#[async_trait]
impl Servable for ProbeServable {
    fn name(&self) -> &'static str {
        "probe"
    }

    async fn serve(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let app = Router::new()
            .route("/healthz", get(|| async { "ok" }))
            .route("/readyz", get(|| async { "ok" }));
        let addr = self.settings.addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("bind probe listener on {addr}"))?;
        info!(addr, "serving probe");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .context("probe server")
    }
}

/// Prometheus exposition listener.
pub struct PromServable {
    /// Listener address.
    pub settings: ListenSettings,
    /// Registry to render.
    pub metrics: Metrics,
}

async fn render_metrics(State(metrics): State<Metrics>) -> Response {
    match metrics.render() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[async_trait]
impl Servable for PromServable {
    fn name(&self) -> &'static str {
        "prom"
    }

    async fn serve(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let app = Router::new()
            .route("/metrics", get(render_metrics))
            .with_state(self.metrics);
        let addr = self.settings.addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("bind metrics listener on {addr}"))?;
        info!(addr, "serving metrics");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .context("metrics server")
    }
}

/// The periodic disk cleaner.
pub struct CleanerServable {
    /// The cleaner to drive.
    pub cleaner: Cleaner,
}

#[async_trait]
impl Servable for CleanerServable {
    fn name(&self) -> &'static str {
        "cleaner"
    }

    async fn serve(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        info!("serving cleaner");
        self.cleaner
            .run(shutdown)
            .await
            .map_err(anyhow::Error::from)
            .context("cleaner")
    }
}

/// Scale-to-zero grace listener: cancels the shutdown token after a period
/// without data-port I/O so orchestrators can retire the instance.
pub struct GraceServable {
    /// Inactivity window.
    pub grace: Duration,
    /// Source of the last-activity timestamp.
    pub state: Arc<ApiState>,
}

#[async_trait]
impl Servable for GraceServable {
    fn name(&self) -> &'static str {
        "grace"
    }

    async fn serve(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.state.idle_seconds() >= self.grace.as_secs() {
                        info!(
                            grace_secs = self.grace.as_secs(),
                            "no activity for a grace period"
                        );
                        shutdown.cancel();
                        return Ok(());
                    }
                }
                () = shutdown.cancelled() => return Ok(()),
            }
        }
    }
}
