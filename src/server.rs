use std::{io, net::SocketAddr, path::Path};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, get_service},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    config::Config,
    error::Error,
    event_router::RouterHandle,
    serial::{line_source::LineSourceBuilder, Connector, LinkState, SerialConnector},
    websocket,
};

/// The reply to `GET /api/captcha`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptchaResponse {
    /// The most recent captcha, `null` if none has been seen yet.
    pub captcha: Option<String>,
}

/// The reply to `GET /api/status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    /// The state of the serial link.
    pub link: LinkState,

    /// The most recent captcha, `null` if none has been seen yet.
    pub captcha: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (StatusCode::SERVICE_UNAVAILABLE, self.to_string()).into_response()
    }
}

/// The routes of the bridge.
///
/// - `/ws`: websocket, pushes events (see [`crate::events::Event`])
/// - `/api/captcha`: the cached captcha
/// - `/api/status`: the link state and cached captcha
/// - `/version`: the version of this server
/// - anything else: files from `static_dir`
pub fn app(router: RouterHandle, static_dir: &Path) -> Router {
    Router::new()
        .route("/ws", get(websocket::ws_handler))
        .route("/api/captcha", get(show_captcha))
        .route("/api/status", get(show_status))
        .route("/version", get(show_version))
        .fallback(get_service(ServeDir::new(static_dir)).handle_error(handle_static_error))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Each websocket and query needs to be able to reach the router
                .layer(Extension(router)),
        )
}

async fn run<C: Connector>(
    config: Config,
    connector: C,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
) -> Result<(), Error> {
    config.validate()?;

    let (source_tx, source_rx) = mpsc::unbounded_channel();
    let router = RouterHandle::new(source_rx);

    let source = LineSourceBuilder::new(connector)
        .set_reconnect_policy(config.reconnect_policy())
        .spawn(source_tx);

    let app = app(router, &config.static_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)));
    let server = axum::Server::try_bind(&addr)
        .map_err(|e| Error::Server(format!("Could not bind to {addr}: {e}")))?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            warn!("No one is waiting for the allocated port");
        }
    }

    info!("Server listening on http://localhost:{}", addr.port());

    let result = server.await.map_err(|e| Error::Server(e.to_string()));

    source.shutdown().await;

    result
}

/// Start the server on an arbitrary available port, reading lines via the given connector.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port<C: Connector>(
    config: Config,
    connector: C,
    allocated_port: oneshot::Sender<u16>,
) -> Result<(), Error> {
    run(config, connector, None, Some(allocated_port)).await
}

/// Start the server on the configured port, reading the configured serial device.
pub async fn run_on_port(config: Config) -> Result<(), Error> {
    let connector = SerialConnector::new(&config.device.path, config.device.baud);
    let port = config.port;

    run(config, connector, Some(port), None).await
}

async fn show_captcha(
    Extension(router): Extension<RouterHandle>,
) -> Result<Json<CaptchaResponse>, Error> {
    let captcha = router.captcha().await?;

    Ok(Json(CaptchaResponse { captcha }))
}

async fn show_status(
    Extension(router): Extension<RouterHandle>,
) -> Result<Json<StatusResponse>, Error> {
    let link = router.link().await?;
    let captcha = router.captcha().await?;

    Ok(Json(StatusResponse { link, captcha }))
}

async fn show_version() -> impl IntoResponse {
    format!("Serial Captcha Bridge v{}\n", env!("CARGO_PKG_VERSION"))
}

async fn handle_static_error(error: io::Error) -> impl IntoResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Unhandled internal error: {error}"),
    )
}
