//! HTTP front end: `GET /api/download?url=<page>&probe=<0|1>`.
//!
//! Every request resolves and transcodes on its own; the only shared state is
//! read-only configuration and the shutdown token.

use std::{
    any::Any, convert::Infallible, fmt, future::IntoFuture, io, net::SocketAddr, sync::Arc,
    time::Duration,
};

use axum::{
    async_trait,
    body::Body,
    extract::{rejection::QueryRejection, ConnectInfo, FromRequestParts, Query, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;

use crate::{
    ffmpeg::Transcoder,
    relay,
    resolve::{Endpoints, ResolveError, ResolvedVideo, Resolver},
};

/// How long open requests get to finish once shutdown has begun.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AppContext {
    pub endpoints: Arc<Endpoints>,
    pub transcoder: Arc<Transcoder>,
    /// Cancelling it stops the server and every running transcode.
    pub shutdown: CancellationToken,
    pub drain_timeout: Duration,
}

impl AppContext {
    pub fn new(endpoints: Endpoints, transcoder: Transcoder) -> Self {
        AppContext {
            endpoints: Arc::new(endpoints),
            transcoder: Arc::new(transcoder),
            shutdown: CancellationToken::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Serves the API on `listener` until `ctx.shutdown` is cancelled.
///
/// Running downloads are cancelled with it, so their bodies end after the
/// transcoder teardown. Connections still open after `ctx.drain_timeout`
/// are abandoned.
pub async fn serve(listener: TcpListener, ctx: AppContext) -> io::Result<()> {
    let shutdown = ctx.shutdown.clone();
    let drain_timeout = ctx.drain_timeout;
    let app = create_router(ctx).into_make_service_with_connect_info::<SocketAddr>();

    let signal = shutdown.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { signal.cancelled().await })
        .into_future();

    let deadline = async {
        shutdown.cancelled().await;
        tokio::time::sleep(drain_timeout).await;
    };

    tokio::select! {
        result = server => result,
        _ = deadline => {
            warn!("Connections still open after {:?}, stopping anyway", drain_timeout);
            Ok(())
        }
    }
}

pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/api/download", get(download))
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(ctx)
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    pub url: Option<String>,
    pub probe: Option<String>,
}

impl DownloadParams {
    /// Only the literal `1` turns probing on.
    pub fn is_probe(&self) -> bool {
        self.probe.as_deref() == Some("1")
    }
}

#[derive(Debug, Serialize)]
struct ProbeResponse<'a> {
    status: &'static str,
    title: &'a str,
    video_url: &'a str,
    video_thumbnail: &'a str,
}

impl<'a> From<&'a ResolvedVideo> for ProbeResponse<'a> {
    fn from(video: &'a ResolvedVideo) -> Self {
        ProbeResponse {
            status: "success",
            title: &video.stream.title,
            video_url: &video.stream.media_url,
            video_thumbnail: &video.metadata.thumbnail_url,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    status: &'static str,
    message: &'a str,
}

/// Error answered as `{"status":"error","message":...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request() -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, "Bad request")
    }

    pub fn not_found() -> Self {
        ApiError::new(StatusCode::NOT_FOUND, "Endpoint not found")
    }

    pub fn internal() -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl From<&ResolveError> for ApiError {
    fn from(e: &ResolveError) -> Self {
        let status = match e {
            ResolveError::InvalidInput => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, e.user_message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status: "error",
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Address a request came from: the first `X-Forwarded-For` hop when behind
/// a proxy, else the peer address.
#[derive(Debug, Clone)]
pub struct ClientAddr(Option<String>);

impl fmt::Display for ClientAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_deref().unwrap_or("-"))
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let peer = || {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        };

        Ok(ClientAddr(forwarded.or_else(peer)))
    }
}

async fn download(
    State(ctx): State<AppContext>,
    client: ClientAddr,
    query: Result<Query<DownloadParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = query.map_err(|e| {
        warn!("{} bad download query: {}", client, e);
        ApiError::bad_request()
    })?;

    let page_reference = match params.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => url,
        _ => {
            error!("{} missing url parameter", client);
            return Err(ApiError::from(&ResolveError::InvalidInput));
        }
    };

    let resolver = Resolver::new(Endpoints::clone(&ctx.endpoints));
    let video = resolver.resolve(page_reference).await.map_err(|e| {
        error!("{} {}", client, e);
        ApiError::from(&e)
    })?;

    if params.is_probe() {
        info!("{} stream found for /{}", client, video.slug);
        return Ok(Json(ProbeResponse::from(&video)).into_response());
    }

    info!("{} converting /{}", client, video.slug);
    stream_video(&ctx, &video, &client).await
}

async fn stream_video(
    ctx: &AppContext,
    video: &ResolvedVideo,
    client: &ClientAddr,
) -> Result<Response, ApiError> {
    let mut session = ctx
        .transcoder
        .open_linked(&video.stream, &ctx.shutdown)
        .map_err(|e| {
            error!("{} {}", client, e);
            ApiError::internal()
        })?;

    // Until ffmpeg produced something we can still answer with a proper error.
    let first = session.next_chunk().await.map_err(|e| {
        error!("{} conversion of /{} failed: {}", client, video.slug, e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Unable to convert video stream")
    })?;

    let disposition = format!("attachment; filename={}.mp4", video.stream.title);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(relay::body_stream(session, first)))
        .map_err(|e| {
            error!("{} could not build response: {}", client, e);
            ApiError::internal()
        })
}

async fn not_found() -> ApiError {
    ApiError::not_found()
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Request handler panicked: {}", detail);
    ApiError::internal().into_response()
}
