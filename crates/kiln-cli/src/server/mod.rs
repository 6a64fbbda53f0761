//! HTTP layer over an [`Orchestrator`].
//!
//! | Route | |
//! |---|---|
//! | `GET /` | HTML shell for the client bundle, or the error overlay (500) |
//! | `GET /assets/{target}/{*path}` | files from a target's output directory |
//! | `GET /__kiln/targets` | resolved outputs of every target as JSON |
//! | `GET /__kiln/events` | build events as server-sent events (live reload only) |

pub mod overlay;

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router};
use axum::extract::{Path as UrlPath, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use kiln_build::{ArtifactCache, BuildEvent, MANIFEST_FILE, MemoryReporter, Orchestrator, Output, ReportedError};
use tokio::net::TcpListener;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};

use crate::error::{CliError, Result};
use crate::project::{CLIENT, ENTRY, EVENTS_PATH};

pub const TARGETS_PATH: &str = "/__kiln/targets";

const KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    root: PathBuf,
    errors: Option<Arc<MemoryReporter>>,
    live_reload: bool,
    /// Rendered shell per client output.
    shells: Arc<ArtifactCache<String>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, root: impl Into<PathBuf>) -> Self {
        Self {
            orchestrator,
            root: root.into(),
            errors: None,
            live_reload: false,
            shells: Arc::new(ArtifactCache::new()),
        }
    }

    /// Reporter whose latest report fills the error overlay.
    pub fn errors(mut self, errors: Arc<MemoryReporter>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Serve the build event stream and send `no-cache` on assets.
    pub fn live_reload(mut self, enabled: bool) -> Self {
        self.live_reload = enabled;
        self
    }
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(handle_shell))
        .route("/assets/{target}/{*path}", get(handle_asset))
        .route(TARGETS_PATH, get(handle_targets));
    if state.live_reload {
        router = router.route(EVENTS_PATH, get(handle_events));
    }

    router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Bind `127.0.0.1:<port>`.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpListener::bind(addr)
        .await
        .map_err(|e| CliError::Server(format!("Failed to bind to {}: {}", addr, e)))
}

/// Serve until the listener fails.
pub async fn serve(listener: TcpListener, router: Router) -> Result<()> {
    axum::serve(listener, router)
        .await
        .map_err(|e| CliError::Server(format!("Server error: {}", e)))
}

/// URL of a file in a target's output directory.
pub fn asset_url(target: &str, relative_path: &str) -> String {
    format!("/assets/{}/{}", target, relative_path)
}

async fn handle_shell(State(state): State<AppState>) -> Response {
    let output = match state.orchestrator.resolve(CLIENT).await {
        Ok(output) => output,
        Err(e) => {
            tracing::error!("Failed to resolve client build: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let Some(output) = output else {
        let report = state.errors.as_ref().and_then(|errors| errors.last());
        return overlay_response(&state, report.as_ref());
    };
    let page = state
        .shells
        .get_or_load(CLIENT, &output, || async { render_shell(&output) })
        .await;
    match page {
        Ok(html) => Html(html.as_str().to_owned()).into_response(),
        Err(report) => overlay_response(&state, Some(&report)),
    }
}

fn render_shell(output: &Output) -> std::result::Result<String, ReportedError> {
    let Some(script) = output.script(ENTRY) else {
        return Err(ReportedError {
            message: format!("The client build has no script for entry '{}'", ENTRY),
            locations: Vec::new(),
        });
    };

    let script_url = asset_url(CLIENT, &script.relative_path);
    let style_url = output
        .style(ENTRY)
        .map(|style| asset_url(CLIENT, &style.relative_path));
    Ok(overlay::html_shell(&script_url, style_url.as_deref()))
}

fn overlay_response(state: &AppState, report: Option<&ReportedError>) -> Response {
    let events = state.live_reload.then_some(EVENTS_PATH);
    let html = overlay::error_overlay(report, &state.root, events);
    (StatusCode::INTERNAL_SERVER_ERROR, Html(html)).into_response()
}

async fn handle_asset(State(state): State<AppState>, UrlPath((target, path)): UrlPath<(String, String)>) -> Response {
    let Some(service) = state.orchestrator.service(&target) else {
        return not_found(&format!("Unknown target: {}", target));
    };
    let Some(file) = servable_path(service.out_dir(), &path) else {
        return not_found(&format!("Asset not found: {}", path));
    };

    let bytes = match tokio::fs::read(&file).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return not_found(&format!("Asset not found: {}", path));
        }
        Err(e) => {
            tracing::error!("Error reading asset {}: {}", file.display(), e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read asset").into_response();
        }
    };

    let mut response = (StatusCode::OK, [(header::CONTENT_TYPE, content_type(&path))], bytes).into_response();
    if state.live_reload {
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }
    response
}

// `dir/relative` for a bundle file. `None` when `relative` could leave
// `dir`, or names the manifest, a hidden entry (`.virtual/` shims) or an
// unfinished write.
fn servable_path(dir: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let mut components = relative.components().peekable();
    components.peek()?;
    let visible = components.all(|c| match c {
        Component::Normal(name) => !name.to_string_lossy().starts_with('.'),
        _ => false,
    });
    if !visible || relative == Path::new(MANIFEST_FILE) || relative.extension().is_some_and(|ext| ext == "tmp") {
        return None;
    }
    Some(dir.join(relative))
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, message.to_string()).into_response()
}

fn content_type(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");

    match extension {
        "js" | "mjs" | "cjs" => "application/javascript",
        "css" => "text/css",
        "json" | "map" => "application/json",
        "html" => "text/html; charset=utf-8",
        "wasm" => "application/wasm",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        _ => "application/octet-stream",
    }
}

async fn handle_targets(State(state): State<AppState>) -> Json<BTreeMap<String, Option<Arc<Output>>>> {
    let mut outputs = BTreeMap::new();
    for target in state.orchestrator.targets() {
        let output = match state.orchestrator.resolve(target).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("Failed to resolve '{}': {}", target, e);
                None
            }
        };
        outputs.insert(target.to_string(), output);
    }
    Json(outputs)
}

async fn handle_events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!("Live reload client connected");
    let stream = BroadcastStream::new(state.orchestrator.subscribe_builds())
        .filter_map(|event| event.ok().and_then(|event| sse_event(&event)).map(Ok));

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("ping"))
}

/// `rebuilt` or `failed` event carrying the JSON-encoded [`BuildEvent`].
pub fn sse_event(event: &BuildEvent) -> Option<Event> {
    let name = match event {
        BuildEvent::Rebuilt { .. } => "rebuilt",
        BuildEvent::Failed { .. } => "failed",
    };
    match serde_json::to_string(event) {
        Ok(data) => Some(Event::default().event(name).data(data)),
        Err(e) => {
            tracing::warn!("Failed to encode build event: {}", e);
            None
        }
    }
}
