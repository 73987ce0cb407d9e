use std::convert::Infallible;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Form, Path as AxumPath, State};
use axum::http::header::{ACCEPT, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use smash_collector_common::frame::{FrameId, Label, LabelError};
use smash_collector_session::{SessionController, SessionError, SessionSnapshot};
use tokio::sync::{watch, Mutex};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};

use crate::view;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    /// Every operator action goes through this lock, one at a time.
    pub session: Mutex<SessionController>,
    state_rx: watch::Receiver<SessionSnapshot>,
    /// Last failure to show on the page.
    notice: StdMutex<Option<String>>,
    feed_interval: Duration,
}

impl AppState {
    pub fn new(session: SessionController, feed_interval: Duration) -> Self {
        let state_rx = session.subscribe();
        Self {
            session: Mutex::new(session),
            state_rx,
            notice: StdMutex::new(None),
            feed_interval,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        self.state_rx.borrow().clone()
    }

    fn notice(&self) -> Option<String> {
        self.notice.lock().ok().and_then(|n| n.clone())
    }

    fn set_notice(&self, message: Option<String>) {
        if let Ok(mut notice) = self.notice.lock() {
            *notice = message;
        }
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct FrameView {
    id: i64,
    label: Option<Label>,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct SessionView {
    camera_active: bool,
    stream_id: Option<u64>,
    frame_count: usize,
    labeled_count: usize,
    frames: Vec<FrameView>,
}

impl From<&SessionSnapshot> for SessionView {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            camera_active: snapshot.camera_active,
            stream_id: snapshot.stream_id,
            frame_count: snapshot.frame_count(),
            labeled_count: snapshot.labeled_count(),
            frames: snapshot
                .frames
                .iter()
                .map(|f| FrameView {
                    id: f.id().as_i64(),
                    label: f.label(),
                    width: f.image().width,
                    height: f.image().height,
                })
                .collect(),
        }
    }
}

/// Payload of each `session` event on `/events`.
#[derive(Debug, Serialize)]
struct SessionSummary {
    camera_active: bool,
    frame_count: usize,
    labeled: usize,
}

#[derive(Debug, Deserialize)]
struct LabelBody {
    label: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Label(#[from] LabelError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Label(_) => StatusCode::BAD_REQUEST,
            ApiError::Session(e) => match e {
                SessionError::CameraAcquisition(_) | SessionError::Snapshot(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                SessionError::FrameNotFound(_) => StatusCode::NOT_FOUND,
                SessionError::NotLive | SessionError::NothingToExport | SessionError::Closed => {
                    StatusCode::CONFLICT
                }
                SessionError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// JSON clients get the result as JSON; form posts from the page are sent
/// back to it, with failures shown as a notice.
fn finish(
    state: &AppState,
    headers: &HeaderMap,
    result: Result<serde_json::Value, ApiError>,
) -> Response {
    let wants_json = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));

    if wants_json {
        return match result {
            Ok(body) => Json(body).into_response(),
            Err(e) => e.into_response(),
        };
    }

    match result {
        Ok(_) => state.set_notice(None),
        Err(e) => state.set_notice(Some(e.to_string())),
    }
    Redirect::to("/").into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET / (operator page)
async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(view::render_page(&state.snapshot(), state.notice().as_deref()))
}

/// GET /session: current state as JSON
async fn session_state(State(state): State<Arc<AppState>>) -> Json<SessionView> {
    Json(SessionView::from(&state.snapshot()))
}

/// POST /camera/start
async fn start_camera(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let result = acquire_and_attach(&state).await;
    finish(&state, &headers, result)
}

/// The device request runs without holding the session lock, so labeling
/// stays responsive while the camera is opening. The controller decides on
/// attach whether the stream is still wanted.
async fn acquire_and_attach(state: &AppState) -> Result<serde_json::Value, ApiError> {
    let provider = {
        let session = state.session.lock().await;
        if session.is_closed() {
            return Err(SessionError::Closed.into());
        }
        if session.is_live() {
            return Ok(json!({ "camera_active": true }));
        }
        session.provider()
    };

    info!(provider = provider.name(), "requesting camera stream");
    let acquired = provider.acquire().await;

    let mut session = state.session.lock().await;
    match acquired {
        Ok(stream) => session.attach_stream(stream)?,
        Err(e) => return Err(session.acquisition_failed(e).into()),
    }
    Ok(json!({ "camera_active": session.is_live() }))
}

/// POST /camera/stop
async fn stop_camera(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let mut session = state.session.lock().await;
    session.stop_camera();
    let result = Ok(json!({ "camera_active": session.is_live() }));
    drop(session);
    finish(&state, &headers, result)
}

/// POST /capture
async fn capture(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let result = state
        .session
        .lock()
        .await
        .capture_frame()
        .map(|id| json!({ "id": id.as_i64() }))
        .map_err(ApiError::from);
    finish(&state, &headers, result)
}

async fn apply_label(state: &AppState, id: i64, raw: &str) -> Result<serde_json::Value, ApiError> {
    let label: Label = raw.parse()?;
    state
        .session
        .lock()
        .await
        .label_frame(FrameId(id), label)?;
    Ok(json!({ "id": id, "label": label }))
}

/// POST /frames/:id/label: form post from the page
async fn label_form(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
    headers: HeaderMap,
    Form(body): Form<LabelBody>,
) -> Response {
    let result = apply_label(&state, id, &body.label).await;
    finish(&state, &headers, result)
}

/// PATCH /frames/:id, body { "label": "perfect" }
async fn label_json(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
    Json(body): Json<LabelBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    apply_label(&state, id, &body.label).await.map(Json)
}

/// GET /export: the dataset as a file download
async fn export(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let outcome = state.session.lock().await.export_session()?;
    info!(
        records = outcome.records,
        path = outcome.path.display().to_string(),
        "serving export download"
    );
    let disposition = format!("attachment; filename=\"{}\"", outcome.filename);
    Ok((
        [
            (CONTENT_TYPE, "application/json".to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        outcome.document,
    )
        .into_response())
}

/// GET /camera/frame: latest JPEG of the live feed
async fn camera_frame(State(state): State<Arc<AppState>>) -> Response {
    match state.session.lock().await.live_frame() {
        Some(jpeg) => ([(CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /camera/feed: the live feed re-served as MJPEG; ends when the camera stops.
async fn camera_feed(State(state): State<Arc<AppState>>) -> Response {
    let ticker = tokio::time::interval(state.feed_interval);
    let parts = futures_util::stream::unfold((state, ticker), |(state, mut ticker)| async move {
        ticker.tick().await;
        let Some(jpeg) = state.session.lock().await.live_frame() else {
            return None;
        };
        let mut part = Vec::with_capacity(jpeg.len() + 96);
        part.extend_from_slice(
            format!(
                "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                jpeg.len()
            )
            .as_bytes(),
        );
        part.extend_from_slice(&jpeg);
        part.extend_from_slice(b"\r\n");
        Some((Ok::<_, Infallible>(Bytes::from(part)), (state, ticker)))
    });

    (
        [(CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame")],
        Body::from_stream(parts),
    )
        .into_response()
}

/// GET /events: session changes as server-sent events
async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    debug!("SSE client connected");
    let stream = WatchStream::new(state.state_rx.clone())
        .take_while(|snapshot| !snapshot.closed)
        .map(|snapshot| {
            Event::default().event("session").json_data(SessionSummary {
                camera_active: snapshot.camera_active,
                frame_count: snapshot.frame_count(),
                labeled: snapshot.labeled_count(),
            })
        });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("ping"))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/session", get(session_state))
        .route("/camera/start", post(start_camera))
        .route("/camera/stop", post(stop_camera))
        .route("/camera/frame", get(camera_frame))
        .route("/camera/feed", get(camera_feed))
        .route("/capture", post(capture))
        .route("/frames/:id", axum::routing::patch(label_json))
        .route("/frames/:id/label", post(label_form))
        .route("/export", get(export))
        .route("/events", get(events))
        .with_state(state)
}
