use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use smash_collector_common::export::{ExportDocument, ExportError};
use smash_collector_common::frame::{CapturedFrame, FrameId, Label};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::device::{AcquireError, MediaDeviceProvider, MediaStream};
use crate::render::{FrameRenderer, RenderError};
use crate::sink::ExportSink;

enum CameraState {
    /// No stream held.
    Idle,
    /// A stream is attached and its feed is displayed.
    Live { stream: Box<dyn MediaStream> },
}

/// Observable view of a session, published after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub camera_active: bool,
    /// Identity of the attached stream while live.
    pub stream_id: Option<u64>,
    /// Newest first.
    pub frames: Vec<CapturedFrame>,
    /// Set once the controller has been torn down; no further changes follow.
    pub closed: bool,
}

impl SessionSnapshot {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn labeled_count(&self) -> usize {
        self.frames.iter().filter(|f| f.is_labeled()).count()
    }

    pub fn can_capture(&self) -> bool {
        self.camera_active
    }

    pub fn can_export(&self) -> bool {
        !self.frames.is_empty()
    }
}

/// Result of a successful export.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub filename: String,
    pub path: PathBuf,
    pub records: usize,
    pub document: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("camera acquisition failed: {0}")]
    CameraAcquisition(#[from] AcquireError),
    #[error("camera is not live")]
    NotLive,
    #[error("failed to snapshot live feed: {0}")]
    Snapshot(#[from] RenderError),
    #[error("no frame with id {0}")]
    FrameNotFound(FrameId),
    #[error("nothing to export: no frames captured")]
    NothingToExport,
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("capture session is closed")]
    Closed,
}

/// Owns the camera stream and the captured frames of one session and drives
/// the `Idle -> Live -> Idle` camera lifecycle.
///
/// The held stream is released by `stop_camera`, by `close`, and on drop,
/// whichever comes first.
pub struct SessionController {
    provider: Arc<dyn MediaDeviceProvider>,
    renderer: Arc<dyn FrameRenderer>,
    sink: Arc<dyn ExportSink>,
    export_filename: String,
    camera: CameraState,
    frames: VecDeque<CapturedFrame>,
    closed: bool,
    state_tx: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    pub fn new(
        provider: Arc<dyn MediaDeviceProvider>,
        renderer: Arc<dyn FrameRenderer>,
        sink: Arc<dyn ExportSink>,
        export_filename: impl Into<String>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionSnapshot::default());
        Self {
            provider,
            renderer,
            sink,
            export_filename: export_filename.into(),
            camera: CameraState::Idle,
            frames: VecDeque::new(),
            closed: false,
            state_tx,
        }
    }

    // -- Camera lifecycle -------------------------------------------------------

    /// Request a stream from the provider and attach it. On failure the
    /// controller stays `Idle` and nothing else changes.
    pub async fn start_camera(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        if self.is_live() {
            debug!("camera already live");
            return Ok(());
        }

        info!(provider = self.provider.name(), "requesting camera stream");
        let acquired = self.provider.acquire().await;
        match acquired {
            Ok(stream) => self.attach_stream(stream),
            Err(e) => Err(self.acquisition_failed(e)),
        }
    }

    /// Provider handle for callers that acquire without holding the controller.
    pub fn provider(&self) -> Arc<dyn MediaDeviceProvider> {
        Arc::clone(&self.provider)
    }

    /// Attach a stream acquired earlier. A stream arriving after the
    /// controller closed, or after another stream was attached, is released
    /// immediately instead.
    pub fn attach_stream(&mut self, mut stream: Box<dyn MediaStream>) -> Result<(), SessionError> {
        if self.closed {
            warn!(stream_id = stream.id(), "session closed before stream arrived, releasing it");
            stream.release_all();
            return Err(SessionError::Closed);
        }
        if let CameraState::Live { stream: current } = &self.camera {
            warn!(
                stream_id = stream.id(),
                current = current.id(),
                "camera already live, releasing extra stream"
            );
            stream.release_all();
            return Ok(());
        }

        info!(stream_id = stream.id(), "Idle→Live: camera stream attached");
        self.camera = CameraState::Live { stream };
        self.publish();
        Ok(())
    }

    /// Record a failed acquisition. State is left untouched.
    pub fn acquisition_failed(&self, error: AcquireError) -> SessionError {
        warn!(error = %error, "camera acquisition failed, staying idle");
        SessionError::CameraAcquisition(error)
    }

    /// Release every track of the held stream and return to `Idle`.
    /// No-op when already idle.
    pub fn stop_camera(&mut self) {
        match std::mem::replace(&mut self.camera, CameraState::Idle) {
            CameraState::Live { mut stream } => {
                stream.release_all();
                info!(stream_id = stream.id(), "Live→Idle: camera stream released");
                self.publish();
            }
            CameraState::Idle => debug!("camera already idle"),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.camera, CameraState::Live { .. })
    }

    /// Latest raw frame of the live feed, for display.
    pub fn live_frame(&self) -> Option<Bytes> {
        match &self.camera {
            CameraState::Live { stream } => stream.latest_frame(),
            CameraState::Idle => None,
        }
    }

    // -- Frames -----------------------------------------------------------------

    /// Snapshot the live feed into a new unlabeled frame at the head of the
    /// session. Camera state is not touched.
    pub fn capture_frame(&mut self) -> Result<FrameId, SessionError> {
        let CameraState::Live { stream } = &self.camera else {
            return Err(SessionError::NotLive);
        };

        let image = self.renderer.snapshot(stream.as_ref())?;
        let id = FrameId::next(
            self.frames.front().map(CapturedFrame::id),
            Utc::now().timestamp_millis(),
        );
        info!(
            frame_id = id.as_i64(),
            stream_id = stream.id(),
            width = image.width,
            height = image.height,
            "frame captured"
        );

        self.frames.push_front(CapturedFrame::new(id, image));
        self.publish();
        Ok(id)
    }

    /// Set the label of frame `id`, replacing any earlier label.
    pub fn label_frame(&mut self, id: FrameId, label: Label) -> Result<(), SessionError> {
        let frame = self
            .frames
            .iter_mut()
            .find(|f| f.id() == id)
            .ok_or(SessionError::FrameNotFound(id))?;

        let previous = frame.label();
        frame.set_label(label);
        debug!(frame_id = id.as_i64(), ?previous, %label, "frame labeled");
        self.publish();
        Ok(())
    }

    pub fn frames(&self) -> impl Iterator<Item = &CapturedFrame> {
        self.frames.iter()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    // -- Export -----------------------------------------------------------------

    /// Serialize every frame (unlabeled ones included) and hand the document
    /// to the export sink. An empty session is rejected.
    pub fn export_session(&self) -> Result<ExportOutcome, SessionError> {
        if self.frames.is_empty() {
            return Err(SessionError::NothingToExport);
        }

        let document = ExportDocument::from_frames(&self.frames);
        let bytes = document.to_json_bytes()?;
        let path = self.sink.save(&bytes, &self.export_filename)?;

        info!(
            records = document.len(),
            bytes = bytes.len(),
            filename = self.export_filename,
            "session exported"
        );
        Ok(ExportOutcome {
            filename: self.export_filename.clone(),
            path,
            records: document.len(),
            document: bytes,
        })
    }

    pub fn export_filename(&self) -> &str {
        &self.export_filename
    }

    // -- Observation ------------------------------------------------------------

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state_tx.subscribe()
    }

    fn publish(&self) {
        let stream_id = match &self.camera {
            CameraState::Live { stream } => Some(stream.id()),
            CameraState::Idle => None,
        };
        self.state_tx.send_replace(SessionSnapshot {
            camera_active: stream_id.is_some(),
            stream_id,
            frames: self.frames.iter().cloned().collect(),
            closed: self.closed,
        });
    }

    // -- Teardown ---------------------------------------------------------------

    /// End the session's use of the camera. Idempotent; later starts fail with
    /// `SessionError::Closed`.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop_camera();
        self.publish();
        info!(frames = self.frames.len(), "capture session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::render::tests::make_test_jpeg;
    use crate::render::JpegRenderer;
    use smash_collector_common::frame::EncodedImage;

    struct FakeStream {
        id: u64,
        frame: Option<Bytes>,
        released: Arc<AtomicBool>,
    }

    impl MediaStream for FakeStream {
        fn id(&self) -> u64 {
            self.id
        }
        fn latest_frame(&self) -> Option<Bytes> {
            self.frame.clone()
        }
        fn is_live(&self) -> bool {
            !self.released.load(Ordering::SeqCst)
        }
        fn release_all(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    impl Drop for FakeStream {
        fn drop(&mut self) {
            self.release_all();
        }
    }

    /// Provider handing out fake streams; fails with `fail_with` when set.
    #[derive(Default)]
    struct FakeProvider {
        fail_with: Mutex<Option<AcquireError>>,
        frame: Option<Bytes>,
        acquired: AtomicUsize,
        released: Mutex<Vec<Arc<AtomicBool>>>,
        next_id: AtomicU64,
    }

    impl FakeProvider {
        fn with_jpeg() -> Self {
            Self {
                frame: Some(Bytes::from(make_test_jpeg(16, 12))),
                ..Self::default()
            }
        }

        fn failing(error: AcquireError) -> Self {
            Self {
                fail_with: Mutex::new(Some(error)),
                ..Self::default()
            }
        }

        fn all_released(&self) -> bool {
            self.released
                .lock()
                .unwrap()
                .iter()
                .all(|r| r.load(Ordering::SeqCst))
        }
    }

    #[async_trait]
    impl MediaDeviceProvider for FakeProvider {
        async fn acquire(&self) -> Result<Box<dyn MediaStream>, AcquireError> {
            if let Some(e) = self.fail_with.lock().unwrap().clone() {
                return Err(e);
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            let released = Arc::new(AtomicBool::new(false));
            self.released.lock().unwrap().push(Arc::clone(&released));
            Ok(Box::new(FakeStream {
                id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                frame: self.frame.clone(),
                released,
            }))
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    /// Renderer producing a distinct data URI per snapshot.
    #[derive(Default)]
    struct CountingRenderer {
        count: AtomicUsize,
    }

    impl FrameRenderer for CountingRenderer {
        fn snapshot(&self, stream: &dyn MediaStream) -> Result<EncodedImage, RenderError> {
            let n = self.count.fetch_add(1, Ordering::SeqCst);
            Ok(EncodedImage::new(
                format!("data:image/jpeg;base64,stream{}-shot{n}", stream.id()),
                640,
                480,
            ))
        }
    }

    #[derive(Default)]
    struct MemorySink {
        saved: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl ExportSink for MemorySink {
        fn save(&self, document: &[u8], filename: &str) -> Result<PathBuf, ExportError> {
            self.saved
                .lock()
                .unwrap()
                .push((filename.to_string(), document.to_vec()));
            Ok(PathBuf::from(filename))
        }
    }

    fn controller(provider: Arc<FakeProvider>) -> (SessionController, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let controller = SessionController::new(
            provider,
            Arc::new(CountingRenderer::default()),
            sink.clone(),
            "smash-burger-data.json",
        );
        (controller, sink)
    }

    #[tokio::test]
    async fn failed_start_stays_idle() {
        let provider = Arc::new(FakeProvider::failing(AcquireError::Denied));
        let (mut session, _) = controller(provider.clone());
        let mut rx = session.subscribe();

        let err = session.start_camera().await.unwrap_err();
        assert!(matches!(err, SessionError::CameraAcquisition(AcquireError::Denied)));
        assert!(!session.is_live());
        assert_eq!(session.frame_count(), 0);
        assert!(!rx.has_changed().unwrap());

        let snapshot = session.snapshot();
        assert!(!snapshot.can_capture());
        assert!(!snapshot.can_export());
        assert!(matches!(session.capture_frame(), Err(SessionError::NotLive)));
        assert!(matches!(session.export_session(), Err(SessionError::NothingToExport)));

        // The operator can retry once the device is available.
        *provider.fail_with.lock().unwrap() = None;
        session.start_camera().await.unwrap();
        assert!(session.is_live());
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn capture_requires_live_camera() {
        let (mut session, _) = controller(Arc::new(FakeProvider::default()));
        assert!(matches!(session.capture_frame(), Err(SessionError::NotLive)));
        assert_eq!(session.frame_count(), 0);
    }

    #[tokio::test]
    async fn capture_prepends_and_keeps_prior_frames() {
        let (mut session, _) = controller(Arc::new(FakeProvider::default()));
        session.start_camera().await.unwrap();

        let first = session.capture_frame().unwrap();
        session.label_frame(first, Label::OverSmashed).unwrap();
        let before: Vec<CapturedFrame> = session.frames().cloned().collect();

        let second = session.capture_frame().unwrap();
        let after: Vec<CapturedFrame> = session.frames().cloned().collect();

        assert!(second > first);
        assert_eq!(after.len(), before.len() + 1);
        assert_eq!(after[0].id(), second);
        assert_eq!(after[0].label(), None);
        assert_eq!(&after[1..], &before[..]);
        assert!(session.is_live(), "capture must not change camera state");
    }

    #[tokio::test]
    async fn label_is_last_write_wins() {
        let (mut session, _) = controller(Arc::new(FakeProvider::default()));
        session.start_camera().await.unwrap();
        let a = session.capture_frame().unwrap();
        let b = session.capture_frame().unwrap();

        session.label_frame(a, Label::Perfect).unwrap();
        session.label_frame(a, Label::UnderSmashed).unwrap();
        session.label_frame(a, Label::OverSmashed).unwrap();

        let labels: Vec<_> = session.frames().map(|f| (f.id(), f.label())).collect();
        assert_eq!(labels, vec![(b, None), (a, Some(Label::OverSmashed))]);
    }

    #[tokio::test]
    async fn labeling_unknown_frame_is_not_found() {
        let (mut session, _) = controller(Arc::new(FakeProvider::default()));
        session.start_camera().await.unwrap();
        let id = session.capture_frame().unwrap();

        let missing = FrameId(id.as_i64() + 1000);
        let err = session.label_frame(missing, Label::Perfect).unwrap_err();
        assert!(matches!(err, SessionError::FrameNotFound(m) if m == missing));
        assert_eq!(session.frames().next().unwrap().label(), None);
    }

    #[tokio::test]
    async fn capture_label_export_scenario() {
        let (mut session, sink) = controller(Arc::new(FakeProvider::default()));
        session.start_camera().await.unwrap();
        let first = session.capture_frame().unwrap();
        let second = session.capture_frame().unwrap();
        session.label_frame(first, Label::Perfect).unwrap();
        session.label_frame(second, Label::UnderSmashed).unwrap();

        let outcome = session.export_session().unwrap();
        assert_eq!(outcome.filename, "smash-burger-data.json");
        assert_eq!(outcome.records, 2);

        let saved = sink.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "smash-burger-data.json");

        let doc = ExportDocument::parse(&saved[0].1).unwrap();
        let got: Vec<_> = doc.records.iter().map(|r| (r.id, r.label)).collect();
        assert_eq!(
            got,
            vec![
                (second.as_i64(), Some(Label::UnderSmashed)),
                (first.as_i64(), Some(Label::Perfect)),
            ]
        );
    }

    #[tokio::test]
    async fn export_round_trips_session_frames() {
        let (mut session, _) = controller(Arc::new(FakeProvider::default()));
        session.start_camera().await.unwrap();
        let a = session.capture_frame().unwrap();
        session.capture_frame().unwrap();
        session.capture_frame().unwrap();
        session.label_frame(a, Label::Perfect).unwrap();

        let outcome = session.export_session().unwrap();
        let parsed = ExportDocument::parse(&outcome.document).unwrap();
        assert_eq!(parsed, ExportDocument::from_frames(session.frames()));
        assert!(parsed.records.iter().filter(|r| r.label.is_none()).count() == 2);
    }

    #[tokio::test]
    async fn stop_releases_stream_and_is_noop_when_idle() {
        let provider = Arc::new(FakeProvider::default());
        let (mut session, _) = controller(provider.clone());
        session.stop_camera();
        assert!(!session.is_live());

        session.start_camera().await.unwrap();
        session.stop_camera();
        assert!(!session.is_live());
        assert!(provider.all_released());
        assert!(session.live_frame().is_none());
    }

    #[tokio::test]
    async fn restart_matches_fresh_start() {
        let provider = Arc::new(FakeProvider::default());
        let (mut restarted, _) = controller(provider.clone());
        restarted.start_camera().await.unwrap();
        restarted.stop_camera();
        restarted.start_camera().await.unwrap();

        let (mut fresh, _) = controller(Arc::new(FakeProvider::default()));
        fresh.start_camera().await.unwrap();

        let a = restarted.snapshot();
        let b = fresh.snapshot();
        assert_eq!(a.camera_active, b.camera_active);
        assert_eq!(a.frames, b.frames);
        assert_ne!(a.stream_id, None);
        assert_eq!(provider.acquired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn start_while_live_does_not_reacquire() {
        let provider = Arc::new(FakeProvider::default());
        let (mut session, _) = controller(provider.clone());
        session.start_camera().await.unwrap();
        session.start_camera().await.unwrap();
        assert_eq!(provider.acquired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn late_stream_is_released_after_close() {
        let provider = Arc::new(FakeProvider::default());
        let (mut session, _) = controller(provider.clone());

        let stream = session.provider().acquire().await.unwrap();
        session.close();
        let err = session.attach_stream(stream).unwrap_err();

        assert!(matches!(err, SessionError::Closed));
        assert!(!session.is_live());
        assert!(provider.all_released());
        assert!(matches!(session.start_camera().await, Err(SessionError::Closed)));
    }

    #[tokio::test]
    async fn extra_stream_is_released_when_already_live() {
        let provider = Arc::new(FakeProvider::default());
        let (mut session, _) = controller(provider.clone());
        session.start_camera().await.unwrap();
        let live_id = session.snapshot().stream_id;

        let extra = session.provider().acquire().await.unwrap();
        session.attach_stream(extra).unwrap();

        assert_eq!(session.snapshot().stream_id, live_id);
        let released = provider.released.lock().unwrap();
        assert!(!released[0].load(Ordering::SeqCst));
        assert!(released[1].load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn drop_releases_held_stream() {
        let provider = Arc::new(FakeProvider::default());
        {
            let (mut session, _) = controller(provider.clone());
            session.start_camera().await.unwrap();
            assert!(!provider.all_released());
        }
        assert!(provider.all_released());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let provider = Arc::new(FakeProvider::default());
        let (mut session, _) = controller(provider.clone());
        session.start_camera().await.unwrap();
        session.close();
        session.close();
        assert!(session.is_closed());
        assert!(session.snapshot().closed);
        assert!(provider.all_released());
    }

    #[tokio::test]
    async fn subscribers_observe_every_change() {
        let (mut session, _) = controller(Arc::new(FakeProvider::default()));
        let mut rx = session.subscribe();

        session.start_camera().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().camera_active);

        let id = session.capture_frame().unwrap();
        assert_eq!(rx.borrow_and_update().frame_count(), 1);

        session.label_frame(id, Label::Perfect).unwrap();
        assert_eq!(rx.borrow_and_update().labeled_count(), 1);

        session.stop_camera();
        let snapshot = rx.borrow_and_update().clone();
        assert!(!snapshot.camera_active);
        assert_eq!(snapshot.stream_id, None);
        assert_eq!(snapshot.frame_count(), 1);
    }

    #[tokio::test]
    async fn real_renderer_captures_native_resolution() {
        let sink = Arc::new(MemorySink::default());
        let mut session = SessionController::new(
            Arc::new(FakeProvider::with_jpeg()),
            Arc::new(JpegRenderer::new(92)),
            sink,
            "smash-burger-data.json",
        );
        session.start_camera().await.unwrap();
        session.capture_frame().unwrap();

        let frame = session.frames().next().unwrap();
        assert_eq!((frame.image().width, frame.image().height), (16, 12));
        assert!(frame.image().data_uri().starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn snapshot_failure_leaves_frames_untouched() {
        let mut session = SessionController::new(
            Arc::new(FakeProvider::default()),
            Arc::new(JpegRenderer::new(92)),
            Arc::new(MemorySink::default()),
            "smash-burger-data.json",
        );
        session.start_camera().await.unwrap();
        let err = session.capture_frame().unwrap_err();
        assert!(matches!(err, SessionError::Snapshot(RenderError::NoFrame)));
        assert_eq!(session.frame_count(), 0);
        assert!(session.is_live());
    }
}
