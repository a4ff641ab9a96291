//! In-memory media backend.
//!
//! Streams are plain flags, peer connections exchange placeholder session
//! descriptions, and applying a remote description immediately reports a
//! remote stream. Every open, stop and close is counted in
//! [`LoopbackStats`] so tests can assert that nothing leaks.

use super::{
    AudioCapture, AudioOutput, ClipSource, IceConfig, IceState, MediaConstraints, MediaDevices,
    MediaError, MediaStream, PeerConnection, PeerConnector, PeerEvent, PeerEventSink,
};
use async_trait::async_trait;
use parley_chat_core::ClipKey;
use parley_chat_types::{CallId, SdpType, SessionDescription};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Operation counters shared by everything a [`LoopbackMedia`] hands out.
#[derive(Debug, Default)]
pub struct LoopbackStats {
    streams_opened: AtomicUsize,
    streams_stopped: AtomicUsize,
    connections_opened: AtomicUsize,
    connections_closed: AtomicUsize,
    recordings_opened: AtomicUsize,
    recordings_released: AtomicUsize,
}

impl LoopbackStats {
    /// Streams created, local and remote.
    pub fn streams_opened(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }

    /// Streams stopped.
    pub fn streams_stopped(&self) -> usize {
        self.streams_stopped.load(Ordering::SeqCst)
    }

    /// Streams still running.
    pub fn live_streams(&self) -> usize {
        self.streams_opened() - self.streams_stopped()
    }

    /// Peer connections created.
    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(Ordering::SeqCst)
    }

    /// Peer connections closed.
    pub fn connections_closed(&self) -> usize {
        self.connections_closed.load(Ordering::SeqCst)
    }

    /// Peer connections still open.
    pub fn live_connections(&self) -> usize {
        self.connections_opened() - self.connections_closed()
    }

    /// Microphones opened for voice notes.
    pub fn recordings_opened(&self) -> usize {
        self.recordings_opened.load(Ordering::SeqCst)
    }

    /// Voice-note microphones released.
    pub fn recordings_released(&self) -> usize {
        self.recordings_released.load(Ordering::SeqCst)
    }

    /// Every device, stream and connection operation so far.
    pub fn total_operations(&self) -> usize {
        self.streams_opened()
            + self.streams_stopped()
            + self.connections_opened()
            + self.connections_closed()
            + self.recordings_opened()
            + self.recordings_released()
    }
}

#[derive(Debug, Default)]
struct Failures {
    open: Option<MediaError>,
    record: Option<MediaError>,
    negotiation: Option<String>,
    playback: Option<MediaError>,
}

/// What the loopback speakers were asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputCall {
    /// A clip started.
    Start(ClipKey),
    /// The current clip paused.
    Pause,
    /// The current clip moved.
    Seek(f64),
    /// The current clip stopped and rewound.
    Rewind,
}

/// In-memory capture devices and peer connector.
#[derive(Debug, Clone, Default)]
pub struct LoopbackMedia {
    stats: Arc<LoopbackStats>,
    failures: Arc<Mutex<Failures>>,
    mic: Arc<Mutex<Vec<Vec<u8>>>>,
    last_constraints: Arc<Mutex<Option<MediaConstraints>>>,
    output_calls: Arc<Mutex<Vec<OutputCall>>>,
}

impl LoopbackMedia {
    /// Create a backend with fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared operation counters.
    pub fn stats(&self) -> Arc<LoopbackStats> {
        Arc::clone(&self.stats)
    }

    /// Constraints of the most recent `open` or `record`.
    pub fn last_constraints(&self) -> Option<MediaConstraints> {
        self.last_constraints.lock().unwrap().clone()
    }

    /// Make the next `open` fail.
    pub fn fail_next_open(&self, error: MediaError) {
        self.failures.lock().unwrap().open = Some(error);
    }

    /// Make the next `record` fail.
    pub fn fail_next_record(&self, error: MediaError) {
        self.failures.lock().unwrap().record = Some(error);
    }

    /// Make the next description a peer connection applies fail.
    pub fn fail_next_negotiation(&self, error: &str) {
        self.failures.lock().unwrap().negotiation = Some(error.to_string());
    }

    /// Make the next clip start fail.
    pub fn fail_next_playback(&self, error: MediaError) {
        self.failures.lock().unwrap().playback = Some(error);
    }

    /// Everything the speakers were asked to do, in order.
    pub fn output_calls(&self) -> Vec<OutputCall> {
        self.output_calls.lock().unwrap().clone()
    }

    /// Feed an encoded chunk to the open voice-note microphone.
    pub fn push_mic_chunk(&self, chunk: Vec<u8>) {
        self.mic.lock().unwrap().push(chunk);
    }

    fn new_stream(&self, id: String) -> Arc<dyn MediaStream> {
        self.stats.streams_opened.fetch_add(1, Ordering::SeqCst);
        Arc::new(LoopbackStream {
            id,
            active: AtomicBool::new(true),
            stats: Arc::clone(&self.stats),
        })
    }
}

#[async_trait]
impl MediaDevices for LoopbackMedia {
    async fn open(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Arc<dyn MediaStream>, MediaError> {
        if let Some(error) = self.failures.lock().unwrap().open.take() {
            return Err(error);
        }
        *self.last_constraints.lock().unwrap() = Some(constraints.clone());
        let label = if constraints.video.is_some() {
            "camera"
        } else {
            "mic"
        };
        let n = self.stats.streams_opened();
        Ok(self.new_stream(format!("local-{}-{}", label, n)))
    }

    async fn record(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Box<dyn AudioCapture>, MediaError> {
        if let Some(error) = self.failures.lock().unwrap().record.take() {
            return Err(error);
        }
        *self.last_constraints.lock().unwrap() = Some(constraints.clone());
        self.stats.recordings_opened.fetch_add(1, Ordering::SeqCst);
        self.mic.lock().unwrap().clear();
        Ok(Box::new(LoopbackCapture {
            mic: Arc::clone(&self.mic),
            stats: Arc::clone(&self.stats),
            released: false,
        }))
    }
}

#[async_trait]
impl PeerConnector for LoopbackMedia {
    async fn connect(
        &self,
        call_id: &CallId,
        _ice: &IceConfig,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerConnection>, MediaError> {
        self.stats.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopbackPeer {
            call_id: call_id.clone(),
            media: self.clone(),
            events,
            tracks: 0,
            local_set: false,
            remote: None,
            closed: false,
        }))
    }
}

impl AudioOutput for LoopbackMedia {
    fn start(&self, key: &ClipKey, _source: ClipSource) -> Result<(), MediaError> {
        if let Some(error) = self.failures.lock().unwrap().playback.take() {
            return Err(error);
        }
        self.output_calls
            .lock()
            .unwrap()
            .push(OutputCall::Start(key.clone()));
        Ok(())
    }

    fn pause(&self) {
        self.output_calls.lock().unwrap().push(OutputCall::Pause);
    }

    fn seek(&self, seconds: f64) {
        self.output_calls
            .lock()
            .unwrap()
            .push(OutputCall::Seek(seconds));
    }

    fn rewind(&self) {
        self.output_calls.lock().unwrap().push(OutputCall::Rewind);
    }
}

#[derive(Debug)]
struct LoopbackStream {
    id: String,
    active: AtomicBool,
    stats: Arc<LoopbackStats>,
}

impl MediaStream for LoopbackStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.stats.streams_stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

struct LoopbackCapture {
    mic: Arc<Mutex<Vec<Vec<u8>>>>,
    stats: Arc<LoopbackStats>,
    released: bool,
}

impl LoopbackCapture {
    fn release(&mut self) {
        if !std::mem::replace(&mut self.released, true) {
            self.stats.recordings_released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl AudioCapture for LoopbackCapture {
    fn drain(&mut self) -> Vec<Vec<u8>> {
        if self.released {
            return Vec::new();
        }
        std::mem::take(&mut *self.mic.lock().unwrap())
    }

    fn finish(&mut self) -> Vec<Vec<u8>> {
        let chunks = self.drain();
        self.release();
        chunks
    }

    fn abort(&mut self) {
        self.mic.lock().unwrap().clear();
        self.release();
    }
}

impl Drop for LoopbackCapture {
    fn drop(&mut self) {
        self.release();
    }
}

struct LoopbackPeer {
    call_id: CallId,
    media: LoopbackMedia,
    events: PeerEventSink,
    tracks: usize,
    local_set: bool,
    remote: Option<SessionDescription>,
    closed: bool,
}

impl LoopbackPeer {
    fn ensure_open(&self) -> Result<(), MediaError> {
        if self.closed {
            Err(MediaError::Closed)
        } else {
            Ok(())
        }
    }

    fn take_negotiation_failure(&self) -> Result<(), MediaError> {
        match self.media.failures.lock().unwrap().negotiation.take() {
            Some(error) => Err(MediaError::Negotiation(error)),
            None => Ok(()),
        }
    }

    fn describe(&self, kind: &str) -> String {
        format!(
            "v=0\r\no=loopback {} {} IN IP4 127.0.0.1\r\ns={}\r\na=tracks:{}\r\n",
            self.call_id,
            u8::from(self.local_set),
            kind,
            self.tracks
        )
    }
}

#[async_trait]
impl PeerConnection for LoopbackPeer {
    fn add_stream(&mut self, _stream: &Arc<dyn MediaStream>) -> Result<(), MediaError> {
        self.ensure_open()?;
        self.tracks += 1;
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, MediaError> {
        self.ensure_open()?;
        Ok(SessionDescription::offer(self.describe("offer")))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, MediaError> {
        self.ensure_open()?;
        match &self.remote {
            Some(remote) if remote.sdp_type == SdpType::Offer => {
                Ok(SessionDescription::answer(self.describe("answer")))
            }
            _ => Err(MediaError::Negotiation("no remote offer".into())),
        }
    }

    async fn set_local_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), MediaError> {
        self.ensure_open()?;
        if desc.sdp.is_empty() {
            return Err(MediaError::Negotiation("empty local description".into()));
        }
        self.local_set = true;
        Ok(())
    }

    async fn set_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), MediaError> {
        self.ensure_open()?;
        self.take_negotiation_failure()?;
        self.remote = Some(desc);

        let n = self.media.stats.streams_opened();
        let remote = self
            .media
            .new_stream(format!("remote-{}-{}", self.call_id, n));
        let _ = self
            .events
            .send((self.call_id.clone(), PeerEvent::RemoteStream(remote)));
        let _ = self.events.send((
            self.call_id.clone(),
            PeerEvent::IceStateChanged(IceState::Connected),
        ));
        Ok(())
    }

    fn close(&mut self) {
        if !std::mem::replace(&mut self.closed, true) {
            self.media
                .stats
                .connections_closed
                .fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_chat_types::CallKind;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn streams_count_stops_once() {
        let media = LoopbackMedia::new();
        let stream = media
            .open(&MediaConstraints::for_call(CallKind::Audio))
            .await
            .unwrap();
        assert!(stream.is_active());

        stream.stop();
        stream.stop();

        let stats = media.stats();
        assert_eq!(stats.streams_opened(), 1);
        assert_eq!(stats.streams_stopped(), 1);
        assert_eq!(stats.live_streams(), 0);
    }

    #[tokio::test]
    async fn forced_open_failure() {
        let media = LoopbackMedia::new();
        media.fail_next_open(MediaError::PermissionDenied("camera".into()));

        let result = media
            .open(&MediaConstraints::for_call(CallKind::Video))
            .await;
        assert_eq!(
            result.unwrap_err(),
            MediaError::PermissionDenied("camera".into())
        );
        assert_eq!(media.stats().streams_opened(), 0);
    }

    #[tokio::test]
    async fn remote_description_reports_remote_stream() {
        let media = LoopbackMedia::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let call_id = CallId::new("call_1");
        let mut peer = media
            .connect(&call_id, &IceConfig::new(vec![]), tx)
            .await
            .unwrap();

        peer.set_remote_description(SessionDescription::offer("v=0"))
            .await
            .unwrap();
        let answer = peer.create_answer().await.unwrap();
        assert_eq!(answer.sdp_type, SdpType::Answer);

        let (id, event) = rx.recv().await.unwrap();
        assert_eq!(id, call_id);
        assert!(matches!(event, PeerEvent::RemoteStream(_)));
    }

    #[tokio::test]
    async fn answer_without_offer_fails() {
        let media = LoopbackMedia::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut peer = media
            .connect(&CallId::new("c"), &IceConfig::new(vec![]), tx)
            .await
            .unwrap();

        assert!(matches!(
            peer.create_answer().await,
            Err(MediaError::Negotiation(_))
        ));
    }

    #[tokio::test]
    async fn closed_connection_refuses_work() {
        let media = LoopbackMedia::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut peer = media
            .connect(&CallId::new("c"), &IceConfig::new(vec![]), tx)
            .await
            .unwrap();

        peer.close();
        peer.close();

        assert_eq!(media.stats().connections_closed(), 1);
        assert_eq!(peer.create_offer().await, Err(MediaError::Closed));
    }

    #[tokio::test]
    async fn capture_drains_mic_chunks() {
        let media = LoopbackMedia::new();
        let mut capture = media.record(&MediaConstraints::voice_note()).await.unwrap();

        media.push_mic_chunk(vec![1, 2]);
        assert_eq!(capture.drain(), vec![vec![1, 2]]);

        media.push_mic_chunk(vec![3]);
        assert_eq!(capture.finish(), vec![vec![3]]);
        assert_eq!(media.stats().recordings_released(), 1);

        drop(capture);
        assert_eq!(media.stats().recordings_released(), 1);
    }
}
