//! Mock transport for testing.
//!
//! Allows queueing inbound frames and capturing sent frames for
//! verification. Clones share state, so a test can keep a handle while the
//! session owns another.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

/// Mock transport for testing.
///
/// By default `recv()` returns [`TransportError::ConnectionClosed`] once the
/// queue is drained. A [`MockTransport::streaming`] transport instead waits
/// for more frames until [`MockTransport::disconnect`] is called.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    arrived: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    streaming: bool,
    connected_endpoint: Option<String>,
    connected_token: Option<String>,
    sent_frames: Vec<String>,
    sent_tap: Option<mpsc::UnboundedSender<String>>,
    receive_queue: VecDeque<String>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_sends_containing: Option<String>,
    fail_next_recv: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock transport whose `recv()` waits for frames.
    pub fn streaming() -> Self {
        let transport = Self::default();
        transport.inner.lock().unwrap().streaming = true;
        transport
    }

    /// Queue a frame to be returned by a `recv()` call.
    pub fn queue_response(&self, frame: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.receive_queue.push_back(frame.into());
        drop(inner);
        self.arrived.notify_one();
    }

    /// Get all frames that were sent.
    pub fn sent_frames(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.sent_frames.clone()
    }

    /// Get the last frame that was sent.
    pub fn last_sent(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.sent_frames.last().cloned()
    }

    /// Receive every frame sent from now on.
    ///
    /// Only one subscriber is kept; a second call replaces the first.
    pub fn subscribe_sent(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        inner.sent_tap = Some(tx);
        rx
    }

    /// Get the endpoint that was connected to.
    pub fn connected_endpoint(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.connected_endpoint.clone()
    }

    /// Get the bearer token presented on connect.
    pub fn connected_token(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.connected_token.clone()
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_send = Some(error.to_string());
    }

    /// Cause every send() of a frame containing `pattern` to fail.
    pub fn fail_sends_containing(&self, pattern: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_sends_containing = Some(pattern.to_string());
    }

    /// Cause the next recv() to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_recv = Some(error.to_string());
    }

    /// Simulate the server dropping the connection.
    ///
    /// A pending `recv()` wakes with [`TransportError::ConnectionClosed`].
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        drop(inner);
        self.arrived.notify_one();
    }

    /// Clear all state (frames, queue, connection).
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        let streaming = inner.streaming;
        *inner = MockTransportInner {
            streaming,
            ..MockTransportInner::default()
        };
    }

    /// Pop the next frame, or decide that `recv()` must wait.
    fn poll_frame(&self) -> Option<Result<String, TransportError>> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(error) = inner.fail_next_recv.take() {
            return Some(Err(TransportError::ReceiveFailed(error)));
        }

        if let Some(frame) = inner.receive_queue.pop_front() {
            return Some(Ok(frame));
        }

        if !inner.connected || !inner.streaming {
            return Some(Err(TransportError::ConnectionClosed));
        }
        None
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            arrived: Arc::clone(&self.arrived),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, endpoint: &str, token: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.connected_endpoint = Some(endpoint.to_string());
        inner.connected_token = Some(token.to_string());
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }
        if let Some(pattern) = &inner.fail_sends_containing {
            if frame.contains(pattern.as_str()) {
                return Err(TransportError::SendFailed(format!("refused {}", pattern)));
            }
        }

        inner.sent_frames.push(frame.to_string());
        if let Some(tap) = &inner.sent_tap {
            let _ = tap.send(frame.to_string());
        }
        Ok(())
    }

    async fn recv(&self) -> Result<String, TransportError> {
        {
            let inner = self.inner.lock().unwrap();
            if !inner.connected && inner.receive_queue.is_empty() {
                return Err(TransportError::NotConnected);
            }
        }

        loop {
            if let Some(result) = self.poll_frame() {
                return result;
            }
            self.arrived.notified().await;
        }
    }

    fn is_connected(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        drop(inner);
        self.arrived.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn mock_transport_connect() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        transport
            .connect("ws://localhost:5001/events", "secret")
            .await
            .unwrap();

        assert!(transport.is_connected());
        assert_eq!(
            transport.connected_endpoint(),
            Some("ws://localhost:5001/events".to_string())
        );
        assert_eq!(transport.connected_token(), Some("secret".to_string()));
    }

    #[tokio::test]
    async fn mock_transport_send_captures_frames() {
        let transport = MockTransport::new();
        transport.connect("ws://test", "t").await.unwrap();

        transport.send("one").await.unwrap();
        transport.send("two").await.unwrap();

        assert_eq!(transport.sent_frames(), vec!["one", "two"]);
        assert_eq!(transport.last_sent(), Some("two".to_string()));
    }

    #[tokio::test]
    async fn mock_transport_recv_queued() {
        let transport = MockTransport::new();
        transport.connect("ws://test", "t").await.unwrap();

        transport.queue_response("first");
        transport.queue_response("second");

        assert_eq!(transport.recv().await.unwrap(), "first");
        assert_eq!(transport.recv().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn mock_transport_recv_empty_closes() {
        let transport = MockTransport::new();
        transport.connect("ws://test", "t").await.unwrap();

        let result = transport.recv().await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn mock_transport_send_not_connected() {
        let transport = MockTransport::new();

        let result = transport.send("frame").await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn mock_transport_fail_next_connect() {
        let transport = MockTransport::new();
        transport.fail_next_connect("server unavailable");

        let result = transport.connect("ws://test", "t").await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(!transport.is_connected());

        // Next connect should succeed
        transport.connect("ws://test", "t").await.unwrap();
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn mock_transport_fail_next_send() {
        let transport = MockTransport::new();
        transport.connect("ws://test", "t").await.unwrap();
        transport.fail_next_send("network error");

        let result = transport.send("frame").await;
        assert!(matches!(result, Err(TransportError::SendFailed(_))));
        assert!(transport.sent_frames().is_empty());
    }

    #[tokio::test]
    async fn mock_transport_fails_matching_sends() {
        let transport = MockTransport::new();
        transport.connect("ws://test", "t").await.unwrap();
        transport.fail_sends_containing("typing_stop");

        assert!(transport.send("typing_stop").await.is_err());
        transport.send("send_message").await.unwrap();
        assert!(transport.send("typing_stop").await.is_err());
        assert_eq!(transport.sent_frames(), vec!["send_message".to_string()]);
    }

    #[tokio::test]
    async fn mock_transport_fail_next_recv() {
        let transport = MockTransport::new();
        transport.connect("ws://test", "t").await.unwrap();
        transport.queue_response("frame");
        transport.fail_next_recv("timeout");

        let result = transport.recv().await;
        assert!(matches!(result, Err(TransportError::ReceiveFailed(_))));

        // Queued frame survives the forced failure
        assert_eq!(transport.recv().await.unwrap(), "frame");
    }

    #[tokio::test]
    async fn mock_transport_clone_shares_state() {
        let transport1 = MockTransport::new();
        let transport2 = transport1.clone();

        transport1.connect("ws://test", "t").await.unwrap();
        assert!(transport2.is_connected());

        transport2.send("frame").await.unwrap();
        assert_eq!(transport1.sent_frames().len(), 1);
    }

    #[tokio::test]
    async fn streaming_recv_waits_for_frames() {
        let transport = MockTransport::streaming();
        transport.connect("ws://test", "t").await.unwrap();

        let feeder = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            feeder.queue_response("late");
        });

        let frame = tokio::time::timeout(Duration::from_secs(1), transport.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, "late");
    }

    #[tokio::test]
    async fn disconnect_wakes_streaming_recv() {
        let transport = MockTransport::streaming();
        transport.connect("ws://test", "t").await.unwrap();

        let dropper = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            dropper.disconnect();
        });

        let result = tokio::time::timeout(Duration::from_secs(1), transport.recv())
            .await
            .unwrap();
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn subscribe_sent_observes_frames() {
        let transport = MockTransport::new();
        let mut sent = transport.subscribe_sent();
        transport.connect("ws://test", "t").await.unwrap();

        transport.send("hello").await.unwrap();
        assert_eq!(sent.recv().await, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn mock_transport_reset() {
        let transport = MockTransport::new();
        transport.connect("ws://test", "t").await.unwrap();
        transport.send("frame").await.unwrap();
        transport.queue_response("reply");

        transport.reset();

        assert!(!transport.is_connected());
        assert!(transport.sent_frames().is_empty());
        assert!(transport.connected_endpoint().is_none());
    }
}
