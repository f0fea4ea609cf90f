//! In-process control channel.
//!
//! Pairs one relay endpoint with any number of same-process worker
//! connections over tokio channels. Commits and resets are acknowledged once
//! the relay has applied them; `responses/create` calls carry a correlation
//! identifier and reply through a per-call channel, so interleaved replies
//! from one connection always route back to the right caller.

use super::{
    AckToken, ChannelError, ConnectionId, ControlEvent, ControlMessage, HandlerCommit,
    RelayChannel, WorkerResponder,
};
use crate::http::serialized::{SerializedRequest, SerializedResponse};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

const EVENT_BUFFER: usize = 64;
const REQUEST_BUFFER: usize = 64;

/// One `responses/create` call in flight to a worker.
struct ResponseFrame {
    correlation: u64,
    handler_id: String,
    request: SerializedRequest,
    reply: oneshot::Sender<Option<SerializedResponse>>,
}

struct Shared {
    event_tx: mpsc::Sender<ControlEvent>,
    connections: RwLock<HashMap<ConnectionId, mpsc::Sender<ResponseFrame>>>,
    next_connection: AtomicU64,
    next_correlation: AtomicU64,
}

/// Create a connected in-process channel pair: the relay side and a
/// connector workers use to join.
pub fn in_process() -> (InProcessRelayChannel, WorkerConnector) {
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let shared = Arc::new(Shared {
        event_tx,
        connections: RwLock::new(HashMap::new()),
        next_connection: AtomicU64::new(1),
        next_correlation: AtomicU64::new(1),
    });

    let channel = InProcessRelayChannel {
        shared: Arc::clone(&shared),
        events: Mutex::new(event_rx),
    };
    (channel, WorkerConnector { shared })
}

/// Relay-side endpoint of the in-process channel.
pub struct InProcessRelayChannel {
    shared: Arc<Shared>,
    events: Mutex<mpsc::Receiver<ControlEvent>>,
}

#[async_trait]
impl RelayChannel for InProcessRelayChannel {
    async fn next_event(&self) -> Option<ControlEvent> {
        self.events.lock().await.recv().await
    }

    async fn create_response(
        &self,
        target: ConnectionId,
        handler_id: &str,
        request: SerializedRequest,
    ) -> Result<Option<SerializedResponse>, ChannelError> {
        let sender = self
            .shared
            .connections
            .read()
            .get(&target)
            .cloned()
            .ok_or(ChannelError::Closed(target))?;

        let correlation = self.shared.next_correlation.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        debug!(%target, correlation, handler_id, "dispatching responses/create");

        sender
            .send(ResponseFrame {
                correlation,
                handler_id: handler_id.to_string(),
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ChannelError::Closed(target))?;

        reply_rx.await.map_err(|_| ChannelError::Closed(target))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("relay is no longer running")]
    RelayGone,
    #[error("relay rejected the registration: {0}")]
    Rejected(String),
}

/// Lets same-process workers join the channel.
#[derive(Clone)]
pub struct WorkerConnector {
    shared: Arc<Shared>,
}

impl WorkerConnector {
    /// Open a new worker connection. The responder serves every
    /// `responses/create` call addressed to it; calls are served
    /// concurrently.
    pub fn connect(&self, responder: Arc<dyn WorkerResponder>) -> WorkerEndpoint {
        let connection = ConnectionId(self.shared.next_connection.fetch_add(1, Ordering::Relaxed));
        let (request_tx, mut request_rx) = mpsc::channel::<ResponseFrame>(REQUEST_BUFFER);
        self.shared.connections.write().insert(connection, request_tx);

        tokio::spawn(async move {
            while let Some(frame) = request_rx.recv().await {
                let responder = Arc::clone(&responder);
                tokio::spawn(async move {
                    debug!(
                        %connection,
                        correlation = frame.correlation,
                        handler_id = %frame.handler_id,
                        "serving responses/create"
                    );
                    let response = responder
                        .create_response(&frame.handler_id, frame.request)
                        .await;
                    // The caller may have been abandoned; its result is
                    // simply discarded then.
                    let _ = frame.reply.send(response);
                });
            }
        });

        WorkerEndpoint {
            connection,
            shared: Arc::clone(&self.shared),
            disconnected: AtomicBool::new(false),
        }
    }
}

/// Worker-side endpoint: sends commits/resets and owns the connection's
/// lifetime. Dropping it closes the connection.
pub struct WorkerEndpoint {
    connection: ConnectionId,
    shared: Arc<Shared>,
    disconnected: AtomicBool,
}

impl WorkerEndpoint {
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Register one route under this connection. Resolves once the relay
    /// has applied the commit.
    pub async fn commit(&self, commit: HandlerCommit) -> Result<(), EndpointError> {
        self.send(ControlMessage::Commit(commit)).await
    }

    /// Atomically replace all of this connection's routes.
    pub async fn reset(&self, commits: Option<Vec<HandlerCommit>>) -> Result<(), EndpointError> {
        self.send(ControlMessage::Reset { commits }).await
    }

    async fn send(&self, message: ControlMessage) -> Result<(), EndpointError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.shared
            .event_tx
            .send(ControlEvent::Message {
                connection: self.connection,
                message,
                ack: AckToken::new(ack_tx),
            })
            .await
            .map_err(|_| EndpointError::RelayGone)?;

        match ack_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(EndpointError::Rejected(message)),
            Err(_) => Err(EndpointError::RelayGone),
        }
    }

    /// Close this connection. The relay drops all of its routes.
    pub fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.connections.write().remove(&self.connection);
        let _ = self.shared.event_tx.try_send(ControlEvent::Closed {
            connection: self.connection,
        });
    }
}

impl Drop for WorkerEndpoint {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    struct EchoResponder;

    #[async_trait]
    impl WorkerResponder for EchoResponder {
        async fn create_response(
            &self,
            handler_id: &str,
            request: SerializedRequest,
        ) -> Option<SerializedResponse> {
            if handler_id == "bypass" {
                return None;
            }
            Some(SerializedResponse {
                status: 200,
                status_text: "OK".to_string(),
                headers: vec![("x-echo-url".to_string(), request.url)],
                body: None,
            })
        }
    }

    fn commit(handler_id: &str) -> HandlerCommit {
        HandlerCommit {
            handler_id: handler_id.to_string(),
            url: "http://localhost/users".to_string(),
            method: Method::Get,
        }
    }

    fn serialized_get(url: &str) -> SerializedRequest {
        SerializedRequest {
            method: Method::Get,
            url: url.to_string(),
            headers: vec![],
            body: None,
        }
    }

    #[tokio::test]
    async fn test_commit_is_delivered_and_acked() {
        let (channel, connector) = in_process();
        let endpoint = connector.connect(Arc::new(EchoResponder));

        let relay = tokio::spawn(async move {
            match channel.next_event().await {
                Some(ControlEvent::Message {
                    connection,
                    message: ControlMessage::Commit(commit),
                    ack,
                }) => {
                    ack.ok();
                    (connection, commit)
                }
                other => panic!("unexpected event: {other:?}"),
            }
        });

        endpoint.commit(commit("h1")).await.unwrap();
        let (connection, received) = relay.await.unwrap();
        assert_eq!(connection, endpoint.connection());
        assert_eq!(received.handler_id, "h1");
    }

    #[tokio::test]
    async fn test_rejected_commit_surfaces_to_the_worker() {
        let (channel, connector) = in_process();
        let endpoint = connector.connect(Arc::new(EchoResponder));

        tokio::spawn(async move {
            if let Some(ControlEvent::Message { ack, .. }) = channel.next_event().await {
                ack.err("duplicate path parameter");
            }
        });

        let error = endpoint.commit(commit("h1")).await.unwrap_err();
        assert!(matches!(error, EndpointError::Rejected(message) if message.contains("duplicate")));
    }

    #[tokio::test]
    async fn test_create_response_round_trip() {
        let (channel, connector) = in_process();
        let endpoint = connector.connect(Arc::new(EchoResponder));

        let response = channel
            .create_response(
                endpoint.connection(),
                "h1",
                serialized_get("http://localhost/users/7"),
            )
            .await
            .unwrap()
            .expect("responder must answer");
        assert_eq!(response.status, 200);
        assert_eq!(
            response.headers,
            vec![("x-echo-url".to_string(), "http://localhost/users/7".to_string())]
        );

        let bypassed = channel
            .create_response(
                endpoint.connection(),
                "bypass",
                serialized_get("http://localhost/users/7"),
            )
            .await
            .unwrap();
        assert!(bypassed.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_emits_closed_and_fails_calls() {
        let (channel, connector) = in_process();
        let endpoint = connector.connect(Arc::new(EchoResponder));
        let connection = endpoint.connection();

        drop(endpoint);

        match channel.next_event().await {
            Some(ControlEvent::Closed { connection: closed }) => assert_eq!(closed, connection),
            other => panic!("unexpected event: {other:?}"),
        }

        let error = channel
            .create_response(connection, "h1", serialized_get("http://localhost/users"))
            .await
            .unwrap_err();
        assert!(matches!(error, ChannelError::Closed(_)));
    }
}
