//! Control-channel interfaces between the relay and worker connections.
//!
//! The concrete bidirectional transport (WebSocket, IPC, ...) is an external
//! collaborator. The relay only needs a stream of registration events and a
//! correlated request/reply call to a specific connection; workers only need
//! to send commits/resets and serve `responses/create` calls. The [`channel`]
//! module ships an in-process implementation of both sides for same-process
//! workers and tests.

pub mod channel;

use crate::http::serialized::{SerializedRequest, SerializedResponse};
use crate::http::Method;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;

/// Identifies one worker connection for the lifetime of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection#{}", self.0)
    }
}

/// Registration of one routable `(method, URL pattern)` under a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerCommit {
    pub handler_id: String,
    pub url: String,
    pub method: Method,
}

/// A registration message from a worker connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlMessage {
    /// Append one route under the sending connection.
    #[serde(rename = "commit")]
    Commit(HandlerCommit),
    /// Atomically replace all of the sending connection's routes with the
    /// supplied list (empty or absent to just drop them).
    #[serde(rename = "reset")]
    Reset {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commits: Option<Vec<HandlerCommit>>,
    },
}

/// Acknowledgement path for a control message. Registration errors (for
/// example a duplicate path parameter) travel back through it.
#[derive(Debug)]
pub struct AckToken(Option<oneshot::Sender<Result<(), String>>>);

impl AckToken {
    pub fn new(sender: oneshot::Sender<Result<(), String>>) -> Self {
        Self(Some(sender))
    }

    /// An ack token nobody is waiting on.
    pub fn detached() -> Self {
        Self(None)
    }

    pub fn ok(mut self) {
        if let Some(sender) = self.0.take() {
            let _ = sender.send(Ok(()));
        }
    }

    pub fn err(mut self, message: impl Into<String>) {
        if let Some(sender) = self.0.take() {
            let _ = sender.send(Err(message.into()));
        }
    }
}

/// Events the relay consumes from its transport.
#[derive(Debug)]
pub enum ControlEvent {
    Message {
        connection: ConnectionId,
        message: ControlMessage,
        ack: AckToken,
    },
    /// The connection went away; all of its routes must be dropped.
    Closed { connection: ConnectionId },
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("{0} is closed")]
    Closed(ConnectionId),
}

/// Relay-side view of the transport.
#[async_trait]
pub trait RelayChannel: Send + Sync + 'static {
    /// Next registration or lifecycle event from any worker connection.
    /// `None` once the transport itself shuts down.
    async fn next_event(&self) -> Option<ControlEvent>;

    /// Correlated `responses/create` call to one worker connection. `None`
    /// means the worker explicitly bypassed the request.
    async fn create_response(
        &self,
        target: ConnectionId,
        handler_id: &str,
        request: SerializedRequest,
    ) -> Result<Option<SerializedResponse>, ChannelError>;
}

/// Worker-side handler for `responses/create` calls.
#[async_trait]
pub trait WorkerResponder: Send + Sync + 'static {
    /// Produce a response for the serialized request, or `None` to bypass.
    async fn create_response(
        &self,
        handler_id: &str,
        request: SerializedRequest,
    ) -> Option<SerializedResponse>;
}
