//! In-memory connection registry.
//!
//! Maps identity (user or printer UUID) to the set of live sessions for
//! that identity.  The registry is the only write path to a socket: every
//! session owns a writer task consuming a command channel, and all frame
//! writes (deliveries, control frames) go through it, which serializes
//! writes per session.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use pm_protocol::WsMessage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use crate::error::CoreError;

/// Bounded time for one socket write; a timeout counts as delivery failure.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// One queued write for a session's writer task.
pub enum SessionCommand {
    /// A JSON frame whose delivery outcome the caller waits on.
    Frame {
        frame: WsMessage,
        done: oneshot::Sender<Result<(), CoreError>>,
    },
    /// Fire-and-forget control frame (ping/pong/close).
    Control(Message),
}

/// Cheap, cloneable reference to one live session's write path.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    #[must_use]
    pub fn new(tx: mpsc::Sender<SessionCommand>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            tx,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Hand a frame to the session's write path and wait for the write
    /// result.  Fails once the session is torn down.
    pub async fn send(&self, frame: WsMessage) -> Result<(), CoreError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Frame {
                frame,
                done: done_tx,
            })
            .await
            .map_err(|_| CoreError::SendFailed("session closed".to_owned()))?;
        match done_rx.await {
            Ok(result) => result,
            Err(_) => Err(CoreError::SendFailed(
                "session dropped the delivery".to_owned(),
            )),
        }
    }
}

/// Result of a fan-out to one identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Sessions attached when the broadcast started.
    pub sessions: usize,
    /// Sessions whose socket write succeeded.
    pub delivered: usize,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, Vec<SessionHandle>>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a session; returns true when it is the first live session for
    /// this identity.
    pub async fn attach(&self, identity: Uuid, handle: SessionHandle) -> bool {
        let mut map = self.sessions.write().await;
        let entry = map.entry(identity).or_default();
        let first = entry.is_empty();
        entry.push(handle);
        first
    }

    /// Detach a session; returns true when it was the last live session for
    /// this identity.
    pub async fn detach(&self, identity: Uuid, session_id: Uuid) -> bool {
        let mut map = self.sessions.write().await;
        let Some(entry) = map.get_mut(&identity) else {
            return false;
        };
        entry.retain(|h| h.session_id != session_id);
        if entry.is_empty() {
            map.remove(&identity);
            true
        } else {
            false
        }
    }

    pub async fn is_connected(&self, identity: Uuid) -> bool {
        self.sessions.read().await.contains_key(&identity)
    }

    /// Snapshot of identities with at least one live session.
    pub async fn connected_identities(&self) -> Vec<Uuid> {
        self.sessions.read().await.keys().copied().collect()
    }

    /// Deliver a frame to every live session for an identity.
    ///
    /// Sends happen outside the registry lock so a slow socket cannot block
    /// attach/detach.
    pub async fn broadcast(&self, identity: Uuid, frame: &WsMessage) -> BroadcastOutcome {
        let handles: Vec<SessionHandle> = {
            let map = self.sessions.read().await;
            map.get(&identity).cloned().unwrap_or_default()
        };
        let mut outcome = BroadcastOutcome {
            sessions: handles.len(),
            delivered: 0,
        };
        for handle in &handles {
            if handle.send(frame.clone()).await.is_ok() {
                outcome.delivered += 1;
            }
        }
        outcome
    }
}

/// Writer task: the sole owner of a socket's write half.
///
/// Consumes queued commands until the channel closes or a write fails;
/// each write is bounded by [`SEND_TIMEOUT`].
pub async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<SessionCommand>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            SessionCommand::Frame { frame, done } => {
                let result = write_frame(&mut sink, &frame).await;
                let failed = result.is_err();
                let _ = done.send(result);
                if failed {
                    break;
                }
            }
            SessionCommand::Control(msg) => {
                let write = tokio::time::timeout(SEND_TIMEOUT, sink.send(msg)).await;
                if !matches!(write, Ok(Ok(()))) {
                    break;
                }
            }
        }
    }
}

async fn write_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &WsMessage,
) -> Result<(), CoreError> {
    let json =
        serde_json::to_string(frame).map_err(|e| CoreError::SendFailed(e.to_string()))?;
    match tokio::time::timeout(SEND_TIMEOUT, sink.send(Message::Text(json))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CoreError::SendFailed(e.to_string())),
        Err(_) => Err(CoreError::SendFailed("socket write timed out".to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pm_protocol::status_levels;

    /// A handle whose writer always acks, plus the drain task handle.
    fn acking_handle() -> SessionHandle {
        let (tx, mut rx) = mpsc::channel::<SessionCommand>(8);
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                if let SessionCommand::Frame { done, .. } = cmd {
                    let _ = done.send(Ok(()));
                }
            }
        });
        SessionHandle::new(tx)
    }

    /// A handle whose channel is already closed.
    fn dead_handle() -> SessionHandle {
        let (tx, rx) = mpsc::channel::<SessionCommand>(1);
        drop(rx);
        SessionHandle::new(tx)
    }

    fn frame() -> WsMessage {
        WsMessage::status(status_levels::INFO, "test")
    }

    #[tokio::test]
    async fn attach_detach_track_first_and_last() {
        let registry = ConnectionRegistry::new();
        let identity = Uuid::new_v4();
        let a = acking_handle();
        let b = acking_handle();

        assert!(registry.attach(identity, a.clone()).await, "first session");
        assert!(!registry.attach(identity, b.clone()).await, "second session");
        assert!(registry.is_connected(identity).await);

        assert!(!registry.detach(identity, a.session_id()).await);
        assert!(registry.detach(identity, b.session_id()).await, "last session");
        assert!(!registry.is_connected(identity).await);
    }

    #[tokio::test]
    async fn broadcast_counts_only_successful_writes() {
        let registry = ConnectionRegistry::new();
        let identity = Uuid::new_v4();
        registry.attach(identity, acking_handle()).await;
        registry.attach(identity, dead_handle()).await;

        let outcome = registry.broadcast(identity, &frame()).await;
        assert_eq!(outcome.sessions, 2);
        assert_eq!(outcome.delivered, 1);
    }

    #[tokio::test]
    async fn broadcast_to_unknown_identity_reaches_nobody() {
        let registry = ConnectionRegistry::new();
        let outcome = registry.broadcast(Uuid::new_v4(), &frame()).await;
        assert_eq!(outcome, BroadcastOutcome::default());
    }

    #[tokio::test]
    async fn detach_of_unknown_session_is_a_noop() {
        let registry = ConnectionRegistry::new();
        let identity = Uuid::new_v4();
        registry.attach(identity, acking_handle()).await;
        assert!(!registry.detach(identity, Uuid::new_v4()).await);
        assert!(registry.is_connected(identity).await);
    }
}
