//! Per-connection session state
//!
//! A `Session` is created when the WebSocket handshake completes and lives
//! until the connection closes. Inbound frames are processed by the
//! connection's read loop; everything bound for the client goes through the
//! session's outbound queue, which the connection's writer task drains.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::error::CommandError;
use crate::socket_server::protocol::{ClientId, Response, UserId};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, not logged in yet
    Connected,
    /// Logged in and addressable
    Active,
    /// Close requested, cleanup in progress
    Closing,
    /// Removed from the registry, transport released
    Closed,
}

/// Why a session was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    TransportError,
    LivenessTimeout,
    LoginTimeout,
    MalformedFrame,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::ClientClosed => "client closed",
            CloseReason::TransportError => "transport error",
            CloseReason::LivenessTimeout => "receive timeout",
            CloseReason::LoginTimeout => "login timeout",
            CloseReason::MalformedFrame => "malformed frame",
        };
        f.write_str(s)
    }
}

/// Item on a session's outbound queue
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A response or delivery; `immed` responses are flushed as their own frame
    Response { rsp: Response, immed: bool },
    /// WebSocket ping control frame
    Ping,
    /// Close the transport and stop the writer
    Close,
}

/// What the writer task actually puts on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Batch(Vec<Response>),
    Ping,
    Close,
}

/// Turn a run of queued items into wire frames, in queue order.
///
/// Consecutive non-immediate responses share one batch frame. An immediate
/// response flushes whatever is pending and goes out alone, as do control
/// frames.
pub fn coalesce(items: impl IntoIterator<Item = Outbound>) -> Vec<OutboundFrame> {
    let mut frames = Vec::new();
    let mut pending: Vec<Response> = Vec::new();

    for item in items {
        match item {
            Outbound::Response { rsp, immed: false } => pending.push(rsp),
            Outbound::Response { rsp, immed: true } => {
                flush(&mut pending, &mut frames);
                frames.push(OutboundFrame::Batch(vec![rsp]));
            }
            Outbound::Ping => {
                flush(&mut pending, &mut frames);
                frames.push(OutboundFrame::Ping);
            }
            Outbound::Close => {
                flush(&mut pending, &mut frames);
                frames.push(OutboundFrame::Close);
            }
        }
    }
    flush(&mut pending, &mut frames);
    frames
}

fn flush(pending: &mut Vec<Response>, frames: &mut Vec<OutboundFrame>) {
    if !pending.is_empty() {
        frames.push(OutboundFrame::Batch(std::mem::take(pending)));
    }
}

/// Timestamps the supervisor works from
#[derive(Debug, Clone, Copy)]
pub struct LivenessSnapshot {
    pub connected_at: Instant,
    pub last_recv_at: Instant,
    pub last_sent_at: Instant,
    pub logged_in: bool,
}

struct SessionInner {
    state: SessionState,
    client_id: Option<ClientId>,
    user_id: Option<UserId>,
    channels: HashSet<String>,
    connected_at: Instant,
    last_recv_at: Instant,
    last_sent_at: Instant,
}

/// Server-side state for one live connection
pub struct Session {
    conn_id: String,
    peer: Option<SocketAddr>,
    inner: Mutex<SessionInner>,
    outbound: mpsc::UnboundedSender<Outbound>,
    close_signal: Notify,
}

impl Session {
    /// Create a session and the receiving end of its outbound queue
    pub fn new(peer: Option<SocketAddr>) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = format!(
            "conn_{}",
            uuid::Uuid::new_v4().simple().to_string().get(..8).unwrap_or_default()
        );
        let now = Instant::now();
        let session = Self {
            conn_id,
            peer,
            inner: Mutex::new(SessionInner {
                state: SessionState::Connected,
                client_id: None,
                user_id: None,
                channels: HashSet::new(),
                connected_at: now,
                last_recv_at: now,
                last_sent_at: now,
            }),
            outbound: tx,
            close_signal: Notify::new(),
        };
        (Arc::new(session), rx)
    }

    /// Label used in log lines before a client id exists
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.inner.lock().client_id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.inner.lock().user_id
    }

    /// Client and user id, once logged in
    pub fn identity(&self) -> Option<(ClientId, UserId)> {
        let inner = self.inner.lock();
        inner.client_id.zip(inner.user_id)
    }

    /// Joined channels, sorted
    pub fn channels(&self) -> Vec<String> {
        let mut chans: Vec<String> = self.inner.lock().channels.iter().cloned().collect();
        chans.sort();
        chans
    }

    pub fn in_channel(&self, name: &str) -> bool {
        self.inner.lock().channels.contains(name)
    }

    /// Connected -> Active. Only the registry calls this, under its write lock.
    pub(crate) fn activate(&self, client_id: ClientId, user_id: UserId) -> Result<(), CommandError> {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Connected => {
                inner.state = SessionState::Active;
                inner.client_id = Some(client_id);
                inner.user_id = Some(user_id);
                Ok(())
            }
            SessionState::Active => Err(CommandError::AlreadyLoggedIn),
            SessionState::Closing | SessionState::Closed => Err(CommandError::SessionClosed),
        }
    }

    pub(crate) fn insert_channel(&self, name: &str) -> bool {
        self.inner.lock().channels.insert(name.to_string())
    }

    pub(crate) fn remove_channel(&self, name: &str) -> bool {
        self.inner.lock().channels.remove(name)
    }

    pub(crate) fn take_channels(&self) -> HashSet<String> {
        std::mem::take(&mut self.inner.lock().channels)
    }

    /// Move to Closing. Returns false if the session was already closing.
    pub(crate) fn begin_close(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Closing | SessionState::Closed => false,
            _ => {
                inner.state = SessionState::Closing;
                true
            }
        }
    }

    /// Move to Closed and tell the writer to release the transport
    pub(crate) fn finish_close(&self) {
        self.inner.lock().state = SessionState::Closed;
        let _ = self.outbound.send(Outbound::Close);
    }

    pub fn touch_recv(&self, now: Instant) {
        self.inner.lock().last_recv_at = now;
    }

    pub fn touch_sent(&self, now: Instant) {
        self.inner.lock().last_sent_at = now;
    }

    pub fn liveness(&self) -> LivenessSnapshot {
        let inner = self.inner.lock();
        LivenessSnapshot {
            connected_at: inner.connected_at,
            last_recv_at: inner.last_recv_at,
            last_sent_at: inner.last_sent_at,
            logged_in: inner.state == SessionState::Active,
        }
    }

    /// Enqueue a response without waiting on the transport.
    ///
    /// Returns false once the writer has gone away.
    pub fn send(&self, rsp: Response, immed: bool) -> bool {
        self.outbound.send(Outbound::Response { rsp, immed }).is_ok()
    }

    /// Enqueue a ping and restart the ping interval from `now`
    pub fn queue_ping(&self, now: Instant) {
        self.touch_sent(now);
        let _ = self.outbound.send(Outbound::Ping);
    }

    /// Ask the read loop to stop, e.g. after a failed write
    pub fn request_close(&self) {
        self.close_signal.notify_one();
    }

    /// Resolves once `request_close` has been called
    pub async fn close_requested(&self) {
        self.close_signal.notified().await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("conn_id", &self.conn_id)
            .field("state", &inner.state)
            .field("client_id", &inner.client_id)
            .field("user_id", &inner.user_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rsp(cmd: &str, seq: i64) -> Response {
        Response {
            cmd: cmd.to_string(),
            seq,
            code: 0,
            msg: String::new(),
            data: json!(null),
        }
    }

    #[test]
    fn test_activate_once() {
        let (session, _rx) = Session::new(None);
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.identity(), None);

        session.activate(5001, 1000).unwrap();
        assert!(session.is_active());
        assert_eq!(session.identity(), Some((5001, 1000)));

        assert_eq!(session.activate(5002, 1001), Err(CommandError::AlreadyLoggedIn));
        assert_eq!(session.client_id(), Some(5001));
    }

    #[test]
    fn test_close_transitions() {
        let (session, mut rx) = Session::new(None);
        assert!(session.begin_close());
        assert!(!session.begin_close());
        assert_eq!(session.activate(1, 1), Err(CommandError::SessionClosed));

        session.finish_close();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }

    #[test]
    fn test_send_fails_after_writer_dropped() {
        let (session, rx) = Session::new(None);
        assert!(session.send(rsp("ping", 1), true));
        drop(rx);
        assert!(!session.send(rsp("ping", 2), true));
    }

    #[test]
    fn test_queue_ping_resets_send_clock() {
        let (session, mut rx) = Session::new(None);
        let later = Instant::now() + std::time::Duration::from_secs(5);
        session.queue_ping(later);
        assert_eq!(session.liveness().last_sent_at, later);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);
    }

    #[test]
    fn test_coalesce_batches_queued_responses() {
        let frames = coalesce(vec![
            Outbound::Response { rsp: rsp("enter", 1), immed: false },
            Outbound::Response { rsp: rsp("rcvdata", 0), immed: false },
            Outbound::Response { rsp: rsp("login", 2), immed: true },
            Outbound::Response { rsp: rsp("exit", 3), immed: false },
            Outbound::Ping,
            Outbound::Response { rsp: rsp("rcvdata", 0), immed: false },
        ]);

        assert_eq!(
            frames,
            vec![
                OutboundFrame::Batch(vec![rsp("enter", 1), rsp("rcvdata", 0)]),
                OutboundFrame::Batch(vec![rsp("login", 2)]),
                OutboundFrame::Batch(vec![rsp("exit", 3)]),
                OutboundFrame::Ping,
                OutboundFrame::Batch(vec![rsp("rcvdata", 0)]),
            ]
        );
    }

    #[test]
    fn test_coalesce_close_flushes_pending() {
        let frames = coalesce(vec![
            Outbound::Response { rsp: rsp("rcvdata", 0), immed: false },
            Outbound::Close,
        ]);
        assert_eq!(
            frames,
            vec![OutboundFrame::Batch(vec![rsp("rcvdata", 0)]), OutboundFrame::Close]
        );
        assert!(coalesce(Vec::new()).is_empty());
    }

    #[tokio::test]
    async fn test_request_close_wakes_waiter() {
        let (session, _rx) = Session::new(None);
        session.request_close();
        tokio::time::timeout(std::time::Duration::from_secs(1), session.close_requested())
            .await
            .expect("close signal should be stored");
    }
}
