//! WebSocket connection handler
//!
//! Each connection gets a read loop (decode, dispatch, liveness) and a writer
//! task that drains the session's outbound queue. Whichever side fails first,
//! the session is purged from the registry before the transport is released.

use std::io;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Duration, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message, WebSocketStream};

use crate::error::{PushError, Result};
use crate::socket_server::dispatcher::Dispatcher;
use crate::socket_server::protocol::encode_batch;
use crate::socket_server::session::{coalesce, CloseReason, Outbound, OutboundFrame, Session};
use crate::socket_server::supervisor::Verdict;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Accept connections until the listener fails
pub async fn serve(listener: TcpListener, dispatcher: Arc<Dispatcher>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::debug!("Accepted connection from {}", addr);
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    handle_connection(stream, dispatcher).await;
                });
            }
            Err(e) => {
                tracing::error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Complete the WebSocket handshake, accepting only requests for `path`.
///
/// Any other path is answered with HTTP 404. A peer that does not finish the
/// handshake within `limit` fails with a `TimedOut` I/O error.
pub async fn accept_websocket(
    stream: TcpStream,
    path: &str,
    limit: Duration,
) -> Result<WebSocketStream<TcpStream>> {
    let check_path = |req: &Request, rsp: Response| -> std::result::Result<Response, ErrorResponse> {
        if req.uri().path() == path {
            Ok(rsp)
        } else {
            let mut err = ErrorResponse::new(Some(format!("no endpoint at {}", req.uri().path())));
            *err.status_mut() = StatusCode::NOT_FOUND;
            Err(err)
        }
    };

    match timeout(limit, accept_hdr_async(stream, check_path)).await {
        Ok(ws) => Ok(ws?),
        Err(_) => Err(PushError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("handshake not completed within {:?}", limit),
        ))),
    }
}

/// Handle a single WebSocket connection
pub async fn handle_connection(stream: TcpStream, dispatcher: Arc<Dispatcher>) {
    let addr = stream.peer_addr().ok();
    let path = &dispatcher.config().server.path;

    let ws_stream = match accept_websocket(stream, path, dispatcher.send_timeout()).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!("WebSocket handshake with {:?} failed: {}", addr, e);
            return;
        }
    };

    let (session, outbound_rx) = Session::new(addr);
    tracing::info!("New connection {} from {:?}", session.conn_id(), session.peer());

    let (sink, source) = ws_stream.split();
    let writer = tokio::spawn(write_loop(
        sink,
        outbound_rx,
        Arc::clone(&session),
        dispatcher.send_timeout(),
    ));

    let reason = read_loop(source, &session, &dispatcher).await;
    dispatcher.close_session(&session, reason);

    if let Err(e) = writer.await {
        tracing::error!("Writer task for {} failed: {}", session.conn_id(), e);
    }
}

async fn read_loop(mut source: WsSource, session: &Arc<Session>, dispatcher: &Dispatcher) -> CloseReason {
    let supervisor = dispatcher.supervisor();
    let close_on_decode_error = dispatcher.config().server.close_on_decode_error;

    loop {
        let deadline = supervisor.next_deadline(&session.liveness());

        tokio::select! {
            msg = source.next() => {
                let frame = match msg {
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Binary(data))) => data,
                    // tungstenite answers pings itself
                    Some(Ok(Message::Ping(_)))
                    | Some(Ok(Message::Pong(_)))
                    | Some(Ok(Message::Frame(_))) => {
                        session.touch_recv(Instant::now());
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!("Client {} requested close", session.conn_id());
                        return CloseReason::ClientClosed;
                    }
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error on {}: {}", session.conn_id(), e);
                        return CloseReason::TransportError;
                    }
                };

                session.touch_recv(Instant::now());
                if let Err(e) = dispatcher.handle_frame(session, &frame) {
                    tracing::warn!("Rejected frame from {}: {}", session.conn_id(), e);
                    if close_on_decode_error {
                        return CloseReason::MalformedFrame;
                    }
                }
            }

            _ = sleep_until(deadline) => {
                match supervisor.check(&session.liveness(), Instant::now()) {
                    Verdict::Expire(reason) => return reason,
                    Verdict::Ping => session.queue_ping(Instant::now()),
                    Verdict::Wait(_) => {}
                }
            }

            _ = session.close_requested() => {
                return CloseReason::TransportError;
            }
        }
    }
}

async fn write_loop(
    mut sink: WsSink,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    session: Arc<Session>,
    send_timeout: Duration,
) {
    let mut queued = Vec::new();

    while let Some(first) = outbound.recv().await {
        queued.push(first);
        while let Ok(next) = outbound.try_recv() {
            queued.push(next);
        }

        for frame in coalesce(queued.drain(..)) {
            let msg = match frame {
                OutboundFrame::Batch(batch) => match encode_batch(&batch) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        tracing::error!("Dropping batch for {}: {}", session.conn_id(), e);
                        continue;
                    }
                },
                OutboundFrame::Ping => Message::Ping(Vec::new()),
                OutboundFrame::Close => {
                    let _ = timeout(send_timeout, sink.close()).await;
                    return;
                }
            };

            match timeout(send_timeout, sink.send(msg)).await {
                Ok(Ok(())) => session.touch_sent(Instant::now()),
                Ok(Err(e)) => {
                    tracing::warn!("Write to {} failed: {}", session.conn_id(), e);
                    session.request_close();
                    return;
                }
                Err(_) => {
                    tracing::warn!("Write to {} timed out after {:?}", session.conn_id(), send_timeout);
                    session.request_close();
                    return;
                }
            }
        }
    }
}
