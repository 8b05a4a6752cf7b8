//! Per-connection WebSocket plumbing.
//!
//! Each socket gets a session from the registry and two duties: a reader that
//! decodes frames into intents, and a writer that drains the session's
//! outbound queue, pings, and closes the socket once the session is closed.
//! Either side failing closes the session, which stops the other.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{AppState, TransportConfig};
use crate::dispatch::Dispatcher;
use crate::protocol::{self, OutboundEvent};
use crate::session::Session;

pub(super) async fn serve_session(socket: WebSocket, state: AppState) {
    let (session, outbound) = match state.sessions.admit() {
        Ok(admitted) => admitted,
        Err(e) => {
            tracing::warn!("rejecting WebSocket client: {e}");
            let (mut ws_tx, _) = socket.split();
            let close_frame = CloseFrame {
                code: close_code::AGAIN,
                reason: e.to_string().into(),
            };
            let _ = ws_tx.send(Message::Close(Some(close_frame))).await;
            return;
        }
    };
    let id = session.id();
    session.send(OutboundEvent::InternalLog(format!("connected as session {id}")));

    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(write_loop(
        ws_tx,
        outbound,
        session.closed_token(),
        state.shutdown.clone(),
        state.transport,
    ));

    read_loop(&mut ws_rx, &session, &state).await;

    state.sessions.remove(&id);
    if let Err(e) = writer.await {
        tracing::warn!(session = %id, "writer task failed: {e}");
    }
    tracing::info!(session = %id, in_flight = session.in_flight(), "client disconnected");
}

async fn read_loop(ws_rx: &mut SplitStream<WebSocket>, session: &Session, state: &AppState) {
    let closed = session.closed_token();
    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => break,
            next = tokio::time::timeout(state.transport.pong_timeout, ws_rx.next()) => next,
        };
        let message = match next {
            Err(_) => {
                tracing::info!(session = %session.id(), "client silent past pong timeout");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(session = %session.id(), "WebSocket read error: {e}");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => handle_frame(text.as_str(), session, &state.dispatcher),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => handle_frame(text, session, &state.dispatcher),
                Err(_) => {
                    session.send(OutboundEvent::Error(
                        "Invalid message format: binary frame is not UTF-8".to_string(),
                    ));
                }
            },
            Message::Close(_) => break,
            // Pings are answered by the socket itself; any frame resets the timeout.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

fn handle_frame(text: &str, session: &Session, dispatcher: &std::sync::Arc<Dispatcher>) {
    match protocol::decode_frame(text) {
        Ok(intent) => {
            dispatcher.dispatch(session, intent);
        }
        Err(e) => dispatcher.reject(session, &e),
    }
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundEvent>,
    closed: CancellationToken,
    shutdown: CancellationToken,
    transport: TransportConfig,
) {
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + transport.ping_interval,
        transport.ping_interval,
    );

    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                let reason = if shutdown.is_cancelled() {
                    "server shutting down"
                } else {
                    "session closed"
                };
                let close_frame = CloseFrame {
                    code: close_code::NORMAL,
                    reason: reason.into(),
                };
                let _ = send_with_timeout(&mut ws_tx, Message::Close(Some(close_frame)), transport).await;
                break;
            }
            event = outbound.recv() => {
                let Some(event) = event else { break };
                let frame = match event.to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(kind = event.kind(), "failed to encode event: {e}");
                        continue;
                    }
                };
                if !send_with_timeout(&mut ws_tx, Message::Text(frame.into()), transport).await {
                    closed.cancel();
                    break;
                }
            }
            _ = ping.tick() => {
                if !send_with_timeout(&mut ws_tx, Message::Ping(Default::default()), transport).await {
                    closed.cancel();
                    break;
                }
            }
        }
    }
}

async fn send_with_timeout(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    message: Message,
    transport: TransportConfig,
) -> bool {
    match tokio::time::timeout(transport.write_timeout, ws_tx.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!("WebSocket write failed: {e}");
            false
        }
        Err(_) => {
            tracing::warn!(timeout = ?transport.write_timeout, "WebSocket write timed out");
            false
        }
    }
}
