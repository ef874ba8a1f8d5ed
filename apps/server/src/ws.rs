//! WebSocket transport adapter for the tracking channel.
//!
//! Authentication and authorization run *before* the upgrade, so a refused
//! connection is answered with a plain HTTP status and never opens. After
//! the upgrade the socket splits: inbound frames feed the session state
//! machine one at a time, while the session's registry mailbox pumps
//! broadcasts out through the sink.
//!
//! There is no application-level heartbeat; the connection lives until the
//! peer disconnects or the transport fails. Transport pings are answered,
//! nothing more.

use crate::state::ApiState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use courier_domain::ParcelId;
use courier_tracking::{Mailbox, ServerMessage, TrackingError, TrackingSession};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

/// Connection-establishment parameters carried in the query string.
#[derive(Debug, Deserialize)]
pub(crate) struct TrackingParams {
    token: Option<String>,
    parcel_id: Option<ParcelId>,
}

pub(crate) async fn tracking_upgrade(
    State(state): State<ApiState>,
    Query(params): Query<TrackingParams>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.tracking.connect(params.token.as_deref(), params.parcel_id).await {
        Ok((session, mailbox)) => {
            ws.on_upgrade(move |socket| run_session(socket, session, mailbox))
        },
        Err(e) => {
            let status = match &e {
                TrackingError::Authentication { .. } => StatusCode::UNAUTHORIZED,
                TrackingError::Authorization { .. } => StatusCode::FORBIDDEN,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            debug!(error = %e, "Tracking connection refused");
            (status, e.peer_message()).into_response()
        },
    }
}

async fn run_session(socket: WebSocket, mut session: TrackingSession, mut mailbox: Mailbox) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            // Broadcasts from other sessions (and this one's mirror group).
            outbound = mailbox.recv() => {
                // A drained mailbox means the registry dropped this
                // connection (server shutdown); wind the socket down.
                let Some(event) = outbound else { break };
                if send_frame(&mut sink, &event).await.is_err() {
                    break;
                }
            },
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = session.handle_text(&text).await
                            && send_frame(&mut sink, &reply).await.is_err()
                        {
                            break;
                        }
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    },
                    Some(Ok(Message::Pong(_))) => {},
                    Some(Ok(Message::Binary(_))) => {
                        // The protocol is text-only JSON; binary frames are ignored.
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(connection = %session.connection_id(), error = %e, "WebSocket error");
                        break;
                    },
                }
            },
        }
    }

    session.close();
    let _ = sink.close().await;
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(json) => sink.send(Message::Text(json.into())).await,
        Err(e) => {
            // Serialization of our own types failing is a bug, but one bad
            // frame is not worth the connection.
            warn!(error = %e, "Failed to serialize outbound frame");
            Ok(())
        },
    }
}
