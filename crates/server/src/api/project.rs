//! # Project WebSocket
//!
//! The client opens `/ws/project/:project_id` and sends one JSON request.
//! Every engine event is forwarded as it happens, followed by one final
//! `complete` or `error` message. Closing the socket cancels the run.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use swarm_core::models::AgentId;
use swarm_core::swarm::{EventChannel, EventSink, ExecutionEvent};

use super::AppState;
use crate::run::{run_project, ProjectRequest, RunOptions};

/// Wire shape of one event
#[derive(Debug, Clone, Serialize)]
pub struct WsMessage {
    pub agent: String,
    #[serde(rename = "type")]
    pub kind: EventChannel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<ExecutionEvent> for WsMessage {
    fn from(event: ExecutionEvent) -> Self {
        Self {
            agent: event.source.to_string(),
            kind: event.channel,
            message: event.payload,
            timestamp: event.timestamp,
        }
    }
}

impl WsMessage {
    fn coordinator(kind: EventChannel, message: impl Into<String>) -> Self {
        ExecutionEvent::new(AgentId::coordinator(), kind, message).into()
    }
}

pub async fn project_websocket(
    ws: WebSocketUpgrade,
    Path(project_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_project_socket(socket, project_id, state))
}

async fn handle_project_socket(socket: WebSocket, project_id: String, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // First text frame carries the request
    let request = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ProjectRequest>(&text) {
                Ok(request) => break request,
                Err(e) => {
                    let reply = WsMessage::coordinator(
                        EventChannel::Error,
                        format!("Invalid project request: {}", e),
                    );
                    let _ = send(&mut sender, &reply).await;
                    return;
                }
            },
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => continue,
        }
    };
    tracing::info!(%project_id, repo = %request.github_url, "project run requested");

    let options = RunOptions {
        workspace_dir: state.workspace_root.join(format!(
            "{}-{}",
            sanitize(&project_id),
            Utc::now().format("%Y%m%d%H%M%S%3f")
        )),
        config_dir: state.config_dir.clone(),
        push: true,
    };

    let (sink, events) = EventSink::channel();
    let mut events = UnboundedReceiverStream::new(events);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(run_project(request, options, sink, cancel.clone()));

    let mut disconnected = false;
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => {
                    if !disconnected && send(&mut sender, &WsMessage::from(event)).await.is_err() {
                        disconnected = true;
                        cancel.cancel();
                    }
                }
                // Every sink dropped: the run is over
                None => break,
            },
            msg = receiver.next(), if !disconnected => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    tracing::info!(%project_id, "client disconnected, cancelling run");
                    disconnected = true;
                    cancel.cancel();
                }
                Some(Ok(_)) => {}
            },
        }
    }

    let last = match run.await {
        Ok(Ok(summary)) => WsMessage::coordinator(EventChannel::Complete, summary.message()),
        Ok(Err(e)) => {
            tracing::warn!(%project_id, error = %e, "project run failed");
            WsMessage::coordinator(
                EventChannel::Error,
                format!("Error during project execution: {:#}", e),
            )
        }
        Err(e) => WsMessage::coordinator(
            EventChannel::Error,
            format!("An unexpected error occurred: {}", e),
        ),
    };
    if !disconnected {
        let _ = send(&mut sender, &last).await;
        let _ = sender.close().await;
    }
}

async fn send<S>(sender: &mut S, message: &WsMessage) -> anyhow::Result<()>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let text = serde_json::to_string(message)?;
    sender.send(Message::Text(text)).await?;
    Ok(())
}

/// Keep project ids usable as directory names
fn sanitize(project_id: &str) -> String {
    let cleaned: String = project_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "project".to_string()
    } else {
        cleaned
    }
}
