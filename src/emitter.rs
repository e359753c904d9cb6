use chrono::{DateTime, Utc};
use log::warn;
use tauri::{AppHandle, Manager};
use tokio::sync::mpsc;

use crate::generator::GenerationEvent;

// All generation streams share one channel; consumers filter on stream_id.
pub const GENERATION_CHANNEL: &str = "generation-events";

#[derive(Clone, serde::Serialize, Debug)]
#[serde(tag = "type")]
pub enum EmitterEventPayload {
    Generation { event: GenerationEvent },
    ChannelClose, // Universally at the end of a channel
}

#[derive(Clone, serde::Serialize, Debug)]
pub struct EmitterEvent {
    pub stream_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: EmitterEventPayload,
}

/// Forward a generation event channel to the UI. The UI side only ever sees
/// these events; credentials stay on this side of the boundary. Emits a final
/// ChannelClose once the sender hangs up.
pub async fn send_events(
    channel: &str,
    stream_id: String,
    mut rx: mpsc::Receiver<GenerationEvent>,
    app: AppHandle,
) {
    while let Some(event) = rx.recv().await {
        let payload = EmitterEvent {
            stream_id: stream_id.clone(),
            timestamp: Utc::now(),
            event: EmitterEventPayload::Generation { event },
        };
        if let Err(err) = app.emit_all(channel, &payload) {
            warn!("dropping emitter event for stream {}: {}", stream_id, err);
        }
    }

    let payload = EmitterEvent {
        stream_id: stream_id.clone(),
        timestamp: Utc::now(),
        event: EmitterEventPayload::ChannelClose,
    };
    if let Err(err) = app.emit_all(channel, &payload) {
        warn!("dropping channel close for stream {}: {}", stream_id, err);
    }
}
