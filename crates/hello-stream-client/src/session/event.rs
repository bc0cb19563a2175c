use hello_stream_core::types::Acknowledgement;
use std::sync::Arc;
use tonic::Status;

/// Something the server did on one stream.
#[derive(Debug)]
pub enum StreamEvent {
    /// The server acknowledged the stream. Sent at most once per stream.
    Acknowledged(Acknowledgement),
    /// The server finished the stream cleanly.
    Completed,
    /// The RPC failed or was reset. Never propagated to `send_batch`.
    Failed(Status),
}

/// Callback invoked from the stream's receive task with the stream id and the
/// event. Runs concurrently with `send_batch`.
pub type StreamEventHandler = Arc<dyn Fn(u64, StreamEvent) + Send + Sync>;

/// Default handler: logs every event and otherwise ignores it.
pub fn log_events() -> StreamEventHandler {
    Arc::new(|stream_id, event| match event {
        StreamEvent::Acknowledged(ack) => {
            tracing::info!(stream_id, "Got response {ack:?}");
        }
        StreamEvent::Completed => {
            tracing::debug!(stream_id, "Server completed the stream");
        }
        StreamEvent::Failed(status) => {
            tracing::warn!(stream_id, code = ?status.code(), "Stream failed: {}", status.message());
        }
    })
}
