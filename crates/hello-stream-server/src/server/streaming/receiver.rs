use crate::server::{
    service::state::StreamPermit,
    telemetry::{increment_records_received, increment_stream_errors, record_stream_duration},
};
use hello_stream_core::{
    proto::{Ack, Person},
    types::Record,
};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::{Status, Streaming};

/// Reads records from one client stream until the client closes it.
///
/// The acknowledgement has already been queued on `ack_tx` by the time this
/// runs. Holding `ack_tx` keeps the response stream open; dropping it on exit
/// lets the client see a clean end of stream once every record it sent has
/// been read.
///
/// # Behavior
///
/// - Logs every record and, if an `observer` is attached, forwards it there.
/// - Peer completion is logged at `debug`, peer errors at `warn`. Neither is
///   reported back to anyone.
/// - Exits early when `shutdown_token` is cancelled.
pub async fn receive_records(
    permit: StreamPermit,
    mut inbound: Streaming<Person>,
    ack_tx: mpsc::Sender<Result<Ack, Status>>,
    observer: Option<mpsc::UnboundedSender<Record>>,
    shutdown_token: CancellationToken,
) {
    let stream_id = permit.id();
    let start = Instant::now();

    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => {
                tracing::debug!(stream_id, "Stream cancelled by shutdown");
                break;
            }
            msg = inbound.message() => match msg {
                Ok(Some(person)) => {
                    let record = Record::from(person);
                    tracing::info!(stream_id, "Got person {record}");
                    permit.state().record_received();
                    increment_records_received();

                    if let Some(observer) = &observer {
                        // A dropped observer only stops the forwarding.
                        let _ = observer.send(record);
                    }
                }
                Ok(None) => {
                    tracing::debug!(stream_id, "Stream completed by peer");
                    break;
                }
                Err(status) => {
                    tracing::warn!(
                        stream_id,
                        code = ?status.code(),
                        "Stream failed: {}",
                        status.message()
                    );
                    increment_stream_errors();
                    break;
                }
            }
        }
    }

    record_stream_duration(start.elapsed().as_millis() as f64);
    drop(ack_tx);
}
