//! gRPC service implementation for bidirectional `SayHello` streams.
//!
//! [`HelloService`] implements the generated [`HelloWorldStreamingService`]
//! trait. Every accepted stream gets exactly one acknowledgement, queued
//! before anything is read, and a spawned receive task that logs the records
//! the client pushes until the client closes the stream.
//!
//! ## Responsibilities
//!
//! - Admit streams up to the configured limit and refuse them during shutdown.
//! - Acknowledge each stream and hand it to [`receive_records`].
//! - Drain, then cancel, in-flight streams on shutdown.

use crate::server::{
    config::ServerConfig,
    service::state::StreamState,
    streaming::receiver::receive_records,
    telemetry::{increment_acks_sent, increment_stream_errors, increment_streams_opened},
};
use core::{pin::Pin, time::Duration};
use hello_stream_core::{
    Error,
    proto::{Ack, Person, hello_world_streaming_service_server::HelloWorldStreamingService},
    types::{Acknowledgement, Record},
};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{sleep, timeout},
};
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::Instrument;

/// gRPC service that acknowledges and logs client streams.
///
/// Cheap to clone; clones share the stream accounting and the shutdown token.
#[derive(Clone)]
pub struct HelloService {
    config: ServerConfig,
    state: Arc<StreamState>,
    shutdown_token: CancellationToken,
    observer: Option<mpsc::UnboundedSender<Record>>,
}

impl HelloService {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            state: Arc::new(StreamState::new(config.max_streams)),
            config,
            shutdown_token: CancellationToken::new(),
            observer: None,
        }
    }

    /// Forwards every received record to `observer` after it is logged.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<Record>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Gracefully shuts the service down.
    ///
    /// - Refuses new streams.
    /// - Waits up to the configured shutdown timeout for in-flight streams to
    ///   be closed by their clients.
    /// - Cancels whatever is left.
    pub async fn shutdown(&self) -> Result<(), Error> {
        // === Phase 0: Stop accepting new streams ===
        tracing::info!("Refusing new streams");
        self.state.begin_shutdown();

        // === Phase 1: Wait for in-flight streams to drain ===
        tracing::info!(
            "Draining in-flight streams ({} active)",
            self.state.streams_inflight()
        );
        let drained = timeout(self.config.shutdown_timeout, async {
            while self.state.streams_inflight() > 0 {
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::debug!("All in-flight streams drained"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} streams still active)",
                self.state.streams_inflight()
            ),
        }

        // === Phase 2: Cancel the rest ===
        tracing::debug!("Cancelling remaining streams via shutdown token");
        self.shutdown_token.cancel();

        tracing::info!("Stream service shutdown complete");
        Ok(())
    }
}

#[tonic::async_trait]
impl HelloWorldStreamingService for HelloService {
    type SayHelloStream = Pin<Box<dyn Stream<Item = Result<Ack, Status>> + Send>>;

    /// Accepts one bidirectional stream.
    ///
    /// The acknowledgement is queued on the response stream before this
    /// returns, so it is the first thing the client receives. The response
    /// stream then stays open until the client finishes sending.
    #[tracing::instrument(skip_all)]
    async fn say_hello(
        &self,
        req: Request<Streaming<Person>>,
    ) -> Result<Response<Self::SayHelloStream>, Status> {
        let permit = self
            .state
            .try_acquire()
            .inspect_err(|_| increment_stream_errors())?;
        let stream_id = permit.id();
        increment_streams_opened();

        let (ack_tx, ack_rx) = mpsc::channel::<Result<Ack, Status>>(1);
        ack_tx
            .try_send(Ok(Acknowledgement.into()))
            .map_err(|e| Error::Transport {
                context: format!("failed to queue acknowledgement: {e}"),
            })?;
        increment_acks_sent();
        tracing::debug!(stream_id, "Acknowledged stream");

        let fut = receive_records(
            permit,
            req.into_inner(),
            ack_tx,
            self.observer.clone(),
            self.shutdown_token.clone(),
        );
        tokio::spawn(fut.instrument(tracing::info_span!("stream", stream_id)));

        Ok(Response::new(Box::pin(ReceiverStream::new(ack_rx))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use hello_stream_client::{
        Session, SessionConfig, SessionState, StreamEvent,
        session::{Connection, StreamEventHandler, log_events},
    };
    use hello_stream_core::proto::{
        hello_world_streaming_service_client::HelloWorldStreamingServiceClient,
        hello_world_streaming_service_server::HelloWorldStreamingServiceServer,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio::net::TcpListener;
    use tokio_stream::wrappers::TcpListenerStream;
    use tonic::{Code, transport::Server};

    const WAIT: Duration = Duration::from_secs(5);

    struct TestServer {
        addr: String,
        service: HelloService,
        accepted: Arc<AtomicUsize>,
        records: mpsc::UnboundedReceiver<Record>,
    }

    impl TestServer {
        async fn spawn(config: ServerConfig) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = format!("http://{}", listener.local_addr().unwrap());

            // Count accepted TCP connections to observe connection resets.
            let accepted = Arc::new(AtomicUsize::new(0));
            let incoming = TcpListenerStream::new(listener).inspect({
                let accepted = Arc::clone(&accepted);
                move |_| {
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
            });

            let (observer, records) = mpsc::unbounded_channel();
            let service = HelloService::new(config).with_observer(observer);

            tokio::spawn(
                Server::builder()
                    .add_service(HelloWorldStreamingServiceServer::new(service.clone()))
                    .serve_with_incoming(incoming),
            );

            Self {
                addr,
                service,
                accepted,
                records,
            }
        }

        fn session_config(&self) -> SessionConfig {
            SessionConfig {
                server_addr: self.addr.clone(),
                connect_timeout: Duration::from_secs(2),
                drain_timeout: Duration::from_secs(2),
            }
        }

        fn accepted(&self) -> usize {
            self.accepted.load(Ordering::SeqCst)
        }

        async fn next_records(&mut self, n: usize) -> Vec<Record> {
            let mut out = Vec::with_capacity(n);
            for _ in 0..n {
                let record = timeout(WAIT, self.records.recv())
                    .await
                    .expect("timed out waiting for a record")
                    .expect("observer closed");
                out.push(record);
            }
            out
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + WAIT;
        while !check() {
            assert!(Instant::now() < deadline, "condition not met within {WAIT:?}");
            sleep(Duration::from_millis(10)).await;
        }
    }

    fn recording_handler() -> (
        StreamEventHandler,
        mpsc::UnboundedReceiver<(u64, &'static str)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: StreamEventHandler = Arc::new(move |stream_id, event| {
            let kind = match event {
                StreamEvent::Acknowledged(_) => "ack",
                StreamEvent::Completed => "completed",
                StreamEvent::Failed(_) => "failed",
            };
            let _ = tx.send((stream_id, kind));
        });
        (handler, rx)
    }

    /// Waits for stream `stream_id` to finish and returns how it finished.
    async fn stream_end(
        events: &mut mpsc::UnboundedReceiver<(u64, &'static str)>,
        stream_id: u64,
    ) -> &'static str {
        loop {
            let (id, kind) = timeout(WAIT, events.recv())
                .await
                .expect("timed out waiting for a stream event")
                .expect("handler dropped");
            if id == stream_id && kind != "ack" {
                return kind;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn three_batches_log_thirty_records_and_reset_once() {
        let mut server = TestServer::spawn(ServerConfig::default()).await;
        let mut session = Session::open(server.session_config()).await.unwrap();

        for _ in 0..3 {
            session.send_batch("Ann", "Lee").await.unwrap();
        }

        let expected: Vec<Record> = (0..3).flat_map(|_| Record::batch("Ann", "Lee")).collect();
        assert_eq!(server.next_records(30).await, expected);
        assert_eq!(server.service.state().records_received(), 30);

        let stats = session.stats();
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.records_pushed, 30);
        assert_eq!(stats.channels_opened, 1);
        assert_eq!(stats.resets, 1);
        assert_eq!(stats.connections_opened, 2);
        assert_eq!(session.state(), SessionState::Open);

        eventually(|| server.accepted() == 2).await;
        assert_eq!(server.service.state().streams_opened(), 1);

        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn consecutive_batches_reuse_the_stream() {
        let mut server = TestServer::spawn(ServerConfig::default()).await;
        let mut session = Session::open(server.session_config()).await.unwrap();
        assert_eq!(session.state(), SessionState::Open);

        session.send_batch("Billy", "Bob").await.unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        session.send_batch("Billy", "Bob").await.unwrap();
        assert_eq!(session.state(), SessionState::Streaming);

        let stats = session.stats();
        assert_eq!(stats.connections_opened, 1);
        assert_eq!(stats.channels_opened, 1);
        assert_eq!(stats.resets, 0);

        let records = server.next_records(20).await;
        assert!(records.iter().all(|r| r.first_name() == "Billy"));
        assert_eq!(records[10].last_name(), "Bob:0");
        assert_eq!(records[19].last_name(), "Bob:9");

        eventually(|| server.service.state().streams_opened() == 1).await;
        assert_eq!(server.accepted(), 1);

        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_third_batch_rebuilds_the_connection() {
        let mut server = TestServer::spawn(ServerConfig::default()).await;
        let (handler, mut events) = recording_handler();
        let mut session = Session::open_with_handler(server.session_config(), handler)
            .await
            .unwrap();

        for _ in 0..3 {
            session.send_batch("Ann", "Lee").await.unwrap();
        }
        assert_eq!(session.stats().resets, 1);
        assert_eq!(session.state(), SessionState::Open);

        // The 4th batch opens a fresh stream on the new connection.
        session.send_batch("Ann", "Lee").await.unwrap();
        assert_eq!(session.stats().channels_opened, 2);
        assert_eq!(session.state(), SessionState::Streaming);

        for _ in 0..2 {
            session.send_batch("Ann", "Lee").await.unwrap();
        }
        let stats = session.stats();
        assert_eq!(stats.batches, 6);
        assert_eq!(stats.resets, 2);
        assert_eq!(stats.connections_opened, 3);
        assert_eq!(stats.channels_opened, 2);

        let records = server.next_records(60).await;
        let batch: Vec<Record> = Record::batch("Ann", "Lee").collect();
        for chunk in records.chunks(10) {
            assert_eq!(chunk, batch.as_slice());
        }
        eventually(|| server.accepted() == 3).await;
        assert_eq!(server.service.state().streams_opened(), 2);

        session.shutdown().await;

        // Both streams were drained by the resets, so every event is in.
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        for stream_id in [1, 2] {
            let kinds: Vec<_> = seen
                .iter()
                .filter(|(id, _)| *id == stream_id)
                .map(|(_, kind)| *kind)
                .collect();
            assert_eq!(kinds, ["ack", "completed"], "events of stream {stream_id}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_is_idempotent_and_terminal() {
        let server = TestServer::spawn(ServerConfig::default()).await;
        let mut session = Session::open(server.session_config()).await.unwrap();
        session.send_batch("Ann", "Lee").await.unwrap();

        session.shutdown().await;
        session.shutdown().await;

        assert_eq!(session.state(), SessionState::ShutDown);
        assert!(matches!(
            session.send_batch("Ann", "Lee").await,
            Err(Error::ServiceShutdown)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn acknowledges_before_any_record_and_enforces_stream_limit() {
        let mut server = TestServer::spawn(ServerConfig {
            max_streams: 1,
            ..ServerConfig::default()
        })
        .await;
        let mut client = HelloWorldStreamingServiceClient::connect(server.addr.clone())
            .await
            .unwrap();

        // Records go out with the request; the ack still comes first.
        let people: Vec<Person> = Record::batch("Ann", "Lee").map(Person::from).collect();
        let outbound = futures::stream::iter(people).chain(futures::stream::pending());
        let mut acks = client.say_hello(outbound).await.unwrap().into_inner();
        assert_eq!(acks.message().await.unwrap(), Some(Ack {}));

        let expected: Vec<Record> = Record::batch("Ann", "Lee").collect();
        assert_eq!(server.next_records(10).await, expected);

        // Exactly one acknowledgement per stream.
        assert!(
            timeout(Duration::from_millis(200), acks.message())
                .await
                .is_err()
        );

        let err = client
            .say_hello(futures::stream::pending::<Person>())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stream_ended_by_server_is_replaced_without_an_error() {
        let mut server = TestServer::spawn(ServerConfig {
            shutdown_timeout: Duration::from_millis(100),
            ..ServerConfig::default()
        })
        .await;
        let (handler, mut events) = recording_handler();
        let mut session = Session::open_with_handler(server.session_config(), handler)
            .await
            .unwrap();

        session.send_batch("Ann", "Lee").await.unwrap();
        assert_eq!(server.next_records(10).await.len(), 10);

        // Shutting the service down ends stream 1 from the server side.
        server.service.shutdown().await.unwrap();
        stream_end(&mut events, 1).await;

        session.send_batch("Ann", "Lee").await.unwrap();
        let stats = session.stats();
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.channels_opened, 2);
        assert_eq!(stats.connections_opened, 1);

        // The replacement stream is refused and reported to the handler only.
        assert_eq!(stream_end(&mut events, 2).await, "failed");
        assert_eq!(server.service.state().streams_opened(), 1);
        assert_eq!(server.service.state().records_received(), 10);

        // The swallowed batch still counts towards the reset.
        session.send_batch("Ann", "Lee").await.unwrap();
        let stats = session.stats();
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.resets, 1);
        assert_eq!(stats.connections_opened, 2);
        assert_eq!(session.state(), SessionState::Open);

        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn closing_a_connection_twice_is_harmless() {
        let server = TestServer::spawn(ServerConfig::default()).await;
        let config = server.session_config();

        let mut idle = Connection::open(&config).await.unwrap();
        assert!(idle.is_open());
        idle.close(config.drain_timeout).await;
        idle.close(config.drain_timeout).await;
        assert!(!idle.is_open());

        let handler = log_events();
        let mut streaming = Connection::open(&config).await.unwrap();
        let (_, opened) = streaming.stream(1, &handler).unwrap();
        assert!(opened);
        assert!(streaming.has_stream());

        streaming.close(config.drain_timeout).await;
        streaming.close(config.drain_timeout).await;
        assert!(!streaming.is_open());
        assert!(!streaming.has_stream());
        assert!(matches!(
            streaming.stream(2, &handler),
            Err(Error::Transport { .. })
        ));

        eventually(|| server.service.state().streams_inflight() == 0).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_cancels_open_streams_and_refuses_new_ones() {
        let server = TestServer::spawn(ServerConfig {
            shutdown_timeout: Duration::from_millis(100),
            ..ServerConfig::default()
        })
        .await;
        let mut client = HelloWorldStreamingServiceClient::connect(server.addr.clone())
            .await
            .unwrap();

        let mut open = client
            .say_hello(futures::stream::pending::<Person>())
            .await
            .unwrap()
            .into_inner();
        assert_eq!(open.message().await.unwrap(), Some(Ack {}));

        server.service.shutdown().await.unwrap();

        // The cancelled stream ends without another acknowledgement.
        let next = timeout(WAIT, open.message()).await.unwrap();
        assert!(!matches!(next, Ok(Some(_))));
        eventually(|| server.service.state().streams_inflight() == 0).await;

        let err = client
            .say_hello(futures::stream::pending::<Person>())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
    }
}
