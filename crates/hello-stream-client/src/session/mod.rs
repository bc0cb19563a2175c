//! # Streaming Session
//!
//! A [`Session`] owns the current [`Connection`] and the [`StreamChannel`]
//! bound to it, and decides when to rebuild both.
//!
//! ## Lifecycle
//!
//! ```text
//! Closed ──open──▶ Open ──send_batch──▶ Streaming
//!    ▲                                      │
//!    └────── every 3rd batch (reset) ◀──────┘
//! ```
//!
//! - The stream is opened lazily by the first `send_batch` on a connection and
//!   reused by the following batches. A stream the server ends is replaced on
//!   the same connection.
//! - After every [`RESET_EVERY`] batches the connection is closed and
//!   a new one opened; the next batch opens a new stream on it.
//! - [`Session::shutdown`] is terminal.
//!
//! `send_batch` takes `&mut self`; callers sharing a session across tasks wrap
//! it in a mutex (see [`crate::trigger`]).

pub mod channel;
mod config;
pub mod connection;
mod event;

pub use channel::{Close, Flush, Push, StreamChannel};
pub use config::SessionConfig;
pub use connection::Connection;
pub use event::{StreamEvent, StreamEventHandler, log_events};

use hello_stream_core::{
    Error, Result,
    types::{RESET_EVERY, Record},
};

/// Streams a single batch may use before its remaining records are dropped.
const STREAM_ATTEMPTS: u32 = 2;

/// Observable state of a [`Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No connection. Transient during a reset, or left behind by a failed
    /// reconnect.
    Closed,
    /// Connected, no stream bound yet.
    Open,
    /// Connected with a stream bound.
    Streaming,
    /// Shut down for good.
    ShutDown,
}

/// Counters describing what a [`Session`] has done so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub connections_opened: u64,
    pub channels_opened: u64,
    pub resets: u64,
    /// Batches sent; drives the reset cadence.
    pub batches: u64,
    pub records_pushed: u64,
}

pub struct Session {
    config: SessionConfig,
    connection: Option<Connection>,
    handler: StreamEventHandler,
    stats: SessionStats,
    shut_down: bool,
}

impl Session {
    /// Connects to the configured server. Acknowledgements and stream
    /// failures are logged.
    ///
    /// # Errors
    ///
    /// [`Error::Connection`] if the server cannot be reached.
    pub async fn open(config: SessionConfig) -> Result<Self> {
        Self::open_with_handler(config, log_events()).await
    }

    /// Like [`Session::open`], delivering stream events to `handler` instead.
    pub async fn open_with_handler(
        config: SessionConfig,
        handler: StreamEventHandler,
    ) -> Result<Self> {
        let mut session = Self {
            config,
            connection: None,
            handler,
            stats: SessionStats::default(),
            shut_down: false,
        };
        session.connect().await?;
        Ok(session)
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn state(&self) -> SessionState {
        if self.shut_down {
            return SessionState::ShutDown;
        }
        match &self.connection {
            Some(connection) if connection.has_stream() => SessionState::Streaming,
            Some(_) => SessionState::Open,
            None => SessionState::Closed,
        }
    }

    /// Pushes one batch of records for `first_name` / `last_name`.
    ///
    /// Opens a stream if none is bound, pushes the ten records of
    /// [`Record::batch`] in order, then waits (bounded by the drain timeout)
    /// until they have been handed to the transport. Every
    /// [`RESET_EVERY`]-th batch closes the connection and opens a new one
    /// before returning.
    ///
    /// A stream the server has ended is not an error. It is dropped and the
    /// rest of the batch goes to a new stream on the same connection. If that
    /// stream ends too, the remaining records are dropped with a warning. The
    /// batch counts towards the reset cadence either way.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if a connection cannot be (re)established.
    /// - [`Error::Transport`] if the connection was released underneath the
    ///   session.
    /// - [`Error::ServiceShutdown`] after [`Session::shutdown`].
    #[tracing::instrument(skip(self))]
    pub async fn send_batch(&mut self, first_name: &str, last_name: &str) -> Result<()> {
        if self.shut_down {
            return Err(Error::ServiceShutdown);
        }
        if self.connection.is_none() {
            self.connect().await?;
        }
        let Some(connection) = self.connection.as_mut() else {
            return Err(Error::ServiceShutdown);
        };

        let batch: Vec<Record> = Record::batch(first_name, last_name).collect();
        let mut next = 0;
        for attempt in 1..=STREAM_ATTEMPTS {
            let (channel, opened) =
                connection.stream(self.stats.channels_opened + 1, &self.handler)?;
            if opened {
                self.stats.channels_opened += 1;
            }

            let mut ended = false;
            while let Some(record) = batch.get(next) {
                tracing::debug!("Sending {next}");
                match channel.push(record.clone()).await? {
                    Push::Queued => {
                        next += 1;
                        self.stats.records_pushed += 1;
                    }
                    Push::Ended => {
                        ended = true;
                        break;
                    }
                }
            }

            if !ended {
                match channel.flush(self.config.drain_timeout).await {
                    Flush::Drained => {}
                    Flush::TimedOut { pending } => {
                        tracing::warn!(
                            "{pending} records still buffered after {:?}",
                            self.config.drain_timeout
                        );
                    }
                    Flush::Ended { pending } => {
                        // Whatever the transport never pulled went down with
                        // the stream.
                        next = batch.len().saturating_sub(pending as usize);
                        ended = next < batch.len();
                    }
                }
            }
            if !ended {
                break;
            }

            let id = channel.id();
            connection.discard_stream();
            if attempt == STREAM_ATTEMPTS {
                tracing::warn!(
                    "Stream {id} ended by the server; dropping {} records",
                    batch.len() - next
                );
            } else {
                tracing::debug!("Stream {id} ended by the server; opening another");
            }
        }

        tracing::info!("Finished sending");
        self.stats.batches += 1;

        if self.stats.batches % RESET_EVERY == 0 {
            tracing::info!("Closing channel");
            self.reset().await?;
        }

        Ok(())
    }

    /// Releases the connection. Further batches fail with
    /// [`Error::ServiceShutdown`]. Calling it again is a no-op.
    pub async fn shutdown(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close(self.config.drain_timeout).await;
        }
        self.shut_down = true;
    }

    async fn reset(&mut self) -> Result<()> {
        if let Some(mut connection) = self.connection.take() {
            connection.close(self.config.drain_timeout).await;
        }
        self.stats.resets += 1;
        self.connect().await
    }

    async fn connect(&mut self) -> Result<()> {
        let connection = Connection::open(&self.config).await?;
        self.connection = Some(connection);
        self.stats.connections_opened += 1;
        Ok(())
    }
}
