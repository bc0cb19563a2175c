//! Stream accounting for [`HelloService`](super::handler::HelloService).
//!
//! Admission is counted with a [`StreamPermit`]: acquiring one bumps the
//! in-flight count, dropping it (when the receive task ends) releases it.
//! Shutdown flips a flag that makes further acquisitions fail, then waits for
//! the in-flight count to reach zero.

use crate::server::telemetry::{decrement_streams_inflight, increment_streams_inflight};
use core::sync::atomic::Ordering;
use hello_stream_core::Error;
use portable_atomic::{AtomicBool, AtomicU64, AtomicUsize};
use std::sync::Arc;

#[derive(Debug)]
pub struct StreamState {
    max_streams: usize,
    inflight: AtomicUsize,
    opened: AtomicU64,
    records: AtomicU64,
    shutting_down: AtomicBool,
}

impl StreamState {
    pub fn new(max_streams: usize) -> Self {
        Self {
            max_streams,
            inflight: AtomicUsize::new(0),
            opened: AtomicU64::new(0),
            records: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Admits a new stream.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] once [`StreamState::begin_shutdown`] ran.
    /// - [`Error::ServiceOverloaded`] at the concurrent stream limit.
    pub fn try_acquire(self: &Arc<Self>) -> Result<StreamPermit, Error> {
        if self.is_shutting_down() {
            return Err(Error::ServiceShutdown);
        }

        let max = self.max_streams;
        self.inflight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .map_err(|n| Error::ServiceOverloaded {
                details: format!("{n} streams in flight (limit {max})"),
            })?;

        let id = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
        increment_streams_inflight();

        Ok(StreamPermit {
            id,
            state: Arc::clone(self),
        })
    }

    pub fn record_received(&self) {
        self.records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn streams_inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub fn streams_opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    pub fn records_received(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }
}

/// Held by a stream's receive task for as long as the stream is served.
#[derive(Debug)]
pub struct StreamPermit {
    id: u64,
    state: Arc<StreamState>,
}

impl StreamPermit {
    /// Server-side stream number, starting at 1.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }
}

impl Drop for StreamPermit {
    fn drop(&mut self) {
        self.state.inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_streams_inflight();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permits_are_bounded_and_released_on_drop() {
        let state = Arc::new(StreamState::new(2));

        let first = state.try_acquire().unwrap();
        let second = state.try_acquire().unwrap();
        assert_eq!((first.id(), second.id()), (1, 2));
        assert_eq!(state.streams_inflight(), 2);
        assert!(matches!(
            state.try_acquire(),
            Err(Error::ServiceOverloaded { .. })
        ));

        drop(first);
        assert_eq!(state.streams_inflight(), 1);
        let third = state.try_acquire().unwrap();
        assert_eq!(third.id(), 3);
        assert_eq!(state.streams_opened(), 3);
    }

    #[test]
    fn shutdown_refuses_new_streams() {
        let state = Arc::new(StreamState::new(8));
        let permit = state.try_acquire().unwrap();

        state.begin_shutdown();
        assert!(matches!(state.try_acquire(), Err(Error::ServiceShutdown)));

        drop(permit);
        assert_eq!(state.streams_inflight(), 0);
    }
}
