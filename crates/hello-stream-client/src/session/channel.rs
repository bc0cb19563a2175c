//! One open `SayHello` stream.
//!
//! A [`StreamChannel`] pairs a bounded outbound record buffer with a task that
//! drives the RPC and forwards inbound acknowledgements to the session's
//! [`StreamEventHandler`]. Records are pulled from the buffer by the tonic
//! encoder; every pull bumps a counter that [`StreamChannel::flush`] waits on.
//!
//! The server may end the RPC at any time. That is reported as
//! [`Push::Ended`] or [`Flush::Ended`], never as an error; the event itself
//! goes to the handler.

use super::event::{StreamEvent, StreamEventHandler};
use core::time::Duration;
use futures::StreamExt;
use hello_stream_core::{
    Error, Result,
    proto::{Person, hello_world_streaming_service_client::HelloWorldStreamingServiceClient},
    types::Record,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::timeout,
};
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;

/// Outcome of [`StreamChannel::push`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Push {
    Queued,
    /// The RPC has ended; the record was not queued.
    Ended,
}

/// Outcome of [`StreamChannel::flush`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flush {
    /// Every pushed record has been handed to the transport.
    Drained,
    /// The bound expired with `pending` records still buffered.
    TimedOut { pending: u64 },
    /// The RPC ended with `pending` records never handed to the transport.
    Ended { pending: u64 },
}

/// Outcome of [`StreamChannel::close`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Close {
    /// The server finished the stream after reading everything we sent.
    Completed,
    /// The grace period expired; the RPC was cancelled.
    Aborted,
}

pub struct StreamChannel {
    id: u64,
    tx: Option<mpsc::Sender<Person>>,
    pushed: u64,
    drained: watch::Receiver<u64>,
    ended: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl StreamChannel {
    /// Starts the `SayHello` RPC on `client` and returns the sending half.
    ///
    /// The RPC runs on its own task, so opening never waits for the server.
    /// `buffer` bounds how many records may sit between [`push`] and the
    /// transport before `push` waits.
    ///
    /// [`push`]: StreamChannel::push
    pub(crate) fn open(
        id: u64,
        mut client: HelloWorldStreamingServiceClient<Channel>,
        buffer: usize,
        handler: StreamEventHandler,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        let (drained_tx, drained) = watch::channel(0_u64);
        let (ended_tx, ended) = watch::channel(false);

        let outbound = ReceiverStream::new(rx).inspect(move |_| {
            drained_tx.send_modify(|n| *n += 1);
        });

        // Each terminal event marks the stream ended before the handler hears
        // about it.
        let task = tokio::spawn(async move {
            let mut inbound = match client.say_hello(outbound).await {
                Ok(response) => response.into_inner(),
                Err(status) => {
                    ended_tx.send_replace(true);
                    handler(id, StreamEvent::Failed(status));
                    return;
                }
            };

            loop {
                match inbound.message().await {
                    Ok(Some(ack)) => handler(id, StreamEvent::Acknowledged(ack.into())),
                    Ok(None) => {
                        ended_tx.send_replace(true);
                        handler(id, StreamEvent::Completed);
                        break;
                    }
                    Err(status) => {
                        ended_tx.send_replace(true);
                        handler(id, StreamEvent::Failed(status));
                        break;
                    }
                }
            }
        });

        Self {
            id,
            tx: Some(tx),
            pushed: 0,
            drained,
            ended,
            task,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the RPC has ended, by the server or by a transport failure.
    pub fn is_ended(&self) -> bool {
        *self.ended.borrow() || self.task.is_finished()
    }

    /// Queues `record` behind everything pushed before it.
    ///
    /// Does not wait for the server. Waits only if the buffer is full.
    /// Returns [`Push::Ended`] once the RPC has ended.
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] if the channel was already half-closed.
    pub async fn push(&mut self, record: Record) -> Result<Push> {
        if self.is_ended() {
            return Ok(Push::Ended);
        }
        let tx = self.tx.as_ref().ok_or_else(|| self.closed())?;
        if tx.send(record.into()).await.is_err() {
            return Ok(Push::Ended);
        }
        self.pushed += 1;
        Ok(Push::Queued)
    }

    /// Waits until every pushed record has been handed to the transport, the
    /// RPC ends, or `bound` expires.
    ///
    /// This says nothing about delivery; records handed over can still be lost
    /// if the connection drops.
    pub async fn flush(&mut self, bound: Duration) -> Flush {
        let target = self.pushed;
        let drained = &mut self.drained;
        let ended = &mut self.ended;
        let waited = timeout(bound, async {
            tokio::select! {
                biased;
                res = drained.wait_for(|n| *n >= target) => res.is_ok(),
                _ = ended.wait_for(|e| *e) => false,
            }
        })
        .await;

        let pending = target.saturating_sub(*self.drained.borrow());
        match waited {
            Ok(true) => Flush::Drained,
            Ok(false) if pending == 0 => Flush::Drained,
            Ok(false) => Flush::Ended { pending },
            Err(_) if self.is_ended() => Flush::Ended { pending },
            Err(_) => Flush::TimedOut { pending },
        }
    }

    /// Half-closes the outbound stream and waits up to `grace` for the server
    /// to finish its side. Cancels the RPC if it does not.
    pub async fn close(mut self, grace: Duration) -> Close {
        self.tx = None;
        match timeout(grace, &mut self.task).await {
            Ok(_) => Close::Completed,
            Err(_) => {
                self.task.abort();
                Close::Aborted
            }
        }
    }

    fn closed(&self) -> Error {
        Error::Transport {
            context: format!("stream {} is closed", self.id),
        }
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}
