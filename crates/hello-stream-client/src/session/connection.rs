use super::{
    SessionConfig,
    channel::{Close, StreamChannel},
    event::StreamEventHandler,
};
use hello_stream_core::{
    Error, Result,
    proto::hello_world_streaming_service_client::HelloWorldStreamingServiceClient,
    types::BATCH_SIZE,
};
use tonic::transport::{Channel, Endpoint};

/// Transport link to the server, owning zero or one [`StreamChannel`].
///
/// The stream lives inside the connection so the two can only be replaced
/// together: closing the connection always discards its stream.
pub struct Connection {
    addr: String,
    client: Option<HelloWorldStreamingServiceClient<Channel>>,
    stream: Option<StreamChannel>,
}

impl Connection {
    /// Connects eagerly so an unreachable server surfaces here as
    /// [`Error::Connection`] rather than on the first push.
    pub async fn open(config: &SessionConfig) -> Result<Self> {
        let addr = config.server_addr.clone();
        let endpoint = Endpoint::from_shared(addr.clone())
            .map_err(|e| Error::connection(&addr, e))?
            .connect_timeout(config.connect_timeout);
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| Error::connection(&addr, e))?;

        tracing::info!("Opened connection to {addr}");
        Ok(Self {
            addr,
            client: Some(HelloWorldStreamingServiceClient::new(channel)),
            stream: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.client.is_some()
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Returns the bound stream, opening one with `id` first if none is bound.
    /// The flag is `true` when the stream was opened by this call.
    pub fn stream(
        &mut self,
        id: u64,
        handler: &StreamEventHandler,
    ) -> Result<(&mut StreamChannel, bool)> {
        let opened = if self.stream.is_none() {
            let client = self.client.clone().ok_or_else(|| Error::Transport {
                context: format!("connection to {} is closed", self.addr),
            })?;
            tracing::debug!("Opening stream {id} on {}", self.addr);
            self.stream = Some(StreamChannel::open(
                id,
                client,
                BATCH_SIZE,
                handler.clone(),
            ));
            true
        } else {
            false
        };

        match self.stream.as_mut() {
            Some(stream) => Ok((stream, opened)),
            None => Err(Error::Transport {
                context: format!("no stream bound to {}", self.addr),
            }),
        }
    }

    /// Drops the bound stream without touching the connection.
    pub fn discard_stream(&mut self) {
        self.stream = None;
    }

    /// Half-closes the bound stream, waits up to `grace` for the server to
    /// finish it, then releases the transport. Safe to call more than once.
    pub async fn close(&mut self, grace: core::time::Duration) {
        if let Some(stream) = self.stream.take() {
            let id = stream.id();
            if stream.close(grace).await == Close::Aborted {
                tracing::warn!("Stream {id} did not drain within {grace:?}; records in flight may be lost");
            }
        }
        if self.client.take().is_some() {
            tracing::info!("Closed connection to {}", self.addr);
        }
    }
}
