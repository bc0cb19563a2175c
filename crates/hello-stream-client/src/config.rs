use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use hello_stream_client::SessionConfig;

/// Runtime configuration for the `hello-stream-client` binary.
///
/// Every value can come from a CLI flag or an environment variable (a `.env`
/// file is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "hello-stream-client",
    version,
    about = "Streams batches of people to a hello-stream server on HTTP request"
)]
pub struct CliArgs {
    /// gRPC endpoint of the streaming server.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("http://localhost:6565"))]
    pub server_addr: String,

    /// Address the HTTP trigger listens on.
    ///
    /// Environment variable: `LISTEN_ADDR`
    #[arg(long, env = "LISTEN_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub listen_addr: String,

    /// Milliseconds allowed for establishing a connection.
    ///
    /// Environment variable: `CONNECT_TIMEOUT_MS`
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value_t = 5_000)]
    pub connect_timeout_ms: u64,

    /// Milliseconds to wait for a batch to reach the transport, and for the
    /// server to finish the stream when the connection is reset. `0` tears the
    /// connection down without waiting.
    ///
    /// Environment variable: `DRAIN_TIMEOUT_MS`
    #[arg(long, env = "DRAIN_TIMEOUT_MS", default_value_t = 1_000)]
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub session: SessionConfig,
    pub listen_addr: String,
}

impl TryFrom<CliArgs> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.connect_timeout_ms == 0 {
            bail!("CONNECT_TIMEOUT_MS must be greater than 0");
        }

        if !args.server_addr.starts_with("http://") && !args.server_addr.starts_with("https://") {
            bail!(
                "SERVER_ADDR ({}) must start with http:// or https://",
                args.server_addr
            );
        }

        Ok(Self {
            session: SessionConfig {
                server_addr: args.server_addr,
                connect_timeout: Duration::from_millis(args.connect_timeout_ms),
                drain_timeout: Duration::from_millis(args.drain_timeout_ms),
            },
            listen_addr: args.listen_addr,
        })
    }
}
