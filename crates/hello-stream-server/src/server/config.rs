use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `hello-stream-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "hello-stream-server",
    version,
    about = "A gRPC service that acknowledges and logs streams of people"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:6565" or "/tmp/hello-stream.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:6565"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Maximum number of `SayHello` streams served at the same time.
    ///
    /// Streams beyond the limit are refused with `RESOURCE_EXHAUSTED`.
    ///
    /// Environment variable: `MAX_STREAMS`
    #[arg(long, env = "MAX_STREAMS", default_value_t = 1024)]
    pub max_streams: usize,

    /// Seconds to wait for in-flight streams to finish on shutdown before
    /// they are cancelled.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub max_streams: usize,
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:6565".to_string(),
            uds: false,
            max_streams: 1024,
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_streams == 0 {
            bail!("MAX_STREAMS must be greater than 0");
        }

        if args.uds && cfg!(not(unix)) {
            bail!("Unix domain sockets are not supported on this platform");
        }

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            max_streams: args.max_streams,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}
