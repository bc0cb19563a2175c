pub mod error;
pub mod types;

pub use error::{Error, Result};

/// Generated protobuf messages and tonic client/server bindings for the
/// `helloworld` package.
pub mod proto {
    tonic::include_proto!("helloworld");

    /// Encoded file descriptor set, registered with gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("helloworld_descriptor");
}
