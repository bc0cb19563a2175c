//! Per-stream work that runs after a `SayHello` call has been accepted.

pub mod receiver;
