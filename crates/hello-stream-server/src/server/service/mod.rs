//! gRPC service implementation.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`HelloService`).
//! - [`state`] - stream accounting shared by the service and its receive
//!   tasks.

pub mod handler;
pub mod state;
