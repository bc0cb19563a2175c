#![doc = include_str!("../README.md")]

pub mod session;
pub mod trigger;

pub use hello_stream_core::{Error, Result};
pub use session::{Session, SessionConfig, SessionState, SessionStats, StreamEvent};
