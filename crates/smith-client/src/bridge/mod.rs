//! IPC bridge between the probe and the host agent.
//!
//! # Architecture
//!
//! - **protocol**: Message types (`Operate`, `Message`, policy payloads)
//! - **codec**: length-prefixed JSON framing codec for AsyncRead/AsyncWrite
//! - **transport**: agent socket connection and framed read/write halves

pub mod codec;
pub mod protocol;
pub mod transport;
