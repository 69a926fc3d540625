//! Bulk Transfer Module
//!
//! Reliable point-to-point file pulls over TCP, separate from the unreliable
//! control datagrams.
//!
//! ## Protocol
//! 1. The requester connects and sends the file name as a single line.
//! 2. The server resolves the name to a local path (replica copy or staged put
//!    source) and streams the raw bytes in fixed-size chunks.
//! 3. The server closes the connection. End-of-stream is the only end-of-file
//!    signal; there is no length header.
//!
//! Each accepted connection runs on its own task. There is no cap on
//! concurrent connections.

pub mod client;
pub mod server;

pub use client::pull_file;
pub(crate) use client::partial_path;
pub use server::TransferServer;

/// Size of each chunk written to the socket by the server.
pub const CHUNK_SIZE: usize = 8192;
