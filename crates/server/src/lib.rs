//! HTTP server for the FilePond upload protocol.
//!
//! Routes FilePond's process, patch, revert, restore and load requests to a
//! [`TransferRegistry`](pondrelay_transfer::TransferRegistry). Request
//! bodies are streamed into blocking worker threads, so disk I/O never runs
//! on the async runtime.

mod error;
mod handlers;
mod server;
mod sweeper;

pub use error::ServerError;
pub use server::{ServerConfig, UploadServer, router};
pub use sweeper::spawn_sweeper;
