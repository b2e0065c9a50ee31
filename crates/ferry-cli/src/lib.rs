//! # Ferry CLI
//!
//! Client side of Ferry: splits a local file into numbered chunks, streams
//! them to a Ferry server and verifies the upload against the server's
//! BLAKE3 checksum.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod progress;

/// Generated protobuf types and client stubs
#[allow(missing_docs)]
pub mod proto {
    tonic::include_proto!("ferry.v1");
}

pub use client::{ClientError, FerryClient, TransferReport, Verification};
pub use config::{ClientConfig, ConfigError};
pub use progress::{TransferProgress, format_bytes};
