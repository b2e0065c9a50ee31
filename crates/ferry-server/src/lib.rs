//! # Ferry Server
//!
//! gRPC front end for the Ferry transfer engine.
//!
//! - [`service::TransferService`] implements `ferry.v1.FileTransferService`
//! - [`config::ServerConfig`] is the TOML-backed server configuration
//! - [`server::FerryServer`] wires storage, service and transport together

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod server;
pub mod service;

/// Generated protobuf types and server stubs
#[allow(missing_docs)]
pub mod proto {
    tonic::include_proto!("ferry.v1");
}

pub use config::{ConfigError, ServerConfig};
pub use server::{FerryServer, ServerError};
pub use service::{ServiceOptions, TransferService};
