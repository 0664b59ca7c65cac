//! Worker/master protocol for the encmesh cluster.
//!
//! This crate provides:
//! - Typed protocol messages
//! - A line-delimited JSON wire codec
//! - One-message-per-connection exchanges with the master (`MasterLink`)
//! - The worker's inbound listener (`ClusterServer`)

pub mod client;
pub mod error;
pub mod message;
pub mod server;
pub mod wire;

pub use client::{MasterLink, Registration, StatusAck, DEFAULT_CONTACT_TIMEOUT};
pub use error::{ClusterError, ClusterResult};
pub use message::{CrashReport, Message};
pub use server::{ClusterServer, MessageHandler};
