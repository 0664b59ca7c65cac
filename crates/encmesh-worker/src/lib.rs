//! Encode worker node.
//!
//! The worker registers with the master, accepts audio and video encode
//! tasks, runs them through bounded pools of ffmpeg supervisors and reports
//! its status after every change.

pub mod config;
pub mod contact;
pub mod converter;
pub mod error;
pub mod inflight;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod retry;
pub mod server;
pub mod state;
pub mod worker;

pub use config::{ConfigStore, JsonConfigStore, WorkerConfig};
pub use converter::{Converter, ConverterContext};
pub use error::{WorkerError, WorkerResult};
pub use inflight::InFlightTask;
pub use pool::{Pool, PoolConfig, PoolEvent, Pooler};
pub use state::NodeMachine;
pub use worker::{Worker, WorkerEvent};
