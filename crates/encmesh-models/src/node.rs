//! Worker node description and lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use crate::codec::Codec;

/// Lifecycle state of a worker node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    /// No confirmed link to the master
    #[default]
    NotConnected,
    /// Connected, no task in flight
    Free,
    /// At least one task in flight
    Working,
    /// Administratively paused, refuses new tasks
    Paused,
    /// Unrecoverable local fault
    Crashed,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::NotConnected => "NOT_CONNECTED",
            NodeState::Free => "FREE",
            NodeState::Working => "WORKING",
            NodeState::Paused => "PAUSED",
            NodeState::Crashed => "CRASHED",
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: NodeState) -> bool {
        use NodeState::*;
        match (*self, next) {
            (Crashed, _) => false,
            (_, Crashed) | (_, NotConnected) => true,
            (NotConnected, Free) => true,
            (Free, Working) | (Free, Paused) | (Free, Free) => true,
            (Working, Free) | (Working, Working) | (Working, Paused) => true,
            (Paused, Free) | (Paused, Working) => true,
            _ => false,
        }
    }

    pub fn accepts_tasks(&self) -> bool {
        matches!(self, NodeState::Free | NodeState::Working)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Crash cause reported to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    /// Encoder binary not found
    MissingFfmpeg,
    /// Required encoder library not available
    MissingCodec,
    /// Local filesystem fault
    Io,
    Internal,
}

impl Cause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cause::MissingFfmpeg => "missing_ffmpeg",
            Cause::MissingCodec => "missing_codec",
            Cause::Io => "io",
            Cause::Internal => "internal",
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A worker node as advertised to the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub address: IpAddr,
    pub port: u16,
    pub name: String,
    pub codecs: Vec<Codec>,
    pub thread_count: usize,
    pub status: NodeState,
    /// Master-assigned unique id, empty until assigned
    #[serde(default)]
    pub unid: String,
}

impl Node {
    pub fn new(address: IpAddr, port: u16, name: impl Into<String>) -> Self {
        Self {
            address,
            port,
            name: name.into(),
            codecs: Vec::new(),
            thread_count: 1,
            status: NodeState::NotConnected,
            unid: String::new(),
        }
    }

    pub fn with_codecs(mut self, codecs: Vec<Codec>) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn with_thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count.max(1);
        self
    }

    pub fn with_unid(mut self, unid: impl Into<String>) -> Self {
        self.unid = unid.into();
        self
    }

    pub fn has_unid(&self) -> bool {
        !self.unid.is_empty()
    }
}
