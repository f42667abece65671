/// Error types for the benchmark controller.

use std::fmt;

use fwbench_protocol::env::NodeLabel;
use thiserror::Error;

use crate::session::SessionState;

/// Failure of a single RPC.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The request never produced a well-formed response
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote engine rejected the request
    #[error("{operation} failed: {message}")]
    Application { operation: String, message: String },

    /// The response lacked a field the caller needs
    #[error("malformed {operation} response: {message}")]
    MalformedResponse { operation: String, message: String },

    /// The channel was closed before the request was issued
    #[error("channel closed")]
    Closed,
}

/// One node whose core demand exceeds its assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortfall {
    pub node: NodeLabel,
    pub need: usize,
    pub avail: usize,
}

impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "need {} on {} but only {} assigned", self.need, self.node, self.avail)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Budget check rejected the configuration; nothing was sent
    #[error("insufficient CPU cores: {}", join(.0))]
    InsufficientCores(Vec<Shortfall>),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Health check did not succeed within the attempt budget
    #[error("restart timeout after {attempts} health checks")]
    RestartTimeout { attempts: u32 },

    #[error("cancelled")]
    Cancelled,

    #[error("session is {0:?}, expected Idle")]
    InvalidState(SessionState),

    /// A failed session must be reconstructed
    #[error("session has failed and cannot be restarted")]
    Unusable,
}

fn join(shortfalls: &[Shortfall]) -> String {
    shortfalls
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;
