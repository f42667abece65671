//! Benchmark controller: drives a forwarder and two traffic generators
//! through their control-plane APIs and records per-trial throughput.

pub mod budget;
pub mod channel;
pub mod client;
pub mod error;
pub mod fetch;
pub mod mgmt;
pub mod session;
pub mod trial;

pub use channel::{Connector, GqlConnector, RpcChannel, RpcRequest};
pub use client::{ControlClient, RestartPolicy, RoleControl};
pub use error::{Error, Result, RpcError};
pub use session::{Session, SessionSettings, SessionState, SessionStatus};
