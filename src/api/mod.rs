//! Control-plane REST client and wire types.

mod client;
mod types;

pub use client::{AGENT_ID_HEADER, AGENT_VERSION_HEADER, ApiError, ControlPlaneClient};
pub use types::{
    CheckinInput, CheckinOutput, HeartbeatInput, TaskStatus, UpdateTaskInput,
    stringify_environment_variables,
};
