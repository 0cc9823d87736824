//! The agent core: the run loop, the worker lifecycle, and the heartbeat.

mod error;
mod heartbeat;
mod run_loop;
mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::AgentError;
pub use heartbeat::{HEARTBEAT_INTERVAL, HeartbeatTicker};
pub use run_loop::{AGENT_VERSION, Agent, AgentStatus, PLATFORM};
