//! Local container runtime access.

mod driver;

pub use driver::{ContainerDriver, ContainerSpec, ContainerState, DockerDriver, DriverError};
