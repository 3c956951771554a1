//! Container runtime collaborator for resen.
//!
//! The bucket core never talks to a container engine directly. It goes
//! through [`ContainerRuntime`](backend::ContainerRuntime), implemented here
//! by [`DockerCli`](backend::docker::DockerCli) for real hosts and by
//! [`MemoryRuntime`](backend::memory::MemoryRuntime) for tests.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod exec;
pub mod process;
pub mod progress;
