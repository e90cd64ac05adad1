//! Docker backend for the sandbox runtime.
//!
//! Drives the `docker` CLI and reads cgroup v2 files directly for
//! resource sampling.

mod args;
mod cgroup;
mod command;
mod config;
mod engine;
mod prerequisites;

pub use args::create_args;
pub use cgroup::{DEFAULT_CGROUP_PARENT, cgroup_dirs};
pub use config::DockerConfig;
pub use engine::DockerEngine;
pub use prerequisites::{cgroup_v2_available, check_prerequisites};
