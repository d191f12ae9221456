//! Side-effecting operations: process spawning, the container CLI,
//! configuration, and host-side staging.

pub mod config;
pub mod container;
pub mod process;
pub mod staging;
