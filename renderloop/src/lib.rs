//! Container-isolated execution loop for AI-generated animation scripts.
//!
//! Scripts are staged into a container, rendered, and automatically
//! repaired on failure — first by deterministic dependency installs, then
//! by an AI debugger — until success or the attempt budget runs out. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (data model, scene scanning,
//!   module extraction). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (process execution, the container
//!   CLI, configuration, staging). Isolated behind trait seams to enable
//!   scripted doubles in tests.
//! - **[`provider`]**: The text-generation boundary; backends are selected
//!   at registry construction and invisible downstream.
//!
//! Orchestration modules ([`attempt`], [`run`], [`debug`], [`deps`],
//! [`generate`], [`queue`]) coordinate core logic with I/O.

pub mod attempt;
pub mod core;
pub mod debug;
pub mod deps;
pub mod exit_codes;
pub mod generate;
pub mod io;
pub mod logging;
pub mod provider;
pub mod queue;
pub mod run;
pub mod sink;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
