//! Autonomous step runner for coding tasks.
//!
//! A user request is turned into an ordered plan, each step is executed by a
//! model driving a closed tool palette (files, a tmux terminal, the user, web
//! search), and every result is reviewed before the remaining plan is kept,
//! replaced or dropped. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (plan cursor, state machine,
//!   rolling history, `cd` tracking). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (model CLI, tmux, filesystem,
//!   persisted state). Each external system sits behind a trait so tests
//!   can substitute fakes.
//!
//! The [`agents`] drive the model for each role, [`tools`] implement the
//! palette, and [`looping`] ties everything into a resumable control loop
//! started by [`start`].

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod runtime;
pub mod start;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
