//! Deterministic, pure logic shared by the step runner.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod feedback_window;
pub mod history;
pub mod machine;
pub mod naming;
pub mod plan;
pub mod types;
pub mod workdir;
