//! Stable exit codes for steprunner CLI commands.

/// Command succeeded (for `run`/`resume`: the plan ran to completion).
pub const OK: i32 = 0;
/// Command failed due to invalid layout/config/state or other errors.
pub const INVALID: i32 = 1;
/// The run is suspended waiting on a human answer; continue with `resume`.
pub const NEEDS_INPUT: i32 = 2;
/// `kill-session` found no session with the given name.
pub const SESSION_NOT_FOUND: i32 = 3;
