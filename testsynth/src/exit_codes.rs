//! Stable exit codes for testsynth CLI commands.

/// Command succeeded; for `generate`, the coverage target was reached.
pub const OK: i32 = 0;
/// Invalid arguments, config, unreadable input or an internal failure.
pub const INVALID: i32 = 1;
/// `generate` finished without reaching the coverage target.
pub const TARGET_NOT_REACHED: i32 = 2;
/// The source uses constructs outside the supported grammar.
pub const GRAMMAR_VIOLATION: i32 = 3;
