//! I/O for testsynth: oracle backends, the pytest sandbox and configuration.

pub mod config;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod retry;
pub mod sandbox;
