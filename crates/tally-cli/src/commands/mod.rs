//! CLI subcommand implementations.

pub mod branch;
pub mod session;
pub mod status;
pub mod timer;
pub mod util;
pub mod watch;
