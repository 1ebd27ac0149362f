//! Command implementations for the CLI.

mod config;
mod info;
mod stream;

pub use config::cmd_config;
pub use info::cmd_info;
pub use stream::cmd_stream;
