//! CLI command implementations

pub mod error;
pub mod fetch;
pub mod load;
pub mod servers;

pub use error::CliError;
pub use fetch::{BackendArgs, Cli, Commands, FetchArgs, OutputFormat};
pub use load::LoadArgs;
pub use servers::ServersArgs;
