pub mod executor;
pub mod version;

pub use executor::{CommandOutput, GitExecutor};
pub use version::GitVersion;
