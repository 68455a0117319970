pub mod access;
pub mod command;

pub use access::{Access, has_read_permission, has_write_permission, is_allowed};
pub use command::{CommandError, ParsedCommand, parse_command};

/// Environment variable sshd fills with the command the client asked for
pub const SSH_COMMAND_ENV: &str = "SSH_ORIGINAL_COMMAND";

/// Git service programs that update refs in the target repository
///
/// Every other `git-*` program reaching the listener only reads, so only
/// these require write permission. Adding a service here requires careful
/// review of what it can modify.
pub const WRITE_SUBCOMMANDS: &[&str] = &["git-receive-pack"];
