//! Session API and command shell.
//!
//! [`Session`] is the user-facing handle: it owns a database driver and the
//! nested transaction coordinator. [`Shell`] drives a Git-backed session
//! from text commands.

mod api;
mod shell;

pub use api::{Session, SessionConfig, SessionError, SessionResult};
pub use shell::{split_commands, Command, ParseError, Shell, ShellConfig, ShellError, ShellResult};
