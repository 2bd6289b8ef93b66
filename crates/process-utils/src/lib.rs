//! Process helpers shared across the workspace.
//!
//! - [`CommandSpec`]: a printable description of one external invocation.
//! - [`LineMatcher`]: the per-invocation policy that turns raw output lines
//!   into structured progress.
//! - [`run_streaming`]: spawns a command, drains stdout and stderr
//!   concurrently, feeds every line through the matcher and keeps the full
//!   transcript for diagnostics.

mod command;
mod matcher;
mod runner;

use std::ffi::OsStr;

pub use command::CommandSpec;
pub use matcher::{LineMatcher, NoMatch};
pub use runner::{CommandOutput, ProcessError, run_capture, run_streaming};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}
