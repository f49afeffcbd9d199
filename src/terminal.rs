use std::io::{self, IsTerminal};

/// Terminal capabilities the CLI adapts its output to.
pub trait TerminalClient: Send + Sync {
    /// Whether stdout is attached to a terminal.
    fn stdout_is_terminal(&self) -> bool;

    /// Whether stderr is attached to a terminal.
    fn stderr_is_terminal(&self) -> bool;
}

/// Queries the process's real standard streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTerminalClient;

impl TerminalClient for SystemTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        io::stdout().is_terminal()
    }

    fn stderr_is_terminal(&self) -> bool {
        io::stderr().is_terminal()
    }
}
