pub(crate) mod command;
pub(crate) mod connect;
pub(crate) mod control;
pub(crate) mod inspect;
pub(crate) mod report;
pub(crate) mod ui;
pub(crate) mod watch;

pub use self::command::{Args, Command, FakeArgs, LogLevel, OutputFormat};
pub use self::control::{CommandArgs, LedArgs, LedState};
pub use self::watch::WatchArgs;
