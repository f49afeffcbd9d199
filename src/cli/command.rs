use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::cli::control::{CommandArgs, LedArgs};
use crate::cli::watch::WatchArgs;
use crate::error::FixtureError;
use crate::hw::{
    BtleplugConfig, DeviceIdentity, FakeBackendConfig, HexPayload, NotificationPayloads,
};
use crate::profile::ProfileDescriptor;

/// Address used for the fake peripheral when `--address` is omitted.
pub(crate) const FAKE_DEVICE_ADDRESS: &str = "FA:KE:00:00:00:01";

/// Command-line options for the Blinky BLE tool.
#[derive(Debug, Parser)]
#[command(name = "blinky", about = "Drive a BLE LED/button peripheral.")]
pub struct Args {
    /// Peripheral address (MAC address, or the platform identifier on macOS).
    /// Required unless `--fake` is given.
    #[arg(long, global = true)]
    address: Option<String>,
    /// Display name for the peripheral.
    #[arg(long, global = true)]
    name: Option<String>,
    /// JSON profile file with custom UUIDs and command payloads.
    #[arg(long, global = true)]
    profile: Option<PathBuf>,
    /// Log verbosity; overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to pretty on a terminal and JSON otherwise.
    #[arg(long = "format", global = true, value_enum)]
    output_format: Option<OutputFormat>,
    /// How long to scan for the peripheral before giving up (e.g. `10s`).
    #[arg(long, global = true, value_parser = parse_duration)]
    scan_timeout: Option<Duration>,
    /// Uses the fake BLE backend instead of a real adapter.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake telemetry read payload as hexadecimal bytes.
    #[arg(long, global = true, requires = "fake")]
    fake_read: Option<HexPayload>,
    /// Fake telemetry notifications as comma-separated hexadecimal payloads.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationPayloads>,
    /// Makes the fake control characteristic read-only so negotiation fails.
    #[arg(long, global = true, requires = "fake")]
    fake_unsupported: bool,
    /// Artificial fake connect delay (e.g. `250ms`, `2s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_connect_delay: Option<Duration>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use blinky::{Args, Command};
    ///
    /// let args = Args::new(Command::Inspect).with_address("C8:2B:96:A1:00:10");
    /// assert_eq!("C8:2B:96:A1:00:10", args.device().address());
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            address: None,
            name: None,
            profile: None,
            log_level: None,
            output_format: None,
            scan_timeout: None,
            fake: false,
            fake_read: None,
            fake_notifications: None,
            fake_unsupported: false,
            fake_connect_delay: None,
            command,
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Enables fake backend mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            initial_read,
            notifications,
            unsupported,
            connect_delay,
        } = fake;

        self.fake = true;
        self.fake_read = initial_read;
        self.fake_notifications = notifications;
        self.fake_unsupported = unsupported;
        self.fake_connect_delay = Some(connect_delay);
        self
    }

    /// Checks that a real-backend run names its peripheral.
    ///
    /// Global flags may follow the subcommand, so this runs after parsing
    /// rather than as a clap constraint.
    ///
    /// # Errors
    ///
    /// Returns a usage error when neither `--address` nor `--fake` is given.
    pub fn validate(&self) -> Result<(), clap::Error> {
        if self.fake || self.address.is_some() {
            return Ok(());
        }
        Err(Self::command().error(
            ErrorKind::MissingRequiredArgument,
            "--address is required unless --fake is given",
        ))
    }

    /// Returns the optional telemetry log-level override.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Returns the explicitly requested output format.
    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output_format
    }

    /// Returns the explicit profile file path.
    #[must_use]
    pub fn profile_path(&self) -> Option<&Path> {
        self.profile.as_deref()
    }

    /// Returns the peripheral identity the command targets.
    #[must_use]
    pub fn device(&self) -> DeviceIdentity {
        let address = self
            .address
            .clone()
            .unwrap_or_else(|| FAKE_DEVICE_ADDRESS.to_string());
        let device = DeviceIdentity::new(address);
        match &self.name {
            Some(name) => device.with_name(name.clone()),
            None => device,
        }
    }

    /// Returns the real backend settings.
    #[must_use]
    pub fn btleplug_config(&self) -> BtleplugConfig {
        match self.scan_timeout {
            Some(scan_timeout) => BtleplugConfig::builder().scan_timeout(scan_timeout).build(),
            None => BtleplugConfig::default(),
        }
    }

    /// Splits parsed CLI arguments into command and optional fake-backend settings.
    #[must_use]
    pub fn into_command_and_fake_args(self) -> (Command, Option<FakeArgs>) {
        let Args {
            fake,
            fake_read,
            fake_notifications,
            fake_unsupported,
            fake_connect_delay,
            command,
            ..
        } = self;

        let fake_args = fake.then(|| FakeArgs {
            initial_read: fake_read,
            notifications: fake_notifications,
            unsupported: fake_unsupported,
            connect_delay: fake_connect_delay.unwrap_or(Duration::ZERO),
        });

        (command, fake_args)
    }
}

/// Fake backend arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    initial_read: Option<HexPayload>,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    notifications: Option<NotificationPayloads>,
    #[builder(default)]
    unsupported: bool,
    #[builder(default)]
    connect_delay: Duration,
}

impl FakeArgs {
    pub(crate) fn into_backend_config(self, profile: ProfileDescriptor) -> FakeBackendConfig {
        let Self {
            initial_read,
            notifications,
            unsupported,
            connect_delay,
        } = self;

        FakeBackendConfig::builder()
            .profile(profile)
            .maybe_initial_read(initial_read)
            .maybe_notifications(notifications)
            .unsupported(unsupported)
            .connect_delay(connect_delay)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect, report lifecycle transitions and the capability verdict, then disconnect.
    Inspect,
    /// Connect and print connection, LED and button events.
    Watch(WatchArgs),
    /// Connect, switch the LED, then disconnect.
    Led(LedArgs),
    /// Connect, send one numbered command, then disconnect.
    Command(CommandArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Inspect => "inspect",
            Self::Watch(_) => "watch",
            Self::Led(_) => "led",
            Self::Command(_) => "command",
        }
    }
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Output rendering accepted by `--format`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Coloured tables and event lines.
    Pretty,
    /// One JSON document per line.
    Json,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}
