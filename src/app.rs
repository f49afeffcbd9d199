use std::io;
use std::sync::Arc;

use anyhow::Result;
use bon::Builder;
use tracing::instrument;

use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::hw::{
    BtleplugConfig, DeviceIdentity, Transport, TransportBackend, transport_from_backend,
};
use crate::profile::ProfileDescriptor;
use crate::session::DeviceManager;
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

const SERVICE_NAME: &str = "blinky";

/// Creates the transport backed by the host Bluetooth stack.
///
/// # Errors
///
/// Returns an error if the platform BLE manager cannot be created.
pub async fn real_transport(config: BtleplugConfig) -> Result<Arc<dyn Transport>> {
    Ok(transport_from_backend(TransportBackend::Real(config)).await?)
}

/// Creates a fake transport driven by CLI fixtures.
///
/// # Errors
///
/// Currently infallible; the signature matches [`real_transport`].
pub async fn fake_transport(
    fake_args: FakeArgs,
    profile: ProfileDescriptor,
) -> Result<Arc<dyn Transport>> {
    let config = fake_args.into_backend_config(profile);
    Ok(transport_from_backend(TransportBackend::Fake(config)).await?)
}

/// Telemetry and rendering settings for a CLI run.
#[derive(Debug, Clone, Copy, Default, Builder)]
pub struct RunOptions {
    log_level: Option<LogLevel>,
    /// Falls back to pretty output on a terminal and JSON otherwise.
    output_format: Option<OutputFormat>,
}

/// Runs a CLI command against the device with default options.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = blinky::Args::try_parse_from(["blinky", "--fake", "--format", "json", "inspect"])?;
/// let profile = blinky::ProfileDescriptor::blinky();
/// let device = args.device();
/// let (command, fake_args) = args.into_command_and_fake_args();
/// let transport = blinky::fake_transport(
///     fake_args.expect("--fake was given"),
///     profile.clone(),
/// )
/// .await?;
/// let manager = blinky::DeviceManager::new(transport, profile);
/// let mut out = Vec::new();
/// blinky::run(command, &mut out, &manager, device).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the command fails, or
/// output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    manager: &DeviceManager,
    device: DeviceIdentity,
) -> Result<()>
where
    W: io::Write,
{
    run_with_options(
        command,
        out,
        &SystemTerminalClient,
        manager,
        device,
        RunOptions::default(),
    )
    .await
}

/// Runs a CLI command with an injected terminal client and explicit options.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the command fails, or
/// output writing fails.
#[instrument(
    skip(out, terminal_client, manager),
    level = "info",
    fields(command = command.name(), address = device.address())
)]
pub async fn run_with_options<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    manager: &DeviceManager,
    device: DeviceIdentity,
    options: RunOptions,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        SERVICE_NAME,
        terminal_client.stderr_is_terminal(),
        options.log_level.map(LogLevel::as_level_filter),
    )?;
    let output_format = options.output_format.unwrap_or(if terminal_client.stdout_is_terminal() {
        OutputFormat::Pretty
    } else {
        OutputFormat::Json
    });

    let session = manager.open(device);
    match command {
        Command::Inspect => {
            crate::cli::inspect::run(session, manager.profile(), out, terminal_client, output_format)
                .await
        }
        Command::Watch(args) => {
            crate::cli::watch::run(session, &args, out, terminal_client, output_format).await
        }
        Command::Led(args) => {
            crate::cli::control::run_led(session, &args, out, terminal_client, output_format).await
        }
        Command::Command(args) => {
            crate::cli::control::run_command(session, &args, out, terminal_client, output_format)
                .await
        }
    }
}
