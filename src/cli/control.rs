use std::io;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::instrument;

use crate::cli::OutputFormat;
use crate::codec::CommandId;
use crate::error::CliConfigError;
use crate::session::{OperationOutput, OperationTicket, SessionHandle};
use crate::terminal::TerminalClient;

use super::connect::{StateTracker, close_and_wait, wait_until_ready};
use super::report::{ControlAction, ControlOutcome, ControlReport};
use super::ui::{ControlReportView, Painter, Spinner};

/// Target LED state accepted by `led`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LedState {
    On,
    Off,
}

impl LedState {
    fn is_on(self) -> bool {
        self == Self::On
    }
}

/// Arguments for the `led` command.
#[derive(Debug, Args)]
pub struct LedArgs {
    #[arg(value_enum)]
    state: LedState,
}

impl LedArgs {
    #[must_use]
    pub fn new(state: LedState) -> Self {
        Self { state }
    }
}

/// Arguments for the `command` command.
#[derive(Debug, Args)]
pub struct CommandArgs {
    /// Numbered command to send (0-9).
    #[arg(value_parser = parse_command_id)]
    id: CommandId,
}

impl CommandArgs {
    #[must_use]
    pub fn new(id: CommandId) -> Self {
        Self { id }
    }
}

fn parse_command_id(value: &str) -> Result<CommandId, String> {
    let raw: u8 = value.parse().map_err(|error: std::num::ParseIntError| error.to_string())?;
    CommandId::new(raw).map_err(|error| error.to_string())
}

/// Executes the `led` command.
#[instrument(skip_all, level = "info", fields(state = ?args.state))]
pub(crate) async fn run_led<W>(
    session: SessionHandle,
    args: &LedArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let on = args.state.is_on();
    run_control(
        session,
        ControlAction::Led { on },
        out,
        terminal_client,
        output_format,
    )
    .await
}

/// Executes the `command` command.
#[instrument(skip_all, level = "info", fields(id = %args.id))]
pub(crate) async fn run_command<W>(
    session: SessionHandle,
    args: &CommandArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_control(
        session,
        ControlAction::Command { id: args.id },
        out,
        terminal_client,
        output_format,
    )
    .await
}

async fn run_control<W>(
    session: SessionHandle,
    request: ControlAction,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let mut tracker = StateTracker::new(&session);
    let spinner = Spinner::new(
        output_format == OutputFormat::Pretty && terminal_client.stderr_is_terminal(),
    );
    wait_until_ready(&session, &mut tracker, &spinner).await?;

    let outcome = perform(&session, request).await;
    close_and_wait(&session, &mut tracker).await;
    let result = outcome?;

    let report = ControlReport {
        device: session.device().clone(),
        request,
        result,
        led: session.led(),
    };
    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", ControlReportView::new(&report, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &report)?;
            writeln!(out)?;
        }
    }

    Ok(())
}

async fn perform(session: &SessionHandle, request: ControlAction) -> Result<ControlOutcome> {
    let ticket: Option<OperationTicket> = match request {
        ControlAction::Led { on } => session.set_led(on),
        ControlAction::Command { id } => {
            Some(session.send_command(id).ok_or(CliConfigError::NotReady)?)
        }
    };
    let Some(ticket) = ticket else {
        return Ok(ControlOutcome::Skipped);
    };

    match ticket.await.context("control write failed")? {
        OperationOutput::Written(ack) => Ok(ControlOutcome::Acknowledged {
            ack: hex::encode(ack),
        }),
        other => anyhow::bail!("unexpected control outcome: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("0", 0)]
    #[case("9", 9)]
    fn command_ids_parse(#[case] raw: &str, #[case] expected: u8) {
        assert_matches!(parse_command_id(raw), Ok(id) if id.get() == expected);
    }

    #[rstest]
    #[case("10")]
    #[case("-1")]
    #[case("x")]
    fn bad_command_ids_are_rejected(#[case] raw: &str) {
        assert_matches!(parse_command_id(raw), Err(_));
    }
}
