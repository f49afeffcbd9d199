use std::io;

use anyhow::Result;
use tracing::instrument;

use crate::cli::OutputFormat;
use crate::profile::ProfileDescriptor;
use crate::session::{ConnectionState, SessionHandle};
use crate::terminal::TerminalClient;

use super::connect::{StateTracker, close_and_wait};
use super::report::{InspectReport, ProfileSummary, Verdict};
use super::ui::{InspectReportView, Painter, Spinner};

/// Executes the `inspect` command.
///
/// A rejected peripheral is a successful inspection; the verdict says so.
#[instrument(skip_all, level = "info", fields(?output_format))]
pub(crate) async fn run<W>(
    session: SessionHandle,
    profile: &ProfileDescriptor,
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
    let message = format!("Inspecting {}", session.device().display_name());
    let settled = spinner
        .wait(&message, tracker.settled())
        .await
        .unwrap_or_else(|| session.connection_state());
    let button = session.button();
    let services = session.discovered_services();
    if settled == ConnectionState::Ready {
        close_and_wait(&session, &mut tracker).await;
    }

    let report = InspectReport {
        device: session.device().clone(),
        profile: ProfileSummary::from(profile),
        transitions: tracker.into_transitions(),
        verdict: Verdict::from_settled(settled),
        button,
        services,
    };

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", InspectReportView::new(&report, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &report)?;
            writeln!(out)?;
        }
    }

    Ok(())
}
