use std::io;

use anyhow::Result;
use clap::Args;
use tokio_stream::StreamExt;
use tracing::{info, instrument};

use crate::cli::OutputFormat;
use crate::session::SessionHandle;
use crate::terminal::TerminalClient;

use super::connect::{StateTracker, close_and_wait};
use super::report::{WatchEvent, WatchEventKind, WatchStopReason, WatchSummary};
use super::ui::{Painter, WatchEventView, WatchSummaryView};

/// Arguments for the `watch` command.
#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stop after this many events. If omitted, watch until Ctrl+C or disconnect.
    #[arg(long)]
    max_events: Option<usize>,
}

impl WatchArgs {
    #[must_use]
    pub fn new(max_events: Option<usize>) -> Self {
        Self { max_events }
    }
}

/// Executes the `watch` command.
#[instrument(skip_all, level = "info", fields(max_events = args.max_events, ?output_format))]
pub(crate) async fn run<W>(
    session: SessionHandle,
    args: &WatchArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let mut connection = session.observe_connection_state();
    let mut led = session.observe_led();
    let mut button = session.observe_button();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut printed = 0usize;
    let stop_reason = loop {
        if args.max_events.is_some_and(|limit| printed >= limit) {
            break WatchStopReason::Limit;
        }

        let kind = tokio::select! {
            _ = &mut ctrl_c => break WatchStopReason::Interrupted,
            Some(state) = connection.next() => WatchEventKind::Connection { state },
            Some(on) = led.next() => WatchEventKind::Led { on },
            Some(pressed) = button.next() => WatchEventKind::Button { pressed },
        };

        let event = WatchEvent::now(printed, kind);
        match output_format {
            OutputFormat::Pretty => writeln!(out, "{}", WatchEventView::new(&event, &painter))?,
            OutputFormat::Json => {
                serde_json::to_writer(&mut *out, &event)?;
                writeln!(out)?;
            }
        }
        printed += 1;

        if let WatchEventKind::Connection { state } = kind
            && state.is_disconnected()
        {
            break WatchStopReason::Disconnected;
        }
    };
    info!(%stop_reason, events = printed, "watch finished");

    let mut tracker = StateTracker::new(&session);
    close_and_wait(&session, &mut tracker).await;

    let summary = WatchSummary {
        device: session.device().clone(),
        events: printed,
        stop_reason,
    };
    match output_format {
        OutputFormat::Pretty => {
            writeln!(out)?;
            writeln!(out, "{}", WatchSummaryView::new(&summary, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &summary)?;
            writeln!(out)?;
        }
    }

    Ok(())
}
