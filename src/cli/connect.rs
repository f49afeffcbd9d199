use anyhow::Result;
use tokio_stream::StreamExt;
use tracing::{debug, instrument};

use crate::error::CliConfigError;
use crate::publisher::ValueStream;
use crate::session::{ConnectionState, DisconnectReason, SessionHandle};

use super::ui::Spinner;

/// Connection state observer that remembers every transition it saw.
pub(crate) struct StateTracker {
    states: ValueStream<ConnectionState>,
    transitions: Vec<ConnectionState>,
}

impl StateTracker {
    pub(crate) fn new(session: &SessionHandle) -> Self {
        Self {
            states: session.observe_connection_state(),
            transitions: Vec::new(),
        }
    }

    pub(crate) fn transitions(&self) -> &[ConnectionState] {
        &self.transitions
    }

    pub(crate) fn into_transitions(self) -> Vec<ConnectionState> {
        self.transitions
    }

    /// Waits for the first state matching `done`, returning `None` if the
    /// session went away first.
    pub(crate) async fn until(
        &mut self,
        done: impl Fn(ConnectionState) -> bool,
    ) -> Option<ConnectionState> {
        while let Some(state) = self.states.next().await {
            debug!(%state, "observed connection state");
            self.transitions.push(state);
            if done(state) {
                return Some(state);
            }
        }
        None
    }

    /// Waits until the session is either ready or disconnected.
    pub(crate) async fn settled(&mut self) -> Option<ConnectionState> {
        self.until(|state| state == ConnectionState::Ready || state.is_disconnected())
            .await
    }
}

/// Waits for the session to become ready.
///
/// # Errors
///
/// Returns an error if the peripheral was rejected or the session
/// disconnected first.
#[instrument(skip_all, level = "info", fields(address = session.device().address()))]
pub(crate) async fn wait_until_ready(
    session: &SessionHandle,
    tracker: &mut StateTracker,
    spinner: &Spinner,
) -> Result<()> {
    let message = format!("Connecting to {}", session.device().display_name());
    let settled = spinner.wait(&message, tracker.settled()).await;
    match settled.unwrap_or_else(|| session.connection_state()) {
        ConnectionState::Ready => Ok(()),
        ConnectionState::Disconnected {
            reason: DisconnectReason::NotSupported,
        } => Err(CliConfigError::NotSupported.into()),
        _ => Err(CliConfigError::DisconnectedBeforeReady.into()),
    }
}

/// Closes the session and waits for teardown to finish.
pub(crate) async fn close_and_wait(session: &SessionHandle, tracker: &mut StateTracker) {
    session.close();
    let already_seen = tracker
        .transitions()
        .last()
        .is_some_and(|state| state.is_disconnected());
    if !already_seen {
        tracker.until(ConnectionState::is_disconnected).await;
    }
}
