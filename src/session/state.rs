use serde::Serialize;
use tracing::{debug, warn};

/// Why a session ended up disconnected.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, derive_more::Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The peripheral does not expose the required profile.
    #[display("not_supported")]
    NotSupported,
    #[display("other")]
    Other,
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, derive_more::Display, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[display("disconnected({reason})")]
    Disconnected { reason: DisconnectReason },
    #[display("connecting")]
    Connecting,
    #[display("initializing")]
    Initializing,
    #[display("ready")]
    Ready,
    #[display("disconnecting")]
    Disconnecting,
}

impl ConnectionState {
    #[must_use]
    pub fn is_disconnected(self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

/// Inputs that drive the session lifecycle.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub(crate) enum LifecycleEvent {
    ConnectRequested,
    LinkEstablished,
    InitializationComplete,
    CapabilityRejected,
    ConnectFailed,
    DisconnectRequested,
    LinkLost,
    InitializationFailed,
    TeardownConfirmed,
}

/// The only place connection state changes.
#[derive(Debug, Clone)]
pub(crate) struct SessionStateMachine {
    state: ConnectionState,
    capability_rejected: bool,
}

impl SessionStateMachine {
    pub(crate) fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected {
                reason: DisconnectReason::Other,
            },
            capability_rejected: false,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    /// Applies `event` and returns the new state when it changed.
    ///
    /// Events that are not legal in the current state are logged and
    /// ignored.
    pub(crate) fn apply(&mut self, event: LifecycleEvent) -> Option<ConnectionState> {
        use ConnectionState::{Connecting, Disconnected, Disconnecting, Initializing, Ready};
        use LifecycleEvent::{
            CapabilityRejected, ConnectFailed, ConnectRequested, DisconnectRequested,
            InitializationComplete, InitializationFailed, LinkEstablished, LinkLost,
            TeardownConfirmed,
        };

        let next = match (self.state, event) {
            (Disconnected { .. }, ConnectRequested) => {
                self.capability_rejected = false;
                Connecting
            }
            (Connecting, LinkEstablished) => Initializing,
            (Connecting, ConnectFailed) => Disconnected {
                reason: DisconnectReason::Other,
            },
            (Initializing, InitializationComplete) => Ready,
            (Initializing, CapabilityRejected) => {
                self.capability_rejected = true;
                Disconnecting
            }
            (Initializing, InitializationFailed)
            | (Connecting | Initializing | Ready, DisconnectRequested | LinkLost) => Disconnecting,
            (Disconnecting, TeardownConfirmed) => Disconnected {
                reason: if self.capability_rejected {
                    DisconnectReason::NotSupported
                } else {
                    DisconnectReason::Other
                },
            },
            (state, event) => {
                warn!(%state, %event, "ignoring lifecycle event");
                return None;
            }
        };

        debug!(from = %self.state, to = %next, %event, "connection state transition");
        self.state = next;
        Some(next)
    }
}
