use thiserror::Error;
use uuid::Uuid;

use crate::profile::EndpointId;
use crate::session::ConnectionState;

/// Errors raised by a BLE transport backend.
///
/// These never reach session callers directly; the session manager folds them
/// into a [`ConnectionState`] transition.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("no peripheral with address `{address}` was found")]
    DeviceNotFound { address: String },
    #[error("the transport has no connected peripheral")]
    NotConnected,
    #[error("characteristic {uuid} is not known to the connected peripheral")]
    UnknownCharacteristic { uuid: Uuid },
    #[error("fake transport was scripted to fail `{operation}`")]
    ScriptedFailure { operation: &'static str },
}

/// Reasons a connected peripheral is rejected during capability negotiation.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum CapabilityError {
    #[error("required service {service} is missing")]
    ServiceMissing { service: Uuid },
    #[error("required {endpoint} characteristic {uuid} is missing")]
    CharacteristicMissing { endpoint: EndpointId, uuid: Uuid },
    #[error("{endpoint} characteristic {uuid} does not advertise `{required}`")]
    PropertyMismatch {
        endpoint: EndpointId,
        uuid: Uuid,
        required: crate::hw::CharacteristicProperty,
    },
}

/// Outcome errors for operations submitted to the session queue.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("the session was closed before the operation completed")]
    SessionClosed,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors returned by session control calls.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum SessionError {
    #[error("reconnect is only valid once the session is disconnected (currently {state})")]
    ReconnectWhileActive { state: ConnectionState },
}

/// Errors returned when loading or validating a profile descriptor.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read profile file")]
    Io(#[from] std::io::Error),
    #[error("profile file is not valid JSON")]
    Json(#[from] serde_json::Error),
    #[error("command table must contain exactly {expected} payloads, found {found}")]
    CommandCount { expected: usize, found: usize },
    #[error("command {id} payload is empty")]
    EmptyCommand { id: u8 },
    #[error("command {id} payload is {found} bytes but command payloads are {expected} bytes")]
    CommandLength { id: u8, expected: usize, found: usize },
    #[error("commands {first} and {second} share the same payload")]
    DuplicateCommand { first: u8, second: u8 },
}

/// Errors returned when parsing fake transport fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("hex payload is invalid")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("the connected peripheral does not expose the required profile")]
    NotSupported,
    #[error("the session disconnected before becoming ready")]
    DisconnectedBeforeReady,
    #[error("the operation was skipped because the session is not ready")]
    NotReady,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
