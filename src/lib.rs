//! Session manager for BLE peripherals exposing an LED/button profile.
//!
//! A [`DeviceManager`] owns one [`SessionHandle`] at a time. The session
//! drives the connection lifecycle, checks the peripheral exposes the
//! configured [`ProfileDescriptor`], serialises reads and writes through a
//! FIFO queue and publishes connection, LED and button state to any number
//! of subscribers.

mod app;
mod cli;
mod codec;
mod error;
mod hw;
mod profile;
mod publisher;
mod session;
mod telemetry;
mod terminal;

pub use app::{RunOptions, fake_transport, real_transport, run, run_with_options};
pub use cli::{
    Args, Command, CommandArgs, FakeArgs, LedArgs, LedState, LogLevel, OutputFormat, WatchArgs,
};
pub use codec::{CommandId, CommandIdError, DataCodec, InvalidData};
pub use error::{
    CapabilityError, FixtureError, OperationError, ProfileError, SessionError, TransportError,
};
pub use hw::{
    BtleplugConfig, BtleplugTransport, CharacteristicHandle, CharacteristicInfo,
    CharacteristicProperty, DeviceIdentity, FakeOperation, FakeTransport, HexPayload,
    NotificationPayloads, ServiceInfo, Transport, TransportEvent, TransportEvents,
    complete_service_tree,
};
pub use profile::{
    BLINKY_CONTROL_UUID, BLINKY_SERVICE_UUID, BLINKY_TELEMETRY_UUID, COMMAND_COUNT, CommandTable,
    EndpointId, NORDIC_LBS_BUTTON_UUID, NORDIC_LBS_LED_UUID, NORDIC_LBS_SERVICE_UUID,
    ProfileDescriptor, default_profile_path,
};
pub use publisher::{PublishedValue, ValueStream};
pub use session::{
    ConnectionState, DeviceManager, DisconnectReason, OperationOutput, OperationResult,
    OperationTicket, QueuedOperation, SessionHandle,
};
pub use terminal::{SystemTerminalClient, TerminalClient};
