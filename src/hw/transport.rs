use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_stream::Stream;
use tracing::info;
use uuid::Uuid;

use super::btleplug_backend::{BtleplugConfig, BtleplugTransport};
use super::fake_backend::{FakeBackendConfig, FakeTransport};
use super::model::{CharacteristicHandle, DeviceIdentity, ServiceInfo};
use crate::error::TransportError;

/// Asynchronous events pushed by the transport while a link is up.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TransportEvent {
    /// Unsolicited value pushed by the peripheral.
    Notification { characteristic: Uuid, value: Vec<u8> },
    /// The link dropped without a local disconnect request.
    LinkLost,
}

/// Event stream returned by [`Transport::connect`].
pub type TransportEvents = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Attribute-protocol primitives the session manager drives.
///
/// A transport serves one peripheral at a time. The session manager never
/// issues two request operations concurrently.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Establishes the link and returns the event stream for it.
    async fn connect(&self, device: &DeviceIdentity) -> Result<TransportEvents, TransportError>;

    /// Discovers the service tree of the connected peripheral.
    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, TransportError>;

    /// Subscribes to notifications on a characteristic.
    async fn enable_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), TransportError>;

    /// Reads a characteristic value.
    async fn read(&self, characteristic: &CharacteristicHandle) -> Result<Vec<u8>, TransportError>;

    /// Writes with response and returns the acknowledged payload.
    async fn write(
        &self,
        characteristic: &CharacteristicHandle,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportError>;

    /// Drops any cached service tree so the next connection rediscovers it.
    async fn invalidate_cache(&self) -> Result<(), TransportError>;

    /// Tears down the link.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Runtime BLE backend selection.
#[derive(Debug)]
pub(crate) enum TransportBackend {
    Real(BtleplugConfig),
    Fake(FakeBackendConfig),
}

/// Builds the transport for the selected runtime backend.
pub(crate) async fn transport_from_backend(
    backend: TransportBackend,
) -> Result<Arc<dyn Transport>, TransportError> {
    let transport: Arc<dyn Transport> = match backend {
        TransportBackend::Real(config) => Arc::new(BtleplugTransport::new(config).await?),
        TransportBackend::Fake(config) => {
            info!("using fake BLE backend");
            Arc::new(FakeTransport::from_config(config))
        }
    };

    Ok(transport)
}
