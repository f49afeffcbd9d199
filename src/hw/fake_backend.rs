use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::sleep;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::model::{
    CharacteristicHandle, CharacteristicInfo, CharacteristicProperty, DeviceIdentity, ServiceInfo,
};
use super::transport::{Transport, TransportEvent, TransportEvents};
use crate::error::{FixtureError, TransportError};
use crate::profile::ProfileDescriptor;

const DEFAULT_READ_PAYLOAD: [u8; 1] = [0x00];

/// Parsed fake hex payload.
#[derive(Debug, Clone, derive_more::Into)]
pub struct HexPayload {
    payload: Vec<u8>,
}

impl FromStr for HexPayload {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let cleaned: String = value.chars().filter(|c| !c.is_whitespace()).collect();
        Ok(Self {
            payload: hex::decode(cleaned)?,
        })
    }
}

/// Parsed comma-separated fake notification payloads.
#[derive(Debug, Clone, derive_more::Into)]
pub struct NotificationPayloads {
    payloads: Vec<Vec<u8>>,
}

impl FromStr for NotificationPayloads {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Ok(Self {
                payloads: Vec::new(),
            });
        }
        let payloads = value
            .split(',')
            .map(|raw| raw.parse::<HexPayload>().map(Into::into))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { payloads })
    }
}

/// Settings for building a fake transport from CLI fixtures.
#[derive(Debug, Builder)]
pub(crate) struct FakeBackendConfig {
    profile: ProfileDescriptor,
    initial_read: Option<HexPayload>,
    notifications: Option<NotificationPayloads>,
    #[builder(default)]
    unsupported: bool,
    #[builder(default)]
    connect_delay: Duration,
}

/// One primitive observed by the fake transport, in call order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FakeOperation {
    Connect { address: String },
    DiscoverServices,
    EnableNotifications { characteristic: Uuid },
    Read { characteristic: Uuid },
    Write { characteristic: Uuid, payload: Vec<u8> },
    InvalidateCache,
    Disconnect,
}

/// Scriptable in-memory transport used by tests and `--fake` runs.
///
/// Clones share state, so a test can keep one clone to drive the peripheral
/// side while the session manager owns another.
#[derive(Debug, Clone)]
pub struct FakeTransport {
    inner: Arc<FakeInner>,
}

#[derive(Debug)]
struct FakeInner {
    state: Mutex<FakeState>,
    write_permits: Semaphore,
}

#[derive(Debug)]
struct FakeState {
    services: Vec<ServiceInfo>,
    read_payload: Vec<u8>,
    notifications_on_subscribe: Vec<Vec<u8>>,
    write_echo: Option<Vec<u8>>,
    fail_connect: bool,
    hold_writes: bool,
    connect_delay: Duration,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    operations: Vec<FakeOperation>,
}

impl FakeTransport {
    /// Creates a fake peripheral exposing `services`.
    #[must_use]
    pub fn new(services: Vec<ServiceInfo>) -> Self {
        Self {
            inner: Arc::new(FakeInner {
                state: Mutex::new(FakeState {
                    services,
                    read_payload: DEFAULT_READ_PAYLOAD.to_vec(),
                    notifications_on_subscribe: Vec::new(),
                    write_echo: None,
                    fail_connect: false,
                    hold_writes: false,
                    connect_delay: Duration::ZERO,
                    events: None,
                    operations: Vec::new(),
                }),
                write_permits: Semaphore::new(0),
            }),
        }
    }

    /// Creates a fake peripheral that fully satisfies `profile`.
    #[must_use]
    pub fn for_profile(profile: &ProfileDescriptor) -> Self {
        Self::new(complete_service_tree(profile))
    }

    pub(crate) fn from_config(config: FakeBackendConfig) -> Self {
        let FakeBackendConfig {
            profile,
            initial_read,
            notifications,
            unsupported,
            connect_delay,
        } = config;

        let services = if unsupported {
            read_only_control_tree(&profile)
        } else {
            complete_service_tree(&profile)
        };
        let fake = Self::new(services);
        {
            let mut state = fake.state();
            if let Some(initial_read) = initial_read {
                state.read_payload = initial_read.into();
            }
            if let Some(notifications) = notifications {
                state.notifications_on_subscribe = notifications.into();
            }
            state.connect_delay = connect_delay;
        }
        fake
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the service tree returned by the next discovery.
    pub fn set_services(&self, services: Vec<ServiceInfo>) {
        self.state().services = services;
    }

    /// Sets the payload returned by reads.
    pub fn set_read_payload(&self, payload: Vec<u8>) {
        self.state().read_payload = payload;
    }

    /// Queues payloads pushed as notifications right after a subscription.
    pub fn set_notifications_on_subscribe(&self, payloads: Vec<Vec<u8>>) {
        self.state().notifications_on_subscribe = payloads;
    }

    /// Overrides the acknowledgement returned by writes; `None` echoes the
    /// written payload.
    pub fn set_write_echo(&self, echo: Option<Vec<u8>>) {
        self.state().write_echo = echo;
    }

    /// Makes connection attempts fail.
    pub fn set_connect_failure(&self, fail: bool) {
        self.state().fail_connect = fail;
    }

    /// Delays every connection attempt by `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state().connect_delay = delay;
    }

    /// Keeps writes in flight until [`FakeTransport::release_write`] is called.
    pub fn hold_writes(&self) {
        self.state().hold_writes = true;
    }

    /// Lets one held write complete.
    pub fn release_write(&self) {
        self.inner.write_permits.add_permits(1);
    }

    /// Pushes a notification from the peripheral. Returns `false` when no
    /// link is up.
    pub fn notify(&self, characteristic: Uuid, value: Vec<u8>) -> bool {
        self.send_event(TransportEvent::Notification {
            characteristic,
            value,
        })
    }

    /// Simulates the peripheral dropping the link. Returns `false` when no
    /// link is up.
    pub fn drop_link(&self) -> bool {
        let delivered = self.send_event(TransportEvent::LinkLost);
        self.state().events = None;
        delivered
    }

    fn send_event(&self, event: TransportEvent) -> bool {
        self.state()
            .events
            .as_ref()
            .is_some_and(|events| events.send(event).is_ok())
    }

    /// Returns every primitive observed so far.
    #[must_use]
    pub fn operations(&self) -> Vec<FakeOperation> {
        self.state().operations.clone()
    }

    /// Returns the payloads of every write observed so far.
    #[must_use]
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state()
            .operations
            .iter()
            .filter_map(|operation| match operation {
                FakeOperation::Write { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns how often the service cache was invalidated.
    #[must_use]
    pub fn cache_invalidations(&self) -> usize {
        self.state()
            .operations
            .iter()
            .filter(|operation| matches!(operation, FakeOperation::InvalidateCache))
            .count()
    }

    fn record(&self, operation: FakeOperation) {
        debug!(?operation, "fake transport operation");
        self.state().operations.push(operation);
    }

    fn ensure_known(&self, handle: &CharacteristicHandle) -> Result<(), TransportError> {
        let state = self.state();
        if state.events.is_none() {
            return Err(TransportError::NotConnected);
        }
        let known = state
            .services
            .iter()
            .filter(|service| service.uuid() == handle.service())
            .any(|service| service.characteristic(handle.uuid()).is_some());
        if known {
            Ok(())
        } else {
            Err(TransportError::UnknownCharacteristic {
                uuid: handle.uuid(),
            })
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    #[instrument(skip(self), level = "debug", fields(address = device.address()))]
    async fn connect(&self, device: &DeviceIdentity) -> Result<TransportEvents, TransportError> {
        self.record(FakeOperation::Connect {
            address: device.address().to_string(),
        });
        let (fail, delay) = {
            let state = self.state();
            (state.fail_connect, state.connect_delay)
        };
        if !delay.is_zero() {
            sleep(delay).await;
        }
        if fail {
            return Err(TransportError::ScriptedFailure {
                operation: "connect",
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        self.state().events = Some(sender);
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, TransportError> {
        self.record(FakeOperation::DiscoverServices);
        let state = self.state();
        if state.events.is_none() {
            return Err(TransportError::NotConnected);
        }
        Ok(state.services.clone())
    }

    async fn enable_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), TransportError> {
        self.record(FakeOperation::EnableNotifications {
            characteristic: characteristic.uuid(),
        });
        self.ensure_known(characteristic)?;

        let payloads = std::mem::take(&mut self.state().notifications_on_subscribe);
        for value in payloads {
            self.notify(characteristic.uuid(), value);
        }
        Ok(())
    }

    async fn read(&self, characteristic: &CharacteristicHandle) -> Result<Vec<u8>, TransportError> {
        self.record(FakeOperation::Read {
            characteristic: characteristic.uuid(),
        });
        self.ensure_known(characteristic)?;
        Ok(self.state().read_payload.clone())
    }

    async fn write(
        &self,
        characteristic: &CharacteristicHandle,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        self.record(FakeOperation::Write {
            characteristic: characteristic.uuid(),
            payload: payload.to_vec(),
        });
        self.ensure_known(characteristic)?;

        let hold = self.state().hold_writes;
        if hold && let Ok(permit) = self.inner.write_permits.acquire().await {
            permit.forget();
        }

        let echo = self.state().write_echo.clone();
        Ok(echo.unwrap_or_else(|| payload.to_vec()))
    }

    async fn invalidate_cache(&self) -> Result<(), TransportError> {
        self.record(FakeOperation::InvalidateCache);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.record(FakeOperation::Disconnect);
        self.state().events = None;
        Ok(())
    }
}

/// A service tree that fully satisfies `profile`.
#[must_use]
pub fn complete_service_tree(profile: &ProfileDescriptor) -> Vec<ServiceInfo> {
    profile_tree(profile, vec![CharacteristicProperty::Write])
}

fn read_only_control_tree(profile: &ProfileDescriptor) -> Vec<ServiceInfo> {
    profile_tree(profile, vec![CharacteristicProperty::Read])
}

fn profile_tree(
    profile: &ProfileDescriptor,
    control_properties: Vec<CharacteristicProperty>,
) -> Vec<ServiceInfo> {
    vec![ServiceInfo::new(
        profile.service(),
        true,
        vec![
            CharacteristicInfo::new(
                profile.telemetry(),
                vec![CharacteristicProperty::Read, CharacteristicProperty::Notify],
            ),
            CharacteristicInfo::new(profile.control(), control_properties),
        ],
    )]
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("01", vec![0x01])]
    #[case("de ad BE ef", vec![0xDE, 0xAD, 0xBE, 0xEF])]
    #[case("", vec![])]
    fn hex_payload_parses_whitespace_separated_bytes(
        #[case] raw: &str,
        #[case] expected: Vec<u8>,
    ) {
        let payload: Vec<u8> = raw
            .parse::<HexPayload>()
            .expect("hex should parse")
            .into();
        assert_eq!(expected, payload);
    }

    #[test]
    fn hex_payload_rejects_odd_length() {
        let result = "A".parse::<HexPayload>();
        assert_matches!(result, Err(FixtureError::InvalidHex(_)));
    }

    #[test]
    fn notification_payloads_split_on_commas() {
        let payloads: Vec<Vec<u8>> = "01,00,0102"
            .parse::<NotificationPayloads>()
            .expect("payload list should parse")
            .into();
        assert_eq!(vec![vec![0x01], vec![0x00], vec![0x01, 0x02]], payloads);
    }

    #[tokio::test]
    async fn operations_require_a_link() {
        let profile = ProfileDescriptor::blinky();
        let fake = FakeTransport::for_profile(&profile);
        let handle = CharacteristicHandle::new(profile.service(), profile.telemetry());

        let result = fake.read(&handle).await;
        assert_matches!(result, Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn subscription_flushes_queued_notifications() {
        use tokio_stream::StreamExt;

        let profile = ProfileDescriptor::blinky();
        let fake = FakeTransport::for_profile(&profile);
        fake.set_notifications_on_subscribe(vec![vec![0x01]]);
        let mut events = fake
            .connect(&DeviceIdentity::new("AA:BB"))
            .await
            .expect("fake connect should succeed");

        let handle = CharacteristicHandle::new(profile.service(), profile.telemetry());
        fake.enable_notifications(&handle)
            .await
            .expect("telemetry should be known");

        assert_eq!(
            Some(TransportEvent::Notification {
                characteristic: profile.telemetry(),
                value: vec![0x01],
            }),
            events.next().await
        );
    }

    #[test]
    fn unsupported_config_strips_control_write() {
        let config = FakeBackendConfig::builder()
            .profile(ProfileDescriptor::blinky())
            .unsupported(true)
            .build();
        let fake = FakeTransport::from_config(config);
        let services = fake.state().services.clone();
        let control = services[0]
            .characteristic(ProfileDescriptor::blinky().control())
            .expect("control characteristic should still be present");

        assert!(!control.supports(CharacteristicProperty::Write));
    }
}
