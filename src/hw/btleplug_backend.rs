use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, sleep};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::model::{
    CharacteristicHandle, CharacteristicInfo, CharacteristicProperty, DeviceIdentity, ServiceInfo,
};
use super::transport::{Transport, TransportEvent, TransportEvents};
use crate::error::TransportError;

const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(30);
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Settings for the `btleplug` transport.
#[derive(Debug, Clone, Builder)]
pub struct BtleplugConfig {
    /// How long to scan for the requested address before giving up.
    #[builder(default = DEFAULT_SCAN_TIMEOUT)]
    scan_timeout: Duration,
}

impl BtleplugConfig {
    #[must_use]
    pub fn scan_timeout(&self) -> Duration {
        self.scan_timeout
    }
}

impl Default for BtleplugConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Transport backed by the host Bluetooth stack through `btleplug`.
#[derive(Debug)]
pub struct BtleplugTransport {
    manager: Manager,
    config: BtleplugConfig,
    link: Mutex<Option<ConnectedPeripheral>>,
}

#[derive(Debug)]
struct ConnectedPeripheral {
    peripheral: Peripheral,
    characteristics_by_uuid: HashMap<Uuid, Characteristic>,
    forwarder_stop: CancellationToken,
}

impl BtleplugTransport {
    /// Creates the real BLE transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform BLE manager cannot be created.
    pub async fn new(config: BtleplugConfig) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        Ok(Self {
            manager,
            config,
            link: Mutex::new(None),
        })
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapters(&self) -> Result<Vec<Adapter>, TransportError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(TransportError::NoAdapters);
        }
        Ok(adapters)
    }

    /// Scans until a peripheral with the requested address appears.
    #[instrument(skip(self, adapters), level = "debug", fields(address = device.address()))]
    async fn find_peripheral(
        &self,
        adapters: &[Adapter],
        device: &DeviceIdentity,
    ) -> Result<(Adapter, Peripheral), TransportError> {
        info!(adapter_count = adapters.len(), "starting BLE scan");
        let scan = ScanGuard::new(adapters);
        for adapter in adapters {
            adapter.start_scan(ScanFilter::default()).await?;
        }

        let deadline = Instant::now() + self.config.scan_timeout;
        let found = 'scan: loop {
            for adapter in adapters {
                let peripherals = match adapter.peripherals().await {
                    Ok(peripherals) => peripherals,
                    Err(error) => {
                        warn!(?error, "failed to query adapter for peripherals");
                        continue;
                    }
                };
                for peripheral in peripherals {
                    let id = peripheral.id().to_string();
                    let address = peripheral.address().to_string();
                    if matches_address(device.address(), &address, &id) {
                        break 'scan Some((adapter.clone(), peripheral));
                    }
                }
            }

            if Instant::now() >= deadline {
                break None;
            }
            sleep(SCAN_POLL_INTERVAL).await;
        };

        scan.stop().await;

        found.ok_or_else(|| TransportError::DeviceNotFound {
            address: device.address().to_string(),
        })
    }

    async fn resolve(
        &self,
        handle: &CharacteristicHandle,
    ) -> Result<(Peripheral, Characteristic), TransportError> {
        let link = self.link.lock().await;
        let link = link.as_ref().ok_or(TransportError::NotConnected)?;
        let characteristic = link.characteristics_by_uuid.get(&handle.uuid()).ok_or(
            TransportError::UnknownCharacteristic {
                uuid: handle.uuid(),
            },
        )?;
        Ok((link.peripheral.clone(), characteristic.clone()))
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    #[instrument(skip(self), level = "debug", fields(address = device.address()))]
    async fn connect(&self, device: &DeviceIdentity) -> Result<TransportEvents, TransportError> {
        let adapters = self.adapters().await?;
        let (adapter, peripheral) = self.find_peripheral(&adapters, device).await?;

        // Registered before connecting so `disconnect` can always reach the link.
        let forwarder_stop = CancellationToken::new();
        let previous = self.link.lock().await.replace(ConnectedPeripheral {
            peripheral: peripheral.clone(),
            characteristics_by_uuid: HashMap::new(),
            forwarder_stop: forwarder_stop.clone(),
        });
        if let Some(previous) = previous {
            previous.forwarder_stop.cancel();
        }

        match open_link(&adapter, &peripheral, forwarder_stop).await {
            Ok(events) => Ok(events),
            Err(error) => {
                if let Err(cleanup) = self.disconnect().await {
                    debug!(error = %cleanup, "failed to release half-open link");
                }
                Err(error)
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, TransportError> {
        let mut link = self.link.lock().await;
        let link = link.as_mut().ok_or(TransportError::NotConnected)?;
        link.peripheral.discover_services().await?;

        let (services, characteristics_by_uuid) = collect_services(&link.peripheral);
        link.characteristics_by_uuid = characteristics_by_uuid;
        debug!(service_count = services.len(), "services discovered");
        Ok(services)
    }

    #[instrument(skip(self), level = "trace", fields(uuid = %characteristic.uuid()))]
    async fn enable_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self.resolve(characteristic).await?;
        peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "trace", fields(uuid = %characteristic.uuid()))]
    async fn read(&self, characteristic: &CharacteristicHandle) -> Result<Vec<u8>, TransportError> {
        let (peripheral, characteristic) = self.resolve(characteristic).await?;
        Ok(peripheral.read(&characteristic).await?)
    }

    #[instrument(
        skip(self, payload),
        level = "trace",
        fields(uuid = %characteristic.uuid(), payload_len = payload.len())
    )]
    async fn write(
        &self,
        characteristic: &CharacteristicHandle,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        let (peripheral, characteristic) = self.resolve(characteristic).await?;
        peripheral
            .write(&characteristic, payload, WriteType::WithResponse)
            .await?;
        // A confirmed write-with-response acknowledges the bytes sent.
        Ok(payload.to_vec())
    }

    /// `btleplug` exposes no GATT cache refresh, so this only forgets the
    /// characteristics resolved for the current link. The platform stack
    /// may still serve its own cached tree on the next discovery.
    #[instrument(skip(self), level = "debug")]
    async fn invalidate_cache(&self) -> Result<(), TransportError> {
        if let Some(link) = self.link.lock().await.as_mut() {
            link.characteristics_by_uuid.clear();
        }
        trace!("cleared resolved characteristics");
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(link) = self.link.lock().await.take() else {
            return Ok(());
        };
        link.forwarder_stop.cancel();
        if link.peripheral.is_connected().await? {
            link.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

async fn open_link(
    adapter: &Adapter,
    peripheral: &Peripheral,
    forwarder_stop: CancellationToken,
) -> Result<TransportEvents, TransportError> {
    if !peripheral.is_connected().await? {
        peripheral.connect().await?;
    }
    info!(peripheral_id = %peripheral.id(), "link established");

    let notifications = peripheral.notifications().await?;
    let central_events = adapter.events().await?;
    let (sender, receiver) = mpsc::unbounded_channel();
    tokio::spawn(forward_events(
        peripheral.clone(),
        notifications,
        central_events,
        sender,
        forwarder_stop,
    ));
    Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
}

/// Stops scanning on every adapter, also when the scan future is dropped.
struct ScanGuard {
    adapters: Vec<Adapter>,
    active: bool,
}

impl ScanGuard {
    fn new(adapters: &[Adapter]) -> Self {
        Self {
            adapters: adapters.to_vec(),
            active: true,
        }
    }

    async fn stop(mut self) {
        self.active = false;
        stop_scans(std::mem::take(&mut self.adapters)).await;
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let adapters = std::mem::take(&mut self.adapters);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(stop_scans(adapters));
            }
            Err(_) => warn!("no runtime left to stop the BLE scan"),
        }
    }
}

async fn stop_scans(adapters: Vec<Adapter>) {
    for adapter in adapters {
        if let Err(error) = adapter.stop_scan().await {
            debug!(?error, "failed to stop adapter scan cleanly");
        }
    }
}

async fn forward_events(
    peripheral: Peripheral,
    mut notifications: impl tokio_stream::Stream<Item = btleplug::api::ValueNotification> + Unpin,
    mut central_events: impl tokio_stream::Stream<Item = CentralEvent> + Unpin,
    sender: mpsc::UnboundedSender<TransportEvent>,
    stop: CancellationToken,
) {
    let peripheral_id = peripheral.id();
    loop {
        let event = tokio::select! {
            () = stop.cancelled() => break,
            notification = notifications.next() => match notification {
                Some(notification) => TransportEvent::Notification {
                    characteristic: notification.uuid,
                    value: notification.value,
                },
                None => break,
            },
            central_event = central_events.next() => match central_event {
                Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => {
                    TransportEvent::LinkLost
                }
                Some(_other) => continue,
                None => break,
            },
        };

        let link_lost = matches!(event, TransportEvent::LinkLost);
        if sender.send(event).is_err() || link_lost {
            break;
        }
    }
    trace!("transport event forwarder stopped");
}

fn matches_address(requested: &str, address: &str, id: &str) -> bool {
    requested.eq_ignore_ascii_case(address) || requested.eq_ignore_ascii_case(id)
}

fn collect_services(peripheral: &Peripheral) -> (Vec<ServiceInfo>, HashMap<Uuid, Characteristic>) {
    let mut services = Vec::new();
    let mut characteristics_by_uuid = HashMap::new();

    for service in peripheral.services() {
        let mut characteristics = Vec::new();
        for characteristic in &service.characteristics {
            characteristics_by_uuid
                .entry(characteristic.uuid)
                .or_insert_with(|| characteristic.clone());
            characteristics.push(CharacteristicInfo::new(
                characteristic.uuid,
                property_list(characteristic.properties),
            ));
        }
        characteristics.sort_by_key(CharacteristicInfo::uuid);

        services.push(ServiceInfo::new(
            service.uuid,
            service.primary,
            characteristics,
        ));
    }
    services.sort_by_key(ServiceInfo::uuid);

    (services, characteristics_by_uuid)
}

fn property_list(flags: CharPropFlags) -> Vec<CharacteristicProperty> {
    const MAPPING: [(CharPropFlags, CharacteristicProperty); 8] = [
        (CharPropFlags::BROADCAST, CharacteristicProperty::Broadcast),
        (CharPropFlags::READ, CharacteristicProperty::Read),
        (
            CharPropFlags::WRITE_WITHOUT_RESPONSE,
            CharacteristicProperty::WriteWithoutResponse,
        ),
        (CharPropFlags::WRITE, CharacteristicProperty::Write),
        (CharPropFlags::NOTIFY, CharacteristicProperty::Notify),
        (CharPropFlags::INDICATE, CharacteristicProperty::Indicate),
        (
            CharPropFlags::AUTHENTICATED_SIGNED_WRITES,
            CharacteristicProperty::AuthenticatedSignedWrites,
        ),
        (
            CharPropFlags::EXTENDED_PROPERTIES,
            CharacteristicProperty::ExtendedProperties,
        ),
    ];

    MAPPING
        .into_iter()
        .filter(|(flag, _property)| flags.contains(*flag))
        .map(|(_flag, property)| property)
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CharPropFlags::WRITE, vec![CharacteristicProperty::Write])]
    #[case(
        CharPropFlags::READ | CharPropFlags::NOTIFY,
        vec![CharacteristicProperty::Read, CharacteristicProperty::Notify]
    )]
    #[case(
        CharPropFlags::WRITE_WITHOUT_RESPONSE | CharPropFlags::WRITE,
        vec![CharacteristicProperty::WriteWithoutResponse, CharacteristicProperty::Write]
    )]
    #[case(CharPropFlags::empty(), vec![])]
    fn property_list_maps_flags_in_declaration_order(
        #[case] flags: CharPropFlags,
        #[case] expected: Vec<CharacteristicProperty>,
    ) {
        assert_eq!(expected, property_list(flags));
    }

    #[rstest]
    #[case("C8:2B:96:A1:00:10", "c8:2b:96:a1:00:10", "hci0/dev_C8_2B", true)]
    #[case(
        "2f0d5b7e-1b5c-4b5e-9a0b-8d3f5c2e1a00",
        "00:00:00:00:00:00",
        "2F0D5B7E-1B5C-4B5E-9A0B-8D3F5C2E1A00",
        true
    )]
    #[case("C8:2B:96:A1:00:10", "C8:2B:96:A1:00:11", "other", false)]
    fn matches_address_accepts_address_or_platform_id(
        #[case] requested: &str,
        #[case] address: &str,
        #[case] id: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(expected, matches_address(requested, address, id));
    }

    #[test]
    fn default_config_uses_thirty_second_scan() {
        assert_eq!(DEFAULT_SCAN_TIMEOUT, BtleplugConfig::default().scan_timeout);
    }
}
