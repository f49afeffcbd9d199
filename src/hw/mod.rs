mod btleplug_backend;
mod fake_backend;
mod model;
mod transport;

pub use self::btleplug_backend::{BtleplugConfig, BtleplugTransport};
pub(crate) use self::fake_backend::FakeBackendConfig;
pub use self::fake_backend::{
    FakeOperation, FakeTransport, HexPayload, NotificationPayloads, complete_service_tree,
};
pub use self::model::{
    CharacteristicHandle, CharacteristicInfo, CharacteristicProperty, DeviceIdentity, ServiceInfo,
};
pub(crate) use self::transport::{TransportBackend, transport_from_backend};
pub use self::transport::{Transport, TransportEvent, TransportEvents};
