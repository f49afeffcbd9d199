use serde::Serialize;
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Identity of the peripheral a session is bound to.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize)]
pub struct DeviceIdentity {
    address: String,
    name: Option<String>,
}

impl DeviceIdentity {
    /// Creates an identity from a transport address.
    ///
    /// ```
    /// let device = blinky::DeviceIdentity::new("C8:2B:96:A1:00:10").with_name("Blinky");
    /// assert_eq!(Some("Blinky"), device.name());
    /// ```
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the opaque transport address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the display name, if one was supplied.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the name when known, else the address.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// Declared GATT characteristic property.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CharacteristicProperty {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthenticatedSignedWrites,
    ExtendedProperties,
}

/// A characteristic description discovered on a connected peripheral.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct CharacteristicInfo {
    uuid: Uuid,
    properties: Vec<CharacteristicProperty>,
}

impl CharacteristicInfo {
    #[must_use]
    pub fn new(uuid: Uuid, properties: Vec<CharacteristicProperty>) -> Self {
        Self { uuid, properties }
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    #[must_use]
    pub fn properties(&self) -> &[CharacteristicProperty] {
        &self.properties
    }

    /// Returns whether the characteristic declares `property`.
    #[must_use]
    pub fn supports(&self, property: CharacteristicProperty) -> bool {
        self.properties.contains(&property)
    }
}

/// A GATT service with its discovered characteristics.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ServiceInfo {
    uuid: Uuid,
    primary: bool,
    characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    #[must_use]
    pub fn new(uuid: Uuid, primary: bool, characteristics: Vec<CharacteristicInfo>) -> Self {
        Self {
            uuid,
            primary,
            characteristics,
        }
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    #[must_use]
    pub fn characteristics(&self) -> &[CharacteristicInfo] {
        &self.characteristics
    }

    /// Finds a characteristic by UUID.
    #[must_use]
    pub fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicInfo> {
        self.characteristics
            .iter()
            .find(|characteristic| characteristic.uuid == uuid)
    }
}

/// A characteristic resolved by capability negotiation.
///
/// Handles are only minted by the session manager and handed to the
/// transport; callers never see them.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CharacteristicHandle {
    service: Uuid,
    uuid: Uuid,
}

impl CharacteristicHandle {
    pub(crate) fn new(service: Uuid, uuid: Uuid) -> Self {
        Self { service, uuid }
    }

    /// UUID of the owning service.
    #[must_use]
    pub fn service(&self) -> Uuid {
        self.service
    }

    /// UUID of the characteristic.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}
