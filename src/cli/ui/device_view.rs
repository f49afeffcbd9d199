use std::fmt::{self, Display, Formatter};

use crate::hw::DeviceIdentity;

use super::painter::Painter;
use super::table::Table;

/// Renders a device identity as a key-value table.
pub(crate) struct DeviceView<'a> {
    device: &'a DeviceIdentity,
    painter: &'a Painter,
}

impl<'a> DeviceView<'a> {
    pub(crate) fn new(device: &'a DeviceIdentity, painter: &'a Painter) -> Self {
        Self { device, painter }
    }
}

impl Display for DeviceView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self.device.name() {
            Some(name) => self.painter.value(name),
            None => self.painter.muted("<unknown>"),
        };
        let table = Table::key_value(
            self.painter,
            vec![
                ("address", self.painter.value(self.device.address())),
                ("name", name),
            ],
        );
        write!(f, "{table}")
    }
}
