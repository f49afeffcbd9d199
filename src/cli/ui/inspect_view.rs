use std::fmt::{self, Display, Formatter};

use crate::cli::report::{InspectReport, Verdict};
use crate::hw::ServiceInfo;

use super::device_view::DeviceView;
use super::painter::Painter;
use super::table::Table;

/// Renders an inspect report: device, lifecycle, profile endpoints and the
/// discovered service tree.
pub(crate) struct InspectReportView<'a> {
    report: &'a InspectReport,
    painter: &'a Painter,
}

impl<'a> InspectReportView<'a> {
    pub(crate) fn new(report: &'a InspectReport, painter: &'a Painter) -> Self {
        Self { report, painter }
    }

    fn verdict(&self) -> String {
        let text = self.report.verdict.to_string();
        match self.report.verdict {
            Verdict::Supported => self.painter.success(text),
            Verdict::NotSupported => self.painter.failure(text),
            Verdict::Unreachable => self.painter.warning(text),
        }
    }

    fn session_table(&self) -> Table {
        let transitions = self
            .report
            .transitions
            .iter()
            .map(|state| self.painter.state(*state))
            .collect::<Vec<_>>()
            .join(" → ");
        let button = match self.report.button {
            Some(pressed) => self.painter.switch(pressed, "pressed", "released"),
            None => self.painter.muted("<unknown>"),
        };

        Table::key_value(
            self.painter,
            vec![
                ("verdict", self.verdict()),
                ("transitions", transitions),
                ("button", button),
            ],
        )
    }

    fn endpoint_table(&self) -> Table {
        let rows = self
            .report
            .profile
            .endpoints()
            .into_iter()
            .map(|(endpoint, uuid)| {
                let found = find_endpoint(&self.report.services, uuid);
                vec![
                    endpoint.to_string(),
                    self.painter.value(uuid.to_string()),
                    self.painter.switch(found, "present", "missing"),
                ]
            })
            .collect();
        Table::grid(["endpoint", "uuid", "status"], rows)
    }

    fn service_table(&self) -> Table {
        let rows = self
            .report
            .services
            .iter()
            .flat_map(|service| {
                service.characteristics().iter().map(move |characteristic| {
                    let properties = characteristic
                        .properties()
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(",");
                    vec![
                        service.uuid().to_string(),
                        characteristic.uuid().to_string(),
                        properties,
                    ]
                })
            })
            .collect();
        Table::grid(["service", "characteristic", "properties"], rows)
    }
}

fn find_endpoint(services: &[ServiceInfo], uuid: uuid::Uuid) -> bool {
    services.iter().any(|service| {
        service.uuid() == uuid || service.characteristic(uuid).is_some()
    })
}

impl Display for InspectReportView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.painter.heading("Device:"))?;
        write!(f, "\n{}", DeviceView::new(&self.report.device, self.painter))?;
        write!(f, "\n\n{}", self.painter.heading("Session:"))?;
        write!(f, "\n{}", self.session_table())?;
        write!(f, "\n\n{}", self.painter.heading("Profile endpoints:"))?;
        write!(f, "\n{}", self.endpoint_table())?;

        if self.report.services.is_empty() {
            write!(f, "\n\n{}", self.painter.muted("No services discovered."))
        } else {
            write!(f, "\n\n{}", self.painter.heading("Discovered services:"))?;
            write!(f, "\n{}", self.service_table())
        }
    }
}
