use std::fmt::{self, Display, Formatter};

use crate::cli::report::{ControlAction, ControlOutcome, ControlReport};

use super::device_view::DeviceView;
use super::painter::Painter;
use super::table::Table;

/// Renders the result of `led` and `command`.
pub(crate) struct ControlReportView<'a> {
    report: &'a ControlReport,
    painter: &'a Painter,
}

impl<'a> ControlReportView<'a> {
    pub(crate) fn new(report: &'a ControlReport, painter: &'a Painter) -> Self {
        Self { report, painter }
    }
}

impl Display for ControlReportView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let request = match self.report.request {
            ControlAction::Led { on } => format!("led {}", if on { "on" } else { "off" }),
            ControlAction::Command { id } => format!("command {id}"),
        };
        let result = match &self.report.result {
            ControlOutcome::Acknowledged { ack } => {
                format!("{} {}", self.painter.success("acknowledged"), self.painter.muted(ack))
            }
            ControlOutcome::Skipped => self.painter.warning("skipped (already in that state)"),
        };
        let table = Table::key_value(
            self.painter,
            vec![
                ("request", self.painter.value(request)),
                ("result", result),
                ("led", self.painter.switch(self.report.led, "on", "off")),
            ],
        );

        write!(f, "{}", self.painter.heading("Device:"))?;
        write!(f, "\n{}", DeviceView::new(&self.report.device, self.painter))?;
        write!(f, "\n\n{}", self.painter.heading("Control:"))?;
        write!(f, "\n{table}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::DeviceIdentity;

    #[test]
    fn skipped_led_request_is_reported() {
        let report = ControlReport {
            device: DeviceIdentity::new("AA:BB"),
            request: ControlAction::Led { on: false },
            result: ControlOutcome::Skipped,
            led: false,
        };
        let rendered = ControlReportView::new(&report, &Painter::new(false)).to_string();

        assert!(rendered.contains("led off"));
        assert!(rendered.contains("skipped"));
    }
}
