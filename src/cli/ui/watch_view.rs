use std::fmt::{self, Display, Formatter};

use crate::cli::report::{WatchEvent, WatchEventKind, WatchSummary};

use super::device_view::DeviceView;
use super::painter::Painter;
use super::table::Table;

/// Renders one `watch` event line.
pub(crate) struct WatchEventView<'a> {
    event: &'a WatchEvent,
    painter: &'a Painter,
}

impl<'a> WatchEventView<'a> {
    pub(crate) fn new(event: &'a WatchEvent, painter: &'a Painter) -> Self {
        Self { event, painter }
    }
}

impl Display for WatchEventView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let at = self.event.at;
        let clock = format!("{:02}:{:02}:{:02}", at.hour(), at.minute(), at.second());
        let (label, value) = match self.event.event {
            WatchEventKind::Connection { state } => ("connection", self.painter.state(state)),
            WatchEventKind::Led { on } => ("led", self.painter.switch(on, "on", "off")),
            WatchEventKind::Button { pressed } => {
                ("button", self.painter.switch(pressed, "pressed", "released"))
            }
        };
        write!(
            f,
            "{} {} {:<10} {value}",
            self.painter.muted(clock),
            self.painter.muted(format!("#{:<3}", self.event.index)),
            label,
        )
    }
}

/// Renders the final `watch` summary.
pub(crate) struct WatchSummaryView<'a> {
    summary: &'a WatchSummary,
    painter: &'a Painter,
}

impl<'a> WatchSummaryView<'a> {
    pub(crate) fn new(summary: &'a WatchSummary, painter: &'a Painter) -> Self {
        Self { summary, painter }
    }
}

impl Display for WatchSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            vec![
                ("events", self.painter.value(self.summary.events.to_string())),
                ("stopped", self.painter.value(self.summary.stop_reason.to_string())),
            ],
        );
        write!(f, "{}", self.painter.heading("Watch summary:"))?;
        write!(f, "\n{}", DeviceView::new(&self.summary.device, self.painter))?;
        write!(f, "\n{table}")
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::session::ConnectionState;

    #[rstest]
    #[case(WatchEventKind::Button { pressed: true }, "button", "pressed")]
    #[case(WatchEventKind::Led { on: false }, "led", "off")]
    #[case(WatchEventKind::Connection { state: ConnectionState::Ready }, "connection", "ready")]
    fn event_line_names_kind_and_value(
        #[case] kind: WatchEventKind,
        #[case] label: &str,
        #[case] value: &str,
    ) {
        let event = WatchEvent::now(0, kind);
        let line = WatchEventView::new(&event, &Painter::new(false)).to_string();

        assert!(line.contains(label), "{line}");
        assert!(line.ends_with(value), "{line}");
        assert!(line.contains("#0"), "{line}");
    }
}
