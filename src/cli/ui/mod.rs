mod control_view;
mod device_view;
mod inspect_view;
mod painter;
mod spinner;
mod table;
mod watch_view;

pub(crate) use self::control_view::ControlReportView;
pub(crate) use self::inspect_view::InspectReportView;
pub(crate) use self::painter::Painter;
pub(crate) use self::spinner::Spinner;
pub(crate) use self::watch_view::{WatchEventView, WatchSummaryView};
