use serde::Serialize;
use strum::IntoEnumIterator;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::codec::CommandId;
use crate::hw::{DeviceIdentity, ServiceInfo};
use crate::profile::{EndpointId, ProfileDescriptor};
use crate::session::{ConnectionState, DisconnectReason};

/// Result of the `inspect` command.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct InspectReport {
    pub(crate) device: DeviceIdentity,
    pub(crate) profile: ProfileSummary,
    pub(crate) transitions: Vec<ConnectionState>,
    pub(crate) verdict: Verdict,
    pub(crate) button: Option<bool>,
    pub(crate) services: Vec<ServiceInfo>,
}

/// Capability negotiation outcome reported by `inspect`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Verdict {
    #[display("supported")]
    Supported,
    #[display("not supported")]
    NotSupported,
    #[display("unreachable")]
    Unreachable,
}

impl Verdict {
    pub(crate) fn from_settled(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Ready => Self::Supported,
            ConnectionState::Disconnected {
                reason: DisconnectReason::NotSupported,
            } => Self::NotSupported,
            _ => Self::Unreachable,
        }
    }
}

/// Endpoint UUIDs of the active profile.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ProfileSummary {
    pub(crate) service: Uuid,
    pub(crate) telemetry: Uuid,
    pub(crate) control: Uuid,
}

impl ProfileSummary {
    pub(crate) fn endpoints(&self) -> Vec<(EndpointId, Uuid)> {
        EndpointId::iter()
            .map(|endpoint| (endpoint, self.uuid(endpoint)))
            .collect()
    }

    fn uuid(&self, endpoint: EndpointId) -> Uuid {
        match endpoint {
            EndpointId::Service => self.service,
            EndpointId::Telemetry => self.telemetry,
            EndpointId::Control => self.control,
        }
    }
}

impl From<&ProfileDescriptor> for ProfileSummary {
    fn from(profile: &ProfileDescriptor) -> Self {
        Self {
            service: profile.service(),
            telemetry: profile.telemetry(),
            control: profile.control(),
        }
    }
}

/// One line of `watch` output.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct WatchEvent {
    pub(crate) index: usize,
    pub(crate) unix_ms: i64,
    pub(crate) event: WatchEventKind,
    #[serde(skip)]
    pub(crate) at: OffsetDateTime,
}

impl WatchEvent {
    pub(crate) fn now(index: usize, event: WatchEventKind) -> Self {
        let at = OffsetDateTime::now_utc();
        let unix_ms = i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX);
        Self {
            index,
            unix_ms,
            event,
            at,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum WatchEventKind {
    Connection { state: ConnectionState },
    Led { on: bool },
    Button { pressed: bool },
}

/// Why `watch` stopped printing events.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub(crate) enum WatchStopReason {
    #[display("event limit reached")]
    Limit,
    #[display("interrupted")]
    Interrupted,
    #[display("disconnected")]
    Disconnected,
}

/// Summary printed when `watch` ends.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct WatchSummary {
    pub(crate) device: DeviceIdentity,
    pub(crate) events: usize,
    pub(crate) stop_reason: WatchStopReason,
}

/// What a control command asked for.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub(crate) enum ControlAction {
    Led { on: bool },
    Command { id: CommandId },
}

/// How a control command ended.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub(crate) enum ControlOutcome {
    /// The write was acknowledged with this payload.
    Acknowledged { ack: String },
    /// Nothing was written because the device already matched.
    Skipped,
}

/// Result of the `led` and `command` commands.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ControlReport {
    pub(crate) device: DeviceIdentity,
    pub(crate) request: ControlAction,
    pub(crate) result: ControlOutcome,
    pub(crate) led: bool,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case(ConnectionState::Ready, Verdict::Supported)]
    #[case(ConnectionState::Disconnected { reason: DisconnectReason::NotSupported }, Verdict::NotSupported)]
    #[case(ConnectionState::Disconnected { reason: DisconnectReason::Other }, Verdict::Unreachable)]
    fn verdict_follows_the_settled_state(#[case] state: ConnectionState, #[case] expected: Verdict) {
        assert_eq!(expected, Verdict::from_settled(state));
    }

    #[test]
    fn watch_events_serialise_with_tagged_kinds() {
        let event = WatchEvent::now(
            3,
            WatchEventKind::Connection {
                state: ConnectionState::Disconnected {
                    reason: DisconnectReason::Other,
                },
            },
        );
        let value = serde_json::to_value(&event).expect("event should serialise");

        assert_eq!(
            json!({"kind": "connection", "state": {"state": "disconnected", "reason": "other"}}),
            value["event"]
        );
        assert_eq!(json!(3), value["index"]);
    }

    #[test]
    fn control_report_serialises_request_and_result() {
        let report = ControlReport {
            device: DeviceIdentity::new("AA:BB"),
            request: ControlAction::Command {
                id: CommandId::new(4).expect("4 is a valid command id"),
            },
            result: ControlOutcome::Acknowledged {
                ack: "425434".into(),
            },
            led: false,
        };
        let value = serde_json::to_value(&report).expect("report should serialise");

        assert_eq!(json!({"action": "command", "id": 4}), value["request"]);
        assert_eq!(json!({"outcome": "acknowledged", "ack": "425434"}), value["result"]);
    }
}
