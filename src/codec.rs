use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::profile::{COMMAND_COUNT, CommandTable};

const OFF: u8 = 0x00;
const ON: u8 = 0x01;

/// Payloads that could not be decoded into a domain value.
///
/// Invalid data is logged and dropped; it never changes published state.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum InvalidData {
    #[error("expected a single byte, got {} bytes ({})", .payload.len(), hex::encode(.payload))]
    WrongLength { payload: Vec<u8> },
    #[error("unexpected state byte {value:#04x}")]
    UnknownValue { value: u8 },
    #[error("acknowledgement echoed {actual} but {expected} was written")]
    EchoMismatch { expected: bool, actual: bool },
}

/// Validated numbered command identifier in `0..=9`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, derive_more::Display)]
#[serde(transparent)]
pub struct CommandId(u8);

/// Errors returned when constructing a [`CommandId`].
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum CommandIdError {
    #[error("command id {value} is outside {min}..={max}")]
    OutOfRange { value: u8, min: u8, max: u8 },
}

impl CommandId {
    /// Creates a command id.
    ///
    /// ```
    /// assert!(blinky::CommandId::new(9).is_ok());
    /// assert!(blinky::CommandId::new(10).is_err());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not in `0..=9`.
    pub fn new(value: u8) -> Result<Self, CommandIdError> {
        if usize::from(value) >= COMMAND_COUNT {
            return Err(CommandIdError::OutOfRange {
                value,
                min: 0,
                max: 9,
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }

    /// Iterates every command id in ascending order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0u8..10).map(Self)
    }
}

impl TryFrom<u8> for CommandId {
    type Error = CommandIdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Encodes control payloads and decodes telemetry and acknowledgement payloads.
pub struct DataCodec;

impl DataCodec {
    /// Decodes a button telemetry payload into `true` when pressed.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidData`] unless the payload is exactly `0x00` or `0x01`.
    #[instrument(skip(payload), level = "trace", fields(payload = %hex::encode(payload)))]
    pub fn decode_button(payload: &[u8]) -> Result<bool, InvalidData> {
        decode_state_byte(payload)
    }

    /// Encodes an LED command.
    #[must_use]
    pub fn encode_led(on: bool) -> [u8; 1] {
        if on { [ON] } else { [OFF] }
    }

    /// Decodes an LED write acknowledgement and checks it echoes the value
    /// that was written.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidData`] when the echo is malformed or disagrees with
    /// `written`.
    #[instrument(skip(payload), level = "trace", fields(payload = %hex::encode(payload)))]
    pub fn decode_led_ack(written: bool, payload: &[u8]) -> Result<bool, InvalidData> {
        let echoed = decode_state_byte(payload)?;
        if echoed != written {
            return Err(InvalidData::EchoMismatch {
                expected: written,
                actual: echoed,
            });
        }
        Ok(echoed)
    }

    /// Returns the fixed payload for a numbered command.
    #[must_use]
    pub fn encode_command(table: &CommandTable, id: CommandId) -> Vec<u8> {
        table.payload(id).to_vec()
    }
}

fn decode_state_byte(payload: &[u8]) -> Result<bool, InvalidData> {
    let [value] = payload else {
        return Err(InvalidData::WrongLength {
            payload: payload.to_vec(),
        });
    };

    match *value {
        OFF => Ok(false),
        ON => Ok(true),
        other => Err(InvalidData::UnknownValue { value: other }),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(&[0x00], false)]
    #[case(&[0x01], true)]
    fn decode_button_maps_state_bytes(#[case] payload: &[u8], #[case] expected: bool) {
        let pressed = DataCodec::decode_button(payload).expect("state byte should decode");
        assert_eq!(expected, pressed);
    }

    #[rstest]
    #[case(&[])]
    #[case(&[0x01, 0x00])]
    #[case(b"MUIS")]
    fn decode_button_rejects_wrong_length(#[case] payload: &[u8]) {
        let result = DataCodec::decode_button(payload);
        assert_matches!(result, Err(InvalidData::WrongLength { payload: rejected }) if rejected == payload);
    }

    #[test]
    fn decode_button_rejects_unknown_value() {
        let result = DataCodec::decode_button(&[0x02]);
        assert_matches!(result, Err(InvalidData::UnknownValue { value: 0x02 }));
    }

    #[test]
    fn encode_led_uses_single_state_byte() {
        assert_eq!([0x01], DataCodec::encode_led(true));
        assert_eq!([0x00], DataCodec::encode_led(false));
    }

    #[test]
    fn led_ack_must_echo_written_value() {
        assert_eq!(Ok(true), DataCodec::decode_led_ack(true, &[0x01]));
        assert_matches!(
            DataCodec::decode_led_ack(true, &[0x00]),
            Err(InvalidData::EchoMismatch {
                expected: true,
                actual: false
            })
        );
        assert_matches!(
            DataCodec::decode_led_ack(false, &[0x07]),
            Err(InvalidData::UnknownValue { value: 0x07 })
        );
    }

    #[test]
    fn command_payloads_are_distinct_per_id() {
        let table = CommandTable::default();
        let payloads: Vec<Vec<u8>> = CommandId::all()
            .map(|id| DataCodec::encode_command(&table, id))
            .collect();

        assert_eq!(10, payloads.len());
        for (index, payload) in payloads.iter().enumerate() {
            assert!(
                payloads[index + 1..].iter().all(|other| other != payload),
                "payload for command {index} is repeated"
            );
        }
    }

    #[test]
    fn command_id_rejects_values_outside_range() {
        assert_matches!(
            CommandId::new(10),
            Err(CommandIdError::OutOfRange {
                value: 10,
                min: 0,
                max: 9
            })
        );
        assert_eq!(Ok(CommandId(0)), CommandId::try_from(0));
    }
}
