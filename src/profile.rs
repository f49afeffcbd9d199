use std::fs;
use std::path::{Path, PathBuf};

use bon::Builder;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::hex::Hex;
use serde_with::serde_as;
use strum_macros::{Display, EnumIter};
use tracing::{debug, instrument};
use uuid::{Uuid, uuid};

use crate::codec::CommandId;
use crate::error::ProfileError;

/// Blinky service exposed by the reference peripheral firmware.
pub const BLINKY_SERVICE_UUID: Uuid = uuid!("00010000-89bd-43c8-9231-40f6e305f96d");
/// Button telemetry characteristic (read + notify).
pub const BLINKY_TELEMETRY_UUID: Uuid = uuid!("00010010-89bd-43c8-9231-40f6e305f96d");
/// LED / command control characteristic (write).
pub const BLINKY_CONTROL_UUID: Uuid = uuid!("00010001-89bd-43c8-9231-40f6e305f96d");

/// Nordic LED Button Service.
pub const NORDIC_LBS_SERVICE_UUID: Uuid = uuid!("00001523-1212-efde-1523-785feabcd123");
/// Nordic LBS button characteristic.
pub const NORDIC_LBS_BUTTON_UUID: Uuid = uuid!("00001524-1212-efde-1523-785feabcd123");
/// Nordic LBS LED characteristic.
pub const NORDIC_LBS_LED_UUID: Uuid = uuid!("00001525-1212-efde-1523-785feabcd123");

/// Number of numbered commands in a command table.
pub const COMMAND_COUNT: usize = 10;

const PROFILE_FILE_NAME: &str = "profile.json";

/// Profile endpoints the session resolves during capability negotiation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointId {
    /// Primary service holding both characteristics.
    #[strum(to_string = "service")]
    Service,
    /// Button state, read and notified by the peripheral.
    #[strum(to_string = "telemetry")]
    Telemetry,
    /// LED and numbered command writes.
    #[strum(to_string = "control")]
    Control,
}

/// Fixed payloads for the ten numbered commands, indexed by command id.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CommandTable {
    payloads: Vec<Vec<u8>>,
}

impl CommandTable {
    /// Builds a command table after checking the payloads are usable.
    ///
    /// # Errors
    ///
    /// Returns an error unless there are exactly ten non-empty payloads of the
    /// same length, all distinct.
    pub fn new(payloads: Vec<Vec<u8>>) -> Result<Self, ProfileError> {
        if payloads.len() != COMMAND_COUNT {
            return Err(ProfileError::CommandCount {
                expected: COMMAND_COUNT,
                found: payloads.len(),
            });
        }

        let expected = payloads[0].len();
        for (id, payload) in (0u8..).zip(&payloads) {
            if payload.is_empty() {
                return Err(ProfileError::EmptyCommand { id });
            }
            if payload.len() != expected {
                return Err(ProfileError::CommandLength {
                    id,
                    expected,
                    found: payload.len(),
                });
            }
        }

        for (first, left) in (0u8..).zip(&payloads) {
            for (second, right) in (0u8..).zip(&payloads).skip(usize::from(first) + 1) {
                if left == right {
                    return Err(ProfileError::DuplicateCommand { first, second });
                }
            }
        }

        Ok(Self { payloads })
    }

    /// Returns the payload for one command.
    #[must_use]
    pub fn payload(&self, id: CommandId) -> &[u8] {
        &self.payloads[usize::from(id.get())]
    }
}

impl Default for CommandTable {
    /// ASCII `BT0` … `BT9`.
    fn default() -> Self {
        let payloads = (0u8..10).map(|id| vec![b'B', b'T', b'0' + id]).collect();
        Self { payloads }
    }
}

/// Identifiers and payloads that define the peripheral profile.
///
/// ```
/// let profile = blinky::ProfileDescriptor::builder()
///     .service(blinky::NORDIC_LBS_SERVICE_UUID)
///     .telemetry(blinky::NORDIC_LBS_BUTTON_UUID)
///     .control(blinky::NORDIC_LBS_LED_UUID)
///     .build();
/// assert_eq!(blinky::NORDIC_LBS_LED_UUID, profile.control());
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Builder)]
pub struct ProfileDescriptor {
    service: Uuid,
    telemetry: Uuid,
    control: Uuid,
    #[builder(default)]
    commands: CommandTable,
}

impl ProfileDescriptor {
    /// The profile exposed by the reference Blinky firmware.
    #[must_use]
    pub fn blinky() -> Self {
        Self::builder()
            .service(BLINKY_SERVICE_UUID)
            .telemetry(BLINKY_TELEMETRY_UUID)
            .control(BLINKY_CONTROL_UUID)
            .build()
    }

    /// The stock Nordic LED Button Service profile.
    #[must_use]
    pub fn nordic_led_button() -> Self {
        Self::builder()
            .service(NORDIC_LBS_SERVICE_UUID)
            .telemetry(NORDIC_LBS_BUTTON_UUID)
            .control(NORDIC_LBS_LED_UUID)
            .build()
    }

    #[must_use]
    pub fn service(&self) -> Uuid {
        self.service
    }

    #[must_use]
    pub fn telemetry(&self) -> Uuid {
        self.telemetry
    }

    #[must_use]
    pub fn control(&self) -> Uuid {
        self.control
    }

    #[must_use]
    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    /// Returns the configured UUID for one endpoint.
    #[must_use]
    pub fn uuid_for(&self, endpoint: EndpointId) -> Uuid {
        match endpoint {
            EndpointId::Service => self.service,
            EndpointId::Telemetry => self.telemetry,
            EndpointId::Control => self.control,
        }
    }

    /// Loads a profile from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// contains an invalid command table.
    #[instrument(level = "debug")]
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parses a profile from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the command table is
    /// invalid.
    pub fn from_json(raw: &str) -> Result<Self, ProfileError> {
        let file: ProfileFile = serde_json::from_str(raw)?;
        let commands = match file.commands {
            Some(payloads) => CommandTable::new(payloads)?,
            None => CommandTable::default(),
        };

        Ok(Self {
            service: file.service,
            telemetry: file.telemetry,
            control: file.control,
            commands,
        })
    }

    /// Uses the explicit profile file when given, else the per-user profile
    /// file when it exists, else the Blinky profile.
    ///
    /// # Errors
    ///
    /// Returns an error if a selected profile file fails to load.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ProfileError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match default_profile_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => {
                debug!("no profile file found, using the Blinky profile");
                Ok(Self::blinky())
            }
        }
    }
}

/// Default per-user location of the profile file.
#[must_use]
pub fn default_profile_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "blinky").map(|dirs| dirs.config_dir().join(PROFILE_FILE_NAME))
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileFile {
    service: Uuid,
    telemetry: Uuid,
    control: Uuid,
    #[serde_as(as = "Option<Vec<Hex>>")]
    #[serde(default)]
    commands: Option<Vec<Vec<u8>>>,
}
