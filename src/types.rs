use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, time::Duration};
use tokio::time::Instant;
use uuid::Uuid;

use crate::DEFAULT_DEVICE_NAME;

/// A field of the FTMS Treadmill Data characteristic
///
/// Variants are declared in wire order, so iterating a [`Reading`] yields
/// fields in the order they appear in the notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Instantaneous speed, hundredths of km/h
    InstantaneousSpeed,
    /// Average speed, hundredths of km/h
    AverageSpeed,
    /// Total distance, meters (24-bit)
    TotalDistance,
    /// Inclination, raw signed device units
    Inclination,
    /// Ramp angle setting, raw signed device units
    RampAngle,
    /// Positive elevation gain
    ElevationGain,
    /// Negative elevation gain
    NegativeElevationGain,
    /// Instantaneous pace
    InstantaneousPace,
    /// Average pace
    AveragePace,
    /// Total expended energy
    ExpendedEnergy,
    /// Energy per hour
    EnergyPerHour,
    /// Energy per minute
    EnergyPerMinute,
    /// Heart rate, beats per minute
    HeartRate,
    /// Metabolic equivalent
    MetabolicEquivalent,
    /// Elapsed time, seconds
    ElapsedTime,
    /// Remaining time, seconds
    RemainingTime,
    /// Force on belt
    ForceOnBelt,
    /// Power output
    PowerOutput,
}

impl Field {
    /// Every field, in wire order
    pub const ALL: [Self; 18] = [
        Self::InstantaneousSpeed,
        Self::AverageSpeed,
        Self::TotalDistance,
        Self::Inclination,
        Self::RampAngle,
        Self::ElevationGain,
        Self::NegativeElevationGain,
        Self::InstantaneousPace,
        Self::AveragePace,
        Self::ExpendedEnergy,
        Self::EnergyPerHour,
        Self::EnergyPerMinute,
        Self::HeartRate,
        Self::MetabolicEquivalent,
        Self::ElapsedTime,
        Self::RemainingTime,
        Self::ForceOnBelt,
        Self::PowerOutput,
    ];

    /// Snake-case field name, as used in status format templates
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InstantaneousSpeed => "instantaneous_speed",
            Self::AverageSpeed => "average_speed",
            Self::TotalDistance => "total_distance",
            Self::Inclination => "inclination",
            Self::RampAngle => "ramp_angle",
            Self::ElevationGain => "elevation_gain",
            Self::NegativeElevationGain => "negative_elevation_gain",
            Self::InstantaneousPace => "instantaneous_pace",
            Self::AveragePace => "average_pace",
            Self::ExpendedEnergy => "expended_energy",
            Self::EnergyPerHour => "energy_per_hour",
            Self::EnergyPerMinute => "energy_per_minute",
            Self::HeartRate => "heart_rate",
            Self::MetabolicEquivalent => "metabolic_equivalent",
            Self::ElapsedTime => "elapsed_time",
            Self::RemainingTime => "remaining_time",
            Self::ForceOnBelt => "force_on_belt",
            Self::PowerOutput => "power_output",
        }
    }

    /// Look up a field by its snake-case name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.name() == name)
    }

    /// Whether the value is a speed in hundredths of km/h
    #[must_use]
    pub const fn is_speed(self) -> bool {
        matches!(self, Self::InstantaneousSpeed | Self::AverageSpeed)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded Treadmill Data notification
///
/// A sparse map from [`Field`] to its raw value. A field is present exactly
/// when the flags of the record that produced it announced it; absent fields
/// never appear. Every value fits an `i32` (the widest is the unsigned
/// 24-bit distance).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reading {
    fields: BTreeMap<Field, i32>,
}

impl Reading {
    /// Create a reading holding only the instantaneous speed
    #[must_use]
    pub fn new(instantaneous_speed: u16) -> Self {
        let mut reading = Self::default();
        reading.insert(Field::InstantaneousSpeed, i32::from(instantaneous_speed));
        reading
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, field: Field, value: i32) -> Self {
        self.insert(field, value);
        self
    }

    /// Set a field value
    pub fn insert(&mut self, field: Field, value: i32) {
        self.fields.insert(field, value);
    }

    /// Get a field value if present
    #[must_use]
    pub fn get(&self, field: Field) -> Option<i32> {
        self.fields.get(&field).copied()
    }

    /// Whether the field is present
    #[must_use]
    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    /// Instantaneous speed in hundredths of km/h, zero if absent
    #[must_use]
    pub fn instantaneous_speed(&self) -> u16 {
        self.get(Field::InstantaneousSpeed)
            .and_then(|speed| u16::try_from(speed).ok())
            .unwrap_or(0)
    }

    /// Number of fields present
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate present fields in wire order
    pub fn iter(&self) -> impl Iterator<Item = (Field, i32)> + '_ {
        self.fields.iter().map(|(field, value)| (*field, *value))
    }
}

/// A Fitness Machine Control Point command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Start or resume the belt
    Resume,
    /// Pause the belt
    Pause,
    /// Stop the belt
    Stop,
    /// Set target speed, hundredths of km/h
    SetSpeed(u16),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resume => write!(f, "Resume"),
            Self::Pause => write!(f, "Pause"),
            Self::Stop => write!(f, "Stop"),
            Self::SetSpeed(speed) => write!(f, "SetSpeed({speed})"),
        }
    }
}

/// Connection and idle state of a treadmill session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No link; the next tick starts scanning
    Disconnected,
    /// Looking for the configured device name
    Scanning,
    /// Establishing the GATT connection
    Connecting,
    /// Locating the control point and treadmill data characteristics
    DiscoveringCharacteristics,
    /// Linked and the belt is moving
    Connected,
    /// Linked but the belt reported zero speed
    Paused {
        /// When the idle timer started
        since: Instant,
    },
    /// Tearing down the link after the idle timeout
    Disconnecting,
    /// Disconnected for inactivity; waits for a Resume command
    Inactive,
}

impl SessionState {
    /// Whether a usable link to the device exists
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Paused { .. })
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::DiscoveringCharacteristics => write!(f, "Discovering Characteristics"),
            Self::Connected => write!(f, "Connected"),
            Self::Paused { .. } => write!(f, "Paused"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Inactive => write!(f, "Inactive"),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Advertised name of the treadmill
    pub device_name: String,
    /// Poll tick cadence in milliseconds
    pub poll_interval_ms: u64,
    /// Zero-speed time after which the link is dropped, in milliseconds
    pub idle_disconnect_timeout_ms: u64,
    /// Scan duration in milliseconds
    pub scan_timeout_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// How long to listen for telemetry each tick, in milliseconds
    pub notification_window_ms: u64,
    /// Speed change per step, hundredths of km/h
    pub speed_step: u16,
    /// Unanticipated failures tolerated in a row before the poll loop stops
    pub max_consecutive_failures: u32,
    /// Status line template; `{field_name}` placeholders are substituted
    pub status_format: String,
}

impl SessionConfig {
    /// Poll tick cadence
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Idle disconnect timeout
    #[must_use]
    pub const fn idle_disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_disconnect_timeout_ms)
    }

    /// Scan duration
    #[must_use]
    pub const fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    /// Connection timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Telemetry read window
    #[must_use]
    pub const fn notification_window(&self) -> Duration {
        Duration::from_millis(self.notification_window_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            poll_interval_ms: 1_000,
            idle_disconnect_timeout_ms: 300_000,
            scan_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
            notification_window_ms: 2_000,
            speed_step: 10,
            max_consecutive_failures: 3,
            status_format: "{instantaneous_speed}km/h {total_distance}m".to_string(),
        }
    }
}

/// Device information gathered while scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Advertised device name
    pub name: String,
    /// Device MAC address
    pub mac_address: Option<String>,
    /// Signal strength (RSSI)
    pub rssi: i16,
}

impl DeviceInfo {
    /// Create new device info
    #[must_use]
    pub const fn new(name: String, rssi: i16) -> Self {
        Self {
            name,
            mac_address: None,
            rssi,
        }
    }
}

/// GATT characteristic property flags relevant to FTMS
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    /// Supports read
    pub read: bool,
    /// Supports acknowledged write
    pub write: bool,
    /// Supports unacknowledged write
    pub write_without_response: bool,
    /// Supports notifications
    pub notify: bool,
}

impl CharacteristicProperties {
    /// Accepts writes of either kind
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.write || self.write_without_response
    }
}

/// A characteristic exposed by a connected device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    /// Full 128-bit characteristic UUID
    pub uuid: Uuid,
    /// Supported operations
    pub properties: CharacteristicProperties,
}

/// Color hint for the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusColor {
    /// Live telemetry
    Normal,
    /// No link to the device
    NotConnected,
    /// The poll loop stopped on a failure
    Error,
}

impl StatusColor {
    /// RGB hex code without a leading `#`
    #[must_use]
    pub const fn hex(self) -> &'static str {
        match self {
            Self::Normal => "E7BA3C",
            Self::NotConnected => "808080",
            Self::Error => "FF0000",
        }
    }
}

/// Human-displayable status plus a color hint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLine {
    /// Display text
    pub text: String,
    /// Color hint
    pub color: StatusColor,
}

impl StatusLine {
    /// Create a status line
    #[must_use]
    pub fn new(text: impl Into<String>, color: StatusColor) -> Self {
        Self {
            text: text.into(),
            color,
        }
    }
}
