use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::{
    error::DecodeError,
    types::{Command, Field, Reading},
};

/// Treadmill Data flag bits (bits 0-7 from the first byte, 8-15 from the second)
///
/// Bit 0 ("more data") has no constant: the supported treadmills always send
/// the instantaneous speed, so the decoder never looks at it.
pub mod flags {
    /// Average speed present
    pub const AVERAGE_SPEED: u16 = 0x0002;
    /// Total distance present
    pub const TOTAL_DISTANCE: u16 = 0x0004;
    /// Inclination and ramp angle present
    pub const INCLINATION: u16 = 0x0008;
    /// Positive and negative elevation gain present
    pub const ELEVATION_GAIN: u16 = 0x0010;
    /// Instantaneous pace present
    pub const INSTANTANEOUS_PACE: u16 = 0x0020;
    /// Average pace present
    pub const AVERAGE_PACE: u16 = 0x0040;
    /// Total energy, energy per hour and energy per minute present
    pub const EXPENDED_ENERGY: u16 = 0x0080;
    /// Heart rate present
    pub const HEART_RATE: u16 = 0x0100;
    /// Metabolic equivalent present
    pub const METABOLIC_EQUIVALENT: u16 = 0x0200;
    /// Elapsed time present
    pub const ELAPSED_TIME: u16 = 0x0400;
    /// Remaining time present
    pub const REMAINING_TIME: u16 = 0x0800;
    /// Force on belt and power output present
    pub const FORCE_ON_BELT: u16 = 0x1000;
}

/// Fitness Machine Control Point op codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlOpCode {
    /// Set target speed, followed by a little-endian u16
    SetTargetSpeed = 0x02,
    /// Start or resume
    StartOrResume = 0x07,
    /// Stop or pause, followed by a [`StopPauseParam`]
    StopOrPause = 0x08,
}

/// Parameter of the stop-or-pause op code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StopPauseParam {
    /// Stop the belt
    Stop = 0x01,
    /// Pause the belt
    Pause = 0x02,
}

/// Longest encoded control point command
pub const MAX_COMMAND_SIZE: usize = 3;

#[derive(Debug, Clone, Copy)]
enum Encoding {
    U8,
    U16,
    S16,
    U24,
}

impl Encoding {
    const fn width(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 | Self::S16 => 2,
            Self::U24 => 3,
        }
    }
}

struct FieldGroup {
    flag: u16,
    fields: &'static [(Field, Encoding)],
}

/// Optional fields following the mandatory speed, in wire order
const FIELD_GROUPS: [FieldGroup; 12] = [
    FieldGroup {
        flag: flags::AVERAGE_SPEED,
        fields: &[(Field::AverageSpeed, Encoding::U16)],
    },
    FieldGroup {
        flag: flags::TOTAL_DISTANCE,
        fields: &[(Field::TotalDistance, Encoding::U24)],
    },
    FieldGroup {
        flag: flags::INCLINATION,
        fields: &[
            (Field::Inclination, Encoding::S16),
            (Field::RampAngle, Encoding::S16),
        ],
    },
    FieldGroup {
        flag: flags::ELEVATION_GAIN,
        fields: &[
            (Field::ElevationGain, Encoding::U16),
            (Field::NegativeElevationGain, Encoding::U16),
        ],
    },
    FieldGroup {
        flag: flags::INSTANTANEOUS_PACE,
        fields: &[(Field::InstantaneousPace, Encoding::U8)],
    },
    FieldGroup {
        flag: flags::AVERAGE_PACE,
        fields: &[(Field::AveragePace, Encoding::U8)],
    },
    FieldGroup {
        flag: flags::EXPENDED_ENERGY,
        fields: &[
            (Field::ExpendedEnergy, Encoding::U16),
            (Field::EnergyPerHour, Encoding::U16),
            (Field::EnergyPerMinute, Encoding::U8),
        ],
    },
    FieldGroup {
        flag: flags::HEART_RATE,
        fields: &[(Field::HeartRate, Encoding::U8)],
    },
    FieldGroup {
        flag: flags::METABOLIC_EQUIVALENT,
        fields: &[(Field::MetabolicEquivalent, Encoding::U8)],
    },
    FieldGroup {
        flag: flags::ELAPSED_TIME,
        fields: &[(Field::ElapsedTime, Encoding::U16)],
    },
    FieldGroup {
        flag: flags::REMAINING_TIME,
        fields: &[(Field::RemainingTime, Encoding::U16)],
    },
    FieldGroup {
        flag: flags::FORCE_ON_BELT,
        fields: &[
            (Field::ForceOnBelt, Encoding::S16),
            (Field::PowerOutput, Encoding::S16),
        ],
    },
];

/// Decode a Treadmill Data (0x2ACD) notification
///
/// Record layout as sent by the supported treadmills:
/// - Byte 0: flags bits 0-7
/// - Byte 1: flags bits 8-15
/// - Bytes 2-3: instantaneous speed (u16 little-endian, 0.01 km/h), always
///   present regardless of the "more data" bit
/// - Remaining bytes: optional fields in fixed order, each present only when
///   its flag bit is set (see [`flags`])
///
/// Trailing bytes after the last announced field are ignored.
///
/// # Errors
///
/// Returns [`DecodeError::TooShort`] if the record cannot hold the flags, or
/// [`DecodeError::Truncated`] if a field announced by the flags is cut off.
/// No partial reading is ever returned.
pub fn decode_treadmill_data(data: &[u8]) -> Result<Reading, DecodeError> {
    if data.len() < 2 {
        return Err(DecodeError::TooShort { len: data.len() });
    }

    let mut buf = data;
    let flags_lo = buf.get_u8();
    let flags_hi = buf.get_u8();
    let flags = u16::from_le_bytes([flags_lo, flags_hi]);

    let mut reading = Reading::default();
    let speed = read_field(&mut buf, Field::InstantaneousSpeed, Encoding::U16)?;
    reading.insert(Field::InstantaneousSpeed, speed);

    for group in FIELD_GROUPS.iter().filter(|group| flags & group.flag != 0) {
        for &(field, encoding) in group.fields {
            let value = read_field(&mut buf, field, encoding)?;
            reading.insert(field, value);
        }
    }

    Ok(reading)
}

fn read_field(buf: &mut &[u8], field: Field, encoding: Encoding) -> Result<i32, DecodeError> {
    let needed = encoding.width();
    if buf.remaining() < needed {
        return Err(DecodeError::Truncated {
            field,
            needed,
            remaining: buf.remaining(),
        });
    }

    let value = match encoding {
        Encoding::U8 => i32::from(buf.get_u8()),
        Encoding::U16 => i32::from(buf.get_u16_le()),
        Encoding::S16 => i32::from(buf.get_i16_le()),
        Encoding::U24 => {
            let mut raw = [0u8; 4];
            buf.copy_to_slice(&mut raw[..3]);
            i32::from_le_bytes(raw)
        }
    };

    Ok(value)
}

/// Encode a reading as a Treadmill Data notification
///
/// Inverse of [`decode_treadmill_data`]: a flag is set for every group with
/// at least one field present, and a missing partner inside a group is sent
/// as zero. Values are truncated to their wire width. Useful for simulated
/// devices.
#[must_use]
pub fn encode_treadmill_data(reading: &Reading) -> Bytes {
    let flags = FIELD_GROUPS
        .iter()
        .filter(|group| group.fields.iter().any(|(field, _)| reading.contains(*field)))
        .fold(0u16, |acc, group| acc | group.flag);

    let mut buf = BytesMut::with_capacity(32);
    buf.put_u16_le(flags);
    buf.put_u16_le(reading.instantaneous_speed());

    for group in FIELD_GROUPS.iter().filter(|group| flags & group.flag != 0) {
        for &(field, encoding) in group.fields {
            let value = reading.get(field).unwrap_or(0);
            buf.put_slice(&value.to_le_bytes()[..encoding.width()]);
        }
    }

    buf.freeze()
}

impl Command {
    /// Serialize the command for the Fitness Machine Control Point
    ///
    /// | Command | Bytes |
    /// |---|---|
    /// | Resume | `07` |
    /// | Pause | `08 02` |
    /// | Stop | `08 01` |
    /// | `SetSpeed(v)` | `02 lo(v) hi(v)` |
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MAX_COMMAND_SIZE);

        match *self {
            Self::Resume => buf.put_u8(ControlOpCode::StartOrResume as u8),
            Self::Pause => {
                buf.put_u8(ControlOpCode::StopOrPause as u8);
                buf.put_u8(StopPauseParam::Pause as u8);
            }
            Self::Stop => {
                buf.put_u8(ControlOpCode::StopOrPause as u8);
                buf.put_u8(StopPauseParam::Stop as u8);
            }
            Self::SetSpeed(speed) => {
                buf.put_u8(ControlOpCode::SetTargetSpeed as u8);
                buf.put_u16_le(speed);
            }
        }

        buf.freeze()
    }
}

/// Check whether a full 128-bit UUID carries the given GATT short UUID
///
/// Compares the first four octets only (`0000xxxx`), which is how the
/// supported devices are matched regardless of the base UUID they report.
#[must_use]
pub const fn matches_short_uuid(uuid: &Uuid, short: u16) -> bool {
    (uuid.as_u128() >> 96) as u32 == short as u32
}
