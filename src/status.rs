use crate::types::{Field, Reading, StatusColor, StatusLine};

/// Shown whenever there is no link to the treadmill
pub const NOT_CONNECTED_TEXT: &str = "Treadmill not connected.";

/// Shown after the poll loop stopped on a failure
pub const ERROR_TEXT: &str = "Error reading treadmill data.";

/// Status line for a session without a link
#[must_use]
pub fn not_connected() -> StatusLine {
    StatusLine::new(NOT_CONNECTED_TEXT, StatusColor::NotConnected)
}

/// Status line for a session whose poll loop has stopped
#[must_use]
pub fn error() -> StatusLine {
    StatusLine::new(ERROR_TEXT, StatusColor::Error)
}

/// Status line showing telemetry
///
/// `speed_hint` replaces the instantaneous speed when a speed change has been
/// sent but not yet confirmed by the device.
#[must_use]
pub fn telemetry(format: &str, reading: &Reading, speed_hint: Option<u16>) -> StatusLine {
    let mut reading = reading.clone();
    if let Some(speed) = speed_hint {
        reading.insert(Field::InstantaneousSpeed, i32::from(speed));
    }
    StatusLine::new(render(format, &reading), StatusColor::Normal)
}

/// Substitute `{field_name}` placeholders with reading values
///
/// Speeds are rendered in km/h with both reported decimals, everything else as the raw
/// integer. Placeholders for absent fields render empty; unknown names are
/// left untouched. The result is trimmed.
#[must_use]
pub fn render(format: &str, reading: &Reading) -> String {
    let mut out = String::with_capacity(format.len());
    let mut rest = format;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            rest = "";
            break;
        };

        let name = &after[..close];
        match Field::from_name(name) {
            Some(field) => {
                if let Some(value) = reading.get(field) {
                    out.push_str(&format_value(field, value));
                }
            }
            None => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out.trim().to_string()
}

fn format_value(field: Field, value: i32) -> String {
    if field.is_speed() {
        let sign = if value < 0 { "-" } else { "" };
        let hundredths = value.unsigned_abs();
        format!("{sign}{}.{:02}", hundredths / 100, hundredths % 100)
    } else {
        value.to_string()
    }
}
