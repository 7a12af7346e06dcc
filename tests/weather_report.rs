//! Weather report assembly and the outgoing channel-text command.

use std::collections::HashMap;

use meshbridge::protocol::{channel_text_payload, FrameCodec};
use meshbridge::weather::{compass_point, format_report, Reading, SensorKey};

fn reading(state: &str, unit: &str) -> Reading {
    Reading {
        state: state.to_string(),
        unit: unit.to_string(),
    }
}

#[test]
fn compass_conversion_table() {
    for (bearing, expected) in [
        ("0", "N"),
        ("22", "NNE"),
        ("45", "NE"),
        ("90", "E"),
        ("135", "SE"),
        ("180", "S"),
        ("225", "SW"),
        ("270", "W"),
        ("315", "NW"),
        ("337.5", "NNW"),
        ("349", "N"),
        ("360", "N"),
    ] {
        assert_eq!(compass_point(bearing), expected, "bearing {bearing}");
    }
    // Non-numeric bearings pass through as-is.
    assert_eq!(compass_point("calm"), "calm");
}

#[test]
fn full_station_report() {
    let mut readings = HashMap::new();
    readings.insert(SensorKey::Temperature, reading("72.3", "°F"));
    readings.insert(SensorKey::Humidity, reading("45", "%"));
    readings.insert(SensorKey::WindSpeed, reading("12", "mph"));
    readings.insert(SensorKey::WindGust, reading("18", "mph"));
    readings.insert(SensorKey::WindBearing, reading("315", "°"));
    readings.insert(SensorKey::Pressure, reading("30.12", "inHg"));
    readings.insert(SensorKey::Uv, reading("4", ""));
    readings.insert(SensorKey::RainRate, reading("0.02", "in/h"));
    readings.insert(SensorKey::RainDaily, reading("0.45", "in"));

    assert_eq!(
        format_report(&readings).unwrap(),
        "WX: 72.3°F 45% NW12G18mph 30.12inHg UV4 0.02in/h 0.45in"
    );
}

#[test]
fn partial_readings_keep_field_order() {
    let mut readings = HashMap::new();
    readings.insert(SensorKey::DewPoint, reading("55", "°F"));
    readings.insert(SensorKey::Temperature, reading("70", "°F"));
    readings.insert(SensorKey::Uv, reading("2", ""));
    // Fixed order regardless of map iteration: temperature, uv, dew point.
    assert_eq!(format_report(&readings).unwrap(), "WX: 70°F UV2 DP55°F");
}

#[test]
fn no_readings_no_broadcast() {
    assert_eq!(format_report(&HashMap::new()), None);
}

#[test]
fn outgoing_command_wire_form() {
    let payload = channel_text_payload(0, 1_700_000_000, "WX: 70°F");
    let wire = FrameCodec::encode_outgoing(&payload);

    // Framing: '<', little-endian length, then the command payload.
    assert_eq!(wire[0], 0x3C);
    let len = u16::from_le_bytes([wire[1], wire[2]]) as usize;
    assert_eq!(len, payload.len());
    assert_eq!(&wire[3..], &payload[..]);

    // Command layout: opcode, plain text type, channel, timestamp LE, text.
    assert_eq!(payload[0], 3);
    assert_eq!(payload[1], 0);
    assert_eq!(payload[2], 0);
    assert_eq!(
        u32::from_le_bytes([payload[3], payload[4], payload[5], payload[6]]),
        1_700_000_000
    );
    assert_eq!(&payload[7..], "WX: 70°F".as_bytes());
}
