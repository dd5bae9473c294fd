//! Wire protocol for the Xbox 360 controller and the generic HID gamepad
//! report it is translated into.
//!
//! Decoding and encoding are pure functions over fixed byte layouts; they run
//! on every completed interrupt read and must stay allocation-free and
//! side-effect-free.

use serde::{Deserialize, Serialize};

/// Size of one controller input report on the wire (header + payload).
pub const INPUT_REPORT_LEN: usize = 20;

/// Size of the translated HID gamepad report.
pub const HID_REPORT_LEN: usize = 8;

/// Report type tag carried in byte 0 of every gamepad input report.
pub const REPORT_TYPE_GAMEPAD: u8 = 0x00;

/// Report length tag carried in byte 1 of every gamepad input report.
pub const REPORT_LEN_TAG: u8 = 0x14;

/// Buttons of the controller, named after their physical labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ButtonType {
    A,
    B,
    X,
    Y,
    Start,
    Select,
    LeftBumper,
    RightBumper,
    LeftStick,
    RightStick,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
    Guide,
}

impl ButtonType {
    // Bit positions within the two button bytes of the wire report.
    // Byte index 0 carries dpad/start/select/stick-press, index 1 the rest.
    fn mask(self) -> (usize, u8) {
        match self {
            ButtonType::DPadUp => (0, 0x01),
            ButtonType::DPadDown => (0, 0x02),
            ButtonType::DPadLeft => (0, 0x04),
            ButtonType::DPadRight => (0, 0x08),
            ButtonType::Start => (0, 0x10),
            ButtonType::Select => (0, 0x20),
            ButtonType::LeftStick => (0, 0x40),
            ButtonType::RightStick => (0, 0x80),
            ButtonType::LeftBumper => (1, 0x01),
            ButtonType::RightBumper => (1, 0x02),
            ButtonType::Guide => (1, 0x04),
            ButtonType::A => (1, 0x10),
            ButtonType::B => (1, 0x20),
            ButtonType::X => (1, 0x40),
            ButtonType::Y => (1, 0x80),
        }
    }
}

/// Canonical controller state decoded from one valid input report.
///
/// Built fresh per decode, immutable afterwards, consumed immediately by the
/// encoder. Axis values keep the signed byte range of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GamepadState {
    pub left_stick_x: i8,
    pub left_stick_y: i8,
    pub right_stick_x: i8,
    pub right_stick_y: i8,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub buttons_low: u8,
    pub buttons_high: u8,
}

impl GamepadState {
    pub fn button_pressed(&self, button: ButtonType) -> bool {
        let (byte, bit) = button.mask();
        let value = if byte == 0 {
            self.buttons_low
        } else {
            self.buttons_high
        };
        value & bit != 0
    }
}

/// Result of decoding one completed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedReport {
    /// A valid gamepad input report.
    Gamepad(GamepadState),

    /// A frame with a foreign type tag (keep-alive, other report classes).
    /// Dropped without further processing; not an error.
    Ignored,
}

/// Decode failures. Malformed frames are dropped by the caller, the loop
/// keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Input report too short: {len} bytes")]
    TooShort { len: usize },
}

/// Decodes a raw input report buffer as delivered by one completed read.
///
/// Deterministic and side-effect-free; runs on every completion.
pub fn decode_input_report(buf: &[u8]) -> Result<DecodedReport, DecodeError> {
    // The type/length tags must be readable before anything else.
    if buf.len() < 3 {
        return Err(DecodeError::TooShort { len: buf.len() });
    }

    if buf[0] != REPORT_TYPE_GAMEPAD || buf[1] != REPORT_LEN_TAG {
        return Ok(DecodedReport::Ignored);
    }

    if buf.len() < INPUT_REPORT_LEN {
        return Err(DecodeError::TooShort { len: buf.len() });
    }

    Ok(DecodedReport::Gamepad(GamepadState {
        left_stick_x: buf[2] as i8,
        left_stick_y: buf[3] as i8,
        right_stick_x: buf[4] as i8,
        right_stick_y: buf[5] as i8,
        left_trigger: buf[6],
        right_trigger: buf[7],
        buttons_low: buf[8],
        buttons_high: buf[9],
    }))
}

/// Finished 8-byte HID gamepad report, ready for the HID sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidReport(pub [u8; HID_REPORT_LEN]);

impl HidReport {
    pub fn as_bytes(&self) -> &[u8; HID_REPORT_LEN] {
        &self.0
    }
}

/// Encodes the canonical state into the fixed HID report layout.
///
/// Axis bytes shift from the signed range into the unsigned range by +128.
/// The addition wraps on overflow; the mapping is byte-exact with the
/// device's native layout, not saturating. Buttons and triggers pass through
/// unchanged. Deadzone and filtering are left to downstream HID consumers.
pub fn encode_hid_report(state: &GamepadState) -> HidReport {
    HidReport([
        state.buttons_low,
        state.buttons_high,
        (state.left_stick_x as u8).wrapping_add(128),
        (state.left_stick_y as u8).wrapping_add(128),
        (state.right_stick_x as u8).wrapping_add(128),
        (state.right_stick_y as u8).wrapping_add(128),
        state.left_trigger,
        state.right_trigger,
    ])
}

/// LED ring patterns understood by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedPattern {
    Off = 0x00,
    AllBlink = 0x01,
    Player1 = 0x06,
    Player2 = 0x07,
    Player3 = 0x08,
    Player4 = 0x09,
    Rotate = 0x0a,
}

/// Builds the 3-byte LED control frame for the outbound channel.
pub fn led_command(pattern: LedPattern) -> Vec<u8> {
    vec![0x01, 0x03, pattern as u8]
}

/// Builds the 8-byte rumble frame. `strong` drives the heavy left motor,
/// `weak` the light right motor.
pub fn rumble_command(strong: u8, weak: u8) -> Vec<u8> {
    vec![0x00, 0x08, 0x00, strong, weak, 0x00, 0x00, 0x00]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gamepad_frame(payload: [u8; 18]) -> Vec<u8> {
        let mut frame = vec![REPORT_TYPE_GAMEPAD, REPORT_LEN_TAG];
        frame.extend_from_slice(&payload);
        frame
    }

    #[test]
    fn decode_rejects_short_buffers() {
        assert_eq!(
            decode_input_report(&[]),
            Err(DecodeError::TooShort { len: 0 })
        );
        assert_eq!(
            decode_input_report(&[0x00, 0x14]),
            Err(DecodeError::TooShort { len: 2 })
        );
    }

    #[test]
    fn decode_rejects_truncated_gamepad_report() {
        // Valid tags but not enough payload behind them.
        let frame = [0x00, 0x14, 0x01, 0x02, 0x03];
        assert_eq!(
            decode_input_report(&frame),
            Err(DecodeError::TooShort { len: 5 })
        );
    }

    #[test]
    fn decode_ignores_foreign_report_types() {
        // Wrong type tag, content irrelevant.
        let mut frame = vec![0x01, 0x14];
        frame.extend_from_slice(&[0xff; 18]);
        assert_eq!(decode_input_report(&frame), Ok(DecodedReport::Ignored));

        // Wrong length tag on a short keep-alive style frame.
        assert_eq!(
            decode_input_report(&[0x00, 0x03, 0x00]),
            Ok(DecodedReport::Ignored)
        );
    }

    #[test]
    fn decode_is_deterministic() {
        let mut payload = [0u8; 18];
        payload[0] = 0x7f;
        payload[4] = 0xaa;
        payload[6] = 0x12;
        let frame = gamepad_frame(payload);

        let first = decode_input_report(&frame).unwrap();
        let second = decode_input_report(&frame).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn decode_maps_payload_fields() {
        let mut payload = [0u8; 18];
        payload[0] = 0x0a; // left X
        payload[1] = 0xf6; // left Y (-10)
        payload[2] = 0x7f; // right X
        payload[3] = 0x80; // right Y (-128)
        payload[4] = 0x32; // left trigger
        payload[5] = 0x64; // right trigger
        payload[6] = 0xff; // buttons low
        payload[7] = 0x10; // buttons high
        let frame = gamepad_frame(payload);

        let state = match decode_input_report(&frame).unwrap() {
            DecodedReport::Gamepad(state) => state,
            other => panic!("expected gamepad report, got {:?}", other),
        };
        assert_eq!(state.left_stick_x, 10);
        assert_eq!(state.left_stick_y, -10);
        assert_eq!(state.right_stick_x, 127);
        assert_eq!(state.right_stick_y, -128);
        assert_eq!(state.left_trigger, 0x32);
        assert_eq!(state.right_trigger, 0x64);
        assert_eq!(state.buttons_low, 0xff);
        assert_eq!(state.buttons_high, 0x10);
        assert!(state.button_pressed(ButtonType::A));
        assert!(state.button_pressed(ButtonType::DPadUp));
        assert!(!state.button_pressed(ButtonType::Y));
    }

    #[test]
    fn encode_produces_fixed_layout() {
        let state = GamepadState {
            left_stick_x: 0x0a,
            left_stick_y: 0,
            right_stick_x: 0,
            right_stick_y: 0,
            left_trigger: 0x32,
            right_trigger: 0x64,
            buttons_low: 0xff,
            buttons_high: 0x00,
        };
        assert_eq!(
            encode_hid_report(&state).0,
            [0xff, 0x00, 0x8a, 0x80, 0x80, 0x80, 0x32, 0x64]
        );
    }

    #[test]
    fn encode_axis_midpoint_and_extremes() {
        let mut state = GamepadState {
            left_stick_x: 0,
            left_stick_y: 127,
            right_stick_x: 0,
            right_stick_y: 0,
            left_trigger: 0,
            right_trigger: 0,
            buttons_low: 0,
            buttons_high: 0,
        };
        let report = encode_hid_report(&state);
        assert_eq!(report.0[2], 128); // center maps to midpoint
        assert_eq!(report.0[3], 255); // full positive deflection

        // Negative values wrap around the byte instead of saturating.
        state.left_stick_x = -1;
        state.left_stick_y = -128;
        let report = encode_hid_report(&state);
        assert_eq!(report.0[2], 127);
        assert_eq!(report.0[3], 0);
    }

    #[test]
    fn command_frames_match_wire_layout() {
        assert_eq!(led_command(LedPattern::Player1), vec![0x01, 0x03, 0x06]);
        assert_eq!(led_command(LedPattern::Off), vec![0x01, 0x03, 0x00]);
        assert_eq!(
            rumble_command(0xc8, 0x40),
            vec![0x00, 0x08, 0x00, 0xc8, 0x40, 0x00, 0x00, 0x00]
        );
    }
}
