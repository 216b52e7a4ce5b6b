use crate::{
    echo,
    error::{LiftError, Result},
    types::{
        CableReading, EchoLevel, MachineState, MachineStatus, ProgramMode, RepFrameFormat,
        RepNotification, TelemetryFlags, TelemetrySample, MAX_WEIGHT_PER_CABLE_KG,
    },
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::SystemTime;

/// Program configuration frame size in bytes
pub const PROGRAM_FRAME_SIZE: usize = 16;

/// Echo configuration frame size in bytes
pub const ECHO_FRAME_SIZE: usize = 20;

/// Short command frame size in bytes
pub const COMMAND_FRAME_SIZE: usize = 4;

/// Minimum telemetry frame length before fixed offsets may be read
pub const TELEMETRY_FRAME_MIN: usize = 15;

/// Legacy rep notification frame length
pub const REP_FRAME_LEGACY_SIZE: usize = 8;

/// Modern rep notification frame length
pub const REP_FRAME_MODERN_SIZE: usize = 13;

/// Minimum machine status frame length
pub const STATUS_FRAME_MIN: usize = 2;

/// Leading format byte of a modern rep notification
pub const REP_FORMAT_MODERN: u8 = 0x01;

/// Frame opcodes captured from device traffic
///
/// The trainer's command characteristic accepts these in byte 0 of every
/// write. Values were recorded from BLE sniffs of the official app against
/// both hardware revisions; they are not documented by the vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Configure a fixed-resistance program set
    Program = 0x21,
    /// Configure an adaptive echo set
    Echo = 0x22,
    /// Begin the configured set
    Start = 0x30,
    /// End the set and deload
    Stop = 0x31,
    /// Release cable tension without ending the session
    Deload = 0x32,
}

/// Scale factor between wire position/velocity units and millimeters
///
/// Raw fields are tenths of a millimeter (or mm/s); every parsed value is
/// multiplied by this before leaving the codec.
const WIRE_DISTANCE_SCALE: f32 = 0.1;

/// Round a weight to the 0.5 kg resolution the motor controller accepts
fn round_to_half_kg(kg: f32) -> f32 {
    (kg * 2.0).round() / 2.0
}

fn encode_kg(kg: f32) -> u16 {
    // Wire weights are kg x 10; resolution is enforced by the caller.
    (kg * 10.0).round() as u16
}

fn decode_kg(raw: u16) -> f32 {
    f32::from(raw) / 10.0
}

fn program_mode_from_u8(value: u8) -> Option<ProgramMode> {
    match value {
        0x01 => Some(ProgramMode::OldSchool),
        0x02 => Some(ProgramMode::Pump),
        0x03 => Some(ProgramMode::TimeUnderTension),
        0x04 => Some(ProgramMode::EccentricOnly),
        _ => None,
    }
}

fn echo_level_from_u16(value: u16) -> Option<EchoLevel> {
    match value {
        1 => Some(EchoLevel::Lite),
        2 => Some(EchoLevel::Standard),
        3 => Some(EchoLevel::Hard),
        4 => Some(EchoLevel::Max),
        _ => None,
    }
}

/// Build a program configuration frame
///
/// Weight and progression encode as u16 little-endian kg x 10 and are
/// defensively rounded to the trainer's 0.5 kg resolution first. Rep
/// fields are u8.
///
/// # Errors
///
/// Returns [`LiftError::InvalidParameter`] when the weight per cable is
/// outside 0-220 kg.
pub fn build_program_frame(
    mode: ProgramMode,
    weight_per_cable_kg: f32,
    progression_kg: f32,
    warmup_reps: u8,
    target_reps: u8,
    stop_at_top: bool,
) -> Result<Bytes> {
    if !(0.0..=MAX_WEIGHT_PER_CABLE_KG).contains(&weight_per_cable_kg) {
        return Err(LiftError::InvalidParameter(format!(
            "weight {weight_per_cable_kg:.1} kg per cable is out of range (0.0 - {MAX_WEIGHT_PER_CABLE_KG:.0})"
        )));
    }

    let weight = round_to_half_kg(weight_per_cable_kg);
    let progression = round_to_half_kg(progression_kg.max(0.0));

    let mut buf = BytesMut::with_capacity(PROGRAM_FRAME_SIZE);
    buf.put_u8(Opcode::Program as u8);
    buf.put_u8(mode as u8);
    buf.put_u16_le(encode_kg(weight));
    buf.put_u16_le(encode_kg(progression));
    buf.put_u8(warmup_reps);
    buf.put_u8(target_reps);
    buf.put_u8(u8::from(stop_at_top));
    while buf.len() < PROGRAM_FRAME_SIZE {
        buf.put_u8(0);
    }

    Ok(buf.freeze())
}

/// Decoded view of a program configuration frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgramFrame {
    /// Program variant
    pub mode: ProgramMode,
    /// Weight per cable in kilograms
    pub weight_per_cable_kg: f32,
    /// Progression per working rep in kilograms
    pub progression_kg: f32,
    /// Warmup rep count
    pub warmup_reps: u8,
    /// Working rep target
    pub target_reps: u8,
    /// Deload at the top of the final rep
    pub stop_at_top: bool,
}

/// Parse a program configuration frame
///
/// # Errors
///
/// Returns [`LiftError::Decode`] on a short frame, a wrong opcode, or an
/// unknown mode selector.
pub fn parse_program_frame(data: &[u8]) -> Result<ProgramFrame> {
    if data.len() < PROGRAM_FRAME_SIZE {
        return Err(LiftError::Decode(format!(
            "program frame too short: {} bytes, expected {PROGRAM_FRAME_SIZE}",
            data.len()
        )));
    }

    let mut buf = data;
    let opcode = buf.get_u8();
    if opcode != Opcode::Program as u8 {
        return Err(LiftError::Decode(format!(
            "unexpected opcode {opcode:02X} for program frame"
        )));
    }

    let mode_byte = buf.get_u8();
    let mode = program_mode_from_u8(mode_byte)
        .ok_or_else(|| LiftError::Decode(format!("unknown program mode {mode_byte:02X}")))?;
    let weight_per_cable_kg = decode_kg(buf.get_u16_le());
    let progression_kg = decode_kg(buf.get_u16_le());
    let warmup_reps = buf.get_u8();
    let target_reps = buf.get_u8();
    let stop_at_top = buf.get_u8() & 0x01 != 0;

    Ok(ProgramFrame {
        mode,
        weight_per_cable_kg,
        progression_kg,
        warmup_reps,
        target_reps,
        stop_at_top,
    })
}

/// Build an echo configuration frame
///
/// The concentric percentage, adaptive gain, and weight cap are derived
/// from the level and eccentric load by [`echo::derive_params`] and travel
/// in the frame alongside both inputs.
///
/// # Errors
///
/// Returns [`LiftError::OutOfHardwareRange`] when the eccentric load
/// exceeds the 150% hardware ceiling. The value is never silently
/// clamped.
pub fn build_echo_frame(
    level: EchoLevel,
    eccentric_pct: u16,
    warmup_reps: u8,
    target_reps: u8,
    is_just_lift: bool,
) -> Result<Bytes> {
    let params = echo::derive_params(level, eccentric_pct)?;

    let mut buf = BytesMut::with_capacity(ECHO_FRAME_SIZE);
    buf.put_u8(Opcode::Echo as u8);
    buf.put_u8(u8::from(is_just_lift));
    buf.put_u16_le(level as u16);
    buf.put_u16_le(params.concentric_pct);
    buf.put_u16_le(params.gain_x100);
    buf.put_u16_le(eccentric_pct);
    buf.put_u16_le(encode_kg(params.cap_kg));
    buf.put_u8(warmup_reps);
    buf.put_u8(target_reps);
    while buf.len() < ECHO_FRAME_SIZE {
        buf.put_u8(0);
    }

    Ok(buf.freeze())
}

/// Decoded view of an echo configuration frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EchoFrame {
    /// Difficulty tier
    pub level: EchoLevel,
    /// Derived concentric load percentage
    pub concentric_pct: u16,
    /// Derived adaptive gain, fixed-point x100
    pub gain_x100: u16,
    /// Eccentric load percentage as configured
    pub eccentric_pct: u16,
    /// Derived weight cap in kilograms
    pub cap_kg: f32,
    /// Warmup rep count
    pub warmup_reps: u8,
    /// Working rep target
    pub target_reps: u8,
    /// Free-lift set with no fixed target
    pub is_just_lift: bool,
}

/// Parse an echo configuration frame
///
/// # Errors
///
/// Returns [`LiftError::Decode`] on a short frame, a wrong opcode, or an
/// unknown level selector.
pub fn parse_echo_frame(data: &[u8]) -> Result<EchoFrame> {
    if data.len() < ECHO_FRAME_SIZE {
        return Err(LiftError::Decode(format!(
            "echo frame too short: {} bytes, expected {ECHO_FRAME_SIZE}",
            data.len()
        )));
    }

    let mut buf = data;
    let opcode = buf.get_u8();
    if opcode != Opcode::Echo as u8 {
        return Err(LiftError::Decode(format!(
            "unexpected opcode {opcode:02X} for echo frame"
        )));
    }

    let is_just_lift = buf.get_u8() & 0x01 != 0;
    let level_raw = buf.get_u16_le();
    let level = echo_level_from_u16(level_raw)
        .ok_or_else(|| LiftError::Decode(format!("unknown echo level {level_raw}")))?;
    let concentric_pct = buf.get_u16_le();
    let gain_x100 = buf.get_u16_le();
    let eccentric_pct = buf.get_u16_le();
    let cap_kg = decode_kg(buf.get_u16_le());
    let warmup_reps = buf.get_u8();
    let target_reps = buf.get_u8();

    Ok(EchoFrame {
        level,
        concentric_pct,
        gain_x100,
        eccentric_pct,
        cap_kg,
        warmup_reps,
        target_reps,
        is_just_lift,
    })
}

fn command_frame(opcode: Opcode) -> Bytes {
    let mut buf = BytesMut::with_capacity(COMMAND_FRAME_SIZE);
    buf.put_u8(opcode as u8);
    while buf.len() < COMMAND_FRAME_SIZE {
        buf.put_u8(0);
    }
    buf.freeze()
}

/// Build the start command frame
#[must_use]
pub fn build_start_frame() -> Bytes {
    command_frame(Opcode::Start)
}

/// Build the stop command frame
#[must_use]
pub fn build_stop_frame() -> Bytes {
    command_frame(Opcode::Stop)
}

/// Build the deload command frame
#[must_use]
pub fn build_deload_frame() -> Bytes {
    command_frame(Opcode::Deload)
}

/// Parse a telemetry frame into a [`TelemetrySample`]
///
/// Wire layout, all little-endian: load right u16 (kg x 10), load left
/// u16 (kg x 10), position right u16, position left u16, velocity right
/// i16, velocity left i16 (distances in 0.1 mm units), power u16 (watts),
/// status bitfield u8.
///
/// # Errors
///
/// Returns [`LiftError::Decode`] when the frame is shorter than
/// [`TELEMETRY_FRAME_MIN`]; fixed offsets are never read past the end of
/// the input.
pub fn parse_telemetry_frame(data: &[u8]) -> Result<TelemetrySample> {
    if data.len() < TELEMETRY_FRAME_MIN {
        return Err(LiftError::Decode(format!(
            "telemetry frame too short: {} bytes, expected at least {TELEMETRY_FRAME_MIN}",
            data.len()
        )));
    }

    let mut buf = data;
    let load_right = decode_kg(buf.get_u16_le());
    let load_left = decode_kg(buf.get_u16_le());
    let position_right = f32::from(buf.get_u16_le()) * WIRE_DISTANCE_SCALE;
    let position_left = f32::from(buf.get_u16_le()) * WIRE_DISTANCE_SCALE;
    let velocity_right = f32::from(buf.get_i16_le()) * WIRE_DISTANCE_SCALE;
    let velocity_left = f32::from(buf.get_i16_le()) * WIRE_DISTANCE_SCALE;
    let power_w = f32::from(buf.get_u16_le());
    let flags = TelemetryFlags::from_bits(buf.get_u8());

    Ok(TelemetrySample {
        timestamp: SystemTime::now(),
        left: CableReading {
            load_kg: load_left,
            position_mm: position_left,
            velocity_mm_s: velocity_left,
        },
        right: CableReading {
            load_kg: load_right,
            position_mm: position_right,
            velocity_mm_s: velocity_right,
        },
        power_w,
        flags,
    })
}

/// Parse a rep notification, selecting the legacy or modern layout
///
/// Modern firmware sends 13 bytes with a leading format byte of 0x01:
/// format u8, top counter u16, complete counter u16, warmup (ROM) count
/// u8, working (set) count u8, range top u16, range bottom u16 (0.1 mm
/// units). Legacy firmware sends 8 bytes with no explicit counts: top
/// counter u16, complete counter u16, range top u16, range bottom u16.
/// The discriminator is resolved here, once, so consumers branch on
/// [`RepFrameFormat`] instead of re-inspecting bytes.
///
/// # Errors
///
/// Returns [`LiftError::Decode`] on a frame shorter than the legacy
/// layout, or a modern-length frame with an unrecognized format byte.
pub fn parse_rep_notification(data: &[u8]) -> Result<RepNotification> {
    if data.len() >= REP_FRAME_MODERN_SIZE {
        if data[0] != REP_FORMAT_MODERN {
            return Err(LiftError::Decode(format!(
                "unrecognized rep frame format byte {:02X}",
                data[0]
            )));
        }

        let mut buf = &data[1..];
        let top_counter = buf.get_u16_le();
        let complete_counter = buf.get_u16_le();
        let rom_count = buf.get_u8();
        let set_count = buf.get_u8();
        let range_top_mm = f32::from(buf.get_u16_le()) * WIRE_DISTANCE_SCALE;
        let range_bottom_mm = f32::from(buf.get_u16_le()) * WIRE_DISTANCE_SCALE;

        return Ok(RepNotification {
            top_counter,
            complete_counter,
            rom_count,
            set_count,
            range_top_mm,
            range_bottom_mm,
            raw: Bytes::copy_from_slice(data),
            format: RepFrameFormat::Modern,
        });
    }

    if data.len() >= REP_FRAME_LEGACY_SIZE {
        let mut buf = data;
        let top_counter = buf.get_u16_le();
        let complete_counter = buf.get_u16_le();
        let range_top_mm = f32::from(buf.get_u16_le()) * WIRE_DISTANCE_SCALE;
        let range_bottom_mm = f32::from(buf.get_u16_le()) * WIRE_DISTANCE_SCALE;

        return Ok(RepNotification {
            top_counter,
            complete_counter,
            rom_count: 0,
            set_count: 0,
            range_top_mm,
            range_bottom_mm,
            raw: Bytes::copy_from_slice(data),
            format: RepFrameFormat::Legacy,
        });
    }

    Err(LiftError::Decode(format!(
        "rep frame too short: {} bytes, expected at least {REP_FRAME_LEGACY_SIZE}",
        data.len()
    )))
}

/// Parse a machine status notification
///
/// # Errors
///
/// Returns [`LiftError::Decode`] when the frame is shorter than
/// [`STATUS_FRAME_MIN`].
pub fn parse_status_frame(data: &[u8]) -> Result<MachineStatus> {
    if data.len() < STATUS_FRAME_MIN {
        return Err(LiftError::Decode(format!(
            "status frame too short: {} bytes, expected at least {STATUS_FRAME_MIN}",
            data.len()
        )));
    }

    Ok(MachineStatus {
        state: MachineState::from(data[0]),
        fault_code: data[1],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_frame_round_trip() {
        for weight in [0.0, 0.5, 25.0, 77.5, 102.5, 220.0] {
            let frame =
                build_program_frame(ProgramMode::OldSchool, weight, 2.5, 3, 10, false).unwrap();
            assert_eq!(frame.len(), PROGRAM_FRAME_SIZE);

            let parsed = parse_program_frame(&frame).unwrap();
            assert!((parsed.weight_per_cable_kg - weight).abs() < 0.1);
            assert_eq!(parsed.warmup_reps, 3);
            assert_eq!(parsed.target_reps, 10);
            assert_eq!(parsed.mode, ProgramMode::OldSchool);
            assert!(!parsed.stop_at_top);
        }
    }

    #[test]
    fn test_program_frame_rounds_to_half_kg() {
        let frame = build_program_frame(ProgramMode::Pump, 25.24, 0.0, 0, 5, true).unwrap();
        let parsed = parse_program_frame(&frame).unwrap();
        assert!((parsed.weight_per_cable_kg - 25.0).abs() < f32::EPSILON);
        assert!(parsed.stop_at_top);

        let frame = build_program_frame(ProgramMode::Pump, 25.26, 0.0, 0, 5, false).unwrap();
        let parsed = parse_program_frame(&frame).unwrap();
        assert!((parsed.weight_per_cable_kg - 25.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_program_frame_rejects_out_of_range_weight() {
        assert!(matches!(
            build_program_frame(ProgramMode::OldSchool, 220.6, 0.0, 0, 5, false),
            Err(LiftError::InvalidParameter(_))
        ));
        assert!(matches!(
            build_program_frame(ProgramMode::OldSchool, -0.5, 0.0, 0, 5, false),
            Err(LiftError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_program_frame_wire_layout() {
        let frame = build_program_frame(ProgramMode::OldSchool, 25.0, 0.0, 3, 10, false).unwrap();
        assert_eq!(frame[0], Opcode::Program as u8);
        assert_eq!(frame[1], 0x01);
        // 25.0 kg -> 250 -> FA 00 little-endian
        assert_eq!(&frame[2..4], &250u16.to_le_bytes());
        assert_eq!(frame[6], 3);
        assert_eq!(frame[7], 10);
    }

    #[test]
    fn test_echo_frame_accepts_hardware_range() {
        for eccentric in [0u16, 50, 75, 100, 110, 120, 130, 140, 150] {
            let frame = build_echo_frame(EchoLevel::Standard, eccentric, 2, 8, false).unwrap();
            assert_eq!(frame.len(), ECHO_FRAME_SIZE);

            let parsed = parse_echo_frame(&frame).unwrap();
            assert_eq!(parsed.eccentric_pct, eccentric);
            assert_eq!(parsed.level, EchoLevel::Standard);
            assert_eq!(parsed.warmup_reps, 2);
            assert_eq!(parsed.target_reps, 8);

            let expected = echo::derive_params(EchoLevel::Standard, eccentric).unwrap();
            assert_eq!(parsed.concentric_pct, expected.concentric_pct);
            assert_eq!(parsed.gain_x100, expected.gain_x100);
            assert!((parsed.cap_kg - expected.cap_kg).abs() < 0.1);
        }
    }

    #[test]
    fn test_echo_frame_rejects_above_ceiling() {
        assert!(matches!(
            build_echo_frame(EchoLevel::Max, 151, 0, 5, false),
            Err(LiftError::OutOfHardwareRange { requested: 151, limit: 150, .. })
        ));
    }

    #[test]
    fn test_command_frames() {
        assert_eq!(build_start_frame()[0], Opcode::Start as u8);
        assert_eq!(build_stop_frame()[0], Opcode::Stop as u8);
        assert_eq!(build_deload_frame()[0], Opcode::Deload as u8);
        assert_eq!(build_start_frame().len(), COMMAND_FRAME_SIZE);
    }

    #[test]
    fn test_telemetry_parse() {
        let mut frame = BytesMut::new();
        frame.put_u16_le(250); // load right 25.0 kg
        frame.put_u16_le(248); // load left 24.8 kg
        frame.put_u16_le(8500); // position right 850.0 mm
        frame.put_u16_le(8490); // position left 849.0 mm
        frame.put_i16_le(-1200); // velocity right -120.0 mm/s
        frame.put_i16_le(-1190); // velocity left -119.0 mm/s
        frame.put_u16_le(310); // power 310 W
        frame.put_u8(0b0000_0011); // active, at top

        let sample = parse_telemetry_frame(&frame).unwrap();
        assert!((sample.right.load_kg - 25.0).abs() < f32::EPSILON);
        assert!((sample.left.load_kg - 24.8).abs() < 0.01);
        assert!((sample.right.position_mm - 850.0).abs() < 0.01);
        assert!((sample.right.velocity_mm_s + 120.0).abs() < 0.01);
        assert!((sample.power_w - 310.0).abs() < f32::EPSILON);
        assert!(sample.flags.active);
        assert!(sample.flags.at_top);
        assert!(!sample.flags.at_bottom);
    }

    #[test]
    fn test_telemetry_rejects_short_frame() {
        let err = parse_telemetry_frame(&[0u8; TELEMETRY_FRAME_MIN - 1]).unwrap_err();
        assert!(matches!(err, LiftError::Decode(_)));
    }

    #[test]
    fn test_rep_notification_modern_layout() {
        let mut frame = BytesMut::new();
        frame.put_u8(REP_FORMAT_MODERN);
        frame.put_u16_le(13); // top counter
        frame.put_u16_le(12); // complete counter
        frame.put_u8(3); // warmup count
        frame.put_u8(9); // working count
        frame.put_u16_le(9100); // range top 910.0 mm
        frame.put_u16_le(1500); // range bottom 150.0 mm

        let note = parse_rep_notification(&frame).unwrap();
        assert_eq!(note.format, RepFrameFormat::Modern);
        assert_eq!(note.top_counter, 13);
        assert_eq!(note.complete_counter, 12);
        assert_eq!(note.rom_count, 3);
        assert_eq!(note.set_count, 9);
        assert!((note.range_top_mm - 910.0).abs() < 0.01);
        assert!((note.range_bottom_mm - 150.0).abs() < 0.01);
    }

    #[test]
    fn test_rep_notification_legacy_layout() {
        let mut frame = BytesMut::new();
        frame.put_u16_le(7); // top counter
        frame.put_u16_le(6); // complete counter
        frame.put_u16_le(9000);
        frame.put_u16_le(1400);

        let note = parse_rep_notification(&frame).unwrap();
        assert_eq!(note.format, RepFrameFormat::Legacy);
        assert_eq!(note.top_counter, 7);
        assert_eq!(note.complete_counter, 6);
        assert_eq!(note.rom_count, 0);
        assert_eq!(note.set_count, 0);
    }

    #[test]
    fn test_rep_notification_rejects_bad_input() {
        // Too short for either layout
        assert!(parse_rep_notification(&[0u8; 5]).is_err());

        // Modern length with an unknown format byte
        let mut frame = vec![0x7Fu8];
        frame.extend_from_slice(&[0u8; REP_FRAME_MODERN_SIZE - 1]);
        assert!(parse_rep_notification(&frame).is_err());
    }

    #[test]
    fn test_status_frame_parse() {
        let status = parse_status_frame(&[2, 0]).unwrap();
        assert_eq!(status.state, MachineState::Deload);
        assert_eq!(status.fault_code, 0);

        assert!(parse_status_frame(&[1]).is_err());
    }
}
