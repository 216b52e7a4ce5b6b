use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration, time::SystemTime};

use crate::{DEVICE_PREFIX_MARK_ONE, DEVICE_PREFIX_MARK_TWO};

/// Hardware ceiling for eccentric load in echo mode, percent
pub const MAX_ECCENTRIC_PERCENT: u16 = 150;

/// Maximum configurable weight per cable in kilograms
pub const MAX_WEIGHT_PER_CABLE_KG: f32 = 220.0;

/// Fixed-resistance program variants
///
/// The mode selector byte for each variant was captured from the official
/// app's configuration frames; the trainer firmware shapes the resistance
/// curve accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProgramMode {
    /// Constant resistance through the full range of motion
    OldSchool = 0x01,
    /// Resistance ramps up toward the top of each rep
    Pump = 0x02,
    /// Reduced concentric speed target with constant load
    TimeUnderTension = 0x03,
    /// Load applied on the eccentric phase only
    EccentricOnly = 0x04,
}

impl fmt::Display for ProgramMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OldSchool => write!(f, "Old School"),
            Self::Pump => write!(f, "Pump"),
            Self::TimeUnderTension => write!(f, "Time Under Tension"),
            Self::EccentricOnly => write!(f, "Eccentric Only"),
        }
    }
}

/// Difficulty tier for the adaptive echo mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum EchoLevel {
    /// Gentlest adaptation curve
    Lite = 1,
    /// Default adaptation curve
    Standard = 2,
    /// Aggressive adaptation curve
    Hard = 3,
    /// Maximum adaptation curve
    Max = 4,
}

impl fmt::Display for EchoLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lite => write!(f, "Lite"),
            Self::Standard => write!(f, "Standard"),
            Self::Hard => write!(f, "Hard"),
            Self::Max => write!(f, "Max"),
        }
    }
}

/// Workout type selection: a fixed program or the adaptive echo mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkoutType {
    /// Fixed-resistance program
    Program {
        /// Program variant
        mode: ProgramMode,
    },
    /// Adaptive echo mode
    Echo {
        /// Difficulty tier
        level: EchoLevel,
        /// Eccentric load percentage (0-150, hardware-capped)
        eccentric_pct: u16,
    },
}

/// External workout configuration supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutParameters {
    /// Program or echo selection
    pub workout: WorkoutType,
    /// Working rep target; ignored when `amrap` is set
    pub target_reps: u8,
    /// Warmup reps excluded from the working count
    pub warmup_reps: u8,
    /// Weight per cable in kilograms
    pub weight_per_cable_kg: f32,
    /// Weight added per completed working rep, kilograms
    pub progression_kg_per_rep: f32,
    /// As-many-reps-as-possible set with no fixed target
    pub amrap: bool,
    /// Auto-terminate a free-lift set after a no-motion window
    pub stall_detection: bool,
    /// Machine deloads at the top of the final rep instead of the bottom
    pub stop_at_top: bool,
    /// Rest period entered after the set summary; zero skips resting
    pub rest: Duration,
}

impl WorkoutParameters {
    /// Convenience constructor for a fixed program set
    #[must_use]
    pub fn program(mode: ProgramMode, weight_per_cable_kg: f32, warmup_reps: u8, target_reps: u8) -> Self {
        Self {
            workout: WorkoutType::Program { mode },
            target_reps,
            warmup_reps,
            weight_per_cable_kg,
            progression_kg_per_rep: 0.0,
            amrap: false,
            stall_detection: false,
            stop_at_top: false,
            rest: Duration::ZERO,
        }
    }

    /// Convenience constructor for an adaptive echo set
    #[must_use]
    pub fn echo(level: EchoLevel, eccentric_pct: u16, warmup_reps: u8, target_reps: u8) -> Self {
        Self {
            workout: WorkoutType::Echo { level, eccentric_pct },
            target_reps,
            warmup_reps,
            weight_per_cable_kg: 0.0,
            progression_kg_per_rep: 0.0,
            amrap: false,
            stall_detection: false,
            stop_at_top: false,
            rest: Duration::ZERO,
        }
    }

    /// Convenience constructor for a just-lift (AMRAP, echo) set
    #[must_use]
    pub fn just_lift(level: EchoLevel, eccentric_pct: u16) -> Self {
        let mut params = Self::echo(level, eccentric_pct, 0, 0);
        params.amrap = true;
        params.stall_detection = true;
        params
    }

    /// Validate the configuration before any frame is built
    ///
    /// Rejecting bad input here keeps an in-progress set from ever
    /// stalling on an unreachable target.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LiftError::InvalidParameter`] for a zero rep target
    /// on a non-AMRAP set or a weight outside 0-220 kg, and
    /// [`crate::LiftError::OutOfHardwareRange`] for eccentric load above
    /// the 150% ceiling.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.amrap && self.target_reps == 0 {
            return Err(crate::LiftError::InvalidParameter(
                "target_reps must be at least 1 unless AMRAP is set".to_string(),
            ));
        }

        if !(0.0..=MAX_WEIGHT_PER_CABLE_KG).contains(&self.weight_per_cable_kg) {
            return Err(crate::LiftError::InvalidParameter(format!(
                "weight {:.1} kg per cable is out of range (0.0 - {MAX_WEIGHT_PER_CABLE_KG:.0})",
                self.weight_per_cable_kg
            )));
        }

        if let WorkoutType::Echo { eccentric_pct, .. } = self.workout {
            if eccentric_pct > MAX_ECCENTRIC_PERCENT {
                return Err(crate::LiftError::OutOfHardwareRange {
                    what: "eccentric load",
                    requested: eccentric_pct,
                    limit: MAX_ECCENTRIC_PERCENT,
                });
            }
        }

        Ok(())
    }
}

/// Hardware revision, selected by the advertised device name prefix
///
/// The two revisions share one wire protocol; only the resistance ceiling
/// and display name differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardwareModel {
    /// Original Forma trainer
    MarkOne,
    /// Forma Max trainer with the higher resistance ceiling
    MarkTwo,
}

impl HardwareModel {
    /// Identify the hardware revision from an advertised device name
    #[must_use]
    pub fn from_advertised_name(name: &str) -> Option<Self> {
        if name.starts_with(DEVICE_PREFIX_MARK_TWO) {
            Some(Self::MarkTwo)
        } else if name.starts_with(DEVICE_PREFIX_MARK_ONE) {
            Some(Self::MarkOne)
        } else {
            None
        }
    }

    /// Total resistance ceiling in kilograms for display and safety checks
    #[must_use]
    pub const fn max_resistance_kg(self) -> f32 {
        match self {
            Self::MarkOne => 200.0,
            Self::MarkTwo => 220.0,
        }
    }
}

impl fmt::Display for HardwareModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarkOne => write!(f, "Forma"),
            Self::MarkTwo => write!(f, "Forma Max"),
        }
    }
}

/// Authoritative link state, one instance per connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link and no link activity
    Disconnected,
    /// Scanning for advertisements
    Scanning,
    /// Link establishment and negotiation in progress
    Connecting,
    /// Negotiation complete, commands accepted
    Connected {
        /// Advertised device name
        device_name: String,
        /// Peripheral address
        address: String,
        /// Hardware revision from the name prefix
        model: HardwareModel,
    },
    /// Terminal link failure with an actionable message
    Error(String),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected { device_name, model, .. } => {
                write!(f, "Connected to {device_name} ({model})")
            }
            Self::Error(msg) => write!(f, "Error: {msg}"),
        }
    }
}

/// Aggregate metrics of a finished set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetSummary {
    /// Working reps completed (corrected for lost final-rep reports)
    pub working_reps: u8,
    /// Convenience mirror of the working count; warmup reps are excluded
    pub total_reps: u8,
    /// Active duration of the set
    pub duration: Duration,
    /// Highest single-cable load observed, kilograms
    pub peak_load_kg: f32,
    /// Mean power over the active phase, watts
    pub avg_power_w: f32,
}

/// Externally visible workout lifecycle state
///
/// Exactly one value is current at a time; all transitions are owned by
/// the session engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkoutState {
    /// No session configured
    Idle,
    /// Configuration frames in flight
    Initializing,
    /// Pre-set countdown
    Countdown {
        /// Seconds until the set becomes active
        seconds_remaining: u32,
    },
    /// Set in progress
    Active,
    /// Rest period between sets
    Resting {
        /// Seconds of rest remaining
        seconds_remaining: u64,
    },
    /// Set finished, aggregate metrics available
    SetSummary {
        /// Metrics for the finished set
        summary: SetSummary,
    },
    /// Set paused by the user
    Paused,
    /// Session finished normally
    Completed,
    /// All sets of the current exercise finished
    ExerciseComplete,
    /// All exercises of the routine finished
    RoutineComplete,
    /// Session ended by an unrecoverable error
    Error {
        /// Actionable description for the user
        message: String,
    },
}

impl fmt::Display for WorkoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Countdown { seconds_remaining } => write!(f, "Countdown ({seconds_remaining}s)"),
            Self::Active => write!(f, "Active"),
            Self::Resting { seconds_remaining } => write!(f, "Resting ({seconds_remaining}s)"),
            Self::SetSummary { summary } => write!(f, "Set Summary ({} reps)", summary.working_reps),
            Self::Paused => write!(f, "Paused"),
            Self::Completed => write!(f, "Completed"),
            Self::ExerciseComplete => write!(f, "Exercise Complete"),
            Self::RoutineComplete => write!(f, "Routine Complete"),
            Self::Error { message } => write!(f, "Error: {message}"),
        }
    }
}

/// One cable's load, position, and velocity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CableReading {
    /// Cable load in kilograms
    pub load_kg: f32,
    /// Handle position in millimeters from the deck
    pub position_mm: f32,
    /// Signed handle velocity in millimeters per second
    pub velocity_mm_s: f32,
}

/// Status bitfield decoded from a telemetry frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TelemetryFlags {
    /// Machine is applying resistance
    pub active: bool,
    /// Handle at the top of the detected range of motion
    pub at_top: bool,
    /// Handle at the bottom of the detected range of motion
    pub at_bottom: bool,
}

impl TelemetryFlags {
    /// Decode the wire status bitfield
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self {
            active: bits & 0x01 != 0,
            at_top: bits & 0x02 != 0,
            at_bottom: bits & 0x04 != 0,
        }
    }
}

/// One decoded telemetry notification, produced at roughly 10 Hz
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Decode timestamp
    pub timestamp: SystemTime,
    /// Left cable reading
    pub left: CableReading,
    /// Right cable reading
    pub right: CableReading,
    /// Instantaneous power in watts
    pub power_w: f32,
    /// Decoded status bitfield
    pub flags: TelemetryFlags,
}

impl TelemetrySample {
    /// Largest single-cable load in this sample
    #[must_use]
    pub fn peak_load_kg(&self) -> f32 {
        self.left.load_kg.max(self.right.load_kg)
    }

    /// Largest absolute cable velocity in this sample
    #[must_use]
    pub fn peak_speed_mm_s(&self) -> f32 {
        self.left.velocity_mm_s.abs().max(self.right.velocity_mm_s.abs())
    }
}

/// Which rep notification wire layout a frame used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepFrameFormat {
    /// Counter-only layout emitted by pre-2.x firmware
    Legacy,
    /// Full layout with explicit warmup and working counts
    Modern,
}

/// One decoded rep notification
///
/// The two wire layouts are disambiguated once at parse time; consumers
/// branch on [`RepFrameFormat`] instead of re-inspecting bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct RepNotification {
    /// Monotonic count of concentric peaks
    pub top_counter: u16,
    /// Monotonic count of completed reps (eccentric bottom confirmed)
    pub complete_counter: u16,
    /// Machine-reported warmup rep count; zero on legacy firmware
    pub rom_count: u8,
    /// Machine-reported working rep count; zero on legacy firmware
    pub set_count: u8,
    /// Detected top of the range of motion, millimeters
    pub range_top_mm: f32,
    /// Detected bottom of the range of motion, millimeters
    pub range_bottom_mm: f32,
    /// The frame exactly as received
    pub raw: Bytes,
    /// Which layout the frame used
    pub format: RepFrameFormat,
}

/// Derived rep counts, mutated only by the rep tracker
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RepCount {
    /// Warmup reps counted so far
    pub warmup_reps: u8,
    /// Working reps counted so far; never decreases while a set is active
    pub working_reps: u8,
    /// Convenience mirror of the working count; warmup reps are excluded
    pub total_reps: u8,
    /// Warmup target reached
    pub warmup_complete: bool,
    /// A concentric peak awaits its eccentric confirmation
    pub pending_rep: bool,
    /// Eccentric progress of the pending rep, 0.0 at the top to 1.0 at the bottom
    pub pending_rep_progress: f32,
}

/// Coarse machine state from the status notification characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    /// Motor idle, no tension
    Idle,
    /// Motor applying tension
    UnderTension,
    /// Machine released cable tension, typically at set completion
    Deload,
    /// Unrecognized state byte
    Unknown,
}

impl From<u8> for MachineState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::UnderTension,
            2 => Self::Deload,
            _ => Self::Unknown,
        }
    }
}

/// One decoded machine status notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineStatus {
    /// Coarse machine state
    pub state: MachineState,
    /// Firmware fault code, zero when healthy
    pub fault_code: u8,
}

/// Connection parameters
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
    /// Retry attempts for transient write failures
    pub retry_attempts: u32,
    /// Scan timeout in milliseconds
    pub scan_timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retry_attempts: 3,
            scan_timeout_ms: 10_000,
        }
    }
}

/// Timeout configuration for link operations
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Default command timeout in milliseconds
    pub default_timeout_ms: u64,
    /// Telemetry read timeout in milliseconds
    pub telemetry_read_timeout_ms: u64,
    /// Configuration frame timeout in milliseconds
    pub configure_timeout_ms: u64,
    /// Stop/deload command timeout in milliseconds
    pub stop_timeout_ms: u64,
    /// Maximum retry attempts for failed commands
    pub max_retry_attempts: u32,
    /// Retry delay in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 3_000,
            telemetry_read_timeout_ms: 2_000,
            configure_timeout_ms: 4_000,
            stop_timeout_ms: 5_000,
            max_retry_attempts: 3,
            retry_delay_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_from_advertised_name() {
        assert_eq!(
            HardwareModel::from_advertised_name("FORMA-1A2B"),
            Some(HardwareModel::MarkOne)
        );
        assert_eq!(
            HardwareModel::from_advertised_name("FORMAX-9C3D"),
            Some(HardwareModel::MarkTwo)
        );
        assert_eq!(HardwareModel::from_advertised_name("FORMAT-123"), None);
        assert_eq!(HardwareModel::from_advertised_name(""), None);
    }

    #[test]
    fn test_model_ceilings_differ() {
        assert!(HardwareModel::MarkTwo.max_resistance_kg() > HardwareModel::MarkOne.max_resistance_kg());
    }

    #[test]
    fn test_parameter_validation_rejects_zero_target() {
        let params = WorkoutParameters::program(ProgramMode::OldSchool, 25.0, 3, 0);
        assert!(matches!(
            params.validate(),
            Err(crate::LiftError::InvalidParameter(_))
        ));

        let mut amrap = params;
        amrap.amrap = true;
        assert!(amrap.validate().is_ok());
    }

    #[test]
    fn test_parameter_validation_weight_range() {
        let params = WorkoutParameters::program(ProgramMode::OldSchool, 220.5, 0, 5);
        assert!(matches!(
            params.validate(),
            Err(crate::LiftError::InvalidParameter(_))
        ));

        let params = WorkoutParameters::program(ProgramMode::OldSchool, -1.0, 0, 5);
        assert!(params.validate().is_err());

        let params = WorkoutParameters::program(ProgramMode::OldSchool, 220.0, 0, 5);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_parameter_validation_eccentric_ceiling() {
        let params = WorkoutParameters::echo(EchoLevel::Hard, 151, 2, 8);
        assert!(matches!(
            params.validate(),
            Err(crate::LiftError::OutOfHardwareRange { requested: 151, limit: 150, .. })
        ));

        let params = WorkoutParameters::echo(EchoLevel::Hard, 150, 2, 8);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_telemetry_flags_bits() {
        let flags = TelemetryFlags::from_bits(0b0000_0101);
        assert!(flags.active);
        assert!(!flags.at_top);
        assert!(flags.at_bottom);
    }

    #[test]
    fn test_machine_state_from_u8() {
        assert_eq!(MachineState::from(0), MachineState::Idle);
        assert_eq!(MachineState::from(1), MachineState::UnderTension);
        assert_eq!(MachineState::from(2), MachineState::Deload);
        assert_eq!(MachineState::from(99), MachineState::Unknown);
    }

    #[test]
    fn test_just_lift_defaults() {
        let params = WorkoutParameters::just_lift(EchoLevel::Lite, 100);
        assert!(params.amrap);
        assert!(params.stall_detection);
        assert_eq!(params.target_reps, 0);
        assert!(params.validate().is_ok());
    }
}
