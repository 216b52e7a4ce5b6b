#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Liftbridge 🏋️
//!
//! A Rust library for controlling motorized cable resistance trainers
//! via Bluetooth Low Energy.
//!
//! This library is the control and telemetry bridge between an application
//! and a Forma cable trainer. It turns workout intent (mode, weight, target
//! reps, difficulty) into the trainer's binary command frames and turns the
//! machine's continuous binary telemetry stream back into a semantically
//! meaningful workout state: warmup and working rep counts, completion
//! events, and safety flags. The entire wire protocol was reverse-engineered
//! from captured BLE traffic between the vendor's mobile application and
//! real hardware.
//!
//! ## Reverse Engineering Details
//!
//! The protocol implementation in this library is based on detailed
//! analysis of captured device traffic, including:
//!
//! - **BLE Service Discovery**: vendor service with one command (write)
//!   characteristic, one polled telemetry characteristic, and two
//!   notification characteristics (rep events, machine status)
//! - **Command Frames**: fixed-size program and echo configuration frames
//!   plus short start/stop/deload commands, little-endian throughout
//! - **Telemetry Parsing**: per-cable load, position, and velocity at
//!   roughly 10 Hz, with a status bitfield
//! - **Rep Notifications**: two wire layouts (legacy and modern firmware)
//!   disambiguated on receipt
//! - **Firmware Defect Compensation**: the final working rep's counter
//!   update is sometimes never transmitted before the machine deloads; the
//!   rep tracker synthesizes the missing rep from an independent counter
//!
//! ## Safety Warning
//!
//! ⚠️ **Important**: This library controls physical exercise equipment
//! under motor tension. Always ensure:
//! - The deload path (stop command) is reachable from your application
//! - Users understand how to safely release the handles
//! - Proper error handling is implemented in your application
//!
//! ## Quick Start
//!
//! ```no_run
//! use liftbridge::{ProgramMode, TrainerDevice, WorkoutParameters};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Discover and connect to a Forma trainer
//!     let device = TrainerDevice::connect_first().await?;
//!
//!     // 25 kg per cable, 3 warmup reps, 10 working reps
//!     let params = WorkoutParameters::program(ProgramMode::OldSchool, 25.0, 3, 10);
//!
//!     // Start the set and consume lifecycle events
//!     let mut workout = device.start_workout(params).await?;
//!     while let Some(event) = workout.next_event().await {
//!         println!("{event:?}");
//!     }
//!
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy communication module
pub mod ble;
/// Main device control interface
pub mod device;
/// Echo adaptive mode parameter derivation
pub mod echo;
/// Error types and handling
pub mod error;
/// Wire frame building and parsing
pub mod protocol;
/// Rep and phase tracking state machine
pub mod reps;
/// Workout session lifecycle engine
pub mod session;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use device::{TrainerDevice, WorkoutHandle};
pub use error::{LiftError, Result};
pub use reps::{RepEvent, RepPhase, RepTracker};
pub use session::{SessionEngine, SessionEvent, SessionInput};
pub use types::{
    CableReading, ConnectionParams, ConnectionState, EchoLevel, HardwareModel, ProgramMode,
    RepCount, SetSummary, TelemetrySample, TimeoutConfig, WorkoutParameters, WorkoutState,
    WorkoutType,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Forma trainer BLE service UUID captured from device traffic
///
/// All four characteristics used by this library live under this vendor
/// service. The UUID was recorded from a BLE sniff of the official mobile
/// application's session setup against both hardware revisions.
pub const TRAINER_SERVICE_UUID: &str = "7E430000-9D1B-44C5-A1C4-6B2E24DC0A9E";

/// Command characteristic UUID for app-to-trainer writes
///
/// All configuration and control frames (program, echo, start, stop,
/// deload) are written here. The trainer accepts writes without response.
pub const TRAINER_COMMAND_CHAR_UUID: &str = "7E430001-9D1B-44C5-A1C4-6B2E24DC0A9E";

/// Telemetry characteristic UUID, read-polled at the session rate
///
/// The trainer does not notify on this characteristic. The official app
/// polls it sequentially, one read at a time; firing reads on a fixed
/// timer floods some platform stacks and trips the supervision timeout.
pub const TRAINER_TELEMETRY_CHAR_UUID: &str = "7E430002-9D1B-44C5-A1C4-6B2E24DC0A9E";

/// Rep notification characteristic UUID
///
/// The trainer pushes a rep frame here at every counted concentric peak
/// and eccentric bottom. Legacy firmware uses a shorter layout than
/// current firmware; both appear on this characteristic.
pub const TRAINER_REP_CHAR_UUID: &str = "7E430003-9D1B-44C5-A1C4-6B2E24DC0A9E";

/// Machine status notification characteristic UUID
///
/// Carries coarse machine state (idle, under tension, deload) and fault
/// codes. The deload edge is used as a completion cross-check.
pub const TRAINER_STATUS_CHAR_UUID: &str = "7E430004-9D1B-44C5-A1C4-6B2E24DC0A9E";

/// Advertised name prefix of the original Forma trainer
pub const DEVICE_PREFIX_MARK_ONE: &str = "FORMA-";

/// Advertised name prefix of the Forma Max trainer
pub const DEVICE_PREFIX_MARK_TWO: &str = "FORMAX-";
