//! Workout session lifecycle engine.
//!
//! The engine is the single owner of [`WorkoutState`]: every decoded
//! frame, timer tick, and user command arrives as a [`SessionInput`] on
//! one ordered channel, and every externally visible change leaves as a
//! [`SessionEvent`]. Keeping the core synchronous makes the lifecycle
//! fully testable without a radio or a runtime; the device layer owns the
//! async plumbing that feeds it.

use crate::{
    error::Result,
    reps::{RepEvent, RepTracker},
    types::{
        MachineState, MachineStatus, RepCount, RepNotification, SetSummary, TelemetrySample,
        WorkoutParameters, WorkoutState,
    },
};
use std::time::Duration;
use tracing::{info, warn};

/// Seconds counted down before a set becomes active
pub const COUNTDOWN_SECONDS: u32 = 3;

/// No-motion window after which a free-lift set is auto-terminated
pub const STALL_WINDOW_SECONDS: u32 = 5;

/// Cable speed below which a telemetry sample counts as no motion
pub const STALL_VELOCITY_THRESHOLD_MM_S: f32 = 10.0;

/// Inputs consumed by the engine, in arrival order
#[derive(Debug, Clone)]
pub enum SessionInput {
    /// The start frame's write completed
    Started,
    /// Decoded rep notification
    Rep(RepNotification),
    /// Decoded telemetry sample
    Telemetry(TelemetrySample),
    /// Decoded machine status notification
    Machine(MachineStatus),
    /// One-second timer tick
    Tick,
    /// User pause request
    Pause,
    /// User resume request
    Resume,
    /// User stop request
    Stop,
    /// Caller advanced past the last set of the exercise
    AdvanceExercise,
    /// Caller advanced past the last exercise of the routine
    AdvanceRoutine,
    /// The link dropped underneath the session
    LinkLost,
}

/// Externally visible session output
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The workout state changed
    StateChanged(WorkoutState),
    /// The derived rep counts changed
    Reps(RepCount),
    /// A telemetry sample, forwarded unmodified
    Telemetry(TelemetrySample),
}

/// Single-owner workout lifecycle state machine
#[derive(Debug)]
pub struct SessionEngine {
    params: WorkoutParameters,
    state: WorkoutState,
    tracker: RepTracker,
    countdown_remaining: u32,
    rest_remaining: u64,
    stall_seconds: u32,
    active_seconds: u64,
    peak_load_kg: f32,
    power_sum: f32,
    power_samples: u32,
}

impl SessionEngine {
    /// Create an engine for one configured set
    ///
    /// # Errors
    ///
    /// Returns [`crate::LiftError::InvalidParameter`] or
    /// [`crate::LiftError::OutOfHardwareRange`] for configuration the
    /// trainer would reject; nothing is sent to the machine first.
    pub fn new(params: WorkoutParameters) -> Result<Self> {
        params.validate()?;
        let tracker = RepTracker::new(params.warmup_reps, params.target_reps, params.amrap)?;

        Ok(Self {
            params,
            state: WorkoutState::Idle,
            tracker,
            countdown_remaining: 0,
            rest_remaining: 0,
            stall_seconds: 0,
            active_seconds: 0,
            peak_load_kg: 0.0,
            power_sum: 0.0,
            power_samples: 0,
        })
    }

    /// Current workout state
    #[must_use]
    pub const fn state(&self) -> &WorkoutState {
        &self.state
    }

    /// Immutable snapshot of the derived rep counts
    #[must_use]
    pub const fn rep_count(&self) -> RepCount {
        self.tracker.snapshot()
    }

    /// True once no further input can change the state
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            WorkoutState::Completed
                | WorkoutState::ExerciseComplete
                | WorkoutState::RoutineComplete
                | WorkoutState::Error { .. }
        )
    }

    /// Move from `Idle` to `Initializing` while configuration is written
    pub fn begin(&mut self) -> Vec<SessionEvent> {
        if self.state != WorkoutState::Idle {
            return Vec::new();
        }
        self.transition(WorkoutState::Initializing)
    }

    /// Consume one input and produce the resulting events
    pub fn handle(&mut self, input: SessionInput) -> Vec<SessionEvent> {
        // Advancing past a finished set is the one thing still allowed
        // once the set itself is over; everything else is inert.
        match input {
            SessionInput::AdvanceExercise
                if matches!(
                    self.state,
                    WorkoutState::Completed | WorkoutState::SetSummary { .. }
                ) =>
            {
                return self.transition(WorkoutState::ExerciseComplete);
            }
            SessionInput::AdvanceRoutine
                if matches!(
                    self.state,
                    WorkoutState::Completed | WorkoutState::ExerciseComplete
                ) =>
            {
                return self.transition(WorkoutState::RoutineComplete);
            }
            _ => {}
        }

        if self.is_terminal() {
            return Vec::new();
        }

        match input {
            SessionInput::Started => self.on_started(),
            SessionInput::Rep(note) => self.on_rep(&note),
            SessionInput::Telemetry(sample) => self.on_telemetry(sample),
            SessionInput::Machine(status) => self.on_machine(status),
            SessionInput::Tick => self.on_tick(),
            SessionInput::Pause => self.on_pause(),
            SessionInput::Resume => self.on_resume(),
            SessionInput::Stop => self.on_stop(),
            SessionInput::AdvanceExercise | SessionInput::AdvanceRoutine => Vec::new(),
            SessionInput::LinkLost => {
                warn!("link lost during active session");
                self.transition(WorkoutState::Error {
                    message: "connection lost".to_string(),
                })
            }
        }
    }

    fn on_started(&mut self) -> Vec<SessionEvent> {
        if self.state != WorkoutState::Initializing {
            return Vec::new();
        }
        self.countdown_remaining = COUNTDOWN_SECONDS;
        self.transition(WorkoutState::Countdown {
            seconds_remaining: COUNTDOWN_SECONDS,
        })
    }

    fn on_tick(&mut self) -> Vec<SessionEvent> {
        match &self.state {
            WorkoutState::Countdown { .. } => {
                self.countdown_remaining = self.countdown_remaining.saturating_sub(1);
                if self.countdown_remaining == 0 {
                    self.transition(WorkoutState::Active)
                } else {
                    self.transition(WorkoutState::Countdown {
                        seconds_remaining: self.countdown_remaining,
                    })
                }
            }
            WorkoutState::Active => {
                self.active_seconds += 1;
                if self.params.stall_detection && self.params.amrap {
                    self.stall_seconds += 1;
                    if self.stall_seconds >= STALL_WINDOW_SECONDS {
                        info!(
                            window = STALL_WINDOW_SECONDS,
                            "no motion detected, terminating free-lift set"
                        );
                        return self.finish_set();
                    }
                }
                Vec::new()
            }
            WorkoutState::Resting { .. } => {
                self.rest_remaining = self.rest_remaining.saturating_sub(1);
                if self.rest_remaining == 0 {
                    self.transition(WorkoutState::Completed)
                } else {
                    self.transition(WorkoutState::Resting {
                        seconds_remaining: self.rest_remaining,
                    })
                }
            }
            _ => Vec::new(),
        }
    }

    fn on_rep(&mut self, note: &RepNotification) -> Vec<SessionEvent> {
        if self.state != WorkoutState::Active {
            return Vec::new();
        }

        let rep_events = self.tracker.apply(note);
        if rep_events.is_empty() {
            return Vec::new();
        }

        let mut events = vec![SessionEvent::Reps(self.tracker.snapshot())];
        if rep_events
            .iter()
            .any(|e| matches!(e, RepEvent::WorkoutComplete { .. }))
        {
            events.extend(self.finish_set());
        }
        events
    }

    fn on_telemetry(&mut self, sample: TelemetrySample) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        if self.state == WorkoutState::Active {
            self.peak_load_kg = self.peak_load_kg.max(sample.peak_load_kg());
            self.power_sum += sample.power_w;
            self.power_samples += 1;

            if sample.peak_speed_mm_s() > STALL_VELOCITY_THRESHOLD_MM_S {
                self.stall_seconds = 0;
            }

            if self.tracker.observe_telemetry(&sample) {
                events.push(SessionEvent::Reps(self.tracker.snapshot()));
            }
        }

        events.push(SessionEvent::Telemetry(sample));
        events
    }

    fn on_machine(&mut self, status: MachineStatus) -> Vec<SessionEvent> {
        if self.state != WorkoutState::Active || status.state != MachineState::Deload {
            return Vec::new();
        }

        // The deload edge is where a swallowed final-rep notification
        // becomes observable; give the tracker one more look at its
        // counters before ending the set with whatever it reports.
        let mut events = Vec::new();
        if self.tracker.recheck_completion().is_some() {
            events.push(SessionEvent::Reps(self.tracker.snapshot()));
        }
        info!("machine deloaded, ending set");
        events.extend(self.finish_set());
        events
    }

    fn on_pause(&mut self) -> Vec<SessionEvent> {
        if self.state == WorkoutState::Active {
            self.transition(WorkoutState::Paused)
        } else {
            Vec::new()
        }
    }

    fn on_resume(&mut self) -> Vec<SessionEvent> {
        if self.state == WorkoutState::Paused {
            self.transition(WorkoutState::Active)
        } else {
            Vec::new()
        }
    }

    fn on_stop(&mut self) -> Vec<SessionEvent> {
        match self.state {
            WorkoutState::Active | WorkoutState::Paused => self.finish_set(),
            _ => self.transition(WorkoutState::Completed),
        }
    }

    /// End the active set: summary, then rest or straight to completed
    ///
    /// A zero rest duration advances synchronously in the same batch so a
    /// back-to-back set transition can never deadlock waiting on a timer
    /// that was never armed.
    fn finish_set(&mut self) -> Vec<SessionEvent> {
        let count = self.tracker.snapshot();
        let summary = SetSummary {
            working_reps: count.working_reps,
            total_reps: count.warmup_reps.saturating_add(count.working_reps),
            duration: Duration::from_secs(self.active_seconds),
            peak_load_kg: self.peak_load_kg,
            avg_power_w: if self.power_samples == 0 {
                0.0
            } else {
                self.power_sum / self.power_samples as f32
            },
        };

        let mut events = self.transition(WorkoutState::SetSummary { summary });

        let rest_secs = self.params.rest.as_secs();
        if rest_secs == 0 {
            events.extend(self.transition(WorkoutState::Completed));
        } else {
            self.rest_remaining = rest_secs;
            events.extend(self.transition(WorkoutState::Resting {
                seconds_remaining: rest_secs,
            }));
        }

        events
    }

    fn transition(&mut self, next: WorkoutState) -> Vec<SessionEvent> {
        if self.state == next {
            return Vec::new();
        }
        info!(from = %self.state, to = %next, "workout state transition");
        self.state = next.clone();
        vec![SessionEvent::StateChanged(next)]
    }
}
