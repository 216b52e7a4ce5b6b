//! Rep and phase tracking.
//!
//! The trainer reports rep progress through notification frames, but the
//! reporting is not reliable enough to surface directly: legacy firmware
//! only exposes monotonic counters, and all firmware revisions can drop
//! the final working rep's counter update on the floor when the set ends,
//! because the motor deloads before the notification is sent. The
//! [`RepTracker`] owns all derived counts, applies notifications in
//! arrival order, and compensates the lost-final-rep defect from an
//! independent counter signal. Consumers read immutable [`RepCount`]
//! snapshots.

use crate::{
    error::{LiftError, Result},
    types::{RepCount, RepFrameFormat, RepNotification, TelemetrySample},
};
use tracing::{debug, info};

/// Phase of the current set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepPhase {
    /// No rep activity observed yet
    AwaitingWarmup,
    /// Warmup reps being counted
    WarmupInProgress,
    /// Working reps being counted
    WorkingInProgress,
    /// Target reached, no further counting
    Complete,
}

/// Semantic events derived from rep notifications
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RepEvent {
    /// A warmup rep was counted; carries the new warmup count
    WarmupRep(u8),
    /// The warmup target was reached
    WarmupComplete,
    /// A working rep was counted; carries the new working count
    WorkingRep(u8),
    /// The working target was reached, fired exactly once per set
    WorkoutComplete {
        /// Final working rep count
        working_reps: u8,
        /// The final rep was synthesized from the bottom-counter signal
        corrected: bool,
    },
}

/// Single-owner state machine deriving rep counts from notifications
#[derive(Debug)]
pub struct RepTracker {
    warmup_target: u8,
    working_target: u8,
    amrap: bool,
    phase: RepPhase,
    count: RepCount,
    /// Top-counter value at warmup completion, for legacy derivation
    legacy_baseline: Option<u16>,
    last_top: u16,
    last_complete: u16,
    range_top_mm: f32,
    range_bottom_mm: f32,
    completion_emitted: bool,
}

impl RepTracker {
    /// Create a tracker for one set
    ///
    /// # Errors
    ///
    /// Returns [`LiftError::InvalidParameter`] for a zero working target
    /// without AMRAP; rejecting it here is what keeps an in-progress set
    /// from stalling on an unreachable target.
    pub fn new(warmup_target: u8, working_target: u8, amrap: bool) -> Result<Self> {
        if working_target == 0 && !amrap {
            return Err(LiftError::InvalidParameter(
                "working target must be at least 1 unless AMRAP is set".to_string(),
            ));
        }

        let warmup_complete = warmup_target == 0;
        Ok(Self {
            warmup_target,
            working_target,
            amrap,
            phase: if warmup_complete {
                RepPhase::WorkingInProgress
            } else {
                RepPhase::AwaitingWarmup
            },
            count: RepCount {
                warmup_complete,
                ..RepCount::default()
            },
            legacy_baseline: if warmup_complete { Some(0) } else { None },
            last_top: 0,
            last_complete: 0,
            range_top_mm: 0.0,
            range_bottom_mm: 0.0,
            completion_emitted: false,
        })
    }

    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> RepPhase {
        self.phase
    }

    /// Immutable snapshot of the derived counts
    #[must_use]
    pub const fn snapshot(&self) -> RepCount {
        self.count
    }

    /// Apply one decoded rep notification, in arrival order
    ///
    /// Returns the semantic events the notification produced, possibly
    /// empty for duplicates or counter echoes.
    pub fn apply(&mut self, note: &RepNotification) -> Vec<RepEvent> {
        let mut events = Vec::new();

        // Counters are monotonic on the wire; a stale or reordered frame
        // must never roll derived counts backward.
        self.last_top = self.last_top.max(note.top_counter);
        self.last_complete = self.last_complete.max(note.complete_counter);
        if note.range_top_mm > 0.0 {
            self.range_top_mm = note.range_top_mm;
            self.range_bottom_mm = note.range_bottom_mm;
        }

        match note.format {
            RepFrameFormat::Modern => self.apply_modern(note, &mut events),
            RepFrameFormat::Legacy => self.apply_legacy(&mut events),
        }

        self.count.pending_rep = self.phase != RepPhase::Complete && self.last_top > self.last_complete;
        if !self.count.pending_rep {
            self.count.pending_rep_progress = 0.0;
        }
        self.count.total_reps = self.count.working_reps;

        if let Some(event) = self.check_completion() {
            events.push(event);
        }

        events
    }

    fn apply_modern(&mut self, note: &RepNotification, events: &mut Vec<RepEvent>) {
        let warmup_now = note.rom_count.min(self.warmup_target);
        if warmup_now > self.count.warmup_reps {
            self.count.warmup_reps = warmup_now;
            self.phase = RepPhase::WarmupInProgress;
            events.push(RepEvent::WarmupRep(warmup_now));
        }

        if !self.count.warmup_complete && note.rom_count >= self.warmup_target {
            self.count.warmup_complete = true;
            self.phase = RepPhase::WorkingInProgress;
            events.push(RepEvent::WarmupComplete);
            info!(warmup = self.warmup_target, "warmup complete");
        }

        if self.count.warmup_complete && note.set_count > self.count.working_reps {
            self.count.working_reps = note.set_count;
            events.push(RepEvent::WorkingRep(note.set_count));
        }
    }

    fn apply_legacy(&mut self, events: &mut Vec<RepEvent>) {
        // Legacy firmware has no explicit counts; everything is derived
        // from the monotonic top counter against the warmup baseline.
        if self.legacy_baseline.is_none() {
            let warmup_now = u8::try_from(self.last_top.min(u16::from(self.warmup_target))).unwrap_or(u8::MAX);
            if warmup_now > self.count.warmup_reps {
                self.count.warmup_reps = warmup_now;
                self.phase = RepPhase::WarmupInProgress;
                events.push(RepEvent::WarmupRep(warmup_now));
            }

            if self.last_top >= u16::from(self.warmup_target) {
                self.legacy_baseline = Some(u16::from(self.warmup_target));
                self.count.warmup_complete = true;
                self.phase = RepPhase::WorkingInProgress;
                events.push(RepEvent::WarmupComplete);
                info!(warmup = self.warmup_target, "warmup complete (legacy derivation)");
            }
        }

        if let Some(baseline) = self.legacy_baseline {
            let working = u8::try_from(self.last_top.saturating_sub(baseline)).unwrap_or(u8::MAX);
            if working > self.count.working_reps {
                self.count.working_reps = working;
                events.push(RepEvent::WorkingRep(working));
            }
        }
    }

    /// Update the pending rep's eccentric progress from telemetry
    ///
    /// Returns true when the snapshot changed. Progress runs 0.0 at the
    /// concentric peak to 1.0 at the confirmed bottom, positioned inside
    /// the machine-reported range of motion.
    pub fn observe_telemetry(&mut self, sample: &TelemetrySample) -> bool {
        if !self.count.pending_rep {
            return false;
        }

        let span = self.range_top_mm - self.range_bottom_mm;
        if span <= 0.0 {
            return false;
        }

        let position = sample.left.position_mm.max(sample.right.position_mm);
        let progress = ((self.range_top_mm - position) / span).clamp(0.0, 1.0);
        if (progress - self.count.pending_rep_progress).abs() < f32::EPSILON {
            return false;
        }

        self.count.pending_rep_progress = progress;
        true
    }

    /// Re-run the completion check outside a notification
    ///
    /// The session engine calls this on a machine deload edge, which is
    /// where a swallowed final-rep notification becomes observable.
    pub fn recheck_completion(&mut self) -> Option<RepEvent> {
        self.check_completion()
    }

    fn check_completion(&mut self) -> Option<RepEvent> {
        if self.amrap || self.completion_emitted || self.working_target == 0 {
            return None;
        }

        if self.count.working_reps >= self.working_target {
            return Some(self.emit_completion(false));
        }

        // The firmware sometimes deloads before transmitting the final
        // working rep's counter update. The bottom counter still ticks for
        // that rep, so a one-rep deficit with the bottom-minus-warmup
        // signal at target is the lost notification, not a short set. A
        // deficit of two or more is a genuine shortfall and never
        // synthesized.
        let deficit = self.working_target - self.count.working_reps;
        let bottom_signal = self.last_complete.saturating_sub(u16::from(self.warmup_target));
        if deficit == 1 && bottom_signal >= u16::from(self.working_target) {
            debug!(
                reported = self.count.working_reps,
                target = self.working_target,
                bottom_signal,
                "synthesizing final rep lost to firmware deload race"
            );
            self.count.working_reps = self.working_target;
            return Some(self.emit_completion(true));
        }

        None
    }

    fn emit_completion(&mut self, corrected: bool) -> RepEvent {
        self.completion_emitted = true;
        self.phase = RepPhase::Complete;
        self.count.pending_rep = false;
        self.count.pending_rep_progress = 0.0;
        self.count.total_reps = self.count.working_reps;
        info!(
            working = self.count.working_reps,
            corrected, "workout complete"
        );
        RepEvent::WorkoutComplete {
            working_reps: self.count.working_reps,
            corrected,
        }
    }
}
