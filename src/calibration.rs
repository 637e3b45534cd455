use serde::{Deserialize, Serialize};

use crate::types::Orientation;

/// Stabilization wait applied at startup [seconds]
pub const DEFAULT_STARTUP_DELAY_SECS: f64 = 5.0;
/// Wait applied when recalibration is triggered by hand [seconds]
pub const DEFAULT_MANUAL_DELAY_SECS: f64 = 0.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CalibrationState {
    Idle,
    Waiting { deadline: f64 },
    Done { completed_at: f64 },
}

#[derive(Clone, Debug, PartialEq)]
pub enum CalibrationEvent {
    /// A request was applied; the snapshot fires at `deadline`
    Started { deadline: f64, restarted: bool },
    /// Offsets were captured for every channel
    Completed { at: f64, offsets: Vec<Orientation> },
}

/// Zero-reference capture for all channels
///
/// Requests are queued and only take effect on the next `tick`, so a request
/// can never land in the middle of record processing. The latest request
/// always wins: a pending wait is simply replaced. Once the first snapshot
/// completes the controller stays calibrated, including while a later
/// recalibration is waiting.
pub struct CalibrationController {
    state: CalibrationState,
    offsets: Vec<Orientation>,
    pending_delay: Option<f64>,
    calibrated: bool,
    completions: u64,
}

impl CalibrationController {
    pub fn new(channel_count: usize) -> Self {
        CalibrationController {
            state: CalibrationState::Idle,
            offsets: vec![Orientation::IDENTITY; channel_count],
            pending_delay: None,
            calibrated: false,
            completions: 0,
        }
    }

    /// Queue a calibration that snapshots `delay_secs` after the next tick
    pub fn request(&mut self, delay_secs: f64) {
        if self.pending_delay.is_some() {
            log::debug!("Calibration request superseded (new delay {:.2}s)", delay_secs);
        }
        self.pending_delay = Some(delay_secs.max(0.0));
    }

    /// Apply queued requests and fire the snapshot when due.
    ///
    /// `latest_raw` yields the most recent remapped, unfiltered orientation
    /// for a channel; channels that have not reported keep an identity offset.
    pub fn tick<F>(&mut self, now: f64, latest_raw: F) -> Vec<CalibrationEvent>
    where
        F: Fn(usize) -> Option<Orientation>,
    {
        let mut events = Vec::new();

        if let Some(delay) = self.pending_delay.take() {
            let restarted = !matches!(self.state, CalibrationState::Idle);
            let deadline = now + delay;
            self.state = CalibrationState::Waiting { deadline };
            log::info!(
                "Calibration {} (snapshot in {:.2}s)",
                if restarted { "restarted" } else { "started" },
                delay
            );
            events.push(CalibrationEvent::Started { deadline, restarted });
        }

        if let CalibrationState::Waiting { deadline } = self.state {
            if now >= deadline {
                let offsets: Vec<Orientation> = (0..self.offsets.len())
                    .map(|channel| latest_raw(channel).unwrap_or(Orientation::IDENTITY))
                    .collect();
                self.offsets.clone_from(&offsets);
                self.state = CalibrationState::Done { completed_at: now };
                self.calibrated = true;
                self.completions += 1;
                log::info!(
                    "Calibration complete: {} channel offsets captured (#{})",
                    offsets.len(),
                    self.completions
                );
                events.push(CalibrationEvent::Completed { at: now, offsets });
            }
        }

        events
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn has_pending_request(&self) -> bool {
        self.pending_delay.is_some()
    }

    pub fn offset(&self, channel: usize) -> Option<Orientation> {
        self.offsets.get(channel).copied()
    }

    pub fn offsets(&self) -> &[Orientation] {
        &self.offsets
    }

    pub fn completions(&self) -> u64 {
        self.completions
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.offsets.len());
    }
}
