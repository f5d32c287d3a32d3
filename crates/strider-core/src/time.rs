//! Fixed-step simulation clock
//!
//! Movement is deterministic only at a fixed step, so frame time is banked
//! and paid out in whole steps. A frame that falls too far behind drops the
//! backlog instead of running an unbounded number of steps.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Simulated seconds per real second
    pub time_scale: f32,
    /// Length of one movement step in seconds
    pub fixed_timestep: f32,
    /// Longest frame accepted before clamping
    pub max_frame_time: f32,
    /// Steps run in one frame at most; the rest of the backlog is dropped
    pub max_steps_per_frame: u32,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            fixed_timestep: 1.0 / 60.0,
            max_frame_time: 0.25,
            max_steps_per_frame: 8,
        }
    }
}

/// Banks frame time and pays it out as fixed steps.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    pub config: TimeConfig,
    backlog: f32,
    steps: u64,
}

impl SimClock {
    pub fn new(config: TimeConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn step_length(&self) -> f32 {
        self.config.fixed_timestep
    }

    /// Bank `frame_time` and return how many steps to simulate now.
    pub fn advance(&mut self, frame_time: f32) -> u32 {
        let step = self.config.fixed_timestep;
        if step <= 0.0 {
            return 0;
        }
        self.backlog += frame_time.clamp(0.0, self.config.max_frame_time) * self.config.time_scale;

        let mut due = 0;
        while self.backlog >= step && due < self.config.max_steps_per_frame {
            self.backlog -= step;
            due += 1;
        }
        if due == self.config.max_steps_per_frame {
            self.backlog = self.backlog.min(step);
        }
        self.steps += u64::from(due);
        due
    }

    /// Steps paid out since creation.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Simulated seconds paid out since creation.
    pub fn elapsed(&self) -> f64 {
        self.steps as f64 * f64::from(self.config.fixed_timestep)
    }
}
