//! Scripted input sources for the headless client.

use clap::ValueEnum;
use shared::Input;
use std::f64::consts::TAU;

/// What a headless client does with its player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputPattern {
    /// Stands still.
    Idle,
    /// Runs straight ahead.
    Forward,
    /// Runs forward while turning, tracing a circle.
    Circle,
}

/// Produces one input per tick following an [`InputPattern`].
pub struct InputSource {
    pattern: InputPattern,
    frame: u64,
    /// Ticks per full turn in circle mode.
    period: u64,
}

impl InputSource {
    pub fn new(pattern: InputPattern, tick_rate: u32) -> Self {
        Self {
            pattern,
            frame: 0,
            period: u64::from(tick_rate.max(1)) * 4,
        }
    }

    pub fn pattern(&self) -> InputPattern {
        self.pattern
    }

    pub fn next_input(&mut self) -> Input {
        let frame = self.frame;
        self.frame += 1;

        match self.pattern {
            InputPattern::Idle => Input::default(),
            InputPattern::Forward => Input {
                forward: true,
                ..Default::default()
            },
            InputPattern::Circle => Input {
                forward: true,
                yaw: TAU * (frame % self.period) as f64 / self.period as f64,
                ..Default::default()
            },
        }
    }
}
