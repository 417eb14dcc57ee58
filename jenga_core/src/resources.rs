use bevy::prelude::*;
use jenga_protocol::GameEvent;
use thiserror::Error;

use crate::config::TowerConfig;

/// Tracks total simulation ticks elapsed.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationTick(pub u64);

/// Material and clock parameters consumed by the external physics step.
#[derive(Resource, Debug, Clone, Copy, PartialEq)]
pub struct PhysicsSettings {
    pub time_scale: f32,
    pub static_friction: f32,
    pub dynamic_friction: f32,
}

impl PhysicsSettings {
    pub fn from_config(config: &TowerConfig) -> Self {
        Self {
            time_scale: config.physics.time_scale,
            static_friction: config.physics.static_friction,
            dynamic_friction: config.physics.dynamic_friction,
        }
    }
}

/// Distance a block may drift from its rest pose before the tower counts as
/// fallen.
#[derive(Resource, Debug, Clone, Copy, PartialEq)]
pub struct FallDetector {
    pub distance: f32,
}

/// Widest capture the renderer accepts, in pixels.
pub const MAX_CAPTURE_WIDTH: u32 = 16_384;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ScreenshotError {
    #[error("capture width must be at least one pixel")]
    ZeroWidth,
    #[error("capture width exceeds the renderer limit")]
    TooWide { requested: u64 },
}

/// Capture resolution and outstanding capture requests for the external
/// renderer.
#[derive(Resource, Debug, Clone, PartialEq)]
pub struct ScreenshotSettings {
    pub width: u32,
    pub height: u32,
    pub viewport_width: f32,
    pending_captures: u32,
}

impl ScreenshotSettings {
    pub fn from_config(config: &TowerConfig) -> Self {
        Self {
            width: config.screenshot.width,
            height: config.screenshot.height,
            viewport_width: config.screenshot.viewport_width,
            pending_captures: 0,
        }
    }

    /// Resize so the cropped capture ends up `final_width` pixels wide at 16:9.
    ///
    /// Leaves the current resolution untouched when the resulting capture
    /// would be empty or wider than [`MAX_CAPTURE_WIDTH`].
    pub fn set_final_width(&mut self, final_width: u32) -> Result<(), ScreenshotError> {
        let viewport = if self.viewport_width.is_finite() && self.viewport_width > 0.0 {
            f64::from(self.viewport_width)
        } else {
            1.0
        };
        let width = (f64::from(final_width) / viewport).round();
        if width < 1.0 {
            return Err(ScreenshotError::ZeroWidth);
        }
        if width > f64::from(MAX_CAPTURE_WIDTH) {
            return Err(ScreenshotError::TooWide {
                requested: width.min(u64::MAX as f64) as u64,
            });
        }
        let width = width as u32;
        let height = (u64::from(width) * 9 + 8) / 16;
        self.width = width;
        self.height = u32::try_from(height).unwrap_or(u32::MAX);
        Ok(())
    }

    pub fn request_capture(&mut self) {
        self.pending_captures = self.pending_captures.saturating_add(1);
    }

    pub fn pending_captures(&self) -> u32 {
        self.pending_captures
    }

    /// Hand outstanding requests to the renderer.
    pub fn take_pending(&mut self) -> u32 {
        std::mem::take(&mut self.pending_captures)
    }
}

#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MenuState {
    pub visible: bool,
}

impl MenuState {
    pub fn toggle(&mut self) -> bool {
        self.visible = !self.visible;
        self.visible
    }
}

/// Events queued for the dispatcher; drained by the host after every tick.
#[derive(Resource, Debug, Default)]
pub struct Outbox {
    pending: Vec<GameEvent>,
}

impl Outbox {
    pub fn push(&mut self, event: GameEvent) {
        self.pending.push(event);
    }

    pub fn pending(&self) -> &[GameEvent] {
        &self.pending
    }

    pub fn drain(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.pending)
    }
}
