//! Per-block tilt tracking and the collapsed flag.
//!
//! Tilt is the larger absolute deviation of the roll and pitch angles from
//! rest, in degrees. Each tracked block keeps the maximum tilt observed since
//! the last baseline reset, so between resets both aggregates can only grow.

use std::collections::HashMap;

use bevy::{math::EulerRot, prelude::*};
use tracing::{debug, info};

use crate::{components::BlockId, config::TowerConfig, registry::TowerRegistry};

/// Raised by the fall detector when the structure has come down.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TowerFell {
    pub block: Option<BlockId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TiltAggregate {
    pub average: f32,
    pub peak: f32,
}

#[derive(Resource, Debug, Clone, Default)]
pub struct StabilityMonitor {
    max_tilt: HashMap<BlockId, f32>,
    collapsed: bool,
    frozen: Option<TiltAggregate>,
    baseline_pending: bool,
    ticks_since_sample: u32,
}

/// Signed difference from zero wrapped into `[-180, 180]`.
pub fn delta_angle(degrees: f32) -> f32 {
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

pub fn tilt_degrees(rotation: Quat) -> f32 {
    let (_yaw, roll, pitch) = rotation.to_euler(EulerRot::YXZ);
    let roll = delta_angle(roll.to_degrees()).abs();
    let pitch = delta_angle(pitch.to_degrees()).abs();
    roll.max(pitch)
}

impl StabilityMonitor {
    /// Drop every tracked maximum and reseed from the current tilts.
    pub fn reset_baseline<I>(&mut self, current: I)
    where
        I: IntoIterator<Item = (BlockId, f32)>,
    {
        self.max_tilt = current.into_iter().collect();
        self.baseline_pending = false;
        self.ticks_since_sample = 0;
    }

    pub fn request_baseline_reset(&mut self) {
        self.baseline_pending = true;
    }

    pub fn baseline_pending(&self) -> bool {
        self.baseline_pending
    }

    /// Fold one observation into the running maximum. Blocks outside the
    /// current baseline are ignored until the next reset.
    pub fn record_sample(&mut self, id: BlockId, tilt: f32) {
        if let Some(max) = self.max_tilt.get_mut(&id) {
            if tilt > *max {
                *max = tilt;
            }
        }
    }

    pub fn max_tilt(&self, id: BlockId) -> Option<f32> {
        self.max_tilt.get(&id).copied()
    }

    pub fn tracked_blocks(&self) -> usize {
        self.max_tilt.len()
    }

    pub fn tracked(&self) -> impl Iterator<Item = (BlockId, f32)> + '_ {
        self.max_tilt.iter().map(|(id, tilt)| (*id, *tilt))
    }

    /// Aggregates over the tracked maxima, ignoring any frozen values.
    pub fn live_aggregate(&self) -> TiltAggregate {
        if self.max_tilt.is_empty() {
            return TiltAggregate::default();
        }
        let mut total = 0.0f32;
        let mut peak = 0.0f32;
        for tilt in self.max_tilt.values() {
            total += *tilt;
            peak = peak.max(*tilt);
        }
        TiltAggregate {
            average: total / self.max_tilt.len() as f32,
            peak,
        }
    }

    pub fn average_max_tilt(&self) -> f32 {
        self.frozen
            .map(|frozen| frozen.average)
            .unwrap_or_else(|| self.live_aggregate().average)
    }

    pub fn peak_max_tilt(&self) -> f32 {
        self.frozen
            .map(|frozen| frozen.peak)
            .unwrap_or_else(|| self.live_aggregate().peak)
    }

    /// Serve `aggregate` from the accessors until [`StabilityMonitor::thaw`].
    pub fn freeze(&mut self, aggregate: TiltAggregate) {
        self.frozen = Some(aggregate);
    }

    pub fn thaw(&mut self) {
        self.frozen = None;
    }

    pub fn mark_collapsed(&mut self) {
        self.collapsed = true;
    }

    pub fn clear_collapsed(&mut self) {
        self.collapsed = false;
    }

    pub fn is_collapsed(&self) -> bool {
        self.collapsed
    }

    fn sample_due(&mut self, interval: u32) -> bool {
        self.ticks_since_sample += 1;
        if self.ticks_since_sample >= interval.max(1) {
            self.ticks_since_sample = 0;
            true
        } else {
            false
        }
    }
}

/// Reseed tracked maxima once the registry reflects the new geometry.
pub fn reset_stability_baseline(
    registry: Res<TowerRegistry>,
    mut monitor: ResMut<StabilityMonitor>,
    transforms: Query<&Transform>,
) {
    if !monitor.baseline_pending() || registry.rebuild_pending() {
        return;
    }
    monitor.reset_baseline(registry.iter().filter_map(|(id, entity)| {
        transforms
            .get(entity)
            .ok()
            .map(|transform| (id, tilt_degrees(transform.rotation)))
    }));
    debug!(
        target: "jenga::stability",
        tracked = monitor.tracked_blocks(),
        "stability.baseline_reset"
    );
}

pub fn sample_tilt(
    config: Res<TowerConfig>,
    registry: Res<TowerRegistry>,
    mut monitor: ResMut<StabilityMonitor>,
    transforms: Query<&Transform>,
) {
    if monitor.baseline_pending() || !monitor.sample_due(config.tilt_sample_interval) {
        return;
    }
    for (id, entity) in registry.iter() {
        if let Ok(transform) = transforms.get(entity) {
            monitor.record_sample(id, tilt_degrees(transform.rotation));
        }
    }
}

pub fn record_tower_fall(mut falls: EventReader<TowerFell>, mut monitor: ResMut<StabilityMonitor>) {
    let mut fell = None;
    for event in falls.read() {
        fell = Some(*event);
    }
    let Some(event) = fell else {
        return;
    };
    if !monitor.is_collapsed() {
        info!(
            target: "jenga::stability",
            block = ?event.block,
            "tower.fallen"
        );
    }
    monitor.mark_collapsed();
}

#[cfg(test)]
mod tests {
    use super::*;
    use jenga_protocol::BlockColor;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn tilt_ignores_yaw() {
        let yawed = Quat::from_rotation_y(90f32.to_radians());
        assert!(tilt_degrees(yawed) < 1e-3);

        let rolled = Quat::from_euler(EulerRot::YXZ, 90f32.to_radians(), 12f32.to_radians(), 0.0);
        assert!(approx(tilt_degrees(rolled), 12.0));

        let pitched = Quat::from_euler(EulerRot::YXZ, 0.0, 3f32.to_radians(), -20f32.to_radians());
        assert!(approx(tilt_degrees(pitched), 20.0));
    }

    #[test]
    fn delta_angle_wraps() {
        assert!(approx(delta_angle(350.0), -10.0));
        assert!(approx(delta_angle(-190.0), 170.0));
        assert!(approx(delta_angle(45.0), 45.0));
    }

    #[test]
    fn average_never_decreases_between_resets() {
        let a = BlockId::new(0, BlockColor::Yellow);
        let b = BlockId::new(0, BlockColor::Blue);
        let mut monitor = StabilityMonitor::default();
        monitor.reset_baseline([(a, 1.0), (b, 2.0)]);

        let samples = [(a, 4.0), (b, 0.5), (a, 3.0), (b, 6.0), (a, 0.0), (b, 1.0)];
        let mut previous = monitor.average_max_tilt();
        for (id, tilt) in samples {
            monitor.record_sample(id, tilt);
            let average = monitor.average_max_tilt();
            assert!(average >= previous);
            previous = average;
        }
        assert!(approx(monitor.average_max_tilt(), 5.0));
        assert!(approx(monitor.peak_max_tilt(), 6.0));
    }

    #[test]
    fn reset_drops_deleted_blocks() {
        let a = BlockId::new(0, BlockColor::Yellow);
        let b = BlockId::new(1, BlockColor::Green);
        let mut monitor = StabilityMonitor::default();
        monitor.reset_baseline([(a, 9.0), (b, 2.0)]);
        monitor.reset_baseline([(b, 0.5)]);

        assert_eq!(monitor.max_tilt(a), None);
        assert_eq!(monitor.max_tilt(b), Some(0.5));
        monitor.record_sample(a, 40.0);
        assert_eq!(monitor.tracked_blocks(), 1);
    }

    #[test]
    fn frozen_values_shadow_live_aggregate() {
        let a = BlockId::new(0, BlockColor::Yellow);
        let mut monitor = StabilityMonitor::default();
        monitor.reset_baseline([(a, 7.0)]);
        monitor.freeze(TiltAggregate {
            average: 1.5,
            peak: 2.5,
        });
        assert_eq!(monitor.average_max_tilt(), 1.5);
        assert_eq!(monitor.peak_max_tilt(), 2.5);
        monitor.thaw();
        assert_eq!(monitor.average_max_tilt(), 7.0);
    }

    #[test]
    fn empty_monitor_reports_zero() {
        let monitor = StabilityMonitor::default();
        assert_eq!(monitor.average_max_tilt(), 0.0);
        assert_eq!(monitor.peak_max_tilt(), 0.0);
    }
}
