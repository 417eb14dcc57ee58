//! Single-step undo for the tower.
//!
//! A snapshot is taken immediately before each committed removal. Only the
//! most recent one is retained; reverting consumes it.

use std::collections::BTreeMap;

use bevy::prelude::*;
use thiserror::Error;
use tracing::info;

use crate::{
    components::{BlockBundle, BlockId, RestPose},
    registry::TowerRegistry,
    resources::SimulationTick,
    stability::{StabilityMonitor, TiltAggregate},
};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RevertError {
    #[error("no snapshot has been captured since the last revert")]
    NothingToRevert,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockPose {
    pub transform: Transform,
    pub rest: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TowerSnapshot {
    pub tick: u64,
    pub blocks: BTreeMap<BlockId, BlockPose>,
    /// Aggregates as reported by the monitor when the snapshot was taken.
    pub tilt: TiltAggregate,
}

impl TowerSnapshot {
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

#[derive(Resource, Debug, Default)]
pub struct RevertHistory {
    retained: Option<TowerSnapshot>,
}

impl RevertHistory {
    pub fn has_snapshot(&self) -> bool {
        self.retained.is_some()
    }

    pub fn retained(&self) -> Option<&TowerSnapshot> {
        self.retained.as_ref()
    }

    /// Store `snapshot`, dropping whatever was retained before.
    pub fn replace(&mut self, snapshot: TowerSnapshot) -> Option<TowerSnapshot> {
        self.retained.replace(snapshot)
    }

    pub fn take(&mut self) -> Option<TowerSnapshot> {
        self.retained.take()
    }

    pub fn clear(&mut self) {
        self.retained = None;
    }
}

/// Record every block's pose plus the current tilt aggregates.
///
/// Reads the world rather than the registry so a snapshot taken while a
/// rebuild is still pending matches what is actually standing.
pub fn capture_snapshot(world: &mut World) {
    let tick = world.resource::<SimulationTick>().0;
    let mut blocks = BTreeMap::new();
    let mut query = world.query::<(&BlockId, &Transform, &RestPose)>();
    for (id, transform, rest) in query.iter(world) {
        blocks.insert(
            *id,
            BlockPose {
                transform: *transform,
                rest: rest.translation,
            },
        );
    }

    let tilt = {
        let mut monitor = world.resource_mut::<StabilityMonitor>();
        let tilt = TiltAggregate {
            average: monitor.average_max_tilt(),
            peak: monitor.peak_max_tilt(),
        };
        monitor.thaw();
        tilt
    };

    let snapshot = TowerSnapshot { tick, blocks, tilt };
    tracing::debug!(
        target: "jenga::snapshot",
        tick,
        blocks = snapshot.block_count(),
        "snapshot.captured"
    );
    world.resource_mut::<RevertHistory>().replace(snapshot);
}

/// Put the tower back the way it was before the last committed removal.
///
/// Block entities are respawned from the retained snapshot; the registry and
/// the tilt baseline catch up on the next tick. Until the next capture the
/// monitor reports the aggregates recorded with the snapshot.
pub fn revert_step(world: &mut World) -> Result<TowerSnapshot, RevertError> {
    let snapshot = world
        .resource_mut::<RevertHistory>()
        .take()
        .ok_or(RevertError::NothingToRevert)?;

    despawn_blocks(world);
    for (id, pose) in &snapshot.blocks {
        world.spawn(BlockBundle::new(*id, pose.rest, pose.transform));
    }

    world.resource_mut::<TowerRegistry>().request_rebuild();
    {
        let mut monitor = world.resource_mut::<StabilityMonitor>();
        monitor.request_baseline_reset();
        monitor.clear_collapsed();
        monitor.freeze(snapshot.tilt);
    }

    info!(
        target: "jenga::snapshot",
        tick = snapshot.tick,
        blocks = snapshot.block_count(),
        "snapshot.reverted"
    );
    Ok(snapshot)
}

pub(crate) fn despawn_blocks(world: &mut World) -> usize {
    let mut query = world.query_filtered::<Entity, With<BlockId>>();
    let entities: Vec<Entity> = query.iter(world).collect();
    for entity in &entities {
        world.despawn(*entity);
    }
    entities.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jenga_protocol::BlockColor;

    fn world_with_blocks(ids: &[BlockId]) -> World {
        let mut world = World::new();
        world.insert_resource(SimulationTick(7));
        world.insert_resource(RevertHistory::default());
        world.insert_resource(StabilityMonitor::default());
        world.insert_resource(TowerRegistry::new(2));
        for (index, id) in ids.iter().enumerate() {
            let at = Vec3::new(index as f32, id.storage_level as f32, 0.0);
            world.spawn(BlockBundle::new(*id, at, Transform::from_translation(at)));
        }
        world
    }

    fn present(world: &mut World) -> Vec<BlockId> {
        let mut query = world.query::<&BlockId>();
        let mut ids: Vec<BlockId> = query.iter(world).copied().collect();
        ids.sort();
        ids
    }

    #[test]
    fn revert_without_snapshot_fails() {
        let mut world = world_with_blocks(&[]);
        assert_eq!(revert_step(&mut world), Err(RevertError::NothingToRevert));
    }

    #[test]
    fn revert_restores_removed_block_once() {
        let a = BlockId::new(0, BlockColor::Yellow);
        let b = BlockId::new(1, BlockColor::Blue);
        let mut world = world_with_blocks(&[a, b]);

        capture_snapshot(&mut world);
        let mut query = world.query::<(Entity, &BlockId)>();
        let target = query
            .iter(&world)
            .find(|(_, id)| **id == b)
            .map(|(entity, _)| entity)
            .expect("block b spawned");
        world.despawn(target);
        assert_eq!(present(&mut world), vec![a]);

        let restored = revert_step(&mut world).expect("snapshot retained");
        assert_eq!(restored.tick, 7);
        assert_eq!(present(&mut world), vec![a, b]);
        assert!(world.resource::<TowerRegistry>().rebuild_pending());

        assert_eq!(revert_step(&mut world), Err(RevertError::NothingToRevert));
    }

    #[test]
    fn revert_freezes_captured_aggregates() {
        let a = BlockId::new(0, BlockColor::Green);
        let mut world = world_with_blocks(&[a]);
        world
            .resource_mut::<StabilityMonitor>()
            .reset_baseline([(a, 3.0)]);

        capture_snapshot(&mut world);
        {
            let mut monitor = world.resource_mut::<StabilityMonitor>();
            monitor.record_sample(a, 30.0);
            monitor.mark_collapsed();
        }

        revert_step(&mut world).expect("snapshot retained");
        let monitor = world.resource::<StabilityMonitor>();
        assert_eq!(monitor.average_max_tilt(), 3.0);
        assert_eq!(monitor.peak_max_tilt(), 3.0);
        assert!(!monitor.is_collapsed());
        assert!(monitor.baseline_pending());
    }

    #[test]
    fn capture_discards_previous_snapshot() {
        let a = BlockId::new(0, BlockColor::Yellow);
        let b = BlockId::new(0, BlockColor::Blue);
        let mut world = world_with_blocks(&[a, b]);
        capture_snapshot(&mut world);

        let mut query = world.query_filtered::<Entity, With<BlockId>>();
        let first = query.iter(&world).next().expect("blocks spawned");
        world.despawn(first);
        capture_snapshot(&mut world);

        let history = world.resource::<RevertHistory>();
        assert_eq!(history.retained().map(TowerSnapshot::block_count), Some(1));
    }
}
