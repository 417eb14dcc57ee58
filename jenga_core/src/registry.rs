//! Level/slot index over the blocks currently present in the world.
//!
//! Storage is bottom-up (index 0 is the base of the structure) while the
//! controller addresses levels top-down. The single conversion used
//! everywhere is `storage = total_levels - 1 - level`, valid only for
//! `0 <= level < total_levels`. `total_levels` is fixed when the tower is
//! built; emptied levels keep their index.

use std::collections::BTreeSet;

use bevy::prelude::*;
use jenga_protocol::BlockColor;
use thiserror::Error;
use tracing::{debug, warn};

use crate::components::BlockId;

pub const SLOTS_PER_LEVEL: usize = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("level {level} is out of range for a tower of {levels} levels")]
    LevelOutOfRange { level: i32, levels: u32 },
    #[error("level {level} slot {color} is already empty")]
    SlotEmpty { level: i32, color: BlockColor },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Level {
    slots: [Option<Entity>; SLOTS_PER_LEVEL],
}

impl Level {
    pub fn get(&self, color: BlockColor) -> Option<Entity> {
        self.slots[color.slot()]
    }

    pub fn count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

#[derive(Resource, Debug, Clone)]
pub struct TowerRegistry {
    levels: Vec<Level>,
    rebuild_pending: bool,
    rebuilds: u64,
}

impl TowerRegistry {
    pub fn new(total_levels: u32) -> Self {
        Self {
            levels: vec![Level::default(); total_levels as usize],
            rebuild_pending: true,
            rebuilds: 0,
        }
    }

    pub fn total_levels(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Map a top-down level to its bottom-up storage index.
    pub fn storage_index(&self, level: i32) -> Result<u32, RegistryError> {
        let levels = self.total_levels();
        if level < 0 || level as i64 >= levels as i64 {
            return Err(RegistryError::LevelOutOfRange { level, levels });
        }
        Ok(levels - 1 - level as u32)
    }

    /// Inverse of [`TowerRegistry::storage_index`].
    pub fn wire_level(&self, storage_level: u32) -> u32 {
        self.total_levels()
            .saturating_sub(1)
            .saturating_sub(storage_level)
    }

    pub fn blocks_in_level(&self, level: i32) -> Result<usize, RegistryError> {
        let index = self.storage_index(level)?;
        Ok(self.levels[index as usize].count())
    }

    /// Look up the entity occupying a top-down `(level, color)` address.
    pub fn resolve(&self, level: i32, color: BlockColor) -> Result<(BlockId, Entity), RegistryError> {
        let index = self.storage_index(level)?;
        let entity = self.levels[index as usize]
            .get(color)
            .ok_or(RegistryError::SlotEmpty { level, color })?;
        Ok((BlockId::new(index, color), entity))
    }

    pub fn request_rebuild(&mut self) {
        self.rebuild_pending = true;
    }

    pub fn rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    /// Number of completed rescans; lets callers detect that a rebuild landed.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Repopulate the level/slot map from the blocks present in the world.
    pub fn rebuild<'a, I>(&mut self, blocks: I)
    where
        I: IntoIterator<Item = (Entity, &'a BlockId)>,
    {
        for level in &mut self.levels {
            *level = Level::default();
        }
        for (entity, id) in blocks {
            match self.levels.get_mut(id.storage_level as usize) {
                Some(level) => level.slots[id.slot()] = Some(entity),
                None => warn!(
                    target: "jenga::registry",
                    block = %id,
                    levels = self.levels.len(),
                    "registry.block_ignored=level_out_of_range"
                ),
            }
        }
        self.rebuild_pending = false;
        self.rebuilds += 1;
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockId, Entity)> + '_ {
        self.levels
            .iter()
            .enumerate()
            .flat_map(|(storage_level, level)| {
                BlockColor::ALL.into_iter().filter_map(move |color| {
                    level
                        .get(color)
                        .map(|entity| (BlockId::new(storage_level as u32, color), entity))
                })
            })
    }

    pub fn present_blocks(&self) -> BTreeSet<BlockId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn block_count(&self) -> usize {
        self.levels.iter().map(Level::count).sum()
    }
}

/// Rescan block entities once a structural change has had a tick to settle.
pub fn rebuild_registry(mut registry: ResMut<TowerRegistry>, blocks: Query<(Entity, &BlockId)>) {
    if !registry.rebuild_pending() {
        return;
    }
    registry.rebuild(blocks.iter());
    debug!(
        target: "jenga::registry",
        blocks = registry.block_count(),
        levels = registry.total_levels(),
        "registry.rebuilt"
    );
}

/// Delete the block at a top-down address. The registry keeps serving the
/// pre-removal layout until the next tick rebuilds it.
pub fn remove_block(world: &mut World, level: i32, color: BlockColor) -> Result<BlockId, RegistryError> {
    let (id, entity) = world.resource::<TowerRegistry>().resolve(level, color)?;
    if !world.despawn(entity) {
        return Err(RegistryError::SlotEmpty { level, color });
    }
    world.resource_mut::<TowerRegistry>().request_rebuild();
    Ok(id)
}
