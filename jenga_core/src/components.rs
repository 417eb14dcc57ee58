use std::fmt;

use bevy::prelude::*;
use jenga_protocol::BlockColor;

/// Identity of a tower block.
///
/// `storage_level` counts bottom-up, the order levels are laid out in the
/// scene. The controller addresses levels top-down; [`crate::TowerRegistry`]
/// owns the conversion.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    pub storage_level: u32,
    pub color: BlockColor,
}

impl BlockId {
    pub fn new(storage_level: u32, color: BlockColor) -> Self {
        Self {
            storage_level,
            color,
        }
    }

    pub fn slot(&self) -> usize {
        self.color.slot()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.storage_level, self.color)
    }
}

/// Translation a block was placed at; the headless fall detector measures
/// displacement from it.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct RestPose {
    pub translation: Vec3,
}

/// Bundle spawned for every block of a fresh or restored tower.
#[derive(Bundle, Debug, Clone)]
pub struct BlockBundle {
    pub id: BlockId,
    pub rest: RestPose,
    pub transform: Transform,
}

impl BlockBundle {
    pub fn new(id: BlockId, rest: Vec3, transform: Transform) -> Self {
        Self {
            id,
            rest: RestPose { translation: rest },
            transform,
        }
    }
}
