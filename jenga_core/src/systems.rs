use bevy::prelude::*;
use jenga_protocol::BlockColor;
use tracing::{debug, info, warn};

use crate::{
    components::{BlockBundle, BlockId, RestPose},
    config::{BlockGeometry, TowerConfig},
    registry::{remove_block, TowerRegistry},
    resources::{FallDetector, SimulationTick},
    snapshot::{capture_snapshot, despawn_blocks, RevertHistory},
    stability::{StabilityMonitor, TowerFell},
    turn::{HumanMoveSignal, PendingMove, PlayerKind, TurnOrchestrator, TurnPhase},
};

/// Rest placement for every block of a full tower of `levels` levels.
///
/// Storage level 0 sits on the floor. Consecutive levels are rotated a
/// quarter turn about the vertical axis; slots run yellow, blue, green
/// across the level.
pub fn tower_layout(levels: u32, block: &BlockGeometry) -> Vec<(BlockId, Transform)> {
    let mut layout = Vec::with_capacity(levels as usize * BlockColor::ALL.len());
    for storage_level in 0..levels {
        let y = (storage_level as f32 + 0.5) * block.height;
        let crosswise = storage_level % 2 == 1;
        let rotation = if crosswise {
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_2)
        } else {
            Quat::IDENTITY
        };
        for color in BlockColor::ALL {
            let offset = (color.slot() as f32 - 1.0) * block.width;
            let translation = if crosswise {
                Vec3::new(offset, y, 0.0)
            } else {
                Vec3::new(0.0, y, offset)
            };
            layout.push((
                BlockId::new(storage_level, color),
                Transform::from_translation(translation).with_rotation(rotation),
            ));
        }
    }
    layout
}

pub fn spawn_tower(mut commands: Commands, config: Res<TowerConfig>) {
    let layout = tower_layout(config.levels, &config.block);
    let blocks = layout.len();
    commands.spawn_batch(
        layout
            .into_iter()
            .map(|(id, transform)| BlockBundle::new(id, transform.translation, transform)),
    );
    info!(
        target: "jenga::server",
        levels = config.levels,
        blocks,
        "tower.spawned"
    );
}

pub fn advance_tick(mut tick: ResMut<SimulationTick>) {
    tick.0 = tick.0.wrapping_add(1);
}

/// Headless stand-in for the floor trigger: a block that drifted off its
/// footprint by more than the detect distance, or dropped below the floor,
/// brings the tower down.
pub fn detect_fall(
    detector: Res<FallDetector>,
    monitor: Res<StabilityMonitor>,
    blocks: Query<(&BlockId, &Transform, &RestPose)>,
    mut falls: EventWriter<TowerFell>,
) {
    if monitor.is_collapsed() {
        return;
    }
    for (id, transform, rest) in &blocks {
        let drift = Vec2::new(
            transform.translation.x - rest.translation.x,
            transform.translation.z - rest.translation.z,
        )
        .length();
        if drift > detector.distance || transform.translation.y < 0.0 {
            falls.send(TowerFell { block: Some(*id) });
            return;
        }
    }
}

/// Apply the move signalled by the human-input collaborator, if the active
/// turn belongs to a human.
pub fn apply_human_move(world: &mut World) {
    let Some(human_move) = world.resource_mut::<HumanMoveSignal>().take() else {
        return;
    };
    let human_turn = world
        .resource::<TurnOrchestrator>()
        .state()
        .is_some_and(|state| {
            state.kind == PlayerKind::Human
                && state.phase == TurnPhase::WaitingForMove
        });
    if !human_turn {
        warn!(
            target: "jenga::turn",
            level = human_move.level,
            color = %human_move.color,
            "human_move.ignored=not_human_turn"
        );
        return;
    }
    if let Err(err) = world
        .resource::<TowerRegistry>()
        .resolve(human_move.level, human_move.color)
    {
        warn!(target: "jenga::turn", error = %err, "human_move.rejected");
        return;
    }

    capture_snapshot(world);
    match remove_block(world, human_move.level, human_move.color) {
        Ok(id) => {
            world
                .resource_mut::<StabilityMonitor>()
                .request_baseline_reset();
            world.resource_mut::<TurnOrchestrator>().begin_move(PendingMove {
                level: human_move.level as u32,
                color: human_move.color,
            });
            info!(target: "jenga::turn", block = %id, "human_move.applied");
        }
        Err(err) => warn!(target: "jenga::turn", error = %err, "human_move.rejected"),
    }
}

/// Tear the tower down and lay out a fresh one, dropping stability history,
/// the retained snapshot, and the turn state.
pub fn restart_game(world: &mut World) {
    let removed = despawn_blocks(world);
    let config = world.resource::<TowerConfig>().clone();
    for (id, transform) in tower_layout(config.levels, &config.block) {
        world.spawn(BlockBundle::new(id, transform.translation, transform));
    }

    world.insert_resource(TowerRegistry::new(config.levels));
    let mut monitor = StabilityMonitor::default();
    monitor.request_baseline_reset();
    world.insert_resource(monitor);
    world.resource_mut::<RevertHistory>().clear();
    world.resource_mut::<TurnOrchestrator>().reset();
    world.resource_mut::<HumanMoveSignal>().take();
    debug!(
        target: "jenga::server",
        removed,
        levels = config.levels,
        "tower.reset"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::ecs::system::RunSystemOnce;

    #[test]
    fn layout_fills_every_slot() {
        let layout = tower_layout(4, &BlockGeometry::default());
        assert_eq!(layout.len(), 12);
        let top = layout
            .iter()
            .filter(|(id, _)| id.storage_level == 3)
            .count();
        assert_eq!(top, 3);
        assert!(layout
            .iter()
            .all(|(_, transform)| transform.translation.y > 0.0));
    }

    #[test]
    fn drift_past_distance_raises_fall() {
        let mut world = World::new();
        world.init_resource::<Events<TowerFell>>();
        world.insert_resource(FallDetector { distance: 1.0 });
        world.insert_resource(StabilityMonitor::default());
        let id = BlockId::new(0, BlockColor::Blue);
        let entity = world
            .spawn(BlockBundle::new(id, Vec3::ZERO, Transform::IDENTITY))
            .id();

        world.run_system_once(detect_fall);
        assert!(world.resource::<Events<TowerFell>>().is_empty());

        world
            .get_mut::<Transform>(entity)
            .expect("block spawned")
            .translation = Vec3::new(1.5, 0.0, 0.0);
        world.run_system_once(detect_fall);
        assert_eq!(world.resource::<Events<TowerFell>>().len(), 1);
    }
}
