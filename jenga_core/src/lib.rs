//! Headless simulation core for the block-stacking control server.
//!
//! The tower lives in a Bevy [`World`] driven one tick at a time by
//! [`run_tick`]. Everything that touches it runs on a single simulation
//! thread; listener and connection threads reach it through
//! [`router::SimRequest`]s handled by [`host::SimulationHost`].

mod components;
pub mod config;
pub mod dispatch;
pub mod host;
pub mod listener;
mod registry;
mod resources;
pub mod router;
mod snapshot;
mod stability;
mod systems;
mod turn;

use bevy::prelude::*;

pub use components::{BlockBundle, BlockId, RestPose};
pub use config::{load_tower_config_from_env, TowerConfig, TowerConfigError};
pub use dispatch::{dispatch_blocking, DispatchError, Dispatcher};
pub use host::{ServerError, ServerHandle, SimulationHost};
pub use listener::CommandListener;
pub use registry::{remove_block, RegistryError, TowerRegistry, SLOTS_PER_LEVEL};
pub use resources::{
    FallDetector, MenuState, Outbox, PhysicsSettings, ScreenshotError, ScreenshotSettings,
    SimulationTick, MAX_CAPTURE_WIDTH,
};
pub use router::{execute, CommandRouter, PublishedState, SimRequest};
pub use snapshot::{capture_snapshot, revert_step, RevertError, RevertHistory, TowerSnapshot};
pub use stability::{tilt_degrees, StabilityMonitor, TiltAggregate, TowerFell};
pub use systems::{restart_game, tower_layout};
pub use turn::{
    HumanMove, HumanMoveSignal, PendingMove, PlayerKind, TurnAdvance, TurnError,
    TurnOrchestrator, TurnPhase, TurnState,
};

/// Construct a Bevy [`App`] holding a full tower and the control pipeline.
pub fn build_headless_app(config: TowerConfig) -> App {
    let mut app = App::new();

    let registry = TowerRegistry::new(config.levels);
    let mut monitor = StabilityMonitor::default();
    monitor.request_baseline_reset();
    let physics = PhysicsSettings::from_config(&config);
    let screenshots = ScreenshotSettings::from_config(&config);
    let detector = FallDetector {
        distance: config.fall_detect_distance,
    };

    app.add_plugins(MinimalPlugins)
        .add_event::<TowerFell>()
        .insert_resource(SimulationTick::default())
        .insert_resource(registry)
        .insert_resource(monitor)
        .insert_resource(physics)
        .insert_resource(screenshots)
        .insert_resource(detector)
        .insert_resource(MenuState::default())
        .insert_resource(Outbox::default())
        .insert_resource(RevertHistory::default())
        .insert_resource(TurnOrchestrator::default())
        .insert_resource(HumanMoveSignal::default())
        .insert_resource(config)
        .add_systems(Startup, systems::spawn_tower)
        .add_systems(
            Update,
            (
                systems::apply_human_move,
                systems::advance_tick,
                registry::rebuild_registry,
                stability::reset_stability_baseline,
                stability::sample_tilt,
                systems::detect_fall,
                stability::record_tower_fall,
                turn::advance_turns,
            )
                .chain(),
        );

    let time_scale = app.world.resource::<PhysicsSettings>().time_scale;
    if let Some(mut time) = app.world.get_resource_mut::<Time<Virtual>>() {
        time.set_relative_speed(time_scale.max(0.0));
    }

    app
}

/// Execute a single simulation tick.
///
/// Runs the chained systems configured in [`build_headless_app`]: human move
/// intake, tick counter, registry rebuild, stability baseline and sampling,
/// fall detection, and turn bookkeeping. Callers handle event dispatch.
pub fn run_tick(app: &mut App) {
    app.update();
}
