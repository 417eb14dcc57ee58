use bevy::prelude::*;
use jenga_core::{
    build_headless_app, execute, run_tick, BlockId, Outbox, RevertHistory, StabilityMonitor,
    TowerConfig, TowerRegistry, TurnOrchestrator, TurnPhase,
};
use jenga_protocol::{BlockColor, ControlCommand, GameEvent, PlayerType};

fn small_app(levels: u32) -> App {
    let config = TowerConfig {
        levels,
        tilt_sample_interval: 1,
        ..TowerConfig::default()
    };
    let mut app = build_headless_app(config);
    run_tick(&mut app);
    app
}

fn run(app: &mut App, command: ControlCommand) -> String {
    execute(&mut app.world, &command)
}

fn count(app: &mut App, level: i32) -> String {
    run(app, ControlCommand::GetNumOfBlocksInLevel { level })
}

fn remove(app: &mut App, level: i32, color: BlockColor) -> String {
    let response = run(app, ControlCommand::Remove { level, color });
    run_tick(app);
    response
}

fn present(app: &App) -> Vec<BlockId> {
    app.world
        .resource::<TowerRegistry>()
        .present_blocks()
        .into_iter()
        .collect()
}

fn tilt_block(app: &mut App, target: BlockId, degrees: f32) {
    let mut query = app.world.query::<(&BlockId, &mut Transform)>();
    for (id, mut transform) in query.iter_mut(&mut app.world) {
        if *id == target {
            transform.rotation = Quat::from_rotation_x(degrees.to_radians());
        }
    }
}

#[test]
fn remove_decrements_level_count_once() {
    let mut app = small_app(3);
    assert_eq!(count(&mut app, 1), "3");

    assert_eq!(remove(&mut app, 1, BlockColor::Yellow), "ACK");
    assert_eq!(count(&mut app, 1), "2");

    assert_eq!(remove(&mut app, 1, BlockColor::Yellow), "ACK");
    assert_eq!(count(&mut app, 1), "2");
    assert_eq!(count(&mut app, 0), "3");
}

#[test]
fn top_level_maps_to_highest_storage_index() {
    let mut app = small_app(3);
    remove(&mut app, 0, BlockColor::Green);
    assert!(!present(&app).contains(&BlockId::new(2, BlockColor::Green)));
    assert_eq!(count(&mut app, 3), "0");
    assert_eq!(count(&mut app, -1), "0");
}

#[test]
fn revert_restores_present_blocks_and_only_once() {
    let mut app = small_app(3);
    let before = present(&app);

    remove(&mut app, 2, BlockColor::Blue);
    assert_ne!(present(&app), before);

    assert_eq!(run(&mut app, ControlCommand::RevertStep), "Step reverted.");
    run_tick(&mut app);
    assert_eq!(present(&app), before);
    assert!(!app.world.resource::<RevertHistory>().has_snapshot());

    assert_eq!(run(&mut app, ControlCommand::RevertStep), "Nothing to revert.");
    run_tick(&mut app);
    assert_eq!(present(&app), before);
}

#[test]
fn revert_serves_pre_move_tilt_until_next_move() {
    let mut app = small_app(3);
    let leaning = BlockId::new(1, BlockColor::Yellow);
    tilt_block(&mut app, leaning, 6.0);
    run_tick(&mut app);

    let pre_move = run(&mut app, ControlCommand::GetMostMaxTiltAngle);
    let pre_move: f32 = pre_move.parse().expect("float response");
    assert!((pre_move - 6.0).abs() < 1e-3);

    remove(&mut app, 0, BlockColor::Blue);
    tilt_block(&mut app, leaning, 15.0);
    run_tick(&mut app);
    run_tick(&mut app);
    let after_move: f32 = run(&mut app, ControlCommand::GetMostMaxTiltAngle)
        .parse()
        .expect("float response");
    assert!((after_move - 15.0).abs() < 1e-3);

    assert_eq!(run(&mut app, ControlCommand::RevertStep), "Step reverted.");
    let frozen: f32 = run(&mut app, ControlCommand::GetMostMaxTiltAngle)
        .parse()
        .expect("float response");
    assert!((frozen - pre_move).abs() < 1e-3);
    run_tick(&mut app);
    let monitor = app.world.resource::<StabilityMonitor>();
    assert!((monitor.max_tilt(leaning).unwrap_or_default() - 6.0).abs() < 1e-3);
}

#[test]
fn unknown_state_untouched_by_invalid_level() {
    let mut app = small_app(3);
    let before = present(&app);
    assert_eq!(remove(&mut app, 7, BlockColor::Yellow), "ACK");
    assert_eq!(present(&app), before);
    assert!(!app.world.resource::<RevertHistory>().has_snapshot());
}

#[test]
fn finished_move_announced_after_settle_and_turn_passes() {
    let mut app = small_app(3);
    app.world
        .resource_mut::<TurnOrchestrator>()
        .start_game(vec![PlayerType::Dqn, PlayerType::Sarsa], 2)
        .expect("game starts");

    run(
        &mut app,
        ControlCommand::Remove {
            level: 1,
            color: BlockColor::Green,
        },
    );
    let state = app
        .world
        .resource::<TurnOrchestrator>()
        .state()
        .expect("turn active");
    assert_eq!(state.phase, TurnPhase::MoveInFlight);
    assert!(app.world.resource::<Outbox>().pending().is_empty());

    run_tick(&mut app);
    let events = app.world.resource_mut::<Outbox>().drain();
    assert_eq!(
        events,
        vec![GameEvent::FinishedMove {
            level: 1,
            color: BlockColor::Green
        }]
    );

    run_tick(&mut app);
    let state = app
        .world
        .resource::<TurnOrchestrator>()
        .state()
        .expect("next turn");
    assert_eq!(state.active_player_index, 1);
    assert_eq!(state.phase, TurnPhase::WaitingForMove);
}

#[test]
fn collapse_ends_running_game() {
    let mut app = small_app(3);
    app.world
        .resource_mut::<TurnOrchestrator>()
        .start_game(vec![PlayerType::Random, PlayerType::Dqn], 3)
        .expect("game starts");

    let mut query = app.world.query::<&mut Transform>();
    if let Some(mut transform) = query.iter_mut(&mut app.world).next() {
        transform.translation.y = -1.0;
    }
    run_tick(&mut app);

    assert_eq!(run(&mut app, ControlCommand::IsFallen), "true");
    assert!(!app.world.resource::<TurnOrchestrator>().game_active());
    let events = app.world.resource_mut::<Outbox>().drain();
    assert_eq!(events, vec![GameEvent::EndGame]);
}

#[test]
fn human_signal_commits_move_on_next_tick() {
    let mut app = small_app(3);
    app.world
        .resource_mut::<TurnOrchestrator>()
        .start_game(vec![PlayerType::Human, PlayerType::Dqn], 1)
        .expect("game starts");

    assert_eq!(remove(&mut app, 0, BlockColor::Yellow), "ACK");
    assert_eq!(count(&mut app, 0), "3");

    app.world
        .resource_mut::<jenga_core::HumanMoveSignal>()
        .submit(0, BlockColor::Yellow);
    run_tick(&mut app);
    run_tick(&mut app);
    assert_eq!(count(&mut app, 0), "2");

    let events = app.world.resource_mut::<Outbox>().drain();
    assert_eq!(
        events,
        vec![GameEvent::FinishedMove {
            level: 0,
            color: BlockColor::Yellow
        }]
    );
    let state = app
        .world
        .resource::<TurnOrchestrator>()
        .state()
        .expect("automated turn");
    assert_eq!(state.active_player_index, 1);
}

#[test]
fn reset_rebuilds_full_tower() {
    let mut app = small_app(3);
    remove(&mut app, 0, BlockColor::Yellow);
    remove(&mut app, 1, BlockColor::Blue);

    assert_eq!(run(&mut app, ControlCommand::Reset), "ACK");
    run_tick(&mut app);
    assert_eq!(present(&app).len(), 9);
    assert!(!app.world.resource::<RevertHistory>().has_snapshot());
    assert_eq!(run(&mut app, ControlCommand::RevertStep), "Nothing to revert.");
}

#[test]
fn physics_settings_reject_invalid_values() {
    let mut app = small_app(3);
    assert_eq!(run(&mut app, ControlCommand::Timescale { scale: 2.0 }), "ACK");
    assert_eq!(
        run(&mut app, ControlCommand::Timescale { scale: -1.0 }),
        "ACK"
    );
    let physics = *app.world.resource::<jenga_core::PhysicsSettings>();
    assert_eq!(physics.time_scale, 2.0);
    assert_eq!(app.world.resource::<Time<Virtual>>().relative_speed(), 2.0);
}
