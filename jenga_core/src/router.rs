//! Command routing between connection threads and the simulation thread.
//!
//! [`CommandRouter`] lives on connection threads. It parses each line, answers
//! from [`PublishedState`] where it can, and otherwise posts the command to
//! the simulation thread: queries wait for the computed answer, writes are
//! acknowledged immediately. [`execute`] is the simulation-thread half.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use bevy::prelude::*;
use crossbeam_channel::{bounded, Sender};
use jenga_protocol::{
    parse_command_line, responses, BlockColor, CommandParseError, ControlCommand, PlayerType,
    Verb,
};
use tracing::{debug, info, warn};

use crate::{
    registry::{remove_block, RegistryError, TowerRegistry},
    resources::{FallDetector, MenuState, PhysicsSettings, ScreenshotSettings},
    snapshot::{capture_snapshot, revert_step},
    stability::StabilityMonitor,
    systems::restart_game,
    turn::{HumanMoveSignal, PendingMove, TurnOrchestrator},
};

/// Work handed from other threads to the simulation thread.
#[derive(Debug)]
pub enum SimRequest {
    /// Apply a command; nobody waits for the result.
    Apply(ControlCommand),
    /// Evaluate a command and send the response string back.
    Query {
        command: ControlCommand,
        reply: Sender<String>,
    },
    StartGame {
        players: Vec<PlayerType>,
        rounds: u32,
    },
    HumanMove {
        level: i32,
        color: BlockColor,
    },
}

/// State the simulation thread publishes after every tick for lock-free
/// reads on connection threads.
#[derive(Debug, Default)]
pub struct PublishedState {
    collapsed: AtomicBool,
}

impl PublishedState {
    pub fn publish(&self, collapsed: bool) {
        self.collapsed.store(collapsed, Ordering::Release);
    }

    pub fn is_collapsed(&self) -> bool {
        self.collapsed.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub struct CommandRouter {
    requests: Sender<SimRequest>,
    published: Arc<PublishedState>,
    query_timeout: Duration,
}

impl CommandRouter {
    pub fn new(
        requests: Sender<SimRequest>,
        published: Arc<PublishedState>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            requests,
            published,
            query_timeout,
        }
    }

    /// Produce the response for one inbound line.
    pub fn handle_line(&self, line: &str) -> String {
        let command = match parse_command_line(line) {
            Ok(command) => command,
            Err(err) => return malformed_response(line, &err).to_string(),
        };

        match command {
            ControlCommand::IsFallen => bool_response(self.published.is_collapsed()).to_string(),
            command if command.verb().is_query() => self.query(command),
            command => {
                let verb = command.verb();
                if self.requests.send(SimRequest::Apply(command)).is_err() {
                    warn!(
                        target: "jenga::router",
                        %verb,
                        "command.dropped=simulation_stopped"
                    );
                }
                responses::ACK.to_string()
            }
        }
    }

    fn query(&self, command: ControlCommand) -> String {
        let verb = command.verb();
        let (reply, answer) = bounded(1);
        if self
            .requests
            .send(SimRequest::Query { command, reply })
            .is_err()
        {
            warn!(target: "jenga::router", %verb, "query.failed=simulation_stopped");
            return responses::SIMULATION_UNAVAILABLE.to_string();
        }
        match answer.recv_timeout(self.query_timeout) {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    target: "jenga::router",
                    %verb,
                    error = %err,
                    "query.failed=timeout"
                );
                responses::SIMULATION_UNAVAILABLE.to_string()
            }
        }
    }
}

fn malformed_response(line: &str, err: &CommandParseError) -> &'static str {
    match err.verb() {
        None => {
            debug!(target: "jenga::router", line, "command.unknown");
            responses::UNKNOWN_COMMAND
        }
        Some(Verb::GetNumOfBlocksInLevel) => {
            warn!(target: "jenga::router", line, error = %err, "command.malformed");
            responses::INVALID_LEVEL
        }
        Some(_) => {
            warn!(target: "jenga::router", line, error = %err, "command.malformed");
            responses::ACK
        }
    }
}

fn bool_response(value: bool) -> &'static str {
    if value {
        responses::TRUE
    } else {
        responses::FALSE
    }
}

/// Whether the command reads or edits the block layout, and so needs a
/// settled registry before it runs.
pub fn touches_tower(command: &ControlCommand) -> bool {
    matches!(
        command,
        ControlCommand::Remove { .. }
            | ControlCommand::GetNumOfBlocksInLevel { .. }
            | ControlCommand::GetAverageMaxTiltAngle
            | ControlCommand::GetMostMaxTiltAngle
            | ControlCommand::RevertStep
    )
}

/// Run a command against the world. Must be called on the simulation thread.
pub fn execute(world: &mut World, command: &ControlCommand) -> String {
    match *command {
        ControlCommand::Remove { level, color } => {
            apply_remove(world, level, color);
            responses::ACK.to_string()
        }
        ControlCommand::Reset => {
            restart_game(world);
            info!(target: "jenga::router", "command.applied=reset");
            responses::ACK.to_string()
        }
        ControlCommand::Timescale { scale } => {
            if !scale.is_finite() || scale < 0.0 {
                warn!(target: "jenga::router", scale, "timescale.rejected=invalid");
                return responses::ACK.to_string();
            }
            world.resource_mut::<PhysicsSettings>().time_scale = scale;
            if let Some(mut time) = world.get_resource_mut::<Time<Virtual>>() {
                time.set_relative_speed(scale);
            }
            debug!(target: "jenga::router", scale, "command.applied=timescale");
            responses::ACK.to_string()
        }
        ControlCommand::StaticFriction { value } => {
            if valid_non_negative(value, "staticfriction") {
                world.resource_mut::<PhysicsSettings>().static_friction = value;
            }
            responses::ACK.to_string()
        }
        ControlCommand::DynamicFriction { value } => {
            if valid_non_negative(value, "dynamicfriction") {
                world.resource_mut::<PhysicsSettings>().dynamic_friction = value;
            }
            responses::ACK.to_string()
        }
        ControlCommand::SetScreenshotRes { width } => {
            let mut settings = world.resource_mut::<ScreenshotSettings>();
            match settings.set_final_width(width) {
                Ok(()) => debug!(
                    target: "jenga::router",
                    width = settings.width,
                    height = settings.height,
                    "command.applied=set_screenshot_res"
                ),
                Err(err) => warn!(
                    target: "jenga::router",
                    width,
                    error = %err,
                    "command.rejected=set_screenshot_res"
                ),
            }
            responses::ACK.to_string()
        }
        ControlCommand::IsFallen => {
            bool_response(world.resource::<StabilityMonitor>().is_collapsed()).to_string()
        }
        ControlCommand::SetFallDetectDistance { distance } => {
            if valid_non_negative(distance, "set_fall_detect_distance") {
                world.resource_mut::<FallDetector>().distance = distance;
            }
            responses::ACK.to_string()
        }
        ControlCommand::GetNumOfBlocksInLevel { level } => {
            match world.resource::<TowerRegistry>().blocks_in_level(level) {
                Ok(count) => count.to_string(),
                Err(err) => {
                    debug!(target: "jenga::router", error = %err, "get_num.out_of_range");
                    "0".to_string()
                }
            }
        }
        ControlCommand::GetAverageMaxTiltAngle => world
            .resource::<StabilityMonitor>()
            .average_max_tilt()
            .to_string(),
        ControlCommand::GetMostMaxTiltAngle => world
            .resource::<StabilityMonitor>()
            .peak_max_tilt()
            .to_string(),
        ControlCommand::PlayerTurn {
            player_type,
            player_index,
            round,
        } => {
            if let Err(err) = world.resource_mut::<TurnOrchestrator>().player_turn(
                player_type,
                player_index,
                round,
            ) {
                warn!(target: "jenga::router", error = %err, "player_turn.rejected");
            }
            responses::ACK.to_string()
        }
        ControlCommand::RevertStep => match revert_step(world) {
            Ok(_) => responses::STEP_REVERTED.to_string(),
            Err(err) => {
                info!(target: "jenga::router", error = %err, "revert.rejected");
                responses::NOTHING_TO_REVERT.to_string()
            }
        },
        ControlCommand::ToggleMenu => {
            let visible = world.resource_mut::<MenuState>().toggle();
            debug!(target: "jenga::router", visible, "command.applied=toggle_menu");
            responses::ACK.to_string()
        }
    }
}

fn valid_non_negative(value: f32, verb: &'static str) -> bool {
    if value.is_finite() && value >= 0.0 {
        true
    } else {
        warn!(target: "jenga::router", verb, value, "command.rejected=invalid_value");
        false
    }
}

fn apply_remove(world: &mut World, level: i32, color: BlockColor) {
    if let Err(err) = world.resource::<TurnOrchestrator>().authorize_move() {
        warn!(target: "jenga::router", level, %color, error = %err, "remove.rejected=turn");
        return;
    }
    if let Err(err) = world.resource::<TowerRegistry>().resolve(level, color) {
        let reason = match err {
            RegistryError::LevelOutOfRange { .. } => "remove.rejected=out_of_range",
            RegistryError::SlotEmpty { .. } => "remove.rejected=slot_empty",
        };
        warn!(target: "jenga::router", level, %color, error = %err, "{}", reason);
        return;
    }

    capture_snapshot(world);
    match remove_block(world, level, color) {
        Ok(id) => {
            world
                .resource_mut::<StabilityMonitor>()
                .request_baseline_reset();
            world.resource_mut::<TurnOrchestrator>().begin_move(PendingMove {
                level: level as u32,
                color,
            });
            info!(target: "jenga::router", level, %color, block = %id, "remove.applied");
        }
        Err(err) => warn!(target: "jenga::router", error = %err, "remove.rejected"),
    }
}

/// Queue a human completion signal. Applied on the next tick.
pub fn submit_human_move(world: &mut World, level: i32, color: BlockColor) {
    world.resource_mut::<HumanMoveSignal>().submit(level, color);
}
