use std::fmt;

use serde::{Deserialize, Serialize};

/// Port the simulation listens on for controller commands.
pub const DEFAULT_COMMAND_PORT: u16 = 25001;
/// Port on the controller host that receives pushed [`GameEvent`]s.
pub const DEFAULT_EVENT_PORT: u16 = 25002;

/// Response strings written back on the command connection.
pub mod responses {
    pub const ACK: &str = "ACK";
    pub const UNKNOWN_COMMAND: &str = "Unknown command";
    pub const STEP_REVERTED: &str = "Step reverted.";
    pub const NOTHING_TO_REVERT: &str = "Nothing to revert.";
    pub const INVALID_LEVEL: &str = "Invalid level value";
    pub const SIMULATION_UNAVAILABLE: &str = "Simulation unavailable";
    pub const TRUE: &str = "true";
    pub const FALSE: &str = "false";
}

/// Block slot within a level, named by the color painted on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockColor {
    Yellow,
    Blue,
    Green,
}

impl BlockColor {
    pub const ALL: [BlockColor; 3] = [BlockColor::Yellow, BlockColor::Blue, BlockColor::Green];

    pub fn slot(self) -> usize {
        match self {
            BlockColor::Yellow => 0,
            BlockColor::Blue => 1,
            BlockColor::Green => 2,
        }
    }

    pub fn from_slot(slot: usize) -> Option<Self> {
        Self::ALL.get(slot).copied()
    }

    pub fn code(self) -> &'static str {
        match self {
            BlockColor::Yellow => "y",
            BlockColor::Blue => "b",
            BlockColor::Green => "g",
        }
    }

    /// Case-insensitive lookup of the single-letter wire code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "y" => Some(BlockColor::Yellow),
            "b" => Some(BlockColor::Blue),
            "g" => Some(BlockColor::Green),
            _ => None,
        }
    }
}

impl fmt::Display for BlockColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Player type codes exchanged with the controller.
///
/// Everything except [`PlayerType::Human`] is an automated agent whose moves
/// arrive as `remove` commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerType {
    Random,
    Dqn,
    Sarsa,
    Human,
}

impl PlayerType {
    pub fn code(self) -> i32 {
        match self {
            PlayerType::Random => 0,
            PlayerType::Dqn => 1,
            PlayerType::Sarsa => 2,
            PlayerType::Human => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(PlayerType::Random),
            1 => Some(PlayerType::Dqn),
            2 => Some(PlayerType::Sarsa),
            3 => Some(PlayerType::Human),
            _ => None,
        }
    }

    pub fn is_human(self) -> bool {
        matches!(self, PlayerType::Human)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum VerbMatch {
    Exact,
    Prefix,
}

/// Command verbs recognised on the inbound port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Remove,
    Reset,
    Timescale,
    StaticFriction,
    DynamicFriction,
    SetScreenshotRes,
    IsFallen,
    SetFallDetectDistance,
    GetNumOfBlocksInLevel,
    GetAverageMaxTiltAngle,
    GetMostMaxTiltAngle,
    PlayerTurn,
    RevertStep,
    ToggleMenu,
}

// Order matters: the first matching entry wins.
const VERB_TABLE: &[(&str, VerbMatch, Verb)] = &[
    ("remove", VerbMatch::Prefix, Verb::Remove),
    ("reset", VerbMatch::Exact, Verb::Reset),
    ("timescale", VerbMatch::Prefix, Verb::Timescale),
    ("staticfriction", VerbMatch::Prefix, Verb::StaticFriction),
    ("dynamicfriction", VerbMatch::Prefix, Verb::DynamicFriction),
    ("set_screenshot_res", VerbMatch::Prefix, Verb::SetScreenshotRes),
    ("isfallen", VerbMatch::Exact, Verb::IsFallen),
    (
        "set_fall_detect_distance",
        VerbMatch::Prefix,
        Verb::SetFallDetectDistance,
    ),
    (
        "get_num_of_blocks_in_level",
        VerbMatch::Prefix,
        Verb::GetNumOfBlocksInLevel,
    ),
    (
        "get_average_max_tilt_angle",
        VerbMatch::Prefix,
        Verb::GetAverageMaxTiltAngle,
    ),
    (
        "get_most_max_tilt_angle",
        VerbMatch::Prefix,
        Verb::GetMostMaxTiltAngle,
    ),
    ("player_turn", VerbMatch::Prefix, Verb::PlayerTurn),
    ("revert_step", VerbMatch::Prefix, Verb::RevertStep),
    ("toggle_menu", VerbMatch::Exact, Verb::ToggleMenu),
];

impl Verb {
    /// Resolve the verb of an already-trimmed command line.
    pub fn match_line(line: &str) -> Option<Verb> {
        VERB_TABLE
            .iter()
            .find(|(keyword, mode, _)| match mode {
                VerbMatch::Exact => line == *keyword,
                VerbMatch::Prefix => line.starts_with(keyword),
            })
            .map(|(_, _, verb)| *verb)
    }

    pub fn keyword(self) -> &'static str {
        VERB_TABLE
            .iter()
            .find(|(_, _, verb)| *verb == self)
            .map(|(keyword, _, _)| *keyword)
            .unwrap_or("unknown")
    }

    /// Whether the response carries a value computed from simulation state,
    /// as opposed to an immediate acknowledgement.
    pub fn is_query(self) -> bool {
        matches!(
            self,
            Verb::IsFallen
                | Verb::GetNumOfBlocksInLevel
                | Verb::GetAverageMaxTiltAngle
                | Verb::GetMostMaxTiltAngle
                | Verb::RevertStep
        )
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Fully parsed inbound command.
///
/// Levels are addressed top-down: level 0 is the top of the structure.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Remove { level: i32, color: BlockColor },
    Reset,
    Timescale { scale: f32 },
    StaticFriction { value: f32 },
    DynamicFriction { value: f32 },
    SetScreenshotRes { width: u32 },
    IsFallen,
    SetFallDetectDistance { distance: f32 },
    GetNumOfBlocksInLevel { level: i32 },
    GetAverageMaxTiltAngle,
    GetMostMaxTiltAngle,
    PlayerTurn {
        player_type: PlayerType,
        player_index: u32,
        round: u32,
    },
    RevertStep,
    ToggleMenu,
}

impl ControlCommand {
    pub fn verb(&self) -> Verb {
        match self {
            ControlCommand::Remove { .. } => Verb::Remove,
            ControlCommand::Reset => Verb::Reset,
            ControlCommand::Timescale { .. } => Verb::Timescale,
            ControlCommand::StaticFriction { .. } => Verb::StaticFriction,
            ControlCommand::DynamicFriction { .. } => Verb::DynamicFriction,
            ControlCommand::SetScreenshotRes { .. } => Verb::SetScreenshotRes,
            ControlCommand::IsFallen => Verb::IsFallen,
            ControlCommand::SetFallDetectDistance { .. } => Verb::SetFallDetectDistance,
            ControlCommand::GetNumOfBlocksInLevel { .. } => Verb::GetNumOfBlocksInLevel,
            ControlCommand::GetAverageMaxTiltAngle => Verb::GetAverageMaxTiltAngle,
            ControlCommand::GetMostMaxTiltAngle => Verb::GetMostMaxTiltAngle,
            ControlCommand::PlayerTurn { .. } => Verb::PlayerTurn,
            ControlCommand::RevertStep => Verb::RevertStep,
            ControlCommand::ToggleMenu => Verb::ToggleMenu,
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = self.verb();
        match self {
            ControlCommand::Remove { level, color } => write!(f, "{verb} {level} {color}"),
            ControlCommand::Timescale { scale } => write!(f, "{verb} {scale}"),
            ControlCommand::StaticFriction { value } | ControlCommand::DynamicFriction { value } => {
                write!(f, "{verb} {value}")
            }
            ControlCommand::SetScreenshotRes { width } => write!(f, "{verb} {width}"),
            ControlCommand::SetFallDetectDistance { distance } => write!(f, "{verb} {distance}"),
            ControlCommand::GetNumOfBlocksInLevel { level } => write!(f, "{verb} {level}"),
            ControlCommand::PlayerTurn {
                player_type,
                player_index,
                round,
            } => write!(
                f,
                "{verb} {} {player_index} {round}",
                player_type.code()
            ),
            ControlCommand::Reset
            | ControlCommand::IsFallen
            | ControlCommand::GetAverageMaxTiltAngle
            | ControlCommand::GetMostMaxTiltAngle
            | ControlCommand::RevertStep
            | ControlCommand::ToggleMenu => write!(f, "{verb}"),
        }
    }
}

/// Notifications pushed from the simulation to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEvent {
    Start {
        player1: PlayerType,
        player2: PlayerType,
        rounds: u32,
    },
    FinishedMove {
        level: u32,
        color: BlockColor,
    },
    EndGame,
}

impl fmt::Display for GameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameEvent::Start {
                player1,
                player2,
                rounds,
            } => write!(f, "start {} {} {}", player1.code(), player2.code(), rounds),
            GameEvent::FinishedMove { level, color } => write!(f, "finished_move {level} {color}"),
            GameEvent::EndGame => f.write_str("end_game"),
        }
    }
}
