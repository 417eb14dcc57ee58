use std::num::{ParseFloatError, ParseIntError};

use thiserror::Error;

use crate::{BlockColor, ControlCommand, GameEvent, PlayerType, Verb};

#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("{verb}: expected {expected} argument(s), got {got}")]
    WrongArity {
        verb: Verb,
        expected: usize,
        got: usize,
    },
    #[error("{verb}: invalid integer '{value}' for {context}: {source}")]
    InvalidInteger {
        verb: Verb,
        value: String,
        context: &'static str,
        source: ParseIntError,
    },
    #[error("{verb}: invalid float '{value}' for {context}: {source}")]
    InvalidFloat {
        verb: Verb,
        value: String,
        context: &'static str,
        source: ParseFloatError,
    },
    #[error("remove: invalid block color '{0}'")]
    InvalidColor(String),
    #[error("player_turn: invalid player type code {0}")]
    InvalidPlayerType(i32),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
}

impl CommandParseError {
    /// Verb of a recognised but malformed command; `None` for input that
    /// never matched the verb table.
    pub fn verb(&self) -> Option<Verb> {
        match self {
            CommandParseError::Empty
            | CommandParseError::UnknownCommand(_)
            | CommandParseError::UnknownEvent(_) => None,
            CommandParseError::WrongArity { verb, .. }
            | CommandParseError::InvalidInteger { verb, .. }
            | CommandParseError::InvalidFloat { verb, .. } => Some(*verb),
            CommandParseError::InvalidColor(_) => Some(Verb::Remove),
            CommandParseError::InvalidPlayerType(_) => Some(Verb::PlayerTurn),
        }
    }
}

/// Parse one inbound command line.
///
/// The verb is resolved through the prefix table first, so `removeall 1 y`
/// is a malformed `remove` rather than an unknown command. Argument counts
/// are exact.
pub fn parse_command_line(input: &str) -> Result<ControlCommand, CommandParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CommandParseError::Empty);
    }

    let verb = Verb::match_line(trimmed)
        .ok_or_else(|| CommandParseError::UnknownCommand(trimmed.to_string()))?;
    let args: Vec<&str> = trimmed.split_whitespace().skip(1).collect();

    match verb {
        Verb::Remove => {
            expect_args(verb, &args, 2)?;
            let level = parse_i32(verb, args[0], "level")?;
            let color = BlockColor::from_code(args[1])
                .ok_or_else(|| CommandParseError::InvalidColor(args[1].to_string()))?;
            Ok(ControlCommand::Remove { level, color })
        }
        Verb::Reset => Ok(ControlCommand::Reset),
        Verb::Timescale => {
            expect_args(verb, &args, 1)?;
            let scale = parse_f32(verb, args[0], "timescale")?;
            Ok(ControlCommand::Timescale { scale })
        }
        Verb::StaticFriction => {
            expect_args(verb, &args, 1)?;
            let value = parse_f32(verb, args[0], "static friction")?;
            Ok(ControlCommand::StaticFriction { value })
        }
        Verb::DynamicFriction => {
            expect_args(verb, &args, 1)?;
            let value = parse_f32(verb, args[0], "dynamic friction")?;
            Ok(ControlCommand::DynamicFriction { value })
        }
        Verb::SetScreenshotRes => {
            expect_args(verb, &args, 1)?;
            let width = parse_u32(verb, args[0], "screenshot width")?;
            Ok(ControlCommand::SetScreenshotRes { width })
        }
        Verb::IsFallen => Ok(ControlCommand::IsFallen),
        Verb::SetFallDetectDistance => {
            expect_args(verb, &args, 1)?;
            let distance = parse_f32(verb, args[0], "fall detect distance")?;
            Ok(ControlCommand::SetFallDetectDistance { distance })
        }
        Verb::GetNumOfBlocksInLevel => {
            expect_args(verb, &args, 1)?;
            let level = parse_i32(verb, args[0], "level")?;
            Ok(ControlCommand::GetNumOfBlocksInLevel { level })
        }
        Verb::GetAverageMaxTiltAngle => {
            expect_args(verb, &args, 0)?;
            Ok(ControlCommand::GetAverageMaxTiltAngle)
        }
        Verb::GetMostMaxTiltAngle => {
            expect_args(verb, &args, 0)?;
            Ok(ControlCommand::GetMostMaxTiltAngle)
        }
        Verb::PlayerTurn => {
            expect_args(verb, &args, 3)?;
            let code = parse_i32(verb, args[0], "player type")?;
            let player_type =
                PlayerType::from_code(code).ok_or(CommandParseError::InvalidPlayerType(code))?;
            let player_index = parse_u32(verb, args[1], "player index")?;
            let round = parse_u32(verb, args[2], "round")?;
            Ok(ControlCommand::PlayerTurn {
                player_type,
                player_index,
                round,
            })
        }
        Verb::RevertStep => {
            expect_args(verb, &args, 0)?;
            Ok(ControlCommand::RevertStep)
        }
        Verb::ToggleMenu => Ok(ControlCommand::ToggleMenu),
    }
}

/// Parse a line pushed by the simulation's dispatcher.
pub fn parse_game_event(input: &str) -> Result<GameEvent, CommandParseError> {
    let trimmed = input.trim();
    let mut parts = trimmed.split_whitespace();
    let keyword = parts.next().ok_or(CommandParseError::Empty)?;
    let args: Vec<&str> = parts.collect();
    let unknown = || CommandParseError::UnknownEvent(trimmed.to_string());

    match (keyword, args.as_slice()) {
        ("start", [p1, p2, rounds]) => {
            let player1 = p1
                .parse::<i32>()
                .ok()
                .and_then(PlayerType::from_code)
                .ok_or_else(unknown)?;
            let player2 = p2
                .parse::<i32>()
                .ok()
                .and_then(PlayerType::from_code)
                .ok_or_else(unknown)?;
            let rounds = rounds.parse::<u32>().map_err(|_| unknown())?;
            Ok(GameEvent::Start {
                player1,
                player2,
                rounds,
            })
        }
        ("finished_move", [level, color]) => {
            let level = level.parse::<u32>().map_err(|_| unknown())?;
            let color = BlockColor::from_code(color).ok_or_else(unknown)?;
            Ok(GameEvent::FinishedMove { level, color })
        }
        ("end_game", []) => Ok(GameEvent::EndGame),
        _ => Err(unknown()),
    }
}

fn expect_args(verb: Verb, args: &[&str], expected: usize) -> Result<(), CommandParseError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(CommandParseError::WrongArity {
            verb,
            expected,
            got: args.len(),
        })
    }
}

fn parse_i32(verb: Verb, value: &str, context: &'static str) -> Result<i32, CommandParseError> {
    value
        .parse::<i32>()
        .map_err(|source| CommandParseError::InvalidInteger {
            verb,
            value: value.to_string(),
            context,
            source,
        })
}

fn parse_u32(verb: Verb, value: &str, context: &'static str) -> Result<u32, CommandParseError> {
    value
        .parse::<u32>()
        .map_err(|source| CommandParseError::InvalidInteger {
            verb,
            value: value.to_string(),
            context,
            source,
        })
}

fn parse_f32(verb: Verb, value: &str, context: &'static str) -> Result<f32, CommandParseError> {
    value
        .parse::<f32>()
        .map_err(|source| CommandParseError::InvalidFloat {
            verb,
            value: value.to_string(),
            context,
            source,
        })
}
