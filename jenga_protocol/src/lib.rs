//! Wire contract between the Jenga simulation and an external controller.
//!
//! The protocol is line-oriented UTF-8 text: the controller writes one
//! command per write on the inbound port and reads one response back, while
//! the simulation pushes [`GameEvent`] lines to the controller's port on
//! short-lived connections. This crate holds the grammar on both sides and
//! has no dependency on the simulation runtime.

pub mod client;
mod command_text;
mod commands;

pub use client::ControlClient;
pub use command_text::{parse_command_line, parse_game_event, CommandParseError};
pub use commands::{
    responses, BlockColor, ControlCommand, GameEvent, PlayerType, Verb, DEFAULT_COMMAND_PORT,
    DEFAULT_EVENT_PORT,
};
