//! Turn state machine for a game between two or more players.
//!
//! A turn moves `WaitingForMove -> MoveInFlight -> RoundComplete` and the
//! next tick hands control to the following player. Automated players park in
//! `WaitingForMove` until the controller removes a block; human players wait
//! for [`HumanMoveSignal`].

use std::fmt;

use bevy::prelude::*;
use jenga_protocol::{BlockColor, GameEvent, PlayerType};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    registry::TowerRegistry,
    resources::{Outbox, ScreenshotSettings},
    stability::StabilityMonitor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerKind {
    Human,
    Automated,
}

impl From<PlayerType> for PlayerKind {
    fn from(value: PlayerType) -> Self {
        if value.is_human() {
            PlayerKind::Human
        } else {
            PlayerKind::Automated
        }
    }
}

impl fmt::Display for PlayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerKind::Human => f.write_str("human"),
            PlayerKind::Automated => f.write_str("automated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    WaitingForMove,
    MoveInFlight,
    RoundComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnState {
    pub active_player_index: u32,
    pub kind: PlayerKind,
    pub round_number: u32,
    pub phase: TurnPhase,
}

impl TurnState {
    pub fn is_active(&self) -> bool {
        matches!(self.phase, TurnPhase::WaitingForMove | TurnPhase::MoveInFlight)
    }
}

/// A committed removal waiting for the registry to settle before
/// `finished_move` is announced. `level` is top-down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingMove {
    pub level: u32,
    pub color: BlockColor,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TurnError {
    #[error("a game needs at least one player")]
    NoPlayers,
    #[error("a game needs at least one round")]
    NoRounds,
    #[error("player {active} is still taking a turn")]
    TurnActive { active: u32 },
    #[error("player {index} is not part of a game with {players} players")]
    PlayerOutOfRange { index: u32, players: usize },
    #[error("a move is already in flight")]
    MoveInFlight,
    #[error("player {active} is human; moves come from the selection UI")]
    HumanTurn { active: u32 },
    #[error("no turn is active")]
    NoActiveTurn,
}

/// Outcome of handing control past a completed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnAdvance {
    Next(TurnState),
    GameOver,
}

#[derive(Resource, Debug, Clone, Default)]
pub struct TurnOrchestrator {
    players: Vec<PlayerType>,
    total_rounds: u32,
    game_active: bool,
    state: Option<TurnState>,
    pending_move: Option<PendingMove>,
}

impl TurnOrchestrator {
    pub fn state(&self) -> Option<TurnState> {
        self.state
    }

    pub fn players(&self) -> &[PlayerType] {
        &self.players
    }

    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    pub fn game_active(&self) -> bool {
        self.game_active
    }

    pub fn pending_move(&self) -> Option<PendingMove> {
        self.pending_move
    }

    /// Configure a new game and hand the first turn to player 0.
    pub fn start_game(&mut self, players: Vec<PlayerType>, rounds: u32) -> Result<(), TurnError> {
        if players.is_empty() {
            return Err(TurnError::NoPlayers);
        }
        if rounds == 0 {
            return Err(TurnError::NoRounds);
        }
        self.players = players;
        self.total_rounds = rounds;
        self.game_active = true;
        self.state = None;
        self.pending_move = None;
        let kind = PlayerKind::from(self.players[0]);
        self.start_turn(0, kind, 1)
    }

    /// Drop the game and any turn in progress.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Make `index` the active player. Rejected while another turn is
    /// still waiting for or executing a move.
    pub fn start_turn(&mut self, index: u32, kind: PlayerKind, round: u32) -> Result<(), TurnError> {
        if let Some(state) = self.state.filter(TurnState::is_active) {
            return Err(TurnError::TurnActive {
                active: state.active_player_index,
            });
        }
        if self.game_active && index as usize >= self.players.len() {
            return Err(TurnError::PlayerOutOfRange {
                index,
                players: self.players.len(),
            });
        }
        let state = TurnState {
            active_player_index: index,
            kind,
            round_number: round,
            phase: TurnPhase::WaitingForMove,
        };
        self.state = Some(state);
        info!(
            target: "jenga::turn",
            player = index,
            kind = %kind,
            round,
            "turn.started"
        );
        Ok(())
    }

    /// Controller-announced turn. Repeating the active player's turn is a
    /// no-op.
    pub fn player_turn(&mut self, player: PlayerType, index: u32, round: u32) -> Result<(), TurnError> {
        if let Some(state) = self.state.filter(TurnState::is_active) {
            if state.active_player_index == index {
                return Ok(());
            }
        }
        self.start_turn(index, PlayerKind::from(player), round)
    }

    /// Check that an automated removal may be applied now. Removals outside
    /// a turn are accepted so a bare controller can drive the tower.
    pub fn authorize_move(&self) -> Result<(), TurnError> {
        match self.state {
            None => Ok(()),
            Some(state) => match (state.phase, state.kind) {
                (TurnPhase::MoveInFlight, _) => Err(TurnError::MoveInFlight),
                (_, PlayerKind::Human) => Err(TurnError::HumanTurn {
                    active: state.active_player_index,
                }),
                _ => Ok(()),
            },
        }
    }

    /// Record a committed removal. Within a turn this enters `MoveInFlight`.
    pub fn begin_move(&mut self, pending: PendingMove) {
        if let Some(state) = self.state.as_mut() {
            if state.phase == TurnPhase::WaitingForMove {
                state.phase = TurnPhase::MoveInFlight;
            }
        }
        self.pending_move = Some(pending);
    }

    /// Hand out the committed move once, for the `finished_move` push.
    pub fn take_pending_move(&mut self) -> Option<PendingMove> {
        self.pending_move.take()
    }

    /// Close the active turn.
    pub fn end_turn(&mut self) -> Result<TurnState, TurnError> {
        let state = self
            .state
            .as_mut()
            .filter(|state| state.is_active())
            .ok_or(TurnError::NoActiveTurn)?;
        state.phase = TurnPhase::RoundComplete;
        debug!(
            target: "jenga::turn",
            player = state.active_player_index,
            round = state.round_number,
            "turn.completed"
        );
        Ok(*state)
    }

    /// Move past a completed turn to the next player, wrapping into the next
    /// round. Returns `None` while the current turn is still running.
    pub fn advance(&mut self) -> Option<TurnAdvance> {
        let state = self.state.filter(|state| state.phase == TurnPhase::RoundComplete)?;
        if !self.game_active || self.players.is_empty() {
            return None;
        }

        let mut next = state.active_player_index + 1;
        let mut round = state.round_number;
        if next as usize >= self.players.len() {
            next = 0;
            round += 1;
        }
        if round > self.total_rounds {
            self.finish_game();
            return Some(TurnAdvance::GameOver);
        }

        self.state = None;
        let kind = PlayerKind::from(self.players[next as usize]);
        match self.start_turn(next, kind, round) {
            Ok(()) => self.state.map(TurnAdvance::Next),
            Err(err) => {
                warn!(target: "jenga::turn", error = %err, "turn.advance_failed");
                None
            }
        }
    }

    /// End the game early, e.g. after a collapse.
    pub fn finish_game(&mut self) {
        self.game_active = false;
        self.state = None;
        info!(target: "jenga::turn", "game.ended");
    }
}

/// Completion signal delivered by the human-input collaborator.
#[derive(Resource, Debug, Clone, Default)]
pub struct HumanMoveSignal {
    submitted: Option<HumanMove>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanMove {
    pub level: i32,
    pub color: BlockColor,
}

impl HumanMoveSignal {
    pub fn submit(&mut self, level: i32, color: BlockColor) {
        self.submitted = Some(HumanMove { level, color });
    }

    pub fn take(&mut self) -> Option<HumanMove> {
        self.submitted.take()
    }
}

/// Per-tick turn bookkeeping: announce settled moves, close the turn they
/// belong to, hand control to the next player, and end the game on collapse.
pub fn advance_turns(
    registry: Res<TowerRegistry>,
    monitor: Res<StabilityMonitor>,
    mut orchestrator: ResMut<TurnOrchestrator>,
    mut screenshots: ResMut<ScreenshotSettings>,
    mut outbox: ResMut<Outbox>,
) {
    if orchestrator.pending_move().is_some() && !registry.rebuild_pending() {
        if let Some(pending) = orchestrator.take_pending_move() {
            outbox.push(GameEvent::FinishedMove {
                level: pending.level,
                color: pending.color,
            });
            screenshots.request_capture();
            if orchestrator
                .state()
                .is_some_and(|state| state.phase == TurnPhase::MoveInFlight)
            {
                if let Err(err) = orchestrator.end_turn() {
                    warn!(target: "jenga::turn", error = %err, "turn.end_failed");
                }
            }
        }
    }

    if orchestrator.game_active() && monitor.is_collapsed() {
        orchestrator.finish_game();
        outbox.push(GameEvent::EndGame);
        return;
    }

    if let Some(TurnAdvance::GameOver) = orchestrator.advance() {
        outbox.push(GameEvent::EndGame);
    }
}
