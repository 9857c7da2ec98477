//! Status and phase vocabulary shared across the fleet.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Supervision status of one game server instance, as seen by the manager.
///
/// `queued → starting → ready ⇄ occupied`, with `sleeping` and `stopped`
/// reachable from any state via operator commands or process exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    #[default]
    Unknown,
    /// Created but not yet asked to start.
    Queued,
    /// Process spawned, waiting for the first status frame.
    Starting,
    /// Connected and idle, accepting matches.
    Ready,
    /// At least one player present.
    Occupied,
    /// Administratively parked; will not accept matches.
    Sleeping,
    /// Process not running.
    Stopped,
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Queued => "queued",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Occupied => "occupied",
            Self::Sleeping => "sleeping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Match lifecycle phase reported by the game server itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    #[default]
    Idle,
    InLobby,
    Banning,
    Picking,
    Loading,
    Preparation,
    MatchStarted,
    GameEnding,
    GameEnded,
}

impl GamePhase {
    /// Decode the phase byte from a status frame.
    ///
    /// Bytes outside the known range fall back to `Idle`, matching how the
    /// game server treats an unknown phase.
    pub fn from_wire(b: u8) -> Self {
        match b {
            0 => Self::Idle,
            1 => Self::InLobby,
            2 => Self::Banning,
            3 => Self::Picking,
            4 => Self::Loading,
            5 => Self::Preparation,
            6 => Self::MatchStarted,
            7 => Self::GameEnding,
            8 => Self::GameEnded,
            _ => Self::Idle,
        }
    }

    /// True while a match is in progress or being set up.
    pub fn in_match(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::InLobby => "in_lobby",
            Self::Banning => "banning",
            Self::Picking => "picking",
            Self::Loading => "loading",
            Self::Preparation => "preparation",
            Self::MatchStarted => "match_started",
            Self::GameEnding => "game_ending",
            Self::GameEnded => "game_ended",
        };
        f.write_str(s)
    }
}

/// Replay upload lifecycle carried by `0x4A` packets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplayState {
    #[default]
    None,
    Requested,
    Queued,
    Uploading,
    Uploaded,
    Failed,
    NotFound,
    Ready,
}

impl ReplayState {
    /// Decode the status byte from a replay status frame.
    pub fn from_wire(b: u8) -> Self {
        match b {
            1 => Self::Requested,
            2 => Self::Queued,
            3 => Self::Uploading,
            4 => Self::Uploaded,
            5 => Self::Failed,
            6 => Self::NotFound,
            7 => Self::Ready,
            _ => Self::None,
        }
    }
}

impl fmt::Display for ReplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::Requested => "REQUESTED",
            Self::Queued => "QUEUED",
            Self::Uploading => "UPLOADING",
            Self::Uploaded => "UPLOADED",
            Self::Failed => "FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::Ready => "READY",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&GameStatus::Occupied).unwrap(),
            "\"occupied\""
        );
    }

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&GamePhase::MatchStarted).unwrap(),
            "\"match_started\""
        );
    }

    #[test]
    fn phase_round_trips_wire_bytes() {
        for b in 0..=8u8 {
            let phase = GamePhase::from_wire(b);
            assert_eq!(GamePhase::from_wire(b), phase);
        }
        assert_eq!(GamePhase::from_wire(6), GamePhase::MatchStarted);
        assert_eq!(GamePhase::from_wire(200), GamePhase::Idle);
    }

    #[test]
    fn replay_state_decodes_known_bytes() {
        assert_eq!(ReplayState::from_wire(4), ReplayState::Uploaded);
        assert_eq!(ReplayState::from_wire(99), ReplayState::None);
        assert_eq!(ReplayState::NotFound.to_string(), "NOT_FOUND");
    }
}
