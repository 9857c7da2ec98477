//! Per-instance view of the supervised match.
//!
//! All reads and writes are serialized through an interior lock; a
//! snapshot copies everything out under the read lock so callers never
//! share mutable state with the instance.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

use gamekeeper_core::{GamePhase, GameStatus};

/// Most lag events retained per instance. The total counter keeps
/// growing; only the history ring is bounded.
pub const LAG_HISTORY_CAP: usize = 1000;

/// One connected player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerInfo {
    pub name: String,
    pub id: u32,
    /// Rating carried over from the master service, when known.
    pub psr: f64,
    pub joined_at: DateTime<Utc>,
    pub ping: u16,
}

/// One recorded lag event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SkippedFrame {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u32,
}

#[derive(Debug)]
struct StateInner {
    status: GameStatus,
    phase: GamePhase,

    match_id: u32,
    map_name: String,
    game_mode: String,
    player_count: u8,
    players: HashMap<String, PlayerInfo>,

    uptime: u32,
    cpu_usage: f32,
    player_pings: HashMap<String, u16>,

    status_changed_at: DateTime<Utc>,
    phase_changed_at: DateTime<Utc>,

    skipped_frames: VecDeque<SkippedFrame>,
    total_lag_events: u64,
    last_lag_at: Option<DateTime<Utc>>,
}

impl StateInner {
    fn fresh() -> Self {
        let now = Utc::now();
        Self {
            status: GameStatus::Queued,
            phase: GamePhase::Idle,
            match_id: 0,
            map_name: String::new(),
            game_mode: String::new(),
            player_count: 0,
            players: HashMap::new(),
            uptime: 0,
            cpu_usage: 0.0,
            player_pings: HashMap::new(),
            status_changed_at: now,
            phase_changed_at: now,
            skipped_frames: VecDeque::new(),
            total_lag_events: 0,
            last_lag_at: None,
        }
    }
}

/// Thread-safe state of one game server instance.
#[derive(Debug)]
pub struct GameState {
    inner: RwLock<StateInner>,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StateInner::fresh()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StateInner> {
        self.inner.read().expect("game state lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StateInner> {
        self.inner.write().expect("game state lock poisoned")
    }

    /// Set the status, returning the previous one.
    pub fn set_status(&self, status: GameStatus) -> GameStatus {
        let mut inner = self.write();
        let old = inner.status;
        if old != status {
            inner.status = status;
            inner.status_changed_at = Utc::now();
        }
        old
    }

    pub fn status(&self) -> GameStatus {
        self.read().status
    }

    pub fn status_changed_at(&self) -> DateTime<Utc> {
        self.read().status_changed_at
    }

    /// Set the phase, returning the previous one.
    pub fn set_phase(&self, phase: GamePhase) -> GamePhase {
        let mut inner = self.write();
        let old = inner.phase;
        if old != phase {
            inner.phase = phase;
            inner.phase_changed_at = Utc::now();
        }
        old
    }

    pub fn phase(&self) -> GamePhase {
        self.read().phase
    }

    pub fn phase_changed_at(&self) -> DateTime<Utc> {
        self.read().phase_changed_at
    }

    /// Fold one status frame into the state.
    ///
    /// The phase byte is authoritative: a changed phase gets a fresh
    /// phase-change timestamp. Player count moves the instance between
    /// `ready` and `occupied`.
    pub fn update_telemetry(
        &self,
        uptime: u32,
        cpu_usage: f32,
        player_count: u8,
        phase: GamePhase,
        match_id: u32,
        player_pings: HashMap<String, u16>,
    ) {
        let mut inner = self.write();
        let now = Utc::now();

        inner.uptime = uptime;
        inner.cpu_usage = cpu_usage;
        inner.player_count = player_count;
        inner.match_id = match_id;

        // The ping list is the server's own roster; names we have not
        // seen a connect event for yet still belong in the player table.
        for (name, ping) in &player_pings {
            match inner.players.get_mut(name) {
                Some(player) => player.ping = *ping,
                None => {
                    inner.players.insert(
                        name.clone(),
                        PlayerInfo {
                            name: name.clone(),
                            id: 0,
                            psr: 0.0,
                            joined_at: now,
                            ping: *ping,
                        },
                    );
                }
            }
        }
        inner.player_pings = player_pings;

        if inner.phase != phase {
            inner.phase = phase;
            inner.phase_changed_at = now;
        }

        if player_count > 0 && inner.status == GameStatus::Ready {
            inner.status = GameStatus::Occupied;
            inner.status_changed_at = now;
        } else if player_count == 0 && inner.status == GameStatus::Occupied {
            inner.status = GameStatus::Ready;
            inner.status_changed_at = now;
        }
    }

    pub fn add_player(&self, name: &str, id: u32) {
        let mut inner = self.write();
        inner.players.insert(
            name.to_string(),
            PlayerInfo {
                name: name.to_string(),
                id,
                psr: 0.0,
                joined_at: Utc::now(),
                ping: 0,
            },
        );
        inner.player_count = inner.players.len() as u8;
    }

    pub fn remove_player(&self, name: &str) {
        let mut inner = self.write();
        inner.players.remove(name);
        inner.player_count = inner.players.len() as u8;
    }

    pub fn players(&self) -> HashMap<String, PlayerInfo> {
        self.read().players.clone()
    }

    pub fn player_count(&self) -> u8 {
        self.read().player_count
    }

    pub fn uptime(&self) -> u32 {
        self.read().uptime
    }

    pub fn match_id(&self) -> u32 {
        self.read().match_id
    }

    pub fn set_match_info(&self, match_id: u32, map_name: &str, mode: &str) {
        let mut inner = self.write();
        inner.match_id = match_id;
        inner.map_name = map_name.to_string();
        inner.game_mode = mode.to_string();
    }

    /// Record one lag event. The history ring stays capped at
    /// [`LAG_HISTORY_CAP`]; the total count is monotonic.
    ///
    /// Returns the in-match event count after this append, read under the
    /// same lock so concurrent events see distinct counts and equality
    /// thresholds fire exactly once.
    pub fn add_lag_event(&self, duration_ms: u32) -> usize {
        let mut inner = self.write();
        let now = Utc::now();
        inner.skipped_frames.push_back(SkippedFrame {
            timestamp: now,
            duration_ms,
        });
        while inner.skipped_frames.len() > LAG_HISTORY_CAP {
            inner.skipped_frames.pop_front();
        }
        inner.total_lag_events += 1;
        inner.last_lag_at = Some(now);
        inner.skipped_frames.len()
    }

    pub fn lag_events(&self) -> Vec<SkippedFrame> {
        self.read().skipped_frames.iter().copied().collect()
    }

    pub fn total_lag_events(&self) -> u64 {
        self.read().total_lag_events
    }

    pub fn last_lag_at(&self) -> Option<DateTime<Utc>> {
        self.read().last_lag_at
    }

    /// Drop the lag history (new match, new budget). The total stays.
    pub fn clear_lag_events(&self) {
        self.write().skipped_frames.clear();
    }

    /// Back to a just-created state, for restart.
    pub fn reset(&self) {
        *self.write() = StateInner::fresh();
    }

    /// Structurally-copied point-in-time view.
    pub fn snapshot(&self) -> GameStateSnapshot {
        let inner = self.read();
        GameStateSnapshot {
            status: inner.status,
            phase: inner.phase,
            match_id: inner.match_id,
            map_name: inner.map_name.clone(),
            game_mode: inner.game_mode.clone(),
            player_count: inner.player_count,
            players: inner.players.clone(),
            uptime: inner.uptime,
            cpu_usage: inner.cpu_usage,
            total_lag_events: inner.total_lag_events,
            status_changed_at: inner.status_changed_at,
            phase_changed_at: inner.phase_changed_at,
        }
    }
}

/// Immutable copy of a [`GameState`].
#[derive(Debug, Clone, Serialize)]
pub struct GameStateSnapshot {
    pub status: GameStatus,
    pub phase: GamePhase,
    pub match_id: u32,
    pub map_name: String,
    pub game_mode: String,
    pub player_count: u8,
    pub players: HashMap<String, PlayerInfo>,
    pub uptime: u32,
    pub cpu_usage: f32,
    pub total_lag_events: u64,
    pub status_changed_at: DateTime<Utc>,
    pub phase_changed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_is_queued_and_idle() {
        let state = GameState::new();
        assert_eq!(state.status(), GameStatus::Queued);
        assert_eq!(state.phase(), GamePhase::Idle);
        assert_eq!(state.total_lag_events(), 0);
    }

    #[test]
    fn telemetry_moves_ready_to_occupied_and_back() {
        let state = GameState::new();
        state.set_status(GameStatus::Ready);

        state.update_telemetry(60, 0.2, 1, GamePhase::InLobby, 7, HashMap::new());
        assert_eq!(state.status(), GameStatus::Occupied);

        state.update_telemetry(90, 0.2, 0, GamePhase::Idle, 0, HashMap::new());
        assert_eq!(state.status(), GameStatus::Ready);
    }

    #[test]
    fn telemetry_does_not_bump_non_ready_states() {
        let state = GameState::new();
        state.set_status(GameStatus::Sleeping);
        state.update_telemetry(60, 0.2, 3, GamePhase::InLobby, 7, HashMap::new());
        assert_eq!(state.status(), GameStatus::Sleeping);
    }

    #[test]
    fn phase_change_refreshes_timestamp() {
        let state = GameState::new();
        let before = state.phase_changed_at();
        state.update_telemetry(60, 0.1, 0, GamePhase::MatchStarted, 1, HashMap::new());
        assert_eq!(state.phase(), GamePhase::MatchStarted);
        assert!(state.phase_changed_at() >= before);

        // Same phase again: timestamp is untouched.
        let stamped = state.phase_changed_at();
        state.update_telemetry(65, 0.1, 0, GamePhase::MatchStarted, 1, HashMap::new());
        assert_eq!(state.phase_changed_at(), stamped);
    }

    #[test]
    fn players_are_tracked_by_name() {
        let state = GameState::new();
        state.add_player("p1", 9001);
        state.add_player("p2", 9002);
        assert_eq!(state.player_count(), 2);

        state.remove_player("p1");
        let players = state.players();
        assert_eq!(players.len(), 1);
        assert!(players.contains_key("p2"));
    }

    #[test]
    fn telemetry_updates_known_player_pings() {
        let state = GameState::new();
        state.add_player("p1", 9001);
        let pings = HashMap::from([("p1".to_string(), 40u16)]);
        state.update_telemetry(60, 0.1, 1, GamePhase::MatchStarted, 1, pings);
        assert_eq!(state.players()["p1"].ping, 40);
    }

    #[test]
    fn lag_ring_caps_history_but_not_total() {
        let state = GameState::new();
        for i in 0..(LAG_HISTORY_CAP as u32 + 50) {
            state.add_lag_event(100 + i);
        }
        assert_eq!(state.lag_events().len(), LAG_HISTORY_CAP);
        assert_eq!(state.total_lag_events(), LAG_HISTORY_CAP as u64 + 50);

        // Oldest entries were dropped; the newest survives.
        let events = state.lag_events();
        assert_eq!(events.last().unwrap().duration_ms, 100 + LAG_HISTORY_CAP as u32 + 49);
    }

    #[test]
    fn lag_timestamps_are_monotonic() {
        let state = GameState::new();
        for _ in 0..10 {
            state.add_lag_event(250);
        }
        let events = state.lag_events();
        for pair in events.windows(2) {
            assert!(pair[1].timestamp >= pair[0].timestamp);
        }
    }

    #[test]
    fn clear_keeps_total_count() {
        let state = GameState::new();
        state.add_lag_event(500);
        state.add_lag_event(500);
        state.clear_lag_events();
        assert!(state.lag_events().is_empty());
        assert_eq!(state.total_lag_events(), 2);
    }

    #[test]
    fn reset_returns_to_fresh_state() {
        let state = GameState::new();
        state.set_status(GameStatus::Occupied);
        state.set_match_info(42, "caldavar", "ranked");
        state.add_player("p1", 1);
        state.add_lag_event(300);

        state.reset();
        assert_eq!(state.status(), GameStatus::Queued);
        assert_eq!(state.phase(), GamePhase::Idle);
        assert_eq!(state.match_id(), 0);
        assert!(state.players().is_empty());
        assert_eq!(state.total_lag_events(), 0);
    }

    #[test]
    fn snapshot_is_detached_from_live_state() {
        let state = GameState::new();
        state.add_player("p1", 1);
        let snapshot = state.snapshot();

        state.add_player("p2", 2);
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(state.players().len(), 2);
    }
}
