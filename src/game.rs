//! Match state: teams, goals, and the pause-aware match clock.
//!
//! The game is a plain state container; all time flows in through `now_ms`
//! arguments (the gateway's monotonic clock), never from an ambient wall
//! clock, so every transition is deterministic under test.
//!
//! ```text
//!   not_started ──start──▶ active ⇄ paused ──end / clock──▶ ended
//! ```

use heapless::FnvIndexMap;
use serde_json::{Value, json};

use crate::car::CarId;
use crate::registry::CarRegistry;

/// Maximum number of teams (index map capacity must be a power of two).
pub const MAX_TEAMS: usize = 4;

const MS_PER_SEC: u64 = 1_000;

// ───────────────────────────────────────────────────────────────
// Goals and teams
// ───────────────────────────────────────────────────────────────

/// One recorded goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goal {
    pub team: heapless::String<16>,
    pub player_id: Option<heapless::String<32>>,
    pub car_id: Option<CarId>,
    /// Gateway clock at scoring time (ms).
    pub timestamp_ms: u64,
}

impl Goal {
    fn to_json(&self) -> Value {
        json!({
            "team_color": self.team.as_str(),
            "player_id": self.player_id.as_deref(),
            "car_id": self.car_id,
            "timestamp_ms": self.timestamp_ms,
        })
    }
}

/// A team, identified by its colour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    pub color: heapless::String<16>,
    pub name: heapless::String<24>,
    pub car_ids: heapless::Vec<CarId, 8>,
    pub score: u32,
}

impl Team {
    fn new(color: &str, name: Option<&str>) -> Self {
        let mut color_buf = heapless::String::new();
        let _ = color_buf.push_str(crate::car::clip(color, 16));

        let mut name_buf = heapless::String::new();
        match name {
            Some(n) => {
                let _ = name_buf.push_str(crate::car::clip(n, 24));
            }
            None => {
                // Default name is the capitalised colour ("red" → "Red").
                let mut chars = color.chars();
                if let Some(first) = chars.next() {
                    for c in first.to_uppercase() {
                        let _ = name_buf.push(c);
                    }
                    for c in chars {
                        let _ = name_buf.push(c);
                    }
                }
            }
        }

        Self {
            color: color_buf,
            name: name_buf,
            car_ids: heapless::Vec::new(),
            score: 0,
        }
    }

    fn add_car(&mut self, id: CarId) {
        if !self.car_ids.contains(&id) {
            let _ = self.car_ids.push(id);
        }
    }

    fn remove_car(&mut self, id: CarId) {
        self.car_ids.retain(|c| *c != id);
    }

    fn to_json(&self) -> Value {
        json!({
            "color": self.color.as_str(),
            "name": self.name.as_str(),
            "car_ids": self.car_ids.as_slice(),
            "score": self.score,
        })
    }
}

// ───────────────────────────────────────────────────────────────
// Game state
// ───────────────────────────────────────────────────────────────

/// Lifecycle state exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    NotStarted,
    Active,
    Paused,
    Ended,
}

impl GameState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Ended => "ended",
        }
    }
}

/// One match: teams, goals, and the pause-aware clock.
#[derive(Debug, Clone)]
pub struct GameStatus {
    teams: FnvIndexMap<heapless::String<16>, Team, MAX_TEAMS>,
    goals: Vec<Goal>,
    start_ms: Option<u64>,
    pause_ms: Option<u64>,
    end_ms: Option<u64>,
    total_paused_ms: u64,
    match_length_seconds: u32,
    is_active: bool,
    is_finished: bool,
}

impl GameStatus {
    /// Fresh game with the default red/blue teams, not yet started.
    pub fn new(match_length_seconds: u32) -> Self {
        let mut game = Self {
            teams: FnvIndexMap::new(),
            goals: Vec::new(),
            start_ms: None,
            pause_ms: None,
            end_ms: None,
            total_paused_ms: 0,
            match_length_seconds,
            is_active: false,
            is_finished: false,
        };
        game.add_team("red", None);
        game.add_team("blue", None);
        game
    }

    // ── Teams ─────────────────────────────────────────────────

    pub fn add_team(&mut self, color: &str, name: Option<&str>) -> bool {
        let team = Team::new(color, name);
        self.teams.insert(team.color.clone(), team).is_ok()
    }

    pub fn team(&self, color: &str) -> Option<&Team> {
        self.teams.values().find(|t| t.color.as_str() == color)
    }

    fn team_mut(&mut self, color: &str) -> Option<&mut Team> {
        self.teams.values_mut().find(|t| t.color.as_str() == color)
    }

    /// Put a car on a team, removing it from every other team first.
    pub fn add_car_to_team(&mut self, car_id: CarId, color: &str) -> bool {
        if self.team(color).is_none() {
            return false;
        }
        for team in self.teams.values_mut() {
            if team.color.as_str() != color {
                team.remove_car(car_id);
            }
        }
        if let Some(team) = self.team_mut(color) {
            team.add_car(car_id);
        }
        true
    }

    pub fn remove_car_from_teams(&mut self, car_id: CarId) {
        for team in self.teams.values_mut() {
            team.remove_car(car_id);
        }
    }

    // ── Scoring ───────────────────────────────────────────────

    pub fn score_goal(
        &mut self,
        color: &str,
        player_id: Option<&str>,
        car_id: Option<CarId>,
        now_ms: u64,
    ) -> bool {
        let Some(team) = self.team_mut(color) else {
            return false;
        };
        team.score += 1;

        let mut team_buf = heapless::String::new();
        let _ = team_buf.push_str(crate::car::clip(color, 16));
        let player = player_id.map(|p| {
            let mut buf = heapless::String::new();
            let _ = buf.push_str(crate::car::clip(p, 32));
            buf
        });
        self.goals.push(Goal {
            team: team_buf,
            player_id: player,
            car_id,
            timestamp_ms: now_ms,
        });
        true
    }

    // ── Clock ─────────────────────────────────────────────────

    pub fn start(&mut self, now_ms: u64) {
        self.start_ms = Some(now_ms);
        self.pause_ms = None;
        self.end_ms = None;
        self.total_paused_ms = 0;
        self.is_active = true;
        self.is_finished = false;
    }

    /// Pause the clock.  No-op unless active.
    pub fn stop(&mut self, now_ms: u64) {
        if self.is_active {
            self.pause_ms = Some(now_ms);
            self.is_active = false;
        }
    }

    /// Resume a paused game; the paused interval does not count as played
    /// time.  No-op when finished or never started.
    pub fn resume(&mut self, now_ms: u64) {
        if self.is_finished {
            return;
        }
        if let Some(paused_at) = self.pause_ms.take() {
            self.total_paused_ms += now_ms.saturating_sub(paused_at);
            self.is_active = true;
        }
    }

    /// End the game permanently.
    pub fn end(&mut self, now_ms: u64) {
        if let Some(paused_at) = self.pause_ms.take() {
            self.total_paused_ms += now_ms.saturating_sub(paused_at);
        }
        self.end_ms = Some(now_ms);
        self.is_active = false;
        self.is_finished = true;
    }

    /// Seconds of play so far, excluding paused time.
    pub fn elapsed_seconds(&self, now_ms: u64) -> u32 {
        let Some(start) = self.start_ms else {
            return 0;
        };
        // The clock stops at the pause point or the end of the game.
        let frozen_at = self.pause_ms.or(self.end_ms).unwrap_or(now_ms);
        let gross = frozen_at.saturating_sub(start);
        let net = gross.saturating_sub(self.total_paused_ms);
        (net / MS_PER_SEC) as u32
    }

    /// Seconds remaining; full length before start, zero after the end.
    pub fn remaining_seconds(&self, now_ms: u64) -> u32 {
        if self.start_ms.is_none() {
            return self.match_length_seconds;
        }
        if self.is_finished {
            return 0;
        }
        self.match_length_seconds
            .saturating_sub(self.elapsed_seconds(now_ms))
    }

    /// True when the clock has run out on an active game.
    pub fn is_over(&self, now_ms: u64) -> bool {
        self.is_active && self.remaining_seconds(now_ms) == 0
    }

    pub fn state(&self) -> GameState {
        if self.is_finished {
            GameState::Ended
        } else if self.is_active {
            GameState::Active
        } else if self.start_ms.is_some() {
            GameState::Paused
        } else {
            GameState::NotStarted
        }
    }

    pub fn match_length_seconds(&self) -> u32 {
        self.match_length_seconds
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    // ── Snapshot ──────────────────────────────────────────────

    pub fn snapshot(&self, now_ms: u64) -> Value {
        let mut teams = serde_json::Map::new();
        for team in self.teams.values() {
            teams.insert(team.color.as_str().to_owned(), team.to_json());
        }
        json!({
            "teams": teams,
            "goals": self.goals.iter().map(Goal::to_json).collect::<Vec<_>>(),
            "start_ms": self.start_ms,
            "match_length_seconds": self.match_length_seconds,
            "time_remaining": self.remaining_seconds(now_ms),
            "elapsed_time": self.elapsed_seconds(now_ms),
            "is_active": self.is_active,
            "is_finished": self.is_finished,
            "state": self.state().as_str(),
            "total_paused_time": (self.total_paused_ms / MS_PER_SEC) as u32,
        })
    }
}

// ───────────────────────────────────────────────────────────────
// Game manager
// ───────────────────────────────────────────────────────────────

/// Owns the current game.  There is always a game; `start_game` replaces it
/// with a fresh one (zeroed goals, full clock).
#[derive(Debug)]
pub struct GameManager {
    match_length_seconds: u32,
    current: GameStatus,
}

impl GameManager {
    pub fn new(match_length_seconds: u32) -> Self {
        Self {
            match_length_seconds,
            current: GameStatus::new(match_length_seconds),
        }
    }

    pub fn current(&self) -> &GameStatus {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut GameStatus {
        &mut self.current
    }

    /// Start (or restart) the game, resetting all state.
    pub fn start_game(&mut self, match_length_seconds: Option<u32>, now_ms: u64) {
        if let Some(len) = match_length_seconds {
            self.match_length_seconds = len;
        }
        self.current = GameStatus::new(self.match_length_seconds);
        self.current.start(now_ms);
    }

    /// Pause.  Returns false when the game was not running.
    pub fn stop_game(&mut self, now_ms: u64) -> bool {
        if self.current.state() == GameState::Active {
            self.current.stop(now_ms);
            true
        } else {
            false
        }
    }

    /// Resume.  Returns false when finished or never started.
    pub fn resume_game(&mut self, now_ms: u64) -> bool {
        if self.current.state() == GameState::Paused {
            self.current.resume(now_ms);
            true
        } else {
            false
        }
    }

    pub fn end_game(&mut self, now_ms: u64) {
        self.current.end(now_ms);
    }

    pub fn score_goal(
        &mut self,
        color: &str,
        player_id: Option<&str>,
        car_id: Option<CarId>,
        now_ms: u64,
    ) -> bool {
        self.current.score_goal(color, player_id, car_id, now_ms)
    }

    /// Put a known car on a team.  The car must exist in the registry — the
    /// game depends on the fleet, never the other way round.
    pub fn add_car_to_team(
        &mut self,
        car_id: CarId,
        color: &str,
        registry: &CarRegistry,
    ) -> bool {
        if registry.by_id(car_id).is_none() {
            return false;
        }
        self.current.add_car_to_team(car_id, color)
    }

    /// 1 Hz clock hook: ends the game when the clock runs out.
    /// Returns true exactly once, when this call performed the transition.
    pub fn check_game_time(&mut self, now_ms: u64) -> bool {
        if self.current.is_over(now_ms) {
            self.current.end(now_ms);
            true
        } else {
            false
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
