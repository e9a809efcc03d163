/// Tracking state machine: turns status events and enable/disable requests
/// into session starts and ends on the [`SessionLedger`].
///
/// States are `Disabled`, `Idle` and `Tracking(game)`. A session is open
/// exactly while the machine is in `Tracking`, and it always belongs to the
/// game carried by that state.
use crate::ledger::{GameId, SessionLedger};
use crate::monitor::StatusEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingState {
    Disabled,
    Idle,
    Tracking(GameId),
}

pub struct Tracker {
    state: TrackingState,
    ledger: SessionLedger,
}

impl Tracker {
    pub fn new(enabled: bool, ledger: SessionLedger) -> Self {
        let state = if enabled {
            TrackingState::Idle
        } else {
            TrackingState::Disabled
        };
        Self { state, ledger }
    }

    pub fn state(&self) -> &TrackingState {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state != TrackingState::Disabled
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    /// Applies a status change. Returns `true` if the state changed.
    pub fn handle_status(&mut self, event: &StatusEvent) -> bool {
        let at = event.at;
        match (self.state.clone(), event.offline_game()) {
            (TrackingState::Disabled, _) => false,
            (TrackingState::Idle, None) => false,
            (TrackingState::Idle, Some(game)) => {
                self.open(game.clone(), at);
                true
            }
            (TrackingState::Tracking(current), Some(game)) if current == *game => false,
            (TrackingState::Tracking(_), Some(game)) => {
                // Switch games at a single instant: no gap, no overlap.
                self.close(at);
                self.open(game.clone(), at);
                true
            }
            (TrackingState::Tracking(_), None) => {
                self.close(at);
                self.state = TrackingState::Idle;
                true
            }
        }
    }

    /// Enables or disables tracking. Disabling closes any open session at
    /// `now`; enabling waits for the next status event before tracking.
    pub fn set_enabled(&mut self, enabled: bool, now: i64) -> bool {
        let disabled = self.state == TrackingState::Disabled;
        match (enabled, disabled) {
            (true, true) => {
                self.state = TrackingState::Idle;
                tracing::info!("Tracking enabled");
                true
            }
            (false, true) | (true, false) => false,
            (false, false) => {
                self.close(now);
                self.state = TrackingState::Disabled;
                tracing::info!("Tracking disabled");
                true
            }
        }
    }

    /// Removes the record of `game`. If that game is being tracked, its open
    /// session restarts at `now` so pre-clear time is not written back.
    pub fn clear(&mut self, game: &GameId, now: i64) -> bool {
        if self.state == TrackingState::Tracking(game.clone()) {
            self.ledger.rebase_open(now);
        }
        self.ledger.clear(game)
    }

    pub fn clear_all(&mut self, now: i64) {
        self.ledger.rebase_open(now);
        self.ledger.clear_all();
    }

    /// Closes the open session at `now`; a `Tracking` machine becomes `Idle`.
    /// Used on shutdown.
    pub fn close_open(&mut self, now: i64) {
        if matches!(self.state, TrackingState::Tracking(_)) {
            self.close(now);
            self.state = TrackingState::Idle;
        }
    }

    fn open(&mut self, game: GameId, at: i64) {
        if let Err(e) = self.ledger.start_session(&game, at) {
            tracing::error!(error = %e, "Refusing to open overlapping session");
            return;
        }
        tracing::info!(game = %game, at, "Offline session started");
        self.state = TrackingState::Tracking(game);
    }

    fn close(&mut self, at: i64) {
        if let TrackingState::Tracking(game) = &self.state {
            if let Some(session) = self.ledger.end_session(game, at) {
                tracing::info!(
                    game = %game,
                    start = session.start,
                    end = session.end,
                    duration = session.duration,
                    "Offline session closed"
                );
            }
        }
    }
}
