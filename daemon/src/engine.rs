/// The engine context: tracker, ledger store and status file, owned by the
/// single daemon event loop.
///
/// Nothing else holds a reference to engine state. Status events, checkpoint
/// ticks and gateway requests all reach it through [`run`], one at a time.
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::Config;
use crate::error::StoreError;
use crate::event::DaemonEvent;
use crate::gateway::{Request, Response, TrackingStatus};
use crate::ledger::SessionLedger;
use crate::monitor::StatusEvent;
use crate::status::{self, DaemonState, DaemonStatus};
use crate::store::LedgerStore;
use crate::tracker::{Tracker, TrackingState};

pub struct Engine {
    tracker: Tracker,
    store: LedgerStore,
    status_path: PathBuf,
    status: DaemonStatus,
    /// Signalled when tracking is re-enabled so the monitor reports the
    /// current status again on its next tick.
    resync: Arc<Notify>,
}

impl Engine {
    /// Loads the ledger and the persisted enabled flag and writes the initial
    /// status file.
    pub fn start(store: LedgerStore, status_path: PathBuf) -> Self {
        let enabled = status::load_enabled(&status_path);
        let ledger = SessionLedger::from_records(store.load());
        let mut engine = Self {
            tracker: Tracker::new(enabled, ledger),
            store,
            status_path,
            status: DaemonStatus::new(enabled),
            resync: Arc::new(Notify::new()),
        };
        if let Err(e) = engine.publish_status() {
            tracing::warn!(error = %e, "Failed to write initial status");
        }
        tracing::info!(enabled, "Engine started");
        engine
    }

    /// Handle the status monitor waits on; see [`crate::monitor::run`].
    pub fn resync_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.resync)
    }

    #[cfg(test)]
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    #[cfg(test)]
    pub fn status(&self) -> &DaemonStatus {
        &self.status
    }

    pub fn on_status(&mut self, event: &StatusEvent) {
        self.status.online = Some(event.online);
        self.tracker.handle_status(event);
        if let Err(e) = self.publish_status() {
            tracing::warn!(error = %e, "Failed to write status");
        }
    }

    /// Persists the ledger as of `now`, including the elapsed part of any
    /// open session. On failure memory stays authoritative and the next
    /// checkpoint retries.
    pub fn checkpoint(&mut self, now: i64) -> Result<(), StoreError> {
        let result = self.store.save(&self.tracker.ledger().checkpoint_view(now));
        match &result {
            Ok(()) => {
                tracing::debug!(path = %self.store.path().display(), "Checkpoint written");
                self.status.last_checkpoint = Some(chrono::Local::now().to_rfc3339());
                self.status.error = None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Checkpoint failed; will retry");
                self.status.error = Some(format!("Checkpoint failed: {e}"));
            }
        }
        if let Err(e) = self.publish_status() {
            tracing::warn!(error = %e, "Failed to write status");
        }
        result
    }

    pub fn handle_request(&mut self, request: Request, now: i64) -> Response {
        match request {
            Request::GetAllOfflineTimes => {
                Response::ok_with(&self.tracker.ledger().checkpoint_view(now))
            }
            Request::GetOfflineTime { game_id } => {
                let view = self.tracker.ledger().checkpoint_view(now);
                Response::ok_with(&view.get(&game_id).cloned().unwrap_or_default())
            }
            Request::GetTrackingStatus => Response::ok_with(&TrackingStatus {
                enabled: self.tracker.is_enabled(),
            }),
            Request::SetTrackingEnabled { enabled } => {
                if self.tracker.set_enabled(enabled, now) && enabled {
                    self.resync.notify_one();
                }
                match self.publish_status() {
                    Ok(()) => Response::ok(),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to persist tracking flag");
                        Response::failure(format!("failed to persist tracking flag: {e}"))
                    }
                }
            }
            Request::ClearOfflineData { game_id } => {
                match &game_id {
                    Some(game) => {
                        if !self.tracker.clear(game, now) {
                            tracing::debug!(game = %game, "Clear requested for untracked game");
                        }
                    }
                    None => self.tracker.clear_all(now),
                }
                tracing::info!(game = ?game_id, "Offline data cleared");
                // A clear must not wait for the next checkpoint.
                match self.checkpoint(now) {
                    Ok(()) => Response::ok(),
                    Err(e) => Response::failure(format!("failed to persist clear: {e}")),
                }
            }
        }
    }

    /// Closes any open session at `now` and flushes a final checkpoint.
    pub fn shutdown(&mut self, now: i64) {
        self.tracker.close_open(now);
        if let Err(e) = self.checkpoint(now) {
            tracing::error!(error = %e, "Final checkpoint failed");
        }
        tracing::info!("Engine stopped");
    }

    fn publish_status(&mut self) -> Result<(), StoreError> {
        let state = self.tracker.state();
        self.status.state = DaemonState::from(state);
        self.status.tracking_enabled = self.tracker.is_enabled();
        self.status.active_game = match state {
            TrackingState::Tracking(game) => Some(game.as_str().to_string()),
            _ => None,
        };
        status::write_status(&self.status_path, &self.status)
    }
}

/// Sends [`DaemonEvent::CheckpointDue`] every `every`, starting one period
/// after launch. Stops when the event channel closes.
pub async fn checkpoint_timer(every: Duration, tx: mpsc::Sender<DaemonEvent>) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if tx.send(DaemonEvent::CheckpointDue).await.is_err() {
            break;
        }
    }
}

/// The daemon event loop. Returns after handling [`DaemonEvent::Shutdown`]
/// or when every sender is gone, flushing a final checkpoint either way.
pub async fn run(
    mut engine: Engine,
    mut rx: mpsc::Receiver<DaemonEvent>,
    config: Arc<RwLock<Config>>,
) -> Engine {
    while let Some(evt) = rx.recv().await {
        let now = chrono::Utc::now().timestamp();
        match evt {
            DaemonEvent::Status(event) => engine.on_status(&event),
            DaemonEvent::CheckpointDue => {
                // Failures are logged and surfaced in the status file.
                let _ = engine.checkpoint(now);
            }
            DaemonEvent::Request(request, reply) => {
                let response = engine.handle_request(request, now);
                if reply.send(response).is_err() {
                    tracing::debug!("Gateway caller went away before the reply");
                }
            }
            DaemonEvent::ConfigReloaded(new_config) => {
                tracing::info!(games = new_config.games.len(), "Config reloaded");
                *config.write().await = new_config;
            }
            DaemonEvent::Shutdown => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }
    engine.shutdown(chrono::Utc::now().timestamp());
    engine
}
