use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::event::DaemonEvent;
use crate::ledger::GameId;
use crate::probe::{GameDetector, NetworkProbe};

/// What the capabilities reported on one conclusive tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub online: bool,
    pub active_game: Option<GameId>,
}

/// Full new status emitted when either observed value changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub online: bool,
    pub active_game: Option<GameId>,
    /// Unix-epoch seconds of the tick that observed the change.
    pub at: i64,
}

impl StatusEvent {
    /// The game being played offline, if this status qualifies for tracking.
    pub fn offline_game(&self) -> Option<&GameId> {
        if self.online {
            None
        } else {
            self.active_game.as_ref()
        }
    }
}

/// Edge detector: returns an event only when `current` differs from
/// `previous`. The first conclusive observation always produces one.
pub fn detect_change(
    previous: Option<&Observation>,
    current: &Observation,
    at: i64,
) -> Option<StatusEvent> {
    if previous == Some(current) {
        return None;
    }
    Some(StatusEvent {
        online: current.online,
        active_game: current.active_game.clone(),
        at,
    })
}

/// Polls the network and game capabilities and keeps the last conclusive
/// observation.
pub struct StatusMonitor<N, G> {
    network: N,
    games: G,
    last: Option<Observation>,
}

impl<N: NetworkProbe, G: GameDetector> StatusMonitor<N, G> {
    pub fn new(network: N, games: G) -> Self {
        Self {
            network,
            games,
            last: None,
        }
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<&Observation> {
        self.last.as_ref()
    }

    /// Drops the retained observation so the next conclusive tick reports the
    /// full current status even if nothing changed.
    pub fn forget(&mut self) {
        self.last = None;
    }

    /// Runs one poll at time `at`.
    ///
    /// A failed read leaves the previous observation in place and emits
    /// nothing, so uncertain input never toggles tracking.
    pub fn tick(&mut self, at: i64) -> Option<StatusEvent> {
        let online = match self.network.is_online() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Network status inconclusive this tick");
                return None;
            }
        };
        let active_game = match self.games.current_game() {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(error = %e, "Active game inconclusive this tick");
                return None;
            }
        };

        let current = Observation {
            online,
            active_game,
        };
        let event = detect_change(self.last.as_ref(), &current, at);
        self.last = Some(current);
        event
    }
}

/// Polls every `poll_interval` and sends [`DaemonEvent::Status`] whenever the
/// observed status changes. Stops when the event channel closes.
///
/// A signal on `resync` makes the next tick report the current status again,
/// so re-enabled tracking picks up a game that is already running.
///
/// Probe reads block (TCP connect, process scan), so each tick runs on the
/// blocking pool.
pub async fn run<N, G>(
    mut monitor: StatusMonitor<N, G>,
    poll_interval: Duration,
    resync: Arc<Notify>,
    tx: mpsc::Sender<DaemonEvent>,
) where
    N: NetworkProbe + 'static,
    G: GameDetector + 'static,
{
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = resync.notified() => {
                tracing::debug!("Status resync requested");
                monitor.forget();
                continue;
            }
            _ = ticker.tick() => {}
        }

        let now = chrono::Utc::now().timestamp();
        let (m, event) = match tokio::task::spawn_blocking(move || {
            let event = monitor.tick(now);
            (monitor, event)
        })
        .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Status poll panicked; monitor stopped");
                break;
            }
        };
        monitor = m;

        if let Some(event) = event {
            tracing::debug!(
                online = event.online,
                game = ?event.active_game,
                "Status changed"
            );
            if tx.send(DaemonEvent::Status(event)).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SensorError;
    use std::collections::VecDeque;

    /// Replays scripted readings, then repeats the last one.
    struct Scripted<T: Clone> {
        readings: VecDeque<Result<T, ()>>,
        last: T,
    }

    impl<T: Clone> Scripted<T> {
        fn new(readings: Vec<Result<T, ()>>, last: T) -> Self {
            Self {
                readings: readings.into(),
                last,
            }
        }

        fn next(&mut self) -> Result<T, ()> {
            match self.readings.pop_front() {
                Some(Ok(v)) => {
                    self.last = v.clone();
                    Ok(v)
                }
                Some(Err(())) => Err(()),
                None => Ok(self.last.clone()),
            }
        }
    }

    impl NetworkProbe for Scripted<bool> {
        fn is_online(&mut self) -> Result<bool, SensorError> {
            self.next().map_err(|_| SensorError::Network("unreachable".to_string()))
        }
    }

    impl GameDetector for Scripted<Option<GameId>> {
        fn current_game(&mut self) -> Result<Option<GameId>, SensorError> {
            self.next().map_err(|_| SensorError::Detector("scan failed".to_string()))
        }
    }

    fn game(id: &str) -> Option<GameId> {
        Some(GameId::from(id))
    }

    fn obs(online: bool, active_game: Option<GameId>) -> Observation {
        Observation { online, active_game }
    }

    // ── detect_change ─────────────────────────────────────────────────────────

    #[test]
    fn first_observation_always_emits() {
        let event = detect_change(None, &obs(true, None), 5).unwrap();
        assert_eq!(event, StatusEvent { online: true, active_game: None, at: 5 });
    }

    #[test]
    fn unchanged_observation_emits_nothing() {
        let prev = obs(false, game("AppA"));
        assert!(detect_change(Some(&prev), &prev.clone(), 10).is_none());
    }

    #[test]
    fn change_in_either_value_emits_full_state() {
        let prev = obs(false, game("AppA"));
        let net = detect_change(Some(&prev), &obs(true, game("AppA")), 10).unwrap();
        assert_eq!(net.active_game, game("AppA"));
        assert!(net.online);

        let switched = detect_change(Some(&prev), &obs(false, game("AppB")), 11).unwrap();
        assert_eq!(switched.active_game, game("AppB"));
        assert!(!switched.online);
    }

    #[test]
    fn offline_game_requires_offline_and_game() {
        let e = |online, g| StatusEvent { online, active_game: g, at: 0 };
        assert_eq!(e(false, game("AppA")).offline_game(), Some(&GameId::from("AppA")));
        assert_eq!(e(true, game("AppA")).offline_game(), None);
        assert_eq!(e(false, None).offline_game(), None);
    }

    // ── StatusMonitor::tick ───────────────────────────────────────────────────

    #[test]
    fn tick_emits_only_on_edges() {
        let network = Scripted::new(vec![Ok(false), Ok(false), Ok(true)], true);
        let games = Scripted::new(vec![Ok(game("AppA")), Ok(game("AppA")), Ok(game("AppA"))], None);
        let mut monitor = StatusMonitor::new(network, games);

        assert!(monitor.tick(0).is_some());
        assert!(monitor.tick(5).is_none());
        let event = monitor.tick(10).unwrap();
        assert!(event.online);
        assert_eq!(event.at, 10);
    }

    #[test]
    fn failed_network_read_keeps_previous_state() {
        let network = Scripted::new(vec![Ok(false), Err(()), Ok(false)], false);
        let games = Scripted::new(vec![Ok(game("AppA"))], game("AppA"));
        let mut monitor = StatusMonitor::new(network, games);

        assert!(monitor.tick(0).is_some());
        assert!(monitor.tick(5).is_none());
        assert_eq!(monitor.last(), Some(&obs(false, game("AppA"))));
        // The reading after the failure matches the retained state: no event.
        assert!(monitor.tick(10).is_none());
    }

    #[test]
    fn failed_game_read_emits_nothing() {
        let network = Scripted::new(vec![], false);
        let games = Scripted::new(vec![Ok(game("AppA")), Err(()), Ok(None)], None);
        let mut monitor = StatusMonitor::new(network, games);

        assert!(monitor.tick(0).is_some());
        assert!(monitor.tick(5).is_none());
        let event = monitor.tick(10).unwrap();
        assert_eq!(event.active_game, None);
    }

    #[test]
    fn failure_on_first_tick_leaves_no_observation() {
        let network = Scripted::new(vec![Err(())], false);
        let games = Scripted::new(vec![], None);
        let mut monitor = StatusMonitor::new(network, games);
        assert!(monitor.tick(0).is_none());
        assert!(monitor.last().is_none());
        assert!(monitor.tick(5).is_some());
    }

    // ── run ───────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn run_sends_initial_status_event() {
        let network = Scripted::new(vec![], false);
        let games = Scripted::new(vec![], game("AppA"));
        let monitor = StatusMonitor::new(network, games);
        let (tx, mut rx) = mpsc::channel(4);

        let handle = tokio::spawn(run(
            monitor,
            Duration::from_millis(10),
            Arc::new(Notify::new()),
            tx,
        ));
        let evt = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match evt {
            DaemonEvent::Status(s) => {
                assert!(!s.online);
                assert_eq!(s.active_game, game("AppA"));
            }
            _ => panic!("expected a status event"),
        }
        handle.abort();
    }

    #[tokio::test]
    async fn run_reports_unchanged_status_after_resync() {
        let network = Scripted::new(vec![], false);
        let games = Scripted::new(vec![], game("AppA"));
        let monitor = StatusMonitor::new(network, games);
        let resync = Arc::new(Notify::new());
        let (tx, mut rx) = mpsc::channel(4);

        let handle = tokio::spawn(run(
            monitor,
            Duration::from_millis(10),
            Arc::clone(&resync),
            tx,
        ));
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(first.unwrap().is_some());
        // Status never changes, so nothing more arrives on its own.
        let quiet = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(quiet.is_err());

        resync.notify_one();
        let resent = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        match resent.unwrap() {
            Some(DaemonEvent::Status(s)) => assert_eq!(s.active_game, game("AppA")),
            _ => panic!("expected a status event"),
        }
        handle.abort();
    }

    #[test]
    fn forget_makes_next_tick_emit_unchanged_status() {
        let network = Scripted::new(vec![], false);
        let games = Scripted::new(vec![], game("AppA"));
        let mut monitor = StatusMonitor::new(network, games);

        assert!(monitor.tick(0).is_some());
        assert!(monitor.tick(5).is_none());
        monitor.forget();
        let event = monitor.tick(10).unwrap();
        assert_eq!(event, StatusEvent { online: false, active_game: game("AppA"), at: 10 });
    }
}
