/// In-memory record of offline play time per game.
///
/// The ledger holds the closed session history of every game plus at most one
/// open session. Open sessions never enter the history until they are closed;
/// checkpoints see them through [`SessionLedger::checkpoint_view`] instead.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::LedgerError;

/// Opaque, stable identifier of a game as supplied by the host environment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GameId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A closed interval of offline play. Timestamps are unix-epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(deserialize_with = "lenient_i64")]
    pub start: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub end: i64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub duration: u64,
}

impl Session {
    /// Builds a session from `start` to `end`. An `end` earlier than `start`
    /// (wall clock stepped backwards) collapses to a zero-length session.
    pub fn closed(start: i64, end: i64) -> Self {
        let end = end.max(start);
        Self {
            start,
            end,
            duration: end.abs_diff(start),
        }
    }
}

/// Accumulated offline play time for a single game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total_seconds: u64,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_opt_i64"
    )]
    pub last_played: Option<i64>,
    #[serde(default)]
    pub sessions: Vec<Session>,
}

impl GameRecord {
    /// Appends a closed session, keeping `sessions` ordered by start time and
    /// the totals in step with the history.
    fn append(&mut self, session: Session) {
        let idx = self.sessions.partition_point(|s| s.start <= session.start);
        self.sessions.insert(idx, session);
        self.total_seconds = self.total_seconds.saturating_add(session.duration);
        self.last_played = Some(session.end);
    }

    /// Re-establishes the record invariants on data read from disk.
    ///
    /// Sessions ending before they start are dropped, as are sessions whose
    /// length would push the total past `i64::MAX` seconds. Durations and
    /// totals are recomputed from the timestamps. A stored `last_played` is
    /// kept when it is the end of a surviving session, otherwise it becomes
    /// the latest end. Returns the number of dropped sessions.
    pub fn normalize(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.sort_by_key(|s| s.start);

        let mut total: u64 = 0;
        self.sessions.retain_mut(|s| {
            let Some(duration) = s.end.checked_sub(s.start).and_then(|d| u64::try_from(d).ok())
            else {
                return false;
            };
            match total.checked_add(duration).filter(|t| i64::try_from(*t).is_ok()) {
                Some(t) => {
                    total = t;
                    s.duration = duration;
                    true
                }
                None => false,
            }
        });

        self.total_seconds = total;
        let stored = self
            .last_played
            .filter(|t| self.sessions.iter().any(|s| s.end == *t));
        self.last_played = stored.or_else(|| self.sessions.iter().map(|s| s.end).max());
        before - self.sessions.len()
    }
}

/// Mapping of every tracked game to its record. Ordered so the persisted file
/// is stable between writes.
pub type Ledger = BTreeMap<GameId, GameRecord>;

/// The session currently being timed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSession {
    pub game: GameId,
    pub start: i64,
}

#[derive(Debug, Default)]
pub struct SessionLedger {
    records: Ledger,
    open: Option<OpenSession>,
}

impl SessionLedger {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps records loaded from disk. Nothing is open after a load.
    pub fn from_records(records: Ledger) -> Self {
        Self { records, open: None }
    }

    /// Opens a session for `game` at `t`.
    ///
    /// Starting the game that is already open is a no-op; starting a different
    /// one while a session is open is refused so the caller closes it first.
    pub fn start_session(&mut self, game: &GameId, t: i64) -> Result<(), LedgerError> {
        match &self.open {
            Some(open) if open.game == *game => Ok(()),
            Some(open) => Err(LedgerError::AlreadyTracking {
                open: open.game.clone(),
                requested: game.clone(),
            }),
            None => {
                self.open = Some(OpenSession {
                    game: game.clone(),
                    start: t,
                });
                Ok(())
            }
        }
    }

    /// Closes the open session of `game` at `t` and appends it to the game's
    /// history, creating the record on first use.
    ///
    /// Returns `None` (and changes nothing) when `game` has no open session.
    pub fn end_session(&mut self, game: &GameId, t: i64) -> Option<Session> {
        if self.open.as_ref().map(|o| &o.game) != Some(game) {
            return None;
        }
        let open = self.open.take()?;
        let session = Session::closed(open.start, t);
        self.records.entry(open.game).or_default().append(session);
        Some(session)
    }

    /// Removes the record of `game`. Returns whether a record existed.
    pub fn clear(&mut self, game: &GameId) -> bool {
        self.records.remove(game).is_some()
    }

    pub fn clear_all(&mut self) {
        self.records.clear();
    }

    /// Moves the start of the open session to `t`, so time played before a
    /// clear is not written back when the session closes.
    pub fn rebase_open(&mut self, t: i64) {
        if let Some(open) = &mut self.open {
            open.start = open.start.max(t);
        }
    }

    #[cfg(test)]
    pub fn open_session(&self) -> Option<&OpenSession> {
        self.open.as_ref()
    }

    /// Owned copy of the closed history.
    pub fn snapshot(&self) -> Ledger {
        self.records.clone()
    }

    /// Record of a single game, zeroed when the game has never been tracked.
    #[cfg(test)]
    pub fn record(&self, game: &GameId) -> GameRecord {
        self.records.get(game).cloned().unwrap_or_default()
    }

    /// Snapshot with the open session, if any, closed at `now` in the copy
    /// only. This is what checkpoints persist: after a crash the reloaded
    /// ledger reflects play up to the last checkpoint and nothing is left open.
    ///
    /// An open session with no elapsed time yet is left out, so a game cleared
    /// while being played stays absent until time accrues again.
    pub fn checkpoint_view(&self, now: i64) -> Ledger {
        let mut view = self.snapshot();
        if let Some(open) = self.open.as_ref().filter(|o| now > o.start) {
            view.entry(open.game.clone())
                .or_default()
                .append(Session::closed(open.start, now));
        }
        view
    }
}

// ── Lenient numeric fields ────────────────────────────────────────────────────
//
// Ledger files written by earlier releases stored fractional seconds.

#[derive(Deserialize)]
#[serde(untagged)]
enum Seconds {
    Int(i64),
    Float(f64),
}

impl Seconds {
    /// Whole seconds. Non-finite floats and floats outside the `i64` range are
    /// rejected instead of saturating.
    fn as_i64(self) -> Result<i64, String> {
        match self {
            Seconds::Int(v) => Ok(v),
            Seconds::Float(v) => {
                let whole = v.trunc();
                if whole.is_finite() && whole >= i64::MIN as f64 && whole < i64::MAX as f64 {
                    Ok(whole as i64)
                } else {
                    Err(format!("seconds value out of range: {v}"))
                }
            }
        }
    }
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    Seconds::deserialize(d)?.as_i64().map_err(serde::de::Error::custom)
}

/// Only used for fields recomputed on load, so out-of-range values read as 0.
fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let v = Seconds::deserialize(d)?.as_i64().unwrap_or(0);
    Ok(v.max(0) as u64)
}

fn lenient_opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Option::<Seconds>::deserialize(d)?
        .map(Seconds::as_i64)
        .transpose()
        .map_err(serde::de::Error::custom)
}
