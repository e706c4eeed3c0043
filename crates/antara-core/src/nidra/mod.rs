//! Nidra idle-detection daemon and Chitragupta calendar-aware consolidation
//! orchestrator (spec §4.3, Component D).
//!
//! Nidra is a single-threaded cooperative state machine (§3.4): a heartbeat
//! keeps `last_heartbeat` fresh while the process is alive, and `touch()`
//! resets the idle timer from any call site that observes user activity.
//! `Chitragupta` (`chitragupta.rs`) wraps a `Nidra` to run the calendar-aware
//! daily/monthly/yearly consolidation pipeline and owns the Svapna five-phase
//! pipeline (`svapna.rs`).

mod chitragupta;
mod svapna;

pub use chitragupta::{Chitragupta, ChitraguptaError, ConsolidationSummary};
pub use svapna::{SvapnaPhase, SvapnaProgress, SvapnaReport};

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::store::{NidraRow, Storage, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NidraState {
    Listening,
    Dreaming,
    DeepSleep,
}

impl NidraState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NidraState::Listening => "LISTENING",
            NidraState::Dreaming => "DREAMING",
            NidraState::DeepSleep => "DEEP_SLEEP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LISTENING" => Some(NidraState::Listening),
            "DREAMING" => Some(NidraState::Dreaming),
            "DEEP_SLEEP" => Some(NidraState::DeepSleep),
            _ => None,
        }
    }
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum NidraError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("illegal nidra transition {from:?} -> {to:?}")]
    IllegalTransition { from: NidraState, to: NidraState },
}

pub type Result<T> = std::result::Result<T, NidraError>;

struct Inner {
    state: NidraState,
    last_state_change: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
    last_consolidation_start: Option<DateTime<Utc>>,
    last_consolidation_end: Option<DateTime<Utc>>,
    consolidation_phase: Option<String>,
    consolidation_progress: f64,
}

type DreamHandler = Box<dyn Fn(&str, f64) + Send + Sync>;

/// The idle-detection daemon. Owns the process-wide singleton row; every
/// write goes through `persist()` so the row is never duplicated.
pub struct Nidra {
    idle_threshold_secs: u64,
    heartbeat_interval_secs: u64,
    inner: Mutex<Inner>,
    on_dream: Mutex<Vec<DreamHandler>>,
}

fn legal_transition(from: NidraState, to: NidraState) -> bool {
    use NidraState::*;
    matches!(
        (from, to),
        (Listening, Dreaming)
            | (Dreaming, DeepSleep)
            | (DeepSleep, Listening)
            | (Dreaming, Listening)
            | (DeepSleep, DeepSleep)
            | (Listening, Listening)
            | (Dreaming, Dreaming)
    )
}

impl Nidra {
    /// Restores state from the persisted row, defaulting to `LISTENING` at
    /// `now` if no row exists or a field fails to parse (spec §4.3.1).
    pub fn restore(storage: &Storage, idle_threshold_secs: u64, heartbeat_interval_secs: u64) -> Result<Self> {
        let now = Utc::now();
        let inner = match storage.get_nidra_row()? {
            Some(row) => {
                let state = NidraState::parse(&row.current_state).unwrap_or(NidraState::Listening);
                Inner {
                    state,
                    last_state_change: row.last_state_change,
                    last_heartbeat: now,
                    last_consolidation_start: row.last_consolidation_start,
                    last_consolidation_end: row.last_consolidation_end,
                    consolidation_phase: row.consolidation_phase,
                    consolidation_progress: row.consolidation_progress,
                }
            }
            None => Inner {
                state: NidraState::Listening,
                last_state_change: now,
                last_heartbeat: now,
                last_consolidation_start: None,
                last_consolidation_end: None,
                consolidation_phase: None,
                consolidation_progress: 0.0,
            },
        };
        let nidra = Self {
            idle_threshold_secs,
            heartbeat_interval_secs,
            inner: Mutex::new(inner),
            on_dream: Mutex::new(Vec::new()),
        };
        nidra.persist(storage)?;
        Ok(nidra)
    }

    pub fn state(&self) -> NidraState {
        self.inner.lock().expect("poisoned").state
    }

    pub fn idle_threshold_secs(&self) -> u64 {
        self.idle_threshold_secs
    }

    pub fn last_consolidation_end(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().expect("poisoned").last_consolidation_end
    }

    /// Registers an `on_dream` handler, invoked with `(phase, progress)`
    /// whenever `touch_idle_check` crosses the idle threshold.
    pub fn on_dream(&self, handler: impl Fn(&str, f64) + Send + Sync + 'static) {
        self.on_dream.lock().expect("poisoned").push(Box::new(handler));
    }

    fn transition(&self, storage: &Storage, to: NidraState) -> Result<()> {
        let mut guard = self.inner.lock().expect("poisoned");
        if !legal_transition(guard.state, to) {
            return Err(NidraError::IllegalTransition { from: guard.state, to });
        }
        guard.state = to;
        guard.last_state_change = Utc::now();
        drop(guard);
        self.persist(storage)
    }

    /// Resets the idle timer. If currently `DREAMING`/`DEEP_SLEEP` and
    /// `interrupt` is set, transitions back to `LISTENING` immediately
    /// (spec §3.4: "interrupt-to-LISTENING from any state").
    pub fn touch(&self, storage: &Storage, interrupt: bool) -> Result<()> {
        {
            let mut guard = self.inner.lock().expect("poisoned");
            guard.last_heartbeat = Utc::now();
        }
        let needs_interrupt = interrupt && !matches!(self.state(), NidraState::Listening);
        if needs_interrupt {
            self.transition(storage, NidraState::Listening)?;
        } else {
            self.persist(storage)?;
        }
        Ok(())
    }

    /// Coalesced heartbeat write: only persists if at least
    /// `heartbeat_interval_secs` elapsed since the last write, matching the
    /// spec's "coalesced writes" guarantee.
    pub fn heartbeat(&self, storage: &Storage) -> Result<()> {
        let should_persist = {
            let mut guard = self.inner.lock().expect("poisoned");
            let now = Utc::now();
            let elapsed = (now - guard.last_heartbeat).num_seconds();
            guard.last_heartbeat = now;
            elapsed >= self.heartbeat_interval_secs as i64
        };
        if should_persist {
            self.persist(storage)?;
        }
        Ok(())
    }

    /// Called periodically by the caller's scheduler; if idle long enough
    /// while `LISTENING`, transitions to `DREAMING` and fires `on_dream`
    /// handlers. Returns whether a dream cycle was started.
    pub fn check_idle(&self, storage: &Storage) -> Result<bool> {
        let should_dream = {
            let guard = self.inner.lock().expect("poisoned");
            guard.state == NidraState::Listening
                && (Utc::now() - guard.last_heartbeat).num_seconds() >= self.idle_threshold_secs as i64
        };
        if !should_dream {
            return Ok(false);
        }
        self.transition(storage, NidraState::Dreaming)?;
        let handlers = self.on_dream.lock().expect("poisoned");
        for handler in handlers.iter() {
            handler("dream", 0.0);
        }
        Ok(true)
    }

    /// Marks a light consolidation pass complete; transitions to
    /// `DEEP_SLEEP` (spec: "DREAMING -> DEEP_SLEEP (completed light pass)").
    pub fn complete_light_pass(&self, storage: &Storage) -> Result<()> {
        self.transition(storage, NidraState::DeepSleep)
    }

    pub fn set_consolidation_window(
        &self,
        storage: &Storage,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<()> {
        {
            let mut guard = self.inner.lock().expect("poisoned");
            if start.is_some() {
                guard.last_consolidation_start = start;
            }
            if end.is_some() {
                guard.last_consolidation_end = end;
            }
        }
        self.persist(storage)
    }

    pub fn set_consolidation_phase(&self, storage: &Storage, phase: Option<&str>, progress: f64) -> Result<()> {
        {
            let mut guard = self.inner.lock().expect("poisoned");
            guard.consolidation_phase = phase.map(String::from);
            guard.consolidation_progress = progress.clamp(0.0, 1.0);
        }
        self.persist(storage)
    }

    /// Best-effort flush on daemon stop (spec §4.3.1: "On stop: flush
    /// heartbeat").
    pub fn stop(&self, storage: &Storage) -> Result<()> {
        self.persist(storage)
    }

    fn persist(&self, storage: &Storage) -> Result<()> {
        let guard = self.inner.lock().expect("poisoned");
        storage.upsert_nidra_row_full(&NidraRow {
            current_state: guard.state.as_str().to_string(),
            last_state_change: guard.last_state_change,
            last_heartbeat: guard.last_heartbeat,
            last_consolidation_start: guard.last_consolidation_start,
            last_consolidation_end: guard.last_consolidation_end,
            consolidation_phase: guard.consolidation_phase.clone(),
            consolidation_progress: guard.consolidation_progress,
        })?;
        Ok(())
    }
}

/// Schedules a wakeup at `min(remaining, i32::MAX)` and reports whether
/// another reschedule is still needed (spec §4.3.3). `remaining` and the
/// return value are both in milliseconds; the caller loops until `false`.
///
/// A `target` already in the past yields `(0, false)`: the caller should
/// fire immediately.
pub fn next_long_timeout_step(remaining_ms: i64) -> (u32, bool) {
    const MAX_TIMER_MS: i64 = i32::MAX as i64;
    if remaining_ms <= 0 {
        return (0, false);
    }
    if remaining_ms <= MAX_TIMER_MS {
        (remaining_ms as u32, false)
    } else {
        (MAX_TIMER_MS as u32, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn restore_with_no_row_defaults_to_listening() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("agent.db")).unwrap();
        let nidra = Nidra::restore(&storage, 300, 5).unwrap();
        assert_eq!(nidra.state(), NidraState::Listening);
    }

    #[test]
    fn cardinality_is_always_exactly_one_row() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("agent.db")).unwrap();
        let nidra = Nidra::restore(&storage, 300, 5).unwrap();
        nidra.touch(&storage, false).unwrap();
        nidra.heartbeat(&storage).unwrap();
        assert!(storage.get_nidra_row().unwrap().is_some());
    }

    #[test]
    fn interrupt_returns_to_listening_from_any_state() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("agent.db")).unwrap();
        let nidra = Nidra::restore(&storage, 0, 5).unwrap();
        nidra.check_idle(&storage).unwrap();
        assert_eq!(nidra.state(), NidraState::Dreaming);
        nidra.complete_light_pass(&storage).unwrap();
        assert_eq!(nidra.state(), NidraState::DeepSleep);
        nidra.touch(&storage, true).unwrap();
        assert_eq!(nidra.state(), NidraState::Listening);
    }

    #[test]
    fn on_dream_handlers_fire_on_idle_crossing() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("agent.db")).unwrap();
        let nidra = Nidra::restore(&storage, 0, 5).unwrap();
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired2 = fired.clone();
        nidra.on_dream(move |_phase, _progress| {
            fired2.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        nidra.check_idle(&storage).unwrap();
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn long_timeout_in_the_past_fires_immediately() {
        assert_eq!(next_long_timeout_step(-5), (0, false));
        assert_eq!(next_long_timeout_step(0), (0, false));
    }

    #[test]
    fn long_timeout_above_cap_reschedules() {
        let (step, more) = next_long_timeout_step(i64::from(i32::MAX) + 1000);
        assert_eq!(step, i32::MAX as u32);
        assert!(more);
    }
}
