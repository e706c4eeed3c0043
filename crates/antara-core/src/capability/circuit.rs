//! Per-server circuit breaker and crash quarantine (spec §4.7.2).

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Breaker {
    failures: VecDeque<DateTime<Utc>>,
    state: CircuitState,
    opened_at: Option<DateTime<Utc>>,
    half_open_at: Option<DateTime<Utc>>,
}

impl Breaker {
    fn new() -> Self {
        Self {
            failures: VecDeque::new(),
            state: CircuitState::Closed,
            opened_at: None,
            half_open_at: None,
        }
    }
}

/// Tracks a failure ring per server and derives closed/open/half-open
/// state from it. Time-based transitions (`open` -> `half-open`) are
/// evaluated lazily on query, not via a background timer.
pub struct CircuitBreaker {
    window: Duration,
    failure_threshold: usize,
    cooldown: Duration,
    breakers: HashMap<String, Breaker>,
}

impl CircuitBreaker {
    pub fn new(window_secs: u64, failure_threshold: usize, cooldown_secs: u64) -> Self {
        Self {
            window: Duration::seconds(window_secs as i64),
            failure_threshold,
            cooldown: Duration::seconds(cooldown_secs as i64),
            breakers: HashMap::new(),
        }
    }

    fn breaker_mut(&mut self, server_id: &str) -> &mut Breaker {
        self.breakers.entry(server_id.to_string()).or_insert_with(Breaker::new)
    }

    fn prune(breaker: &mut Breaker, window: Duration) {
        let cutoff = Utc::now() - window;
        while breaker.failures.front().is_some_and(|t| *t < cutoff) {
            breaker.failures.pop_front();
        }
    }

    /// Current state, resolving any pending `open -> half-open` transition.
    pub fn state(&mut self, server_id: &str) -> CircuitState {
        let breaker = self.breaker_mut(server_id);
        if breaker.state == CircuitState::Open {
            if let Some(half_open_at) = breaker.half_open_at {
                if Utc::now() >= half_open_at {
                    breaker.state = CircuitState::HalfOpen;
                }
            }
        }
        breaker.state
    }

    pub fn record_success(&mut self, server_id: &str) {
        let breaker = self.breaker_mut(server_id);
        if breaker.state == CircuitState::HalfOpen {
            breaker.state = CircuitState::Closed;
            breaker.failures.clear();
            breaker.opened_at = None;
            breaker.half_open_at = None;
        }
    }

    pub fn record_failure(&mut self, server_id: &str) {
        let window = self.window;
        let threshold = self.failure_threshold;
        let cooldown = self.cooldown;
        let breaker = self.breaker_mut(server_id);

        if breaker.state == CircuitState::HalfOpen {
            let now = Utc::now();
            breaker.state = CircuitState::Open;
            breaker.opened_at = Some(now);
            breaker.half_open_at = Some(now + cooldown);
            return;
        }

        let now = Utc::now();
        breaker.failures.push_back(now);
        Self::prune(breaker, window);

        if breaker.state == CircuitState::Closed && breaker.failures.len() >= threshold {
            breaker.state = CircuitState::Open;
            breaker.opened_at = Some(now);
            breaker.half_open_at = Some(now + cooldown);
        }
    }
}

struct QuarantineEntry {
    crashes: VecDeque<DateTime<Utc>>,
    quarantined_until: Option<DateTime<Utc>>,
}

impl QuarantineEntry {
    fn new() -> Self {
        Self { crashes: VecDeque::new(), quarantined_until: None }
    }
}

/// Tracks crash (transition-to-`error`) timestamps per server; quarantines
/// a server that crashes too often within a rolling window.
pub struct Quarantine {
    crash_window: Duration,
    max_crashes: usize,
    quarantine_duration: Duration,
    entries: HashMap<String, QuarantineEntry>,
}

impl Quarantine {
    pub fn new(max_crashes: usize, crash_window_secs: u64, quarantine_duration_secs: u64) -> Self {
        Self {
            crash_window: Duration::seconds(crash_window_secs as i64),
            max_crashes,
            quarantine_duration: Duration::seconds(quarantine_duration_secs as i64),
            entries: HashMap::new(),
        }
    }

    fn entry_mut(&mut self, server_id: &str) -> &mut QuarantineEntry {
        self.entries.entry(server_id.to_string()).or_insert_with(QuarantineEntry::new)
    }

    /// Records a crash. Returns `true` if this crash pushed the server into
    /// quarantine.
    pub fn record_crash(&mut self, server_id: &str) -> bool {
        let window = self.crash_window;
        let max_crashes = self.max_crashes;
        let duration = self.quarantine_duration;
        let entry = self.entry_mut(server_id);

        let now = Utc::now();
        entry.crashes.push_back(now);
        let cutoff = now - window;
        while entry.crashes.front().is_some_and(|t| *t < cutoff) {
            entry.crashes.pop_front();
        }

        if entry.crashes.len() >= max_crashes {
            entry.quarantined_until = Some(now + duration);
            true
        } else {
            false
        }
    }

    pub fn is_quarantined(&mut self, server_id: &str) -> bool {
        let entry = self.entry_mut(server_id);
        match entry.quarantined_until {
            Some(until) if Utc::now() < until => true,
            Some(_) => {
                entry.quarantined_until = None;
                false
            }
            None => false,
        }
    }

    /// Manual operator release; clears quarantine and crash history so the
    /// caller can immediately restart the server.
    pub fn release(&mut self, server_id: &str) {
        let entry = self.entry_mut(server_id);
        entry.quarantined_until = None;
        entry.crashes.clear();
    }
}
