//! Approval Gate: the human-in-the-loop queue (spec §4.5.2). Requests are
//! persisted through `ApprovalEventRow` so pending approvals survive a
//! daemon restart; resolution fans out over a `tokio::sync::broadcast`
//! channel.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::store::{ApprovalEventRow, Storage, StorageError};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("approval queue is full (max {0} pending)")]
    QueueFull(usize),
    #[error("unknown approval request: {0}")]
    NotFound(String),
    #[error("approval gate has been shut down")]
    Destroyed,
}

pub type Result<T> = std::result::Result<T, ApprovalError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Timeout,
}

impl ApprovalStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Timeout => "timeout",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "approved" => Self::Approved,
            "denied" => Self::Denied,
            "timeout" => Self::Timeout,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub id: String,
    pub agent_id: String,
    pub session_id: String,
    pub action: String,
    pub reason: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApprovalRequestParams {
    pub agent_id: String,
    pub session_id: String,
    pub action: String,
    pub reason: String,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum ApprovalEvent {
    Requested(ApprovalRequest),
    Approved(ApprovalRequest),
    Denied(ApprovalRequest),
    TimedOut(ApprovalRequest),
}

fn row_from_request(request: &ApprovalRequest) -> ApprovalEventRow {
    ApprovalEventRow {
        id: request.id.clone(),
        agent_id: request.agent_id.clone(),
        session_id: request.session_id.clone(),
        action: request.action.clone(),
        reason: request.reason.clone(),
        status: request.status.as_str().to_string(),
        created_at: request.created_at,
        expires_at: request.expires_at,
        resolved_at: request.resolved_at,
        resolved_by: request.resolved_by.clone(),
        resolution_reason: request.resolution_reason.clone(),
    }
}

struct Pending {
    request: ApprovalRequest,
    waiters: Vec<oneshot::Sender<ApprovalStatus>>,
}

pub struct ApprovalGate {
    storage: Storage,
    default_timeout_secs: u64,
    max_pending: usize,
    pending: Mutex<HashMap<String, Pending>>,
    destroyed: Mutex<bool>,
    events: broadcast::Sender<ApprovalEvent>,
}

impl ApprovalGate {
    pub fn new(storage: Storage, default_timeout_secs: u64, max_pending: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            storage,
            default_timeout_secs,
            max_pending,
            pending: Mutex::new(HashMap::new()),
            destroyed: Mutex::new(false),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalEvent> {
        self.events.subscribe()
    }

    pub fn request_approval(&self, params: ApprovalRequestParams) -> Result<String> {
        if *self.destroyed.lock().expect("destroyed mutex poisoned") {
            return Err(ApprovalError::Destroyed);
        }
        let mut pending = self.pending.lock().expect("pending mutex poisoned");
        if pending.len() >= self.max_pending {
            return Err(ApprovalError::QueueFull(self.max_pending));
        }
        let now = Utc::now();
        let timeout_secs = params.timeout_secs.unwrap_or(self.default_timeout_secs);
        let request = ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            agent_id: params.agent_id,
            session_id: params.session_id,
            action: params.action,
            reason: params.reason,
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now + ChronoDuration::seconds(timeout_secs as i64),
            resolved_at: None,
            resolved_by: None,
            resolution_reason: None,
        };
        self.storage.insert_approval_event(&row_from_request(&request))?;
        let id = request.id.clone();
        let _ = self.events.send(ApprovalEvent::Requested(request.clone()));
        pending.insert(
            id.clone(),
            Pending {
                request,
                waiters: Vec::new(),
            },
        );
        Ok(id)
    }

    /// Resolves when the request is approved, denied, or times out. Each
    /// caller gets its own channel, so multiple waiters on one request all
    /// observe the same resolution.
    pub async fn wait_for_approval(&self, id: &str) -> Result<ApprovalStatus> {
        let rx = {
            let mut pending = self.pending.lock().expect("pending mutex poisoned");
            let entry = pending.get_mut(id).ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;
            if entry.request.status != ApprovalStatus::Pending {
                return Ok(entry.request.status);
            }
            let (tx, rx) = oneshot::channel();
            entry.waiters.push(tx);
            rx
        };
        rx.await.map_err(|_| ApprovalError::NotFound(id.to_string()))
    }

    pub fn approve(&self, id: &str, by: Option<&str>) -> Result<()> {
        self.resolve(id, ApprovalStatus::Approved, by, None)
    }

    pub fn deny(&self, id: &str, reason: Option<&str>, by: Option<&str>) -> Result<()> {
        self.resolve(id, ApprovalStatus::Denied, by, reason)
    }

    /// Called by the daemon's background sweep once `expires_at` passes.
    pub fn expire_if_due(&self, id: &str) -> Result<bool> {
        let due = {
            let pending = self.pending.lock().expect("pending mutex poisoned");
            match pending.get(id) {
                Some(entry) => entry.request.status == ApprovalStatus::Pending && Utc::now() >= entry.request.expires_at,
                None => false,
            }
        };
        if due {
            self.resolve(id, ApprovalStatus::Timeout, Some("system"), None)?;
        }
        Ok(due)
    }

    pub fn sweep_expired(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = {
            let pending = self.pending.lock().expect("pending mutex poisoned");
            pending
                .values()
                .filter(|e| e.request.status == ApprovalStatus::Pending && Utc::now() >= e.request.expires_at)
                .map(|e| e.request.id.clone())
                .collect()
        };
        for id in &ids {
            self.resolve(id, ApprovalStatus::Timeout, Some("system"), None)?;
        }
        Ok(ids)
    }

    fn resolve(&self, id: &str, status: ApprovalStatus, by: Option<&str>, reason: Option<&str>) -> Result<()> {
        let (request, waiters) = {
            let mut pending = self.pending.lock().expect("pending mutex poisoned");
            let entry = pending.get_mut(id).ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;
            if entry.request.status != ApprovalStatus::Pending {
                return Ok(());
            }
            entry.request.status = status;
            entry.request.resolved_at = Some(Utc::now());
            entry.request.resolved_by = by.map(str::to_string);
            entry.request.resolution_reason = reason.map(str::to_string);
            (entry.request.clone(), std::mem::take(&mut entry.waiters))
        };
        self.storage.update_approval_event(&row_from_request(&request))?;
        for waiter in waiters {
            let _ = waiter.send(status);
        }
        let event = match status {
            ApprovalStatus::Approved => ApprovalEvent::Approved(request),
            ApprovalStatus::Denied => ApprovalEvent::Denied(request),
            ApprovalStatus::Timeout => ApprovalEvent::TimedOut(request),
            ApprovalStatus::Pending => unreachable!(),
        };
        let _ = self.events.send(event);
        Ok(())
    }

    /// Resolves every pending request as denied and marks the gate
    /// unusable. Idempotent.
    pub fn destroy(&self) -> Result<()> {
        let mut destroyed = self.destroyed.lock().expect("destroyed mutex poisoned");
        if *destroyed {
            return Ok(());
        }
        *destroyed = true;
        let ids: Vec<String> = self.pending.lock().expect("pending mutex poisoned").keys().cloned().collect();
        drop(destroyed);
        for id in ids {
            self.deny(&id, Some("approval gate shut down"), Some("system"))?;
        }
        Ok(())
    }

    pub fn restore_from_storage(&self) -> Result<()> {
        let rows = self.storage.list_approval_events(self.max_pending)?;
        let mut pending = self.pending.lock().expect("pending mutex poisoned");
        for row in rows.into_iter().filter(|r| ApprovalStatus::parse(&r.status) == ApprovalStatus::Pending) {
            pending.insert(
                row.id.clone(),
                Pending {
                    request: ApprovalRequest {
                        id: row.id,
                        agent_id: row.agent_id,
                        session_id: row.session_id,
                        action: row.action,
                        reason: row.reason,
                        status: ApprovalStatus::Pending,
                        created_at: row.created_at,
                        expires_at: row.expires_at,
                        resolved_at: row.resolved_at,
                        resolved_by: row.resolved_by,
                        resolution_reason: row.resolution_reason,
                    },
                    waiters: Vec::new(),
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn gate(max_pending: usize) -> (ApprovalGate, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("sessions.db")).unwrap();
        (ApprovalGate::new(storage, 300, max_pending), dir)
    }

    fn params() -> ApprovalRequestParams {
        ApprovalRequestParams {
            agent_id: "agent-1".into(),
            session_id: "session-1".into(),
            action: "shell_exec".into(),
            reason: "needs rm -rf".into(),
            timeout_secs: None,
        }
    }

    #[tokio::test]
    async fn approve_resolves_waiter() {
        let (gate, _dir) = gate(10);
        let id = gate.request_approval(params()).unwrap();
        gate.approve(&id, Some("alice")).unwrap();
        let status = gate.wait_for_approval(&id).await.unwrap();
        assert_eq!(status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn deny_resolves_waiter_with_reason_persisted() {
        let (gate, _dir) = gate(10);
        let id = gate.request_approval(params()).unwrap();
        let waiting = tokio::spawn({
            let status = gate.wait_for_approval(&id);
            status
        });
        gate.deny(&id, Some("too risky"), Some("bob")).unwrap();
        let status = waiting.await.unwrap().unwrap();
        assert_eq!(status, ApprovalStatus::Denied);
    }

    #[test]
    fn queue_full_rejects_new_requests() {
        let (gate, _dir) = gate(1);
        gate.request_approval(params()).unwrap();
        let err = gate.request_approval(params()).unwrap_err();
        assert!(matches!(err, ApprovalError::QueueFull(1)));
    }

    #[test]
    fn destroy_denies_all_pending_and_blocks_new_requests() {
        let (gate, _dir) = gate(10);
        let id = gate.request_approval(params()).unwrap();
        gate.destroy().unwrap();
        let pending = gate.pending.lock().unwrap();
        assert_eq!(pending.get(&id).unwrap().request.status, ApprovalStatus::Denied);
        drop(pending);
        assert!(matches!(gate.request_approval(params()), Err(ApprovalError::Destroyed)));
    }

    #[test]
    fn expire_if_due_times_out_past_deadline() {
        let (gate, _dir) = gate(10);
        let id = gate.request_approval(ApprovalRequestParams {
            timeout_secs: Some(0),
            ..params()
        }).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(gate.expire_if_due(&id).unwrap());
    }
}
