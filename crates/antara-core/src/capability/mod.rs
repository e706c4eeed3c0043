//! Remote capability orchestration (spec §4.7, Component H): a server
//! registry state machine plus the autonomous policy layer (health
//! scoring, circuit breaking, quarantine, target selection) that wraps
//! it. The concrete MCP stdio/SSE wire protocol is out of scope; this
//! module only defines the `CapabilityTransport` boundary and a registry
//! contract a daemon can drive.

mod autonomous;
mod circuit;

pub use autonomous::{AutonomousManager, HealthScore, TargetSelection};
pub use circuit::{CircuitBreaker, CircuitState, Quarantine};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("server {0} not found")]
    NotFound(String),
    #[error("illegal transition for server {server}: {from:?} -> {to:?}")]
    IllegalTransition {
        server: String,
        from: ServerState,
        to: ServerState,
    },
    #[error("server {0} already registered")]
    AlreadyRegistered(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Idle,
    Starting,
    Ready,
    Error,
    Restarting,
    Stopping,
    Stopped,
}

impl ServerState {
    /// Legal transitions per spec §4.7.1. Self-transitions are never legal;
    /// callers that want idempotent "ensure running" semantics should check
    /// the current state first.
    fn can_transition_to(self, to: ServerState) -> bool {
        use ServerState::*;
        matches!(
            (self, to),
            (Idle, Starting)
                | (Starting, Ready)
                | (Starting, Error)
                | (Ready, Stopping)
                | (Ready, Error)
                | (Error, Restarting)
                | (Error, Stopping)
                | (Error, Stopped)
                | (Restarting, Starting)
                | (Restarting, Stopped)
                | (Stopping, Stopped)
                | (Stopped, Idle)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    ServerAdded { id: String },
    ServerRemoved { id: String },
    StateChanged { id: String, from: ServerState, to: ServerState },
    ToolsChanged { id: String },
    Error { id: String, message: String },
    HealthOk { id: String },
    HealthFail { id: String, consecutive_failures: u32 },
    ToolsUpdated,
}

#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_calls: u64,
    pub total_errors: u64,
    /// Exponentially weighted moving average of call latency in milliseconds.
    pub average_latency_ms: f64,
    pub last_call_at: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

const LATENCY_EWMA_ALPHA: f64 = 0.2;

impl ServerStats {
    fn record_call(&mut self, success: bool, latency_ms: f64) {
        self.total_calls += 1;
        if !success {
            self.total_errors += 1;
        }
        self.average_latency_ms = if self.total_calls == 1 {
            latency_ms
        } else {
            LATENCY_EWMA_ALPHA * latency_ms + (1.0 - LATENCY_EWMA_ALPHA) * self.average_latency_ms
        };
        self.last_call_at = Some(Utc::now());
    }

    fn record_health(&mut self, ok: bool) {
        self.last_health_check = Some(Utc::now());
        if ok {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            1.0
        } else {
            1.0 - (self.total_errors as f64 / self.total_calls as f64)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagedServerInfo {
    pub id: String,
    pub state: ServerState,
    pub tools: Vec<ToolDescriptor>,
    pub stats: ServerStats,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
}

impl ManagedServerInfo {
    fn new(id: String) -> Self {
        Self {
            id,
            state: ServerState::Idle,
            tools: Vec::new(),
            stats: ServerStats::default(),
            started_at: None,
            restart_count: 0,
        }
    }

    /// Wall-clock time in `ready`, zero otherwise (spec §4.7.1).
    pub fn uptime(&self) -> chrono::Duration {
        match (self.state, self.started_at) {
            (ServerState::Ready, Some(started)) => Utc::now().signed_duration_since(started),
            _ => chrono::Duration::zero(),
        }
    }
}

/// Connect/call/close boundary to a spawned MCP server. The concrete
/// stdio/SSE transport is an out-of-scope collaborator; daemons plug a
/// real implementation in here and tests use `NullTransport`.
pub trait CapabilityTransport: Send + Sync {
    fn connect(&self, server_id: &str) -> Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send + '_>>;
    fn call(
        &self,
        server_id: &str,
        tool: &str,
        args: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<serde_json::Value, String>> + Send + '_>>;
    fn close(&self, server_id: &str) -> Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send + '_>>;
}

/// In-memory fake transport: connect/close always succeed, calls always
/// return `null` unless a canned response was registered for the tool.
#[derive(Debug, Default)]
pub struct NullTransport {
    responses: std::sync::Mutex<HashMap<String, serde_json::Value>>,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, tool: impl Into<String>, value: serde_json::Value) -> Self {
        self.responses.lock().expect("mutex poisoned").insert(tool.into(), value);
        self
    }
}

impl CapabilityTransport for NullTransport {
    fn connect(&self, _server_id: &str) -> Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn call(
        &self,
        _server_id: &str,
        tool: &str,
        _args: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<serde_json::Value, String>> + Send + '_>> {
        let response = self
            .responses
            .lock()
            .expect("mutex poisoned")
            .get(tool)
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        Box::pin(async move { Ok(response) })
    }

    fn close(&self, _server_id: &str) -> Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

/// Maps server ids to their lifecycle state and stats, emitting typed
/// events on every mutation. Holds no opinion on restart/backoff policy;
/// that lives in `AutonomousManager`.
pub struct ServerRegistry {
    servers: HashMap<String, ManagedServerInfo>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self { servers: HashMap::new(), events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        let _ = self.events.send(event);
    }

    pub fn add(&mut self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        if self.servers.contains_key(&id) {
            return Err(ProtocolError::AlreadyRegistered(id));
        }
        self.servers.insert(id.clone(), ManagedServerInfo::new(id.clone()));
        self.emit(RegistryEvent::ServerAdded { id });
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<()> {
        self.servers.remove(id).ok_or_else(|| ProtocolError::NotFound(id.to_string()))?;
        self.emit(RegistryEvent::ServerRemoved { id: id.to_string() });
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ManagedServerInfo> {
        self.servers.get(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn transition(&mut self, id: &str, to: ServerState) -> Result<()> {
        let server = self.servers.get_mut(id).ok_or_else(|| ProtocolError::NotFound(id.to_string()))?;
        let from = server.state;
        if !from.can_transition_to(to) {
            return Err(ProtocolError::IllegalTransition { server: id.to_string(), from, to });
        }
        server.state = to;
        if to == ServerState::Ready {
            server.started_at = Some(Utc::now());
        }
        if to == ServerState::Restarting {
            server.restart_count += 1;
        }
        self.emit(RegistryEvent::StateChanged { id: id.to_string(), from, to });
        Ok(())
    }

    pub fn set_tools(&mut self, id: &str, tools: Vec<ToolDescriptor>) -> Result<()> {
        let server = self.servers.get_mut(id).ok_or_else(|| ProtocolError::NotFound(id.to_string()))?;
        server.tools = tools;
        self.emit(RegistryEvent::ToolsChanged { id: id.to_string() });
        self.emit(RegistryEvent::ToolsUpdated);
        Ok(())
    }

    pub fn record_error(&mut self, id: &str, message: impl Into<String>) -> Result<()> {
        if !self.servers.contains_key(id) {
            return Err(ProtocolError::NotFound(id.to_string()));
        }
        self.emit(RegistryEvent::Error { id: id.to_string(), message: message.into() });
        Ok(())
    }

    pub fn record_call(&mut self, id: &str, success: bool, latency_ms: f64) -> Result<()> {
        let server = self.servers.get_mut(id).ok_or_else(|| ProtocolError::NotFound(id.to_string()))?;
        server.stats.record_call(success, latency_ms);
        Ok(())
    }

    /// Runs a health-check ping result into the stats, emitting
    /// `health-ok`/`health-fail`. Returns `true` once `max_failures`
    /// consecutive failures is reached, signalling the caller to restart.
    pub fn record_health(&mut self, id: &str, ok: bool, max_failures: u32) -> Result<bool> {
        let server = self.servers.get_mut(id).ok_or_else(|| ProtocolError::NotFound(id.to_string()))?;
        server.stats.record_health(ok);
        if ok {
            self.emit(RegistryEvent::HealthOk { id: id.to_string() });
            Ok(false)
        } else {
            let failures = server.stats.consecutive_failures;
            self.emit(RegistryEvent::HealthFail { id: id.to_string(), consecutive_failures: failures });
            Ok(failures >= max_failures)
        }
    }
}
