/// Audit trail for security-relevant events
///
/// Events are emitted after the unit of work that produced them commits.
/// A failing sink never fails the operation; the error is logged and dropped.
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{AuditEvent, AuditEventType, RequestContext};

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> anyhow::Result<()>;
}

/// Writes audit events as structured log lines under the `audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
        info!(
            target: "audit",
            event_type = event.event_type.as_str(),
            user_id = ?event.user_id,
            ip_address = event.ip_address.as_deref().unwrap_or("-"),
            user_agent = event.user_agent.as_deref().unwrap_or("-"),
            occurred_at = %event.occurred_at,
            "{}",
            event.description
        );
        Ok(())
    }
}

/// Keeps events in memory for inspection
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events_of(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub async fn log_event(
        &self,
        user_id: Option<Uuid>,
        event_type: AuditEventType,
        description: impl Into<String>,
        ctx: &RequestContext,
    ) {
        let event = AuditEvent {
            user_id,
            event_type,
            description: description.into(),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            occurred_at: Utc::now(),
        };

        if let Err(e) = self.sink.record(&event).await {
            warn!(
                event_type = event_type.as_str(),
                error = %e,
                "Failed to record audit event"
            );
        }
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger").finish_non_exhaustive()
    }
}
