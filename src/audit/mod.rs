//! Append-only audit trail of security-relevant actions.
//!
//! `record` is fire-and-forget: events go down an unbounded channel to a
//! background writer, so a failed audit write never fails the guarded
//! operation. Write failures surface to operational logging only.
//!
//! Rows are write-once. The only deletion path is the retention job, which
//! bulk-deletes by age on a schedule and never runs inline with a request.

mod storage;

pub use storage::{AuditEntry, AuditFilter, cleanup, query};

use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info};
use uuid::Uuid;

/// One security-relevant event, as captured at the call site.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub resource: String,
    pub outcome: String,
    pub client_ip: Option<String>,
    pub device: Option<String>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(
        actor_id: Option<Uuid>,
        action: impl Into<String>,
        resource: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            actor_id,
            action: action.into(),
            resource: resource.into(),
            outcome: outcome.into(),
            client_ip: None,
            device: None,
        }
    }

    #[must_use]
    pub fn with_caller(mut self, client_ip: Option<String>, device: Option<String>) -> Self {
        self.client_ip = client_ip;
        self.device = device;
        self
    }
}

/// Cheap cloneable handle for appending audit events.
#[derive(Clone)]
pub struct AuditRecorder {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl AuditRecorder {
    /// Create a recorder and the receiving end for a writer task.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AuditEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Spawn the database writer and return the recorder handle.
    #[must_use]
    pub fn spawn_writer(pool: PgPool) -> Self {
        let (recorder, mut rx) = Self::channel();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = storage::insert(&pool, &event).await {
                    error!(
                        action = %event.action,
                        outcome = %event.outcome,
                        "failed to write audit row: {err}"
                    );
                }
            }
        });
        recorder
    }

    /// Append an event. Never blocks, never fails the caller.
    pub fn record(&self, event: AuditEvent) {
        if self.tx.send(event).is_err() {
            error!("audit writer is gone; dropping audit event");
        }
    }
}

/// Periodically delete audit rows older than the retention cutoff.
pub fn spawn_retention_worker(pool: PgPool, retention_days: i64, interval: Duration) {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            match cleanup(&pool, retention_days).await {
                Ok(0) => {}
                Ok(count) => info!(count, retention_days, "audit retention cleanup"),
                Err(err) => error!("audit retention cleanup failed: {err}"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recorder_delivers_events_in_order() {
        let (recorder, mut rx) = AuditRecorder::channel();
        recorder.record(AuditEvent::new(None, "auth.login", "auth", "no_such_user"));
        recorder.record(
            AuditEvent::new(Some(Uuid::nil()), "auth.login", "auth", "success")
                .with_caller(Some("1.2.3.4".to_string()), Some("cli".to_string())),
        );

        let first = rx.recv().await.expect("first event");
        assert_eq!(first.outcome, "no_such_user");
        assert_eq!(first.actor_id, None);

        let second = rx.recv().await.expect("second event");
        assert_eq!(second.actor_id, Some(Uuid::nil()));
        assert_eq!(second.client_ip.as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn record_without_a_writer_does_not_panic() {
        let (recorder, rx) = AuditRecorder::channel();
        drop(rx);
        recorder.record(AuditEvent::new(None, "auth.login", "auth", "success"));
    }
}
