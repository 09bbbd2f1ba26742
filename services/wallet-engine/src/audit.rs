//! Best-effort activity log for privileged operations.
//!
//! Callers hand records to [`AuditDispatcher::record`], which never blocks and
//! never fails. A background task drains the channel into an [`AuditSink`].

use crate::errors::Result;
use crate::metrics::{AUDIT_RECORDS_DROPPED, AUDIT_WRITE_FAILURES};
use crate::models::ActivityRecord;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, record: &ActivityRecord) -> Result<()>;
}

/// Persists records to the `activity_logs` table.
pub struct SqlAuditSink {
    pool: SqlitePool,
}

impl SqlAuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for SqlAuditSink {
    async fn write(&self, record: &ActivityRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO activity_logs (actor_id, action, entity, entity_id, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.actor_id)
        .bind(record.action)
        .bind(&record.entity)
        .bind(record.entity_id)
        .bind(&record.detail)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Emits records as structured log lines.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write(&self, record: &ActivityRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        info!(target: "wallet_engine::audit", "{}", payload);
        Ok(())
    }
}

#[derive(Clone)]
pub struct AuditDispatcher {
    sender: Option<mpsc::Sender<ActivityRecord>>,
}

impl AuditDispatcher {
    /// Starts the delivery task. The task ends once every dispatcher clone is dropped.
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<ActivityRecord>(capacity);

        let worker = tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                if let Err(e) = sink.write(&record).await {
                    AUDIT_WRITE_FAILURES.inc();
                    error!(
                        "Failed to write audit record {} on {} {}: {}",
                        record.action, record.entity, record.entity_id, e
                    );
                }
            }
            debug!("Audit channel closed");
        });

        (
            Self {
                sender: Some(sender),
            },
            worker,
        )
    }

    /// Dispatcher that discards everything.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn record(&self, record: ActivityRecord) {
        let Some(sender) = &self.sender else {
            return;
        };

        match sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                AUDIT_RECORDS_DROPPED.inc();
                warn!(
                    "Audit channel full, dropping {} on {} {}",
                    record.action, record.entity, record.entity_id
                );
            }
            Err(TrySendError::Closed(record)) => {
                AUDIT_RECORDS_DROPPED.inc();
                warn!(
                    "Audit worker stopped, dropping {} on {} {}",
                    record.action, record.entity, record.entity_id
                );
            }
        }
    }
}
