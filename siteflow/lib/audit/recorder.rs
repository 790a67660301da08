use std::{sync::Arc, time::Instant};

use crate::{SiteflowError, SiteflowResult};

use super::{ActionStatus, ActionType, AuditStore, NewAuditEntry, TargetType};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Writes the shared audit envelope around actions.
///
/// A `pending` entry is written when the action starts and finalized to a
/// terminal status before the handler returns. Failure of any audit write
/// never fails the wrapped action; it is logged and swallowed.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<AuditStore>,
}

/// An open audit envelope for one in-flight action.
pub struct AuditScope {
    store: Arc<AuditStore>,
    id: Option<i64>,
    action_type: ActionType,
    target_name: String,
    started: Instant,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl AuditRecorder {
    /// Creates a recorder over the store.
    pub fn new(store: Arc<AuditStore>) -> Self {
        Self { store }
    }

    /// Opens an envelope: writes the `pending` entry and starts the clock.
    pub async fn begin(
        &self,
        action_type: ActionType,
        target_type: TargetType,
        target_name: &str,
        metadata: serde_json::Value,
    ) -> AuditScope {
        let id = match self
            .store
            .append(NewAuditEntry {
                action_type,
                target_type,
                target_name: target_name.to_string(),
                status: ActionStatus::Pending,
                output: None,
                error_message: None,
                metadata,
                duration_ms: None,
            })
            .await
        {
            Result::Ok(id) => Some(id),
            Result::Err(e) => {
                tracing::error!(error = %e, action = %action_type, "failed to write pending audit entry");
                None
            }
        };
        AuditScope {
            store: self.store.clone(),
            id,
            action_type,
            target_name: target_name.to_string(),
            started: Instant::now(),
        }
    }

    /// Writes a one-shot terminal entry (no pending phase).
    pub async fn record(
        &self,
        action_type: ActionType,
        target_type: TargetType,
        target_name: &str,
        status: ActionStatus,
        output: Option<String>,
        error_message: Option<String>,
        metadata: serde_json::Value,
        duration_ms: Option<f64>,
    ) {
        let result = self
            .store
            .append(NewAuditEntry {
                action_type,
                target_type,
                target_name: target_name.to_string(),
                status,
                output,
                error_message,
                metadata,
                duration_ms,
            })
            .await;
        if let Result::Err(e) = result {
            tracing::error!(error = %e, action = %action_type, "failed to write audit entry");
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<AuditStore> {
        &self.store
    }
}

impl AuditScope {
    /// Finalizes the envelope as success.
    pub async fn succeed(self, output: Option<String>) {
        self.finalize(ActionStatus::Success, output, None).await;
    }

    /// Finalizes the envelope as failure.
    pub async fn fail(self, error: &SiteflowError) {
        self.finalize(ActionStatus::Failure, None, Some(error.to_string()))
            .await;
    }

    /// Finalizes the envelope from a result reference, preserving output on
    /// success.
    pub async fn finish<T>(self, result: &SiteflowResult<T>, output: Option<String>) {
        match result {
            Result::Ok(_) => self.succeed(output).await,
            Result::Err(e) => self.fail(e).await,
        }
    }

    async fn finalize(self, status: ActionStatus, output: Option<String>, error: Option<String>) {
        let Some(id) = self.id else {
            return;
        };
        let duration_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let result = self
            .store
            .finalize(id, status, output, error, Some(duration_ms))
            .await;
        match result {
            Result::Ok(()) => match status {
                ActionStatus::Failure => {
                    tracing::warn!(
                        action = %self.action_type,
                        target = %self.target_name,
                        duration_ms = format!("{duration_ms:.1}"),
                        "action failed"
                    );
                }
                _ => {
                    tracing::info!(
                        action = %self.action_type,
                        target = %self.target_name,
                        duration_ms = format!("{duration_ms:.1}"),
                        "action completed"
                    );
                }
            },
            Result::Err(e) => {
                tracing::error!(error = %e, audit_id = id, "failed to finalize audit entry");
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::{audit::AuditQuery, store::init_db};

    use super::*;

    async fn recorder() -> (tempfile::TempDir, AuditRecorder) {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_db(&dir.path().join("test.db")).await.unwrap();
        let store = Arc::new(AuditStore::new(pool, 10_000));
        (dir, AuditRecorder::new(store))
    }

    #[tokio::test]
    async fn test_envelope_success_path() {
        let (_dir, recorder) = recorder().await;
        let scope = recorder
            .begin(
                ActionType::ContainerStart,
                TargetType::Container,
                "blog",
                serde_json::Value::Null,
            )
            .await;
        scope.succeed(Some("started".to_string())).await;

        let page = recorder.store().query(&AuditQuery::default()).await.unwrap();
        assert_eq!(page.logs.len(), 1);
        let log = &page.logs[0];
        assert_eq!(log.status, "success");
        assert_eq!(log.action_type, "container_start");
        assert_eq!(log.output.as_deref(), Some("started"));
        assert!(log.duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_envelope_failure_path() {
        let (_dir, recorder) = recorder().await;
        let scope = recorder
            .begin(
                ActionType::SiteStop,
                TargetType::Site,
                "blog",
                serde_json::json!({"via": "test"}),
            )
            .await;
        scope
            .fail(&SiteflowError::Transport("ssh down".to_string()))
            .await;

        let page = recorder.store().query(&AuditQuery::default()).await.unwrap();
        let log = &page.logs[0];
        assert_eq!(log.status, "failure");
        assert!(log.error_message.as_deref().unwrap().contains("ssh down"));
        assert_eq!(log.metadata["via"], "test");
    }

    #[tokio::test]
    async fn test_no_pending_left_behind() {
        let (_dir, recorder) = recorder().await;
        let scope = recorder
            .begin(
                ActionType::SiteStart,
                TargetType::Site,
                "blog",
                serde_json::Value::Null,
            )
            .await;
        scope.succeed(None).await;

        let pending = recorder
            .store()
            .query(&AuditQuery {
                status: Some("pending".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(pending.total, 0);
    }
}
