use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::{self, KvStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Planning,
    FetchingBalances,
    Valuing,
    Caching,
    Done,
}

/// Latest known state of one request, overwritten in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub status: ProgressStatus,
    pub stage: ProgressStage,
    pub processed: usize,
    pub total: usize,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn running(stage: ProgressStage, processed: usize, total: usize) -> Self {
        Self {
            status: ProgressStatus::Running,
            stage,
            processed,
            total,
            updated_at: Utc::now(),
        }
    }

    pub fn completed(total: usize) -> Self {
        Self {
            status: ProgressStatus::Completed,
            stage: ProgressStage::Done,
            processed: total,
            total,
            updated_at: Utc::now(),
        }
    }

    pub fn failed(stage: ProgressStage) -> Self {
        Self {
            status: ProgressStatus::Failed,
            stage,
            processed: 0,
            total: 0,
            updated_at: Utc::now(),
        }
    }
}

pub fn progress_key(request_id: &str) -> String {
    format!("progress:{}", request_id)
}

/// Fire-and-forget progress side channel.
///
/// `report` never blocks and never fails; a background task drains the channel into the
/// cache and only logs write errors.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<(String, ProgressRecord)>,
}

impl ProgressReporter {
    pub fn spawn(store: Arc<dyn KvStore>, ttl: Duration, shutdown: CancellationToken) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, ProgressRecord)>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    next = rx.recv() => {
                        let Some((request_id, record)) = next else { break };
                        let key = progress_key(&request_id);
                        if let Err(e) = cache::set_json(store.as_ref(), &key, &record, ttl).await {
                            tracing::warn!(request_id = %request_id, error = %e, "Failed to write progress record");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
            tracing::debug!("Progress writer stopped");
        });

        Self { tx }
    }

    pub fn report(&self, request_id: Option<&str>, record: ProgressRecord) {
        let Some(request_id) = request_id else { return };
        if self.tx.send((request_id.to_string(), record)).is_err() {
            tracing::debug!(request_id, "Progress channel closed, dropping update");
        }
    }
}

pub async fn read_progress(store: &dyn KvStore, request_id: &str) -> eyre::Result<Option<ProgressRecord>> {
    cache::get_json(store, &progress_key(request_id)).await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use async_trait::async_trait;

    pub(crate) async fn wait_for_progress(
        store: &dyn KvStore,
        request_id: &str,
        status: ProgressStatus,
    ) -> Option<ProgressRecord> {
        for _ in 0..50 {
            if let Ok(Some(record)) = read_progress(store, request_id).await {
                if record.status == status {
                    return Some(record);
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    struct BrokenStore;

    #[async_trait]
    impl KvStore for BrokenStore {
        async fn get(&self, _key: &str) -> eyre::Result<Option<String>> {
            Err(eyre::eyre!("store offline"))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> eyre::Result<()> {
            Err(eyre::eyre!("store offline"))
        }
    }

    #[test]
    fn test_stage_names() {
        let json = serde_json::to_string(&ProgressRecord::running(ProgressStage::Caching, 14, 14)).unwrap();
        assert!(json.contains("\"stage\":\"caching\""));
        assert!(json.contains("\"status\":\"running\""));
    }

    #[tokio::test]
    async fn test_records_are_overwritten_in_place() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new(100));
        let reporter = ProgressReporter::spawn(store.clone(), Duration::from_secs(60), CancellationToken::new());

        reporter.report(Some("req-1"), ProgressRecord::running(ProgressStage::Valuing, 3, 14));
        reporter.report(Some("req-1"), ProgressRecord::completed(14));

        let record = wait_for_progress(store.as_ref(), "req-1", ProgressStatus::Completed)
            .await
            .expect("completed record");
        assert_eq!(record.stage, ProgressStage::Done);
        assert_eq!(record.processed, 14);
    }

    #[tokio::test]
    async fn test_missing_request_id_is_ignored() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new(100));
        let reporter = ProgressReporter::spawn(store.clone(), Duration::from_secs(60), CancellationToken::new());
        reporter.report(None, ProgressRecord::completed(1));
        assert!(read_progress(store.as_ref(), "").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_failures_are_swallowed() {
        let reporter = ProgressReporter::spawn(Arc::new(BrokenStore), Duration::from_secs(60), CancellationToken::new());
        reporter.report(Some("req-2"), ProgressRecord::running(ProgressStage::Planning, 0, 1));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
