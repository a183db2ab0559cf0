//! Completed-delivery bookkeeping
//!
//! Sessions hand finished deliveries to an [`AccountingNotifier`], which
//! queues them for a background worker so a slow collaborator never holds
//! up a transfer. Failures are reported as events and go no further.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use shipd_errors::{Error, NetworkError};
use shipd_events::{AccountingEvent, AppEvent, EventEmitter, EventSender};
use shipd_net::NetClient;
use shipd_types::ArtifactId;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Receiver of completed-delivery records
#[async_trait]
pub trait AccountingCollaborator: Send + Sync {
    /// Record that `identifier` was delivered in full
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be stored.
    async fn record_completed_delivery(
        &self,
        identifier: &ArtifactId,
        bytes_sent: u64,
    ) -> Result<(), Error>;
}

#[derive(Debug, Clone)]
struct DeliveryRecord {
    identifier: ArtifactId,
    bytes_sent: u64,
}

/// Non-blocking front of the accounting worker
#[derive(Clone)]
pub struct AccountingNotifier {
    queue: mpsc::Sender<DeliveryRecord>,
    tx: EventSender,
}

impl AccountingNotifier {
    /// Start the worker draining into `collaborator`.
    ///
    /// The worker exits once every notifier clone is dropped.
    #[must_use]
    pub fn spawn(
        collaborator: Arc<dyn AccountingCollaborator>,
        capacity: usize,
        tx: EventSender,
    ) -> (Self, JoinHandle<()>) {
        let (queue, mut rx) = mpsc::channel::<DeliveryRecord>(capacity.max(1));
        let worker_tx = tx.clone();

        let worker = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                match collaborator
                    .record_completed_delivery(&record.identifier, record.bytes_sent)
                    .await
                {
                    Ok(()) => worker_tx.emit(AppEvent::Accounting(AccountingEvent::Recorded {
                        identifier: record.identifier,
                        bytes_sent: record.bytes_sent,
                    })),
                    Err(e) => worker_tx.emit_accounting_failed(record.identifier, &e),
                }
            }
        });

        (Self { queue, tx }, worker)
    }

    /// Queue a record without waiting; drops it with a warning if the queue is full
    pub fn notify(&self, identifier: ArtifactId, bytes_sent: u64) {
        let record = DeliveryRecord {
            identifier,
            bytes_sent,
        };
        let (record, reason) = match self.queue.try_send(record) {
            Ok(()) => return,
            Err(TrySendError::Full(record)) => (record, "accounting queue full"),
            Err(TrySendError::Closed(record)) => (record, "accounting worker stopped"),
        };
        self.tx.emit(AppEvent::Accounting(AccountingEvent::Dropped {
            identifier: record.identifier,
            reason: reason.to_string(),
        }));
    }
}

/// Per-artifact totals kept by [`DownloadLedger`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub downloads: u64,
    pub bytes_sent: u64,
    pub last_delivered_at: DateTime<Utc>,
}

/// In-memory download counter
#[derive(Debug, Default)]
pub struct DownloadLedger {
    entries: DashMap<ArtifactId, LedgerEntry>,
}

impl DownloadLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entry(&self, identifier: &ArtifactId) -> Option<LedgerEntry> {
        self.entries.get(identifier).map(|e| e.value().clone())
    }

    #[must_use]
    pub fn total_downloads(&self) -> u64 {
        self.entries.iter().map(|e| e.downloads).sum()
    }
}

#[async_trait]
impl AccountingCollaborator for DownloadLedger {
    async fn record_completed_delivery(
        &self,
        identifier: &ArtifactId,
        bytes_sent: u64,
    ) -> Result<(), Error> {
        let now = Utc::now();
        self.entries
            .entry(identifier.clone())
            .and_modify(|entry| {
                entry.downloads += 1;
                entry.bytes_sent += bytes_sent;
                entry.last_delivered_at = now;
            })
            .or_insert(LedgerEntry {
                downloads: 1,
                bytes_sent,
                last_delivered_at: now,
            });
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordBody<'a> {
    identifier: &'a ArtifactId,
    bytes_sent: u64,
}

/// Posts `{identifier, bytesSent}` to an accounting endpoint
#[derive(Clone)]
pub struct HttpAccounting {
    client: NetClient,
    endpoint: String,
}

impl HttpAccounting {
    #[must_use]
    pub fn new(client: NetClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl AccountingCollaborator for HttpAccounting {
    async fn record_completed_delivery(
        &self,
        identifier: &ArtifactId,
        bytes_sent: u64,
    ) -> Result<(), Error> {
        let body = RecordBody {
            identifier,
            bytes_sent,
        };
        let response = self.client.post_json(&self.endpoint, &body).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::HttpError {
                status: status.as_u16(),
                message: status.to_string(),
            }
            .into());
        }
        Ok(())
    }
}
